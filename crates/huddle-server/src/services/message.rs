use crate::chat::{MessageStore, StoreError};
use crate::models::{from_micros, MessageRow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use huddle_protocol::MessageData;
use sqlx::SqlitePool;
use uuid::Uuid;

const MESSAGE_COLUMNS: &str = r#"
    m.id, m.community_id, m.author_id, u.display_name AS author_name, m.content,
    m.is_announcement, m.is_pinned, m.is_deleted, m.created_at_us
    FROM messages m
    JOIN users u ON u.id = m.author_id
"#;

/// Message storage over SQLite. `created_at` is kept as integer microseconds
/// so `(created_at, id)` ordering is exact.
#[derive(Clone)]
pub struct SqlMessageStore {
    db: SqlitePool,
}

impl SqlMessageStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MessageStore for SqlMessageStore {
    async fn latest_created_at(
        &self,
        community_id: Uuid,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let latest: Option<i64> =
            sqlx::query_scalar("SELECT MAX(created_at_us) FROM messages WHERE community_id = ?")
                .bind(community_id)
                .fetch_one(&self.db)
                .await?;

        Ok(latest.map(from_micros))
    }

    async fn insert(&self, message: &MessageData) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO messages
                (id, community_id, author_id, content, is_announcement, is_pinned, is_deleted, created_at_us)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(message.id)
        .bind(message.community_id)
        .bind(message.author_id)
        .bind(&message.content)
        .bind(message.is_announcement)
        .bind(message.is_pinned)
        .bind(message.is_deleted)
        .bind(message.created_at.timestamp_micros())
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn get(&self, community_id: Uuid, id: Uuid) -> Result<Option<MessageData>, StoreError> {
        let row = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} WHERE m.community_id = ? AND m.id = ?"
        ))
        .bind(community_id)
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(MessageData::from))
    }

    async fn set_pinned(
        &self,
        community_id: Uuid,
        id: Uuid,
        pinned: bool,
    ) -> Result<Option<MessageData>, StoreError> {
        // Pin stamps strictly increase per community so "most recent first" is total.
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET is_pinned = ?,
                pinned_at_us = CASE WHEN ? THEN MAX(?, COALESCE(
                    (SELECT MAX(pinned_at_us) FROM messages WHERE community_id = ?), 0) + 1)
                ELSE NULL END
            WHERE community_id = ? AND id = ? AND is_deleted = 0
            "#,
        )
        .bind(pinned)
        .bind(pinned)
        .bind(Utc::now().timestamp_micros())
        .bind(community_id)
        .bind(community_id)
        .bind(id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get(community_id, id).await
    }

    async fn tombstone(
        &self,
        community_id: Uuid,
        id: Uuid,
    ) -> Result<Option<MessageData>, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET is_deleted = 1, content = '', is_pinned = 0, pinned_at_us = NULL
            WHERE community_id = ? AND id = ?
            "#,
        )
        .bind(community_id)
        .bind(id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get(community_id, id).await
    }

    async fn pinned_ids(&self, community_id: Uuid) -> Result<Vec<Uuid>, StoreError> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM messages
            WHERE community_id = ? AND is_pinned = 1
            ORDER BY pinned_at_us DESC
            "#,
        )
        .bind(community_id)
        .fetch_all(&self.db)
        .await?;

        Ok(ids)
    }

    async fn pinned(&self, community_id: Uuid) -> Result<Vec<MessageData>, StoreError> {
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} WHERE m.community_id = ? AND m.is_pinned = 1 ORDER BY m.pinned_at_us DESC"
        ))
        .bind(community_id)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(MessageData::from).collect())
    }

    async fn history(
        &self,
        community_id: Uuid,
        before: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<MessageData>, StoreError> {
        let mut rows = match before {
            Some(before_id) => {
                let cursor: Option<(i64, Uuid)> = sqlx::query_as(
                    "SELECT created_at_us, id FROM messages WHERE community_id = ? AND id = ?",
                )
                .bind(community_id)
                .bind(before_id)
                .fetch_optional(&self.db)
                .await?;

                // An unknown cursor has nothing before it.
                let Some((created_at_us, id)) = cursor else {
                    return Ok(Vec::new());
                };

                sqlx::query_as::<_, MessageRow>(&format!(
                    r#"
                    SELECT {MESSAGE_COLUMNS}
                    WHERE m.community_id = ? AND (m.created_at_us, m.id) < (?, ?)
                    ORDER BY m.created_at_us DESC, m.id DESC
                    LIMIT ?
                    "#
                ))
                .bind(community_id)
                .bind(created_at_us)
                .bind(id)
                .bind(limit)
                .fetch_all(&self.db)
                .await?
            }
            None => {
                sqlx::query_as::<_, MessageRow>(&format!(
                    r#"
                    SELECT {MESSAGE_COLUMNS}
                    WHERE m.community_id = ?
                    ORDER BY m.created_at_us DESC, m.id DESC
                    LIMIT ?
                    "#
                ))
                .bind(community_id)
                .bind(limit)
                .fetch_all(&self.db)
                .await?
            }
        };

        rows.reverse();
        Ok(rows.into_iter().map(MessageData::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::{CreateCommunity, CreateUser};
    use crate::services::{community::CommunityService, user::UserService};
    use chrono::Duration;

    struct Fixture {
        store: SqlMessageStore,
        community_id: Uuid,
        author_id: Uuid,
    }

    async fn setup() -> Fixture {
        let pool = db::init_pool("sqlite::memory:").await.unwrap();
        db::run_migrations(&pool).await.unwrap();

        let author = UserService::new(pool.clone())
            .create(CreateUser {
                username: "ann".into(),
                display_name: "Ann".into(),
                password: "pw".into(),
            })
            .await
            .unwrap();
        let community = CommunityService::new(pool.clone())
            .create(author.id, CreateCommunity { name: "Shop".into() })
            .await
            .unwrap();

        Fixture {
            store: SqlMessageStore::new(pool),
            community_id: community.id,
            author_id: author.id,
        }
    }

    fn message(f: &Fixture, content: &str, created_at: DateTime<Utc>) -> MessageData {
        MessageData {
            id: Uuid::new_v4(),
            community_id: f.community_id,
            author_id: f.author_id,
            author_name: "Ann".into(),
            content: content.into(),
            is_announcement: false,
            is_pinned: false,
            is_deleted: false,
            created_at,
        }
    }

    async fn seed(f: &Fixture, count: usize) -> Vec<MessageData> {
        let base = from_micros(Utc::now().timestamp_micros());
        let mut out = Vec::new();
        for i in 0..count {
            let msg = message(f, &format!("m{i}"), base + Duration::microseconds(i as i64));
            f.store.insert(&msg).await.unwrap();
            out.push(msg);
        }
        out
    }

    #[tokio::test]
    async fn stored_message_reads_back_exactly() {
        let f = setup().await;
        let sent = seed(&f, 1).await.remove(0);

        let read = f.store.get(f.community_id, sent.id).await.unwrap().unwrap();
        assert_eq!(read, sent);
        assert_eq!(
            f.store.latest_created_at(f.community_id).await.unwrap(),
            Some(sent.created_at)
        );
        assert!(f.store.get(Uuid::new_v4(), sent.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn history_pages_backwards_in_ascending_order() {
        let f = setup().await;
        let all = seed(&f, 5).await;

        let newest = f.store.history(f.community_id, None, 2).await.unwrap();
        assert_eq!(newest, all[3..].to_vec());

        let older = f
            .store
            .history(f.community_id, Some(newest[0].id), 2)
            .await
            .unwrap();
        assert_eq!(older, all[1..3].to_vec());

        let oldest = f
            .store
            .history(f.community_id, Some(older[0].id), 10)
            .await
            .unwrap();
        assert_eq!(oldest, all[..1].to_vec());
    }

    #[tokio::test]
    async fn pins_are_most_recent_first_and_tombstones_unpin() {
        let f = setup().await;
        let all = seed(&f, 3).await;

        f.store.set_pinned(f.community_id, all[0].id, true).await.unwrap();
        f.store.set_pinned(f.community_id, all[2].id, true).await.unwrap();
        f.store.set_pinned(f.community_id, all[1].id, true).await.unwrap();
        assert_eq!(
            f.store.pinned_ids(f.community_id).await.unwrap(),
            vec![all[1].id, all[2].id, all[0].id]
        );

        let gone = f
            .store
            .tombstone(f.community_id, all[2].id)
            .await
            .unwrap()
            .unwrap();
        assert!(gone.is_deleted && !gone.is_pinned && gone.content.is_empty());
        assert_eq!(gone.created_at, all[2].created_at);

        let pinned = f.store.pinned(f.community_id).await.unwrap();
        let ids: Vec<Uuid> = pinned.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![all[1].id, all[0].id]);

        // Tombstones stay in history.
        assert_eq!(f.store.history(f.community_id, None, 10).await.unwrap().len(), 3);
        assert!(
            f.store
                .set_pinned(f.community_id, all[2].id, true)
                .await
                .unwrap()
                .is_none()
        );
    }
}
