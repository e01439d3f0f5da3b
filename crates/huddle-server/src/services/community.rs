use crate::chat::{CommunityDirectory, Member, StoreError};
use crate::error::{AppError, Result};
use crate::models::{
    role_from_row, settings_from_row, CommunityInvite, CommunityRow, CreateCommunity,
    CreateInvite, MemberRow, UpdateChatSettings,
};
use async_trait::async_trait;
use chrono::Utc;
use huddle_protocol::{ChatMode, ChatSettings, CommunityData, Role};
use rand::Rng;
use sqlx::SqlitePool;
use uuid::Uuid;

const COMMUNITY_COLUMNS: &str = r#"
    c.id, c.name, c.owner_id, c.chat_mode, c.slowmode_seconds, m.role, c.created_at
    FROM communities c
    JOIN community_members m ON m.community_id = c.id
"#;

#[derive(Clone)]
pub struct CommunityService {
    db: SqlitePool,
}

impl CommunityService {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Creates a community. The creator becomes its owner.
    pub async fn create(&self, owner_id: Uuid, input: CreateCommunity) -> Result<CommunityData> {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(AppError::BadRequest("Community name is required".to_string()));
        }

        let id = Uuid::new_v4();
        let now = Utc::now();
        let defaults = ChatSettings::default();

        let mut tx = self.db.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO communities (id, name, owner_id, chat_mode, slowmode_seconds, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(owner_id)
        .bind(defaults.chat_mode.as_str())
        .bind(i64::from(defaults.slowmode_seconds))
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO community_members (community_id, user_id, role, joined_at) VALUES (?, ?, ?, ?)",
        )
        .bind(id)
        .bind(owner_id)
        .bind(Role::Owner.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(community_id = %id, owner_id = %owner_id, "Created community {}", name);
        self.get_for_member(id, owner_id).await
    }

    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<CommunityData>> {
        let rows = sqlx::query_as::<_, CommunityRow>(&format!(
            "SELECT {COMMUNITY_COLUMNS} WHERE m.user_id = ? ORDER BY c.created_at"
        ))
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(CommunityData::from).collect())
    }

    /// The community as seen by `user_id`. Not found if it does not exist,
    /// forbidden if the user is not a member.
    pub async fn get_for_member(&self, community_id: Uuid, user_id: Uuid) -> Result<CommunityData> {
        let row = sqlx::query_as::<_, CommunityRow>(&format!(
            "SELECT {COMMUNITY_COLUMNS} WHERE c.id = ? AND m.user_id = ?"
        ))
        .bind(community_id)
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;

        match row {
            Some(row) => Ok(row.into()),
            None if self.exists(community_id).await? => Err(AppError::Forbidden),
            None => Err(AppError::NotFound("Community not found".to_string())),
        }
    }

    async fn exists(&self, community_id: Uuid) -> Result<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM communities WHERE id = ?)")
            .bind(community_id)
            .fetch_one(&self.db)
            .await?;
        Ok(exists)
    }

    async fn require_owner(&self, community_id: Uuid, user_id: Uuid) -> Result<()> {
        let community = self.get_for_member(community_id, user_id).await?;
        if community.role != Role::Owner {
            return Err(AppError::Forbidden);
        }
        Ok(())
    }

    /// Owner-only. Takes effect on the next send in the community's room.
    pub async fn update_chat_settings(
        &self,
        community_id: Uuid,
        requester: Uuid,
        input: UpdateChatSettings,
    ) -> Result<ChatSettings> {
        self.require_owner(community_id, requester).await?;

        if input.chat_mode == Some(ChatMode::Unknown) {
            return Err(AppError::BadRequest("Unknown chat mode".to_string()));
        }

        let (chat_mode, slowmode_seconds): (String, i64) = sqlx::query_as(
            r#"
            UPDATE communities
            SET chat_mode = COALESCE(?, chat_mode),
                slowmode_seconds = COALESCE(?, slowmode_seconds)
            WHERE id = ?
            RETURNING chat_mode, slowmode_seconds
            "#,
        )
        .bind(input.chat_mode.map(|m| m.as_str()))
        .bind(input.slowmode_seconds.map(i64::from))
        .bind(community_id)
        .fetch_one(&self.db)
        .await?;

        let settings = settings_from_row(&chat_mode, slowmode_seconds);
        tracing::info!(
            community_id = %community_id,
            chat_mode = %settings.chat_mode,
            slowmode_seconds = settings.slowmode_seconds,
            "Chat settings updated"
        );
        Ok(settings)
    }

    /// Owner-only. There is exactly one owner, so ownership cannot be granted
    /// or taken away here.
    pub async fn set_member_role(
        &self,
        community_id: Uuid,
        requester: Uuid,
        target: Uuid,
        role: Role,
    ) -> Result<()> {
        self.require_owner(community_id, requester).await?;

        if role == Role::Owner || target == requester {
            return Err(AppError::BadRequest("Ownership cannot be changed".to_string()));
        }

        let result = sqlx::query(
            "UPDATE community_members SET role = ? WHERE community_id = ? AND user_id = ?",
        )
        .bind(role.as_str())
        .bind(community_id)
        .bind(target)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Member not found".to_string()));
        }

        tracing::info!(community_id = %community_id, user_id = %target, role = %role, "Member role changed");
        Ok(())
    }

    pub async fn create_invite(
        &self,
        community_id: Uuid,
        requester: Uuid,
        input: CreateInvite,
    ) -> Result<CommunityInvite> {
        self.get_for_member(community_id, requester).await?;

        let invite = sqlx::query_as::<_, CommunityInvite>(
            r#"
            INSERT INTO community_invites (code, community_id, created_by, max_uses, uses, created_at)
            VALUES (?, ?, ?, ?, 0, ?)
            RETURNING code, community_id, created_by, uses, max_uses, created_at
            "#,
        )
        .bind(invite_code())
        .bind(community_id)
        .bind(requester)
        .bind(input.max_uses)
        .bind(Utc::now())
        .fetch_one(&self.db)
        .await?;

        Ok(invite)
    }

    /// Joins the invite's community as a `member`. Joining a community you
    /// already belong to leaves your role alone.
    pub async fn join_with_invite(&self, code: &str, user_id: Uuid) -> Result<CommunityData> {
        let invite = sqlx::query_as::<_, CommunityInvite>(
            r#"
            SELECT code, community_id, created_by, uses, max_uses, created_at
            FROM community_invites WHERE code = ?
            "#,
        )
        .bind(code)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Invalid invite code".to_string()))?;

        if invite.max_uses.is_some_and(|max| invite.uses >= max) {
            return Err(AppError::BadRequest("Invite has expired".to_string()));
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO community_members (community_id, user_id, role, joined_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (community_id, user_id) DO NOTHING
            "#,
        )
        .bind(invite.community_id)
        .bind(user_id)
        .bind(Role::Member.as_str())
        .bind(Utc::now())
        .execute(&self.db)
        .await?;

        if inserted.rows_affected() > 0 {
            sqlx::query("UPDATE community_invites SET uses = uses + 1 WHERE code = ?")
                .bind(code)
                .execute(&self.db)
                .await?;
            tracing::info!(community_id = %invite.community_id, user_id = %user_id, "Joined community");
        }

        self.get_for_member(invite.community_id, user_id).await
    }
}

fn invite_code() -> String {
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(8)
        .map(char::from)
        .collect()
}

#[async_trait]
impl CommunityDirectory for CommunityService {
    async fn chat_settings(&self, community_id: Uuid) -> std::result::Result<Option<ChatSettings>, StoreError> {
        let row: Option<(String, i64)> =
            sqlx::query_as("SELECT chat_mode, slowmode_seconds FROM communities WHERE id = ?")
                .bind(community_id)
                .fetch_optional(&self.db)
                .await?;

        Ok(row.map(|(mode, slowmode)| settings_from_row(&mode, slowmode)))
    }

    async fn member(
        &self,
        community_id: Uuid,
        user_id: Uuid,
    ) -> std::result::Result<Option<Member>, StoreError> {
        let row = sqlx::query_as::<_, MemberRow>(
            r#"
            SELECT m.user_id, u.display_name, m.role
            FROM community_members m
            JOIN users u ON u.id = m.user_id
            WHERE m.community_id = ? AND m.user_id = ?
            "#,
        )
        .bind(community_id)
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(|row| Member {
            user_id: row.user_id,
            role: role_from_row(&row.role),
            display_name: row.display_name,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::CreateUser;
    use crate::services::user::UserService;

    async fn setup() -> (CommunityService, UserService) {
        let pool = db::init_pool("sqlite::memory:").await.unwrap();
        db::run_migrations(&pool).await.unwrap();
        (CommunityService::new(pool.clone()), UserService::new(pool))
    }

    async fn user(users: &UserService, name: &str) -> Uuid {
        users
            .create(CreateUser {
                username: name.to_string(),
                display_name: name.to_uppercase(),
                password: "pw".to_string(),
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn creator_is_owner_and_invitees_are_members() {
        let (communities, users) = setup().await;
        let owner = user(&users, "olive").await;
        let guest = user(&users, "gus").await;

        let community = communities
            .create(owner, CreateCommunity { name: "Shop".into() })
            .await
            .unwrap();
        assert_eq!(community.role, Role::Owner);
        assert_eq!(community.settings, ChatSettings::default());

        assert!(communities.member(community.id, guest).await.unwrap().is_none());

        let invite = communities
            .create_invite(community.id, owner, CreateInvite::default())
            .await
            .unwrap();
        let joined = communities.join_with_invite(&invite.code, guest).await.unwrap();
        assert_eq!(joined.role, Role::Member);

        let member = communities.member(community.id, guest).await.unwrap().unwrap();
        assert_eq!(member.role, Role::Member);
        assert_eq!(member.display_name, "GUS");
    }

    #[tokio::test]
    async fn only_the_owner_changes_settings_and_roles() {
        let (communities, users) = setup().await;
        let owner = user(&users, "olive").await;
        let guest = user(&users, "gus").await;
        let community = communities
            .create(owner, CreateCommunity { name: "Shop".into() })
            .await
            .unwrap();
        let invite = communities
            .create_invite(community.id, owner, CreateInvite::default())
            .await
            .unwrap();
        communities.join_with_invite(&invite.code, guest).await.unwrap();

        let update = || UpdateChatSettings {
            chat_mode: Some(ChatMode::ModeratorsOnly),
            slowmode_seconds: Some(10),
        };
        assert!(matches!(
            communities.update_chat_settings(community.id, guest, update()).await,
            Err(AppError::Forbidden)
        ));

        let settings = communities
            .update_chat_settings(community.id, owner, update())
            .await
            .unwrap();
        assert_eq!(settings.chat_mode, ChatMode::ModeratorsOnly);
        assert_eq!(
            communities.chat_settings(community.id).await.unwrap(),
            Some(settings)
        );

        communities
            .set_member_role(community.id, owner, guest, Role::Moderator)
            .await
            .unwrap();
        let member = communities.member(community.id, guest).await.unwrap().unwrap();
        assert_eq!(member.role, Role::Moderator);

        assert!(matches!(
            communities
                .set_member_role(community.id, owner, guest, Role::Owner)
                .await,
            Err(AppError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn unrecognised_stored_mode_loads_as_unknown() {
        let (communities, users) = setup().await;
        let owner = user(&users, "olive").await;
        let community = communities
            .create(owner, CreateCommunity { name: "Shop".into() })
            .await
            .unwrap();

        sqlx::query("UPDATE communities SET chat_mode = 'vip_only' WHERE id = ?")
            .bind(community.id)
            .execute(&communities.db)
            .await
            .unwrap();

        let settings = communities.chat_settings(community.id).await.unwrap().unwrap();
        assert_eq!(settings.chat_mode, ChatMode::Unknown);
        assert_eq!(communities.chat_settings(Uuid::new_v4()).await.unwrap(), None);
    }
}
