use chrono::{DateTime, Utc};
use huddle_protocol::MessageData;
use serde::Deserialize;
use sqlx::FromRow;
use uuid::Uuid;

/// A `messages` row joined with its author's display name.
#[derive(Debug, Clone, FromRow)]
pub struct MessageRow {
    pub id: Uuid,
    pub community_id: Uuid,
    pub author_id: Uuid,
    pub author_name: String,
    pub content: String,
    pub is_announcement: bool,
    pub is_pinned: bool,
    pub is_deleted: bool,
    pub created_at_us: i64,
}

impl From<MessageRow> for MessageData {
    fn from(row: MessageRow) -> Self {
        MessageData {
            id: row.id,
            community_id: row.community_id,
            author_id: row.author_id,
            author_name: row.author_name,
            content: row.content,
            is_announcement: row.is_announcement,
            is_pinned: row.is_pinned,
            is_deleted: row.is_deleted,
            created_at: from_micros(row.created_at_us),
        }
    }
}

pub fn from_micros(us: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(us).unwrap_or_default()
}

#[derive(Debug, Deserialize)]
pub struct CreateMessage {
    pub content: String,
    #[serde(default)]
    pub is_announcement: bool,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub before: Option<Uuid>,
    pub limit: Option<i64>,
}
