//! Collaborator seams the engine depends on but does not implement.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use huddle_protocol::{ChatSettings, MessageData};
use thiserror::Error;
use uuid::Uuid;

use super::Member;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Community settings and membership.
#[async_trait]
pub trait CommunityDirectory: Send + Sync {
    /// `None` when the community does not exist.
    async fn chat_settings(&self, community_id: Uuid) -> Result<Option<ChatSettings>, StoreError>;

    /// `None` when the user is not a member.
    async fn member(&self, community_id: Uuid, user_id: Uuid) -> Result<Option<Member>, StoreError>;
}

/// Durable, append-only message storage keyed by `(community_id, id)`.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn latest_created_at(&self, community_id: Uuid)
        -> Result<Option<DateTime<Utc>>, StoreError>;

    async fn insert(&self, message: &MessageData) -> Result<(), StoreError>;

    async fn get(&self, community_id: Uuid, id: Uuid) -> Result<Option<MessageData>, StoreError>;

    async fn set_pinned(
        &self,
        community_id: Uuid,
        id: Uuid,
        pinned: bool,
    ) -> Result<Option<MessageData>, StoreError>;

    /// Blanks the content and marks the message deleted. Also unpins it.
    async fn tombstone(&self, community_id: Uuid, id: Uuid)
        -> Result<Option<MessageData>, StoreError>;

    /// Most recently pinned first.
    async fn pinned_ids(&self, community_id: Uuid) -> Result<Vec<Uuid>, StoreError>;

    /// Most recently pinned first.
    async fn pinned(&self, community_id: Uuid) -> Result<Vec<MessageData>, StoreError>;

    /// Up to `limit` messages strictly before `before` (or the newest, if `None`),
    /// returned ascending by `(created_at, id)`.
    async fn history(
        &self,
        community_id: Uuid,
        before: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<MessageData>, StoreError>;
}
