//! Validation, stamping, and persistence of new messages.
//!
//! Every entry point that creates a message (live submit or REST submit) goes
//! through [`MessagePipeline::persist`], which is the only place ids and
//! timestamps are assigned.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use huddle_protocol::MessageData;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use super::{Member, MessageStore};
use crate::error::ChatError;

pub struct MessagePipeline {
    store: Arc<dyn MessageStore>,
    max_length: usize,
    /// Last `created_at` handed out per community.
    clocks: Mutex<HashMap<Uuid, DateTime<Utc>>>,
}

impl MessagePipeline {
    pub fn new(store: Arc<dyn MessageStore>, max_length: usize) -> Self {
        Self {
            store,
            max_length,
            clocks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    pub fn validate(&self, content: &str) -> Result<(), ChatError> {
        if content.trim().is_empty() {
            return Err(ChatError::Validation("message is empty".to_string()));
        }
        let len = content.chars().count();
        if len > self.max_length {
            return Err(ChatError::Validation(format!(
                "message is {} characters, the limit is {}",
                len, self.max_length
            )));
        }
        Ok(())
    }

    /// Validates, stamps, and durably stores a message. The returned record is
    /// exactly what was stored.
    pub async fn persist(
        &self,
        community_id: Uuid,
        author: &Member,
        content: &str,
        is_announcement: bool,
    ) -> Result<MessageData, ChatError> {
        self.validate(content)?;

        let created_at = self.stamp(community_id).await?;
        let message = MessageData {
            id: Uuid::new_v4(),
            community_id,
            author_id: author.user_id,
            author_name: author.display_name.clone(),
            content: content.to_string(),
            is_announcement,
            is_pinned: false,
            is_deleted: false,
            created_at,
        };

        if let Err(e) = self.store.insert(&message).await {
            tracing::error!(
                community_id = %community_id,
                message_id = %message.id,
                "Failed to persist message: {}",
                e
            );
            return Err(ChatError::PersistenceFailure(e.to_string()));
        }

        Ok(message)
    }

    /// Next `created_at` for the community: the current time at microsecond
    /// precision, bumped past the previous stamp so stamps strictly increase.
    async fn stamp(&self, community_id: Uuid) -> Result<DateTime<Utc>, ChatError> {
        let seeded = self.lock_clocks().contains_key(&community_id);
        let floor = if seeded {
            None
        } else {
            self.store
                .latest_created_at(community_id)
                .await
                .map_err(|e| {
                    tracing::error!(community_id = %community_id, "Failed to read message clock: {}", e);
                    ChatError::PersistenceFailure(e.to_string())
                })?
        };

        let mut clocks = self.lock_clocks();
        let last = clocks.entry(community_id).or_insert(DateTime::<Utc>::MIN_UTC);
        if let Some(floor) = floor {
            *last = (*last).max(floor);
        }

        let now = truncate_to_micros(Utc::now());
        let next = if now > *last {
            now
        } else {
            *last + ChronoDuration::microseconds(1)
        };
        *last = next;
        Ok(next)
    }

    /// Drops the community's clock. The next stamp reseeds from the store.
    pub fn forget(&self, community_id: Uuid) {
        self.lock_clocks().remove(&community_id);
    }

    fn lock_clocks(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, DateTime<Utc>>> {
        // The map is never left half-updated, so a poisoned guard is still usable.
        self.clocks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn truncate_to_micros(t: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(t.timestamp_micros()).unwrap_or(t)
}
