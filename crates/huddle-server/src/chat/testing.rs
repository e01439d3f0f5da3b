//! In-memory collaborators for engine tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use huddle_protocol::{ChatSettings, MessageData, Role};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

use super::{CommunityDirectory, Member, MessageStore, StoreError};

pub fn member(role: Role, name: &str) -> Member {
    Member {
        user_id: Uuid::new_v4(),
        role,
        display_name: name.to_string(),
    }
}

#[derive(Default)]
pub struct MemoryDirectory {
    settings: Mutex<HashMap<Uuid, ChatSettings>>,
    members: Mutex<HashMap<(Uuid, Uuid), Member>>,
}

impl MemoryDirectory {
    pub fn add_community(&self, community_id: Uuid, settings: ChatSettings) {
        self.settings.lock().unwrap().insert(community_id, settings);
    }

    pub fn set_settings(&self, community_id: Uuid, settings: ChatSettings) {
        self.add_community(community_id, settings);
    }

    pub fn add_member(&self, community_id: Uuid, member: &Member) {
        self.members
            .lock()
            .unwrap()
            .insert((community_id, member.user_id), member.clone());
    }
}

#[async_trait]
impl CommunityDirectory for MemoryDirectory {
    async fn chat_settings(&self, community_id: Uuid) -> Result<Option<ChatSettings>, StoreError> {
        Ok(self.settings.lock().unwrap().get(&community_id).copied())
    }

    async fn member(&self, community_id: Uuid, user_id: Uuid) -> Result<Option<Member>, StoreError> {
        Ok(self
            .members
            .lock()
            .unwrap()
            .get(&(community_id, user_id))
            .cloned())
    }
}

#[derive(Default)]
pub struct MemoryMessageStore {
    messages: Mutex<Vec<MessageData>>,
    /// message id -> pin sequence; larger is more recent.
    pins: Mutex<HashMap<Uuid, u64>>,
    pin_seq: Mutex<u64>,
    latest: Mutex<HashMap<Uuid, DateTime<Utc>>>,
    fail_inserts: AtomicBool,
}

impl MemoryMessageStore {
    pub fn len(&self) -> usize {
        self.messages.lock().unwrap().len()
    }

    pub fn all(&self) -> Vec<MessageData> {
        self.messages.lock().unwrap().clone()
    }

    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn seed_latest(&self, community_id: Uuid, at: DateTime<Utc>) {
        self.latest.lock().unwrap().insert(community_id, at);
    }

    fn update<F>(&self, community_id: Uuid, id: Uuid, f: F) -> Option<MessageData>
    where
        F: FnOnce(&mut MessageData),
    {
        let mut messages = self.messages.lock().unwrap();
        let msg = messages
            .iter_mut()
            .find(|m| m.id == id && m.community_id == community_id)?;
        f(msg);
        Some(msg.clone())
    }

    fn sorted_pins(&self, community_id: Uuid) -> Vec<MessageData> {
        let pins = self.pins.lock().unwrap();
        let mut pinned: Vec<(u64, MessageData)> = self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.community_id == community_id && m.is_pinned)
            .map(|m| (pins.get(&m.id).copied().unwrap_or(0), m.clone()))
            .collect();
        pinned.sort_by(|a, b| b.0.cmp(&a.0));
        pinned.into_iter().map(|(_, m)| m).collect()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn latest_created_at(
        &self,
        community_id: Uuid,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let stored = self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.community_id == community_id)
            .map(|m| m.created_at)
            .max();
        let seeded = self.latest.lock().unwrap().get(&community_id).copied();
        Ok(stored.max(seeded))
    }

    async fn insert(&self, message: &MessageData) -> Result<(), StoreError> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("disk on fire".to_string()));
        }
        self.messages.lock().unwrap().push(message.clone());
        Ok(())
    }

    async fn get(&self, community_id: Uuid, id: Uuid) -> Result<Option<MessageData>, StoreError> {
        Ok(self
            .messages
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.id == id && m.community_id == community_id)
            .cloned())
    }

    async fn set_pinned(
        &self,
        community_id: Uuid,
        id: Uuid,
        pinned: bool,
    ) -> Result<Option<MessageData>, StoreError> {
        let updated = self.update(community_id, id, |m| m.is_pinned = pinned);
        if updated.is_some() {
            let mut pins = self.pins.lock().unwrap();
            if pinned {
                let mut seq = self.pin_seq.lock().unwrap();
                *seq += 1;
                pins.insert(id, *seq);
            } else {
                pins.remove(&id);
            }
        }
        Ok(updated)
    }

    async fn tombstone(
        &self,
        community_id: Uuid,
        id: Uuid,
    ) -> Result<Option<MessageData>, StoreError> {
        let updated = self.update(community_id, id, |m| {
            m.is_deleted = true;
            m.is_pinned = false;
            m.content.clear();
        });
        if updated.is_some() {
            self.pins.lock().unwrap().remove(&id);
        }
        Ok(updated)
    }

    async fn pinned_ids(&self, community_id: Uuid) -> Result<Vec<Uuid>, StoreError> {
        Ok(self.sorted_pins(community_id).into_iter().map(|m| m.id).collect())
    }

    async fn pinned(&self, community_id: Uuid) -> Result<Vec<MessageData>, StoreError> {
        Ok(self.sorted_pins(community_id))
    }

    async fn history(
        &self,
        community_id: Uuid,
        before: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<MessageData>, StoreError> {
        let mut messages: Vec<MessageData> = self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.community_id == community_id)
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.order_key());

        if let Some(before) = before {
            match messages.iter().position(|m| m.id == before) {
                Some(idx) => messages.truncate(idx),
                None => messages.clear(),
            }
        }

        let skip = messages.len().saturating_sub(limit.max(0) as usize);
        Ok(messages.split_off(skip))
    }
}
