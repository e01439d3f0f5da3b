//! Merging fetched history with the live event stream.
//!
//! Messages are keyed by `(created_at, id)`, which never changes for a given
//! id, so a `BTreeMap` gives both dedup and canonical order. When the same id
//! arrives twice the newer copy wins, except that a tombstone is never undone.

use chrono::{DateTime, Utc};
use huddle_protocol::{MessageData, PresenceMember, ServerMessage};
use std::collections::BTreeMap;
use uuid::Uuid;

type OrderKey = (DateTime<Utc>, Uuid);

/// Merges a REST history page with messages received live after connecting.
///
/// The result is ordered by `(created_at, id)` ascending with one entry per id.
/// Running it again on the same inputs gives the same output.
pub fn reconcile(history: &[MessageData], live: &[MessageData]) -> Vec<MessageData> {
    let mut merged = BTreeMap::new();
    for message in history.iter().chain(live) {
        upsert(&mut merged, message.clone());
    }
    merged.into_values().collect()
}

fn upsert(messages: &mut BTreeMap<OrderKey, MessageData>, incoming: MessageData) -> bool {
    match messages.get_mut(&incoming.order_key()) {
        Some(existing) => {
            if existing.is_deleted && !incoming.is_deleted {
                return false;
            }
            if *existing == incoming {
                return false;
            }
            *existing = incoming;
            true
        }
        None => {
            messages.insert(incoming.order_key(), incoming);
            true
        }
    }
}

/// Client-side view of one community, kept current from `ServerMessage`s.
#[derive(Debug, Default, Clone)]
pub struct Timeline {
    messages: BTreeMap<OrderKey, MessageData>,
    pinned: Vec<Uuid>,
    presence: Vec<PresenceMember>,
    typing: Vec<Uuid>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a fetched history page. Copies already received live win.
    pub fn merge_history(&mut self, history: &[MessageData]) {
        for message in history {
            let key = message.order_key();
            match self.messages.get(&key) {
                Some(existing) if !message.is_deleted || existing.is_deleted => {}
                _ => {
                    self.messages.insert(key, message.clone());
                }
            }
        }
    }

    /// Applies one live event. Returns whether the visible state changed.
    pub fn apply(&mut self, event: &ServerMessage) -> bool {
        match event {
            ServerMessage::Joined {
                presence,
                typing,
                pinned,
                ..
            } => {
                let changed =
                    self.presence != *presence || self.typing != *typing || self.pinned != *pinned;
                self.presence = presence.clone();
                self.typing = typing.clone();
                self.pinned = pinned.clone();
                changed
            }
            ServerMessage::Presence { members, .. } => {
                let changed = self.presence != *members;
                self.presence = members.clone();
                changed
            }
            ServerMessage::Typing { user_ids, .. } => {
                let changed = self.typing != *user_ids;
                self.typing = user_ids.clone();
                changed
            }
            ServerMessage::MessageCreated { message } => upsert(&mut self.messages, message.clone()),
            ServerMessage::MessageUpdated { message } => {
                let changed = upsert(&mut self.messages, message.clone());
                if changed {
                    self.track_pin(message);
                }
                changed
            }
            _ => false,
        }
    }

    fn track_pin(&mut self, message: &MessageData) {
        let position = self.pinned.iter().position(|id| *id == message.id);
        match (message.is_pinned && !message.is_deleted, position) {
            (true, None) => self.pinned.insert(0, message.id),
            (false, Some(i)) => {
                self.pinned.remove(i);
            }
            _ => {}
        }
    }

    /// Messages in canonical order.
    pub fn messages(&self) -> impl Iterator<Item = &MessageData> {
        self.messages.values()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Oldest message held, used as the cursor for the next history page.
    pub fn oldest(&self) -> Option<&MessageData> {
        self.messages.values().next()
    }

    pub fn get(&self, id: Uuid) -> Option<&MessageData> {
        self.messages.values().find(|m| m.id == id)
    }

    /// Pinned message ids, most recently pinned first.
    pub fn pinned(&self) -> &[Uuid] {
        &self.pinned
    }

    pub fn presence(&self) -> &[PresenceMember] {
        &self.presence
    }

    pub fn typing(&self) -> &[Uuid] {
        &self.typing
    }
}
