//! Finds or creates the room for a community.
//!
//! At most one live room exists per community. An empty room lingers for
//! `room_linger` before it is retired, so a quick reconnect lands back in the
//! same room with its typing and slowmode state intact.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::room::{self, RoomDeps};
use super::{ChatConfig, CommunityDirectory, Member, MessagePipeline, RoomHandle};
use crate::error::ChatError;
use crate::ws::outbound::SessionOutbox;
use huddle_protocol::MessageData;

/// Attempts before giving up on a room that keeps closing underneath us.
const ROOM_RETRIES: usize = 3;

#[derive(Clone)]
pub struct RoomRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    rooms: RwLock<HashMap<Uuid, RoomHandle>>,
    directory: Arc<dyn CommunityDirectory>,
    pipeline: Arc<MessagePipeline>,
    config: ChatConfig,
    next_generation: AtomicU64,
}

/// Lets a room tell the registry it has become empty.
pub(crate) struct VacancyNotifier {
    registry: Weak<RegistryInner>,
    community_id: Uuid,
    generation: u64,
}

impl VacancyNotifier {
    /// `hold` is how long the room still has state worth keeping (live
    /// slowmode stamps); the room lingers for at least that long.
    pub(crate) fn notify(&self, vacancy: u64, hold: Duration) {
        if let Some(inner) = self.registry.upgrade() {
            RoomRegistry { inner }.release_if_empty(self.community_id, self.generation, vacancy, hold);
        }
    }
}

impl RoomRegistry {
    pub fn new(
        directory: Arc<dyn CommunityDirectory>,
        pipeline: Arc<MessagePipeline>,
        config: ChatConfig,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                rooms: RwLock::new(HashMap::new()),
                directory,
                pipeline,
                config,
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &ChatConfig {
        &self.inner.config
    }

    pub fn directory(&self) -> &Arc<dyn CommunityDirectory> {
        &self.inner.directory
    }

    pub fn pipeline(&self) -> &Arc<MessagePipeline> {
        &self.inner.pipeline
    }

    /// The live room for a community, if there is one.
    pub async fn room(&self, community_id: Uuid) -> Option<RoomHandle> {
        self.inner
            .rooms
            .read()
            .await
            .get(&community_id)
            .filter(|room| !room.is_closed())
            .cloned()
    }

    pub async fn room_count(&self) -> usize {
        self.inner.rooms.read().await.len()
    }

    /// Returns the community's room, starting one if none is live. Concurrent
    /// callers for the same community all get the same room.
    pub async fn get_or_create_room(&self, community_id: Uuid) -> RoomHandle {
        if let Some(room) = self.room(community_id).await {
            return room;
        }

        let mut rooms = self.inner.rooms.write().await;
        if let Some(room) = rooms.get(&community_id).filter(|room| !room.is_closed()) {
            return room.clone();
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let room = room::spawn(
            community_id,
            generation,
            RoomDeps {
                directory: self.inner.directory.clone(),
                pipeline: self.inner.pipeline.clone(),
                config: self.inner.config.clone(),
                vacancy: Some(VacancyNotifier {
                    registry: Arc::downgrade(&self.inner),
                    community_id,
                    generation,
                }),
            },
        );
        rooms.insert(community_id, room.clone());
        tracing::debug!(community_id = %community_id, generation, "Room created");
        room
    }

    /// Checks that the community exists and the user belongs to it. Called
    /// before any room is touched, so a refused user never creates one.
    pub async fn resolve_member(&self, community_id: Uuid, user_id: Uuid) -> Result<Member, ChatError> {
        let directory = &self.inner.directory;

        let settings = directory
            .chat_settings(community_id)
            .await
            .map_err(|e| unavailable(community_id, e))?;
        if settings.is_none() {
            return Err(ChatError::UnknownCommunity);
        }

        directory
            .member(community_id, user_id)
            .await
            .map_err(|e| unavailable(community_id, e))?
            .ok_or(ChatError::NotAMember)
    }

    /// Attaches a session to the community's room.
    pub async fn join(
        &self,
        community_id: Uuid,
        member: &Member,
        outbox: &SessionOutbox,
    ) -> Result<RoomHandle, ChatError> {
        for _ in 0..ROOM_RETRIES {
            let room = self.get_or_create_room(community_id).await;
            match room.attach(member.clone(), outbox.clone()).await {
                Ok(()) => return Ok(room),
                Err(ChatError::RoomClosed) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(ChatError::RoomClosed)
    }

    /// Submits a message through the community's room without a live session.
    pub async fn submit(
        &self,
        community_id: Uuid,
        author: &Member,
        content: &str,
        is_announcement: bool,
    ) -> Result<MessageData, ChatError> {
        for _ in 0..ROOM_RETRIES {
            let room = self.get_or_create_room(community_id).await;
            match room
                .submit(author.clone(), content.to_string(), is_announcement)
                .await
            {
                Err(ChatError::RoomClosed) => continue,
                result => return result,
            }
        }
        Err(ChatError::RoomClosed)
    }

    /// After the linger period (or `hold`, if longer), retires the room if it
    /// has stayed empty since vacancy number `vacancy`.
    pub(crate) fn release_if_empty(
        &self,
        community_id: Uuid,
        generation: u64,
        vacancy: u64,
        hold: Duration,
    ) {
        let registry = self.clone();
        let linger = self.inner.config.room_linger.max(hold);

        tokio::spawn(async move {
            tokio::time::sleep(linger).await;

            let room = {
                let rooms = registry.inner.rooms.read().await;
                match rooms.get(&community_id) {
                    Some(room) if room.generation() == generation => room.clone(),
                    _ => return,
                }
            };

            if !room.retire_if_empty(vacancy).await {
                return;
            }

            let mut rooms = registry.inner.rooms.write().await;
            if rooms
                .get(&community_id)
                .is_some_and(|room| room.generation() == generation)
            {
                rooms.remove(&community_id);
                tracing::debug!(community_id = %community_id, generation, "Room retired");
            }
        });
    }
}

fn unavailable(community_id: Uuid, e: super::StoreError) -> ChatError {
    tracing::error!(community_id = %community_id, "Failed to resolve membership: {}", e);
    ChatError::Unavailable(e.to_string())
}
