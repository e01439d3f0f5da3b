//! Authoritative live state for one community.
//!
//! A room is a task that owns its members, typing set, slowmode stamps, and
//! pinned list, and processes [`RoomCommand`]s one at a time. Every broadcast
//! leaves from here, so all members observe the room's events in one order.

use huddle_protocol::{MessageData, PresenceMember, ServerMessage};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use uuid::Uuid;

use super::permissions;
use super::registry::VacancyNotifier;
use super::{ChatConfig, CommunityDirectory, Member, MessagePipeline};
use crate::error::ChatError;
use crate::ws::outbound::{DeliveryError, SessionOutbox};

type Reply<T> = oneshot::Sender<Result<T, ChatError>>;

pub(crate) enum RoomCommand {
    Attach {
        member: Member,
        outbox: SessionOutbox,
        reply: oneshot::Sender<()>,
    },
    Detach {
        session_id: Uuid,
    },
    SetTyping {
        session_id: Uuid,
        is_typing: bool,
    },
    Submit {
        author: Member,
        content: String,
        is_announcement: bool,
        reply: Reply<MessageData>,
    },
    Pin {
        requester: Member,
        message_id: Uuid,
        pinned: bool,
        reply: Reply<MessageData>,
    },
    Delete {
        requester: Member,
        message_id: Uuid,
        reply: Reply<MessageData>,
    },
    RetireIfEmpty {
        vacancy: u64,
        reply: oneshot::Sender<bool>,
    },
}

/// Cheap, cloneable address of a running room.
#[derive(Clone)]
pub struct RoomHandle {
    community_id: Uuid,
    generation: u64,
    tx: mpsc::Sender<RoomCommand>,
}

impl RoomHandle {
    pub fn community_id(&self) -> Uuid {
        self.community_id
    }

    /// Distinguishes successive rooms for the same community.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn send(&self, command: RoomCommand) -> Result<(), ChatError> {
        self.tx.send(command).await.map_err(|_| ChatError::RoomClosed)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> RoomCommand,
    ) -> Result<T, ChatError> {
        let (reply, rx) = oneshot::channel();
        self.send(build(reply)).await?;
        rx.await.map_err(|_| ChatError::RoomClosed)?
    }

    /// Adds a session. Resolves once the session has been sent its join snapshot.
    pub async fn attach(&self, member: Member, outbox: SessionOutbox) -> Result<(), ChatError> {
        let (reply, rx) = oneshot::channel();
        self.send(RoomCommand::Attach {
            member,
            outbox,
            reply,
        })
        .await?;
        rx.await.map_err(|_| ChatError::RoomClosed)
    }

    pub async fn detach(&self, session_id: Uuid) {
        // A closed room has already forgotten the session.
        let _ = self.send(RoomCommand::Detach { session_id }).await;
    }

    pub async fn set_typing(&self, session_id: Uuid, is_typing: bool) -> Result<(), ChatError> {
        self.send(RoomCommand::SetTyping {
            session_id,
            is_typing,
        })
        .await
    }

    pub async fn submit(
        &self,
        author: Member,
        content: String,
        is_announcement: bool,
    ) -> Result<MessageData, ChatError> {
        self.request(|reply| RoomCommand::Submit {
            author,
            content,
            is_announcement,
            reply,
        })
        .await
    }

    pub async fn pin(
        &self,
        requester: Member,
        message_id: Uuid,
        pinned: bool,
    ) -> Result<MessageData, ChatError> {
        self.request(|reply| RoomCommand::Pin {
            requester,
            message_id,
            pinned,
            reply,
        })
        .await
    }

    pub async fn delete(&self, requester: Member, message_id: Uuid) -> Result<MessageData, ChatError> {
        self.request(|reply| RoomCommand::Delete {
            requester,
            message_id,
            reply,
        })
        .await
    }

    /// Asks the room to shut down if it has had no members since vacancy
    /// number `vacancy` was reported. `true` means the room has stopped.
    pub(crate) async fn retire_if_empty(&self, vacancy: u64) -> bool {
        let (reply, rx) = oneshot::channel();
        if self
            .send(RoomCommand::RetireIfEmpty { vacancy, reply })
            .await
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }
}

pub(crate) struct RoomDeps {
    pub directory: Arc<dyn CommunityDirectory>,
    pub pipeline: Arc<MessagePipeline>,
    pub config: ChatConfig,
    pub vacancy: Option<VacancyNotifier>,
}

pub(crate) fn spawn(community_id: Uuid, generation: u64, deps: RoomDeps) -> RoomHandle {
    let (tx, rx) = mpsc::channel(deps.config.room_command_capacity.max(1));
    let room = Room {
        community_id,
        directory: deps.directory,
        pipeline: deps.pipeline,
        config: deps.config,
        notifier: deps.vacancy,
        sessions: HashMap::new(),
        next_seq: 0,
        typing: HashMap::new(),
        last_send_at: HashMap::new(),
        slowmode_window: Duration::ZERO,
        pinned: Vec::new(),
        sweep: None,
        vacancy: 0,
        vacancy_reported: false,
    };
    tokio::spawn(room.run(rx));

    RoomHandle {
        community_id,
        generation,
        tx,
    }
}

struct Attached {
    member: Member,
    outbox: SessionOutbox,
    seq: u64,
}

struct Room {
    community_id: Uuid,
    directory: Arc<dyn CommunityDirectory>,
    pipeline: Arc<MessagePipeline>,
    config: ChatConfig,
    notifier: Option<VacancyNotifier>,
    sessions: HashMap<Uuid, Attached>,
    next_seq: u64,
    /// user id -> last typing ping, on the server clock
    typing: HashMap<Uuid, Instant>,
    /// user id -> last successful send, on the server clock
    last_send_at: HashMap<Uuid, Instant>,
    /// slowmode window seen on the most recent send check
    slowmode_window: Duration,
    /// most recent pin first
    pinned: Vec<Uuid>,
    sweep: Option<Interval>,
    vacancy: u64,
    vacancy_reported: bool,
}

impl Room {
    async fn run(mut self, mut commands: mpsc::Receiver<RoomCommand>) {
        tracing::info!(community_id = %self.community_id, "Room opened");

        match self.pipeline.store().pinned_ids(self.community_id).await {
            Ok(ids) => self.pinned = ids,
            Err(e) => tracing::error!(
                community_id = %self.community_id,
                "Failed to load pinned messages: {}",
                e
            ),
        }

        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else { break };
                    if !self.handle(command).await {
                        break;
                    }
                }
                _ = next_sweep(&mut self.sweep) => self.sweep_typing(),
            }

            if self.sessions.is_empty() && !self.vacancy_reported {
                self.report_vacancy();
            }
        }

        tracing::info!(community_id = %self.community_id, "Room closed");
    }

    /// Returns `false` when the room should stop.
    async fn handle(&mut self, command: RoomCommand) -> bool {
        match command {
            RoomCommand::Attach {
                member,
                outbox,
                reply,
            } => {
                self.attach(member, outbox);
                let _ = reply.send(());
            }
            RoomCommand::Detach { session_id } => self.detach(session_id),
            RoomCommand::SetTyping {
                session_id,
                is_typing,
            } => self.set_typing(session_id, is_typing),
            RoomCommand::Submit {
                author,
                content,
                is_announcement,
                reply,
            } => {
                let result = self.submit(&author, &content, is_announcement).await;
                let _ = reply.send(result);
            }
            RoomCommand::Pin {
                requester,
                message_id,
                pinned,
                reply,
            } => {
                let result = self.pin(&requester, message_id, pinned).await;
                let _ = reply.send(result);
            }
            RoomCommand::Delete {
                requester,
                message_id,
                reply,
            } => {
                let result = self.delete(&requester, message_id).await;
                let _ = reply.send(result);
            }
            RoomCommand::RetireIfEmpty { vacancy, reply } => {
                if !self.sessions.is_empty() || vacancy != self.vacancy {
                    let _ = reply.send(false);
                    return true;
                }

                // A send while vacant can leave a stamp that outlives the
                // hold reported earlier; stay up and report again.
                if !self.slowmode_hold().is_zero() {
                    let _ = reply.send(false);
                    self.vacancy_reported = false;
                    return true;
                }

                let _ = reply.send(true);
                self.pipeline.forget(self.community_id);
                return false;
            }
        }
        true
    }

    fn attach(&mut self, member: Member, outbox: SessionOutbox) {
        let session_id = outbox.session_id();
        tracing::debug!(
            community_id = %self.community_id,
            user_id = %member.user_id,
            session_id = %session_id,
            "Session attached"
        );

        self.next_seq += 1;
        self.sessions.insert(
            session_id,
            Attached {
                member,
                outbox,
                seq: self.next_seq,
            },
        );
        self.vacancy_reported = false;

        if self.sweep.is_none() {
            let period = self.config.typing_sweep_interval.max(Duration::from_millis(10));
            let mut sweep = tokio::time::interval_at(Instant::now() + period, period);
            sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
            self.sweep = Some(sweep);
        }

        let joined = ServerMessage::Joined {
            community_id: self.community_id,
            presence: self.presence(),
            typing: self.typing_users(),
            pinned: self.pinned.clone(),
        };
        self.send_to(session_id, joined);
        self.broadcast(self.presence_message());
    }

    fn detach(&mut self, session_id: Uuid) {
        if self.sessions.contains_key(&session_id) {
            self.drop_sessions(&[session_id]);
        }
    }

    fn set_typing(&mut self, session_id: Uuid, is_typing: bool) {
        let Some(user_id) = self.sessions.get(&session_id).map(|s| s.member.user_id) else {
            return;
        };

        let changed = if is_typing {
            self.typing.insert(user_id, Instant::now()).is_none()
        } else {
            self.typing.remove(&user_id).is_some()
        };

        if changed {
            self.broadcast(self.typing_message());
        }
    }

    fn sweep_typing(&mut self) {
        if self.sessions.is_empty() {
            self.sweep = None;
            return;
        }

        let now = Instant::now();
        let expiry = self.config.typing_expiry;
        let before = self.typing.len();
        self.typing
            .retain(|_, last| now.saturating_duration_since(*last) < expiry);

        if self.typing.len() != before {
            self.broadcast(self.typing_message());
        }
    }

    async fn submit(
        &mut self,
        author: &Member,
        content: &str,
        is_announcement: bool,
    ) -> Result<MessageData, ChatError> {
        let settings = match self.directory.chat_settings(self.community_id).await {
            Ok(Some(settings)) => settings,
            Ok(None) => return Err(ChatError::UnknownCommunity),
            Err(e) => {
                tracing::error!(community_id = %self.community_id, "Failed to load chat settings: {}", e);
                return Err(ChatError::Unavailable(e.to_string()));
            }
        };
        self.slowmode_window = Duration::from_secs(u64::from(settings.slowmode_seconds));

        let decision = permissions::check_send(
            settings,
            author.role,
            is_announcement,
            self.last_send_at.get(&author.user_id).copied(),
            Instant::now(),
            self.config.slowmode_exempt_staff,
        );
        if let Err(denial) = decision {
            tracing::debug!(
                community_id = %self.community_id,
                user_id = %author.user_id,
                "Send denied: {}",
                denial
            );
            return Err(denial);
        }

        let message = self
            .pipeline
            .persist(self.community_id, author, content, is_announcement)
            .await?;

        self.last_send_at.insert(author.user_id, Instant::now());
        self.broadcast(ServerMessage::MessageCreated {
            message: message.clone(),
        });
        if self.typing.remove(&author.user_id).is_some() {
            self.broadcast(self.typing_message());
        }

        Ok(message)
    }

    async fn pin(
        &mut self,
        requester: &Member,
        message_id: Uuid,
        pinned: bool,
    ) -> Result<MessageData, ChatError> {
        if !permissions::can_pin(requester.role) {
            return Err(ChatError::InsufficientRole);
        }

        let current = self.load_message(message_id).await?;
        if current.is_deleted {
            return Err(ChatError::MessageNotFound);
        }
        if current.is_pinned == pinned {
            return Ok(current);
        }

        let updated = self
            .pipeline
            .store()
            .set_pinned(self.community_id, message_id, pinned)
            .await
            .map_err(|e| self.store_failure("pin", e))?
            .ok_or(ChatError::MessageNotFound)?;

        self.pinned.retain(|id| *id != message_id);
        if pinned {
            self.pinned.insert(0, message_id);
        }

        self.broadcast(ServerMessage::MessageUpdated {
            message: updated.clone(),
        });
        Ok(updated)
    }

    async fn delete(
        &mut self,
        requester: &Member,
        message_id: Uuid,
    ) -> Result<MessageData, ChatError> {
        let current = self.load_message(message_id).await?;
        if !permissions::can_delete(requester.role, current.author_id == requester.user_id) {
            return Err(ChatError::InsufficientRole);
        }
        if current.is_deleted {
            return Ok(current);
        }

        let updated = self
            .pipeline
            .store()
            .tombstone(self.community_id, message_id)
            .await
            .map_err(|e| self.store_failure("delete", e))?
            .ok_or(ChatError::MessageNotFound)?;

        self.pinned.retain(|id| *id != message_id);

        self.broadcast(ServerMessage::MessageUpdated {
            message: updated.clone(),
        });
        Ok(updated)
    }

    async fn load_message(&self, message_id: Uuid) -> Result<MessageData, ChatError> {
        self.pipeline
            .store()
            .get(self.community_id, message_id)
            .await
            .map_err(|e| {
                tracing::error!(community_id = %self.community_id, "Failed to load message: {}", e);
                ChatError::Unavailable(e.to_string())
            })?
            .ok_or(ChatError::MessageNotFound)
    }

    fn store_failure(&self, action: &str, e: super::StoreError) -> ChatError {
        tracing::error!(community_id = %self.community_id, "Failed to {} message: {}", action, e);
        ChatError::PersistenceFailure(e.to_string())
    }

    fn report_vacancy(&mut self) {
        self.vacancy += 1;
        self.vacancy_reported = true;
        if let Some(notifier) = &self.notifier {
            notifier.notify(self.vacancy, self.slowmode_hold());
        }
    }

    /// Time until the last live slowmode stamp expires.
    fn slowmode_hold(&self) -> Duration {
        self.last_send_at
            .values()
            .map(|at| self.slowmode_window.saturating_sub(at.elapsed()))
            .max()
            .unwrap_or(Duration::ZERO)
    }

    /// Distinct users, in the order they first attached.
    fn presence(&self) -> Vec<PresenceMember> {
        let mut attached: Vec<&Attached> = self.sessions.values().collect();
        attached.sort_by_key(|a| a.seq);

        let mut seen = std::collections::HashSet::new();
        attached
            .into_iter()
            .filter(|a| seen.insert(a.member.user_id))
            .map(|a| a.member.presence())
            .collect()
    }

    fn typing_users(&self) -> Vec<Uuid> {
        let mut users: Vec<Uuid> = self.typing.keys().copied().collect();
        users.sort();
        users
    }

    fn presence_message(&self) -> ServerMessage {
        ServerMessage::Presence {
            community_id: self.community_id,
            members: self.presence(),
        }
    }

    fn typing_message(&self) -> ServerMessage {
        ServerMessage::Typing {
            community_id: self.community_id,
            user_ids: self.typing_users(),
        }
    }

    fn send_to(&mut self, session_id: Uuid, message: ServerMessage) {
        let failed = match self.sessions.get(&session_id) {
            Some(s) => s.outbox.send(message).is_err(),
            None => false,
        };
        if failed {
            self.drop_sessions(&[session_id]);
        }
    }

    fn broadcast(&mut self, message: ServerMessage) {
        let message = Arc::new(message);
        let mut failed = Vec::new();

        for (session_id, attached) in &self.sessions {
            match attached.outbox.deliver(message.clone()) {
                Ok(()) => {}
                Err(DeliveryError::Overflow) => {
                    tracing::warn!(
                        community_id = %self.community_id,
                        session_id = %session_id,
                        "Outbound buffer overflow, disconnecting session"
                    );
                    failed.push(*session_id);
                }
                Err(DeliveryError::Closed) => failed.push(*session_id),
            }
        }

        if !failed.is_empty() {
            self.drop_sessions(&failed);
        }
    }

    /// Removes sessions, then tells everyone left about the new presence
    /// (and typing set, if a departing user was typing).
    fn drop_sessions(&mut self, session_ids: &[Uuid]) {
        let mut typing_changed = false;

        for session_id in session_ids {
            let Some(gone) = self.sessions.remove(session_id) else {
                continue;
            };
            tracing::debug!(
                community_id = %self.community_id,
                user_id = %gone.member.user_id,
                session_id = %session_id,
                "Session detached"
            );

            let user_id = gone.member.user_id;
            if self.sessions.values().any(|s| s.member.user_id == user_id) {
                continue;
            }

            typing_changed |= self.typing.remove(&user_id).is_some();

            // A stamp still inside the window survives so reconnecting cannot skip slowmode.
            let window = self.slowmode_window;
            if self
                .last_send_at
                .get(&user_id)
                .is_some_and(|at| at.elapsed() >= window)
            {
                self.last_send_at.remove(&user_id);
            }
        }

        if self.sessions.is_empty() {
            return;
        }

        self.broadcast(self.presence_message());
        if typing_changed {
            self.broadcast(self.typing_message());
        }
    }
}

async fn next_sweep(sweep: &mut Option<Interval>) {
    match sweep {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
