//! Per-session outbound queue.
//!
//! Rooms push into a [`SessionOutbox`] without ever waiting. The queue is bounded;
//! when it is full the push fails and the session is told to shut down, so one
//! slow client cannot hold up the rest of its room.

use huddle_protocol::ServerMessage;
use std::sync::Arc;

use crate::error::ChatError;
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// The queue was full. The session has been signalled to close.
    Overflow,
    /// The session is gone.
    Closed,
}

#[derive(Debug, Clone)]
pub struct SessionOutbox {
    session_id: Uuid,
    tx: mpsc::Sender<Arc<ServerMessage>>,
    overflow: Arc<Notify>,
}

pub struct SessionInbox {
    rx: mpsc::Receiver<Arc<ServerMessage>>,
    overflow: Arc<Notify>,
}

pub enum Outbound {
    Message(Arc<ServerMessage>),
    /// The session must close; the error is the close reason.
    Terminated(ChatError),
}

pub fn session_channel(session_id: Uuid, capacity: usize) -> (SessionOutbox, SessionInbox) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let overflow = Arc::new(Notify::new());
    (
        SessionOutbox {
            session_id,
            tx,
            overflow: overflow.clone(),
        },
        SessionInbox { rx, overflow },
    )
}

impl SessionOutbox {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn deliver(&self, message: Arc<ServerMessage>) -> Result<(), DeliveryError> {
        match self.tx.try_send(message) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.overflow.notify_one();
                Err(DeliveryError::Overflow)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(DeliveryError::Closed),
        }
    }

    pub fn send(&self, message: ServerMessage) -> Result<(), DeliveryError> {
        self.deliver(Arc::new(message))
    }
}

impl SessionInbox {
    /// Next frame to write, or `None` once every outbox is dropped.
    /// An overflow signal takes priority over queued frames.
    pub async fn next(&mut self) -> Option<Outbound> {
        tokio::select! {
            biased;
            _ = self.overflow.notified() => {
                Some(Outbound::Terminated(ChatError::ConnectionOverflow))
            }
            msg = self.rx.recv() => msg.map(Outbound::Message),
        }
    }

    #[cfg(test)]
    pub fn try_next(&mut self) -> Option<Arc<ServerMessage>> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn full_queue_signals_overflow() {
        let (outbox, mut inbox) = session_channel(Uuid::new_v4(), 2);

        assert_eq!(outbox.send(ServerMessage::Pong), Ok(()));
        assert_eq!(outbox.send(ServerMessage::Pong), Ok(()));
        assert_eq!(outbox.send(ServerMessage::Pong), Err(DeliveryError::Overflow));

        assert!(matches!(
            inbox.next().await,
            Some(Outbound::Terminated(ChatError::ConnectionOverflow))
        ));
    }

    #[tokio::test]
    async fn dropped_inbox_reports_closed() {
        let (outbox, inbox) = session_channel(Uuid::new_v4(), 2);
        drop(inbox);
        assert_eq!(outbox.send(ServerMessage::Pong), Err(DeliveryError::Closed));
    }
}
