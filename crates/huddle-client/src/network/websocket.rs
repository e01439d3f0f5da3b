use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use huddle_protocol::{ClientMessage, Role, ServerMessage};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use uuid::Uuid;

const PING_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_TYPING_THROTTLE: Duration = Duration::from_secs(1);

/// Client-side spacing of "typing" pings. Stop signals always pass.
#[derive(Debug, Clone)]
pub struct TypingThrottle {
    interval: Duration,
    last_typing_sent_at: Option<Instant>,
}

impl TypingThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_typing_sent_at: None,
        }
    }

    /// Whether a typing signal should go to the server now.
    pub fn should_send(&mut self, is_typing: bool, now: Instant) -> bool {
        if !is_typing {
            self.last_typing_sent_at = None;
            return true;
        }

        match self.last_typing_sent_at {
            Some(at) if now.saturating_duration_since(at) < self.interval => false,
            _ => {
                self.last_typing_sent_at = Some(now);
                true
            }
        }
    }

    /// Forget the last ping, e.g. after a send cleared the typing state server-side.
    pub fn reset(&mut self) {
        self.last_typing_sent_at = None;
    }
}

/// An authenticated live connection to one community.
pub struct LiveConnection {
    session_id: Uuid,
    user_id: Uuid,
    role: Role,
    sender: mpsc::Sender<ClientMessage>,
    events: mpsc::Receiver<ServerMessage>,
    typing: TypingThrottle,
    tasks: Vec<JoinHandle<()>>,
}

impl LiveConnection {
    /// Opens the socket, authenticates, and waits for the server to accept
    /// the session. A refusal (bad token, not a member, unknown community)
    /// is returned as an error.
    pub async fn connect(url: &str, token: &str) -> Result<Self> {
        let (ws_stream, _) = connect_async(url).await?;
        let (mut write, mut read) = ws_stream.split();

        let auth_msg = ClientMessage::Authenticate {
            token: token.to_string(),
        };
        write
            .send(Message::Text(serde_json::to_string(&auth_msg)?.into()))
            .await?;

        let (session_id, user_id, role) = loop {
            let frame = match read.next().await {
                Some(frame) => frame?,
                None => anyhow::bail!("Connection closed during authentication"),
            };
            let text = match frame {
                Message::Text(text) => text,
                Message::Close(_) => anyhow::bail!("Connection closed during authentication"),
                _ => continue,
            };

            match serde_json::from_str::<ServerMessage>(&text)? {
                ServerMessage::Authenticated {
                    session_id,
                    user_id,
                    role,
                } => break (session_id, user_id, role),
                ServerMessage::Error { message } => {
                    anyhow::bail!("Authentication failed: {}", message)
                }
                ServerMessage::Denied { reason } => anyhow::bail!("Connection refused: {:?}", reason),
                other => anyhow::bail!("Unexpected response during authentication: {:?}", other),
            }
        };
        tracing::info!(session_id = %session_id, "Live connection authenticated");

        let (tx, mut rx) = mpsc::channel::<ClientMessage>(100);
        let (events_tx, events) = mpsc::channel::<ServerMessage>(256);

        // Outgoing frames
        let writer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let json = match serde_json::to_string(&msg) {
                    Ok(j) => j,
                    Err(e) => {
                        tracing::error!("Failed to serialize message: {}", e);
                        continue;
                    }
                };

                if write.send(Message::Text(json.into())).await.is_err() {
                    tracing::error!("Failed to send WebSocket message");
                    break;
                }
            }
            let _ = write.close().await;
        });

        // Incoming frames
        let reader = tokio::spawn(async move {
            while let Some(result) = read.next().await {
                match result {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(msg) => {
                            if events_tx.send(msg).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => tracing::warn!("Unrecognised server frame: {}", e),
                    },
                    Ok(Message::Close(frame)) => {
                        tracing::info!("WebSocket closed by server: {:?}", frame);
                        break;
                    }
                    Err(e) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
        });

        // Keep-alive
        let tx_ping = tx.clone();
        let pinger = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + PING_INTERVAL, PING_INTERVAL);
            loop {
                interval.tick().await;
                if tx_ping.send(ClientMessage::Ping).await.is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            session_id,
            user_id,
            role,
            sender: tx,
            events,
            typing: TypingThrottle::new(DEFAULT_TYPING_THROTTLE),
            tasks: vec![writer, reader, pinger],
        })
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    /// Role as resolved when this connection opened.
    pub fn role(&self) -> Role {
        self.role
    }

    pub fn set_typing_throttle(&mut self, interval: Duration) {
        self.typing = TypingThrottle::new(interval);
    }

    /// Next server event, or `None` once the connection has closed.
    pub async fn next_event(&mut self) -> Option<ServerMessage> {
        self.events.recv().await
    }

    pub async fn send_message(&mut self, content: &str, is_announcement: bool) -> Result<()> {
        self.typing.reset();
        self.send(ClientMessage::SendMessage {
            content: content.to_string(),
            is_announcement,
        })
        .await
    }

    /// Throttled: repeated "typing" calls inside the throttle window are dropped.
    pub async fn set_typing(&mut self, is_typing: bool) -> Result<()> {
        if !self.typing.should_send(is_typing, Instant::now()) {
            return Ok(());
        }
        self.send(ClientMessage::SetTyping { is_typing }).await
    }

    pub async fn pin(&self, message_id: Uuid, pinned: bool) -> Result<()> {
        self.send(ClientMessage::Pin { message_id, pinned }).await
    }

    pub async fn delete(&self, message_id: Uuid) -> Result<()> {
        self.send(ClientMessage::Delete { message_id }).await
    }

    async fn send(&self, msg: ClientMessage) -> Result<()> {
        self.sender
            .send(msg)
            .await
            .map_err(|_| anyhow::anyhow!("Connection closed"))
    }
}

impl Drop for LiveConnection {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typing_pings_are_spaced_and_stops_always_pass() {
        let mut throttle = TypingThrottle::new(Duration::from_secs(1));
        let t0 = Instant::now();

        assert!(throttle.should_send(true, t0));
        assert!(!throttle.should_send(true, t0 + Duration::from_millis(400)));
        assert!(!throttle.should_send(true, t0 + Duration::from_millis(999)));
        assert!(throttle.should_send(true, t0 + Duration::from_secs(1)));

        assert!(throttle.should_send(false, t0 + Duration::from_millis(1100)));
        assert!(throttle.should_send(false, t0 + Duration::from_millis(1101)));
        // A stop clears the window, so the next start goes straight out.
        assert!(throttle.should_send(true, t0 + Duration::from_millis(1200)));
    }

    #[test]
    fn reset_lets_the_next_ping_through() {
        let mut throttle = TypingThrottle::new(Duration::from_secs(5));
        let t0 = Instant::now();
        assert!(throttle.should_send(true, t0));
        throttle.reset();
        assert!(throttle.should_send(true, t0 + Duration::from_millis(10)));
    }
}
