use crate::auth::verify_token;
use crate::chat::{Member, RoomHandle};
use crate::state::AppState;
use crate::ws::outbound::{session_channel, Outbound, SessionOutbox};
use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use huddle_protocol::{ClientMessage, ServerMessage};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// How long a new connection has to send its `authenticate` frame.
const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(community_id): Path<Uuid>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, community_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, community_id: Uuid) {
    let (mut sender, mut receiver) = socket.split();

    let Some(user_id) = authenticate(&mut sender, &mut receiver, &state).await else {
        return;
    };

    let member = match state.rooms.resolve_member(community_id, user_id).await {
        Ok(member) => member,
        Err(e) => {
            tracing::info!(community_id = %community_id, user_id = %user_id, "Connection refused: {}", e);
            let _ = send_frame(&mut sender, &ServerMessage::Denied { reason: e.denial() }).await;
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };

    let session_id = Uuid::new_v4();
    let authenticated = ServerMessage::Authenticated {
        session_id,
        user_id,
        role: member.role,
    };
    if send_frame(&mut sender, &authenticated).await.is_err() {
        return;
    }

    let (outbox, mut inbox) =
        session_channel(session_id, state.rooms.config().outbound_queue_capacity);

    let room = match state.rooms.join(community_id, &member, &outbox).await {
        Ok(room) => room,
        Err(e) => {
            tracing::warn!(community_id = %community_id, user_id = %user_id, "Failed to join room: {}", e);
            let _ = send_frame(&mut sender, &ServerMessage::Denied { reason: e.denial() }).await;
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };

    tracing::info!(
        community_id = %community_id,
        user_id = %user_id,
        session_id = %session_id,
        "User connected"
    );

    // Spawn task to forward queued frames to the WebSocket
    let mut send_task = tokio::spawn(async move {
        while let Some(next) = inbox.next().await {
            match next {
                Outbound::Message(msg) => {
                    if send_frame(&mut sender, &msg).await.is_err() {
                        break;
                    }
                }
                Outbound::Terminated(reason) => {
                    tracing::warn!(session_id = %session_id, "Closing session: {}", reason);
                    let _ = sender
                        .send(Message::Close(Some(CloseFrame {
                            code: close_code::POLICY,
                            reason: reason.to_string().into(),
                        })))
                        .await;
                    break;
                }
            }
        }
    });

    let mut session = Session {
        room: room.clone(),
        member,
        session_id,
        outbox,
        typing_throttle: state.rooms.config().typing_throttle,
        last_typing_sent_at: None,
    };

    loop {
        tokio::select! {
            _ = &mut send_task => break,
            frame = receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(msg) => session.handle(msg).await,
                    Err(e) => {
                        tracing::warn!(session_id = %session_id, "Invalid message: {}", e);
                        session.reply(ServerMessage::Error {
                            message: "Invalid message format".to_string(),
                        });
                    }
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    tracing::debug!(session_id = %session_id, "WebSocket error: {}", e);
                    break;
                }
                // Protocol-level pings are answered by axum.
                Some(Ok(_)) => {}
            }
        }
    }

    room.detach(session_id).await;
    send_task.abort();

    tracing::info!(
        community_id = %community_id,
        user_id = %user_id,
        session_id = %session_id,
        "User disconnected"
    );
}

/// Waits for the first frame and checks its token. Anything else closes the
/// connection with an `error` frame.
async fn authenticate(
    sender: &mut SplitSink<WebSocket, Message>,
    receiver: &mut SplitStream<WebSocket>,
    state: &AppState,
) -> Option<Uuid> {
    let first = match tokio::time::timeout(AUTH_TIMEOUT, receiver.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => text,
        Ok(_) => {
            tracing::debug!("WebSocket closed before authentication");
            return None;
        }
        Err(_) => {
            let _ = reject(sender, "Authentication timed out").await;
            return None;
        }
    };

    let token = match serde_json::from_str::<ClientMessage>(&first) {
        Ok(ClientMessage::Authenticate { token }) => token,
        Ok(_) => {
            let _ = reject(sender, "First message must be authentication").await;
            return None;
        }
        Err(e) => {
            tracing::warn!("Invalid auth message: {}", e);
            let _ = reject(sender, "Invalid message format").await;
            return None;
        }
    };

    match verify_token(&token, &state.config.jwt_secret) {
        Ok(claims) => Some(claims.sub),
        Err(_) => {
            let _ = reject(sender, "Invalid token").await;
            None
        }
    }
}

async fn reject(sender: &mut SplitSink<WebSocket, Message>, message: &str) -> Result<(), axum::Error> {
    send_frame(
        sender,
        &ServerMessage::Error {
            message: message.to_string(),
        },
    )
    .await?;
    sender.send(Message::Close(None)).await
}

async fn send_frame(
    sender: &mut SplitSink<WebSocket, Message>,
    msg: &ServerMessage,
) -> Result<(), axum::Error> {
    match serde_json::to_string(msg) {
        Ok(text) => sender.send(Message::Text(text.into())).await,
        Err(e) => {
            tracing::error!("Failed to serialize frame: {}", e);
            Ok(())
        }
    }
}

/// One connection's view of its room.
struct Session {
    room: RoomHandle,
    member: Member,
    session_id: Uuid,
    outbox: SessionOutbox,
    typing_throttle: Duration,
    last_typing_sent_at: Option<Instant>,
}

impl Session {
    async fn handle(&mut self, msg: ClientMessage) {
        let result = match msg {
            ClientMessage::Authenticate { .. } => {
                self.reply(ServerMessage::Error {
                    message: "Already authenticated".to_string(),
                });
                Ok(())
            }
            ClientMessage::SendMessage {
                content,
                is_announcement,
            } => {
                let sent = self
                    .room
                    .submit(self.member.clone(), content, is_announcement)
                    .await;
                if sent.is_ok() {
                    // The room clears the author's typing state on send.
                    self.last_typing_sent_at = None;
                }
                sent.map(|_| ())
            }
            ClientMessage::SetTyping { is_typing } => self.set_typing(is_typing).await,
            ClientMessage::Pin { message_id, pinned } => self
                .room
                .pin(self.member.clone(), message_id, pinned)
                .await
                .map(|_| ()),
            ClientMessage::Delete { message_id } => self
                .room
                .delete(self.member.clone(), message_id)
                .await
                .map(|_| ()),
            ClientMessage::Ping => {
                self.reply(ServerMessage::Pong);
                Ok(())
            }
        };

        if let Err(e) = result {
            self.reply(ServerMessage::Denied { reason: e.denial() });
        }
    }

    /// Start signals are throttled per session; stop signals always pass.
    async fn set_typing(&mut self, is_typing: bool) -> Result<(), crate::error::ChatError> {
        if !is_typing {
            self.last_typing_sent_at = None;
            return self.room.set_typing(self.session_id, false).await;
        }

        let now = Instant::now();
        if self
            .last_typing_sent_at
            .is_some_and(|at| now.saturating_duration_since(at) < self.typing_throttle)
        {
            return Ok(());
        }
        self.last_typing_sent_at = Some(now);
        self.room.set_typing(self.session_id, true).await
    }

    fn reply(&self, msg: ServerMessage) {
        // An overflow here closes the session through the writer.
        let _ = self.outbox.send(msg);
    }
}
