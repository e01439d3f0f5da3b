//! Client tests against a real server
//!
//! Starts the Huddle server on an ephemeral port over in-memory SQLite and
//! drives it only through `ApiClient` and `LiveConnection`.
//!
//! Run with: cargo test -p huddle-client --test live_session

use huddle_client::{ApiClient, LiveConnection, Timeline};
use huddle_protocol::{ChatMode, ChatSettings, DenialReason, Role, ServerMessage};
use std::time::Duration;
use tokio::time::timeout;
use uuid::Uuid;

struct TestServer {
    base_url: String,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    async fn start() -> anyhow::Result<Self> {
        let config = huddle_server::state::Config {
            bind_address: "127.0.0.1:0".to_string(),
            database_url: "sqlite::memory:".to_string(),
            jwt_secret: "client-test-secret".to_string(),
            max_message_length: 2000,
            room_linger_secs: 30,
            typing_expiry_ms: 2000,
            typing_sweep_ms: 500,
            typing_throttle_ms: 1000,
            outbound_queue_capacity: 256,
            room_command_capacity: 1024,
            slowmode_exempt_staff: false,
            history_page_limit: 100,
            log_format: "pretty".to_string(),
        };

        let (router, _db_pool) = huddle_server::create_app(config).await?;
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

        tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .ok();
        });

        Ok(Self {
            base_url: format!("http://{}", addr),
            shutdown_tx: Some(shutdown_tx),
        })
    }

    /// A registered, signed-in API client.
    async fn user(&self, username: &str) -> ApiClient {
        let mut api = ApiClient::new(&self.base_url);
        api.register(username, &username.to_uppercase(), "testpassword123")
            .await
            .unwrap();
        api
    }

    async fn connect(&self, api: &ApiClient, community_id: Uuid) -> anyhow::Result<LiveConnection> {
        let token = api.token().unwrap_or_default();
        LiveConnection::connect(&api.live_url(community_id), token).await
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Reads events into `timeline` until one matches.
async fn next_matching<F>(conn: &mut LiveConnection, timeline: &mut Timeline, pred: F) -> ServerMessage
where
    F: Fn(&ServerMessage) -> bool,
{
    timeout(Duration::from_secs(5), async {
        loop {
            let event = conn.next_event().await.expect("connection closed");
            timeline.apply(&event);
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

#[tokio::test]
async fn live_session_sends_receives_and_reconciles() {
    let server = TestServer::start().await.unwrap();
    let alice_api = server.user("alice").await;
    let bob_api = server.user("bob").await;

    let community = alice_api.create_community("Shop").await.unwrap();
    let invite = alice_api.create_invite(community.id).await.unwrap();
    assert_eq!(invite.community_id, community.id);
    assert_eq!(bob_api.join(&invite.code).await.unwrap().role, Role::Member);

    let mut alice = server.connect(&alice_api, community.id).await.unwrap();
    assert_eq!(alice.role(), Role::Owner);
    let mut alice_view = Timeline::new();
    next_matching(&mut alice, &mut alice_view, |m| matches!(m, ServerMessage::Joined { .. })).await;

    let mut bob = server.connect(&bob_api, community.id).await.unwrap();
    assert_eq!(bob.role(), Role::Member);
    let mut bob_view = Timeline::new();

    next_matching(&mut alice, &mut alice_view, |m| {
        matches!(m, ServerMessage::Presence { members, .. } if members.len() == 2)
    })
    .await;
    let names: Vec<&str> = alice_view.presence().iter().map(|p| p.display_name.as_str()).collect();
    assert_eq!(names, vec!["ALICE", "BOB"]);

    // Live send reaches both sides.
    bob.set_typing(true).await.unwrap();
    next_matching(&mut alice, &mut alice_view, |m| {
        matches!(m, ServerMessage::Typing { user_ids, .. } if user_ids.contains(&bob.user_id()))
    })
    .await;

    bob.send_message("hello from bob", false).await.unwrap();
    for (conn, view) in [(&mut alice, &mut alice_view), (&mut bob, &mut bob_view)] {
        let created = next_matching(conn, view, |m| matches!(m, ServerMessage::MessageCreated { .. })).await;
        if let ServerMessage::MessageCreated { message } = created {
            assert_eq!(message.content, "hello from bob");
            assert_eq!(message.author_name, "BOB");
        }
    }
    next_matching(&mut alice, &mut alice_view, |m| {
        matches!(m, ServerMessage::Typing { user_ids, .. } if user_ids.is_empty())
    })
    .await;

    // A REST send is broadcast like a live one.
    let announced = alice_api.submit(community.id, "store opens at nine", true).await.unwrap();
    next_matching(&mut bob, &mut bob_view, |m| {
        matches!(m, ServerMessage::MessageCreated { message } if message.id == announced.id)
    })
    .await;

    // Only the owner pins; the refusal goes to bob alone.
    bob.pin(announced.id, true).await.unwrap();
    let denied = next_matching(&mut bob, &mut bob_view, |m| matches!(m, ServerMessage::Denied { .. })).await;
    assert_eq!(
        denied,
        ServerMessage::Denied {
            reason: DenialReason::InsufficientRole
        }
    );

    alice.pin(announced.id, true).await.unwrap();
    next_matching(&mut bob, &mut bob_view, |m| {
        matches!(m, ServerMessage::MessageUpdated { message } if message.is_pinned)
    })
    .await;
    assert_eq!(bob_view.pinned(), &[announced.id]);

    let pins = bob_api.pins(community.id).await.unwrap();
    assert_eq!(pins.len(), 1);
    assert_eq!(pins[0].id, announced.id);

    // History fetched after the fact agrees with what arrived live.
    let history = bob_api.history(community.id, None, None).await.unwrap();
    assert_eq!(history.len(), 2);
    let live: Vec<_> = bob_view.messages().cloned().collect();
    bob_view.merge_history(&history);
    let merged: Vec<_> = bob_view.messages().cloned().collect();
    assert_eq!(merged, live);
    assert_eq!(merged, huddle_client::reconcile(&history, &live));
    assert_eq!(merged[0].content, "hello from bob");
    assert!(merged[1].is_pinned);

    let older = bob_api.history(community.id, Some(merged[1].id), Some(10)).await.unwrap();
    assert_eq!(older, vec![merged[0].clone()]);
}

#[tokio::test]
async fn refused_connections_surface_as_errors() {
    let server = TestServer::start().await.unwrap();
    let alice_api = server.user("alice").await;
    let stranger_api = server.user("sam").await;
    let community = alice_api.create_community("Shop").await.unwrap();

    let err = server.connect(&stranger_api, community.id).await.err().expect("stranger connected");
    assert!(err.to_string().contains("refused"), "{err}");

    let err = server.connect(&alice_api, Uuid::new_v4()).await.err().expect("unknown community connected");
    assert!(err.to_string().contains("refused"), "{err}");

    let err = LiveConnection::connect(&alice_api.live_url(community.id), "not-a-token")
        .await
        .err()
        .expect("bad token connected");
    assert!(err.to_string().contains("Authentication failed"), "{err}");

    assert!(stranger_api.history(community.id, None, None).await.is_err());
}

#[tokio::test]
async fn settings_changes_reach_live_senders() {
    let server = TestServer::start().await.unwrap();
    let alice_api = server.user("alice").await;
    let bob_api = server.user("bob").await;
    let community = alice_api.create_community("Shop").await.unwrap();
    let invite = alice_api.create_invite(community.id).await.unwrap();
    bob_api.join(&invite.code).await.unwrap();

    let mut bob = server.connect(&bob_api, community.id).await.unwrap();
    let mut bob_view = Timeline::new();
    next_matching(&mut bob, &mut bob_view, |m| matches!(m, ServerMessage::Joined { .. })).await;

    alice_api
        .update_chat_settings(
            community.id,
            ChatSettings {
                chat_mode: ChatMode::AllMembers,
                slowmode_seconds: 60,
            },
        )
        .await
        .unwrap();

    bob.send_message("first", false).await.unwrap();
    next_matching(&mut bob, &mut bob_view, |m| matches!(m, ServerMessage::MessageCreated { .. })).await;

    bob.send_message("second", false).await.unwrap();
    let denied = next_matching(&mut bob, &mut bob_view, |m| matches!(m, ServerMessage::Denied { .. })).await;
    assert!(matches!(
        denied,
        ServerMessage::Denied {
            reason: DenialReason::SlowmodeActive { remaining_seconds }
        } if remaining_seconds > 0 && remaining_seconds <= 60
    ));
    assert_eq!(bob_view.len(), 1);
}
