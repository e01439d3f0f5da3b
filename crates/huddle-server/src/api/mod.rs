mod auth;
mod communities;
mod messages;

use crate::state::AppState;
use crate::ws;
use axum::{
    routing::{get, patch, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(|| async { "OK" }))
        // Auth routes
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        // Community routes
        .route(
            "/api/communities",
            post(communities::create_community).get(communities::list_communities),
        )
        .route("/api/communities/{id}/chat", patch(communities::update_chat_settings))
        .route(
            "/api/communities/{id}/members/{user_id}/role",
            put(communities::set_member_role),
        )
        .route("/api/communities/{id}/invites", post(communities::create_invite))
        .route("/api/invites/{code}", post(communities::join_community))
        // Message routes
        .route(
            "/api/communities/{id}/messages",
            get(messages::list_messages).post(messages::create_message),
        )
        .route("/api/communities/{id}/pins", get(messages::list_pins))
        // WebSocket endpoint
        .route("/ws/communities/{id}", get(ws::handler::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use crate::state::Config;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;

    fn config() -> Config {
        Config {
            bind_address: "127.0.0.1:0".into(),
            database_url: "sqlite::memory:".into(),
            jwt_secret: "router-test-secret".into(),
            max_message_length: 2000,
            room_linger_secs: 30,
            typing_expiry_ms: 2000,
            typing_sweep_ms: 500,
            typing_throttle_ms: 1000,
            outbound_queue_capacity: 256,
            room_command_capacity: 1024,
            slowmode_exempt_staff: false,
            history_page_limit: 100,
            log_format: "pretty".into(),
        }
    }

    #[tokio::test]
    async fn health_check_answers() {
        let (app, _db) = crate::create_app(config()).await.unwrap();

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"OK");
    }

    #[tokio::test]
    async fn community_routes_require_a_token() {
        let (app, _db) = crate::create_app(config()).await.unwrap();

        let response = app
            .clone()
            .oneshot(Request::get("/api/communities").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(
                Request::get("/api/communities")
                    .header(header::AUTHORIZATION, "Bearer not-a-token")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
