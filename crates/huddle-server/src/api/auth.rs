use crate::auth::{AuthSession, LoginRequest};
use crate::error::Result;
use crate::models::CreateUser;
use crate::state::AppState;
use axum::{extract::State, http::StatusCode, Json};

/// Creates the account and signs it straight in.
pub async fn register(
    State(state): State<AppState>,
    Json(input): Json<CreateUser>,
) -> Result<(StatusCode, Json<AuthSession>)> {
    let user = state.user_service.create(input).await?;
    let session = AuthSession::issue(&user, &state.config.jwt_secret)?;

    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn login(
    State(state): State<AppState>,
    Json(input): Json<LoginRequest>,
) -> Result<Json<AuthSession>> {
    let user = state
        .user_service
        .verify_credentials(&input.username, &input.password)
        .await?;

    let session = AuthSession::issue(&user, &state.config.jwt_secret)?;
    tracing::debug!(user_id = %user.id, display_name = %user.display_name, "Issued token");

    Ok(Json(session))
}
