use crate::error::{AppError, Result};
use crate::models::User;
use crate::state::AppState;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
    RequestPartsExt,
};
use axum_extra::{headers, TypedHeader};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tokens are good for a week.
const TOKEN_LIFETIME_HOURS: i64 = 24 * 7;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid, // User ID
    pub username: String,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    pub fn new(user_id: Uuid, username: String, expires_in_hours: i64) -> Self {
        let now = Utc::now();
        Self {
            sub: user_id,
            username,
            exp: (now + Duration::hours(expires_in_hours)).timestamp(),
            iat: now.timestamp(),
        }
    }
}

pub fn verify_token(token: &str, secret: &str) -> Result<Claims> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;

    Ok(token_data.claims)
}

/// Extractor for requests carrying a valid bearer token.
pub struct AuthUser {
    pub user_id: Uuid,
    pub username: String,
}

impl<S> FromRequestParts<S> for AuthUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        let TypedHeader(auth_header) = parts
            .extract::<TypedHeader<headers::Authorization<headers::authorization::Bearer>>>()
            .await
            .map_err(|_| AppError::Unauthorized)?;

        let state = AppState::from_ref(state);
        let claims = verify_token(auth_header.token(), &state.config.jwt_secret)
            .map_err(|_| AppError::Unauthorized)?;

        Ok(AuthUser {
            user_id: claims.sub,
            username: claims.username,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// What a client holds after registering or logging in. `display_name` is
/// the name other members see in presence and on messages.
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthSession {
    pub token: String,
    pub user_id: Uuid,
    pub username: String,
    pub display_name: String,
    pub expires_at: DateTime<Utc>,
}

impl AuthSession {
    pub fn issue(user: &User, secret: &str) -> Result<Self> {
        let claims = Claims::new(user.id, user.username.clone(), TOKEN_LIFETIME_HOURS);
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )?;

        Ok(Self {
            token,
            user_id: user.id,
            username: user.username.clone(),
            display_name: user.display_name.clone(),
            expires_at: DateTime::from_timestamp(claims.exp, 0).unwrap_or_else(Utc::now),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        User {
            id: Uuid::new_v4(),
            username: "ann".into(),
            display_name: "Ann Example".into(),
            password_hash: String::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn tokens_verify_only_with_their_secret() {
        let user = user();
        let session = AuthSession::issue(&user, "secret-a").unwrap();

        let claims = verify_token(&session.token, "secret-a").unwrap();
        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.username, "ann");

        assert!(verify_token(&session.token, "secret-b").is_err());
        assert!(verify_token("not-a-token", "secret-a").is_err());
    }

    #[test]
    fn session_carries_the_display_name_and_a_week_of_validity() {
        let session = AuthSession::issue(&user(), "secret").unwrap();
        assert_eq!(session.display_name, "Ann Example");

        let lifetime = session.expires_at - Utc::now();
        assert!(lifetime > Duration::hours(TOKEN_LIFETIME_HOURS - 1));
        assert!(lifetime <= Duration::hours(TOKEN_LIFETIME_HOURS));
    }
}
