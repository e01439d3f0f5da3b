use crate::error::{AppError, Result};
use crate::models::{CreateUser, User};
use argon2::{
    password_hash::{rand_core::OsRng, SaltString},
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
};
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

#[derive(Clone)]
pub struct UserService {
    db: SqlitePool,
}

impl UserService {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn create(&self, input: CreateUser) -> Result<User> {
        let username = input.username.trim();
        if username.is_empty() || input.password.is_empty() {
            return Err(AppError::BadRequest(
                "Username and password are required".to_string(),
            ));
        }

        let existing: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE username = ?)")
                .bind(username)
                .fetch_one(&self.db)
                .await?;

        if existing {
            return Err(AppError::Conflict("Username already exists".to_string()));
        }

        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(input.password.as_bytes(), &salt)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Password hashing failed: {}", e)))?
            .to_string();

        let display_name = match input.display_name.trim() {
            "" => username,
            name => name,
        };

        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, username, display_name, password_hash, created_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id, username, display_name, password_hash, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(username)
        .bind(display_name)
        .bind(password_hash)
        .bind(Utc::now())
        .fetch_one(&self.db)
        .await?;

        tracing::info!(user_id = %user.id, "Registered user {}", user.username);
        Ok(user)
    }

    pub async fn get_by_username(&self, username: &str) -> Result<User> {
        sqlx::query_as::<_, User>(
            "SELECT id, username, display_name, password_hash, created_at FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))
    }

    pub async fn verify_credentials(&self, username: &str, password: &str) -> Result<User> {
        let user = self
            .get_by_username(username)
            .await
            .map_err(|e| match e {
                AppError::NotFound(_) => AppError::Unauthorized,
                other => other,
            })?;

        let parsed_hash = PasswordHash::new(&user.password_hash)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Invalid password hash: {}", e)))?;

        Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .map_err(|_| AppError::Unauthorized)?;

        Ok(user)
    }
}
