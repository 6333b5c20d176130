use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use sqlx::{Pool, Postgres, Row};

use crate::error::{AppError, AppResult};
use crate::models::user::{AuthenticatedUser, ProfileSummary};
use crate::models::UserId;

/// Resolves a bearer credential to a user identity. Fails closed: any
/// malformed, expired, or unknown credential is `AppError::Unauthorized`.
#[async_trait]
pub trait AuthGate: Send + Sync {
    async fn authenticate(&self, token: &str) -> AppResult<AuthenticatedUser>;
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[allow(dead_code)]
    exp: i64,
}

/// HS256 JWT validation followed by a profile lookup in the user table.
pub struct JwtAuthGate {
    decoding_key: DecodingKey,
    validation: Validation,
    db: Pool<Postgres>,
}

impl JwtAuthGate {
    pub fn new(secret: &str, db: Pool<Postgres>) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
            db,
        }
    }
}

#[async_trait]
impl AuthGate for JwtAuthGate {
    async fn authenticate(&self, token: &str) -> AppResult<AuthenticatedUser> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|_| AppError::Unauthorized)?;
        let user_id: UserId = data.claims.sub.parse().map_err(|_| AppError::Unauthorized)?;

        let row = sqlx::query("SELECT id, username, full_name, profile_picture FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or(AppError::Unauthorized)?;

        let profile = ProfileSummary {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            full_name: row.try_get("full_name")?,
            profile_picture: row.try_get("profile_picture")?,
        };
        Ok(AuthenticatedUser {
            id: profile.id,
            profile,
        })
    }
}
