//! Password hashing, session tokens and the authenticated-user extractor.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::header::AUTHORIZATION;
use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::task;

use parley_shared::constants::HEADER_TOKEN;
use parley_shared::UserId;

use crate::api::AppState;
use crate::error::ServerError;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iat: i64,
    exp: i64,
}

/// Why a presented token was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenRejection {
    Expired,
    Invalid,
}

/// Issues and verifies HS256 session tokens.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &[u8], ttl_days: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl: Duration::days(ttl_days),
        }
    }

    /// Use the configured secret, or a random one that only lives as long
    /// as the process.
    pub fn from_secret_or_random(secret: Option<&str>, ttl_days: i64) -> Self {
        match secret {
            Some(secret) => Self::new(secret.as_bytes(), ttl_days),
            None => {
                tracing::warn!("JWT_SECRET not set, sessions will not survive a restart");
                let key: [u8; 32] = rand::thread_rng().gen();
                Self::new(&key, ttl_days)
            }
        }
    }

    pub fn issue(&self, user: &UserId) -> Result<String, ServerError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user.as_str().to_string(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| ServerError::Internal(format!("Failed to sign token: {e}")))
    }

    pub fn verify(&self, token: &str) -> Result<UserId, TokenRejection> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::new(Algorithm::HS256))
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenRejection::Expired,
                _ => TokenRejection::Invalid,
            })?;
        UserId::parse(&data.claims.sub).ok_or(TokenRejection::Invalid)
    }
}

/// Hash a password into a PHC string. Runs on a blocking thread.
pub async fn hash_password(password: &str) -> Result<String, ServerError> {
    let password = password.to_string();

    task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut rand::rngs::OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| ServerError::Internal(format!("Failed to hash password: {e}")))
    })
    .await
    .map_err(|e| ServerError::Internal(format!("Password hashing task failed: {e}")))?
}

/// Check a password against a stored PHC string. Runs on a blocking thread.
pub async fn verify_password(password: &str, hash: &str) -> Result<bool, ServerError> {
    let password = password.to_string();
    let hash = hash.to_string();

    task::spawn_blocking(move || {
        let parsed = PasswordHash::new(&hash)
            .map_err(|e| ServerError::Internal(format!("Invalid password hash format: {e}")))?;
        match Argon2::default().verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(ServerError::Internal(format!(
                "Password verification failed: {e}"
            ))),
        }
    })
    .await
    .map_err(|e| ServerError::Internal(format!("Password verification task failed: {e}")))?
}

/// The caller of an authenticated route.
///
/// Reads the session token from the `token` header, falling back to
/// `Authorization: Bearer`.
#[derive(Debug, Clone)]
pub struct AuthUser(pub UserId);

fn token_from_parts(parts: &Parts) -> Option<&str> {
    if let Some(token) = parts
        .headers
        .get(HEADER_TOKEN)
        .and_then(|v| v.to_str().ok())
        .filter(|t| !t.is_empty())
    {
        return Some(token);
    }
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = token_from_parts(parts)
            .ok_or_else(|| ServerError::Unauthorized("Not authorized, no token".into()))?;

        match state.tokens.verify(token) {
            Ok(user) => Ok(AuthUser(user)),
            Err(TokenRejection::Expired) => {
                Err(ServerError::Unauthorized("Session expired".into()))
            }
            Err(TokenRejection::Invalid) => {
                Err(ServerError::Unauthorized("Not authorized, invalid token".into()))
            }
        }
    }
}
