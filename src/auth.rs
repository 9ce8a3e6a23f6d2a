use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use chrono::{DateTime, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    error::AppError,
    models::{Role, User},
    repository::RepositoryState,
};

/// Claims
///
/// The payload signed into every access token. Tokens are validated statelessly on
/// every request; nothing about them is persisted.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (sub): the user's id. Used to reload the user and their current role.
    pub sub: Uuid,
    /// Username at issuance time, for log correlation only.
    pub username: String,
    /// Expiration Time (exp): the token must not be accepted after this instant.
    pub exp: usize,
    /// Issued At (iat).
    pub iat: usize,
}

/// AuthUser Extractor Result
///
/// The resolved identity of an authenticated request. `role` is already the effective
/// role (superusers resolve to `Admin`), so the authorization rules never look at the
/// superuser flag themselves.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthUser {
    pub id: Uuid,
    pub username: String,
    pub role: Role,
}

impl From<&User> for AuthUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            role: user.effective_role(),
        }
    }
}

fn unix_seconds(at: DateTime<Utc>) -> usize {
    usize::try_from(at.timestamp()).unwrap_or_default()
}

/// issue_token
///
/// Signs an access token for a verified user with the server-held key. The token
/// expires `access_token_ttl_secs` after `now`.
pub fn issue_token(user: &User, config: &AppConfig, now: DateTime<Utc>) -> Result<String, AppError> {
    let expires_at = now + chrono::Duration::seconds(config.access_token_ttl_secs);
    let claims = Claims {
        sub: user.id,
        username: user.username.clone(),
        iat: unix_seconds(now),
        exp: unix_seconds(expires_at),
    };
    let key = EncodingKey::from_secret(config.jwt_secret.as_bytes());
    encode(&Header::default(), &claims, &key)
        .map_err(|e| AppError::Internal(format!("token signing failed: {e}")))
}

/// decode_token
///
/// Verifies signature and expiry. Any failure (bad signature, malformed, expired) is
/// reported as `Unauthenticated`.
pub fn decode_token(token: &str, secret: &str) -> Result<Claims, AppError> {
    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    let mut validation = Validation::default();
    validation.validate_exp = true;

    match decode::<Claims>(token, &decoding_key, &validation) {
        Ok(data) => Ok(data.claims),
        Err(e) => {
            match e.kind() {
                ErrorKind::ExpiredSignature => tracing::debug!("rejected expired access token"),
                other => tracing::debug!("rejected access token: {:?}", other),
            }
            Err(AppError::Unauthenticated)
        }
    }
}

/// AuthUser Extractor Implementation
///
/// Makes AuthUser usable as a handler argument:
/// 1. Dependency Resolution: Repository and AppConfig from the application state.
/// 2. Token Extraction: `Authorization: Bearer <token>`.
/// 3. Token Validation: signature and expiry.
/// 4. DB Lookup: the user must still exist; their current role is loaded.
///
/// Rejection: `AppError::Unauthenticated` (401) on any failure.
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let repo = RepositoryState::from_ref(state);
        let config = AppConfig::from_ref(state);

        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or(AppError::Unauthenticated)?;

        let claims = decode_token(token, &config.jwt_secret)?;

        // A token for a deleted user is valid cryptographically but must not grant access.
        let user = repo
            .get_user(claims.sub)
            .await?
            .ok_or(AppError::Unauthenticated)?;

        Ok(AuthUser::from(&user))
    }
}
