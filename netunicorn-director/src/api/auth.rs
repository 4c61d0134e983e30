//! Authentication seam
//!
//! The mediator consumes only a verdict: whether the credentials check out,
//! plus the role bit and the access-tag list. The `Authenticator` trait is
//! that seam; the bundled implementation reads the authentication table.

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use base64::{engine::general_purpose::STANDARD, Engine};
use sqlx::PgPool;

use crate::api::error::ApiError;
use crate::repository::auth as auth_repository;
use crate::state::AppState;

/// Verdict of a successful authentication.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub username: String,
    pub sudo: bool,
    pub access_tags: Vec<String>,
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Returns the verdict for the credentials, or `None` when they are
    /// rejected.
    async fn verify(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<AuthContext>, sqlx::Error>;
}

/// Authenticator backed by the authentication table.
pub struct DbAuthenticator {
    pool: PgPool,
}

impl DbAuthenticator {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Authenticator for DbAuthenticator {
    async fn verify(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<AuthContext>, sqlx::Error> {
        let Some(user) = auth_repository::find_user(&self.pool, username).await? else {
            return Ok(None);
        };

        if user.token != password {
            return Ok(None);
        }

        Ok(Some(AuthContext {
            username: user.username,
            sudo: user.sudo,
            access_tags: user.access_tags,
        }))
    }
}

/// Parses `Authorization: Basic ...` into `(username, password)`.
pub fn parse_basic_auth(header: &str) -> Option<(String, String)> {
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

impl FromRequestParts<AppState> for AuthContext {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(ApiError::Unauthorized)?;

        let (username, password) = parse_basic_auth(header).ok_or(ApiError::Unauthorized)?;

        match state.auth.verify(&username, &password).await {
            Ok(Some(context)) => Ok(context),
            Ok(None) => Err(ApiError::Unauthorized),
            Err(e) => Err(ApiError::DatabaseError(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_basic_header() {
        // "alice:secret"
        let header = format!("Basic {}", STANDARD.encode("alice:secret"));
        let (username, password) = parse_basic_auth(&header).unwrap();
        assert_eq!(username, "alice");
        assert_eq!(password, "secret");
    }

    #[test]
    fn rejects_non_basic_and_malformed_headers() {
        assert!(parse_basic_auth("Bearer token").is_none());
        assert!(parse_basic_auth("Basic not-base64!").is_none());
        let no_colon = format!("Basic {}", STANDARD.encode("alicesecret"));
        assert!(parse_basic_auth(&no_colon).is_none());
    }

    #[test]
    fn password_may_contain_colons() {
        let header = format!("Basic {}", STANDARD.encode("alice:se:cr:et"));
        let (_, password) = parse_basic_auth(&header).unwrap();
        assert_eq!(password, "se:cr:et");
    }
}
