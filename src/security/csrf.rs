//! Double-submit CSRF protection for cookie-authenticated mutations.
//!
//! The token is session scoped: `issue` replaces the stored hash and the same
//! token then stays valid until the session is revoked or expires. It is not
//! rotated per request.

use axum::http::{HeaderMap, Method};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use utoipa::ToSchema;

use super::account::Session;
use super::crypto::{generate_token, hash_token, token_matches};
use super::error::AuthError;
use super::sessions::SessionStore;

pub const CSRF_HEADER: &str = "x-csrf-token";

#[derive(Clone, Serialize, ToSchema)]
pub struct CsrfToken {
    pub token: String,
    #[serde(rename = "expiresAt")]
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for CsrfToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CsrfToken")
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// GET, HEAD and OPTIONS are exempt.
#[must_use]
pub fn is_state_changing(method: &Method) -> bool {
    !matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

/// # Errors
/// Returns `csrf_token_missing` when the header is absent or empty.
pub fn require_header(headers: &HeaderMap) -> Result<&str, AuthError> {
    headers
        .get(CSRF_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(AuthError::CsrfTokenMissing)
}

#[derive(Clone)]
pub struct CsrfGuard {
    sessions: SessionStore,
}

impl CsrfGuard {
    #[must_use]
    pub fn new(sessions: SessionStore) -> Self {
        Self { sessions }
    }

    /// # Errors
    /// Returns `unauthenticated` if the session stopped being active.
    pub async fn issue(
        &self,
        session: &Session,
        now: DateTime<Utc>,
    ) -> Result<CsrfToken, AuthError> {
        let token = generate_token()?;
        if !self
            .sessions
            .set_csrf_hash(session.id, &hash_token(&token), now)
            .await?
        {
            return Err(AuthError::Unauthenticated);
        }
        Ok(CsrfToken {
            token,
            expires_at: session.expires_at,
        })
    }

    /// # Errors
    /// Returns `csrf_token_invalid` when the presented token does not match.
    pub fn verify(&self, session: &Session, presented: &str) -> Result<(), AuthError> {
        if token_matches(presented, &session.csrf_hash) {
            Ok(())
        } else {
            Err(AuthError::CsrfTokenInvalid)
        }
    }
}
