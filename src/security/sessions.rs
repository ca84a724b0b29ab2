//! Server-side session lifecycle.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

use super::account::Session;
use super::crypto::{generate_token, hash_token};
use super::error::AuthError;
use super::tokens::AccessClaims;
use crate::store::AuthStore;

const DEFAULT_SESSION_TTL_SECONDS: i64 = 12 * 60 * 60;

#[derive(Clone)]
pub struct SessionStore {
    store: Arc<dyn AuthStore>,
    ttl: Duration,
}

impl SessionStore {
    #[must_use]
    pub fn new(store: Arc<dyn AuthStore>) -> Self {
        Self {
            store,
            ttl: Duration::seconds(DEFAULT_SESSION_TTL_SECONDS),
        }
    }

    #[must_use]
    pub fn with_ttl_seconds(mut self, seconds: i64) -> Self {
        self.ttl = Duration::seconds(seconds.max(1));
        self
    }

    /// Create a session row with its own absolute expiry.
    ///
    /// The initial CSRF hash belongs to a secret that is never handed out, so
    /// mutating requests fail until the client fetches a token from
    /// `GET /auth/csrf`.
    ///
    /// # Errors
    /// Returns an internal error if randomness or the insert fails.
    pub async fn create(&self, account_id: Uuid, now: DateTime<Utc>) -> Result<Session, AuthError> {
        let session = Session {
            id: Uuid::now_v7(),
            account_id,
            csrf_hash: hash_token(&generate_token()?),
            created_at: now,
            expires_at: now + self.ttl,
            last_activity_at: now,
            revoked_at: None,
        };
        self.store.insert_session(&session).await?;
        Ok(session)
    }

    /// Resolve the session a token points at, stamping activity.
    ///
    /// # Errors
    /// Returns `unauthenticated` when the session is revoked, expired,
    /// unknown, or owned by a different account than the token subject.
    pub async fn touch(
        &self,
        claims: &AccessClaims,
        now: DateTime<Utc>,
    ) -> Result<Session, AuthError> {
        let session = self
            .store
            .touch_session(claims.sid, now)
            .await?
            .ok_or(AuthError::Unauthenticated)?;
        if session.account_id != claims.sub {
            return Err(AuthError::Unauthenticated);
        }
        Ok(session)
    }

    /// # Errors
    /// Returns an internal error if the store fails.
    pub async fn set_csrf_hash(
        &self,
        session_id: Uuid,
        csrf_hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<bool, AuthError> {
        Ok(self.store.set_csrf_hash(session_id, csrf_hash, now).await?)
    }

    /// # Errors
    /// Returns an internal error if the store fails.
    pub async fn revoke(&self, session_id: Uuid, now: DateTime<Utc>) -> Result<bool, AuthError> {
        Ok(self.store.revoke_session(session_id, now).await?)
    }

    /// # Errors
    /// Returns an internal error if the store fails.
    pub async fn revoke_all(&self, account_id: Uuid, now: DateTime<Utc>) -> Result<u64, AuthError> {
        Ok(self.store.revoke_account_sessions(account_id, now).await?)
    }
}
