//! Detects role drift between a token claim and the account row.
//!
//! Runs on every authenticated request. Any divergence, upgrade or downgrade,
//! revokes the session; the client must log in again to get a token carrying
//! the current role.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

use super::account::{Account, Session};
use super::audit::{AuditAction, AuditLogger, session_resource};
use super::error::AuthError;
use super::sessions::SessionStore;
use super::tokens::AccessClaims;
use crate::store::AuthStore;

#[derive(Clone)]
pub struct RoleConsistencyGuard {
    store: Arc<dyn AuthStore>,
    sessions: SessionStore,
    audit: AuditLogger,
}

impl RoleConsistencyGuard {
    #[must_use]
    pub fn new(store: Arc<dyn AuthStore>, sessions: SessionStore, audit: AuditLogger) -> Self {
        Self {
            store,
            sessions,
            audit,
        }
    }

    /// Return the authoritative account when it still matches the token.
    ///
    /// # Errors
    /// - `session_invalidated` when the role changed since issuance.
    /// - `unauthenticated` when the account is gone, inactive or deleted.
    pub async fn check(
        &self,
        claims: &AccessClaims,
        session: &Session,
        now: DateTime<Utc>,
    ) -> Result<Account, AuthError> {
        let Some(account) = self.store.find_account(claims.sub).await? else {
            self.sessions.revoke(session.id, now).await?;
            return Err(AuthError::Unauthenticated);
        };

        if !account.is_usable() {
            debug!("Revoking session {} of unusable account", session.id);
            self.sessions.revoke(session.id, now).await?;
            return Err(AuthError::Unauthenticated);
        }

        if account.role != claims.role {
            // Concurrent requests on the same session race here; only the one
            // that flips the revoked flag records the event.
            if self.sessions.revoke(session.id, now).await? {
                self.audit
                    .record(
                        Some(account.id),
                        AuditAction::SessionInvalidated,
                        session_resource(session.id),
                        json!({
                            "previousRole": claims.role.as_str(),
                            "newRole": account.role.as_str(),
                            "sessionId": session.id,
                        }),
                    )
                    .await;
            }
            return Err(AuthError::SessionInvalidated);
        }

        Ok(account)
    }
}
