//! Append-only security audit trail.
//!
//! Writes are best-effort: each event is emitted as a `tracing` event and then
//! appended to the store under a timeout. A failed or slow write is logged and
//! never fails the request that produced it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::clock::Clock;
use crate::store::AuthStore;

const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_millis(500);
const MAX_LIST_LIMIT: i64 = 500;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    LoginSucceeded,
    LoginFailed,
    AccountLocked,
    Logout,
    SessionRevoked,
    SessionInvalidated,
    PasswordResetRequested,
    PasswordResetCompleted,
    AccountCreated,
    AccountUpdated,
}

impl AuditAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LoginSucceeded => "login_succeeded",
            Self::LoginFailed => "login_failed",
            Self::AccountLocked => "account_locked",
            Self::Logout => "logout",
            Self::SessionRevoked => "session_revoked",
            Self::SessionInvalidated => "session_invalidated",
            Self::PasswordResetRequested => "password_reset_requested",
            Self::PasswordResetCompleted => "password_reset_completed",
            Self::AccountCreated => "account_created",
            Self::AccountUpdated => "account_updated",
        }
    }

    #[must_use]
    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "login_succeeded" => Some(Self::LoginSucceeded),
            "login_failed" => Some(Self::LoginFailed),
            "account_locked" => Some(Self::AccountLocked),
            "logout" => Some(Self::Logout),
            "session_revoked" => Some(Self::SessionRevoked),
            "session_invalidated" => Some(Self::SessionInvalidated),
            "password_reset_requested" => Some(Self::PasswordResetRequested),
            "password_reset_completed" => Some(Self::PasswordResetCompleted),
            "account_created" => Some(Self::AccountCreated),
            "account_updated" => Some(Self::AccountUpdated),
            _ => None,
        }
    }

    const fn is_warning(self) -> bool {
        matches!(
            self,
            Self::LoginFailed | Self::AccountLocked | Self::SessionInvalidated
        )
    }
}

#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct AuditEvent {
    pub id: Uuid,
    /// Account that triggered the event, when known.
    pub actor: Option<Uuid>,
    pub action: AuditAction,
    /// e.g. `account:<uuid>`, `session:<uuid>`.
    pub resource: String,
    #[schema(value_type = Object)]
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default)]
pub struct AuditFilter {
    pub action: Option<AuditAction>,
    pub actor: Option<Uuid>,
    pub limit: i64,
}

impl AuditFilter {
    #[must_use]
    pub fn new(limit: i64) -> Self {
        Self {
            limit: limit.clamp(1, MAX_LIST_LIMIT),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_action(mut self, action: AuditAction) -> Self {
        self.action = Some(action);
        self
    }

    #[must_use]
    pub fn with_actor(mut self, actor: Uuid) -> Self {
        self.actor = Some(actor);
        self
    }

    #[must_use]
    pub fn matches(&self, event: &AuditEvent) -> bool {
        self.action.is_none_or(|action| action == event.action)
            && self.actor.is_none_or(|actor| event.actor == Some(actor))
    }
}

pub fn account_resource(id: Uuid) -> String {
    format!("account:{id}")
}

pub fn session_resource(id: Uuid) -> String {
    format!("session:{id}")
}

#[derive(Clone)]
pub struct AuditLogger {
    store: Arc<dyn AuthStore>,
    clock: Arc<dyn Clock>,
    write_timeout: Duration,
}

impl AuditLogger {
    #[must_use]
    pub fn new(store: Arc<dyn AuthStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub async fn record(
        &self,
        actor: Option<Uuid>,
        action: AuditAction,
        resource: String,
        metadata: Value,
    ) {
        let event = AuditEvent {
            id: Uuid::now_v7(),
            actor,
            action,
            resource,
            metadata,
            created_at: self.clock.now(),
        };

        if action.is_warning() {
            warn!(
                audit.action = action.as_str(),
                audit.resource = %event.resource,
                audit.actor = ?event.actor,
                "security event"
            );
        } else {
            info!(
                audit.action = action.as_str(),
                audit.resource = %event.resource,
                audit.actor = ?event.actor,
                "security event"
            );
        }

        match tokio::time::timeout(self.write_timeout, self.store.append_audit_event(&event)).await
        {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!("Failed to persist audit event {}: {err:#}", action.as_str()),
            Err(_) => warn!("Timed out persisting audit event {}", action.as_str()),
        }
    }

    /// # Errors
    /// Returns an error if the store query fails.
    pub async fn list(&self, filter: &AuditFilter) -> anyhow::Result<Vec<AuditEvent>> {
        self.store.list_audit_events(filter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::clock::SystemClock;
    use crate::store::MemoryStore;
    use serde_json::json;

    #[test]
    fn action_names_round_trip() {
        for action in [
            AuditAction::LoginSucceeded,
            AuditAction::LoginFailed,
            AuditAction::AccountLocked,
            AuditAction::Logout,
            AuditAction::SessionRevoked,
            AuditAction::SessionInvalidated,
            AuditAction::PasswordResetRequested,
            AuditAction::PasswordResetCompleted,
            AuditAction::AccountCreated,
            AuditAction::AccountUpdated,
        ] {
            assert_eq!(AuditAction::from_db(action.as_str()), Some(action));
        }
    }

    #[test]
    fn filter_clamps_limit() {
        assert_eq!(AuditFilter::new(0).limit, 1);
        assert_eq!(AuditFilter::new(10_000).limit, MAX_LIST_LIMIT);
    }

    #[tokio::test]
    async fn record_appends_and_lists_newest_first() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let logger = AuditLogger::new(store.clone(), Arc::new(SystemClock));
        let actor = Uuid::new_v4();

        logger
            .record(
                Some(actor),
                AuditAction::LoginFailed,
                account_resource(actor),
                json!({"failedAttempts": 1}),
            )
            .await;
        logger
            .record(
                Some(actor),
                AuditAction::LoginSucceeded,
                account_resource(actor),
                json!({}),
            )
            .await;

        let all = logger.list(&AuditFilter::new(10)).await?;
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].action, AuditAction::LoginSucceeded);

        let failed = logger
            .list(&AuditFilter::new(10).with_action(AuditAction::LoginFailed))
            .await?;
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].actor, Some(actor));
        Ok(())
    }
}
