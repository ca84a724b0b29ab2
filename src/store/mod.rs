//! Persistence seams for accounts, sessions, reset tokens, rate-limit
//! counters and audit events.
//!
//! Every method that guards a security decision is a single atomic unit in
//! the backing store: counter increments are one `UPDATE … RETURNING`, reset
//! issuance and consumption are transactions. Callers never read-modify-write
//! across two calls.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::security::{
    account::{Account, AccountUpdate, NewAccount, ResetToken, Session},
    audit::{AuditEvent, AuditFilter},
    lockout::{FailureOutcome, LockoutPolicy},
};

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Lookup by normalized email, including soft-deleted rows.
    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>>;

    async fn find_account(&self, id: Uuid) -> Result<Option<Account>>;

    /// Returns `None` when the email is already taken.
    async fn insert_account(&self, account: NewAccount, now: DateTime<Utc>)
    -> Result<Option<Account>>;

    async fn update_account(
        &self,
        id: Uuid,
        update: AccountUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<Account>>;

    /// Increment the failure counter and lock once the threshold is reached,
    /// in one statement. `None` when no account has `id`.
    async fn record_login_failure(
        &self,
        id: Uuid,
        policy: &LockoutPolicy,
        now: DateTime<Utc>,
    ) -> Result<Option<FailureOutcome>>;

    /// Clear the failure counter and lock unless a lock became active
    /// concurrently. Returns `false` in that case.
    async fn record_login_success(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool>;
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn insert_session(&self, session: &Session) -> Result<()>;

    async fn find_session(&self, id: Uuid) -> Result<Option<Session>>;

    /// Stamp `last_activity_at` on an active session and return it.
    /// Revoked, expired and unknown sessions yield `None`.
    async fn touch_session(&self, id: Uuid, now: DateTime<Utc>) -> Result<Option<Session>>;

    /// Replace the CSRF hash of an active session.
    async fn set_csrf_hash(&self, id: Uuid, csrf_hash: &[u8], now: DateTime<Utc>) -> Result<bool>;

    /// Returns `true` only for the call that flipped the session to revoked.
    async fn revoke_session(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool>;

    async fn revoke_account_sessions(&self, account_id: Uuid, now: DateTime<Utc>) -> Result<u64>;
}

/// Result of an atomic reset-token consumption.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsumeOutcome {
    Consumed {
        account_id: Uuid,
        sessions_revoked: u64,
    },
    Invalid,
    Expired,
    Used,
    AccountInactive,
}

#[async_trait]
pub trait ResetTokenRepository: Send + Sync {
    /// Expire every outstanding token of the account and insert `token`, in
    /// one transaction. Returns how many prior tokens were expired.
    async fn issue_reset_token(&self, token: &ResetToken, now: DateTime<Utc>) -> Result<u64>;

    async fn find_reset_token(&self, token_hash: &[u8]) -> Result<Option<ResetToken>>;

    /// Recheck the token under a row lock, then rotate the credential, clear
    /// lockout state, mark the token used and revoke all sessions, in one
    /// transaction.
    async fn consume_reset_token(
        &self,
        token_hash: &[u8],
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<ConsumeOutcome>;
}

#[async_trait]
pub trait RateLimitRepository: Send + Sync {
    /// Increment the counter for `key` in the window `[window_start, window_end)`,
    /// resetting it when the stored window is older.
    ///
    /// Counters of other keys whose window ended before `window_start` are
    /// deleted in the same call.
    async fn increment_rate_limit(
        &self,
        key: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<i64>;
}

#[async_trait]
pub trait AuditRepository: Send + Sync {
    async fn append_audit_event(&self, event: &AuditEvent) -> Result<()>;

    /// Newest first.
    async fn list_audit_events(&self, filter: &AuditFilter) -> Result<Vec<AuditEvent>>;
}

#[async_trait]
pub trait AuthStore:
    AccountRepository + SessionRepository + ResetTokenRepository + RateLimitRepository + AuditRepository
{
    /// Health probe for `/health`.
    async fn ping(&self) -> Result<()>;
}
