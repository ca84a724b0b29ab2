//! In-process store for tests and single-node development.
//!
//! Each operation runs under one mutex, which gives it the same atomicity as
//! the corresponding Postgres statement or transaction.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    AccountRepository, AuditRepository, AuthStore, ConsumeOutcome, RateLimitRepository,
    ResetTokenRepository, SessionRepository,
};
use crate::security::{
    account::{Account, AccountStatus, AccountUpdate, NewAccount, ResetToken, Session},
    audit::{AuditEvent, AuditFilter},
    lockout::{FailureOutcome, LockoutPolicy},
};

#[derive(Debug, Default)]
struct Inner {
    accounts: HashMap<Uuid, Account>,
    sessions: HashMap<Uuid, Session>,
    reset_tokens: Vec<ResetToken>,
    rate_limits: HashMap<String, RateCounter>,
    audit_events: Vec<AuditEvent>,
    login_failure_updates: usize,
}

#[derive(Debug)]
struct RateCounter {
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    count: i64,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every reset token row of an account, oldest first.
    pub async fn reset_tokens_for(&self, account_id: Uuid) -> Vec<ResetToken> {
        let inner = self.inner.lock().await;
        inner
            .reset_tokens
            .iter()
            .filter(|token| token.account_id == account_id)
            .cloned()
            .collect()
    }

    /// Failure-counter updates issued so far, whether or not they matched an account.
    pub async fn login_failure_updates(&self) -> usize {
        self.inner.lock().await.login_failure_updates
    }

    pub async fn sessions_for(&self, account_id: Uuid) -> Vec<Session> {
        let inner = self.inner.lock().await;
        let mut sessions: Vec<Session> = inner
            .sessions
            .values()
            .filter(|session| session.account_id == account_id)
            .cloned()
            .collect();
        sessions.sort_by_key(|session| session.created_at);
        sessions
    }
}

#[async_trait]
impl AccountRepository for MemoryStore {
    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .accounts
            .values()
            .find(|account| account.email == email)
            .cloned())
    }

    async fn find_account(&self, id: Uuid) -> Result<Option<Account>> {
        Ok(self.inner.lock().await.accounts.get(&id).cloned())
    }

    async fn insert_account(
        &self,
        account: NewAccount,
        now: DateTime<Utc>,
    ) -> Result<Option<Account>> {
        let mut inner = self.inner.lock().await;
        if inner
            .accounts
            .values()
            .any(|existing| existing.email == account.email)
        {
            return Ok(None);
        }
        let record = Account {
            id: Uuid::now_v7(),
            email: account.email,
            password_hash: account.password_hash,
            role: account.role,
            status: AccountStatus::Active,
            failed_login_attempts: 0,
            locked_until: None,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        };
        inner.accounts.insert(record.id, record.clone());
        Ok(Some(record))
    }

    async fn update_account(
        &self,
        id: Uuid,
        update: AccountUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<Account>> {
        let mut inner = self.inner.lock().await;
        let Some(account) = inner.accounts.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(role) = update.role {
            account.role = role;
        }
        if let Some(status) = update.status {
            account.status = status;
        }
        account.updated_at = now;
        Ok(Some(account.clone()))
    }

    async fn record_login_failure(
        &self,
        id: Uuid,
        policy: &LockoutPolicy,
        now: DateTime<Utc>,
    ) -> Result<Option<FailureOutcome>> {
        let mut inner = self.inner.lock().await;
        inner.login_failure_updates += 1;
        let Some(account) = inner.accounts.get_mut(&id) else {
            return Ok(None);
        };
        account.failed_login_attempts += 1;
        if policy.trips(account.failed_login_attempts) {
            account.locked_until = Some(policy.lock_expiry(now));
        }
        account.updated_at = now;
        Ok(Some(FailureOutcome {
            failed_attempts: account.failed_login_attempts,
            locked_until: account.locked_until,
        }))
    }

    async fn record_login_success(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let Some(account) = inner.accounts.get_mut(&id) else {
            return Ok(false);
        };
        if account.lock_active(now).is_some() {
            return Ok(false);
        }
        account.failed_login_attempts = 0;
        account.locked_until = None;
        account.updated_at = now;
        Ok(true)
    }
}

#[async_trait]
impl SessionRepository for MemoryStore {
    async fn insert_session(&self, session: &Session) -> Result<()> {
        self.inner
            .lock()
            .await
            .sessions
            .insert(session.id, session.clone());
        Ok(())
    }

    async fn find_session(&self, id: Uuid) -> Result<Option<Session>> {
        Ok(self.inner.lock().await.sessions.get(&id).cloned())
    }

    async fn touch_session(&self, id: Uuid, now: DateTime<Utc>) -> Result<Option<Session>> {
        let mut inner = self.inner.lock().await;
        match inner.sessions.get_mut(&id) {
            Some(session) if session.is_active(now) => {
                session.last_activity_at = now;
                Ok(Some(session.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn set_csrf_hash(&self, id: Uuid, csrf_hash: &[u8], now: DateTime<Utc>) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner.sessions.get_mut(&id) {
            Some(session) if session.is_active(now) => {
                session.csrf_hash = csrf_hash.to_vec();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_session(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner.sessions.get_mut(&id) {
            Some(session) if session.revoked_at.is_none() => {
                session.revoked_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_account_sessions(&self, account_id: Uuid, now: DateTime<Utc>) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        Ok(revoke_all(&mut inner, account_id, now))
    }
}

fn revoke_all(inner: &mut Inner, account_id: Uuid, now: DateTime<Utc>) -> u64 {
    let mut revoked = 0;
    for session in inner.sessions.values_mut() {
        if session.account_id == account_id && session.revoked_at.is_none() {
            session.revoked_at = Some(now);
            revoked += 1;
        }
    }
    revoked
}

#[async_trait]
impl ResetTokenRepository for MemoryStore {
    async fn issue_reset_token(&self, token: &ResetToken, now: DateTime<Utc>) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let mut invalidated = 0;
        for existing in &mut inner.reset_tokens {
            if existing.account_id == token.account_id && existing.is_valid(now) {
                existing.expires_at = now;
                invalidated += 1;
            }
        }
        inner.reset_tokens.push(token.clone());
        Ok(invalidated)
    }

    async fn find_reset_token(&self, token_hash: &[u8]) -> Result<Option<ResetToken>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .reset_tokens
            .iter()
            .find(|token| token.token_hash == token_hash)
            .cloned())
    }

    async fn consume_reset_token(
        &self,
        token_hash: &[u8],
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<ConsumeOutcome> {
        let mut inner = self.inner.lock().await;
        let Some(index) = inner
            .reset_tokens
            .iter()
            .position(|token| token.token_hash == token_hash)
        else {
            return Ok(ConsumeOutcome::Invalid);
        };
        let token = inner.reset_tokens[index].clone();
        if token.is_expired(now) {
            return Ok(ConsumeOutcome::Expired);
        }
        if token.used_at.is_some() {
            return Ok(ConsumeOutcome::Used);
        }

        let Some(account) = inner.accounts.get_mut(&token.account_id) else {
            return Ok(ConsumeOutcome::Invalid);
        };
        if !account.is_usable() {
            return Ok(ConsumeOutcome::AccountInactive);
        }
        account.password_hash = password_hash.to_string();
        account.failed_login_attempts = 0;
        account.locked_until = None;
        account.updated_at = now;

        inner.reset_tokens[index].used_at = Some(now);
        let sessions_revoked = revoke_all(&mut inner, token.account_id, now);

        Ok(ConsumeOutcome::Consumed {
            account_id: token.account_id,
            sessions_revoked,
        })
    }
}

#[async_trait]
impl RateLimitRepository for MemoryStore {
    async fn increment_rate_limit(
        &self,
        key: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<i64> {
        let mut inner = self.inner.lock().await;
        inner
            .rate_limits
            .retain(|existing, counter| existing == key || counter.window_end >= window_start);
        let counter = inner
            .rate_limits
            .entry(key.to_string())
            .or_insert(RateCounter {
                window_start,
                window_end,
                count: 0,
            });
        if counter.window_start < window_start {
            *counter = RateCounter {
                window_start,
                window_end,
                count: 0,
            };
        }
        counter.count += 1;
        Ok(counter.count)
    }
}

#[async_trait]
impl AuditRepository for MemoryStore {
    async fn append_audit_event(&self, event: &AuditEvent) -> Result<()> {
        self.inner.lock().await.audit_events.push(event.clone());
        Ok(())
    }

    async fn list_audit_events(&self, filter: &AuditFilter) -> Result<Vec<AuditEvent>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .audit_events
            .iter()
            .rev()
            .filter(|event| filter.matches(event))
            .take(usize::try_from(filter.limit).unwrap_or(0))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AuthStore for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::account::Role;
    use chrono::Duration;

    fn new_account(email: &str) -> NewAccount {
        NewAccount {
            email: email.to_string(),
            password_hash: "$argon2id$placeholder".to_string(),
            role: Role::Standard,
        }
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_email() -> Result<()> {
        let store = MemoryStore::new();
        let now = Utc::now();
        assert!(store.insert_account(new_account("a@example.com"), now).await?.is_some());
        assert!(store.insert_account(new_account("a@example.com"), now).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn success_does_not_clear_an_active_lock() -> Result<()> {
        let store = MemoryStore::new();
        let now = Utc::now();
        let account = store
            .insert_account(new_account("a@example.com"), now)
            .await?
            .ok_or_else(|| anyhow::anyhow!("insert failed"))?;
        let policy = LockoutPolicy::new().with_threshold(1);
        let outcome = store
            .record_login_failure(account.id, &policy, now)
            .await?
            .ok_or_else(|| anyhow::anyhow!("account missing"))?;
        assert!(outcome.locked(&policy));
        assert!(
            store
                .record_login_failure(Uuid::nil(), &policy, now)
                .await?
                .is_none()
        );
        assert_eq!(store.login_failure_updates().await, 2);

        assert!(!store.record_login_success(account.id, now).await?);
        assert!(
            store
                .record_login_success(account.id, now + Duration::minutes(30))
                .await?
        );
        Ok(())
    }

    #[tokio::test]
    async fn rate_limit_window_resets() -> Result<()> {
        let store = MemoryStore::new();
        let start = Utc::now();
        let end = start + Duration::minutes(15);
        assert_eq!(store.increment_rate_limit("k", start, end).await?, 1);
        assert_eq!(store.increment_rate_limit("k", start, end).await?, 2);
        assert_eq!(
            store
                .increment_rate_limit("k", end, end + Duration::minutes(15))
                .await?,
            1
        );
        Ok(())
    }

    #[tokio::test]
    async fn rate_limit_prunes_counters_of_ended_windows() -> Result<()> {
        let store = MemoryStore::new();
        let start = Utc::now();
        let window = Duration::minutes(15);
        store
            .increment_rate_limit("login:a@example.com:192.0.2.1", start, start + window)
            .await?;
        store
            .increment_rate_limit("forgot:192.0.2.1", start, start + Duration::hours(2))
            .await?;

        // One window later the previous login window is still adjacent and kept.
        store
            .increment_rate_limit("login:b@example.com:192.0.2.2", start + window, start + window * 2)
            .await?;
        assert_eq!(store.inner.lock().await.rate_limits.len(), 3);

        // Two windows later it has ended; the longer forgot window has not.
        let later = start + window * 2;
        assert_eq!(
            store
                .increment_rate_limit("login:c@example.com:192.0.2.3", later, later + window)
                .await?,
            1
        );
        let inner = store.inner.lock().await;
        let mut keys: Vec<&str> = inner.rate_limits.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            [
                "forgot:192.0.2.1",
                "login:b@example.com:192.0.2.2",
                "login:c@example.com:192.0.2.3"
            ]
        );
        Ok(())
    }
}
