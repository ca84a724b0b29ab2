//! Login orchestration.
//!
//! Flow: lookup by normalized email, lockout check, Argon2 verification, then
//! the failure or success side effects. Unknown emails verify against a dummy
//! hash and issue the failure-counter UPDATE against no row, so both failure
//! branches cost one Argon2 run plus one store write and return the same
//! `invalid_credentials` error.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::{Instrument, info_span};
use uuid::Uuid;

use super::account::{Account, Session};
use super::audit::{AuditAction, AuditLogger, account_resource, session_resource};
use super::error::AuthError;
use super::hasher::PasswordHasher;
use super::lockout::LockoutPolicy;
use super::sessions::SessionStore;
use super::tokens::{IssuedToken, TokenIssuer};
use crate::store::AuthStore;

const DUMMY_PASSWORD: &str = "dummy-password-for-timing-equalization";

/// Request metadata recorded alongside login events.
#[derive(Clone, Debug, Default)]
pub struct ClientContext {
    pub ip: Option<String>,
}

#[derive(Debug)]
pub struct LoginSuccess {
    pub account: Account,
    pub session: Session,
    pub token: IssuedToken,
}

#[derive(Clone)]
pub struct CredentialValidator {
    store: Arc<dyn AuthStore>,
    hasher: PasswordHasher,
    lockout: LockoutPolicy,
    sessions: SessionStore,
    tokens: TokenIssuer,
    audit: AuditLogger,
    dummy_hash: Arc<str>,
}

impl CredentialValidator {
    /// Computes the dummy hash once, with the same cost as real hashes.
    ///
    /// # Errors
    /// Returns an error if the dummy hash cannot be computed.
    pub async fn new(
        store: Arc<dyn AuthStore>,
        hasher: PasswordHasher,
        lockout: LockoutPolicy,
        sessions: SessionStore,
        tokens: TokenIssuer,
        audit: AuditLogger,
    ) -> anyhow::Result<Self> {
        let dummy_hash = hasher.hash(DUMMY_PASSWORD).await?;
        Ok(Self {
            store,
            hasher,
            lockout,
            sessions,
            tokens,
            audit,
            dummy_hash: Arc::from(dummy_hash),
        })
    }

    #[must_use]
    pub const fn lockout(&self) -> &LockoutPolicy {
        &self.lockout
    }

    /// `email` must already be normalized.
    ///
    /// # Errors
    /// `invalid_credentials`, `account_locked` or `account_inactive`; store
    /// failures surface as internal errors.
    pub async fn authenticate(
        &self,
        email: &str,
        password: &str,
        client: &ClientContext,
        now: DateTime<Utc>,
    ) -> Result<LoginSuccess, AuthError> {
        let span = info_span!("auth.login");
        async {
            let Some(account) = self.store.find_account_by_email(email).await? else {
                // Same Argon2 cost and the same failure UPDATE as a real
                // mismatch. The nil id matches no row.
                let _ = self.hasher.verify(password, &self.dummy_hash).await?;
                self.store
                    .record_login_failure(Uuid::nil(), &self.lockout, now)
                    .await?;
                self.audit
                    .record(
                        None,
                        AuditAction::LoginFailed,
                        format!("email:{email}"),
                        json!({"reason": "unknown_email", "ip": client.ip}),
                    )
                    .await;
                return Err(AuthError::InvalidCredentials);
            };

            // Locked accounts are rejected before the password is looked at.
            self.lockout.check(&account, now)?;

            if !self.hasher.verify(password, &account.password_hash).await? {
                self.on_failure(&account, client, now).await?;
                return Err(AuthError::InvalidCredentials);
            }

            if !account.is_usable() {
                return Err(AuthError::AccountInactive);
            }

            self.on_success(account, client, now).await
        }
        .instrument(span)
        .await
    }

    async fn on_failure(
        &self,
        account: &Account,
        client: &ClientContext,
        now: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        let outcome = self
            .store
            .record_login_failure(account.id, &self.lockout, now)
            .await?
            .ok_or_else(|| anyhow::anyhow!("account {} vanished during login", account.id))?;

        self.audit
            .record(
                Some(account.id),
                AuditAction::LoginFailed,
                account_resource(account.id),
                json!({
                    "reason": "bad_password",
                    "failedAttempts": outcome.failed_attempts,
                    "ip": client.ip,
                }),
            )
            .await;

        if outcome.locked(&self.lockout) {
            self.audit
                .record(
                    Some(account.id),
                    AuditAction::AccountLocked,
                    account_resource(account.id),
                    json!({
                        "failedAttempts": outcome.failed_attempts,
                        "lockedUntil": outcome.locked_until,
                    }),
                )
                .await;
        }
        Ok(())
    }

    async fn on_success(
        &self,
        account: Account,
        client: &ClientContext,
        now: DateTime<Utc>,
    ) -> Result<LoginSuccess, AuthError> {
        if !self.store.record_login_success(account.id, now).await? {
            // A concurrent failure tripped the lock after our check.
            let current = self
                .store
                .find_account(account.id)
                .await?
                .ok_or(AuthError::InvalidCredentials)?;
            self.lockout.check(&current, now)?;
            return Err(AuthError::InvalidCredentials);
        }

        let session = self.sessions.create(account.id, now).await?;
        let token = self.tokens.issue(&account, &session, now)?;

        self.audit
            .record(
                Some(account.id),
                AuditAction::LoginSucceeded,
                session_resource(session.id),
                json!({"ip": client.ip, "role": account.role.as_str()}),
            )
            .await;

        let account = Account {
            failed_login_attempts: 0,
            locked_until: None,
            ..account
        };
        Ok(LoginSuccess {
            account,
            session,
            token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::account::{AccountStatus, AccountUpdate, NewAccount, Role};
    use crate::security::audit::AuditFilter;
    use crate::security::clock::SystemClock;
    use crate::store::{AccountRepository, AuditRepository, MemoryStore};
    use chrono::Duration;
    use secrecy::SecretString;

    const PASSWORD: &str = "Sup3r-secret!";

    struct Fixture {
        store: Arc<MemoryStore>,
        validator: CredentialValidator,
        account: Account,
    }

    async fn fixture() -> anyhow::Result<Fixture> {
        let store = Arc::new(MemoryStore::new());
        let hasher = PasswordHasher::with_params(1024, 1, 1, 2)?;
        let now = Utc::now();
        let account = store
            .insert_account(
                NewAccount {
                    email: "nurse@example.com".to_string(),
                    password_hash: hasher.hash(PASSWORD).await?,
                    role: Role::Standard,
                },
                now,
            )
            .await?
            .ok_or_else(|| anyhow::anyhow!("insert failed"))?;
        let audit = AuditLogger::new(store.clone(), Arc::new(SystemClock));
        let validator = CredentialValidator::new(
            store.clone(),
            hasher,
            LockoutPolicy::default(),
            SessionStore::new(store.clone()),
            TokenIssuer::new(&SecretString::from("unit-test-secret")),
            audit,
        )
        .await?;
        Ok(Fixture {
            store,
            validator,
            account,
        })
    }

    #[tokio::test]
    async fn unknown_email_and_wrong_password_look_identical() -> anyhow::Result<()> {
        let fx = fixture().await?;
        let client = ClientContext::default();
        let now = Utc::now();

        let unknown = fx
            .validator
            .authenticate("x@example.com", PASSWORD, &client, now)
            .await;
        let wrong = fx
            .validator
            .authenticate(&fx.account.email, "Wrong-pass1!", &client, now)
            .await;

        let (Err(unknown), Err(wrong)) = (unknown, wrong) else {
            anyhow::bail!("both attempts should fail");
        };
        assert_eq!(unknown.code(), "invalid_credentials");
        assert_eq!(wrong.code(), unknown.code());
        assert_eq!(wrong.to_string(), unknown.to_string());
        Ok(())
    }

    #[tokio::test]
    async fn unknown_email_issues_the_same_store_writes_as_a_mismatch() -> anyhow::Result<()> {
        let fx = fixture().await?;
        let client = ClientContext::default();
        let now = Utc::now();

        let _ = fx
            .validator
            .authenticate("x@example.com", PASSWORD, &client, now)
            .await;
        assert_eq!(fx.store.login_failure_updates().await, 1);

        let _ = fx
            .validator
            .authenticate(&fx.account.email, "Wrong-pass1!", &client, now)
            .await;
        assert_eq!(fx.store.login_failure_updates().await, 2);

        let account = fx
            .store
            .find_account(fx.account.id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("account missing"))?;
        assert_eq!(account.failed_login_attempts, 1);
        Ok(())
    }

    #[tokio::test]
    async fn fifth_failure_locks_even_the_correct_password_out() -> anyhow::Result<()> {
        let fx = fixture().await?;
        let client = ClientContext::default();
        let now = Utc::now();

        for _ in 0..5 {
            let result = fx
                .validator
                .authenticate(&fx.account.email, "Wrong-pass1!", &client, now)
                .await;
            assert!(matches!(result, Err(AuthError::InvalidCredentials)));
        }

        let result = fx
            .validator
            .authenticate(&fx.account.email, PASSWORD, &client, now)
            .await;
        assert!(matches!(result, Err(AuthError::AccountLocked { .. })));

        let locked_events = fx
            .store
            .list_audit_events(&AuditFilter::new(50).with_action(AuditAction::AccountLocked))
            .await?;
        assert_eq!(locked_events.len(), 1);

        // Lock lapses; the correct password works and resets the counters.
        let later = now + Duration::minutes(30);
        let success = fx
            .validator
            .authenticate(&fx.account.email, PASSWORD, &client, later)
            .await?;
        assert_eq!(success.account.failed_login_attempts, 0);
        let stored = fx
            .store
            .find_account(fx.account.id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("account missing"))?;
        assert_eq!(stored.failed_login_attempts, 0);
        assert!(stored.locked_until.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn failure_after_lapsed_lock_relocks() -> anyhow::Result<()> {
        let fx = fixture().await?;
        let client = ClientContext::default();
        let now = Utc::now();
        for _ in 0..5 {
            let _ = fx
                .validator
                .authenticate(&fx.account.email, "Wrong-pass1!", &client, now)
                .await;
        }

        let later = now + Duration::minutes(31);
        let result = fx
            .validator
            .authenticate(&fx.account.email, "Wrong-pass1!", &client, later)
            .await;
        assert!(matches!(result, Err(AuthError::InvalidCredentials)));
        let result = fx
            .validator
            .authenticate(&fx.account.email, PASSWORD, &client, later)
            .await;
        assert!(matches!(result, Err(AuthError::AccountLocked { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn inactive_account_is_distinct() -> anyhow::Result<()> {
        let fx = fixture().await?;
        let now = Utc::now();
        fx.store
            .update_account(
                fx.account.id,
                AccountUpdate {
                    status: Some(AccountStatus::Inactive),
                    ..AccountUpdate::default()
                },
                now,
            )
            .await?;

        let result = fx
            .validator
            .authenticate(&fx.account.email, PASSWORD, &ClientContext::default(), now)
            .await;
        assert!(matches!(result, Err(AuthError::AccountInactive)));

        let result = fx
            .validator
            .authenticate(
                &fx.account.email,
                "Wrong-pass1!",
                &ClientContext::default(),
                now,
            )
            .await;
        assert!(matches!(result, Err(AuthError::InvalidCredentials)));
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_failures_never_skip_the_threshold() -> anyhow::Result<()> {
        let fx = fixture().await?;
        let validator = Arc::new(fx.validator);
        let now = Utc::now();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let validator = validator.clone();
            let email = fx.account.email.clone();
            handles.push(tokio::spawn(async move {
                validator
                    .authenticate(&email, "Wrong-pass1!", &ClientContext::default(), now)
                    .await
            }));
        }
        for handle in handles {
            let _ = handle.await?;
        }

        let stored = fx
            .store
            .find_account(fx.account.id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("account missing"))?;
        assert!(stored.failed_login_attempts >= 5);
        assert!(stored.locked_until.is_some());
        Ok(())
    }
}
