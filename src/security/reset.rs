//! Password reset token lifecycle.
//!
//! Only the SHA-256 of a token is stored. Issuing a token expires every
//! outstanding token of the same account, so at most one is valid at a time.
//! Validation errors are ordered: unknown hash, then expiry, then prior use.

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::{Instrument, debug, info_span};
use uuid::Uuid;

use super::account::{Account, ResetToken};
use super::audit::{AuditAction, AuditLogger, account_resource};
use super::crypto::{generate_token, hash_token};
use super::error::AuthError;
use super::hasher::PasswordHasher;
use super::password_policy::PasswordPolicy;
use crate::store::{AuthStore, ConsumeOutcome};

const MAX_TTL_SECONDS: i64 = 60 * 60;

/// Plaintext handed to the notification collaborator, never persisted.
#[derive(Clone)]
pub struct IssuedResetToken {
    pub account: Account,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResetCompleted {
    pub account_id: Uuid,
    pub sessions_revoked: u64,
}

#[derive(Clone)]
pub struct PasswordResetTokenStore {
    store: Arc<dyn AuthStore>,
    hasher: PasswordHasher,
    policy: PasswordPolicy,
    audit: AuditLogger,
    ttl: Duration,
}

impl PasswordResetTokenStore {
    #[must_use]
    pub fn new(store: Arc<dyn AuthStore>, hasher: PasswordHasher, audit: AuditLogger) -> Self {
        Self {
            store,
            hasher,
            policy: PasswordPolicy::user(),
            audit,
            ttl: Duration::seconds(MAX_TTL_SECONDS),
        }
    }

    /// Capped at one hour.
    #[must_use]
    pub fn with_ttl_seconds(mut self, seconds: i64) -> Self {
        self.ttl = Duration::seconds(seconds.clamp(1, MAX_TTL_SECONDS));
        self
    }

    /// Issue a token for an active account found by normalized email.
    ///
    /// Returns `None` for unknown, inactive or deleted accounts; the caller
    /// answers identically in every case.
    ///
    /// # Errors
    /// Returns an internal error if the store fails.
    pub async fn request(
        &self,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<IssuedResetToken>, AuthError> {
        let Some(account) = self.store.find_account_by_email(email).await? else {
            debug!("Password reset requested for unknown email");
            return Ok(None);
        };
        if !account.is_usable() {
            debug!("Password reset requested for unusable account {}", account.id);
            return Ok(None);
        }
        self.issue(account, now).await.map(Some)
    }

    /// # Errors
    /// Returns an internal error if randomness or the store fails.
    pub async fn issue(
        &self,
        account: Account,
        now: DateTime<Utc>,
    ) -> Result<IssuedResetToken, AuthError> {
        let token = generate_token()?;
        let record = ResetToken {
            id: Uuid::now_v7(),
            account_id: account.id,
            token_hash: hash_token(&token),
            created_at: now,
            expires_at: now + self.ttl,
            used_at: None,
        };
        let span = info_span!("auth.reset.issue");
        let invalidated = self
            .store
            .issue_reset_token(&record, now)
            .instrument(span)
            .await?;

        self.audit
            .record(
                Some(account.id),
                AuditAction::PasswordResetRequested,
                account_resource(account.id),
                json!({
                    "tokenId": record.id,
                    "expiresAt": record.expires_at,
                    "invalidatedTokens": invalidated,
                }),
            )
            .await;

        Ok(IssuedResetToken {
            account,
            token,
            expires_at: record.expires_at,
        })
    }

    /// # Errors
    /// `invalid_token`, `token_expired` or `token_used`, in that order.
    pub async fn validate(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<ResetToken, AuthError> {
        if token.trim().is_empty() {
            return Err(AuthError::InvalidToken);
        }
        let record = self
            .store
            .find_reset_token(&hash_token(token))
            .await?
            .ok_or(AuthError::InvalidToken)?;
        if record.is_expired(now) {
            return Err(AuthError::TokenExpired);
        }
        if record.used_at.is_some() {
            return Err(AuthError::TokenUsed);
        }
        Ok(record)
    }

    /// Validate, enforce the password policy, hash, then commit atomically.
    ///
    /// # Errors
    /// Token errors as in [`Self::validate`], `password_requirements_not_met`,
    /// or `account_inactive`. A concurrent consumer that loses the race gets
    /// `token_used`.
    pub async fn consume(
        &self,
        token: &str,
        new_password: &str,
        now: DateTime<Utc>,
    ) -> Result<ResetCompleted, AuthError> {
        let record = self.validate(token, now).await?;
        self.policy
            .validate(new_password)
            .map_err(AuthError::PasswordRequirementsNotMet)?;

        let password_hash = self.hasher.hash(new_password).await?;
        let span = info_span!("auth.reset.consume");
        let outcome = self
            .store
            .consume_reset_token(&record.token_hash, &password_hash, now)
            .instrument(span)
            .await?;

        match outcome {
            ConsumeOutcome::Consumed {
                account_id,
                sessions_revoked,
            } => {
                self.audit
                    .record(
                        Some(account_id),
                        AuditAction::PasswordResetCompleted,
                        account_resource(account_id),
                        json!({
                            "tokenId": record.id,
                            "sessionsRevoked": sessions_revoked,
                        }),
                    )
                    .await;
                Ok(ResetCompleted {
                    account_id,
                    sessions_revoked,
                })
            }
            ConsumeOutcome::Invalid => Err(AuthError::InvalidToken),
            ConsumeOutcome::Expired => Err(AuthError::TokenExpired),
            ConsumeOutcome::Used => Err(AuthError::TokenUsed),
            ConsumeOutcome::AccountInactive => Err(AuthError::AccountInactive),
        }
    }
}
