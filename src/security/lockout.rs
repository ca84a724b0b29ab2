//! Per-account lockout after consecutive credential failures.
//!
//! The counter lives on the account row and is incremented by the store in
//! one atomic statement that also sets `locked_until` once the threshold is
//! reached. The lock is evaluated lazily; once it lapses the counter is still
//! at or above the threshold, so the next failure locks again immediately.

use chrono::{DateTime, Duration, Utc};

use super::account::Account;
use super::error::{AuthError, retry_after_seconds};

const DEFAULT_THRESHOLD: i32 = 5;
const DEFAULT_LOCK_SECONDS: i64 = 30 * 60;

#[derive(Clone, Copy, Debug)]
pub struct LockoutPolicy {
    threshold: i32,
    duration: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            duration: Duration::seconds(DEFAULT_LOCK_SECONDS),
        }
    }
}

impl LockoutPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_threshold(mut self, threshold: i32) -> Self {
        self.threshold = threshold.max(1);
        self
    }

    #[must_use]
    pub fn with_duration_seconds(mut self, seconds: i64) -> Self {
        self.duration = Duration::seconds(seconds.max(1));
        self
    }

    #[must_use]
    pub const fn threshold(&self) -> i32 {
        self.threshold
    }

    #[must_use]
    pub const fn duration(&self) -> Duration {
        self.duration
    }

    #[must_use]
    pub fn lock_expiry(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.duration
    }

    #[must_use]
    pub const fn trips(&self, failed_attempts: i32) -> bool {
        failed_attempts >= self.threshold
    }

    /// # Errors
    /// Returns `account_locked` while the account's lock is in the future.
    pub fn check(&self, account: &Account, now: DateTime<Utc>) -> Result<(), AuthError> {
        match account.lock_active(now) {
            Some(locked_until) => Err(AuthError::AccountLocked {
                locked_until,
                retry_after_seconds: retry_after_seconds(locked_until, now),
            }),
            None => Ok(()),
        }
    }
}

/// Counters after a failed attempt was recorded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FailureOutcome {
    pub failed_attempts: i32,
    pub locked_until: Option<DateTime<Utc>>,
}

impl FailureOutcome {
    /// Whether this failure set (or re-set) the lock.
    #[must_use]
    pub fn locked(&self, policy: &LockoutPolicy) -> bool {
        policy.trips(self.failed_attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::account::{AccountStatus, Role};
    use uuid::Uuid;

    fn account(locked_until: Option<DateTime<Utc>>) -> Account {
        let now = Utc::now();
        Account {
            id: Uuid::new_v4(),
            email: "a@example.com".to_string(),
            password_hash: String::new(),
            role: Role::Standard,
            status: AccountStatus::Active,
            failed_login_attempts: 5,
            locked_until,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn defaults_match_policy() {
        let policy = LockoutPolicy::default();
        assert_eq!(policy.threshold(), 5);
        assert_eq!(policy.duration(), Duration::minutes(30));
        assert!(!policy.trips(4));
        assert!(policy.trips(5));
        assert!(policy.trips(6));
    }

    #[test]
    fn check_reports_remaining_time() {
        let now = Utc::now();
        let policy = LockoutPolicy::default();
        let locked = account(Some(now + Duration::minutes(10)));
        match policy.check(&locked, now) {
            Err(AuthError::AccountLocked {
                retry_after_seconds,
                ..
            }) => assert_eq!(retry_after_seconds, 600),
            other => panic!("expected account_locked, got {other:?}"),
        }
    }

    #[test]
    fn lapsed_lock_passes_check() {
        let now = Utc::now();
        let policy = LockoutPolicy::default();
        assert!(policy.check(&account(Some(now)), now).is_ok());
        assert!(policy.check(&account(None), now).is_ok());
    }

    #[test]
    fn builder_clamps_values() {
        let policy = LockoutPolicy::new()
            .with_threshold(0)
            .with_duration_seconds(-5);
        assert_eq!(policy.threshold(), 1);
        assert_eq!(policy.duration(), Duration::seconds(1));
    }
}
