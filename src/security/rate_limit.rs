//! Fixed-window request budgets for unauthenticated endpoints.
//!
//! Counters live in the shared store, so every instance sees the same window.
//! Limits are independent of account lockout: unknown emails are limited too.

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;
use tracing::warn;

use super::error::{AuthError, retry_after_seconds};
use crate::store::AuthStore;

#[derive(Clone, Copy, Debug)]
pub enum RateLimitAction {
    Login,
    ForgotPassword,
}

impl RateLimitAction {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::ForgotPassword => "forgot",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitRule {
    pub limit: i64,
    pub window_seconds: i64,
}

impl RateLimitRule {
    #[must_use]
    pub const fn new(limit: i64, window_seconds: i64) -> Self {
        Self {
            limit,
            window_seconds,
        }
    }

    /// Start of the window containing `now`, aligned to the epoch.
    #[must_use]
    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let window = self.window_seconds.max(1);
        let start = now.timestamp().div_euclid(window) * window;
        Utc.timestamp_opt(start, 0).single().unwrap_or(now)
    }

    #[must_use]
    pub fn window_end(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.window_start(now) + Duration::seconds(self.window_seconds.max(1))
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn AuthStore>,
    login: RateLimitRule,
    forgot_password: RateLimitRule,
}

impl RateLimiter {
    #[must_use]
    pub fn new(store: Arc<dyn AuthStore>, login: RateLimitRule, forgot_password: RateLimitRule) -> Self {
        Self {
            store,
            login,
            forgot_password,
        }
    }

    /// Key for login attempts: the `(email, ip)` pair.
    #[must_use]
    pub fn login_key(email: &str, ip: &str) -> String {
        format!("{}:{email}:{ip}", RateLimitAction::Login.as_str())
    }

    #[must_use]
    pub fn forgot_password_key(ip: &str) -> String {
        format!("{}:{ip}", RateLimitAction::ForgotPassword.as_str())
    }

    const fn rule(&self, action: RateLimitAction) -> RateLimitRule {
        match action {
            RateLimitAction::Login => self.login,
            RateLimitAction::ForgotPassword => self.forgot_password,
        }
    }

    /// Count this request and reject it once the window budget is spent.
    ///
    /// # Errors
    /// Returns `rate_limited` with the seconds until the window resets.
    pub async fn check(
        &self,
        action: RateLimitAction,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        let rule = self.rule(action);
        let count = self
            .store
            .increment_rate_limit(key, rule.window_start(now), rule.window_end(now))
            .await?;
        if count > rule.limit {
            warn!(
                rate_limit.action = action.as_str(),
                count, "Rate limit exceeded"
            );
            return Err(AuthError::RateLimited {
                retry_after_seconds: retry_after_seconds(rule.window_end(now), now),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn windows_align_to_epoch() {
        let rule = RateLimitRule::new(5, 900);
        let now = Utc.timestamp_opt(1_000, 0).single();
        assert!(now.is_some());
        if let Some(now) = now {
            assert_eq!(rule.window_start(now).timestamp(), 900);
            assert_eq!(rule.window_end(now).timestamp(), 1_800);
        }
    }

    #[tokio::test]
    async fn limits_after_budget_and_resets_next_window() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let limiter = RateLimiter::new(
            store,
            RateLimitRule::new(2, 60),
            RateLimitRule::new(1, 60),
        );
        let now = Utc.timestamp_opt(6_000, 0).single().unwrap_or_else(Utc::now);
        let key = RateLimiter::login_key("a@example.com", "10.0.0.1");

        limiter.check(RateLimitAction::Login, &key, now).await?;
        limiter.check(RateLimitAction::Login, &key, now).await?;
        match limiter
            .check(RateLimitAction::Login, &key, now + Duration::seconds(15))
            .await
        {
            Err(AuthError::RateLimited {
                retry_after_seconds,
            }) => assert_eq!(retry_after_seconds, 45),
            other => panic!("expected rate_limited, got {other:?}"),
        }

        let other_ip = RateLimiter::login_key("a@example.com", "10.0.0.2");
        limiter.check(RateLimitAction::Login, &other_ip, now).await?;

        limiter
            .check(RateLimitAction::Login, &key, now + Duration::seconds(60))
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn forgot_password_uses_its_own_budget() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let limiter = RateLimiter::new(
            store,
            RateLimitRule::new(10, 60),
            RateLimitRule::new(1, 60),
        );
        let now = Utc::now();
        let key = RateLimiter::forgot_password_key("10.0.0.1");
        limiter
            .check(RateLimitAction::ForgotPassword, &key, now)
            .await?;
        assert!(
            limiter
                .check(RateLimitAction::ForgotPassword, &key, now)
                .await
                .is_err()
        );
        Ok(())
    }
}
