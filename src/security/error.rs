//! Error taxonomy for authentication and session flows.
//!
//! Every variant maps to a stable machine-readable `code`. HTTP status mapping
//! and the JSON envelope live in `api::error`.

use chrono::{DateTime, Utc};

use super::password_policy::PolicyViolation;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("Invalid email or password.")]
    InvalidCredentials,
    #[error("Account is temporarily locked.")]
    AccountLocked {
        locked_until: DateTime<Utc>,
        retry_after_seconds: u64,
    },
    #[error("Account is inactive.")]
    AccountInactive,
    #[error("Too many requests.")]
    RateLimited { retry_after_seconds: u64 },
    #[error("Authentication required.")]
    Unauthenticated,
    #[error("Session is no longer valid. Please sign in again.")]
    SessionInvalidated,
    #[error("Insufficient permissions.")]
    Forbidden,
    #[error("CSRF token missing.")]
    CsrfTokenMissing,
    #[error("CSRF token invalid.")]
    CsrfTokenInvalid,
    #[error("Reset token is invalid.")]
    InvalidToken,
    #[error("Reset token has expired.")]
    TokenExpired,
    #[error("Reset token has already been used.")]
    TokenUsed,
    #[error("Password does not meet requirements.")]
    PasswordRequirementsNotMet(Vec<PolicyViolation>),
    #[error("Account already exists.")]
    AccountExists,
    #[error("Not found.")]
    NotFound,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::InvalidCredentials => "invalid_credentials",
            Self::AccountLocked { .. } => "account_locked",
            Self::AccountInactive => "account_inactive",
            Self::RateLimited { .. } => "rate_limited",
            Self::Unauthenticated => "unauthenticated",
            Self::SessionInvalidated => "session_invalidated",
            Self::Forbidden => "forbidden",
            Self::CsrfTokenMissing => "csrf_token_missing",
            Self::CsrfTokenInvalid => "csrf_token_invalid",
            Self::InvalidToken => "invalid_token",
            Self::TokenExpired => "token_expired",
            Self::TokenUsed => "token_used",
            Self::PasswordRequirementsNotMet(_) => "password_requirements_not_met",
            Self::AccountExists => "account_exists",
            Self::NotFound => "not_found",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Machine-readable detail items for the error envelope.
    #[must_use]
    pub fn details(&self) -> Vec<String> {
        match self {
            Self::AccountLocked {
                locked_until,
                retry_after_seconds,
            } => vec![
                format!("locked_until={}", locked_until.to_rfc3339()),
                format!("retry_after_seconds={retry_after_seconds}"),
            ],
            Self::RateLimited {
                retry_after_seconds,
            } => vec![format!("retry_after_seconds={retry_after_seconds}")],
            Self::PasswordRequirementsNotMet(violations) => violations
                .iter()
                .map(|violation| violation.as_str().to_string())
                .collect(),
            _ => Vec::new(),
        }
    }

    #[must_use]
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal(_))
    }
}

/// Seconds until `until`, rounded up and never below one.
#[must_use]
pub fn retry_after_seconds(until: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let millis = until.signed_duration_since(now).num_milliseconds();
    let seconds = millis.saturating_add(999) / 1000;
    u64::try_from(seconds).unwrap_or(0).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn codes_are_stable() {
        assert_eq!(AuthError::InvalidCredentials.code(), "invalid_credentials");
        assert_eq!(AuthError::SessionInvalidated.code(), "session_invalidated");
        assert_eq!(AuthError::TokenUsed.code(), "token_used");
        assert_eq!(
            AuthError::Internal(anyhow::anyhow!("db down")).code(),
            "internal_error"
        );
    }

    #[test]
    fn invalid_credentials_message_is_fixed() {
        assert_eq!(
            AuthError::InvalidCredentials.to_string(),
            "Invalid email or password."
        );
    }

    #[test]
    fn locked_details_carry_unlock_metadata() {
        let now = Utc::now();
        let err = AuthError::AccountLocked {
            locked_until: now,
            retry_after_seconds: 1800,
        };
        let details = err.details();
        assert_eq!(details.len(), 2);
        assert!(details[0].starts_with("locked_until="));
        assert_eq!(details[1], "retry_after_seconds=1800");
    }

    #[test]
    fn policy_details_list_each_rule() {
        let err = AuthError::PasswordRequirementsNotMet(vec![
            PolicyViolation::MinLength,
            PolicyViolation::Symbol,
        ]);
        assert_eq!(err.details(), vec!["min_length", "symbol"]);
    }

    #[test]
    fn retry_after_rounds_up() {
        let now = Utc::now();
        assert_eq!(retry_after_seconds(now + Duration::milliseconds(1500), now), 2);
        assert_eq!(retry_after_seconds(now, now), 1);
        assert_eq!(retry_after_seconds(now - Duration::seconds(5), now), 1);
        assert_eq!(retry_after_seconds(now + Duration::minutes(30), now), 1800);
    }
}
