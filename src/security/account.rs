//! Account, session and token records shared by the store and the guards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Standard,
    Admin,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Admin => "admin",
        }
    }

    #[must_use]
    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "standard" => Some(Self::Standard),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Inactive,
}

impl AccountStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }

    #[must_use]
    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Account {
    pub id: Uuid,
    /// Normalized (trimmed, lowercase).
    pub email: String,
    /// PHC-formatted Argon2id hash.
    pub password_hash: String,
    pub role: Role,
    pub status: AccountStatus,
    pub failed_login_attempts: i32,
    pub locked_until: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Soft-deleted accounts are treated like inactive ones.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.status == AccountStatus::Active && self.deleted_at.is_none()
    }

    #[must_use]
    pub fn lock_active(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.locked_until.filter(|until| *until > now)
    }
}

/// Insert payload for a new account.
#[derive(Clone, Debug)]
pub struct NewAccount {
    pub email: String,
    pub password_hash: String,
    pub role: Role,
}

/// Partial update applied by admin tooling.
#[derive(Clone, Copy, Debug, Default)]
pub struct AccountUpdate {
    pub role: Option<Role>,
    pub status: Option<AccountStatus>,
}

#[derive(Clone, Debug)]
pub struct Session {
    pub id: Uuid,
    pub account_id: Uuid,
    pub csrf_hash: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl Session {
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && now < self.expires_at
    }
}

#[derive(Clone, Debug)]
pub struct ResetToken {
    pub id: Uuid,
    pub account_id: Uuid,
    pub token_hash: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
}

impl ResetToken {
    /// The expiry instant itself already counts as expired.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    #[must_use]
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.used_at.is_none() && !self.is_expired(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn role_round_trips_through_db_text() {
        for role in [Role::Standard, Role::Admin] {
            assert_eq!(Role::from_db(role.as_str()), Some(role));
        }
        assert_eq!(Role::from_db("owner"), None);
    }

    #[test]
    fn status_parses_known_values() {
        assert_eq!(AccountStatus::from_db("active"), Some(AccountStatus::Active));
        assert_eq!(
            AccountStatus::from_db("inactive"),
            Some(AccountStatus::Inactive)
        );
        assert_eq!(AccountStatus::from_db("deleted"), None);
    }

    #[test]
    fn reset_token_expires_at_the_boundary() {
        let now = Utc::now();
        let token = ResetToken {
            id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            token_hash: Vec::new(),
            created_at: now - Duration::minutes(10),
            expires_at: now,
            used_at: None,
        };
        assert!(token.is_expired(now));
        assert!(!token.is_expired(now - Duration::seconds(1)));
    }

    #[test]
    fn lock_is_only_active_in_the_future() {
        let now = Utc::now();
        let mut account = Account {
            id: Uuid::new_v4(),
            email: "a@example.com".to_string(),
            password_hash: String::new(),
            role: Role::Standard,
            status: AccountStatus::Active,
            failed_login_attempts: 5,
            locked_until: Some(now + Duration::minutes(1)),
            deleted_at: None,
            created_at: now,
            updated_at: now,
        };
        assert!(account.lock_active(now).is_some());
        account.locked_until = Some(now);
        assert!(account.lock_active(now).is_none());
    }
}
