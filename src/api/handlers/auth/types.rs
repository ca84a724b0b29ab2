//! Request/response types for auth endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::security::{Account, AccountStatus, Role};

#[derive(ToSchema, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Public identity. Never carries the password hash or lockout counters.
#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct UserView {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
}

impl From<&Account> for UserView {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id,
            email: account.email.clone(),
            role: account.role,
        }
    }
}

/// The access token travels only in the `HttpOnly` cookie.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginResponse {
    pub user: UserView,
    pub expires_in: i64,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(IntoParams, Deserialize, Debug)]
pub struct ValidateResetQuery {
    #[serde(default)]
    pub token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ValidateResetResponse {
    pub valid: bool,
    pub expires_at: DateTime<Utc>,
}

#[derive(ToSchema, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub token: String,
    pub new_password: String,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct CreateAccountRequest {
    pub email: String,
    #[serde(default)]
    pub role: Option<Role>,
}

#[derive(ToSchema, Deserialize, Debug, Default)]
pub struct UpdateAccountRequest {
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub status: Option<AccountStatus>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AccountView {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
    pub status: AccountStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Account> for AccountView {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id,
            email: account.email.clone(),
            role: account.role,
            status: account.status,
            created_at: account.created_at,
            updated_at: account.updated_at,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CreateAccountResponse {
    pub account: AccountView,
    pub credentials_sent: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RevokeSessionResponse {
    pub revoked: bool,
}

#[derive(IntoParams, Deserialize, Debug, Default)]
pub struct AuditQuery {
    /// Filter by action name, e.g. `login_failed`.
    pub action: Option<String>,
    /// Defaults to 50, capped at 500.
    pub limit: Option<i64>,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct AuditEventsResponse {
    pub events: Vec<crate::security::audit::AuditEvent>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn reset_request_reads_camel_case() -> Result<()> {
        let request: ResetPasswordRequest =
            serde_json::from_str(r#"{"token":"t","newPassword":"N3w-password!"}"#)?;
        assert_eq!(request.token, "t");
        assert_eq!(request.new_password, "N3w-password!");
        Ok(())
    }

    #[test]
    fn login_response_has_no_token_field() -> Result<()> {
        let response = LoginResponse {
            user: UserView {
                id: Uuid::nil(),
                email: "a@example.com".to_string(),
                role: Role::Standard,
            },
            expires_in: 900,
        };
        let value = serde_json::to_value(&response)?;
        assert_eq!(value["expires_in"], 900);
        assert_eq!(value["user"]["role"], "standard");
        assert!(value.get("token").is_none());
        Ok(())
    }
}
