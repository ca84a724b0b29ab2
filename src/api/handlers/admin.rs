//! Admin-only account and session management.
//!
//! Every route requires an active session whose account holds the `admin`
//! role; mutations additionally require the CSRF header.

use axum::{
    Json,
    extract::{
        Extension, Path, Query,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use super::auth::{
    AuthState,
    principal::require_admin,
    types::{
        AccountView, AuditEventsResponse, AuditQuery, CreateAccountRequest,
        CreateAccountResponse, RevokeSessionResponse, UpdateAccountRequest,
    },
    utils::{json_body, query_params, require_email},
};
use crate::api::error::ErrorEnvelope;
use crate::notify::credentials_message;
use crate::security::{
    AccountStatus, AuthError, Role,
    account::{AccountUpdate, NewAccount},
    audit::{AuditAction, AuditFilter, account_resource, session_resource},
    password_policy::generate_temporary_password,
};

const DEFAULT_AUDIT_LIMIT: i64 = 50;

fn path_id(path: Result<Path<Uuid>, PathRejection>) -> Result<Uuid, AuthError> {
    path.map(|Path(id)| id)
        .map_err(|_| AuthError::InvalidInput("Invalid identifier.".to_string()))
}

/// Creates an account with a system-generated temporary password and emails
/// it to the new user. The password is never returned in the response.
#[utoipa::path(
    post,
    path = "/admin/accounts",
    request_body = CreateAccountRequest,
    responses(
        (status = 201, description = "Account created", body = CreateAccountResponse),
        (status = 400, description = "Malformed email", body = ErrorEnvelope),
        (status = 403, description = "Not an admin or CSRF failure", body = ErrorEnvelope),
        (status = 409, description = "Email already registered", body = ErrorEnvelope)
    ),
    tag = "admin"
)]
pub async fn create_account(
    method: Method,
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Result<Json<CreateAccountRequest>, JsonRejection>,
) -> Result<Response, AuthError> {
    let principal = require_admin(&method, &headers, &auth_state).await?;
    let request = json_body(payload)?;
    let email = require_email(&request.email)?;
    let role = request.role.unwrap_or(Role::Standard);

    let temporary_password = generate_temporary_password();
    let password_hash = auth_state.hasher().hash(&temporary_password).await?;
    let now = auth_state.now();
    let account = auth_state
        .store()
        .insert_account(
            NewAccount {
                email,
                password_hash,
                role,
            },
            now,
        )
        .await?
        .ok_or(AuthError::AccountExists)?;

    auth_state
        .audit()
        .record(
            Some(principal.account.id),
            AuditAction::AccountCreated,
            account_resource(account.id),
            json!({"role": role.as_str()}),
        )
        .await;

    let login_url = format!(
        "{}/login",
        auth_state.config().frontend_base_url().trim_end_matches('/')
    );
    let credentials_sent = match auth_state.notifier().send(&credentials_message(
        &account.email,
        &temporary_password,
        &login_url,
    )) {
        Ok(()) => true,
        Err(err) => {
            error!(account_id = %account.id, "Failed to send account credentials: {err}");
            false
        }
    };

    info!(account_id = %account.id, role = role.as_str(), "Account created");
    Ok((
        StatusCode::CREATED,
        Json(CreateAccountResponse {
            account: AccountView::from(&account),
            credentials_sent,
        }),
    )
        .into_response())
}

/// Role changes take effect on the account's next request: any session
/// carrying the old role is revoked by the role consistency check.
/// Deactivation revokes every session immediately.
#[utoipa::path(
    patch,
    path = "/admin/accounts/{id}",
    params(("id" = Uuid, Path, description = "Account id")),
    request_body = UpdateAccountRequest,
    responses(
        (status = 200, description = "Account updated", body = AccountView),
        (status = 400, description = "Nothing to update", body = ErrorEnvelope),
        (status = 404, description = "Unknown account", body = ErrorEnvelope)
    ),
    tag = "admin"
)]
pub async fn update_account(
    method: Method,
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<UpdateAccountRequest>, JsonRejection>,
) -> Result<Response, AuthError> {
    let principal = require_admin(&method, &headers, &auth_state).await?;
    let id = path_id(path)?;
    let request = json_body(payload)?;
    if request.role.is_none() && request.status.is_none() {
        return Err(AuthError::InvalidInput(
            "Provide a role or status to update.".to_string(),
        ));
    }

    let now = auth_state.now();
    let account = auth_state
        .store()
        .update_account(
            id,
            AccountUpdate {
                role: request.role,
                status: request.status,
            },
            now,
        )
        .await?
        .ok_or(AuthError::NotFound)?;

    let sessions_revoked = if account.status == AccountStatus::Inactive {
        auth_state.sessions().revoke_all(account.id, now).await?
    } else {
        0
    };

    auth_state
        .audit()
        .record(
            Some(principal.account.id),
            AuditAction::AccountUpdated,
            account_resource(account.id),
            json!({
                "role": request.role.map(Role::as_str),
                "status": request.status.map(AccountStatus::as_str),
                "sessionsRevoked": sessions_revoked,
            }),
        )
        .await;

    Ok(Json(AccountView::from(&account)).into_response())
}

#[utoipa::path(
    post,
    path = "/admin/sessions/{id}/revoke",
    params(("id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 200, description = "Session revoked (or already revoked)", body = RevokeSessionResponse),
        (status = 404, description = "Unknown session", body = ErrorEnvelope)
    ),
    tag = "admin"
)]
pub async fn revoke_session(
    method: Method,
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Response, AuthError> {
    let principal = require_admin(&method, &headers, &auth_state).await?;
    let id = path_id(path)?;
    let session = auth_state
        .store()
        .find_session(id)
        .await?
        .ok_or(AuthError::NotFound)?;

    let now = auth_state.now();
    let revoked = auth_state.sessions().revoke(session.id, now).await?;
    if revoked {
        auth_state
            .audit()
            .record(
                Some(principal.account.id),
                AuditAction::SessionRevoked,
                session_resource(session.id),
                json!({"accountId": session.account_id}),
            )
            .await;
    }
    Ok(Json(RevokeSessionResponse { revoked }).into_response())
}

#[utoipa::path(
    get,
    path = "/admin/audit-events",
    params(AuditQuery),
    responses(
        (status = 200, description = "Newest events first", body = AuditEventsResponse),
        (status = 400, description = "Unknown action filter", body = ErrorEnvelope)
    ),
    tag = "admin"
)]
pub async fn list_audit_events(
    method: Method,
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    query: Result<Query<AuditQuery>, QueryRejection>,
) -> Result<Response, AuthError> {
    require_admin(&method, &headers, &auth_state).await?;
    let query = query_params(query)?;

    let mut filter = AuditFilter::new(query.limit.unwrap_or(DEFAULT_AUDIT_LIMIT));
    if let Some(action) = query.action.as_deref().filter(|value| !value.is_empty()) {
        let action = AuditAction::from_db(action)
            .ok_or_else(|| AuthError::InvalidInput(format!("Unknown audit action: {action}")))?;
        filter = filter.with_action(action);
    }
    let events = auth_state.audit().list(&filter).await?;
    Ok(Json(AuditEventsResponse { events }).into_response())
}
