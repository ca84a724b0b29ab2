//! Per-request authentication.
//!
//! Order for every protected route:
//! 1. state-changing methods must carry `X-CSRF-Token` (checked first)
//! 2. access cookie signature and expiry
//! 3. session lookup, which also stamps activity
//! 4. role consistency between the token claim and the account row
//! 5. CSRF token compared against the session's stored hash

use axum::http::{HeaderMap, Method};

use super::{AuthState, utils::extract_access_token};
use crate::security::{
    Account, AuthError, Role, Session,
    csrf::{is_state_changing, require_header},
};

#[derive(Debug)]
pub struct Principal {
    pub account: Account,
    pub session: Session,
}

/// # Errors
/// `csrf_token_missing`, `unauthenticated`, `session_invalidated` or
/// `csrf_token_invalid`.
pub(crate) async fn require_auth(
    method: &Method,
    headers: &HeaderMap,
    auth_state: &AuthState,
) -> Result<Principal, AuthError> {
    let csrf = if is_state_changing(method) {
        Some(require_header(headers)?)
    } else {
        None
    };

    let token = extract_access_token(headers).ok_or(AuthError::Unauthenticated)?;
    let now = auth_state.now();
    let claims = auth_state.tokens().validate(&token, now)?;
    let session = auth_state.sessions().touch(&claims, now).await?;
    let account = auth_state.role_guard().check(&claims, &session, now).await?;

    if let Some(presented) = csrf {
        auth_state.csrf().verify(&session, presented)?;
    }

    Ok(Principal { account, session })
}

/// # Errors
/// As [`require_auth`], plus `forbidden` for non-admin accounts.
pub(crate) async fn require_admin(
    method: &Method,
    headers: &HeaderMap,
    auth_state: &AuthState,
) -> Result<Principal, AuthError> {
    let principal = require_auth(method, headers, auth_state).await?;
    if principal.account.role != Role::Admin {
        return Err(AuthError::Forbidden);
    }
    Ok(principal)
}
