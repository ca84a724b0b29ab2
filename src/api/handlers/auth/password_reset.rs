//! Forgot / validate / reset flow.
//!
//! `forgot-password` answers the same fixed message whether or not the email
//! belongs to an account. Token issuance and delivery run on a spawned task so
//! the response time does not depend on the lookup outcome.

use axum::{
    Json,
    extract::{
        Extension, Query,
        rejection::{JsonRejection, QueryRejection},
    },
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{Instrument, error, info, info_span};

use super::{
    AuthState,
    types::{
        ForgotPasswordRequest, MessageResponse, ResetPasswordRequest, ValidateResetQuery,
        ValidateResetResponse,
    },
    utils::{ClientIp, json_body, query_params, require_email},
};
use crate::api::error::ErrorEnvelope;
use crate::notify::{build_reset_url, reset_message};
use crate::security::{
    AuthError,
    rate_limit::{RateLimitAction, RateLimiter},
};

pub(crate) const FORGOT_PASSWORD_MESSAGE: &str =
    "If an account exists for that email, a password reset link has been sent.";

#[utoipa::path(
    post,
    path = "/auth/forgot-password",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 200, description = "Request accepted", body = MessageResponse),
        (status = 400, description = "Malformed email", body = ErrorEnvelope),
        (status = 429, description = "Too many requests", body = ErrorEnvelope)
    ),
    tag = "auth"
)]
pub async fn forgot_password(
    client_ip: ClientIp,
    auth_state: Extension<Arc<AuthState>>,
    payload: Result<Json<ForgotPasswordRequest>, JsonRejection>,
) -> Result<Response, AuthError> {
    let request = json_body(payload)?;
    let email = require_email(&request.email)?;

    let now = auth_state.now();
    auth_state
        .rate_limiter()
        .check(
            RateLimitAction::ForgotPassword,
            &RateLimiter::forgot_password_key(client_ip.key()),
            now,
        )
        .await?;

    let state = auth_state.0.clone();
    tokio::spawn(
        async move {
            if let Err(err) = deliver_reset(&state, &email).await {
                error!("Password reset delivery failed: {err}");
            }
        }
        .instrument(info_span!("auth.reset.deliver")),
    );

    Ok(Json(MessageResponse::new(FORGOT_PASSWORD_MESSAGE)).into_response())
}

async fn deliver_reset(auth_state: &AuthState, email: &str) -> Result<(), AuthError> {
    let Some(issued) = auth_state.resets().request(email, auth_state.now()).await? else {
        return Ok(());
    };
    let reset_url = build_reset_url(auth_state.config().frontend_base_url(), &issued.token)?;
    auth_state.notifier().send(&reset_message(
        &issued.account.email,
        &reset_url,
        issued.expires_at,
    ))?;
    info!(account_id = %issued.account.id, "Password reset link dispatched");
    Ok(())
}

#[utoipa::path(
    get,
    path = "/auth/reset-password/validate",
    params(ValidateResetQuery),
    responses(
        (status = 200, description = "Token is usable", body = ValidateResetResponse),
        (status = 401, description = "invalid_token, token_expired or token_used", body = ErrorEnvelope)
    ),
    tag = "auth"
)]
pub async fn validate_reset_token(
    auth_state: Extension<Arc<AuthState>>,
    query: Result<Query<ValidateResetQuery>, QueryRejection>,
) -> Result<Response, AuthError> {
    let query = query_params(query)?;
    let token = auth_state
        .resets()
        .validate(&query.token, auth_state.now())
        .await?;
    Ok(Json(ValidateResetResponse {
        valid: true,
        expires_at: token.expires_at,
    })
    .into_response())
}

#[utoipa::path(
    post,
    path = "/auth/reset-password",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password changed; all sessions revoked", body = MessageResponse),
        (status = 400, description = "Password does not meet requirements", body = ErrorEnvelope),
        (status = 401, description = "invalid_token, token_expired or token_used", body = ErrorEnvelope),
        (status = 403, description = "Account inactive", body = ErrorEnvelope)
    ),
    tag = "auth"
)]
pub async fn reset_password(
    auth_state: Extension<Arc<AuthState>>,
    payload: Result<Json<ResetPasswordRequest>, JsonRejection>,
) -> Result<Response, AuthError> {
    let request = json_body(payload)?;
    let completed = auth_state
        .resets()
        .consume(&request.token, &request.new_password, auth_state.now())
        .await?;
    info!(
        account_id = %completed.account_id,
        sessions_revoked = completed.sessions_revoked,
        "Password reset completed"
    );
    Ok(Json(MessageResponse::new("Password has been reset. Please sign in.")).into_response())
}
