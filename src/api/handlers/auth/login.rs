use axum::{
    Json,
    extract::{Extension, rejection::JsonRejection},
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{CACHE_CONTROL, SET_COOKIE},
    },
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::info;

use super::{
    AuthState,
    types::{LoginRequest, LoginResponse, UserView},
    utils::{ClientIp, json_body, require_email},
};
use crate::api::error::ErrorEnvelope;
use crate::security::{
    AuthError,
    credentials::ClientContext,
    rate_limit::{RateLimitAction, RateLimiter},
};

#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed in; access token set as HttpOnly cookie", body = LoginResponse),
        (status = 400, description = "Malformed email or body", body = ErrorEnvelope),
        (status = 401, description = "Invalid email or password", body = ErrorEnvelope),
        (status = 403, description = "Account locked or inactive", body = ErrorEnvelope),
        (status = 429, description = "Too many attempts", body = ErrorEnvelope)
    ),
    tag = "auth"
)]
pub async fn login(
    client_ip: ClientIp,
    auth_state: Extension<Arc<AuthState>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Response, AuthError> {
    let request = json_body(payload)?;
    let email = require_email(&request.email)?;
    if request.password.is_empty() {
        return Err(AuthError::InvalidInput("Password is required.".to_string()));
    }

    let now = auth_state.now();
    auth_state
        .rate_limiter()
        .check(
            RateLimitAction::Login,
            &RateLimiter::login_key(&email, client_ip.key()),
            now,
        )
        .await?;

    let client = ClientContext { ip: client_ip.0 };
    let success = auth_state
        .credentials()
        .authenticate(&email, &request.password, &client, now)
        .await?;

    info!(
        account_id = %success.account.id,
        session_id = %success.session.id,
        "Login succeeded"
    );

    let cookie = HeaderValue::from_str(&auth_state.tokens().cookie(&success.token))
        .map_err(|err| AuthError::Internal(anyhow::anyhow!("invalid cookie header: {err}")))?;
    let mut response_headers = HeaderMap::new();
    response_headers.insert(SET_COOKIE, cookie);
    response_headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));

    let body = LoginResponse {
        user: UserView::from(&success.account),
        expires_in: success.token.max_age_seconds,
    };
    Ok((StatusCode::OK, response_headers, Json(body)).into_response())
}
