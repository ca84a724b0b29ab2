use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, HeaderValue, Method, header::CACHE_CONTROL},
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use super::{AuthState, principal::require_auth};
use crate::api::error::ErrorEnvelope;
use crate::security::{AuthError, csrf::CsrfToken};

/// Rotates the session's CSRF token; the previous one stops working.
#[utoipa::path(
    get,
    path = "/auth/csrf",
    responses(
        (status = 200, description = "Token to echo in the X-CSRF-Token header", body = CsrfToken),
        (status = 401, description = "No valid session", body = ErrorEnvelope)
    ),
    tag = "auth"
)]
pub async fn csrf_token(
    method: Method,
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<Response, AuthError> {
    let principal = require_auth(&method, &headers, &auth_state).await?;
    let token = auth_state
        .csrf()
        .issue(&principal.session, auth_state.now())
        .await?;
    let mut response = Json(token).into_response();
    response
        .headers_mut()
        .insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    Ok(response)
}
