use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, HeaderValue, Method, StatusCode, header::SET_COOKIE},
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::sync::Arc;

use super::{
    AuthState,
    principal::require_auth,
    types::{MessageResponse, UserView},
    utils::extract_access_token,
};
use crate::api::error::ErrorEnvelope;
use crate::security::{
    AuthError,
    audit::{AuditAction, session_resource},
    csrf::require_header,
};

#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 200, description = "Session revoked and cookie cleared", body = MessageResponse),
        (status = 403, description = "CSRF token missing or invalid", body = ErrorEnvelope)
    ),
    tag = "auth"
)]
pub async fn logout(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<Response, AuthError> {
    let now = auth_state.now();

    // Without a live session there is nothing to protect; just clear the cookie.
    if let Some(token) = extract_access_token(&headers)
        && let Ok(claims) = auth_state.tokens().validate(&token, now)
    {
        match auth_state.sessions().touch(&claims, now).await {
            Ok(session) => {
                let presented = require_header(&headers)?;
                match auth_state.role_guard().check(&claims, &session, now).await {
                    Ok(_) => {
                        auth_state.csrf().verify(&session, presented)?;
                        if auth_state.sessions().revoke(session.id, now).await? {
                            auth_state
                                .audit()
                                .record(
                                    Some(claims.sub),
                                    AuditAction::Logout,
                                    session_resource(session.id),
                                    json!({}),
                                )
                                .await;
                        }
                    }
                    // The guard has already revoked the session and recorded why.
                    Err(AuthError::SessionInvalidated | AuthError::Unauthenticated) => {}
                    Err(err) => return Err(err),
                }
            }
            Err(AuthError::Unauthenticated) => {}
            Err(err) => return Err(err),
        }
    }

    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = HeaderValue::from_str(&auth_state.tokens().clear_cookie()) {
        response_headers.insert(SET_COOKIE, cookie);
    }
    Ok((
        StatusCode::OK,
        response_headers,
        Json(MessageResponse::new("Signed out.")),
    )
        .into_response())
}

#[utoipa::path(
    get,
    path = "/auth/me",
    responses(
        (status = 200, description = "Current identity", body = UserView),
        (status = 401, description = "No valid session", body = ErrorEnvelope)
    ),
    tag = "auth"
)]
pub async fn me(
    method: Method,
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<Response, AuthError> {
    let principal = require_auth(&method, &headers, &auth_state).await?;
    Ok(Json(UserView::from(&principal.account)).into_response())
}
