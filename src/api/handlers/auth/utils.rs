//! Small helpers for request parsing in auth handlers.

use axum::{
    Json,
    extract::{
        ConnectInfo, FromRequestParts, Query,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{HeaderMap, header::COOKIE, request::Parts},
};
use regex::Regex;
use std::{
    convert::Infallible,
    net::{IpAddr, SocketAddr},
    sync::Arc,
};
use tracing::debug;

use super::AuthState;
use crate::security::{AuthError, tokens::ACCESS_COOKIE_NAME};

/// Rate-limit key component used when the client address is unknown.
pub(crate) const UNKNOWN_CLIENT_IP: &str = "unknown";

/// Normalize an email for lookup/uniqueness checks.
pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
pub(crate) fn valid_email(email_normalized: &str) -> bool {
    email_normalized.len() <= 254
        && Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$")
            .is_ok_and(|regex| regex.is_match(email_normalized))
}

/// Normalize and validate in one step.
pub(crate) fn require_email(email: &str) -> Result<String, AuthError> {
    let normalized = normalize_email(email);
    if valid_email(&normalized) {
        Ok(normalized)
    } else {
        Err(AuthError::InvalidInput("A valid email is required.".to_string()))
    }
}

/// Unwrap a JSON body, turning axum's rejection into our error envelope.
pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AuthError> {
    payload.map(|Json(body)| body).map_err(|rejection| {
        debug!("Rejected request body: {rejection}");
        AuthError::InvalidInput("Request body is missing or malformed.".to_string())
    })
}

/// Unwrap query parameters, turning axum's rejection into our error envelope.
pub(crate) fn query_params<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, AuthError> {
    query.map(|Query(params)| params).map_err(|rejection| {
        debug!("Rejected query string: {rejection}");
        AuthError::InvalidInput("Query parameters are malformed.".to_string())
    })
}

/// Client address used as the rate-limit identity.
///
/// The socket peer is authoritative. Forwarded headers are only read when the
/// service is configured to run behind a trusted proxy.
#[derive(Clone, Debug, Default)]
pub struct ClientIp(pub Option<String>);

impl ClientIp {
    #[must_use]
    pub fn key(&self) -> &str {
        self.0.as_deref().unwrap_or(UNKNOWN_CLIENT_IP)
    }
}

impl<S: Send + Sync> FromRequestParts<S> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0.ip());
        let trust_proxy_headers = parts
            .extensions
            .get::<Arc<AuthState>>()
            .is_some_and(|state| state.config().trust_proxy_headers());
        Ok(Self(
            resolve_client_ip(&parts.headers, peer, trust_proxy_headers).map(|ip| ip.to_string()),
        ))
    }
}

/// Pick the client address from the peer, or from proxy headers when trusted.
///
/// Behind a trusted proxy the right-most `X-Forwarded-For` hop is the one the
/// proxy appended; anything to its left is client-controlled.
pub(crate) fn resolve_client_ip(
    headers: &HeaderMap,
    peer: Option<IpAddr>,
    trust_proxy_headers: bool,
) -> Option<IpAddr> {
    if trust_proxy_headers && let Some(ip) = forwarded_ip(headers) {
        return Some(ip);
    }
    peer
}

fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    let header_ip = |name: &str, pick_last: bool| {
        let value = headers.get(name)?.to_str().ok()?;
        let mut hops = value.split(',').map(str::trim).filter(|hop| !hop.is_empty());
        let hop = if pick_last { hops.next_back() } else { hops.next() }?;
        hop.parse::<IpAddr>().ok()
    };
    header_ip("x-forwarded-for", true).or_else(|| header_ip("x-real-ip", false))
}

/// The access token from the `ci_access_token` cookie, if any.
pub(crate) fn extract_access_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|header| header.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| {
            let (key, val) = pair.trim().split_once('=')?;
            (key.trim() == ACCESS_COOKIE_NAME).then(|| val.trim().to_string())
        })
        .find(|token| !token.is_empty())
}
