//! JSON error envelope: `{"error": {"code", "message", "details"}}`.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::error;
use utoipa::ToSchema;

use crate::security::AuthError;

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    pub details: Vec<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[must_use]
pub const fn status_for(err: &AuthError) -> StatusCode {
    match err {
        AuthError::InvalidInput(_) | AuthError::PasswordRequirementsNotMet(_) => {
            StatusCode::BAD_REQUEST
        }
        AuthError::InvalidCredentials
        | AuthError::Unauthenticated
        | AuthError::SessionInvalidated
        | AuthError::InvalidToken
        | AuthError::TokenExpired
        | AuthError::TokenUsed => StatusCode::UNAUTHORIZED,
        AuthError::AccountLocked { .. }
        | AuthError::AccountInactive
        | AuthError::Forbidden
        | AuthError::CsrfTokenMissing
        | AuthError::CsrfTokenInvalid => StatusCode::FORBIDDEN,
        AuthError::NotFound => StatusCode::NOT_FOUND,
        AuthError::AccountExists => StatusCode::CONFLICT,
        AuthError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        let body = if let Self::Internal(err) = &self {
            error!("Internal error: {err:#}");
            ErrorBody {
                code: self.code().to_string(),
                message: "Internal server error.".to_string(),
                details: Vec::new(),
            }
        } else {
            ErrorBody {
                code: self.code().to_string(),
                message: self.to_string(),
                details: self.details(),
            }
        };

        let retry_after = match &self {
            Self::RateLimited {
                retry_after_seconds,
            }
            | Self::AccountLocked {
                retry_after_seconds,
                ..
            } => Some(*retry_after_seconds),
            _ => None,
        };

        let mut response = (status, Json(ErrorEnvelope { error: body })).into_response();
        if let Some(seconds) = retry_after {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(seconds));
        }
        response
    }
}
