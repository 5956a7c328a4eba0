//! 统一的 API 错误类型与转换。

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

use crate::auth::AuthError;
use crate::vault::VaultError;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    PayloadTooLarge(String),
    Internal(String),
    ServiceUnavailable(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            ApiError::BadRequest(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::Forbidden(msg)
            | ApiError::NotFound(msg)
            | ApiError::PayloadTooLarge(msg)
            | ApiError::Internal(msg)
            | ApiError::ServiceUnavailable(msg) => msg,
        };
        if status.is_server_error() {
            error!(status = status.as_u16(), message, "request failed");
        }
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<VaultError> for ApiError {
    fn from(error: VaultError) -> Self {
        match error {
            VaultError::InvalidInput(msg) => ApiError::BadRequest(msg),
            err @ VaultError::InvalidFolderId(_) => ApiError::BadRequest(err.to_string()),
            err @ VaultError::NotFound(_) => ApiError::NotFound(err.to_string()),
            err @ VaultError::ForbiddenScope(_) => ApiError::Forbidden(err.to_string()),
            err @ VaultError::UpstreamUnavailable(_) => {
                ApiError::ServiceUnavailable(err.to_string())
            }
            err @ VaultError::Upstream(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(error: AuthError) -> Self {
        match error {
            err @ AuthError::MissingCredential => ApiError::Unauthorized(err.to_string()),
            err @ AuthError::InvalidToken(_) => ApiError::Forbidden(err.to_string()),
            err @ AuthError::Unavailable(_) => ApiError::ServiceUnavailable(err.to_string()),
        }
    }
}
