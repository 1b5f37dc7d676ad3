//! API error handling

use axum::{
    extract::multipart::{MultipartError, MultipartRejection},
    extract::rejection::{FormRejection, QueryRejection},
    extract::ws::rejection::WebSocketUpgradeRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::error::CodetainerError;
use crate::models::ErrorResponse;

/// API error types
#[derive(Debug, Error)]
pub enum ApiError {
    /// Request could not be decoded
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Codetainer(#[from] CodetainerError),

    /// Attach request that cannot be upgraded to a WebSocket
    #[error("WebSocket upgrade failed: {message}")]
    UpgradeFailed { status: StatusCode, message: String },
}

fn status_for(err: &CodetainerError) -> StatusCode {
    match err {
        CodetainerError::Validation(_) => StatusCode::BAD_REQUEST,
        CodetainerError::NotFound(_) => StatusCode::NOT_FOUND,
        CodetainerError::Conflict(_) | CodetainerError::NotAttached(_) => StatusCode::CONFLICT,
        CodetainerError::Runtime(_) | CodetainerError::Transport(_) => StatusCode::BAD_GATEWAY,
        CodetainerError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        CodetainerError::ExecFailure(_) | CodetainerError::Parse(_) | CodetainerError::Storage(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            ApiError::Codetainer(err) => (status_for(err), err.kind(), err.to_string()),
            ApiError::UpgradeFailed { status, message } => (*status, "UPGRADE_FAILED", message.clone()),
        };

        if status.is_server_error() {
            tracing::warn!(error = %message, code = error_code, "Request failed");
        }

        let body = Json(ErrorResponse::new(error_code, message));
        (status, body).into_response()
    }
}

impl From<WebSocketUpgradeRejection> for ApiError {
    fn from(rejection: WebSocketUpgradeRejection) -> Self {
        ApiError::UpgradeFailed {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl From<FormRejection> for ApiError {
    fn from(rejection: FormRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        ApiError::BadRequest(err.body_text())
    }
}
