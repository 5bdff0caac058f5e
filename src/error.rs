use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Allowlist-specific failures, surfaced verbatim to the Admin API as 400s.
#[derive(Debug, thiserror::Error)]
pub enum AllowlistError {
    #[error("phone number {0} is already assigned to a ring")]
    AlreadyAssigned(String),
    #[error("invalid phone number: {0}")]
    InvalidNumber(String),
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

/// Failures talking to the upstream gateway. The client itself never
/// retries; callers (the reconciler, the supervisor, the `/send` route)
/// decide what to do with these.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("request to gateway failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("gateway returned unexpected status {status}: {body}")]
    UnexpectedStatus {
        status: StatusCode,
        body: String,
    },
}

/// A one-line, client-safe error used at the HTTP edge. Wraps any internal
/// error type and renders compact JSON (Admin API) without ever leaking a
/// backtrace or internal error chain to the caller.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<AllowlistError> for AppError {
    fn from(err: AllowlistError) -> Self {
        match err {
            AllowlistError::AlreadyAssigned(_) | AllowlistError::InvalidNumber(_) => {
                AppError::new(StatusCode::BAD_REQUEST, err.to_string())
            }
            AllowlistError::Storage(_) => {
                tracing::error!("allowlist storage error: {err:#}");
                AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "storage error")
            }
        }
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        tracing::error!("gateway error: {err:#}");
        AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "gateway error")
    }
}
