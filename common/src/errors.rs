//! Application error types.
//!
//! Every failure inside the federation layer is one of these variants. The
//! HTTP boundary turns them into the `{success: false, error}` envelope via
//! [`IntoResponse`], so no error ever escapes unformatted.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::response::ApiResponse;

/// Result alias used across all crates.
pub type AppResult<T> = Result<T, AppError>;

/// Error taxonomy of the federation layer.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Backend-required connection fields are missing.
    #[error("{0}")]
    Configuration(String),

    /// The requested backend `type` is unknown or not implemented.
    #[error("Unsupported database type: {0}")]
    UnsupportedBackend(String),

    /// A referenced file, table, collection, label or saved connection is missing.
    #[error("{0}")]
    NotFound(String),

    /// Native driver failure; the driver message is preserved verbatim.
    #[error("{0}")]
    BackendExecution(String),

    /// Malformed source content (flat files).
    #[error("{0}")]
    Format(String),

    /// Malformed request body.
    #[error("{0}")]
    Validation(String),

    /// Anything else.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Wraps a native driver error, keeping its message as-is.
    pub fn backend(err: impl std::fmt::Display) -> Self {
        AppError::BackendExecution(err.to_string())
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
            AppError::UnsupportedBackend(_) => "UNSUPPORTED_BACKEND",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::BackendExecution(_) => "BACKEND_EXECUTION_ERROR",
            AppError::Format(_) => "FORMAT_ERROR",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status used when the error crosses the HTTP boundary.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Configuration(_)
            | AppError::UnsupportedBackend(_)
            | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Format(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::BackendExecution(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            AppError::Internal(_) | AppError::BackendExecution(_) => {
                tracing::error!(code = self.code(), error = %self, "请求失败");
            }
            _ => tracing::debug!(code = self.code(), error = %self, "请求被拒绝"),
        }
        (status, Json(ApiResponse::from_error(&self))).into_response()
    }
}
