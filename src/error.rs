use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Request-scoped failure taxonomy. Everything is recovered at the request
/// boundary and surfaced as a JSON error body; there is no retry policy, the
/// caller corrects the input and resubmits.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("unsupported file format: .{0}")]
    UnsupportedFormat(String),
    #[error("failed to decode file: no encoding in the priority list produced a clean decode")]
    DecodeFailure,
    #[error("failed to parse {format} content: {message}")]
    ParseFailure {
        format: &'static str,
        message: String,
    },
    #[error("{0}")]
    Usage(String),
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn parse(format: &'static str, err: impl std::fmt::Display) -> Self {
        Self::ParseFailure {
            format,
            message: err.to_string(),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::UnsupportedFormat(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            AppError::DecodeFailure | AppError::ParseFailure { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AppError::Usage(_) | AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Io(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("request failed: {self}");
        }
        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
