use crate::services::error::FileError;
use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<FileError> for AppError {
    fn from(err: FileError) -> Self {
        let status = match &err {
            FileError::NotFound(_) => StatusCode::NOT_FOUND,
            FileError::AlreadyDeleted(_) | FileError::StoredNameTaken(_) => StatusCode::CONFLICT,
            FileError::EmptyOrExhaustedSource | FileError::InvalidName(_) => {
                StatusCode::BAD_REQUEST
            }
            FileError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            FileError::Partial { .. } | FileError::Sqlx(_) | FileError::Io(_) => {
                tracing::error!("request failed: {}", err);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        AppError::new(status, err.to_string())
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError::new(err.status(), err.body_text())
    }
}
