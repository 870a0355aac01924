use crate::services::{
    object_store::StoreError, retrieval::RetrievalError, session_store::SessionError,
    upload_service::UploadError,
};
use axum::{
    Json,
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

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, msg)
    }

    pub fn bad_gateway(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, msg)
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
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, "{}", self.message);
        }

        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound(_) => AppError::not_found(err.to_string()),
            SessionError::OutOfOrder { .. } | SessionError::InvalidTransition { .. } => {
                AppError::conflict(err.to_string())
            }
            SessionError::Io(_) => AppError::internal(format!("Chunk processing failed: {}", err)),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => AppError::not_found(err.to_string()),
            StoreError::AlreadyExists(_) => AppError::conflict(err.to_string()),
            StoreError::InvalidPathname(_) => AppError::bad_request(err.to_string()),
            StoreError::Unavailable(_) | StoreError::Http(_) => {
                AppError::bad_gateway(err.to_string())
            }
            StoreError::Sqlx(_) | StoreError::Io(_) => AppError::internal(err.to_string()),
        }
    }
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::InvalidRequest(msg) => AppError::bad_request(msg),
            UploadError::Session(err) => err.into(),
            UploadError::Store(err) => {
                AppError::internal(format!("Chunk processing failed: {}", err))
            }
        }
    }
}

impl From<RetrievalError> for AppError {
    fn from(err: RetrievalError) -> Self {
        match err {
            RetrievalError::NotFound => AppError::not_found("File not found"),
            RetrievalError::InvalidName(_) => AppError::bad_request(err.to_string()),
            RetrievalError::UnexpectedStatus(_) => AppError::bad_gateway(err.to_string()),
            RetrievalError::Store(StoreError::NotFound(_)) => AppError::not_found("File not found"),
            RetrievalError::Store(err) => AppError::bad_gateway(err.to_string()),
        }
    }
}
