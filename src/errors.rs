use crate::services::storage_service::StorageError;
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

    /// Shortcut for 503 Service Unavailable
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, msg)
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

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        let status = match &err {
            StorageError::NotFound { .. } => StatusCode::NOT_FOUND,
            StorageError::InvalidKey { .. }
            | StorageError::InvalidExpiry(_)
            | StorageError::InvalidLength(_) => StatusCode::BAD_REQUEST,
            StorageError::Cancelled => StatusCode::REQUEST_TIMEOUT,
            StorageError::Unavailable { .. } => {
                tracing::error!(error = %err, "storage request failed");
                StatusCode::SERVICE_UNAVAILABLE
            }
        };
        AppError::new(status, err.to_string())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!(error = %err, "database request failed");
        AppError::unavailable(format!("database unavailable: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn storage_errors_map_to_http_status() {
        let cases = [
            (
                StorageError::NotFound { key: "a".into() },
                StatusCode::NOT_FOUND,
            ),
            (
                StorageError::InvalidKey {
                    key: String::new(),
                    reason: "must not be empty",
                },
                StatusCode::BAD_REQUEST,
            ),
            (
                StorageError::InvalidExpiry(Duration::ZERO),
                StatusCode::BAD_REQUEST,
            ),
            (StorageError::InvalidLength(u64::MAX), StatusCode::BAD_REQUEST),
            (StorageError::Cancelled, StatusCode::REQUEST_TIMEOUT),
            (
                StorageError::Unavailable {
                    operation: "head_object",
                    message: "connection refused".into(),
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(AppError::from(err).status, status);
        }
    }
}
