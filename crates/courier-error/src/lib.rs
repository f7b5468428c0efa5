use axum::{http::StatusCode, response::IntoResponse};
use serde_json::json;
use thiserror::Error;

mod delivery;

pub use delivery::{DeadLetterReason, DeliveryError, Stage};

pub type AppResult<T> = Result<T, AppError>;

/// Errors surfaced at the ingress boundary.
///
/// Pipeline failures never reach the sender; they are classified by
/// [`DeliveryError`] and end up retried or dead-lettered instead.
#[derive(Error, Debug)]
pub enum AppError {
    // ===== Serialization Errors =====
    #[error("Serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),

    #[error("Deserialization error: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ===== Database & Storage Errors =====
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    // ===== Log Errors =====
    #[error("Log append failed: {0}")]
    LogUnavailable(String),

    // ===== Validation Errors =====
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown error: {0}")]
    Unknown(#[from] anyhow::Error),
}

impl AppError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::Json(_) | AppError::Deserialization(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::LogUnavailable(_) | AppError::Redis(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get a user-friendly error message (without sensitive details)
    pub fn user_message(&self) -> String {
        match self {
            AppError::Validation(msg) => format!("Validation error: {}", msg),
            AppError::Json(_) | AppError::Deserialization(_) => "Malformed request".to_string(),
            AppError::LogUnavailable(_) | AppError::Redis(_) => {
                "Message queue temporarily unavailable".to_string()
            }
            AppError::Database(_) => "Database error".to_string(),
            _ => "Internal server error".to_string(),
        }
    }

    /// Get error code for programmatic error handling
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Deserialization(_) | AppError::Json(_) => "MALFORMED_REQUEST",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Redis(_) => "REDIS_ERROR",
            AppError::LogUnavailable(_) => "LOG_UNAVAILABLE",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Unknown(_) => "UNKNOWN_ERROR",
        }
    }

    /// Log this error with appropriate level and context
    pub fn log(&self) {
        let status = self.status_code();
        let code = self.error_code();

        if status.is_server_error() {
            tracing::error!(
                error = %self,
                error_code = %code,
                status = %status.as_u16(),
                "Server error occurred"
            );
        } else {
            tracing::debug!(
                error = %self,
                error_code = %code,
                "Client error occurred"
            );
        }
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    /// Create a log-unavailable error
    pub fn log_unavailable(msg: impl Into<String>) -> Self {
        AppError::LogUnavailable(msg.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        self.log();

        let status = self.status_code();
        let error_code = self.error_code();

        let response_body = if status.is_server_error() {
            // For server errors, don't expose internal details to client
            json!({
                "error": "Internal server error",
                "error_code": error_code,
                "status": status.as_u16(),
            })
        } else {
            json!({
                "error": self.user_message(),
                "error_code": error_code,
                "status": status.as_u16(),
            })
        };

        (status, axum::Json(response_body)).into_response()
    }
}
