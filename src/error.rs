use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    InvalidInput(String),
    Duplicate(String),
    CommentsDisabled(String),
    ConnectionFailed(String),
    DatabaseError(String),
    ConfigurationError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            AppError::Duplicate(msg) => write!(f, "Duplicate: {}", msg),
            AppError::CommentsDisabled(msg) => write!(f, "Comments disabled: {}", msg),
            AppError::ConnectionFailed(msg) => write!(f, "Connection failed: {}", msg),
            AppError::DatabaseError(msg) => write!(f, "Database error: {}", msg),
            AppError::ConfigurationError(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Duplicate(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::CommentsDisabled(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            AppError::ConnectionFailed(msg) => {
                tracing::error!("Connection failed: {}", msg);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Service unavailable".to_string(),
                )
            }
            AppError::DatabaseError(msg) => {
                tracing::error!("Database error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::ConfigurationError(msg) => {
                tracing::error!("Configuration error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => AppError::NotFound("entity not found".to_string()),
            sqlx::Error::PoolClosed => {
                AppError::ConnectionFailed("connection pool is closed".to_string())
            }
            sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
                AppError::ConnectionFailed(err.to_string())
            }
            sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
                // unique_violation: an insert collided on a primary key
                Some("23505") => AppError::Duplicate(db_err.message().to_string()),
                // foreign_key_violation: the referenced post/parent vanished
                Some("23503") => AppError::NotFound(db_err.message().to_string()),
                _ => AppError::DatabaseError(err.to_string()),
            },
            _ => AppError::DatabaseError(err.to_string()),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
