//! Error responses for the HTTP surface.
//!
//! Background pipelines never surface errors to callers; only the health and
//! dry-run endpoints turn failures into JSON bodies.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::automation::EngineError;

/// JSON error body
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    /// Machine-readable code (e.g., "INVALID_RULE", "DATABASE_ERROR")
    pub code: String,
    pub message: String,
    /// RFC 3339 timestamp
    pub timestamp: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Debug)]
pub enum AppError {
    InvalidRule(String),
    InternalError(String),
    DatabaseError(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRule(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::InternalError(_) | Self::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidRule(_) => "INVALID_RULE",
            Self::InternalError(_) => "INTERNAL_ERROR",
            Self::DatabaseError(_) => "DATABASE_ERROR",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::InvalidRule(msg) => msg.clone(),
            Self::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                "An internal error occurred".to_string()
            }
            Self::DatabaseError(msg) => {
                tracing::error!("Database error: {}", msg);
                "A database error occurred".to_string()
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error = ApiError::new(self.error_code(), self.message());
        (status, Json(error)).into_response()
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::InvalidRule { .. } => Self::InvalidRule(err.to_string()),
            EngineError::Repository(e) => Self::DatabaseError(e.to_string()),
            EngineError::Serialization(e) => Self::InternalError(e.to_string()),
        }
    }
}

pub type ApiResult<T> = Result<T, AppError>;
