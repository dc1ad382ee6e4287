use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Line/column of a syntax node in the submitted SQL text (1-based)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Position {
    pub line: u64,
    pub column: u64,
}

impl Position {
    pub fn new(line: u64, column: u64) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

/// Application error types
#[derive(Debug, Clone, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid SQL: {0}")]
    InvalidSql(String),

    /// Syntax outside the supported dialect
    #[error("{message} at {position}")]
    Unsupported { message: String, position: Position },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Sampling an external source failed
    #[error("Resolution error: {0}")]
    Resolution(String),

    /// Client-facing failure of a running job, tagged with the member that produced it
    #[error("Execution error on member {member_id}: {message}")]
    Execution { member_id: Uuid, message: String },

    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// Positioned "`<name>` is not supported" diagnostic
    pub fn unsupported(name: impl fmt::Display, position: Position) -> Self {
        AppError::Unsupported {
            message: format!("`{}` is not supported", name),
            position,
        }
    }

    /// Convert into the error a client sees from a result iterator.
    /// Errors that already carry a member identity keep it.
    pub fn into_public(self, member_id: Uuid) -> Self {
        match self {
            err @ AppError::Execution { .. } => err,
            other => AppError::Execution {
                member_id,
                message: other.to_string(),
            },
        }
    }
}

/// Error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorDetail {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_detail) = match self {
            AppError::Database(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail::new("DATABASE_ERROR", msg),
            ),
            AppError::InvalidSql(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorDetail::new("INVALID_SQL", msg),
            ),
            AppError::Unsupported { message, position } => (
                StatusCode::BAD_REQUEST,
                ErrorDetail::new("UNSUPPORTED_SQL", message).with_details(position.to_string()),
            ),
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorDetail::new("VALIDATION_ERROR", msg),
            ),
            AppError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                ErrorDetail::new("NOT_FOUND", msg),
            ),
            AppError::AlreadyExists(msg) => (
                StatusCode::CONFLICT,
                ErrorDetail::new("ALREADY_EXISTS", msg),
            ),
            AppError::Resolution(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorDetail::new("RESOLUTION_ERROR", msg),
            ),
            AppError::Execution { member_id, message } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail::new("EXECUTION_ERROR", message)
                    .with_details(format!("member {}", member_id)),
            ),
            AppError::IllegalState(msg) => (
                StatusCode::CONFLICT,
                ErrorDetail::new("ILLEGAL_STATE", msg),
            ),
            AppError::NotImplemented(msg) => (
                StatusCode::NOT_IMPLEMENTED,
                ErrorDetail::new("NOT_IMPLEMENTED", msg),
            ),
            AppError::Io(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail::new("IO_ERROR", msg),
            ),
            AppError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail::new("INTERNAL_ERROR", msg),
            ),
        };

        let body = Json(ErrorResponse {
            error: error_detail,
        });

        (status, body).into_response()
    }
}

/// Convert anyhow::Error to AppError
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Convert rusqlite::Error to AppError
impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        AppError::Database(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err.to_string())
    }
}

impl From<sqlparser::parser::ParserError> for AppError {
    fn from(err: sqlparser::parser::ParserError) -> Self {
        AppError::InvalidSql(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(format!("JSON error: {}", err))
    }
}

impl From<apache_avro::Error> for AppError {
    fn from(err: apache_avro::Error) -> Self {
        AppError::Internal(format!("Avro error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_format() {
        let error = AppError::NotFound("Mapping does not exist: orders".to_string());
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_unsupported_is_bad_request() {
        let error = AppError::unsupported("LIMIT", Position::new(1, 23));
        assert!(error.to_string().contains("`LIMIT` is not supported"));
        assert!(error.to_string().contains("line 1, column 23"));
        assert_eq!(error.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_error_detail_creation() {
        let detail = ErrorDetail::new("TEST_CODE", "Test message");
        assert_eq!(detail.code, "TEST_CODE");
        assert_eq!(detail.message, "Test message");
        assert!(detail.details.is_none());
    }

    #[test]
    fn test_into_public_wraps_once() {
        let member = Uuid::new_v4();
        let other_member = Uuid::new_v4();

        let wrapped = AppError::Internal("boom".to_string()).into_public(member);
        match &wrapped {
            AppError::Execution { member_id, message } => {
                assert_eq!(*member_id, member);
                assert!(message.contains("boom"));
            }
            other => panic!("unexpected error: {:?}", other),
        }

        // Already public errors keep their original member
        match wrapped.into_public(other_member) {
            AppError::Execution { member_id, .. } => assert_eq!(member_id, member),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
