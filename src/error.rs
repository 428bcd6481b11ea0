//! Error types for the recommendation engine
//!
//! - `thiserror` for the domain error definitions
//! - Variants grouped by the layer that raises them
//! - HTTP status code mapping for API responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::borrow::Cow;
use thiserror::Error;

use crate::recommendation::algorithm::Algorithm;
use crate::recommendation::model::BatchId;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the recommendation engine
#[derive(Debug, Error)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    #[error("Configuration error: {message}")]
    Config {
        message: Cow<'static, str>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Missing required environment variable: {var}")]
    MissingEnvVar { var: &'static str },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidConfig {
        key: &'static str,
        message: Cow<'static, str>,
    },

    // ========================================================================
    // Database Errors
    // ========================================================================
    #[error("Database error: {message}")]
    Database {
        message: Cow<'static, str>,
        #[source]
        source: Option<sqlx::Error>,
    },

    #[error("Database connection pool exhausted")]
    PoolExhausted,

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound {
        entity_type: &'static str,
        id: String,
    },

    #[error("Constraint violation: {message}")]
    ConstraintViolation { message: Cow<'static, str> },

    #[error("Migration error: {0}")]
    Migration(String),

    // ========================================================================
    // Recommendation Errors
    // ========================================================================
    #[error("Unknown recommendation algorithm: {name}")]
    InvalidAlgorithm { name: String },

    #[error("top_n must be between 1 and {max}, got {value}")]
    InvalidTopN { value: usize, max: usize },

    #[error("A {algorithm} batch is already being generated")]
    BatchInProgress { algorithm: Algorithm },

    #[error("Batch generation failed for {algorithm} (failed batch {failed_batch_id:?})")]
    BatchGenerationFailed {
        algorithm: Algorithm,
        failed_batch_id: Option<BatchId>,
        #[source]
        source: Box<Error>,
    },

    // ========================================================================
    // API Errors
    // ========================================================================
    #[error("Bad request: {message}")]
    BadRequest { message: Cow<'static, str> },

    #[error("Unauthorized: {message}")]
    Unauthorized { message: Cow<'static, str> },

    #[error("Internal server error")]
    Internal {
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    // ========================================================================
    // Serialization Errors
    // ========================================================================
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid data format: {message}")]
    InvalidFormat { message: Cow<'static, str> },
}

impl Error {
    /// Create a database error
    pub fn database(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Database {
            message: message.into(),
            source: None,
        }
    }

    /// Create a bad request error
    pub fn bad_request(message: impl Into<Cow<'static, str>>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    /// Create an invalid data format error
    pub fn invalid_format(message: impl Into<Cow<'static, str>>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Internal {
            source: Some(Box::new(source)),
        }
    }

    // ========================================================================
    // Error Classification
    // ========================================================================

    /// Returns true if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Database { .. } | Error::PoolExhausted)
    }

    /// Returns true if this error should be logged at error level
    pub fn is_error_level(&self) -> bool {
        matches!(
            self,
            Error::Database { .. }
                | Error::Internal { .. }
                | Error::Migration(_)
                | Error::BatchGenerationFailed { .. }
        )
    }

    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::BadRequest { .. }
            | Error::InvalidFormat { .. }
            | Error::InvalidAlgorithm { .. }
            | Error::InvalidTopN { .. } => StatusCode::BAD_REQUEST,
            Error::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::BatchInProgress { .. } => StatusCode::CONFLICT,
            Error::PoolExhausted => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Config { .. } | Error::MissingEnvVar { .. } | Error::InvalidConfig { .. } => {
                "CONFIG_ERROR"
            }
            Error::Database { .. }
            | Error::PoolExhausted
            | Error::ConstraintViolation { .. }
            | Error::Migration(_) => "DATABASE_ERROR",
            Error::NotFound { .. } => "NOT_FOUND",
            Error::InvalidAlgorithm { .. } => "INVALID_ALGORITHM",
            Error::InvalidTopN { .. } | Error::BadRequest { .. } => "BAD_REQUEST",
            Error::BatchInProgress { .. } => "BATCH_IN_PROGRESS",
            Error::BatchGenerationFailed { .. } => "BATCH_GENERATION_FAILED",
            Error::Unauthorized { .. } => "UNAUTHORIZED",
            Error::Json(_) | Error::InvalidFormat { .. } => "SERIALIZATION_ERROR",
            Error::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}

// ============================================================================
// Error Response for API
// ============================================================================

/// API error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_batch_id: Option<BatchId>,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();

        if self.is_error_level() {
            tracing::error!(code, error = ?self, "Request failed");
        }

        let failed_batch_id = match &self {
            Error::BatchGenerationFailed {
                failed_batch_id, ..
            } => *failed_batch_id,
            _ => None,
        };

        // Internal details stay in the logs
        let message = match &self {
            Error::BatchGenerationFailed { .. } => self.to_string(),
            _ if status == StatusCode::INTERNAL_SERVER_ERROR => {
                "An internal error occurred".to_string()
            }
            _ => self.to_string(),
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code,
                message,
                failed_batch_id,
            },
        };

        (status, Json(body)).into_response()
    }
}

// ============================================================================
// From implementations for external error types
// ============================================================================

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Error::NotFound {
                entity_type: "record",
                id: "unknown".to_string(),
            },
            sqlx::Error::PoolTimedOut => Error::PoolExhausted,
            sqlx::Error::Database(db_err) => {
                if let Some(constraint) = db_err.constraint() {
                    return Error::ConstraintViolation {
                        message: format!("Constraint '{}' violated", constraint).into(),
                    };
                }
                Error::Database {
                    message: db_err.message().to_string().into(),
                    source: Some(err),
                }
            }
            _ => Error::Database {
                message: err.to_string().into(),
                source: Some(err),
            },
        }
    }
}

impl From<sqlx::migrate::MigrateError> for Error {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Error::Migration(err.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::internal(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        assert!(Error::PoolExhausted.is_retryable());
        assert!(Error::database("connection reset").is_retryable());
        assert!(!Error::InvalidAlgorithm {
            name: "bogus".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            Error::InvalidAlgorithm {
                name: "bogus".to_string()
            }
            .status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::InvalidTopN { value: 0, max: 100 }.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::BatchInProgress {
                algorithm: Algorithm::Hybrid
            }
            .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            Error::Internal { source: None }.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_batch_failure_keeps_source() {
        let err = Error::BatchGenerationFailed {
            algorithm: Algorithm::Collaborative,
            failed_batch_id: Some(7),
            source: Box::new(Error::database("insert failed")),
        };
        assert_eq!(err.error_code(), "BATCH_GENERATION_FAILED");
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("Database error: insert failed"));
    }
}
