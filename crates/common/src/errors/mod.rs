//! Error types for IASP services
//!
//! Provides a single error taxonomy shared by the workflow and the services:
//! - Caller-correctable validation and submission-precondition errors
//! - Document assembly and registry (protocol) failures
//! - Infrastructure errors (database, storage, HTTP)
//! - HTTP status code mapping and structured error responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,

    // Authentication / authorization errors (2xxx)
    Unauthorized,
    ExpiredToken,
    Forbidden,

    // Submission preconditions (3xxx)
    NotEditable,
    BelowThreshold,
    PaymentMissing,

    // Resource errors (4xxx)
    NotFound,
    ReviewNotFound,

    // Conflict errors (5xxx)
    Conflict,
    DuplicateInsertion,

    // Database / storage errors (7xxx)
    DatabaseError,
    ConnectionError,
    StorageError,

    // External service errors (8xxx)
    AssemblyFailed,
    RegistryError,
    UpstreamError,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::ValidationError => 1001,

            ErrorCode::Unauthorized => 2001,
            ErrorCode::ExpiredToken => 2002,
            ErrorCode::Forbidden => 2003,

            ErrorCode::NotEditable => 3001,
            ErrorCode::BelowThreshold => 3002,
            ErrorCode::PaymentMissing => 3003,

            ErrorCode::NotFound => 4001,
            ErrorCode::ReviewNotFound => 4002,

            ErrorCode::Conflict => 5001,
            ErrorCode::DuplicateInsertion => 5002,

            ErrorCode::DatabaseError => 7001,
            ErrorCode::ConnectionError => 7002,
            ErrorCode::StorageError => 7003,

            ErrorCode::AssemblyFailed => 8001,
            ErrorCode::RegistryError => 8002,
            ErrorCode::UpstreamError => 8003,

            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    // Authentication / authorization
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("Token expired")]
    ExpiredToken,

    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    // Submission preconditions
    #[error("Application {application_id} can no longer be edited")]
    NotEditable { application_id: i64 },

    #[error("Declared credits {total} are below the call threshold {threshold}")]
    BelowThreshold { total: Decimal, threshold: Decimal },

    #[error("The payment receipt is required to submit application {application_id}")]
    PaymentMissing { application_id: i64 },

    // Resource errors
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound { resource_type: String, id: String },

    #[error("No commission review for {insertion}")]
    ReviewNotFound { insertion: String },

    // Conflict errors
    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Teaching {source_teaching_cod} already entered for {target}")]
    DuplicateInsertion {
        target: String,
        source_teaching_cod: String,
    },

    // Database / storage errors
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    #[error("Storage error on {path}: {message}")]
    Storage { path: String, message: String },

    // Document assembly and registry
    #[error("Document assembly failed for application {application_id}: {message}")]
    AssemblyFailed { application_id: i64, message: String },

    #[error("Registry error: {message}")]
    Registry { message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Shorthand for a validation error bound to a field
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        AppError::Validation {
            message: message.into(),
            field: Some(field.to_string()),
        }
    }

    /// Shorthand for a missing entity
    pub fn not_found(resource_type: &str, id: impl ToString) -> Self {
        AppError::NotFound {
            resource_type: resource_type.to_string(),
            id: id.to_string(),
        }
    }

    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::Unauthorized { .. } => ErrorCode::Unauthorized,
            AppError::ExpiredToken => ErrorCode::ExpiredToken,
            AppError::Forbidden { .. } => ErrorCode::Forbidden,
            AppError::NotEditable { .. } => ErrorCode::NotEditable,
            AppError::BelowThreshold { .. } => ErrorCode::BelowThreshold,
            AppError::PaymentMissing { .. } => ErrorCode::PaymentMissing,
            AppError::NotFound { .. } => ErrorCode::NotFound,
            AppError::ReviewNotFound { .. } => ErrorCode::ReviewNotFound,
            AppError::Conflict { .. } => ErrorCode::Conflict,
            AppError::DuplicateInsertion { .. } => ErrorCode::DuplicateInsertion,
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::DatabaseConnection { .. } => ErrorCode::ConnectionError,
            AppError::Storage { .. } => ErrorCode::StorageError,
            AppError::AssemblyFailed { .. } => ErrorCode::AssemblyFailed,
            AppError::Registry { .. } => ErrorCode::RegistryError,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,

            // 401 Unauthorized
            AppError::Unauthorized { .. } | AppError::ExpiredToken => StatusCode::UNAUTHORIZED,

            // 403 Forbidden
            AppError::Forbidden { .. } => StatusCode::FORBIDDEN,

            // 404 Not Found
            AppError::NotFound { .. } | AppError::ReviewNotFound { .. } => StatusCode::NOT_FOUND,

            // 409 Conflict
            AppError::Conflict { .. }
            | AppError::DuplicateInsertion { .. }
            | AppError::NotEditable { .. } => StatusCode::CONFLICT,

            // 422 Unprocessable: the request is well formed but the application is not ready
            AppError::BelowThreshold { .. } | AppError::PaymentMissing { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }

            // 500 Internal Server Error
            AppError::Database(_)
            | AppError::DatabaseConnection { .. }
            | AppError::Storage { .. }
            | AppError::AssemblyFailed { .. }
            | AppError::Internal { .. }
            | AppError::Configuration { .. }
            | AppError::Serialization(_)
            | AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::Registry { .. } | AppError::HttpClient(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Operational alerts are logged for operators and never shown to applicants
    pub fn is_operational_alert(&self) -> bool {
        matches!(self, AppError::Configuration { .. })
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        if self.is_server_error() {
            tracing::error!(
                error = %self,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %self,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        // Configuration problems are for operators only
        let message = if self.is_operational_alert() {
            "Service temporarily unavailable".to_string()
        } else {
            self.to_string()
        };

        let field = match &self {
            AppError::Validation { field, .. } => field.clone(),
            _ => None,
        };

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                message,
                field,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let err = AppError::ReviewNotFound {
            insertion: "required #4".into(),
        };
        assert_eq!(err.code(), ErrorCode::ReviewNotFound);
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_validation_error() {
        let err = AppError::validation("source_teaching_ssd", "Mandatory for Italian universities");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(!err.is_server_error());
        assert!(err.is_client_error());
    }

    #[test]
    fn test_submission_preconditions_are_client_errors() {
        let below = AppError::BelowThreshold {
            total: Decimal::from(12),
            threshold: Decimal::from(30),
        };
        assert_eq!(below.code().as_code(), 3002);
        assert!(below.is_client_error());

        let not_editable = AppError::NotEditable { application_id: 7 };
        assert_eq!(not_editable.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_configuration_is_operational_alert() {
        let err = AppError::Configuration {
            message: "missing registry configuration".into(),
        };
        assert!(err.is_server_error());
        assert!(err.is_operational_alert());
        assert!(!AppError::Registry { message: "down".into() }.is_operational_alert());
    }
}
