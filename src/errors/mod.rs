//! Error handling module for Vine Helper core.
//!
//! Provides a single error type shared by the storage, list, settings and
//! announcement layers. Not-found conditions are never errors; they are
//! reported as `bool` or `Option` by the operations themselves.

use serde::{Deserialize, Serialize};

/// Error codes as constants to avoid stringly-typed errors.
pub mod codes {
    pub const CONFIGURATION_ERROR: &str = "CONFIGURATION_ERROR";
    pub const PATH_ERROR: &str = "PATH_ERROR";
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    pub const STORAGE_ERROR: &str = "STORAGE_ERROR";
    pub const QUOTA_EXCEEDED: &str = "QUOTA_EXCEEDED";
    pub const HTTP_ERROR: &str = "HTTP_ERROR";
    pub const SERIALIZATION_ERROR: &str = "SERIALIZATION_ERROR";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

/// Application error type.
#[derive(Debug, Clone, PartialEq)]
pub enum AppError {
    /// Programmer error: missing sort policy, unknown factory name, ...
    Configuration(String),
    /// Dot-path traversal through a non-object or a missing prefix
    Path(String),
    /// A settings object that no longer matches its schema
    Validation(String),
    /// Durable storage failure
    Storage(String),
    /// A durable write would exceed the storage quota
    QuotaExceeded { bytes_in_use: u64, quota_bytes: u64 },
    /// Transport failure talking to an external endpoint
    Http(String),
    /// JSON (de)serialization failure
    Serialization(String),
    /// Internal error
    Internal(String),
}

impl AppError {
    /// Get the error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Configuration(_) => codes::CONFIGURATION_ERROR,
            AppError::Path(_) => codes::PATH_ERROR,
            AppError::Validation(_) => codes::VALIDATION_ERROR,
            AppError::Storage(_) => codes::STORAGE_ERROR,
            AppError::QuotaExceeded { .. } => codes::QUOTA_EXCEEDED,
            AppError::Http(_) => codes::HTTP_ERROR,
            AppError::Serialization(_) => codes::SERIALIZATION_ERROR,
            AppError::Internal(_) => codes::INTERNAL_ERROR,
        }
    }

    /// Get the error message.
    pub fn message(&self) -> String {
        match self {
            AppError::Configuration(msg) => msg.clone(),
            AppError::Path(msg) => msg.clone(),
            AppError::Validation(msg) => msg.clone(),
            AppError::Storage(msg) => msg.clone(),
            AppError::QuotaExceeded {
                bytes_in_use,
                quota_bytes,
            } => format!(
                "Storage quota exceeded: {} bytes in use, quota is {} bytes",
                bytes_in_use, quota_bytes
            ),
            AppError::Http(msg) => msg.clone(),
            AppError::Serialization(msg) => msg.clone(),
            AppError::Internal(msg) => msg.clone(),
        }
    }

    /// Whether this error is the storage layer refusing a write for lack of space.
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, AppError::QuotaExceeded { .. })
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error_code(), self.message())
    }
}

impl std::error::Error for AppError {}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Database error: {:?}", err);
        AppError::Storage(format!("Database error: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        tracing::error!("JSON error: {:?}", err);
        AppError::Serialization(format!("JSON error: {}", err))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        tracing::warn!("HTTP error: {:?}", err);
        AppError::Http(format!("HTTP error: {}", err))
    }
}

/// Result alias used throughout the crate.
pub type AppResult<T> = Result<T, AppError>;

/// Serializable error summary, handed to notification collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
}

impl From<&AppError> for ErrorDetails {
    fn from(error: &AppError) -> Self {
        Self {
            code: error.error_code().to_string(),
            message: error.message(),
        }
    }
}
