//! Error types for the application

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using our ReconcileError
pub type Result<T> = std::result::Result<T, ReconcileError>;

/// Main error type for reconciliation operations
#[derive(Error, Debug)]
pub enum ReconcileError {
    /// File system errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON parsing error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// HTTP request errors
    #[error("HTTP request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// Order store errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Authentication errors
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Rate limiting errors
    #[error("Rate limit exceeded: {message}, retry after {retry_after_seconds:?} seconds")]
    RateLimit {
        message: String,
        retry_after_seconds: Option<u64>,
    },

    /// Invalid API response
    #[error("Invalid API response: {0}")]
    InvalidResponse(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A decision file that cannot be trusted as a whole
    #[error("Malformed decision file {}: {}", .path.display(), .reason)]
    MalformedDecisionFile { path: PathBuf, reason: String },

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReconcileError {
    pub fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        ReconcileError::MalformedDecisionFile {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
