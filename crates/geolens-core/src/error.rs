//! Error types for geolens.

use thiserror::Error;

/// Result type alias using geolens's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for geolens operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Target profile not found.
    ///
    /// Always a hard error: a missing profile is never substituted with a
    /// placeholder (a silent placeholder once shipped a corrupted report).
    #[error("Target profile not found: {0}")]
    ProfileNotFound(uuid::Uuid),

    /// Audit job not found
    #[error("Audit job not found: {0}")]
    JobNotFound(uuid::Uuid),

    /// Generation/inference call failed
    #[error("Inference error: {0}")]
    Inference(String),

    /// Provider rejected the request due to rate limiting
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Provider call timed out
    #[error("Timeout: {0}")]
    Timeout(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Metric or payload validation failed
    #[error("Validation error: {0}")]
    Validation(String),

    /// Job pipeline error
    #[error("Job error: {0}")]
    Job(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the error is transient and worth retrying with backoff.
    ///
    /// Only provider-side failures qualify; validation and persistence
    /// errors are never retried at the call site.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::RateLimited(_) | Error::Timeout(_) | Error::Request(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            Error::Timeout(e.to_string())
        } else {
            Error::Request(e.to_string())
        }
    }
}
