//! Error types for the quantization job core.
//!
//! Launch-time failures surface synchronously from `submit`; everything that
//! happens after the child is running is reported through the job snapshot
//! (`status()` / `result()` / `error()`) instead of being thrown.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for quantization job operations.
#[derive(Debug, Error)]
pub enum QuantError {
    /// The child process could not be spawned. The job never left IDLE.
    #[error("Failed to launch quantization run: {message}")]
    Launch { message: String },

    /// A job is already RUNNING; only one job per service at a time.
    #[error("A quantization job is already running")]
    JobAlreadyRunning,

    /// I/O failure while reading the child's output stream.
    #[error("Error reading job output: {message}")]
    Stream { message: String },

    /// The forceful kill after the grace period could not be delivered.
    #[error("Failed to kill process group {pgid}: {message}")]
    KillFailed { pgid: u32, message: String },

    /// Operation cancelled before it could complete.
    #[error("Operation was cancelled")]
    Cancelled,

    // Configuration errors
    #[error("Invalid job configuration for {field}: {message}")]
    Validation { field: String, message: String },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for quantization job operations.
pub type Result<T> = std::result::Result<T, QuantError>;

impl From<std::io::Error> for QuantError {
    fn from(err: std::io::Error) -> Self {
        QuantError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for QuantError {
    fn from(err: serde_json::Error) -> Self {
        QuantError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl QuantError {
    /// Create an IO error with operation and path context.
    pub fn io(message: impl Into<String>, path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        QuantError::Io {
            message: message.into(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create a validation error for a named config field.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        QuantError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Whether the caller can retry after the current job settles.
    pub fn is_retryable(&self) -> bool {
        matches!(self, QuantError::JobAlreadyRunning)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = QuantError::Launch {
            message: "no such file".into(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to launch quantization run: no such file"
        );
    }

    #[test]
    fn test_validation_helper() {
        let err = QuantError::validation("w_bit", "must be one of 2, 3, 4, 5, 8");
        assert!(err.to_string().contains("w_bit"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_retryable() {
        assert!(QuantError::JobAlreadyRunning.is_retryable());
        assert!(!QuantError::Cancelled.is_retryable());
    }
}
