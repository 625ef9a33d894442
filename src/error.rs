// src/error.rs

//! Unified error handling for the tracker.

use std::fmt;

use thiserror::Error;

/// Result type alias for tracker operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// AWS S3 error
    #[error("S3 error: {0}")]
    S3(String),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Document store error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Record not found in the document store
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Carrier API returned something unusable
    #[error("Carrier error for {carrier}: {message}")]
    Carrier { carrier: String, message: String },

    /// External call exceeded its deadline
    #[error("{context} timed out after {secs}s")]
    Timeout { context: String, secs: u64 },

    /// Notification transport failure
    #[error("Notification error: {0}")]
    Notify(String),
}

impl AppError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a storage error.
    pub fn storage(message: impl fmt::Display) -> Self {
        Self::Storage(message.to_string())
    }

    /// Create a not-found error for a record kind.
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Create a carrier error with context.
    pub fn carrier(carrier: impl fmt::Display, message: impl fmt::Display) -> Self {
        Self::Carrier {
            carrier: carrier.to_string(),
            message: message.to_string(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(context: impl Into<String>, secs: u64) -> Self {
        Self::Timeout {
            context: context.into(),
            secs,
        }
    }

    /// Create a notification error.
    pub fn notify(message: impl fmt::Display) -> Self {
        Self::Notify(message.to_string())
    }

    /// Whether the failure is transient and worth retrying on the next cycle.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Io(_) | Self::S3(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_transient() {
        assert!(AppError::timeout("maersk MSKU1234567", 10).is_transient());
        assert!(!AppError::validation("bad").is_transient());
    }

    #[test]
    fn test_display_includes_context() {
        let err = AppError::carrier("hmm", "unexpected payload");
        assert_eq!(err.to_string(), "Carrier error for hmm: unexpected payload");

        let err = AppError::not_found("shipment", "s-1");
        assert_eq!(err.to_string(), "shipment not found: s-1");
    }
}
