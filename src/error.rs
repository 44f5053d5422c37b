// src/error.rs

//! Unified error handling for the watcher.

use std::fmt;
use std::path::Path;

use thiserror::Error;

/// Result type alias for watcher operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
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

    /// CSS selector parsing failed
    #[error("Invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// A source could not be fetched
    #[error("Fetch error for {source_id}: {message}")]
    Fetch { source_id: String, message: String },

    /// A source did not finish within its time budget
    #[error("Fetch of {source_id} timed out after {secs}s")]
    Timeout { source_id: String, secs: u64 },

    /// A storage primitive refused or failed
    #[error("Storage error at {path}: {message}")]
    Storage { path: String, message: String },

    /// Accepted/candidate state violates the promotion protocol
    #[error("Reconciliation fault for {source_id}: {message}")]
    Reconciliation { source_id: String, message: String },

    /// The notification sink rejected a message
    #[error("Notification error: {0}")]
    Notification(String),
}

impl AppError {
    /// Create a selector parsing error.
    pub fn selector(selector: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Selector {
            selector: selector.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a fetch error for a source.
    pub fn fetch(source: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Fetch {
            source_id: source.into(),
            message: message.to_string(),
        }
    }

    /// Create a storage error for a path.
    pub fn storage(path: impl AsRef<Path>, message: impl fmt::Display) -> Self {
        Self::Storage {
            path: path.as_ref().display().to_string(),
            message: message.to_string(),
        }
    }

    /// Create a reconciliation fault for a source.
    pub fn reconciliation(source: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Reconciliation {
            source_id: source.into(),
            message: message.to_string(),
        }
    }

    /// Whether this error signals a broken invariant rather than a transient failure.
    pub fn is_fault(&self) -> bool {
        matches!(self, Self::Reconciliation { .. })
    }
}
