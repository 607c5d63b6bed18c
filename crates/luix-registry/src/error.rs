//! Error types for the registry

use thiserror::Error;

/// Registry error type
#[derive(Error, Debug)]
pub enum Error {
    /// Fatal configuration problem (missing property, unknown strategy,
    /// unclassifiable URL)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Backend transport failure
    #[error("Registry backend error: {0}")]
    Backend(String),

    /// URL text could not be parsed
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Node does not exist in a tree backend
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// Node already exists in a tree backend
    #[error("Node already exists: {0}")]
    NodeExists(String),

    /// Notification task dropped because the worker queue is full
    #[error("Notification rejected: {0}")]
    NotificationRejected(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization error
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a backend error
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
