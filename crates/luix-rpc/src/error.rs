//! Error types for RPC invocation

use crate::message::RemoteError;
use std::sync::Arc;
use thiserror::Error;

/// RPC error type
///
/// Errors are cloneable because a completed [`ResponseFuture`] hands the
/// same failure to every waiter and listener.
///
/// [`ResponseFuture`]: crate::future::ResponseFuture
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Fatal configuration problem, including incompatible shared channels
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A requester or server never became usable
    #[error("Initialization error: {0}")]
    Initialization(String),

    /// No response arrived in time
    #[error("Request {request_id} timed out after {elapsed_ms}ms")]
    Timeout {
        /// Id of the timed out request
        request_id: u64,
        /// Time waited before giving up
        elapsed_ms: u64,
    },

    /// Business exception raised by the remote method
    #[error("Remote error: {0}")]
    Remote(RemoteError),

    /// Connection or transport failure
    #[error("Network error: {0}")]
    Network(String),

    /// No live provider to send the request to
    #[error("No provider available: {0}")]
    NoProvider(String),

    /// Request cancelled before completion
    #[error("Request {0} was cancelled")]
    Cancelled(u64),

    /// Call refused by the consumer's rate limiter
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Inbound frame or body could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Outbound message could not be encoded
    #[error("Encode error: {0}")]
    Encode(String),

    /// Registry failure
    #[error("Registry error: {0}")]
    Registry(Arc<luix_registry::Error>),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    Json(Arc<serde_json::Error>),
}

impl Error {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a network error
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    /// Whether a fault-tolerance strategy may retry after this error
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network(_)
                | Self::Timeout { .. }
                | Self::Remote(_)
                | Self::NoProvider(_)
                | Self::Io(_)
        )
    }
}

impl From<luix_registry::Error> for Error {
    fn from(error: luix_registry::Error) -> Self {
        match error {
            luix_registry::Error::Configuration(message) => Self::Configuration(message),
            other => Self::Registry(Arc::new(other)),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Self::Io(Arc::new(error))
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Self::Json(Arc::new(error))
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::network("reset").is_transient());
        assert!(
            Error::Timeout {
                request_id: 1,
                elapsed_ms: 100
            }
            .is_transient()
        );
        assert!(Error::Remote(RemoteError::new("Boom", "failed")).is_transient());
        assert!(!Error::configuration("bad").is_transient());
        assert!(!Error::Initialization("never connected".into()).is_transient());
        assert!(!Error::Cancelled(7).is_transient());
        assert!(!Error::RateLimited("com.foo.Svc".into()).is_transient());
        assert!(!Error::Decode("magic".into()).is_transient());
    }

    #[test]
    fn test_registry_configuration_errors_stay_configuration() {
        let error: Error = luix_registry::Error::configuration("unknown strategy").into();
        assert!(matches!(error, Error::Configuration(_)));

        let error: Error = luix_registry::Error::backend("down").into();
        assert!(matches!(error, Error::Registry(_)));
    }
}
