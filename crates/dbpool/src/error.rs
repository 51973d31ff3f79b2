//! Pool error types.

use std::time::Duration;

use thiserror::Error;

/// Errors returned by pool operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// The pool is at capacity and no connection was freed within the wait budget.
    #[error("connection pool exhausted: no connection available after {waited:?}")]
    PoolExhausted {
        /// How long the caller was blocked before giving up.
        waited: Duration,
    },

    /// The factory failed to open or validate a connection.
    #[error("failed to open connection: {0}")]
    OpenError(String),

    /// The pool has been shut down.
    #[error("connection pool is closed")]
    PoolClosed,

    /// The pool configuration was rejected.
    #[error("invalid pool configuration: {0}")]
    Config(String),
}

impl PoolError {
    /// Check if the caller may reasonably retry the acquisition.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::PoolExhausted { .. } | Self::OpenError(_))
    }
}

impl From<ConnectError> for PoolError {
    fn from(err: ConnectError) -> Self {
        Self::OpenError(err.to_string())
    }
}

/// Error reported by a [`ConnectionFactory`](crate::ConnectionFactory).
///
/// The pool only needs the message; the source is kept for callers that log
/// the full chain.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ConnectError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ConnectError {
    /// Create an error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Create an error wrapping an underlying driver error.
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// The error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}
