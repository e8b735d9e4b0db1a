//! Error types for liveness store operations

use std::fmt;

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while talking to the liveness store
///
/// The bundled in-memory store is infallible, but the trait is written
/// for networked backends (Redis and friends) where every call can fail.
#[derive(Debug)]
pub enum StoreError {
    /// Store connection failed or was lost
    ConnectionFailed(String),

    /// A store command was rejected or errored
    OperationFailed(String),

    /// The expiry feed could not be subscribed
    SubscriptionFailed(String),

    /// I/O error (sockets, etc.)
    IoError(std::io::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::ConnectionFailed(msg) => {
                write!(f, "failed to connect to liveness store: {}", msg)
            }
            StoreError::OperationFailed(msg) => write!(f, "store operation failed: {}", msg),
            StoreError::SubscriptionFailed(msg) => {
                write!(f, "failed to subscribe to expiry feed: {}", msg)
            }
            StoreError::IoError(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::IoError(err)
    }
}
