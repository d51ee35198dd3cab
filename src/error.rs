use std::time::Duration;
use thiserror::Error;

/// Rejected pool configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("max_connections must be greater than 0")]
    ZeroMaxConnections,
    #[error("min_connections ({min}) cannot exceed max_connections ({max})")]
    MinExceedsMax { min: u64, max: u64 },
    #[error("batch_size must be greater than 0")]
    ZeroBatchSize,
}

/// Errors returned by [`Pool`](crate::Pool) operations.
///
/// `E` is the backend error type of the [`Manager`](crate::Manager).
#[derive(Debug, Error)]
pub enum PoolError<E> {
    /// The backend refused or failed to open a connection.
    #[error("failed to open backend connection: {0}")]
    Connect(E),
    /// No idle connection, no spare capacity and no allocation in flight.
    ///
    /// Normal saturation waits instead, so this signals broken accounting.
    #[error("pool exhausted: no idle connection and no capacity left")]
    Exhausted,
    /// The caller's deadline passed while waiting for a connection.
    #[error("pool exhausted: no connection available within {0:?}")]
    Timeout(Duration),
    #[error("connection request cancelled")]
    Cancelled,
    #[error("pool is closed")]
    Closed,
    #[error("invalid pool configuration: {0}")]
    Config(#[from] ConfigError),
}

impl<E> PoolError<E> {
    /// Returns the backend error if this is a connection failure
    pub fn backend(&self) -> Option<&E> {
        match self {
            PoolError::Connect(e) => Some(e),
            _ => None,
        }
    }
}
