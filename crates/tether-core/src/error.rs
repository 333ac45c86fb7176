//! Pool errors.

use tether_transport::TransportError;
use thiserror::Error;

/// Errors raised by the pool and its connections.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Every connection is full; the request would exceed total capacity.
    #[error("Maximum topics limit has been reached (capacity: {capacity})")]
    CapacityExceeded {
        /// `max_connections * topics_limit`.
        capacity: usize,
    },

    /// Invalid pool configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The connection was stopped.
    #[error("Connection closed")]
    Closed,

    /// Transport failure on the live socket.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}
