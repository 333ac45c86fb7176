//! # tether-core
//!
//! A multiplexing pub/sub connection pool.
//!
//! The pool keeps a small, bounded set of long-lived sockets open to a
//! topic-delivery endpoint and spreads any number of topic subscriptions
//! across them:
//!
//! - **Pool** - Assigns topics to connections and consolidates them on removal
//! - **Connection** - One socket with keepalive, topic sync and reconnection
//! - **Backoff** - Unbounded exponential retry delays
//! - **Sync** - Shared single-slot value and level-triggered flags
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │    Pool     │────▶│ Connection  │────▶│  Connector  │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        │                   │
//!        ▼                   ▼
//! ┌─────────────┐     ┌─────────────┐
//! │  Job queue  │     │    Topic    │
//! └─────────────┘     └─────────────┘
//! ```
//!
//! Control flows from the pool down to the socket; inbound events flow back
//! up through the connection to each topic's handler.

pub mod backoff;
pub mod config;
pub mod connection;
pub mod error;
mod jobs;
mod keepalive;
pub mod metrics;
pub mod pool;
pub mod session;
pub mod sync;
pub mod topic;

#[cfg(test)]
mod testing;

pub use backoff::ExponentialBackoff;
pub use config::{BackoffConfig, PoolConfig};
pub use connection::{Connection, ConnectionState};
pub use error::PoolError;
pub use pool::{ConnectionSnapshot, Pool};
pub use session::{AuthProvider, LogStatus, NoopStatus, StaticToken, StatusSink};
pub use sync::{Flag, SharedSlot};
pub use topic::{topic_fn, FnTopic, HandlerError, Topic};
