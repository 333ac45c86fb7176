//! Collaborators the pool depends on but does not implement.
//!
//! Authentication and status display belong to the surrounding application;
//! the pool only waits for a credential and reports what its connections do.

use async_trait::async_trait;
use tracing::info;

use crate::connection::ConnectionState;

/// Source of the bearer credential sent with LISTEN and UNLISTEN.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Wait until the owning session is logged in.
    async fn wait_until_authenticated(&self);

    /// The current bearer token. May change over the pool's lifetime.
    async fn access_token(&self) -> String;
}

/// A fixed token that is always considered authenticated.
#[derive(Debug, Clone)]
pub struct StaticToken {
    token: String,
}

impl StaticToken {
    /// Create a provider returning `token`.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl AuthProvider for StaticToken {
    async fn wait_until_authenticated(&self) {}

    async fn access_token(&self) -> String {
        self.token.clone()
    }
}

/// Receives per-connection status for display.
pub trait StatusSink: Send + Sync {
    /// Update the row for connection `index`. `None` fields are unchanged.
    fn update(&self, index: usize, state: Option<ConnectionState>, topics: Option<usize>);

    /// Remove the row for connection `index`.
    fn remove(&self, index: usize);
}

/// Discards all status updates.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStatus;

impl StatusSink for NoopStatus {
    fn update(&self, _index: usize, _state: Option<ConnectionState>, _topics: Option<usize>) {}

    fn remove(&self, _index: usize) {}
}

/// Reports status updates as log records.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogStatus;

impl StatusSink for LogStatus {
    fn update(&self, index: usize, state: Option<ConnectionState>, topics: Option<usize>) {
        match (state, topics) {
            (Some(state), Some(topics)) => info!(connection = index, %state, topics, "Status"),
            (Some(state), None) => info!(connection = index, %state, "Status"),
            (None, Some(topics)) => info!(connection = index, topics, "Status"),
            (None, None) => {}
        }
    }

    fn remove(&self, index: usize) {
        info!(connection = index, "Connection removed");
    }
}
