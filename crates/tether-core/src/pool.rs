//! The connection pool.
//!
//! Topics are packed greedily into connections in index order, each holding
//! at most `topics_limit`. Removing topics may free enough room to retire
//! connections from the tail; their topics are recycled and reassigned on the
//! pool's background job queue.

use futures_util::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tether_transport::Connector;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::connection::{Connection, ConnectionState, PoolContext};
use crate::error::PoolError;
use crate::jobs::{Job, JobQueue};
use crate::metrics;
use crate::session::{AuthProvider, StatusSink};
use crate::topic::Topic;

/// Point-in-time view of one pooled connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    /// Position in the pool.
    pub index: usize,
    /// Lifecycle state.
    pub state: ConnectionState,
    /// Assigned topic keys, sorted.
    pub topics: Vec<String>,
}

/// A bounded pool of connections sharing one topic space.
///
/// Cloning is cheap; clones share the same pool.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

pub(crate) struct PoolInner {
    ctx: Arc<PoolContext>,
    state: Mutex<PoolState>,
    running: AtomicBool,
    jobs: JobQueue,
}

#[derive(Default)]
struct PoolState {
    connections: Vec<Connection>,
    /// Topics taken off retired connections, waiting to be reassigned.
    recycled: HashMap<String, Arc<dyn Topic>>,
}

impl PoolState {
    fn holds(&self, key: &str) -> bool {
        self.recycled.contains_key(key) || self.connections.iter().any(|c| c.holds(key))
    }

    fn assigned(&self) -> usize {
        self.connections.iter().map(Connection::topic_count).sum()
    }

    fn held(&self) -> usize {
        self.assigned() + self.recycled.len()
    }
}

impl Pool {
    /// Create an empty, stopped pool.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidConfig`] if `config` fails validation.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime; the pool spawns its job
    /// worker immediately.
    pub fn new(
        config: PoolConfig,
        connector: Arc<dyn Connector>,
        auth: Arc<dyn AuthProvider>,
        status: Arc<dyn StatusSink>,
    ) -> Result<Self, PoolError> {
        config.validate()?;
        debug!(
            connector = connector.name(),
            endpoint = %config.endpoint,
            capacity = config.capacity(),
            "Creating pool"
        );

        let ctx = Arc::new(PoolContext {
            config,
            connector,
            auth,
            status,
        });
        let inner = Arc::new_cyclic(|weak| PoolInner {
            ctx,
            state: Mutex::new(PoolState::default()),
            running: AtomicBool::new(false),
            jobs: JobQueue::spawn(weak.clone()),
        });

        Ok(Self { inner })
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.ctx.config
    }

    /// Check whether the pool has been started and not stopped since.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Assign topics to connections, creating connections as needed.
    ///
    /// Topics whose key is already held by the pool are skipped. When the pool
    /// is running, newly created connections are started and this call waits
    /// for their first socket.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::CapacityExceeded`] if the new topics do not fit.
    /// Nothing is assigned in that case.
    pub async fn add_topics<I>(&self, topics: I) -> Result<(), PoolError>
    where
        I: IntoIterator<Item = Arc<dyn Topic>>,
    {
        let requested: HashMap<String, Arc<dyn Topic>> =
            topics.into_iter().map(|topic| (topic.key(), topic)).collect();

        let created = {
            let mut state = self.inner.state.lock().await;
            self.inner.assign(&mut state, requested)?
        };
        self.inner.start_created(created).await;
        Ok(())
    }

    /// Unassign topics by key and consolidate the pool.
    ///
    /// Returns before consolidation finishes: retired connections are stopped
    /// and recycled topics reassigned in the background. Use
    /// [`settled`](Self::settled) to wait for that work.
    pub async fn remove_topics<I, K>(&self, keys: I)
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let keys: HashSet<String> = keys.into_iter().map(Into::into).collect();
        let mut state = self.inner.state.lock().await;

        for connection in &state.connections {
            if connection.remove_topics(&keys) > 0 {
                connection.mark_topics_changed();
            }
        }
        state.recycled.retain(|key, _| !keys.contains(key));

        let limit = self.inner.ctx.config.topics_limit;
        let mut retired = Vec::new();
        while !state.connections.is_empty()
            && state.held() <= (state.connections.len() - 1) * limit
        {
            let Some(connection) = state.connections.pop() else {
                break;
            };
            connection.mark_retired();
            let topics = connection.drain_topics();
            debug!(
                connection = connection.index(),
                recycled = topics.len(),
                "Retiring connection"
            );
            state.recycled.extend(topics);
            retired.push(connection);
        }

        // Reassign before closing, so recycled topics are not left unsubscribed
        // while retired sockets shut down.
        if !state.recycled.is_empty() {
            self.inner.jobs.push(Job::Redistribute);
        }
        if !retired.is_empty() {
            info!(
                retired = retired.len(),
                remaining = state.connections.len(),
                "Consolidating pool"
            );
        }
        metrics::set_pooled(state.connections.len(), state.held());

        for connection in retired {
            self.inner.jobs.push(Job::Retire(connection));
        }
    }

    /// Start every connection and wait until each has a socket.
    pub async fn start(&self) {
        self.inner.running.store(true, Ordering::SeqCst);
        let connections = self.inner.state.lock().await.connections.clone();
        info!(connections = connections.len(), "Starting pool");
        join_all(connections.iter().map(Connection::start)).await;
    }

    /// Stop every connection.
    ///
    /// With `clear_topics`, each connection's status row is removed as well.
    /// Topic assignments are kept, so a later [`start`](Self::start) resumes
    /// the same subscriptions.
    pub async fn stop(&self, clear_topics: bool) {
        self.inner.running.store(false, Ordering::SeqCst);
        let connections = self.inner.state.lock().await.connections.clone();
        info!(connections = connections.len(), "Stopping pool");
        join_all(connections.iter().map(|c| c.stop(clear_topics))).await;
    }

    /// Wait until all background consolidation work has finished.
    pub async fn settled(&self) {
        self.inner.jobs.settled().await;
    }

    /// Number of background jobs queued or running.
    #[must_use]
    pub fn pending_jobs(&self) -> usize {
        self.inner.jobs.pending()
    }

    /// Number of pooled connections.
    pub async fn connection_count(&self) -> usize {
        self.inner.state.lock().await.connections.len()
    }

    /// Number of topics held, including recycled topics not yet reassigned.
    pub async fn topic_count(&self) -> usize {
        self.inner.state.lock().await.held()
    }

    /// Handles to the pooled connections, in index order.
    pub async fn connections(&self) -> Vec<Connection> {
        self.inner.state.lock().await.connections.clone()
    }

    /// Describe every pooled connection.
    pub async fn snapshot(&self) -> Vec<ConnectionSnapshot> {
        let state = self.inner.state.lock().await;
        state
            .connections
            .iter()
            .map(|c| ConnectionSnapshot {
                index: c.index(),
                state: c.state(),
                topics: c.topic_keys(),
            })
            .collect()
    }
}

impl PoolInner {
    /// Pack `requested` into the pool. Returns connections created on the way.
    fn assign(
        &self,
        state: &mut PoolState,
        requested: HashMap<String, Arc<dyn Topic>>,
    ) -> Result<Vec<Connection>, PoolError> {
        let config = &self.ctx.config;

        let mut pending: Vec<(String, Arc<dyn Topic>)> = requested
            .into_iter()
            .filter(|(key, _)| !state.holds(key))
            .collect();
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        let free = config.capacity().saturating_sub(state.held());
        if pending.len() > free {
            warn!(
                requested = pending.len(),
                free,
                "Maximum topics limit has been reached"
            );
            return Err(PoolError::CapacityExceeded {
                capacity: config.capacity(),
            });
        }

        // Lowest keys first, so assignment is stable for a given request.
        pending.sort_by(|a, b| b.0.cmp(&a.0));

        let mut created = Vec::new();
        for index in 0..config.max_connections {
            if index == state.connections.len() {
                let connection = Connection::new(index, Arc::clone(&self.ctx));
                state.connections.push(connection.clone());
                created.push(connection);
            }

            let connection = &state.connections[index];
            let room = config.topics_limit.saturating_sub(connection.topic_count());
            let take = room.min(pending.len());
            if take == 0 {
                continue;
            }

            for (key, topic) in pending.drain(pending.len() - take..) {
                connection.insert_topic(key, topic);
            }
            connection.mark_topics_changed();
            debug!(connection = index, assigned = take, "Assigned topics");

            if pending.is_empty() {
                break;
            }
        }

        metrics::set_pooled(state.connections.len(), state.held());
        Ok(created)
    }

    /// Start freshly created connections if the pool is running.
    async fn start_created(&self, created: Vec<Connection>) {
        if created.is_empty() || !self.running.load(Ordering::SeqCst) {
            return;
        }

        // Consolidation may have retired some of them since they were created.
        let created: Vec<Connection> = {
            let state = self.state.lock().await;
            created
                .into_iter()
                .filter(|c| state.connections.iter().any(|pooled| pooled.same(c)))
                .collect()
        };
        if created.is_empty() {
            return;
        }
        info!(count = created.len(), "Starting new connections");
        join_all(created.iter().map(Connection::start)).await;
    }

    /// Stop a connection taken off the pool.
    pub(crate) async fn retire(&self, connection: Connection) {
        let index = connection.index();
        connection.stop(false).await;

        // A replacement may already occupy the same index.
        let state = self.state.lock().await;
        if !state.connections.iter().any(|c| c.index() == index) {
            self.ctx.status.remove(index);
        }
        debug!(connection = index, "Connection retired");
    }

    /// Reassign every recycled topic.
    pub(crate) async fn redistribute(&self) -> Result<(), PoolError> {
        let created = {
            let mut state = self.state.lock().await;
            let recycled = std::mem::take(&mut state.recycled);
            if recycled.is_empty() {
                return Ok(());
            }
            debug!(count = recycled.len(), "Redistributing recycled topics");
            self.assign(&mut state, recycled)?
        };
        self.start_created(created).await;
        Ok(())
    }
}
