//! A single pooled connection.
//!
//! Each connection owns one socket at a time and a background handling loop
//! that connects with backoff, keeps the socket alive, reconciles the topic
//! subscriptions with the endpoint, and dispatches inbound messages. The loop
//! reconnects indefinitely until [`Connection::stop`] is called.

use dashmap::{DashMap, DashSet};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tether_protocol::{codec, Frame};
use tether_transport::{Connector, Socket, TransportError};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, timeout, Instant};
use tracing::{debug, info, info_span, trace, warn, Instrument, Span};

use crate::backoff::ExponentialBackoff;
use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::keepalive::{Keepalive, KeepaliveAction};
use crate::metrics;
use crate::session::{AuthProvider, StatusSink};
use crate::sync::{Flag, SharedSlot};
use crate::topic::Topic;

/// Lifecycle state of a connection, as reported for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No socket.
    Disconnected,
    /// Waiting for the session to authenticate.
    Initializing,
    /// Opening a socket, or waiting out a backoff delay.
    Connecting,
    /// Socket open; keepalive and topic sync running.
    Connected,
    /// Stopped explicitly. Terminal until started again.
    Closed,
}

impl ConnectionState {
    /// Lower-case name for display.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Initializing => "initializing",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a connection borrows from its pool.
pub(crate) struct PoolContext {
    pub(crate) config: PoolConfig,
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) auth: Arc<dyn AuthProvider>,
    pub(crate) status: Arc<dyn StatusSink>,
}

/// Why a live session ended without an error.
enum SessionEnd {
    Closed,
    Reconnect,
}

/// A handle to one pooled connection. Cloning is cheap.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

struct Inner {
    index: usize,
    ctx: Arc<PoolContext>,
    topics: DashMap<String, Arc<dyn Topic>>,
    submitted: DashSet<String>,
    socket: SharedSlot<Arc<dyn Socket>>,
    state: watch::Sender<ConnectionState>,
    closed: Flag,
    reconnect_requested: Flag,
    topics_changed: Flag,
    /// Set once the pool has let go of this connection; `start` is refused.
    retired: AtomicBool,
    /// Serializes `start` and `stop`; holds the handling loop.
    task: Mutex<Option<JoinHandle<()>>>,
    span: Span,
}

impl Connection {
    pub(crate) fn new(index: usize, ctx: Arc<PoolContext>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        ctx.status
            .update(index, Some(ConnectionState::Disconnected), Some(0));

        Self {
            inner: Arc::new(Inner {
                index,
                ctx,
                topics: DashMap::new(),
                submitted: DashSet::new(),
                socket: SharedSlot::new(),
                state,
                closed: Flag::new(),
                reconnect_requested: Flag::new(),
                topics_changed: Flag::new(),
                retired: AtomicBool::new(false),
                task: Mutex::new(None),
                span: info_span!("connection", index),
            }),
        }
    }

    /// Position of this connection in the pool.
    #[must_use]
    pub fn index(&self) -> usize {
        self.inner.index
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Subscribe to state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Number of topics assigned to this connection.
    #[must_use]
    pub fn topic_count(&self) -> usize {
        self.inner.topics.len()
    }

    /// Keys of the topics assigned to this connection, sorted.
    #[must_use]
    pub fn topic_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.topics.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Topics the endpoint has been asked to deliver on the current socket.
    #[must_use]
    pub fn submitted_topics(&self) -> HashSet<String> {
        self.inner.submitted.iter().map(|k| k.key().clone()).collect()
    }

    /// Check whether `key` is assigned to this connection.
    #[must_use]
    pub fn holds(&self, key: &str) -> bool {
        self.inner.topics.contains_key(key)
    }

    pub(crate) fn insert_topic(&self, key: String, topic: Arc<dyn Topic>) {
        self.inner.topics.insert(key, topic);
    }

    /// Remove the given keys, returning how many were assigned here.
    pub(crate) fn remove_topics(&self, keys: &HashSet<String>) -> usize {
        keys.iter()
            .filter(|key| self.inner.topics.remove(key.as_str()).is_some())
            .count()
    }

    /// Take every assigned topic out of this connection.
    pub(crate) fn drain_topics(&self) -> Vec<(String, Arc<dyn Topic>)> {
        let keys: Vec<String> = self.inner.topics.iter().map(|e| e.key().clone()).collect();
        keys.into_iter()
            .filter_map(|key| self.inner.topics.remove(&key))
            .collect()
    }

    /// Ask the handling loop to reconcile subscriptions on its next iteration.
    pub(crate) fn mark_topics_changed(&self) {
        self.inner.topics_changed.set();
    }

    /// Mark this connection as dropped by the pool. It can no longer start.
    pub(crate) fn mark_retired(&self) {
        self.inner.retired.store(true, Ordering::SeqCst);
    }

    /// Check whether this connection was dropped by the pool.
    #[must_use]
    pub fn is_retired(&self) -> bool {
        self.inner.retired.load(Ordering::SeqCst)
    }

    /// Check whether two handles refer to the same connection.
    #[must_use]
    pub fn same(&self, other: &Connection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    #[cfg(test)]
    pub(crate) fn take_topics_changed(&self) -> bool {
        self.inner.topics_changed.take()
    }

    /// Start the handling loop if it is not running, then wait until a socket
    /// has been established.
    ///
    /// Never returns while the endpoint stays unreachable, unless the
    /// connection is stopped meanwhile. Callers that need a bound must apply
    /// their own timeout. A connection retired by its pool never starts again.
    pub async fn start(&self) {
        {
            let mut task = self.inner.task.lock().await;
            if self.is_retired() {
                debug!(connection = self.inner.index, "Not starting a retired connection");
                return;
            }
            if task.as_ref().map_or(true, JoinHandle::is_finished) {
                self.inner.closed.clear();
                let inner = Arc::clone(&self.inner);
                let span = self.inner.span.clone();
                *task = Some(tokio::spawn(inner.run().instrument(span)));
            }
        }

        tokio::select! {
            _ = self.inner.socket.get() => {}
            _ = self.inner.closed.wait() => {}
        }
    }

    /// Stop the handling loop and close the socket.
    ///
    /// Waits up to `stop_timeout` for the loop to finish before aborting it.
    /// With `remove`, the connection's status row is removed afterwards.
    pub async fn stop(&self, remove: bool) {
        let inner = &self.inner;
        let stop_timeout = inner.ctx.config.stop_timeout;
        let mut task = inner.task.lock().await;

        if inner.closed.is_set() {
            return;
        }
        inner.closed.set();

        if let Some(socket) = inner.socket.try_get() {
            match timeout(stop_timeout, socket.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(connection = inner.index, error = %e, "Error closing socket"),
                Err(_) => debug!(connection = inner.index, "Timed out closing socket"),
            }
        }

        if let Some(mut handle) = task.take() {
            if timeout(stop_timeout, &mut handle).await.is_err() {
                warn!(connection = inner.index, "Handling loop did not stop in time, aborting");
                handle.abort();
                let _ = handle.await;
                inner.socket.clear();
                inner.submitted.clear();
            }
        }

        inner.set_state(ConnectionState::Closed);
        if remove {
            inner.ctx.status.remove(inner.index);
        }
    }

    /// Tear down the current socket and establish a new one, keeping topics.
    pub fn request_reconnect(&self) {
        metrics::record_reconnect("requested");
        self.inner.reconnect_requested.set();
    }

    /// Send a frame over the live socket, waiting for one if necessary.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Closed`] if the connection is stopped while
    /// waiting, or a transport error if the write fails.
    pub async fn send(&self, frame: &Frame) -> Result<(), PoolError> {
        self.inner.send(frame).await
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("index", &self.inner.index)
            .field("state", &self.state())
            .field("topics", &self.topic_count())
            .finish()
    }
}

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(connection = self.index, from = %previous, to = %state, "State changed");
            self.ctx.status.update(self.index, Some(state), None);
        }
    }

    async fn send(&self, frame: &Frame) -> Result<(), PoolError> {
        let socket = tokio::select! {
            biased;
            _ = self.closed.wait() => return Err(PoolError::Closed),
            socket = self.socket.get() => socket,
        };

        socket.send(frame).await?;
        metrics::record_frame("outbound");
        trace!(frame = %frame.frame_type(), "Sent frame");
        Ok(())
    }

    /// The handling loop. Runs until the connection is stopped.
    async fn run(self: Arc<Self>) {
        self.set_state(ConnectionState::Initializing);
        tokio::select! {
            biased;
            _ = self.closed.wait() => {
                self.set_state(ConnectionState::Closed);
                return;
            }
            _ = self.ctx.auth.wait_until_authenticated() => {}
        }

        let mut backoff = ExponentialBackoff::new(&self.ctx.config.backoff);

        while !self.closed.is_set() {
            let Some(socket) = self.connect(&mut backoff).await else {
                break;
            };

            self.socket.set(Arc::clone(&socket));
            self.reconnect_requested.clear();
            self.topics_changed.set();
            self.set_state(ConnectionState::Connected);
            let active = metrics::ConnectedGuard::new();
            info!(remote = ?socket.remote_addr(), "Connected");

            let outcome = self.session(socket.as_ref()).await;

            self.socket.clear();
            self.submitted.clear();
            if let Err(e) = socket.close().await {
                trace!(error = %e, "Socket already closed");
            }
            drop(active);

            match outcome {
                _ if self.closed.is_set() => break,
                Ok(SessionEnd::Closed) => break,
                Ok(SessionEnd::Reconnect) => info!("Reconnecting"),
                Err(e) => {
                    metrics::record_reconnect("failure");
                    warn!(error = %e, "Connection lost");
                }
            }
            self.set_state(ConnectionState::Disconnected);
        }

        self.set_state(ConnectionState::Closed);
        info!("Stopped");
    }

    /// Connect with backoff. Returns `None` only once a stop is requested.
    async fn connect(&self, backoff: &mut ExponentialBackoff) -> Option<Arc<dyn Socket>> {
        let config = &self.ctx.config;

        loop {
            self.set_state(ConnectionState::Connecting);
            metrics::record_connect_attempt();

            let attempt = timeout(
                config.connect_timeout,
                self.ctx
                    .connector
                    .connect(&config.endpoint, config.proxy.as_deref()),
            );
            let result = tokio::select! {
                biased;
                _ = self.closed.wait() => return None,
                result = attempt => result,
            };

            let error = match result {
                Ok(Ok(socket)) => {
                    backoff.reset();
                    return Some(Arc::from(socket));
                }
                Ok(Err(e)) => e,
                Err(_) => TransportError::Timeout,
            };

            let delay = backoff.next_delay();
            metrics::record_connect_failure();
            warn!(
                error = %error,
                attempt = backoff.attempt(),
                delay_ms = delay.as_millis() as u64,
                "Connect failed, retrying"
            );
            self.set_state(ConnectionState::Disconnected);

            tokio::select! {
                biased;
                _ = self.closed.wait() => return None,
                _ = sleep(delay) => {}
            }
        }
    }

    /// Drive one live socket: keepalive, topic sync, receive.
    async fn session(&self, socket: &dyn Socket) -> Result<SessionEnd, PoolError> {
        let config = &self.ctx.config;
        let mut keepalive = Keepalive::new(config.ping_interval, config.ping_timeout, Instant::now());

        while !self.reconnect_requested.is_set() {
            match keepalive.poll(Instant::now()) {
                KeepaliveAction::SendPing => self.send(&Frame::ping()).await?,
                KeepaliveAction::Expired => {
                    warn!(timeout_ms = config.ping_timeout.as_millis() as u64, "No PONG received");
                    metrics::record_reconnect("keepalive");
                    self.reconnect_requested.set();
                    continue;
                }
                KeepaliveAction::Idle => {}
            }

            self.sync_topics().await?;

            tokio::select! {
                biased;
                _ = self.closed.wait() => return Ok(SessionEnd::Closed),
                _ = self.reconnect_requested.wait() => {}
                _ = self.topics_changed.wait() => {}
                _ = sleep_until(keepalive.next_deadline()) => {}
                received = timeout(config.recv_timeout, socket.recv_text()) => match received {
                    // A quiet socket is normal.
                    Err(_) => {}
                    Ok(Ok(Some(text))) => self.dispatch(&text, &mut keepalive),
                    Ok(Ok(None)) if self.closed.is_set() => return Ok(SessionEnd::Closed),
                    Ok(Ok(None)) => return Err(TransportError::ConnectionClosed.into()),
                    Ok(Err(_)) if self.closed.is_set() => return Ok(SessionEnd::Closed),
                    Ok(Err(e)) => return Err(e.into()),
                },
            }
        }

        Ok(SessionEnd::Reconnect)
    }

    /// Send UNLISTEN/LISTEN for the difference between assigned and submitted.
    async fn sync_topics(&self) -> Result<(), PoolError> {
        if !self.topics_changed.take() {
            return Ok(());
        }

        let current: HashSet<String> = self.topics.iter().map(|e| e.key().clone()).collect();
        self.ctx.status.update(self.index, None, Some(current.len()));

        let mut removed: Vec<String> = self
            .submitted
            .iter()
            .map(|k| k.key().clone())
            .filter(|k| !current.contains(k))
            .collect();
        let mut added: Vec<String> = current
            .into_iter()
            .filter(|k| !self.submitted.contains(k))
            .collect();

        if removed.is_empty() && added.is_empty() {
            return Ok(());
        }

        let token = self.ctx.auth.access_token().await;

        if !removed.is_empty() {
            removed.sort();
            debug!(count = removed.len(), "Unlistening");
            self.send(&Frame::unlisten(removed.clone(), token.clone())).await?;
            for key in &removed {
                self.submitted.remove(key);
            }
        }

        if !added.is_empty() {
            added.sort();
            debug!(count = added.len(), "Listening");
            self.send(&Frame::listen(added.clone(), token)).await?;
            for key in added {
                self.submitted.insert(key);
            }
        }

        Ok(())
    }

    /// Handle one inbound text frame. Undecodable frames are ignored.
    fn dispatch(&self, text: &str, keepalive: &mut Keepalive) {
        metrics::record_frame("inbound");

        let frame = match codec::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, "Ignoring undecodable frame");
                return;
            }
        };

        match frame {
            Frame::Message { data } => {
                let Some(topic) = self.topics.get(&data.topic).map(|e| Arc::clone(e.value()))
                else {
                    trace!(topic = %data.topic, "Message for unassigned topic");
                    return;
                };

                let payload = match data.payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        debug!(topic = %data.topic, error = %e, "Ignoring message with invalid payload");
                        return;
                    }
                };

                metrics::record_dispatch();
                let key = data.topic;
                tokio::spawn(
                    async move {
                        if let Err(e) = topic.handle(payload).await {
                            metrics::record_handler_error();
                            warn!(topic = %key, error = %e, "Topic handler failed");
                        }
                    }
                    .in_current_span(),
                );
            }
            Frame::Pong => keepalive.pong_received(),
            Frame::Reconnect => {
                info!("Server requested reconnect");
                metrics::record_reconnect("server");
                self.reconnect_requested.set();
            }
            Frame::Response { nonce, error } if !error.is_empty() => {
                warn!(nonce = ?nonce, error = %error, "Server rejected request");
            }
            Frame::Response { .. } => trace!("Request acknowledged"),
            other => trace!(frame = %other.frame_type(), "Ignoring unexpected frame"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        context, eventually, test_config, FakeConnector, GatedAuth, RecordingStatus,
    };
    use crate::topic::topic_fn;
    use crate::StaticToken;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tether_protocol::FrameType;
    use tokio::sync::mpsc;

    fn noop_topic(key: &str) -> Arc<dyn Topic> {
        topic_fn(key, |_| async { Ok(()) })
    }

    fn connection_with(
        connector: &Arc<FakeConnector>,
        config: PoolConfig,
        keys: &[&str],
    ) -> (Connection, Arc<RecordingStatus>) {
        let status = Arc::new(RecordingStatus::default());
        let ctx = context(
            config,
            connector.clone(),
            Arc::new(StaticToken::new("token")),
            status.clone(),
        );
        let connection = Connection::new(0, ctx);
        for key in keys {
            connection.insert_topic(key.to_string(), noop_topic(key));
        }
        connection.mark_topics_changed();
        (connection, status)
    }

    fn listened(frame: Frame) -> Vec<String> {
        match frame {
            Frame::Listen { data, nonce } => {
                assert_eq!(data.auth_token, "token");
                assert_eq!(nonce.len(), tether_protocol::NONCE_LENGTH);
                data.topics
            }
            other => panic!("Expected Listen frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_start_pings_then_listens() {
        let connector = FakeConnector::new();
        let (connection, _) = connection_with(&connector, test_config(), &["b.1", "a.1"]);

        connection.start().await;
        assert_eq!(connection.state(), ConnectionState::Connected);

        let mut server = connector.accept().await;
        assert_eq!(server.recv().await, Frame::Ping);
        assert_eq!(listened(server.recv().await), vec!["a.1", "b.1"]);

        eventually(|| connection.submitted_topics().len() == 2).await;

        connection.stop(false).await;
        assert_eq!(connection.state(), ConnectionState::Closed);
        assert!(server.is_closed());
    }

    #[tokio::test]
    async fn test_message_dispatch_skips_bad_frames() {
        let connector = FakeConnector::new();
        let (connection, _) = connection_with(&connector, test_config(), &[]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        connection.insert_topic(
            "drops.1".into(),
            topic_fn("drops.1", move |payload| {
                let tx = tx.clone();
                async move {
                    tx.send(payload).ok();
                    Ok(())
                }
            }),
        );
        connection.start().await;
        let mut server = connector.accept().await;
        server.expect(FrameType::Listen).await;

        server.send_text("definitely not json");
        server.send_text(r#"{"type":"MESSAGE","data":{"topic":"drops.1","message":"{oops"}}"#);
        server.send(&Frame::message("other.9", &serde_json::json!(1)).unwrap());
        server.send(&Frame::message("drops.1", &serde_json::json!({"progress": 5})).unwrap());

        let payload = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payload, serde_json::json!({"progress": 5}));
        assert!(rx.try_recv().is_err());
        assert_eq!(connector.attempts(), 1);

        connection.stop(false).await;
    }

    #[tokio::test]
    async fn test_handler_error_keeps_loop_running() {
        let connector = FakeConnector::new();
        let (connection, _) = connection_with(&connector, test_config(), &[]);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        connection.insert_topic(
            "t.1".into(),
            topic_fn("t.1", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err("handler exploded".into()) }
            }),
        );
        connection.start().await;
        let mut server = connector.accept().await;
        server.expect(FrameType::Listen).await;

        for _ in 0..2 {
            server.send(&Frame::message("t.1", &serde_json::json!(null)).unwrap());
        }

        eventually(|| calls.load(Ordering::SeqCst) == 2).await;
        assert_eq!(connection.state(), ConnectionState::Connected);
        connection.stop(false).await;
    }

    #[tokio::test]
    async fn test_server_reconnect_preserves_topics() {
        let connector = FakeConnector::new();
        let (connection, _) = connection_with(&connector, test_config(), &["a.1", "b.1"]);
        connection.start().await;

        let mut first = connector.accept().await;
        assert_eq!(listened(first.expect(FrameType::Listen).await), vec!["a.1", "b.1"]);
        let before = connection.topic_keys();

        first.send(&Frame::reconnect());

        let mut second = connector.accept().await;
        assert_eq!(second.recv().await, Frame::Ping);
        assert_eq!(listened(second.recv().await), vec!["a.1", "b.1"]);
        assert!(first.is_closed());
        assert_eq!(connection.topic_keys(), before);
        assert_eq!(connector.attempts(), 2);

        connection.stop(false).await;
    }

    #[tokio::test]
    async fn test_missing_pong_forces_reconnect() {
        let connector = FakeConnector::new();
        let config = PoolConfig {
            ping_timeout: Duration::from_millis(100),
            ..test_config()
        };
        let (connection, status) = connection_with(&connector, config, &["a.1"]);
        connection.start().await;

        let mut first = connector.accept().await;
        assert_eq!(first.recv().await, Frame::Ping);

        let mut second = connector.accept().await;
        assert_eq!(second.recv().await, Frame::Ping);
        assert!(first.is_closed());

        // The dead socket is withdrawn before the new one is published.
        let states = status.states(0);
        let connected: Vec<usize> = states
            .iter()
            .enumerate()
            .filter(|(_, s)| **s == ConnectionState::Connected)
            .map(|(i, _)| i)
            .collect();
        assert!(connected.len() >= 2);
        assert!(states[connected[0]..connected[1]].contains(&ConnectionState::Disconnected));

        connection.stop(false).await;
    }

    #[tokio::test]
    async fn test_pong_keeps_socket() {
        let connector = FakeConnector::new();
        let config = PoolConfig {
            ping_timeout: Duration::from_millis(100),
            ..test_config()
        };
        let (connection, _) = connection_with(&connector, config, &[]);
        connection.start().await;

        let mut server = connector.accept().await;
        assert_eq!(server.recv().await, Frame::Ping);
        server.send(&Frame::pong());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(connector.attempts(), 1);
        assert_eq!(connection.state(), ConnectionState::Connected);

        connection.stop(false).await;
    }

    #[tokio::test]
    async fn test_removed_topics_are_unlistened() {
        let connector = FakeConnector::new();
        let (connection, _) = connection_with(&connector, test_config(), &["a.1", "b.1"]);
        connection.start().await;
        let mut server = connector.accept().await;
        server.expect(FrameType::Listen).await;

        let removed = connection.remove_topics(&HashSet::from(["a.1".to_string()]));
        assert_eq!(removed, 1);
        connection.mark_topics_changed();

        match server.expect(FrameType::Unlisten).await {
            Frame::Unlisten { data, .. } => assert_eq!(data.topics, vec!["a.1"]),
            other => panic!("Expected Unlisten frame, got {:?}", other),
        }
        eventually(|| connection.submitted_topics() == HashSet::from(["b.1".to_string()])).await;

        connection.stop(false).await;
    }

    #[tokio::test]
    async fn test_connect_failures_are_retried() {
        let connector = FakeConnector::new();
        connector.fail_next(3);
        let (connection, status) = connection_with(&connector, test_config(), &["a.1"]);

        connection.start().await;
        let mut server = connector.accept().await;
        server.expect(FrameType::Listen).await;

        assert_eq!(connector.attempts(), 4);
        assert!(status.states(0).contains(&ConnectionState::Connecting));
        connection.stop(false).await;
    }

    #[tokio::test]
    async fn test_peer_hangup_reconnects() {
        let connector = FakeConnector::new();
        let (connection, _) = connection_with(&connector, test_config(), &["a.1"]);
        connection.start().await;

        let mut first = connector.accept().await;
        first.expect(FrameType::Listen).await;
        first.hang_up();

        let mut second = connector.accept().await;
        assert_eq!(listened(second.expect(FrameType::Listen).await), vec!["a.1"]);
        connection.stop(false).await;
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_terminal() {
        let connector = FakeConnector::new();
        let (connection, status) = connection_with(&connector, test_config(), &[]);
        connection.start().await;
        let _server = connector.accept().await;

        connection.stop(true).await;
        connection.stop(true).await;

        assert_eq!(status.removed(), vec![0]);
        assert_eq!(connection.state(), ConnectionState::Closed);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let connector = FakeConnector::new();
        let (connection, _) = connection_with(&connector, test_config(), &["a.1"]);
        connection.start().await;
        let _first = connector.accept().await;
        connection.stop(false).await;

        connection.start().await;
        let mut second = connector.accept().await;
        assert_eq!(listened(second.expect(FrameType::Listen).await), vec!["a.1"]);
        connection.stop(false).await;
    }

    #[tokio::test]
    async fn test_stop_interrupts_backoff() {
        let connector = FakeConnector::new();
        connector.fail_next(usize::MAX);
        let mut config = test_config();
        config.backoff.base = Duration::from_secs(60);
        config.backoff.maximum = Duration::from_secs(60);
        let (connection, _) = connection_with(&connector, config, &[]);

        let starter = {
            let connection = connection.clone();
            tokio::spawn(async move { connection.start().await })
        };
        eventually(|| connector.attempts() >= 1).await;

        tokio::time::timeout(Duration::from_secs(1), connection.stop(false))
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), starter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(connection.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_concurrent_starts_share_one_loop() {
        let connector = FakeConnector::new();
        let (connection, _) = connection_with(&connector, test_config(), &["a.1"]);

        tokio::join!(connection.start(), connection.start());

        let mut server = connector.accept().await;
        server.expect(FrameType::Listen).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(connector.attempts(), 1);
        connection.stop(false).await;
    }

    #[tokio::test]
    async fn test_retired_connection_never_starts() {
        let connector = FakeConnector::new();
        let (connection, _) = connection_with(&connector, test_config(), &["a.1"]);
        connection.mark_retired();

        tokio::time::timeout(Duration::from_secs(1), connection.start())
            .await
            .unwrap();

        assert_eq!(connector.attempts(), 0);
        assert_eq!(connection.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_stop_aborts_loop_stuck_closing() {
        let connector = FakeConnector::new();
        connector.hang_on_close();
        let config = test_config();
        let stop_timeout = config.stop_timeout;
        let (connection, status) = connection_with(&connector, config, &["a.1"]);
        connection.start().await;
        let mut server = connector.accept().await;
        server.expect(FrameType::Listen).await;

        let started = Instant::now();
        tokio::time::timeout(stop_timeout * 4, connection.stop(true))
            .await
            .unwrap();

        assert!(started.elapsed() < stop_timeout * 3);
        assert_eq!(connection.state(), ConnectionState::Closed);
        assert!(connection.inner.socket.try_get().is_none());
        assert!(connection.submitted_topics().is_empty());
        assert_eq!(status.removed(), vec![0]);
    }

    #[tokio::test]
    async fn test_requested_reconnect_resubscribes() {
        let connector = FakeConnector::new();
        let (connection, _) = connection_with(&connector, test_config(), &["b.1", "a.1"]);
        connection.start().await;
        let mut first = connector.accept().await;
        assert_eq!(listened(first.expect(FrameType::Listen).await), vec!["a.1", "b.1"]);

        connection.request_reconnect();

        let mut second = connector.accept().await;
        assert_eq!(second.recv().await, Frame::Ping);
        assert_eq!(listened(second.recv().await), vec!["a.1", "b.1"]);
        assert!(first.is_closed());
        assert_eq!(connector.attempts(), 2);
        eventually(|| connection.submitted_topics().len() == 2).await;

        connection.stop(false).await;
    }

    #[tokio::test]
    async fn test_waits_for_authentication() {
        let connector = FakeConnector::new();
        let auth = Arc::new(GatedAuth::default());
        let ctx = context(
            test_config(),
            connector.clone(),
            auth.clone(),
            Arc::new(RecordingStatus::default()),
        );
        let connection = Connection::new(0, ctx);

        let starter = {
            let connection = connection.clone();
            tokio::spawn(async move { connection.start().await })
        };
        eventually(|| connection.state() == ConnectionState::Initializing).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(connector.attempts(), 0);

        auth.open();
        tokio::time::timeout(Duration::from_secs(5), starter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(connection.state(), ConnectionState::Connected);
        connection.stop(false).await;
    }

    #[tokio::test]
    async fn test_send_fails_once_stopped() {
        let connector = FakeConnector::new();
        let (connection, _) = connection_with(&connector, test_config(), &[]);

        let sender = {
            let connection = connection.clone();
            tokio::spawn(async move { connection.send(&Frame::ping()).await })
        };
        tokio::task::yield_now().await;
        connection.stop(false).await;

        let result = tokio::time::timeout(Duration::from_secs(1), sender)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(PoolError::Closed)));
    }
}
