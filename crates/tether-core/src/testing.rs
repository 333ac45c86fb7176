//! In-memory collaborators for unit tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tether_protocol::{codec, Frame, FrameType};
use tether_transport::{Connector, Socket, TransportError};
use tokio::sync::{mpsc, watch, Mutex};

use crate::config::{BackoffConfig, PoolConfig};
use crate::connection::{ConnectionState, PoolContext};
use crate::session::{AuthProvider, StatusSink};
use crate::sync::Flag;

const WAIT: Duration = Duration::from_secs(5);

/// A config with short timers and deterministic backoff.
pub(crate) fn test_config() -> PoolConfig {
    PoolConfig {
        endpoint: "ws://fake.invalid/v1".to_string(),
        ping_interval: Duration::from_secs(60),
        ping_timeout: Duration::from_secs(30),
        recv_timeout: Duration::from_millis(50),
        connect_timeout: Duration::from_secs(1),
        stop_timeout: Duration::from_millis(500),
        backoff: BackoffConfig {
            base: Duration::from_millis(10),
            maximum: Duration::from_millis(50),
            factor: 2,
            jitter: false,
        },
        ..PoolConfig::default()
    }
}

pub(crate) fn context(
    config: PoolConfig,
    connector: Arc<dyn Connector>,
    auth: Arc<dyn AuthProvider>,
    status: Arc<dyn StatusSink>,
) -> Arc<PoolContext> {
    Arc::new(PoolContext {
        config,
        connector,
        auth,
        status,
    })
}

/// Poll `condition` until it holds, panicking after a few seconds.
pub(crate) async fn eventually(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Hands out in-memory sockets and queues the server end of each.
pub(crate) struct FakeConnector {
    servers_tx: mpsc::UnboundedSender<FakeServer>,
    servers_rx: Mutex<mpsc::UnboundedReceiver<FakeServer>>,
    attempts: AtomicUsize,
    failures: AtomicUsize,
    hang_on_close: AtomicBool,
}

impl FakeConnector {
    pub(crate) fn new() -> Arc<Self> {
        let (servers_tx, servers_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            servers_tx,
            servers_rx: Mutex::new(servers_rx),
            attempts: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
            hang_on_close: AtomicBool::new(false),
        })
    }

    /// Refuse the next `count` connection attempts.
    pub(crate) fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Make `close` never complete on sockets opened from now on.
    pub(crate) fn hang_on_close(&self) {
        self.hang_on_close.store(true, Ordering::SeqCst);
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Wait for the next successful connection.
    pub(crate) async fn accept(&self) -> FakeServer {
        let mut servers = self.servers_rx.lock().await;
        tokio::time::timeout(WAIT, servers.recv())
            .await
            .expect("no connection was opened")
            .expect("connector dropped")
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        _url: &str,
        _proxy: Option<&str>,
    ) -> Result<Box<dyn Socket>, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::ConnectFailed("connection refused".into()));
        }

        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);
        let closed = Arc::new(closed);

        let _ = self.servers_tx.send(FakeServer {
            to_client: Some(to_client),
            from_client,
            closed: Arc::clone(&closed),
        });
        Ok(Box::new(FakeSocket {
            inbound: Mutex::new(inbound),
            outbound,
            closed,
            hang_on_close: self.hang_on_close.load(Ordering::SeqCst),
        }))
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

struct FakeSocket {
    inbound: Mutex<mpsc::UnboundedReceiver<String>>,
    outbound: mpsc::UnboundedSender<String>,
    closed: Arc<watch::Sender<bool>>,
    hang_on_close: bool,
}

#[async_trait]
impl Socket for FakeSocket {
    async fn recv_text(&self) -> Result<Option<String>, TransportError> {
        let mut closed = self.closed.subscribe();
        let mut inbound = self.inbound.lock().await;
        tokio::select! {
            text = inbound.recv() => Ok(text),
            _ = closed.wait_for(|closed| *closed) => Ok(None),
        }
    }

    async fn send_text(&self, text: String) -> Result<(), TransportError> {
        if *self.closed.borrow() {
            return Err(TransportError::ConnectionClosed);
        }
        self.outbound
            .send(text)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.hang_on_close {
            std::future::pending::<()>().await;
        }
        self.closed.send_replace(true);
        Ok(())
    }

    fn is_open(&self) -> bool {
        !*self.closed.borrow()
    }
}

/// The endpoint side of one fake socket.
pub(crate) struct FakeServer {
    to_client: Option<mpsc::UnboundedSender<String>>,
    from_client: mpsc::UnboundedReceiver<String>,
    closed: Arc<watch::Sender<bool>>,
}

impl FakeServer {
    pub(crate) fn send(&self, frame: &Frame) {
        self.send_text(&codec::encode(frame).unwrap());
    }

    pub(crate) fn send_text(&self, text: &str) {
        if let Some(tx) = &self.to_client {
            let _ = tx.send(text.to_string());
        }
    }

    /// Next frame written by the client.
    pub(crate) async fn recv(&mut self) -> Frame {
        let text = tokio::time::timeout(WAIT, self.from_client.recv())
            .await
            .expect("client sent nothing")
            .expect("client dropped the socket");
        codec::decode(&text).unwrap()
    }

    /// Skip frames until one of type `expected` arrives.
    pub(crate) async fn expect(&mut self, expected: FrameType) -> Frame {
        loop {
            let frame = self.recv().await;
            if frame.frame_type() == expected {
                return frame;
            }
        }
    }

    /// Whether the client closed its end.
    pub(crate) fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Drop the connection from the server side.
    pub(crate) fn hang_up(&mut self) {
        self.to_client = None;
    }
}

/// Records every status update.
#[derive(Default)]
pub(crate) struct RecordingStatus {
    updates: std::sync::Mutex<Vec<(usize, Option<ConnectionState>, Option<usize>)>>,
    removed: std::sync::Mutex<Vec<usize>>,
}

impl RecordingStatus {
    /// States reported for connection `index`, in order.
    pub(crate) fn states(&self, index: usize) -> Vec<ConnectionState> {
        self.updates
            .lock()
            .unwrap()
            .iter()
            .filter(|(i, _, _)| *i == index)
            .filter_map(|(_, state, _)| *state)
            .collect()
    }

    pub(crate) fn removed(&self) -> Vec<usize> {
        self.removed.lock().unwrap().clone()
    }
}

impl StatusSink for RecordingStatus {
    fn update(&self, index: usize, state: Option<ConnectionState>, topics: Option<usize>) {
        self.updates.lock().unwrap().push((index, state, topics));
    }

    fn remove(&self, index: usize) {
        self.removed.lock().unwrap().push(index);
    }
}

/// Authentication that completes only once opened.
#[derive(Default)]
pub(crate) struct GatedAuth {
    gate: Flag,
}

impl GatedAuth {
    pub(crate) fn open(&self) {
        self.gate.set();
    }
}

#[async_trait]
impl AuthProvider for GatedAuth {
    async fn wait_until_authenticated(&self) {
        self.gate.wait().await;
    }

    async fn access_token(&self) -> String {
        "token".to_string()
    }
}
