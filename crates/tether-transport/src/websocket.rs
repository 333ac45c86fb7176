//! WebSocket transport implementation.
//!
//! This module provides a WebSocket client transport using tokio-tungstenite.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::{
    client_async_tls_with_config, connect_async_with_config,
    tungstenite::{protocol::WebSocketConfig as WsConfig, Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, warn};

use crate::proxy;
use crate::traits::{Connector, Socket, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket client configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Maximum message size in bytes.
    pub max_message_size: usize,
    /// Upper bound on TCP connect, proxy tunnel and handshake combined.
    pub connect_timeout: Duration,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_message_size: 1024 * 1024, // 1 MiB
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Opens WebSocket connections, directly or through an HTTP proxy.
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector {
    config: WebSocketConfig,
}

impl WebSocketConnector {
    /// Create a new WebSocket connector.
    #[must_use]
    pub fn new(config: WebSocketConfig) -> Self {
        Self { config }
    }

    fn ws_config(&self) -> WsConfig {
        let mut config = WsConfig::default();
        config.max_message_size = Some(self.config.max_message_size);
        config.max_frame_size = Some(self.config.max_message_size);
        config
    }

    async fn open(&self, url: &str, proxy: Option<&str>) -> Result<WsStream, TransportError> {
        let ws_config = Some(self.ws_config());

        let handshake = match proxy {
            Some(proxy_url) => {
                let tunnel = proxy::connect_via_proxy(proxy_url, url).await?;
                debug!(proxy = %proxy_url, "Proxy tunnel established");
                client_async_tls_with_config(url, tunnel, ws_config, None).await
            }
            None => connect_async_with_config(url, ws_config, true).await,
        };

        let (stream, response) = handshake.map_err(|e| {
            warn!("WebSocket handshake failed: {}", e);
            TransportError::ConnectFailed(e.to_string())
        })?;

        debug!(url = %url, status = %response.status(), "WebSocket handshake completed");
        Ok(stream)
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(
        &self,
        url: &str,
        proxy: Option<&str>,
    ) -> Result<Box<dyn Socket>, TransportError> {
        let stream = tokio::time::timeout(self.config.connect_timeout, self.open(url, proxy))
            .await
            .map_err(|_| TransportError::Timeout)??;

        Ok(Box::new(WebSocketConnection::new(stream, url)))
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

/// A client WebSocket connection.
///
/// The stream is split so that a receive in progress never blocks a send.
pub struct WebSocketConnection {
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
    remote_addr: String,
    is_open: AtomicBool,
}

impl WebSocketConnection {
    fn new(stream: WsStream, remote_addr: impl Into<String>) -> Self {
        let (sink, stream) = stream.split();
        Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            remote_addr: remote_addr.into(),
            is_open: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl Socket for WebSocketConnection {
    async fn recv_text(&self) -> Result<Option<String>, TransportError> {
        let mut stream = self.stream.lock().await;

        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => return Ok(Some(text)),
                    Err(_) => warn!("Ignoring non UTF-8 binary message"),
                },
                Some(Ok(Message::Ping(data))) => {
                    // Respond to ping with pong
                    if let Err(e) = self.sink.lock().await.send(Message::Pong(data)).await {
                        warn!("Failed to send pong: {}", e);
                    }
                }
                Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "Received close frame");
                    self.is_open.store(false, Ordering::SeqCst);
                    return Ok(None);
                }
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {
                    debug!("Connection closed");
                    self.is_open.store(false, Ordering::SeqCst);
                    return Ok(None);
                }
                Some(Err(e)) => {
                    error!("WebSocket error: {}", e);
                    self.is_open.store(false, Ordering::SeqCst);
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                None => {
                    debug!("WebSocket stream ended");
                    self.is_open.store(false, Ordering::SeqCst);
                    return Ok(None);
                }
            }
        }
    }

    async fn send_text(&self, text: String) -> Result<(), TransportError> {
        if !self.is_open.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }

        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(text))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.is_open.swap(false, Ordering::SeqCst) {
            return Ok(()); // Already closed
        }

        let mut sink = self.sink.lock().await;
        match sink.close().await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(TransportError::SendFailed(format!("Failed to close: {}", e))),
        }
    }

    fn is_open(&self) -> bool {
        self.is_open.load(Ordering::SeqCst)
    }

    fn remote_addr(&self) -> Option<String> {
        Some(self.remote_addr.clone())
    }
}
