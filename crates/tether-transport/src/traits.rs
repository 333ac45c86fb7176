//! Transport abstraction traits for Tether.
//!
//! These traits define what the connection pool needs from the network:
//! a way to open sockets and a way to exchange text frames over them.

use async_trait::async_trait;
use tether_protocol::{codec, Frame, ProtocolError};
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Operation timed out.
    #[error("Connection timed out")]
    Timeout,

    /// Failed to establish the connection.
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// The outbound proxy rejected or broke the tunnel.
    #[error("Proxy error: {0}")]
    Proxy(String),

    /// Endpoint or proxy URL could not be used.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Opens sockets to a topic-delivery endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a socket to `url`, tunnelling through `proxy` when given.
    ///
    /// Fails with a transport error on any network or handshake failure;
    /// callers are expected to retry.
    async fn connect(&self, url: &str, proxy: Option<&str>)
        -> Result<Box<dyn Socket>, TransportError>;

    /// Get the connector name (e.g., "websocket").
    fn name(&self) -> &'static str;
}

/// A live, bidirectional text socket.
///
/// All methods take `&self`: the owning loop receives while any other task
/// may send concurrently.
#[async_trait]
pub trait Socket: Send + Sync {
    /// Receive the next text message.
    ///
    /// Returns `None` if the peer closed the socket cleanly. Transport-level
    /// control messages are handled internally and never returned.
    async fn recv_text(&self) -> Result<Option<String>, TransportError>;

    /// Send one text message.
    async fn send_text(&self, text: String) -> Result<(), TransportError>;

    /// Encode and send a protocol frame.
    async fn send(&self, frame: &Frame) -> Result<(), TransportError> {
        let text = codec::encode(frame)?;
        self.send_text(text).await
    }

    /// Close the socket gracefully.
    async fn close(&self) -> Result<(), TransportError>;

    /// Check if the socket is still open.
    fn is_open(&self) -> bool;

    /// Get the remote endpoint, if known.
    fn remote_addr(&self) -> Option<String> {
        None
    }
}
