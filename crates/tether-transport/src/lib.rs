//! # tether-transport
//!
//! Client transport abstraction layer for the Tether connection pool.
//!
//! A [`Connector`] opens sockets to the topic-delivery endpoint, optionally
//! through an outbound proxy, and a [`Socket`] is one live bidirectional
//! text channel. The pool only talks to these traits, so tests can swap in
//! in-memory sockets.
//!
//! - **WebSocket** - `tokio-tungstenite` client with TLS
//! - **Proxy** - HTTP `CONNECT` tunnelling ahead of the WebSocket handshake
//!
//! ```rust,ignore
//! use tether_transport::{Connector, Socket, WebSocketConnector};
//!
//! async fn listen(connector: &WebSocketConnector) -> Result<(), tether_transport::TransportError> {
//!     let socket = connector.connect("wss://pubsub.example.com/v1", None).await?;
//!     while let Some(text) = socket.recv_text().await? {
//!         // Decode and dispatch
//!     }
//!     Ok(())
//! }
//! ```

pub mod traits;

#[cfg(feature = "websocket")]
pub mod proxy;
#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{Connector, Socket, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConfig, WebSocketConnection, WebSocketConnector};
