//! # tether-protocol
//!
//! Wire protocol definitions for the Tether pub/sub connection pool.
//!
//! Every frame is a single JSON object carried in one WebSocket text message
//! and discriminated by its `type` field.
//!
//! ## Frame Types
//!
//! - `PING` / `PONG` - Client keepalive and the server's answer
//! - `LISTEN` / `UNLISTEN` - Batched topic (un)subscription with a nonce and bearer token
//! - `RECONNECT` - Server asks the client to reconnect
//! - `MESSAGE` - Inbound event for a topic; its payload is JSON encoded a second time
//! - `RESPONSE` - Server acknowledgment of a LISTEN or UNLISTEN
//!
//! ## Example
//!
//! ```rust
//! use tether_protocol::{codec, Frame};
//!
//! let frame = Frame::listen(vec!["video-playback.42".to_string()], "token");
//!
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod frames;
pub mod nonce;

pub use codec::{decode, encode, ProtocolError};
pub use frames::{Frame, FrameType, MessageData, TopicsData};
pub use nonce::{create_nonce, NONCE_LENGTH};
