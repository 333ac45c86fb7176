//! Frame types for the Tether protocol.
//!
//! Frames are JSON objects tagged by an upper-case `type` field. Outbound
//! subscription frames carry a single-use nonce and the caller's bearer token.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::codec::ProtocolError;
use crate::nonce::create_nonce;

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    Ping,
    Pong,
    Listen,
    Unlisten,
    Reconnect,
    Message,
    Response,
}

impl FrameType {
    /// The value of the `type` field on the wire.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameType::Ping => "PING",
            FrameType::Pong => "PONG",
            FrameType::Listen => "LISTEN",
            FrameType::Unlisten => "UNLISTEN",
            FrameType::Reconnect => "RECONNECT",
            FrameType::Message => "MESSAGE",
            FrameType::Response => "RESPONSE",
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of a LISTEN or UNLISTEN frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicsData {
    /// Topic keys, batched into one request.
    pub topics: Vec<String>,
    /// Bearer credential authorizing the request.
    pub auth_token: String,
}

/// Body of an inbound MESSAGE frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageData {
    /// Topic key the event was published on.
    pub topic: String,
    /// JSON-encoded event payload.
    pub message: String,
}

impl MessageData {
    /// Decode the inner payload, which is JSON carried inside a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if `message` is not valid JSON.
    pub fn payload(&self) -> Result<serde_json::Value, ProtocolError> {
        serde_json::from_str(&self.message).map_err(ProtocolError::Payload)
    }
}

/// A protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Frame {
    /// Client keepalive ping.
    Ping,

    /// Server keepalive answer.
    Pong,

    /// Subscribe to a batch of topics.
    Listen {
        /// Single-use request token.
        nonce: String,
        /// Topics and credential.
        data: TopicsData,
    },

    /// Unsubscribe from a batch of topics.
    Unlisten {
        /// Single-use request token.
        nonce: String,
        /// Topics and credential.
        data: TopicsData,
    },

    /// Server instructs the client to reconnect.
    Reconnect,

    /// Inbound event for a subscribed topic.
    Message {
        /// Topic and encoded payload.
        data: MessageData,
    },

    /// Server acknowledgment of a LISTEN or UNLISTEN.
    Response {
        /// Nonce of the acknowledged request.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        nonce: Option<String>,
        /// Empty on success, otherwise an error code.
        #[serde(default)]
        error: String,
    },
}

impl Frame {
    /// Get the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Ping => FrameType::Ping,
            Frame::Pong => FrameType::Pong,
            Frame::Listen { .. } => FrameType::Listen,
            Frame::Unlisten { .. } => FrameType::Unlisten,
            Frame::Reconnect => FrameType::Reconnect,
            Frame::Message { .. } => FrameType::Message,
            Frame::Response { .. } => FrameType::Response,
        }
    }

    /// Create a new Ping frame.
    #[must_use]
    pub fn ping() -> Self {
        Frame::Ping
    }

    /// Create a new Pong frame.
    #[must_use]
    pub fn pong() -> Self {
        Frame::Pong
    }

    /// Create a new Reconnect frame.
    #[must_use]
    pub fn reconnect() -> Self {
        Frame::Reconnect
    }

    /// Create a Listen frame with a freshly generated nonce.
    #[must_use]
    pub fn listen(topics: Vec<String>, auth_token: impl Into<String>) -> Self {
        Frame::Listen {
            nonce: create_nonce(),
            data: TopicsData {
                topics,
                auth_token: auth_token.into(),
            },
        }
    }

    /// Create an Unlisten frame with a freshly generated nonce.
    #[must_use]
    pub fn unlisten(topics: Vec<String>, auth_token: impl Into<String>) -> Self {
        Frame::Unlisten {
            nonce: create_nonce(),
            data: TopicsData {
                topics,
                auth_token: auth_token.into(),
            },
        }
    }

    /// Create a Message frame, encoding `payload` into the inner string.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn message(
        topic: impl Into<String>,
        payload: &serde_json::Value,
    ) -> Result<Self, ProtocolError> {
        Ok(Frame::Message {
            data: MessageData {
                topic: topic.into(),
                message: serde_json::to_string(payload).map_err(ProtocolError::Payload)?,
            },
        })
    }

    /// Create a Response frame.
    #[must_use]
    pub fn response(nonce: Option<String>, error: impl Into<String>) -> Self {
        Frame::Response {
            nonce,
            error: error.into(),
        }
    }

    /// The nonce carried by this frame, if any.
    #[must_use]
    pub fn nonce(&self) -> Option<&str> {
        match self {
            Frame::Listen { nonce, .. } | Frame::Unlisten { nonce, .. } => Some(nonce),
            Frame::Response { nonce, .. } => nonce.as_deref(),
            _ => None,
        }
    }
}
