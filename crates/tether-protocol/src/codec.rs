//! Codec for encoding and decoding Tether frames.
//!
//! Frames travel as minified JSON text, one frame per transport message.

use thiserror::Error;

use crate::frames::Frame;

/// Maximum encoded frame size (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// JSON encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[source] serde_json::Error),

    /// JSON decoding error, including unknown frame types.
    #[error("Decoding error: {0}")]
    Decode(#[source] serde_json::Error),

    /// The JSON payload nested inside a MESSAGE frame is invalid.
    #[error("Invalid message payload: {0}")]
    Payload(#[source] serde_json::Error),
}

/// Encode a frame to its JSON text form.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode(frame: &Frame) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(frame).map_err(ProtocolError::Encode)?;

    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }

    Ok(text)
}

/// Decode a frame from JSON text.
///
/// # Errors
///
/// Returns an error if the text is too large, not JSON, or not a known frame.
pub fn decode(text: &str) -> Result<Frame, ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }

    serde_json::from_str(text.trim_end()).map_err(ProtocolError::Decode)
}
