//! Codec for encoding and decoding Study Hall messages.
//!
//! Messages are JSON text. Decoding inspects the `type` tag first so that an
//! unrecognized tag is reported as such rather than as a generic parse error.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::messages::{ClientMessage, MessageKind, ServerMessage};

/// Default maximum message size (64 KiB).
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Message exceeds the configured maximum size.
    #[error("Message size {size} exceeds maximum {max}")]
    MessageTooLarge { size: usize, max: usize },

    /// The message has no string `type` tag.
    #[error("Message has no type tag")]
    MissingType,

    /// The `type` tag names no known message.
    #[error("Unknown message type: {0}")]
    UnknownType(String),

    /// JSON is invalid or the fields do not match the tagged message.
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Decode a client message with the default size limit.
///
/// # Errors
///
/// Returns an error if the text is too large, untagged, or invalid.
pub fn decode_client(text: &str) -> Result<ClientMessage, ProtocolError> {
    Codec::default().decode_client(text)
}

/// Decode a server message with the default size limit.
///
/// # Errors
///
/// Returns an error if the text is too large, untagged, or invalid.
pub fn decode_server(text: &str) -> Result<ServerMessage, ProtocolError> {
    Codec::default().decode_server(text)
}

/// Encode a server message to JSON text.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_server(message: &ServerMessage) -> Result<String, ProtocolError> {
    encode(message)
}

/// Encode a client message to JSON text.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_client(message: &ClientMessage) -> Result<String, ProtocolError> {
    encode(message)
}

fn encode<T: Serialize>(message: &T) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(message)?)
}

/// Codec with a configurable size limit.
#[derive(Debug, Clone, Copy)]
pub struct Codec {
    max_message_size: usize,
}

impl Default for Codec {
    fn default() -> Self {
        Self::new(MAX_MESSAGE_SIZE)
    }
}

impl Codec {
    /// Create a codec that rejects messages larger than `max_message_size` bytes.
    #[must_use]
    pub fn new(max_message_size: usize) -> Self {
        Self { max_message_size }
    }

    /// Get the size limit.
    #[must_use]
    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Decode a client message.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is too large, untagged, or invalid.
    pub fn decode_client(&self, text: &str) -> Result<ClientMessage, ProtocolError> {
        self.decode_tagged(text, &MessageKind::CLIENT)
    }

    /// Decode a server message.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is too large, untagged, or invalid.
    pub fn decode_server(&self, text: &str) -> Result<ServerMessage, ProtocolError> {
        self.decode_tagged(text, &MessageKind::SERVER)
    }

    fn decode_tagged<T: DeserializeOwned>(
        &self,
        text: &str,
        accepted: &[MessageKind],
    ) -> Result<T, ProtocolError> {
        if text.len() > self.max_message_size {
            return Err(ProtocolError::MessageTooLarge {
                size: text.len(),
                max: self.max_message_size,
            });
        }

        let value: Value = serde_json::from_str(text)?;
        let tag = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingType)?;

        if !accepted.iter().any(|kind| kind.tag() == tag) {
            return Err(ProtocolError::UnknownType(tag.to_string()));
        }

        Ok(serde_json::from_value(value)?)
    }
}
