use serde::{Deserialize, Serialize};
use serde_json::error::Category;

use crate::RoutingId;

/// Which half of the offer/answer exchange a relayed message carries.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "camelCase")]
pub enum SignalingMessageType {
    /// Sent by a connecting client to the signaling server.
    Offer,
    /// Sent by the signaling server back to exactly one client connection.
    Answer,
}

/// Message exchanged between signaling client and signaling server.
///
/// `content` is passed through without modifications; `to` is only
/// meaningful on answers, where it names the relay connection the answer is
/// addressed to.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct SignalingMessage {
    /// Offer or answer.
    #[serde(rename = "type")]
    pub message_type: SignalingMessageType,
    /// Opaque serialized session description.
    pub content: String,
    /// Routing id of the recipient connection.
    #[serde(default)]
    pub to: RoutingId,
}

/// Failure to turn bytes into a [`SignalingMessage`] or back.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The bytes are not text at all.
    #[error("relay message is not valid UTF-8: {0}")]
    NotUtf8(#[from] std::str::Utf8Error),
    /// The text is not one complete JSON document (truncated or garbled).
    #[error("relay message is not a complete JSON document: {0}")]
    Framing(#[source] serde_json::Error),
    /// Well-formed JSON that does not describe a signaling message.
    #[error("relay message has unexpected content: {0}")]
    Semantic(#[source] serde_json::Error),
    /// Serialization failed.
    #[error("failed to encode relay message: {0}")]
    Encode(#[source] serde_json::Error),
}

impl CodecError {
    /// Whether the failure is about message boundaries rather than meaning.
    #[must_use]
    pub const fn is_framing(&self) -> bool {
        matches!(self, Self::NotUtf8(_) | Self::Framing(_))
    }
}

impl SignalingMessage {
    /// Offer from a client; the routing id is assigned by the server later.
    #[must_use]
    pub fn offer(content: impl Into<String>) -> Self {
        Self {
            message_type: SignalingMessageType::Offer,
            content: content.into(),
            to: RoutingId::default(),
        }
    }

    /// Answer addressed to the relay connection `to`.
    #[must_use]
    pub fn answer(to: RoutingId, content: impl Into<String>) -> Self {
        Self {
            message_type: SignalingMessageType::Answer,
            content: content.into(),
            to,
        }
    }

    /// Serialize to the UTF-8 JSON bytes written to the relay.
    ///
    /// # Errors
    /// Mirrors `serde_json`; does not fail for values built by this crate.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(self).map_err(CodecError::Encode)
    }

    /// Parse one relay message.
    ///
    /// # Errors
    /// Errs with a framing error for non-UTF-8, syntactically broken or
    /// truncated input, and with a semantic error for valid JSON carrying an
    /// unknown `type` or missing fields.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let text = std::str::from_utf8(bytes)?;
        serde_json::from_str(text).map_err(|error| match error.classify() {
            Category::Data => CodecError::Semantic(error),
            Category::Io | Category::Syntax | Category::Eof => CodecError::Framing(error),
        })
    }
}
