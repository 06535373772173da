use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Identifier of one relay connection accepted by the signaling server.
/// The server stamps it on every answer so the client learns which
/// connection it was served on.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize, Hash)]
#[serde(transparent)]
pub struct RoutingId(u64);

impl RoutingId {
    /// Wrap `u64` into a `RoutingId` `struct`
    #[must_use]
    pub const fn new(inner: u64) -> Self {
        Self(inner)
    }

    /// Acquire the underlying type
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl From<u64> for RoutingId {
    fn from(val: u64) -> Self {
        Self(val)
    }
}

impl Display for RoutingId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of session description carried in a relayed payload.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "camelCase")]
pub enum SdpType {
    /// Proposal made by the initiating side.
    Offer,
    /// Provisional answer.
    Pranswer,
    /// Final answer from the accepting side.
    Answer,
    /// Rolls back to the last stable state.
    Rollback,
}

/// Session description as produced by the negotiation engine.
///
/// This is the payload relayed inside [`crate::SignalingMessage::content`],
/// serialized as `{"type":"offer","sdp":"v=0..."}`.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Offer, answer or one of the transitional kinds.
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    /// Raw SDP text.
    pub sdp: String,
}

impl SessionDescription {
    /// Build a description of the given kind.
    #[must_use]
    pub fn new(sdp_type: SdpType, sdp: impl Into<String>) -> Self {
        Self {
            sdp_type,
            sdp: sdp.into(),
        }
    }

    /// Serialize to the JSON text relayed to the remote side.
    ///
    /// # Errors
    /// Never fails for well-formed values; the `Result` mirrors `serde_json`.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse the JSON text received from the remote side.
    ///
    /// # Errors
    /// Errs if `text` is not a JSON object with `type` and `sdp` fields.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
