/*!
Helper crate that declares the wire types shared between the
[rtc-peers](../rtc_peers/index.html) signaling client and signaling server.

Everything that crosses the relay is JSON text: a [`SignalingMessage`] whose
`content` is itself a serialized [`SessionDescription`].
*/

#![warn(missing_docs)]

mod common;
mod signal_message;

pub use common::{RoutingId, SdpType, SessionDescription};
pub use signal_message::{CodecError, SignalingMessage, SignalingMessageType};
