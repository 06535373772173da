/*!
This crate drives `WebRTC` offer/answer negotiation for data-channel peers
from a host frame loop, one [`poll`](manager::ConnectionManager::poll) per tick.

# Overview

A [`ConnectionManager`](manager::ConnectionManager) runs either as a server,
accepting arbitrarily many clients through one embedded
[signaling server](signaling::SignalingServer), or as a client connecting to
one server. Every logical connection is a [`Peer`](peer::Peer): a state
machine that walks an opaque [negotiation engine](engine::NegotiationEngine)
through create-offer / set-description / create-answer steps, relays the
resulting description through the signaling layer, and reports when the data
channel opens, closes or times out.

Nothing in here blocks. Asynchronous engine operations are handles that are
checked again on the next tick, and relay I/O is handed off to queues drained
by `poll`.

The engine itself (SDP generation, ICE gathering, DTLS/SCTP) is supplied by
the host through [`EngineFactory`](engine::EngineFactory). The relay is
supplied through [`RelayFactory`](relay::RelayFactory); a `WebSocket`
implementation ships behind the default `websocket-relay` feature.
*/

#![allow(clippy::module_name_repetitions)]
// clippy WARN level lints
#![warn(
    // missing_docs,
    clippy::cargo,
    clippy::pedantic,
    // clippy::nursery,
    clippy::dbg_macro,
    clippy::unwrap_used,
    clippy::integer_division,
    clippy::large_include_file,
    clippy::map_err_ignore,
    // clippy::missing_docs_in_private_items,
    clippy::panic,
    clippy::todo,
    clippy::undocumented_unsafe_blocks,
    clippy::unimplemented,
    clippy::unreachable
)]
// clippy WARN level lints, that can be upgraded to DENY if preferred
#![warn(
    clippy::as_conversions,
    clippy::assertions_on_result_states,
    clippy::clone_on_ref_ptr,
    clippy::deref_by_slicing,
    clippy::empty_drop,
    clippy::empty_structs_with_brackets,
    clippy::exit,
    clippy::float_cmp_const,
    clippy::if_then_some_else_none,
    clippy::indexing_slicing,
    clippy::let_underscore_must_use,
    clippy::lossy_float_literal,
    clippy::string_slice,
    clippy::try_err
)]
// clippy DENY level lints, they always have a quick fix that should be preferred
#![deny(
    clippy::wildcard_imports,
    clippy::multiple_inherent_impl,
    clippy::rc_buffer,
    clippy::rc_mutex,
    clippy::rest_pat_in_fully_bound_structs,
    clippy::same_name_method,
    clippy::self_named_module_files,
    clippy::separated_literal_suffix,
    clippy::str_to_string,
    clippy::string_add,
    clippy::string_to_string,
    clippy::unnecessary_self_imports,
    clippy::unneeded_field_pattern,
    clippy::verbose_file_reads
)]

pub mod config;
pub(crate) mod constants;
pub mod engine;
mod error;
pub mod manager;
pub mod peer;
pub mod relay;
pub mod sdp;
pub mod signaling;
pub mod timer;

pub use error::{Error, Result};
pub use manager::{Backend, ConnectionManager, DisconnectReason, NetEventListener};
pub use peer::{Peer, PeerId, PeerSignal, Role};
pub use rtc_peers_protocol::{
    CodecError, RoutingId, SdpType, SessionDescription, SignalingMessage, SignalingMessageType,
};
