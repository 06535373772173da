//! Offer/answer exchange over a relay transport.
//!
//! The client side is single-use: it connects, sends one offer, waits for one
//! answer addressed back to it and disconnects. The server side accepts any
//! number of relay connections and answers each one by its [`RoutingId`].
//!
//! [`RoutingId`]: rtc_peers_protocol::RoutingId

mod client;
mod server;

pub use client::{SignalingClient, SignalingClientEvent};
pub use server::{SignalingServer, SignalingServerEvent};
