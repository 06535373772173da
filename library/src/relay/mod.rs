//! Byte transport underneath the signaling layer.
//!
//! A relay is a reliable, ordered message stream with a client half that dials
//! one server and a server half that accepts many clients, each addressed by a
//! [`RoutingId`]. Transports never call back into the crate; everything they
//! observe is queued and handed out by `poll_event` on the polling thread.

#[cfg(feature = "websocket-relay")]
mod tls;
#[cfg(feature = "websocket-relay")]
mod websocket;

use std::fmt;

use rtc_peers_protocol::RoutingId;

use crate::config::ServerSignalingConfig;
use crate::Result;

#[cfg(feature = "websocket-relay")]
pub use websocket::{WebSocketClient, WebSocketRelay, WebSocketServer};

/// Where a client relay connects to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayEndpoint {
    pub secure: bool,
    pub host: String,
    pub port: u16,
}

impl RelayEndpoint {
    #[must_use]
    pub fn new(secure: bool, host: impl Into<String>, port: u16) -> Self {
        Self {
            secure,
            host: host.into(),
            port,
        }
    }

    /// `ws://host:port/` or `wss://host:port/`.
    #[must_use]
    pub fn url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("{scheme}://[{}]:{}/", self.host, self.port)
        } else {
            format!("{scheme}://{}:{}/", self.host, self.port)
        }
    }
}

impl fmt::Display for RelayEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

/// Observed by the client half.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    Connected,
    Data(Vec<u8>),
    /// The connection is gone, or could never be established.
    Disconnected,
    Error(String),
}

/// Observed by the server half.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayServerEvent {
    Connected(RoutingId),
    Data(RoutingId, Vec<u8>),
    Disconnected(RoutingId),
    Error(String),
}

pub trait RelayClientTransport {
    /// Start connecting. Completion is reported as [`RelayEvent::Connected`]
    /// or [`RelayEvent::Disconnected`].
    ///
    /// # Errors
    /// Errs when the connect cannot even be attempted, e.g. an invalid host.
    fn connect(&mut self, endpoint: &RelayEndpoint) -> Result<()>;

    /// # Errors
    /// Errs if not connected.
    fn send(&mut self, data: Vec<u8>) -> Result<()>;

    /// Drop the connection. No event is reported for a local disconnect.
    fn disconnect(&mut self);

    fn poll_event(&mut self) -> Option<RelayEvent>;
}

pub trait RelayServerTransport {
    /// Start accepting connections on `port`, wrapped in TLS when `tls` is
    /// given.
    ///
    /// # Errors
    /// Errs if the port cannot be bound or the TLS material cannot be loaded.
    fn listen(&mut self, port: u16, tls: Option<&ServerSignalingConfig>) -> Result<()>;

    /// # Errors
    /// Errs if `connection` is not open.
    fn send_to(&mut self, connection: RoutingId, data: Vec<u8>) -> Result<()>;

    fn disconnect(&mut self, connection: RoutingId);

    fn poll_event(&mut self) -> Option<RelayServerEvent>;

    /// Close the listener and every connection.
    fn stop(&mut self);
}

/// Creates relay transports for peers and the signaling server.
pub trait RelayFactory {
    fn client(&self) -> Box<dyn RelayClientTransport>;

    fn server(&self) -> Box<dyn RelayServerTransport>;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn endpoint_url_follows_secure_flag() {
        assert_eq!(
            RelayEndpoint::new(false, "localhost", 7777).url(),
            "ws://localhost:7777/"
        );
        assert_eq!(
            RelayEndpoint::new(true, "signal.example.org", 443).url(),
            "wss://signal.example.org:443/"
        );
    }

    #[test]
    fn ipv6_hosts_are_bracketed() {
        assert_eq!(
            RelayEndpoint::new(false, "::1", 9000).to_string(),
            "ws://[::1]:9000/"
        );
    }
}
