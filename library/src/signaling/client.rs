use log::{debug, info, warn};
use rtc_peers_protocol::{RoutingId, SignalingMessage, SignalingMessageType};

use crate::config::SignalingEndpointConfig;
use crate::relay::{RelayClientTransport, RelayEndpoint, RelayEvent};
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingClientEvent {
    /// The relay connection is up; the offer can be sent.
    Connected,
    /// The one answer this client waits for. The relay is already
    /// disconnected when this is reported.
    Answered { routing_id: RoutingId, answer: String },
    /// The relay went away before an answer arrived.
    Unreachable,
}

/// Client half of the signaling exchange, owned by one client peer.
pub struct SignalingClient {
    transport: Box<dyn RelayClientTransport>,
    config: SignalingEndpointConfig,
    connected: bool,
    success: bool,
    finished: bool,
}

impl SignalingClient {
    #[must_use]
    pub fn new(transport: Box<dyn RelayClientTransport>, config: SignalingEndpointConfig) -> Self {
        Self {
            transport,
            config,
            connected: false,
            success: false,
            finished: false,
        }
    }

    /// Reset for a fresh exchange.
    pub fn start(&mut self) {
        self.transport.disconnect();
        self.connected = false;
        self.success = false;
        self.finished = false;
    }

    /// Dial the relay, `wss://` when the config asks for a secure connection.
    ///
    /// # Errors
    /// Errs if the transport cannot attempt the connection.
    pub fn connect(&mut self, host: &str, port: u16) -> Result<()> {
        let endpoint = RelayEndpoint::new(self.config.connect_securely, host, port);
        info!("connecting to signaling relay {endpoint}");
        self.transport.connect(&endpoint)
    }

    /// # Errors
    /// Errs if the relay is not connected.
    pub fn send_offer(&mut self, offer: &str) -> Result<()> {
        let message = SignalingMessage::offer(offer).encode()?;
        self.transport.send(message)
    }

    /// Next event, if the relay delivered anything that produces one.
    pub fn poll(&mut self) -> Option<SignalingClientEvent> {
        while let Some(event) = self.transport.poll_event() {
            if self.finished {
                debug!("signaling exchange already finished, ignoring {event:?}");
                continue;
            }
            match event {
                RelayEvent::Connected => {
                    self.connected = true;
                    return Some(SignalingClientEvent::Connected);
                }
                RelayEvent::Data(data) => {
                    if let Some(event) = self.on_data(&data) {
                        return Some(event);
                    }
                }
                RelayEvent::Disconnected => {
                    self.connected = false;
                    self.finished = true;
                    warn!("signaling relay disconnected before an answer arrived");
                    return Some(SignalingClientEvent::Unreachable);
                }
                RelayEvent::Error(e) => warn!("signaling relay error: {e}"),
            }
        }
        None
    }

    fn on_data(&mut self, data: &[u8]) -> Option<SignalingClientEvent> {
        let message = match SignalingMessage::decode(data) {
            Ok(message) => message,
            Err(e) => {
                warn!("dropping undecodable signaling message: {e}");
                return None;
            }
        };
        match message.message_type {
            SignalingMessageType::Answer => {
                info!("received answer on routing id {}", message.to);
                self.success = true;
                self.finished = true;
                self.disconnect();
                Some(SignalingClientEvent::Answered {
                    routing_id: message.to,
                    answer: message.content,
                })
            }
            SignalingMessageType::Offer => {
                warn!("signaling client received an offer, ignoring it");
                None
            }
        }
    }

    /// Whether the answer arrived.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.success
    }

    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn disconnect(&mut self) {
        self.connected = false;
        self.transport.disconnect();
    }
}
