use log::{debug, info, warn};
use rtc_peers_protocol::{RoutingId, SignalingMessage, SignalingMessageType};

use crate::config::ServerSignalingConfig;
use crate::relay::{RelayServerEvent, RelayServerTransport};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingServerEvent {
    /// A client sent its offer over relay connection `connection`.
    Offered { connection: RoutingId, offer: String },
    Disconnected(RoutingId),
}

/// Server half of the signaling exchange, shared by the manager and every
/// server-role peer.
pub struct SignalingServer {
    transport: Box<dyn RelayServerTransport>,
    config: ServerSignalingConfig,
    running: bool,
}

impl SignalingServer {
    #[must_use]
    pub fn new(transport: Box<dyn RelayServerTransport>, config: ServerSignalingConfig) -> Self {
        Self {
            transport,
            config,
            running: false,
        }
    }

    /// # Errors
    /// Errs if the listener cannot be set up.
    pub fn start(&mut self, listen_port: u16) -> Result<()> {
        self.transport.listen(listen_port, Some(&self.config))?;
        self.running = true;
        info!("signaling server started on port {listen_port}");
        Ok(())
    }

    /// Next event from any relay connection.
    pub fn poll(&mut self) -> Option<SignalingServerEvent> {
        if !self.running {
            return None;
        }
        while let Some(event) = self.transport.poll_event() {
            match event {
                RelayServerEvent::Connected(connection) => {
                    debug!("relay connection {connection} opened");
                }
                RelayServerEvent::Data(connection, data) => {
                    if let Some(event) = Self::on_data(connection, &data) {
                        return Some(event);
                    }
                }
                RelayServerEvent::Disconnected(connection) => {
                    return Some(SignalingServerEvent::Disconnected(connection));
                }
                RelayServerEvent::Error(e) => warn!("signaling relay error: {e}"),
            }
        }
        None
    }

    fn on_data(connection: RoutingId, data: &[u8]) -> Option<SignalingServerEvent> {
        match SignalingMessage::decode(data) {
            Ok(message) if message.message_type == SignalingMessageType::Offer => {
                debug!("offer received on relay connection {connection}");
                Some(SignalingServerEvent::Offered {
                    connection,
                    offer: message.content,
                })
            }
            Ok(_) => {
                warn!("relay connection {connection} sent an answer to the server, ignoring it");
                None
            }
            Err(e) if e.is_framing() => {
                warn!("dropping malformed payload from relay connection {connection}: {e}");
                None
            }
            Err(e) => {
                warn!("dropping signaling message from relay connection {connection}: {e}");
                None
            }
        }
    }

    /// # Errors
    /// Errs if the server is stopped or `connection` is gone.
    pub fn send_answer_to_client(&mut self, connection: RoutingId, answer: &str) -> Result<()> {
        if !self.running {
            return Err(Error::SignalingServerStopped);
        }
        let message = SignalingMessage::answer(connection, answer).encode()?;
        self.transport.send_to(connection, message)
    }

    pub fn disconnect(&mut self, connection: RoutingId) {
        self.transport.disconnect(connection);
    }

    pub fn stop(&mut self) {
        if self.running {
            self.transport.stop();
            self.running = false;
            info!("signaling server stopped");
        }
    }

    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.running
    }
}
