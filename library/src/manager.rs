//! Host-facing entry point: owns every peer and reports their lifecycle.

use std::cell::{Ref, RefCell, RefMut};
use std::collections::HashMap;
use std::rc::Rc;

use log::{debug, info, warn};
use rtc_peers_protocol::RoutingId;

use crate::config::{NegotiationConfig, SignalingEndpointConfig};
use crate::engine::EngineFactory;
use crate::peer::{Peer, PeerId, PeerSignal, Role};
use crate::relay::RelayFactory;
use crate::signaling::{SignalingServer, SignalingServerEvent};
use crate::timer::Clock;
use crate::{Error, Result};

/// Why a peer left the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    /// The relay went away before the answer arrived.
    SignalingServerUnreachable,
    /// The data channel did not open within the configured timeout.
    Timeout,
    /// Reserved for a negotiation-level rejection by the remote side.
    ConnectionRejected,
    /// Closed on request, via `disconnect_peer` or `stop`.
    Shutdown,
    /// The connection failed or the remote side closed it.
    ConnectionClosed,
}

/// Receives everything the manager has to report. Called synchronously from
/// [`ConnectionManager::poll`] and the teardown methods.
pub trait NetEventListener {
    fn on_peer_connected(&mut self, peer: PeerId);

    fn on_peer_disconnected(&mut self, peer: PeerId, reason: DisconnectReason);

    /// `message` is only valid for the duration of the call.
    fn on_network_receive(&mut self, peer: PeerId, message: &[u8]);
}

/// External collaborators shared by the manager and all of its peers.
#[derive(Clone)]
pub struct Backend {
    pub(crate) engines: Rc<dyn EngineFactory>,
    pub(crate) relays: Rc<dyn RelayFactory>,
    pub(crate) clock: Rc<dyn Clock>,
}

impl Backend {
    /// Bundle an engine factory, a relay and a clock.
    pub fn new<E, R, C>(engines: E, relays: R, clock: C) -> Self
    where
        E: EngineFactory + 'static,
        R: RelayFactory + 'static,
        C: Clock + 'static,
    {
        Self {
            engines: Rc::new(engines),
            relays: Rc::new(relays),
            clock: Rc::new(clock),
        }
    }

    /// `WebSocket` relay and the system clock.
    ///
    /// # Errors
    /// Errs if the relay runtime cannot be started.
    #[cfg(feature = "websocket-relay")]
    pub fn websocket<E>(engines: E) -> Result<Self>
    where
        E: EngineFactory + 'static,
    {
        Ok(Self::new(
            engines,
            crate::relay::WebSocketRelay::new()?,
            crate::timer::SystemClock,
        ))
    }
}

/// Messages a candidate received before the host was told it connected.
type HeldMessages = Rc<RefCell<HashMap<PeerId, Vec<Vec<u8>>>>>;

/// Drives every peer of one host.
///
/// Peers negotiate in the candidate band and move to the active band once
/// their data channel opens. A peer is never in both.
pub struct ConnectionManager<L> {
    backend: Backend,
    listener: Rc<RefCell<L>>,
    negotiation: NegotiationConfig,
    signaling: SignalingEndpointConfig,
    role: Option<Role>,
    server: Option<Rc<RefCell<SignalingServer>>>,
    candidates: Vec<Peer>,
    actives: Vec<Peer>,
    held: HeldMessages,
    next_peer_id: u64,
}

impl<L: NetEventListener + 'static> ConnectionManager<L> {
    pub fn new(backend: Backend, listener: L) -> Self {
        Self {
            backend,
            listener: Rc::new(RefCell::new(listener)),
            negotiation: NegotiationConfig::default(),
            signaling: SignalingEndpointConfig::default(),
            role: None,
            server: None,
            candidates: Vec::new(),
            actives: Vec::new(),
            held: HeldMessages::default(),
            next_peer_id: 1,
        }
    }

    /// Configuration for peers created from now on.
    ///
    /// # Errors
    /// Errs if the manager is running or `negotiation` does not validate.
    pub fn set_config(
        &mut self,
        negotiation: NegotiationConfig,
        signaling: SignalingEndpointConfig,
    ) -> Result<()> {
        if self.role.is_some() {
            return Err(Error::AlreadyStarted);
        }
        negotiation.validate()?;
        self.negotiation = negotiation;
        self.signaling = signaling;
        Ok(())
    }

    /// Start as a server listening on `port`, or as a client.
    ///
    /// # Errors
    /// Errs if already running, if a server is started without a port, or
    /// if the signaling server cannot listen.
    pub fn start(&mut self, role: Role, port: Option<u16>) -> Result<()> {
        if self.role.is_some() {
            return Err(Error::AlreadyStarted);
        }
        if role == Role::Server {
            let port =
                port.ok_or_else(|| Error::Config("a server needs a listen port".to_owned()))?;
            let mut server =
                SignalingServer::new(self.backend.relays.server(), self.signaling.server.clone());
            server.start(port)?;
            self.server = Some(Rc::new(RefCell::new(server)));
        }
        self.role = Some(role);
        info!("connection manager started as {role:?}");
        Ok(())
    }

    /// Open a connection to the server at `address:port`. An outstanding
    /// attempt is closed and replaced.
    ///
    /// # Errors
    /// Errs unless started as a client, or when the relay refuses the
    /// address.
    pub fn connect(&mut self, address: &str, port: u16) -> Result<PeerId> {
        match self.role {
            None => return Err(Error::NotStarted),
            Some(Role::Server) => {
                return Err(Error::WrongRole {
                    expected: Role::Client,
                    actual: Role::Server,
                })
            }
            Some(Role::Client) => {}
        }

        for mut previous in self.candidates.drain(..) {
            info!("replacing outstanding connection attempt {}", previous.id());
            previous.close();
            self.held.borrow_mut().remove(&previous.id());
            self.listener
                .borrow_mut()
                .on_peer_disconnected(previous.id(), DisconnectReason::Shutdown);
        }

        let mut peer = self.create_peer(Role::Client)?;
        peer.connect(address, port)?;
        let id = peer.id();
        self.candidates.push(peer);
        Ok(id)
    }

    /// Close one peer and report [`DisconnectReason::Shutdown`].
    ///
    /// # Errors
    /// Errs if no peer has this id.
    pub fn disconnect_peer(&mut self, id: PeerId) -> Result<()> {
        let mut peer = take_peer(&mut self.candidates, id)
            .or_else(|| take_peer(&mut self.actives, id))
            .ok_or(Error::UnknownPeer(id.into_inner()))?;
        peer.close();
        self.held.borrow_mut().remove(&id);
        self.listener
            .borrow_mut()
            .on_peer_disconnected(id, DisconnectReason::Shutdown);
        Ok(())
    }

    /// # Errors
    /// Errs if no peer has this id or its channel is not open.
    pub fn send(&mut self, id: PeerId, payload: &[u8]) -> Result<()> {
        self.actives
            .iter_mut()
            .chain(self.candidates.iter_mut())
            .find(|peer| peer.id() == id)
            .ok_or(Error::UnknownPeer(id.into_inner()))?
            .send(payload)
    }

    /// Close everything. Active peers are reported as shut down.
    pub fn stop(&mut self) {
        for mut peer in self.candidates.drain(..) {
            peer.close();
        }
        for mut peer in self.actives.drain(..) {
            peer.close();
            self.listener
                .borrow_mut()
                .on_peer_disconnected(peer.id(), DisconnectReason::Shutdown);
        }
        self.held.borrow_mut().clear();
        if let Some(server) = self.server.take() {
            server.borrow_mut().stop();
        }
        if self.role.take().is_some() {
            info!("connection manager stopped");
        }
    }

    /// One host tick: candidates, then actives, then the signaling server.
    pub fn poll(&mut self) {
        self.poll_candidates();
        self.poll_actives();
        self.poll_signaling_server();
    }

    fn poll_candidates(&mut self) {
        for index in (0..self.candidates.len()).rev() {
            let Some(peer) = self.candidates.get_mut(index) else {
                continue;
            };
            peer.poll();

            let reason = if peer.is_timed_out() {
                Some(DisconnectReason::Timeout)
            } else if peer.is_signaling_unreachable() {
                Some(DisconnectReason::SignalingServerUnreachable)
            } else if peer.is_closed() {
                Some(DisconnectReason::ConnectionClosed)
            } else if peer.is_connection_open() {
                None
            } else {
                continue;
            };

            let peer = self.candidates.remove(index);
            let id = peer.id();
            match reason {
                Some(reason) => {
                    info!("peer {id} failed to connect: {reason:?}");
                    self.held.borrow_mut().remove(&id);
                    self.listener.borrow_mut().on_peer_disconnected(id, reason);
                }
                None => {
                    info!("peer {id} connected");
                    self.actives.push(peer);
                    let held = self.held.borrow_mut().remove(&id).unwrap_or_default();
                    let mut listener = self.listener.borrow_mut();
                    listener.on_peer_connected(id);
                    for message in held {
                        listener.on_network_receive(id, &message);
                    }
                }
            }
        }
    }

    fn poll_actives(&mut self) {
        for index in (0..self.actives.len()).rev() {
            let Some(peer) = self.actives.get_mut(index) else {
                continue;
            };
            peer.poll();
            if peer.is_connection_open() {
                continue;
            }
            let mut peer = self.actives.remove(index);
            peer.close();
            info!("peer {} disconnected", peer.id());
            self.listener
                .borrow_mut()
                .on_peer_disconnected(peer.id(), DisconnectReason::ConnectionClosed);
        }
    }

    fn poll_signaling_server(&mut self) {
        let Some(server) = self.server.as_ref().map(Rc::clone) else {
            return;
        };
        loop {
            let event = server.borrow_mut().poll();
            match event {
                Some(SignalingServerEvent::Offered { connection, offer }) => {
                    self.on_offer(&server, connection, &offer);
                }
                Some(SignalingServerEvent::Disconnected(connection)) => {
                    debug!("relay connection {connection} went away");
                }
                None => break,
            }
        }
    }

    fn on_offer(&mut self, server: &Rc<RefCell<SignalingServer>>, connection: RoutingId, offer: &str) {
        let owned = self
            .candidates
            .iter()
            .chain(self.actives.iter())
            .any(|peer| peer.connection_id() == connection);
        if owned {
            warn!("relay connection {connection} already has a peer, dropping its offer");
            return;
        }

        let mut peer = match self.create_peer(Role::Server) {
            Ok(peer) => peer,
            Err(e) => {
                warn!("cannot create a peer for relay connection {connection}: {e}");
                return;
            }
        };
        peer.set_connection_id(connection);
        let accepted = peer
            .set_signaling_server(Rc::clone(server))
            .and_then(|()| peer.on_received_offer(offer));
        match accepted {
            Ok(()) => {
                debug!("peer {} negotiating with relay connection {connection}", peer.id());
                self.candidates.push(peer);
            }
            Err(e) => {
                self.held.borrow_mut().remove(&peer.id());
                warn!("rejecting offer from relay connection {connection}: {e}");
            }
        }
    }

    fn create_peer(&mut self, role: Role) -> Result<Peer> {
        let id = PeerId::new(self.next_peer_id);
        self.next_peer_id += 1;

        let mut peer = Peer::new(id, self.backend.clone());
        peer.set_config(self.negotiation.clone(), self.signaling.clone())?;
        peer.start(role)?;

        self.held.borrow_mut().insert(id, Vec::new());
        let listener = Rc::clone(&self.listener);
        let held = Rc::clone(&self.held);
        peer.subscribe(move |peer, signal| {
            let PeerSignal::MessageReceived(message) = signal else {
                return;
            };
            if let Some(queue) = held.borrow_mut().get_mut(&peer) {
                queue.push(message.to_vec());
                return;
            }
            listener.borrow_mut().on_network_receive(peer, message);
        });
        Ok(peer)
    }

    #[must_use]
    pub const fn role(&self) -> Option<Role> {
        self.role
    }

    #[must_use]
    pub fn peer(&self, id: PeerId) -> Option<&Peer> {
        self.actives
            .iter()
            .chain(self.candidates.iter())
            .find(|peer| peer.id() == id)
    }

    pub fn active_peers(&self) -> impl Iterator<Item = &Peer> {
        self.actives.iter()
    }

    pub fn candidate_peers(&self) -> impl Iterator<Item = &Peer> {
        self.candidates.iter()
    }

    #[must_use]
    pub fn candidate_count(&self) -> usize {
        self.candidates.len()
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.actives.len()
    }

    pub fn listener(&self) -> Ref<'_, L> {
        self.listener.borrow()
    }

    pub fn listener_mut(&self) -> RefMut<'_, L> {
        self.listener.borrow_mut()
    }
}

fn take_peer(peers: &mut Vec<Peer>, id: PeerId) -> Option<Peer> {
    let index = peers.iter().position(|peer| peer.id() == id)?;
    Some(peers.remove(index))
}
