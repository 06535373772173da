//! One logical connection and the state machine that negotiates it.
//!
//! A [`Peer`] owns one negotiation engine. As a client it dials the relay,
//! creates the offer and waits for the answer; as a server it is handed an
//! offer and answers it through the shared [`SignalingServer`]. Every step is
//! advanced from [`Peer::poll`], which never blocks: asynchronous engine
//! operations are kept in [`OperationSlot`]s and checked again next tick.

mod phase;
mod signal;

use std::cell::RefCell;
use std::fmt::{Display, Formatter};
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Instant;

use log::{debug, info, warn};
use rtc_peers_protocol::{RoutingId, SdpType, SessionDescription};

pub use phase::{NegotiationPhase, OperationSlot};
pub use signal::PeerSignal;

use crate::config::{CandidateDiscovery, NegotiationConfig, SignalingEndpointConfig};
use crate::constants::{DATA_CHANNEL_LABEL, DEFAULT_MAX_RETRANSMITS};
use crate::engine::{
    DataChannelInit, EngineEvent, GatheringState, IceConnectionState, NegotiationEngine,
};
use crate::manager::Backend;
use crate::sdp::parse_remote_endpoint;
use crate::signaling::{SignalingClient, SignalingClientEvent, SignalingServer};
use crate::timer::Timer;
use crate::{Error, Result};
use phase::PendingOperations;
use signal::Observers;

/// Stable id of a peer, handed to its engine as the callback context.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PeerId(u64);

impl PeerId {
    /// Wrap `u64` into a `PeerId` `struct`
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

impl From<u64> for PeerId {
    fn from(val: u64) -> Self {
        Self(val)
    }
}

impl Display for PeerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which side of the offer/answer exchange a peer plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Dials the relay and sends the offer.
    Client,
    /// Receives offers through the signaling server and answers them.
    Server,
}

/// Owned copy of an engine event, applied in the order the engine reported it.
enum Change {
    Message(Vec<u8>),
    ChannelOpen,
    ChannelClosed,
    DataChannel,
    IceConnection(IceConnectionState),
    Gathering(GatheringState),
}

/// One logical connection, negotiated by polling. See the module docs.
pub struct Peer {
    id: PeerId,
    backend: Backend,
    negotiation: NegotiationConfig,
    signaling_config: SignalingEndpointConfig,
    role: Option<Role>,
    phase: NegotiationPhase,
    engine: Option<Box<dyn NegotiationEngine>>,
    signaling_client: Option<SignalingClient>,
    signaling_server: Option<Rc<RefCell<SignalingServer>>>,
    connection_id: RoutingId,
    local_description: Option<SessionDescription>,
    remote_description: Option<SessionDescription>,
    remote_endpoint: Option<SocketAddr>,
    operations: PendingOperations,
    trickle_timer: Timer,
    timeout_timer: Timer,
    channel_open: bool,
    closed: bool,
    timed_out: bool,
    signaling_unreachable: bool,
    observers: Observers,
}

impl Peer {
    #[must_use]
    pub fn new(id: PeerId, backend: Backend) -> Self {
        Self {
            id,
            backend,
            negotiation: NegotiationConfig::default(),
            signaling_config: SignalingEndpointConfig::default(),
            role: None,
            phase: NegotiationPhase::Idle,
            engine: None,
            signaling_client: None,
            signaling_server: None,
            connection_id: RoutingId::default(),
            local_description: None,
            remote_description: None,
            remote_endpoint: None,
            operations: PendingOperations::default(),
            trickle_timer: Timer::none(),
            timeout_timer: Timer::none(),
            channel_open: false,
            closed: false,
            timed_out: false,
            signaling_unreachable: false,
            observers: Observers::default(),
        }
    }

    /// Replace the configuration. Only allowed before [`Peer::start`].
    ///
    /// # Errors
    /// Errs if the peer has started or `negotiation` does not validate.
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
        self.signaling_config = signaling;
        Ok(())
    }

    /// Fix the role and create the engine.
    ///
    /// # Errors
    /// Errs if the peer was already started.
    pub fn start(&mut self, role: Role) -> Result<()> {
        if self.role.is_some() {
            return Err(Error::AlreadyStarted);
        }
        self.role = Some(role);
        self.engine = Some(self.backend.engines.create(self.id, &self.negotiation));
        if role == Role::Client {
            let mut client =
                SignalingClient::new(self.backend.relays.client(), self.signaling_config.clone());
            client.start();
            self.signaling_client = Some(client);
        }
        debug!("peer {} started as {role:?}", self.id);
        Ok(())
    }

    /// Dial the relay at `address:port` and start the connection timeout.
    ///
    /// # Errors
    /// Errs on a server peer, before `start`, after close, on a second
    /// call, or when the relay transport refuses the address.
    pub fn connect(&mut self, address: &str, port: u16) -> Result<()> {
        self.expect_role(Role::Client)?;
        self.ensure_live()?;
        if self.phase != NegotiationPhase::Idle {
            return Err(Error::AlreadyStarted);
        }
        let client = self.signaling_client.as_mut().ok_or(Error::NotStarted)?;
        client.connect(address, port)?;

        self.timeout_timer = Timer::create(self.backend.clock.now(), self.negotiation.timeout);
        self.phase = NegotiationPhase::AwaitingSignalingConnect;
        info!("peer {} connecting to {address}:{port}", self.id);
        Ok(())
    }

    /// # Errors
    /// Errs unless this is a started server peer.
    pub fn set_signaling_server(&mut self, server: Rc<RefCell<SignalingServer>>) -> Result<()> {
        self.expect_role(Role::Server)?;
        self.signaling_server = Some(server);
        Ok(())
    }

    /// Feed the offer a client sent through the relay. Starts the
    /// connection timeout.
    ///
    /// # Errors
    /// Errs unless this is a started, idle server peer and `offer` is a JSON
    /// session description of type offer.
    pub fn on_received_offer(&mut self, offer: &str) -> Result<()> {
        self.expect_role(Role::Server)?;
        self.ensure_live()?;
        if self.phase != NegotiationPhase::Idle {
            return Err(Error::OfferAlreadyReceived);
        }
        let description = SessionDescription::from_json(offer)?;
        if description.sdp_type != SdpType::Offer {
            return Err(Error::UnexpectedDescription {
                expected: SdpType::Offer,
                actual: description.sdp_type,
            });
        }
        let engine = self.engine.as_mut().ok_or(Error::NotStarted)?;
        self.operations.begin(
            OperationSlot::SetRemoteOffer,
            engine.set_remote_description(&description),
        );
        self.remote_description = Some(description);
        self.timeout_timer = Timer::create(self.backend.clock.now(), self.negotiation.timeout);
        self.phase = NegotiationPhase::OfferReceived;
        debug!("peer {} received offer on relay connection {}", self.id, self.connection_id);
        Ok(())
    }

    pub fn set_connection_id(&mut self, id: RoutingId) {
        self.connection_id = id;
    }

    /// Advance one tick. Never blocks.
    pub fn poll(&mut self) {
        if self.is_finished() {
            return;
        }
        let now = self.backend.clock.now();
        if !self.channel_open && self.timeout_timer.is_expired(now) {
            self.time_out();
            return;
        }

        self.poll_signaling();
        while !self.is_finished() && self.advance(now) {}
        if !self.is_finished() {
            self.drain_engine_events();
        }
    }

    /// # Errors
    /// Errs if the peer is closed or the channel is not open yet.
    pub fn send(&mut self, payload: &[u8]) -> Result<()> {
        if self.is_finished() {
            return Err(Error::Closed);
        }
        if !self.channel_open {
            return Err(Error::ChannelNotOpen);
        }
        let engine = self.engine.as_mut().ok_or(Error::NotStarted)?;
        Ok(engine.send(payload)?)
    }

    /// Release the engine and relay. Reports `ConnectionClosed` unless the
    /// peer already ended some other way.
    pub fn close(&mut self) {
        if self.is_finished() {
            self.release();
            return;
        }
        self.closed = true;
        self.phase = NegotiationPhase::Closed;
        self.release();
        info!("peer {} closed", self.id);
        self.observers
            .notify(self.id, &PeerSignal::ConnectionClosed);
    }

    /// Register an observer for messages and the terminal signal.
    pub fn subscribe<F>(&mut self, observer: F)
    where
        F: FnMut(PeerId, &PeerSignal<'_>) + 'static,
    {
        self.observers.subscribe(Box::new(observer));
    }

    #[must_use]
    pub const fn id(&self) -> PeerId {
        self.id
    }

    #[must_use]
    pub const fn role(&self) -> Option<Role> {
        self.role
    }

    #[must_use]
    pub const fn phase(&self) -> NegotiationPhase {
        self.phase
    }

    /// Relay connection this peer was negotiated over.
    #[must_use]
    pub const fn connection_id(&self) -> RoutingId {
        self.connection_id
    }

    #[must_use]
    pub const fn is_connection_open(&self) -> bool {
        self.channel_open && !self.is_finished()
    }

    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    #[must_use]
    pub const fn is_timed_out(&self) -> bool {
        self.timed_out
    }

    #[must_use]
    pub const fn is_signaling_unreachable(&self) -> bool {
        self.signaling_unreachable
    }

    /// Closed, timed out or lost its relay; nothing happens after this.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.closed || self.timed_out || self.signaling_unreachable
    }

    /// Address of the remote side, known once the channel is open.
    #[must_use]
    pub const fn remote_endpoint(&self) -> Option<SocketAddr> {
        self.remote_endpoint
    }

    #[must_use]
    pub const fn local_description(&self) -> Option<&SessionDescription> {
        self.local_description.as_ref()
    }

    #[must_use]
    pub const fn remote_description(&self) -> Option<&SessionDescription> {
        self.remote_description.as_ref()
    }

    /// Whether an engine operation is outstanding in `slot`.
    #[must_use]
    pub fn has_pending(&self, slot: OperationSlot) -> bool {
        self.operations.is_live(slot)
    }

    fn expect_role(&self, expected: Role) -> Result<()> {
        match self.role {
            None => Err(Error::NotStarted),
            Some(actual) if actual != expected => Err(Error::WrongRole { expected, actual }),
            Some(_) => Ok(()),
        }
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_finished() {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }

    fn poll_signaling(&mut self) {
        let Some(client) = self.signaling_client.as_mut() else {
            return;
        };
        let mut events = Vec::new();
        while let Some(event) = client.poll() {
            events.push(event);
        }

        for event in events {
            if self.is_finished() {
                break;
            }
            match event {
                SignalingClientEvent::Connected => {
                    if self.phase == NegotiationPhase::AwaitingSignalingConnect {
                        self.begin_offer();
                    }
                }
                SignalingClientEvent::Answered { routing_id, answer } => {
                    self.on_answer(routing_id, &answer);
                }
                SignalingClientEvent::Unreachable => self.on_signaling_unreachable(),
            }
        }
    }

    fn begin_offer(&mut self) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        let init = DataChannelInit {
            ordered: false,
            max_retransmits: DEFAULT_MAX_RETRANSMITS,
        };
        if let Err(e) = engine.create_data_channel(DATA_CHANNEL_LABEL, init) {
            warn!("peer {}: cannot create data channel: {e}", self.id);
            self.close();
            return;
        }
        self.operations
            .begin(OperationSlot::CreateOffer, engine.create_offer());
        self.phase = NegotiationPhase::CreatingOffer;
        debug!("peer {}: relay connected, creating offer", self.id);
    }

    fn on_answer(&mut self, routing_id: RoutingId, answer: &str) {
        if self.phase != NegotiationPhase::OfferSent {
            warn!("peer {}: unexpected answer in phase {:?}", self.id, self.phase);
            return;
        }
        self.connection_id = routing_id;

        let description = match SessionDescription::from_json(answer) {
            Ok(description) if description.sdp_type == SdpType::Answer => description,
            Ok(description) => {
                warn!("peer {}: expected an answer, got {:?}", self.id, description.sdp_type);
                self.close();
                return;
            }
            Err(e) => {
                warn!("peer {}: malformed answer: {e}", self.id);
                self.close();
                return;
            }
        };
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        self.operations.begin(
            OperationSlot::SetRemoteAnswer,
            engine.set_remote_description(&description),
        );
        self.remote_description = Some(description);
        self.phase = NegotiationPhase::SettingRemoteAnswer;
    }

    fn on_signaling_unreachable(&mut self) {
        if self
            .signaling_client
            .as_ref()
            .is_some_and(SignalingClient::is_success)
        {
            return;
        }
        self.signaling_unreachable = true;
        self.phase = NegotiationPhase::Closed;
        self.release();
        warn!("peer {}: signaling relay unreachable", self.id);
        self.observers
            .notify(self.id, &PeerSignal::SignalingUnreachable);
    }

    /// Take one step if the current phase's operation has finished.
    fn advance(&mut self, now: Instant) -> bool {
        match self.phase {
            NegotiationPhase::CreatingOffer => match self.finished(OperationSlot::CreateOffer) {
                Some(description) => self.set_local(
                    description,
                    OperationSlot::SetLocalOffer,
                    NegotiationPhase::SettingLocalOffer,
                ),
                None => false,
            },
            NegotiationPhase::SettingLocalOffer => {
                self.finished(OperationSlot::SetLocalOffer).is_some() && self.open_trickle_window(now)
            }
            NegotiationPhase::SettingRemoteAnswer => {
                if self.finished(OperationSlot::SetRemoteAnswer).is_none() {
                    return false;
                }
                self.phase = NegotiationPhase::AwaitingChannelOpen;
                true
            }
            NegotiationPhase::OfferReceived => {
                if self.finished(OperationSlot::SetRemoteOffer).is_none() {
                    return false;
                }
                let Some(engine) = self.engine.as_mut() else {
                    return false;
                };
                self.operations
                    .begin(OperationSlot::CreateAnswer, engine.create_answer());
                self.phase = NegotiationPhase::CreatingAnswer;
                true
            }
            NegotiationPhase::CreatingAnswer => match self.finished(OperationSlot::CreateAnswer) {
                Some(description) => self.set_local(
                    description,
                    OperationSlot::SetLocalAnswer,
                    NegotiationPhase::SettingLocalAnswer,
                ),
                None => false,
            },
            NegotiationPhase::SettingLocalAnswer => {
                self.finished(OperationSlot::SetLocalAnswer).is_some() && self.open_trickle_window(now)
            }
            NegotiationPhase::AwaitingTrickleWindow => self.send_local_description(now),
            _ => false,
        }
    }

    /// `Some` with the operation's output once it finished successfully. A
    /// failed operation closes the peer.
    fn finished(&mut self, slot: OperationSlot) -> Option<Option<SessionDescription>> {
        match self.operations.take_finished(slot)? {
            Ok(description) => Some(description),
            Err(e) => {
                warn!("peer {}: {slot:?} failed: {e}", self.id);
                self.close();
                None
            }
        }
    }

    fn set_local(
        &mut self,
        description: Option<SessionDescription>,
        slot: OperationSlot,
        next: NegotiationPhase,
    ) -> bool {
        let Some(description) = description else {
            warn!("peer {}: engine produced no description", self.id);
            self.close();
            return false;
        };
        let Some(engine) = self.engine.as_mut() else {
            return false;
        };
        self.operations
            .begin(slot, engine.set_local_description(&description));
        self.local_description = Some(description);
        self.phase = next;
        true
    }

    fn open_trickle_window(&mut self, now: Instant) -> bool {
        self.trickle_timer = match self.negotiation.discovery {
            CandidateDiscovery::Continuous => Timer::none(),
            CandidateDiscovery::BoundedWindow { window } => Timer::create(now, window),
        };
        self.phase = NegotiationPhase::AwaitingTrickleWindow;
        true
    }

    /// Send the local description once gathering completed or the window ran
    /// out.
    fn send_local_description(&mut self, now: Instant) -> bool {
        let Some(engine) = self.engine.as_ref() else {
            return false;
        };
        let complete = engine.gathering_state() == GatheringState::Complete;
        if !complete && !self.trickle_timer.is_expired(now) {
            return false;
        }
        let Some(description) = engine
            .local_description()
            .or_else(|| self.local_description.clone())
        else {
            warn!("peer {}: no local description to send", self.id);
            self.close();
            return false;
        };
        self.trickle_timer.reset();
        debug!(
            "peer {}: sending local description ({})",
            self.id,
            if complete { "gathering complete" } else { "window expired" }
        );

        let result = description
            .to_json()
            .map_err(Error::from)
            .and_then(|text| self.relay_description(&text));
        if let Err(e) = result {
            warn!("peer {}: failed to send local description: {e}", self.id);
            self.close();
            return false;
        }

        self.local_description = Some(description);
        self.phase = match self.role {
            Some(Role::Server) => NegotiationPhase::AnswerSent,
            _ => NegotiationPhase::OfferSent,
        };
        true
    }

    fn relay_description(&mut self, text: &str) -> Result<()> {
        match self.role {
            Some(Role::Client) => self
                .signaling_client
                .as_mut()
                .ok_or(Error::NotStarted)?
                .send_offer(text),
            Some(Role::Server) => self
                .signaling_server
                .as_ref()
                .ok_or(Error::NoSignalingServer)?
                .borrow_mut()
                .send_answer_to_client(self.connection_id, text),
            None => Err(Error::NotStarted),
        }
    }

    fn drain_engine_events(&mut self) {
        let id = self.id;
        let Some(engine) = self.engine.as_mut() else {
            return;
        };

        let mut changes = Vec::new();
        engine.drain_events(&mut |event| match event {
            EngineEvent::Message(payload) => changes.push(Change::Message(payload.to_vec())),
            EngineEvent::IceCandidate(candidate) => {
                debug!("peer {id}: local candidate {candidate}");
            }
            EngineEvent::ChannelOpen => changes.push(Change::ChannelOpen),
            EngineEvent::ChannelClosed => changes.push(Change::ChannelClosed),
            EngineEvent::DataChannel => changes.push(Change::DataChannel),
            EngineEvent::IceConnectionChanged(state) => {
                changes.push(Change::IceConnection(state));
            }
            EngineEvent::GatheringChanged(state) => changes.push(Change::Gathering(state)),
        });

        for change in changes {
            if self.is_finished() {
                break;
            }
            self.apply(change);
        }
    }

    fn apply(&mut self, change: Change) {
        match change {
            Change::Message(payload) => {
                self.observers
                    .notify(self.id, &PeerSignal::MessageReceived(&payload));
            }
            Change::ChannelOpen => {
                if self.channel_open {
                    return;
                }
                self.channel_open = true;
                self.timeout_timer.reset();
                self.trickle_timer.reset();
                self.operations.clear();
                self.phase = NegotiationPhase::ChannelOpen;
                self.resolve_remote_endpoint();
                info!(
                    "peer {}: data channel open, remote endpoint {:?}",
                    self.id, self.remote_endpoint
                );
            }
            Change::ChannelClosed => {
                info!("peer {}: data channel closed", self.id);
                self.close();
            }
            Change::DataChannel => {
                debug!("peer {}: remote announced a data channel", self.id);
                self.resolve_remote_endpoint();
            }
            Change::IceConnection(state) => {
                debug!("peer {}: ice connection {state:?}", self.id);
                if state.is_connected() && !self.timeout_timer.is_none() {
                    debug!("peer {}: transport connected, timeout cancelled", self.id);
                    self.timeout_timer.reset();
                }
            }
            Change::Gathering(state) => debug!("peer {}: gathering {state:?}", self.id),
        }
    }

    fn resolve_remote_endpoint(&mut self) {
        if self.remote_endpoint.is_some() {
            return;
        }
        let description = self
            .engine
            .as_ref()
            .and_then(|engine| engine.remote_description())
            .or_else(|| self.remote_description.clone());
        self.remote_endpoint = description
            .as_ref()
            .and_then(|description| parse_remote_endpoint(&description.sdp));
    }

    /// Terminal bookkeeping shared by close, timeout and relay loss.
    fn release(&mut self) {
        self.operations.clear();
        self.trickle_timer.reset();
        self.timeout_timer.reset();
        self.channel_open = false;
        if let Some(engine) = self.engine.as_mut() {
            engine.close();
        }
        if let Some(client) = self.signaling_client.as_mut() {
            client.disconnect();
        }
    }

    fn time_out(&mut self) {
        self.timed_out = true;
        self.phase = NegotiationPhase::TimedOut;
        self.release();
        warn!("peer {} timed out", self.id);
        self.observers.notify(self.id, &PeerSignal::TimedOut);
    }
}
