//! Scripted negotiation engine, in-memory relay and a recording listener.
//!
//! Engines created from the same [`MockNetwork`] find each other through an
//! `a=mock-engine:<key>` line in the descriptions they exchange; once both
//! sides have a local and a remote description the channel opens.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::time::{Duration, Instant};

use rtc_peers::config::{CandidateDiscovery, NegotiationConfig, ServerSignalingConfig};
use rtc_peers::engine::{
    DataChannelInit, EngineError, EngineEvent, EngineFactory, GatheringState,
    IceConnectionState, NegotiationEngine, OperationResult, PendingOperation,
};
use rtc_peers::relay::{
    RelayClientTransport, RelayEndpoint, RelayEvent, RelayFactory, RelayServerEvent,
    RelayServerTransport,
};
use rtc_peers::timer::{Clock, ManualClock};
use rtc_peers::{
    Backend, DisconnectReason, Error, NetEventListener, PeerId, RoutingId, SdpType,
    SessionDescription,
};

pub fn init_logger() {
    let _ = simplelog::TestLogger::init(
        simplelog::LevelFilter::Debug,
        simplelog::Config::default(),
    );
}

/// Poll with `step` until `done` holds or `limit` has passed. Returns the
/// simulated time at which `done` first held.
pub fn run_until(
    clock: &ManualClock,
    step: Duration,
    limit: Duration,
    mut tick: impl FnMut(),
    mut done: impl FnMut() -> bool,
) -> Option<Duration> {
    loop {
        tick();
        if done() {
            return Some(clock.elapsed());
        }
        if clock.elapsed() >= limit {
            return None;
        }
        clock.advance(step);
    }
}

pub struct Harness {
    pub clock: ManualClock,
    pub network: MockNetwork,
    pub relay: LoopbackRelay,
}

impl Harness {
    pub fn new() -> Self {
        init_logger();
        let clock = ManualClock::new();
        Self {
            network: MockNetwork::new(clock.clone()),
            relay: LoopbackRelay::default(),
            clock,
        }
    }

    pub fn backend(&self, behavior: MockBehavior) -> Backend {
        Backend::new(
            self.network.factory(behavior),
            self.relay.clone(),
            self.clock.clone(),
        )
    }
}

pub fn config(timeout: Duration, discovery: CandidateDiscovery) -> NegotiationConfig {
    NegotiationConfig {
        timeout,
        discovery,
        ..NegotiationConfig::default()
    }
}

#[derive(Debug, Default)]
pub struct Recorder {
    pub connected: Vec<PeerId>,
    pub disconnected: Vec<(PeerId, DisconnectReason)>,
    pub received: Vec<(PeerId, Vec<u8>)>,
    /// Every callback in the order it arrived.
    pub log: Vec<String>,
}

impl NetEventListener for Recorder {
    fn on_peer_connected(&mut self, peer: PeerId) {
        self.connected.push(peer);
        self.log.push(format!("connected {peer}"));
    }

    fn on_peer_disconnected(&mut self, peer: PeerId, reason: DisconnectReason) {
        self.disconnected.push((peer, reason));
        self.log.push(format!("disconnected {peer} {reason:?}"));
    }

    fn on_network_receive(&mut self, peer: PeerId, message: &[u8]) {
        self.received.push((peer, message.to_vec()));
        self.log.push(format!("received {peer}"));
    }
}

// ---------------------------------------------------------------- engine

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    CreateOffer,
    CreateAnswer,
    SetLocal,
    SetRemote,
}

#[derive(Debug, Clone, Copy)]
pub struct MockBehavior {
    /// Time from setting the local description to gathering complete;
    /// `None` keeps gathering forever.
    pub gather_after: Option<Duration>,
    pub operation_delay: Duration,
    pub fail: Option<OpKind>,
    /// Time between the transport reporting connected and the channel
    /// opening.
    pub open_delay: Duration,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            gather_after: Some(Duration::ZERO),
            operation_delay: Duration::ZERO,
            fail: None,
            open_delay: Duration::ZERO,
        }
    }
}

impl MockBehavior {
    pub fn gathering(after: Duration) -> Self {
        Self {
            gather_after: Some(after),
            ..Self::default()
        }
    }

    pub fn stuck_gathering() -> Self {
        Self {
            gather_after: None,
            ..Self::default()
        }
    }

    pub fn slow_open(delay: Duration) -> Self {
        Self {
            open_delay: delay,
            ..Self::default()
        }
    }
}

struct EngineState {
    peer: PeerId,
    behavior: MockBehavior,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    local_set_at: Option<Instant>,
    partner: Option<u64>,
    channel: Option<(String, DataChannelInit)>,
    ice_connected_at: Option<Instant>,
    open: bool,
    closed: bool,
    close_reported: bool,
    inbox: VecDeque<Vec<u8>>,
    live: HashMap<OpKind, usize>,
}

impl EngineState {
    fn negotiated(&self) -> bool {
        self.local.is_some() && self.remote.is_some() && !self.closed
    }
}

#[derive(Default)]
struct NetworkState {
    engines: HashMap<u64, EngineState>,
    next_key: u64,
    max_live: usize,
}

#[derive(Clone)]
pub struct MockNetwork {
    clock: ManualClock,
    state: Rc<RefCell<NetworkState>>,
}

impl MockNetwork {
    pub fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            state: Rc::default(),
        }
    }

    pub fn factory(&self, behavior: MockBehavior) -> MockEngineFactory {
        MockEngineFactory {
            network: self.clone(),
            behavior,
        }
    }

    /// Highest number of simultaneously outstanding operations of one kind
    /// on one engine.
    pub fn max_live_operations(&self) -> usize {
        self.state.borrow().max_live
    }

    pub fn engine_count(&self) -> usize {
        self.state.borrow().engines.len()
    }

    pub fn closed_engine_count(&self) -> usize {
        self.state
            .borrow()
            .engines
            .values()
            .filter(|engine| engine.closed)
            .count()
    }

    pub fn channels(&self) -> Vec<(String, DataChannelInit)> {
        self.state
            .borrow()
            .engines
            .values()
            .filter_map(|engine| engine.channel.clone())
            .collect()
    }

    pub fn peers(&self) -> Vec<PeerId> {
        self.state
            .borrow()
            .engines
            .values()
            .map(|engine| engine.peer)
            .collect()
    }
}

pub struct MockEngineFactory {
    network: MockNetwork,
    behavior: MockBehavior,
}

impl EngineFactory for MockEngineFactory {
    fn create(&self, peer: PeerId, _config: &NegotiationConfig) -> Box<dyn NegotiationEngine> {
        let mut state = self.network.state.borrow_mut();
        state.next_key += 1;
        let key = state.next_key;
        state.engines.insert(
            key,
            EngineState {
                peer,
                behavior: self.behavior,
                local: None,
                remote: None,
                local_set_at: None,
                partner: None,
                channel: None,
                ice_connected_at: None,
                open: false,
                closed: false,
                close_reported: false,
                inbox: VecDeque::new(),
                live: HashMap::new(),
            },
        );
        Box::new(MockEngine {
            key,
            network: self.network.clone(),
        })
    }
}

struct MockEngine {
    key: u64,
    network: MockNetwork,
}

enum Owned {
    Ice(IceConnectionState),
    DataChannel,
    Open,
    Closed,
    Message(Vec<u8>),
}

impl MockEngine {
    fn operation(&self, kind: OpKind, result: OperationResult) -> Box<dyn PendingOperation> {
        let now = self.network.clock.now();
        let mut state = self.network.state.borrow_mut();
        let state = &mut *state;
        let engine = state.engines.get_mut(&self.key).unwrap();
        let live = engine.live.entry(kind).or_default();
        *live += 1;
        state.max_live = state.max_live.max(*live);
        let result = if engine.behavior.fail == Some(kind) {
            Err(EngineError(format!("{kind:?} failed")))
        } else {
            result
        };
        Box::new(MockOperation {
            network: self.network.clone(),
            key: self.key,
            kind,
            ready_at: now + engine.behavior.operation_delay,
            result: Some(result),
        })
    }

    fn description(&self, sdp_type: SdpType) -> SessionDescription {
        SessionDescription::new(
            sdp_type,
            format!(
                "v=0\r\n\
                 o=- {key} 2 IN IP4 127.0.0.1\r\n\
                 s=-\r\n\
                 t=0 0\r\n\
                 m=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n\
                 c=IN IP4 0.0.0.0\r\n\
                 a=mock-engine:{key}\r\n",
                key = self.key
            ),
        )
    }

    fn gathering(&self, engine: &EngineState) -> GatheringState {
        let now = self.network.clock.now();
        match (engine.local_set_at, engine.behavior.gather_after) {
            (None, _) => GatheringState::New,
            (Some(set_at), Some(after)) if now >= set_at + after => GatheringState::Complete,
            _ => GatheringState::Gathering,
        }
    }
}

impl NegotiationEngine for MockEngine {
    fn create_offer(&mut self) -> Box<dyn PendingOperation> {
        let offer = self.description(SdpType::Offer);
        self.operation(OpKind::CreateOffer, Ok(Some(offer)))
    }

    fn create_answer(&mut self) -> Box<dyn PendingOperation> {
        let answer = self.description(SdpType::Answer);
        self.operation(OpKind::CreateAnswer, Ok(Some(answer)))
    }

    fn set_local_description(
        &mut self,
        description: &SessionDescription,
    ) -> Box<dyn PendingOperation> {
        {
            let now = self.network.clock.now();
            let mut state = self.network.state.borrow_mut();
            let engine = state.engines.get_mut(&self.key).unwrap();
            engine.local = Some(description.clone());
            engine.local_set_at = Some(now);
        }
        self.operation(OpKind::SetLocal, Ok(None))
    }

    fn set_remote_description(
        &mut self,
        description: &SessionDescription,
    ) -> Box<dyn PendingOperation> {
        {
            let partner = description
                .sdp
                .lines()
                .find_map(|line| line.trim().strip_prefix("a=mock-engine:"))
                .and_then(|key| key.parse::<u64>().ok());
            let mut state = self.network.state.borrow_mut();
            let engine = state.engines.get_mut(&self.key).unwrap();
            engine.remote = Some(description.clone());
            engine.partner = partner;
        }
        self.operation(OpKind::SetRemote, Ok(None))
    }

    fn gathering_state(&self) -> GatheringState {
        let state = self.network.state.borrow();
        self.gathering(&state.engines[&self.key])
    }

    fn local_description(&self) -> Option<SessionDescription> {
        let state = self.network.state.borrow();
        let engine = &state.engines[&self.key];
        let mut description = engine.local.clone()?;
        if self.gathering(engine) == GatheringState::Complete {
            description.sdp.push_str(&format!(
                "a=candidate:1 1 udp 2122260223 10.0.0.{} {} typ host\r\n",
                self.key % 250 + 1,
                40000 + self.key
            ));
        }
        Some(description)
    }

    fn remote_description(&self) -> Option<SessionDescription> {
        let state = self.network.state.borrow();
        state.engines[&self.key].remote.clone()
    }

    fn create_data_channel(
        &mut self,
        label: &str,
        init: DataChannelInit,
    ) -> Result<(), EngineError> {
        let mut state = self.network.state.borrow_mut();
        state.engines.get_mut(&self.key).unwrap().channel = Some((label.to_owned(), init));
        Ok(())
    }

    fn send(&mut self, payload: &[u8]) -> Result<(), EngineError> {
        let mut state = self.network.state.borrow_mut();
        let engine = &state.engines[&self.key];
        if !engine.open || engine.closed {
            return Err(EngineError("channel not open".to_owned()));
        }
        let partner = engine.partner.ok_or_else(|| EngineError("no partner".to_owned()))?;
        state
            .engines
            .get_mut(&partner)
            .ok_or_else(|| EngineError("partner gone".to_owned()))?
            .inbox
            .push_back(payload.to_vec());
        Ok(())
    }

    fn drain_events(&mut self, sink: &mut dyn FnMut(EngineEvent<'_>)) {
        let now = self.network.clock.now();
        let mut events = Vec::new();
        {
            let mut state = self.network.state.borrow_mut();
            let partner = state.engines[&self.key]
                .partner
                .and_then(|key| state.engines.get(&key));
            let partner_negotiated = partner.is_some_and(EngineState::negotiated);
            let partner_closed = partner.map_or(true, |partner| partner.closed);

            let engine = state.engines.get_mut(&self.key).unwrap();
            if engine.ice_connected_at.is_none() && engine.negotiated() && partner_negotiated {
                engine.ice_connected_at = Some(now);
                events.push(Owned::Ice(IceConnectionState::Connected));
            }
            let open_at = engine
                .ice_connected_at
                .map(|at| at + engine.behavior.open_delay);
            if !engine.open && !engine.closed && open_at.is_some_and(|at| now >= at) {
                engine.open = true;
                if engine.channel.is_none() {
                    events.push(Owned::DataChannel);
                }
                events.push(Owned::Open);
            }
            if engine.open {
                events.extend(engine.inbox.drain(..).map(Owned::Message));
                if partner_closed && !engine.close_reported {
                    engine.close_reported = true;
                    events.push(Owned::Closed);
                }
            }
        }

        for event in &events {
            match event {
                Owned::Ice(state) => sink(EngineEvent::IceConnectionChanged(*state)),
                Owned::DataChannel => sink(EngineEvent::DataChannel),
                Owned::Open => sink(EngineEvent::ChannelOpen),
                Owned::Closed => sink(EngineEvent::ChannelClosed),
                Owned::Message(payload) => sink(EngineEvent::Message(payload)),
            }
        }
    }

    fn close(&mut self) {
        let mut state = self.network.state.borrow_mut();
        if let Some(engine) = state.engines.get_mut(&self.key) {
            engine.closed = true;
        }
    }
}

struct MockOperation {
    network: MockNetwork,
    key: u64,
    kind: OpKind,
    ready_at: Instant,
    result: Option<OperationResult>,
}

impl PendingOperation for MockOperation {
    fn is_done(&self) -> bool {
        self.network.clock.now() >= self.ready_at
    }

    fn take_result(&mut self) -> OperationResult {
        self.result
            .take()
            .unwrap_or_else(|| Err(EngineError("result already taken".to_owned())))
    }
}

impl Drop for MockOperation {
    fn drop(&mut self) {
        if let Ok(mut state) = self.network.state.try_borrow_mut() {
            if let Some(engine) = state.engines.get_mut(&self.key) {
                if let Some(live) = engine.live.get_mut(&self.kind) {
                    *live -= 1;
                }
            }
        }
    }
}

// ----------------------------------------------------------------- relay

#[derive(Default)]
struct ListenerState {
    events: VecDeque<RelayServerEvent>,
    connections: HashMap<RoutingId, u64>,
    received: Vec<(RoutingId, Vec<u8>)>,
}

#[derive(Default)]
struct ClientState {
    events: VecDeque<RelayEvent>,
    link: Option<(u16, RoutingId)>,
    endpoints: Vec<RelayEndpoint>,
}

#[derive(Default)]
struct HubState {
    listeners: HashMap<u16, ListenerState>,
    clients: HashMap<u64, ClientState>,
    next_client: u64,
    next_connection: u64,
}

/// Relay that delivers everything in memory, on the next `poll_event`.
#[derive(Clone, Default)]
pub struct LoopbackRelay {
    hub: Rc<RefCell<HubState>>,
}

impl LoopbackRelay {
    /// Accept connections on `port` without anything ever answering.
    pub fn listen_silently(&self, port: u16) {
        self.hub
            .borrow_mut()
            .listeners
            .insert(port, ListenerState::default());
    }

    /// Payloads clients sent to the listener on `port`.
    pub fn received(&self, port: u16) -> Vec<(RoutingId, Vec<u8>)> {
        self.hub
            .borrow()
            .listeners
            .get(&port)
            .map(|listener| listener.received.clone())
            .unwrap_or_default()
    }

    pub fn connection_count(&self, port: u16) -> usize {
        self.hub
            .borrow()
            .listeners
            .get(&port)
            .map_or(0, |listener| listener.connections.len())
    }

    /// Every endpoint any client dialed, in order.
    pub fn dialed(&self) -> Vec<RelayEndpoint> {
        let hub = self.hub.borrow();
        let mut keys: Vec<_> = hub.clients.keys().copied().collect();
        keys.sort_unstable();
        keys.iter()
            .flat_map(|key| hub.clients[key].endpoints.clone())
            .collect()
    }

    /// Drop every connection of the listener on `port`, as if the relay
    /// process died.
    pub fn kill(&self, port: u16) {
        let mut hub = self.hub.borrow_mut();
        let Some(listener) = hub.listeners.remove(&port) else {
            return;
        };
        for client in listener.connections.values() {
            if let Some(client) = hub.clients.get_mut(client) {
                client.link = None;
                client.events.push_back(RelayEvent::Disconnected);
            }
        }
    }
}

impl RelayFactory for LoopbackRelay {
    fn client(&self) -> Box<dyn RelayClientTransport> {
        let mut hub = self.hub.borrow_mut();
        hub.next_client += 1;
        let key = hub.next_client;
        hub.clients.insert(key, ClientState::default());
        Box::new(LoopbackClient {
            hub: Rc::clone(&self.hub),
            key,
        })
    }

    fn server(&self) -> Box<dyn RelayServerTransport> {
        Box::new(LoopbackServer {
            hub: Rc::clone(&self.hub),
            port: None,
        })
    }
}

pub struct LoopbackClient {
    hub: Rc<RefCell<HubState>>,
    key: u64,
}

impl RelayClientTransport for LoopbackClient {
    fn connect(&mut self, endpoint: &RelayEndpoint) -> rtc_peers::Result<()> {
        let mut hub = self.hub.borrow_mut();
        let hub = &mut *hub;
        hub.next_connection += 1;
        let id = RoutingId::new(hub.next_connection);
        let client = hub.clients.get_mut(&self.key).unwrap();
        client.endpoints.push(endpoint.clone());
        match hub.listeners.get_mut(&endpoint.port) {
            Some(listener) => {
                listener.connections.insert(id, self.key);
                listener.events.push_back(RelayServerEvent::Connected(id));
                client.link = Some((endpoint.port, id));
                client.events.push_back(RelayEvent::Connected);
            }
            None => client.events.push_back(RelayEvent::Disconnected),
        }
        Ok(())
    }

    fn send(&mut self, data: Vec<u8>) -> rtc_peers::Result<()> {
        let mut hub = self.hub.borrow_mut();
        let (port, id) = hub.clients[&self.key]
            .link
            .ok_or_else(|| Error::Relay("not connected".to_owned()))?;
        let listener = hub
            .listeners
            .get_mut(&port)
            .ok_or_else(|| Error::Relay("listener gone".to_owned()))?;
        listener.received.push((id, data.clone()));
        listener.events.push_back(RelayServerEvent::Data(id, data));
        Ok(())
    }

    fn disconnect(&mut self) {
        let mut hub = self.hub.borrow_mut();
        let Some((port, id)) = hub
            .clients
            .get_mut(&self.key)
            .and_then(|client| client.link.take())
        else {
            return;
        };
        if let Some(listener) = hub.listeners.get_mut(&port) {
            listener.connections.remove(&id);
            listener.events.push_back(RelayServerEvent::Disconnected(id));
        }
    }

    fn poll_event(&mut self) -> Option<RelayEvent> {
        self.hub
            .borrow_mut()
            .clients
            .get_mut(&self.key)?
            .events
            .pop_front()
    }
}

pub struct LoopbackServer {
    hub: Rc<RefCell<HubState>>,
    port: Option<u16>,
}

impl RelayServerTransport for LoopbackServer {
    fn listen(
        &mut self,
        port: u16,
        _tls: Option<&ServerSignalingConfig>,
    ) -> rtc_peers::Result<()> {
        let mut hub = self.hub.borrow_mut();
        if hub.listeners.contains_key(&port) {
            return Err(Error::Relay(format!("port {port} already in use")));
        }
        hub.listeners.insert(port, ListenerState::default());
        self.port = Some(port);
        Ok(())
    }

    fn send_to(&mut self, connection: RoutingId, data: Vec<u8>) -> rtc_peers::Result<()> {
        let port = self.port.ok_or_else(|| Error::Relay("not listening".to_owned()))?;
        let mut hub = self.hub.borrow_mut();
        let client = *hub
            .listeners
            .get(&port)
            .and_then(|listener| listener.connections.get(&connection))
            .ok_or_else(|| Error::Relay(format!("no connection {connection}")))?;
        hub.clients
            .get_mut(&client)
            .ok_or_else(|| Error::Relay("client gone".to_owned()))?
            .events
            .push_back(RelayEvent::Data(data));
        Ok(())
    }

    fn disconnect(&mut self, connection: RoutingId) {
        let Some(port) = self.port else {
            return;
        };
        let mut hub = self.hub.borrow_mut();
        let Some(client) = hub
            .listeners
            .get_mut(&port)
            .and_then(|listener| listener.connections.remove(&connection))
        else {
            return;
        };
        if let Some(listener) = hub.listeners.get_mut(&port) {
            listener.events.push_back(RelayServerEvent::Disconnected(connection));
        }
        if let Some(client) = hub.clients.get_mut(&client) {
            client.link = None;
            client.events.push_back(RelayEvent::Disconnected);
        }
    }

    fn poll_event(&mut self) -> Option<RelayServerEvent> {
        let port = self.port?;
        self.hub
            .borrow_mut()
            .listeners
            .get_mut(&port)?
            .events
            .pop_front()
    }

    fn stop(&mut self) {
        if let Some(port) = self.port.take() {
            LoopbackRelay {
                hub: Rc::clone(&self.hub),
            }
            .kill(port);
        }
    }
}
