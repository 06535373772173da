//! Interface of the negotiation engine that does the actual `WebRTC` work.
//!
//! The crate never talks to a peer connection directly. A native build and a
//! browser build each provide an [`EngineFactory`]; the peer state machine is
//! written once against [`NegotiationEngine`].

use std::fmt;

use rtc_peers_protocol::SessionDescription;

use crate::config::NegotiationConfig;
use crate::peer::PeerId;

/// Result of a finished engine operation. Create-offer and create-answer
/// yield a description, set-description operations yield `None`.
pub type OperationResult = Result<Option<SessionDescription>, EngineError>;

/// Failure reported by the engine for one operation or call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineError(pub String);

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for EngineError {}

impl From<EngineError> for crate::Error {
    fn from(error: EngineError) -> Self {
        Self::Engine(error.0)
    }
}

/// Handle of an asynchronous engine operation.
///
/// Checked once per tick; never awaited. Dropping a handle does not cancel the
/// underlying work, it only means nobody will look at the result.
pub trait PendingOperation {
    fn is_done(&self) -> bool;

    /// Result of a finished operation. Only called after `is_done` returned
    /// true, and at most once.
    fn take_result(&mut self) -> OperationResult;
}

/// Candidate gathering progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatheringState {
    New,
    Gathering,
    Complete,
}

/// ICE transport connectivity as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Failed,
    Disconnected,
    Closed,
}

impl IceConnectionState {
    /// The low-level path is usable even if the data channel is not open yet.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected | Self::Completed)
    }
}

/// Data channel reliability settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataChannelInit {
    pub ordered: bool,
    pub max_retransmits: u16,
}

/// Something the engine observed since the last drain.
///
/// Message payloads are borrowed from the engine's receive buffer and are
/// only valid for the duration of the sink call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent<'a> {
    /// The local data channel, or one announced by the remote side, is open.
    ChannelOpen,
    ChannelClosed,
    /// The remote side created a data channel (answering side only).
    DataChannel,
    Message(&'a [u8]),
    /// A local candidate was discovered.
    IceCandidate(&'a str),
    IceConnectionChanged(IceConnectionState),
    GatheringChanged(GatheringState),
}

/// One peer connection inside the engine.
///
/// Engine callbacks may arrive on any thread; implementations buffer them
/// and replay them from [`NegotiationEngine::drain_events`] on the polling
/// thread.
pub trait NegotiationEngine {
    fn create_offer(&mut self) -> Box<dyn PendingOperation>;

    fn create_answer(&mut self) -> Box<dyn PendingOperation>;

    fn set_local_description(&mut self, description: &SessionDescription)
        -> Box<dyn PendingOperation>;

    fn set_remote_description(
        &mut self,
        description: &SessionDescription,
    ) -> Box<dyn PendingOperation>;

    fn gathering_state(&self) -> GatheringState;

    /// Current local description including the candidates gathered so far.
    fn local_description(&self) -> Option<SessionDescription>;

    fn remote_description(&self) -> Option<SessionDescription>;

    /// # Errors
    /// Errs if the engine refuses to create the channel.
    fn create_data_channel(&mut self, label: &str, init: DataChannelInit)
        -> Result<(), EngineError>;

    /// # Errors
    /// Errs if there is no open channel or the engine rejects the payload.
    fn send(&mut self, payload: &[u8]) -> Result<(), EngineError>;

    /// Hand every buffered event to `sink`, oldest first.
    fn drain_events(&mut self, sink: &mut dyn FnMut(EngineEvent<'_>));

    /// Release the peer connection and its channel. Idempotent.
    fn close(&mut self);
}

/// Creates one engine per peer.
///
/// The engine receives the peer's id so callbacks that cannot carry a
/// closure context can still be routed back to the right peer.
pub trait EngineFactory {
    fn create(&self, peer: PeerId, config: &NegotiationConfig) -> Box<dyn NegotiationEngine>;
}
