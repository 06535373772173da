use crate::peer::Role;

/// Errors returned by the public API of this crate.
///
/// Failures that happen inside a tick are never returned from `poll`; they
/// surface as peer signals and disconnect events instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("operation is only valid for a {expected:?} peer, this one is {actual:?}")]
    WrongRole { expected: Role, actual: Role },

    #[error("peer has not been started")]
    NotStarted,

    #[error("already started, configuration and role are fixed")]
    AlreadyStarted,

    #[error("expected a session description of type {expected:?}, got {actual:?}")]
    UnexpectedDescription {
        expected: rtc_peers_protocol::SdpType,
        actual: rtc_peers_protocol::SdpType,
    },

    #[error("an offer was already received on this peer")]
    OfferAlreadyReceived,

    #[error("peer is already closed")]
    Closed,

    #[error("data channel is not open")]
    ChannelNotOpen,

    #[error("no peer with id {0}")]
    UnknownPeer(u64),

    #[error("no signaling server has been assigned")]
    NoSignalingServer,

    #[error("signaling server is not running")]
    SignalingServerStopped,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("negotiation engine error: {0}")]
    Engine(String),

    #[error("relay transport error: {0}")]
    Relay(String),

    #[error(transparent)]
    Codec(#[from] rtc_peers_protocol::CodecError),

    #[error("malformed session description payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
