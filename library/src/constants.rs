use std::time::Duration;

pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

pub const DEFAULT_TRICKLE_WINDOW: Duration = Duration::from_millis(500);

/// Label of the data channel the client side opens.
pub const DATA_CHANNEL_LABEL: &str = "sendData";

/// Retransmit limit of that channel.
pub const DEFAULT_MAX_RETRANSMITS: u16 = 0;

pub const DEFAULT_CERTIFICATE_PATH: &str = "./cert.pem";

pub const DEFAULT_PRIVATE_KEY_PATH: &str = "./key.pem";
