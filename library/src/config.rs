//! Negotiation and signaling settings handed to the manager before start.
//!
//! All structs deserialize from JSON with every field optional, so a host
//! can ship a partial config file and rely on the defaults for the rest.
//! Durations are written as (fractional) seconds.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_CERTIFICATE_PATH, DEFAULT_PRIVATE_KEY_PATH, DEFAULT_STUN_SERVER, DEFAULT_TIMEOUT,
    DEFAULT_TRICKLE_WINDOW,
};
use crate::{Error, Result};

/// One STUN or TURN server entry passed through to the negotiation engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    /// Server that needs no credentials, usually STUN.
    #[must_use]
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }

    #[must_use]
    pub fn turn(
        url: impl Into<String>,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            urls: vec![url.into()],
            username: Some(username.into()),
            credential: Some(credential.into()),
        }
    }
}

/// When the locally assembled description is sent to the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CandidateDiscovery {
    /// Wait for the engine to report gathering complete.
    Continuous,
    /// Send on gathering complete or once `window` has passed since the
    /// local description was set, whichever comes first.
    BoundedWindow {
        #[serde(with = "seconds")]
        window: Duration,
    },
}

impl Default for CandidateDiscovery {
    fn default() -> Self {
        Self::BoundedWindow {
            window: DEFAULT_TRICKLE_WINDOW,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationConfig {
    pub ice_servers: Vec<IceServer>,
    /// How long a connection attempt may take before it is abandoned.
    #[serde(with = "seconds")]
    pub timeout: Duration,
    pub discovery: CandidateDiscovery,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![IceServer::stun(DEFAULT_STUN_SERVER)],
            timeout: DEFAULT_TIMEOUT,
            discovery: CandidateDiscovery::default(),
        }
    }
}

impl NegotiationConfig {
    /// Parse and validate a JSON config.
    ///
    /// # Errors
    /// Errs on malformed JSON or when [`NegotiationConfig::validate`] fails.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// Errs if the timeout is zero or an ICE server has no usable url.
    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(Error::Config("timeout must be greater than zero".to_owned()));
        }
        for server in &self.ice_servers {
            if server.urls.is_empty() || server.urls.iter().any(|url| url.trim().is_empty()) {
                return Err(Error::Config(format!(
                    "ice server entry has an empty url: {server:?}"
                )));
            }
            if server.username.is_some() != server.credential.is_some() {
                return Err(Error::Config(format!(
                    "ice server {:?} needs both username and credential or neither",
                    server.urls
                )));
            }
        }
        Ok(())
    }
}

/// Settings for the embedded signaling server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSignalingConfig {
    pub enable_tls: bool,
    /// PEM certificate chain, used when `enable_tls` is set.
    pub certificate_path: PathBuf,
    /// PEM private key matching `certificate_path`.
    pub private_key_path: PathBuf,
}

impl Default for ServerSignalingConfig {
    fn default() -> Self {
        Self {
            enable_tls: false,
            certificate_path: PathBuf::from(DEFAULT_CERTIFICATE_PATH),
            private_key_path: PathBuf::from(DEFAULT_PRIVATE_KEY_PATH),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingEndpointConfig {
    /// Clients dial `wss://` instead of `ws://`.
    pub connect_securely: bool,
    pub server: ServerSignalingConfig,
}

impl SignalingEndpointConfig {
    /// # Errors
    /// Errs on malformed JSON.
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

mod seconds {
    use std::time::Duration;

    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(de::Error::custom)
    }
}
