//! Client agent configuration.

use lxport_core::protocol::query::endpoint_url;
use lxport_core::{CodecKind, PairQuery, ProtocolError, TunnelQuery};
use thiserror::Error;

/// Default local port the agent listens on.
pub const DEFAULT_LISTEN_PORT: u16 = 8009;
/// Default port of the remote service (RDP).
pub const DEFAULT_REMOTE_PORT: u16 = 3389;

/// A configuration that cannot be served.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidConfig {
    #[error("{0} must not be zero")]
    ZeroPort(&'static str),

    #[error("broker URL {0:?} must use ws:// or wss://")]
    NotWebSocket(String),

    #[error(transparent)]
    Url(#[from] ProtocolError),
}

/// How the agent reaches the remote service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelMode {
    /// Through a registered device agent (`pt=req`).
    Paired { device_id: String },
    /// The broker dials `target:remote_port` itself.
    Direct { target: Option<String> },
}

/// All runtime configuration for the client agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Local TCP port (bound on loopback).
    pub listen_port: u16,
    /// Port of the service on the far side.
    pub remote_port: u16,
    pub mode: TunnelMode,
    /// Broker endpoint URL: the pairing endpoint in paired mode, the
    /// direct-tunnel endpoint in direct mode.
    pub broker_url: String,
    /// Decode frames from the broker with the block codec.
    pub decompress: bool,
    /// Block codec used when `decompress` is set.
    pub codec: CodecKind,
}

impl ClientConfig {
    /// Paired-mode config with the default ports.
    pub fn paired(broker_url: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            listen_port: DEFAULT_LISTEN_PORT,
            remote_port: DEFAULT_REMOTE_PORT,
            mode: TunnelMode::Paired {
                device_id: device_id.into(),
            },
            broker_url: broker_url.into(),
            decompress: false,
            codec: CodecKind::default(),
        }
    }

    /// Direct-mode config with the default ports.
    pub fn direct(broker_url: impl Into<String>, target: Option<String>) -> Self {
        Self {
            mode: TunnelMode::Direct { target },
            ..Self::paired(broker_url, String::new())
        }
    }

    /// The URL each local connection opens its broker leg on.
    pub fn tunnel_url(&self) -> Result<String, ProtocolError> {
        let query = match &self.mode {
            TunnelMode::Paired { device_id } => PairQuery::Request {
                uuid: device_id.clone(),
                port: self.remote_port,
            }
            .to_query_string(),
            TunnelMode::Direct { target } => TunnelQuery {
                port: self.remote_port,
                target: target.clone(),
            }
            .to_query_string(),
        };
        endpoint_url(&self.broker_url, &query)
    }

    pub fn validate(&self) -> Result<(), InvalidConfig> {
        if self.remote_port == 0 {
            return Err(InvalidConfig::ZeroPort("remote port"));
        }
        if !(self.broker_url.starts_with("ws://") || self.broker_url.starts_with("wss://")) {
            return Err(InvalidConfig::NotWebSocket(self.broker_url.clone()));
        }
        self.tunnel_url()?;
        Ok(())
    }
}
