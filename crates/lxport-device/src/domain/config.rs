//! Device agent configuration.

use std::time::Duration;

use lxport_core::protocol::keepalive::KEEPALIVE_INTERVAL;
use lxport_core::protocol::query::endpoint_url;
use lxport_core::{CodecKind, PairQuery, ProtocolError};
use thiserror::Error;

/// Wait between command-channel connection attempts.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(15);

/// Host every pair-create command is dialed on.
pub const LOCAL_HOST: &str = "127.0.0.1";

/// A configuration that cannot be served.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidConfig {
    #[error("device id must not be empty")]
    EmptyDeviceId,

    #[error("broker URL {0:?} must use ws:// or wss://")]
    NotWebSocket(String),

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error(transparent)]
    Url(#[from] ProtocolError),
}

/// All runtime configuration for the device agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Id the device registers under; client agents pair with it.
    pub device_id: String,
    /// The broker's pairing endpoint (`ws://host:port/pair`).
    pub broker_url: String,
    pub reconnect_interval: Duration,
    /// How often the local watchdog pings the command channel and every
    /// open tunnel.
    pub keepalive_interval: Duration,
    /// Encode tunnel frames sent to the broker with the block codec.
    pub compress: bool,
    /// Block codec used when `compress` is set.
    pub codec: CodecKind,
}

impl DeviceConfig {
    pub fn new(broker_url: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            broker_url: broker_url.into(),
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            keepalive_interval: KEEPALIVE_INTERVAL,
            compress: false,
            codec: CodecKind::default(),
        }
    }

    /// URL of the long-lived command channel (`pt=dev`).
    pub fn command_url(&self) -> Result<String, ProtocolError> {
        let query = PairQuery::Device {
            uuid: self.device_id.clone(),
        };
        endpoint_url(&self.broker_url, &query.to_query_string())
    }

    /// URL of the response leg for pair `token` (`pt=resp`).
    pub fn response_url(&self, token: &str) -> Result<String, ProtocolError> {
        let query = PairQuery::Response {
            token: token.to_string(),
        };
        endpoint_url(&self.broker_url, &query.to_query_string())
    }

    pub fn validate(&self) -> Result<(), InvalidConfig> {
        if self.device_id.is_empty() {
            return Err(InvalidConfig::EmptyDeviceId);
        }
        if !(self.broker_url.starts_with("ws://") || self.broker_url.starts_with("wss://")) {
            return Err(InvalidConfig::NotWebSocket(self.broker_url.clone()));
        }
        if self.reconnect_interval.is_zero() {
            return Err(InvalidConfig::ZeroDuration("reconnect interval"));
        }
        if self.keepalive_interval.is_zero() {
            return Err(InvalidConfig::ZeroDuration("keepalive interval"));
        }
        self.command_url()?;
        Ok(())
    }
}
