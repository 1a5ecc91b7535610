//! Broker configuration types.
//!
//! [`BrokerConfig`] is the single source of truth for the broker's runtime
//! settings.  `main.rs` builds it from the TOML file (if any) and the command
//! line; tests build it directly.

use std::net::SocketAddr;
use std::time::Duration;

use lxport_core::protocol::keepalive::KEEPALIVE_INTERVAL;
use thiserror::Error;

/// Default address of the broker's single listener.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8010";
/// Default upgrade path of the direct-tunnel endpoint.
pub const DEFAULT_XPORT_PATH: &str = "/xport";
/// Default upgrade path of the pairing endpoint.
pub const DEFAULT_PAIR_PATH: &str = "/pair";
/// How long a pairing request waits for the device's response leg.
pub const DEFAULT_PAIR_TIMEOUT: Duration = Duration::from_secs(5);

/// A configuration that cannot be served.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidConfig {
    #[error("endpoint path {0:?} must start with '/'")]
    RelativePath(String),

    #[error("direct-tunnel and pairing endpoints share the path {0:?}")]
    PathClash(String),

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
}

/// All runtime configuration for the broker.
///
/// # Example
///
/// ```rust
/// use lxport_broker::domain::BrokerConfig;
///
/// let cfg = BrokerConfig::default();
/// assert_eq!(cfg.listen_addr.port(), 8010);
/// assert_eq!(cfg.pair_path, "/pair");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Address the single WebSocket listener binds to.
    pub listen_addr: SocketAddr,

    /// Upgrade path of the direct-tunnel endpoint (`?port=&target=`).
    pub xport_path: String,

    /// Upgrade path of the pairing endpoint (`?pt=dev|req|resp`).
    pub pair_path: String,

    /// How often the watchdog pings every live holder.
    pub keepalive_interval: Duration,

    /// How long a pairing request waits for the device's response leg.
    pub pair_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            // Compile-time constant; cannot fail.
            listen_addr: DEFAULT_LISTEN_ADDR.parse().unwrap(),
            xport_path: DEFAULT_XPORT_PATH.to_string(),
            pair_path: DEFAULT_PAIR_PATH.to_string(),
            keepalive_interval: KEEPALIVE_INTERVAL,
            pair_timeout: DEFAULT_PAIR_TIMEOUT,
        }
    }
}

impl BrokerConfig {
    /// Checks the settings that would make the front door ambiguous or the
    /// timers spin.
    pub fn validate(&self) -> Result<(), InvalidConfig> {
        for path in [&self.xport_path, &self.pair_path] {
            if !path.starts_with('/') {
                return Err(InvalidConfig::RelativePath(path.clone()));
            }
        }
        if self.xport_path.trim_end_matches('/') == self.pair_path.trim_end_matches('/') {
            return Err(InvalidConfig::PathClash(self.pair_path.clone()));
        }
        if self.keepalive_interval.is_zero() {
            return Err(InvalidConfig::ZeroDuration("keepalive interval"));
        }
        if self.pair_timeout.is_zero() {
            return Err(InvalidConfig::ZeroDuration("pair timeout"));
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
