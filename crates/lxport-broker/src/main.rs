//! lxport relay broker: entry point.
//!
//! # Usage
//!
//! ```text
//! lxport-broker [OPTIONS]
//!
//! Options:
//!   --listen <ADDR>                 Listener address [default: 127.0.0.1:8010]
//!   --xport-path <PATH>             Direct-tunnel endpoint [default: /xport]
//!   --pair-path <PATH>              Pairing endpoint [default: /pair]
//!   --keepalive-interval <SECS>     Watchdog interval [default: 30]
//!   --pair-timeout <SECS>           Pairing handshake timeout [default: 5]
//!   -c, --config <FILE>             TOML config file
//!   --log-level <FILTER>            Log filter when RUST_LOG is unset [default: info]
//! ```
//!
//! Settings are resolved in order: command line (or its `LXPORT_*` environment
//! variable), then the config file, then the built-in default.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use lxport_broker::domain::BrokerConfig;
use lxport_broker::infrastructure::config_file::{load_config, BrokerSection};
use lxport_broker::infrastructure::run_server;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// lxport relay broker.
///
/// Relays TCP tunnels over WebSocket and pairs client agents with registered
/// device agents.
#[derive(Debug, Parser)]
#[command(
    name = "lxport-broker",
    about = "WebSocket relay broker for lxport tunnels",
    version
)]
struct Cli {
    /// Address to listen on (`host:port`).
    #[arg(long, env = "LXPORT_LISTEN")]
    listen: Option<String>,

    /// Upgrade path of the direct-tunnel endpoint.
    #[arg(long, env = "LXPORT_XPORT_PATH")]
    xport_path: Option<String>,

    /// Upgrade path of the pairing endpoint.
    #[arg(long, env = "LXPORT_PAIR_PATH")]
    pair_path: Option<String>,

    /// Seconds between keepalive sweeps.
    #[arg(long, env = "LXPORT_KEEPALIVE_INTERVAL")]
    keepalive_interval: Option<u64>,

    /// Seconds a pairing request waits for the device's response leg.
    #[arg(long, env = "LXPORT_PAIR_TIMEOUT")]
    pair_timeout: Option<u64>,

    /// TOML config file.  Missing keys fall back to the defaults.
    #[arg(short, long, env = "LXPORT_CONFIG")]
    config: Option<PathBuf>,

    /// `tracing` filter used when `RUST_LOG` is unset.
    #[arg(long, env = "LXPORT_LOG_LEVEL")]
    log_level: Option<String>,
}

impl Cli {
    /// Reads the config file named by `--config`, or the defaults.
    fn file_section(&self) -> anyhow::Result<BrokerSection> {
        match &self.config {
            Some(path) => Ok(load_config(path)
                .with_context(|| format!("cannot load {}", path.display()))?
                .broker),
            None => Ok(BrokerSection::default()),
        }
    }

    /// Layers the command line over `file` and validates the result.
    ///
    /// Returns the broker config and the log filter.
    fn into_broker_config(self, file: BrokerSection) -> anyhow::Result<(BrokerConfig, String)> {
        let listen = self.listen.unwrap_or(file.listen);
        let listen_addr: SocketAddr = listen
            .parse()
            .with_context(|| format!("invalid listen address: '{listen}'"))?;

        let config = BrokerConfig {
            listen_addr,
            xport_path: self.xport_path.unwrap_or(file.xport_path),
            pair_path: self.pair_path.unwrap_or(file.pair_path),
            keepalive_interval: Duration::from_secs(
                self.keepalive_interval.unwrap_or(file.keepalive_interval),
            ),
            pair_timeout: Duration::from_secs(self.pair_timeout.unwrap_or(file.pair_timeout)),
        };
        config.validate()?;

        Ok((config, self.log_level.unwrap_or(file.log_level)))
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let file = cli.file_section()?;
    let (config, log_level) = cli.into_broker_config(file)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level)),
        )
        .init();

    info!(
        "lxport broker {} starting on {}",
        env!("CARGO_PKG_VERSION"),
        config.listen_addr
    );

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);

    // The accept loop checks the flag every 200 ms.
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C; shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    run_server(config, running).await?;

    info!("lxport broker stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use lxport_broker::infrastructure::config_file::parse_config;
    use tokio_test::{assert_err, assert_ok};

    use super::*;

    #[test]
    fn test_cli_without_arguments_uses_defaults() {
        // Arrange
        let cli = Cli::parse_from(["lxport-broker"]);

        // Act
        let (config, log_level) = cli.into_broker_config(BrokerSection::default()).unwrap();

        // Assert
        assert_eq!(config, BrokerConfig::default());
        assert_eq!(log_level, "info");
    }

    #[test]
    fn test_cli_listen_override() {
        let cli = Cli::parse_from(["lxport-broker", "--listen", "0.0.0.0:9010"]);
        let (config, _) = cli.into_broker_config(BrokerSection::default()).unwrap();
        assert_eq!(config.listen_addr.to_string(), "0.0.0.0:9010");
    }

    #[test]
    fn test_cli_pair_timeout_override() {
        let cli = Cli::parse_from(["lxport-broker", "--pair-timeout", "12"]);
        let (config, _) = cli.into_broker_config(BrokerSection::default()).unwrap();
        assert_eq!(config.pair_timeout, Duration::from_secs(12));
    }

    #[test]
    fn test_cli_overrides_file_values() {
        // Arrange: the file sets both paths, the CLI only one
        let file = parse_config("[broker]\nxport_path = \"/t\"\npair_path = \"/p\"\n")
            .unwrap()
            .broker;
        let cli = Cli::parse_from(["lxport-broker", "--pair-path", "/cli-pair"]);

        // Act
        let (config, _) = cli.into_broker_config(file).unwrap();

        // Assert
        assert_eq!(config.xport_path, "/t");
        assert_eq!(config.pair_path, "/cli-pair");
    }

    #[test]
    fn test_cli_invalid_listen_address_is_error() {
        let cli = Cli::parse_from(["lxport-broker", "--listen", "not-an-address"]);
        assert_err!(cli.into_broker_config(BrokerSection::default()));
    }

    #[test]
    fn test_cli_clashing_paths_are_rejected() {
        let cli = Cli::parse_from(["lxport-broker", "--xport-path", "/pair"]);
        assert_err!(cli.into_broker_config(BrokerSection::default()));
    }

    #[test]
    fn test_cli_missing_config_file_is_error() {
        let cli = Cli::parse_from(["lxport-broker", "--config", "/nonexistent/lxport.toml"]);
        assert_err!(cli.file_section());
    }

    #[test]
    fn test_cli_without_config_file_uses_default_section() {
        let cli = Cli::parse_from(["lxport-broker"]);
        let section = assert_ok!(cli.file_section());
        assert_eq!(section, BrokerSection::default());
    }
}
