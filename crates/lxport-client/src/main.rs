//! lxport client agent: entry point.
//!
//! # Usage
//!
//! ```text
//! lxport-client --url <URL> [OPTIONS]
//!
//! Options:
//!   --url <URL>            Broker endpoint (ws://host:port/pair or .../xport)
//!   --uuid <ID>            Device to pair with; omit for a direct tunnel
//!   --target <HOST>        Host the broker dials in direct mode [default: 127.0.0.1]
//!   --listen-port <PORT>   Local port [default: 8009]
//!   --remote-port <PORT>   Port of the remote service [default: 3389]
//!   --decompress           Decode frames from the broker with the block codec
//!   --codec <NAME>         Block codec: snappy or deflate [default: snappy]
//!   --log-level <FILTER>   Log filter when RUST_LOG is unset [default: info]
//! ```

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use lxport_client::domain::config::{DEFAULT_LISTEN_PORT, DEFAULT_REMOTE_PORT};
use lxport_client::domain::{ClientConfig, TunnelMode};
use lxport_client::infrastructure::run_client;
use lxport_core::CodecKind;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// lxport client agent.
///
/// Exposes a service behind the relay broker on a local TCP port.
#[derive(Debug, Parser)]
#[command(
    name = "lxport-client",
    about = "Expose a remote service on a local port through an lxport broker",
    version
)]
struct Cli {
    /// Broker endpoint URL.
    #[arg(long, env = "LXPORT_URL")]
    url: String,

    /// Id of the device agent to pair with.  Without it the broker dials
    /// the service itself.
    #[arg(long, env = "LXPORT_UUID")]
    uuid: Option<String>,

    /// Host the broker dials in direct mode.
    #[arg(long, env = "LXPORT_TARGET", conflicts_with = "uuid")]
    target: Option<String>,

    /// Local port to listen on (loopback only).
    #[arg(long, default_value_t = DEFAULT_LISTEN_PORT, env = "LXPORT_LISTEN_PORT")]
    listen_port: u16,

    /// Port of the service on the far side.
    #[arg(long, default_value_t = DEFAULT_REMOTE_PORT, env = "LXPORT_REMOTE_PORT")]
    remote_port: u16,

    /// Decode frames from the broker with the block codec.
    #[arg(long, env = "LXPORT_DECOMPRESS")]
    decompress: bool,

    /// Block codec: `snappy` or `deflate`.
    #[arg(long, default_value_t = CodecKind::Snappy, env = "LXPORT_CODEC")]
    codec: CodecKind,

    /// `tracing` filter used when `RUST_LOG` is unset.
    #[arg(long, default_value = "info", env = "LXPORT_LOG_LEVEL")]
    log_level: String,
}

impl Cli {
    fn into_client_config(self) -> anyhow::Result<ClientConfig> {
        let mode = match self.uuid {
            Some(device_id) => TunnelMode::Paired { device_id },
            None => TunnelMode::Direct {
                target: self.target,
            },
        };
        let config = ClientConfig {
            listen_port: self.listen_port,
            remote_port: self.remote_port,
            mode,
            broker_url: self.url,
            decompress: self.decompress,
            codec: self.codec,
        };
        config.validate()?;
        Ok(config)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let config = cli.into_client_config()?;
    info!(
        "lxport client {} starting ({:?})",
        env!("CARGO_PKG_VERSION"),
        config.mode
    );

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C; shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => tracing::error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });

    run_client(config, running).await?;

    info!("lxport client stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_requires_url() {
        assert!(Cli::try_parse_from(["lxport-client"]).is_err());
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["lxport-client", "--url", "ws://relay:8010/xport"]);
        assert_eq!(cli.listen_port, 8009);
        assert_eq!(cli.remote_port, 3389);
        assert!(!cli.decompress);
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn test_cli_with_uuid_is_paired_mode() {
        // Arrange
        let cli = Cli::parse_from([
            "lxport-client",
            "--url",
            "ws://relay:8010/pair",
            "--uuid",
            "D1",
            "--remote-port",
            "22",
        ]);

        // Act
        let config = cli.into_client_config().unwrap();

        // Assert
        assert_eq!(
            config.mode,
            TunnelMode::Paired {
                device_id: "D1".to_string()
            }
        );
        assert_eq!(config.remote_port, 22);
    }

    #[test]
    fn test_cli_without_uuid_is_direct_mode() {
        let cli = Cli::parse_from([
            "lxport-client",
            "--url",
            "ws://relay:8010/xport",
            "--target",
            "10.1.1.1",
        ]);
        let config = cli.into_client_config().unwrap();
        assert_eq!(
            config.mode,
            TunnelMode::Direct {
                target: Some("10.1.1.1".to_string())
            }
        );
    }

    #[test]
    fn test_cli_target_conflicts_with_uuid() {
        let result = Cli::try_parse_from([
            "lxport-client",
            "--url",
            "ws://relay/pair",
            "--uuid",
            "D1",
            "--target",
            "h",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_codec_option() {
        let cli = Cli::parse_from(["lxport-client", "--url", "ws://r/pair", "--codec", "deflate"]);
        assert_eq!(cli.codec, CodecKind::Deflate);
        let unknown = Cli::try_parse_from(["lxport-client", "--url", "ws://r/pair", "--codec", "zip"]);
        assert!(unknown.is_err());
    }

    #[test]
    fn test_cli_decompress_flag() {
        let cli = Cli::parse_from(["lxport-client", "--url", "ws://r/pair", "--decompress"]);
        assert!(cli.decompress);
    }

    #[test]
    fn test_cli_non_websocket_url_is_rejected() {
        let cli = Cli::parse_from(["lxport-client", "--url", "http://relay/xport"]);
        assert!(cli.into_client_config().is_err());
    }
}
