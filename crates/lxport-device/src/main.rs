//! lxport device agent: entry point.
//!
//! # Usage
//!
//! ```text
//! lxport-device --uuid <ID> --url <URL> [OPTIONS]
//!
//! Options:
//!   --uuid <ID>                   Device id to register under
//!   --url <URL>                   Broker pairing endpoint (ws://host:port/pair)
//!   --reconnect-interval <SECS>   Wait between connection attempts [default: 15]
//!   --keepalive-interval <SECS>   Local watchdog interval [default: 30]
//!   --compress                    Encode tunnel frames with the block codec
//!   --codec <NAME>                Block codec: snappy or deflate [default: snappy]
//!   --log-level <FILTER>          Log filter when RUST_LOG is unset [default: info]
//! ```

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use lxport_device::domain::DeviceConfig;
use lxport_device::infrastructure::run_device;
use lxport_core::CodecKind;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// lxport device agent.
///
/// Registers this host with an lxport broker and serves pairing requests for
/// its local ports.
#[derive(Debug, Parser)]
#[command(
    name = "lxport-device",
    about = "Serve local ports to lxport client agents through a relay broker",
    version
)]
struct Cli {
    /// Device id to register under.
    #[arg(long, env = "LXPORT_UUID")]
    uuid: String,

    /// Broker pairing endpoint URL.
    #[arg(long, env = "LXPORT_URL")]
    url: String,

    /// Seconds to wait between command-channel connection attempts.
    #[arg(long, default_value_t = 15, env = "LXPORT_RECONNECT_INTERVAL")]
    reconnect_interval: u64,

    /// Seconds between keepalive sweeps of the local connections.
    #[arg(long, default_value_t = 30, env = "LXPORT_KEEPALIVE_INTERVAL")]
    keepalive_interval: u64,

    /// Encode tunnel frames with the block codec.
    #[arg(long, env = "LXPORT_COMPRESS")]
    compress: bool,

    /// Block codec: `snappy` or `deflate`.
    #[arg(long, default_value_t = CodecKind::Snappy, env = "LXPORT_CODEC")]
    codec: CodecKind,

    /// `tracing` filter used when `RUST_LOG` is unset.
    #[arg(long, default_value = "info", env = "LXPORT_LOG_LEVEL")]
    log_level: String,
}

impl Cli {
    fn into_device_config(self) -> anyhow::Result<DeviceConfig> {
        let config = DeviceConfig {
            device_id: self.uuid,
            broker_url: self.url,
            reconnect_interval: Duration::from_secs(self.reconnect_interval),
            keepalive_interval: Duration::from_secs(self.keepalive_interval),
            compress: self.compress,
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

    let config = cli.into_device_config()?;
    info!(
        "lxport device {} starting as {}",
        env!("CARGO_PKG_VERSION"),
        config.device_id
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

    run_device(config, running).await
}

// ── Tests ─────────────────────────────────────────────────────────────────────
