//! Local TCP listener: one broker leg per accepted connection.
//!
//! ```text
//! local app ──tcp──▶ 127.0.0.1:<listen_port> ──ws──▶ broker (pt=req | /xport)
//! ```
//!
//! Each connection is bridged independently.  If the broker leg cannot be
//! opened, or the broker closes it (e.g. a failed pairing), the local
//! connection is closed with nothing forwarded.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use lxport_transport::{bridge, connect_holder, BridgeOptions, Leg};

use crate::domain::ClientConfig;

const ACCEPT_POLL: Duration = Duration::from_millis(200);

/// Binds `127.0.0.1:<listen_port>` and serves until `running` is cleared.
///
/// # Errors
///
/// Returns an error if the config is invalid or the port cannot be bound.
pub async fn run_client(config: ClientConfig, running: Arc<AtomicBool>) -> anyhow::Result<()> {
    config.validate()?;
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, config.listen_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind local listener on {addr}"))?;

    info!("client agent listening on {addr}, forwarding via {}", config.broker_url);
    serve(listener, Arc::new(config), running).await
}

/// Runs the accept loop on an already-bound listener.
pub async fn serve(
    listener: TcpListener,
    config: Arc<ClientConfig>,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    // Numbers local connections for log lines and holder keys.
    let next_seq = AtomicU64::new(1);

    // The flag is re-checked at least every ACCEPT_POLL, because `accept()`
    // below never waits longer than that.
    while running.load(Ordering::Relaxed) {
        match timeout(ACCEPT_POLL, listener.accept()).await {
            Ok(Ok((stream, peer_addr))) => {
                let seq = next_seq.fetch_add(1, Ordering::Relaxed);
                debug!("conn {seq}: accepted {peer_addr}");
                // Every local connection gets its own broker leg and bridge
                // on a separate task; the config is shared, not copied.
                let config = Arc::clone(&config);
                tokio::spawn(async move {
                    handle_connection(stream, seq, config).await;
                });
            }
            // Transient (e.g. too many open files); keep serving.
            Ok(Err(e)) => error!("accept error: {e}"),
            // Timed out with no connection; loop to re-check the flag.
            Err(_) => {}
        }
    }

    info!("shutdown flag set; stopping accept loop");
    Ok(())
}

async fn handle_connection(stream: TcpStream, seq: u64, config: Arc<ClientConfig>) {
    match run_tunnel(stream, seq, &config).await {
        Ok(()) => debug!("conn {seq}: finished"),
        Err(e) => warn!("conn {seq}: {e:#}"),
    }
}

async fn run_tunnel(stream: TcpStream, seq: u64, config: &ClientConfig) -> anyhow::Result<()> {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("conn {seq}: set_nodelay failed: {e}");
    }

    let url = config.tunnel_url()?;
    // On failure `stream` is dropped here, closing the local connection.
    let (_holder, reader) = connect_holder(&url, format!("conn {seq}"))
        .await
        .context("broker leg not opened")?;

    let mut options = BridgeOptions::default();
    if config.decompress {
        options = options.decode_inbound(config.codec.build());
    }

    bridge(&format!("conn {seq}"), Leg::Tcp(stream), Leg::Ws(reader), options).await;
    Ok(())
}
