//! WebSocket front door: accept loop, upgrade routing and per-connection tasks.
//!
//! The broker listens on one TCP port.  Every connection must be a WebSocket
//! upgrade to one of two paths:
//!
//! - the **pairing endpoint** (default `/pair`), whose `pt` query selects a
//!   device registration, a pairing request, or a pairing response leg;
//! - the **direct-tunnel endpoint** (default `/xport`), where the broker
//!   dials `target:port` itself.
//!
//! Routing happens inside the upgrade handshake: an unknown path is answered
//! with `404`, a known path with an unusable query with `400`, and neither
//! reaches the session handlers in [`super::sessions`].
//!
//! Each accepted connection runs in its own task; the accept loop never
//! blocks on a session.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{StatusCode, Uri};
use tracing::{debug, error, info, warn};

use lxport_core::{PairQuery, TunnelQuery};
use lxport_transport::{HolderMap, Watchdog};

use crate::application::{DeviceRegistry, PairingCoordinator};
use crate::domain::BrokerConfig;

use super::sessions;

/// How often the accept loop re-checks the shutdown flag.
const ACCEPT_POLL: Duration = Duration::from_millis(200);

// ── Shared state ──────────────────────────────────────────────────────────────

/// Everything the connection tasks share.
pub struct BrokerState {
    pub config: BrokerConfig,
    pub devices: Arc<DeviceRegistry>,
    pub pairing: Arc<PairingCoordinator>,
    /// Direct tunnels (keyed by sequence number) and established pair legs.
    pub tunnels: Arc<HolderMap>,
}

impl BrokerState {
    pub fn new(config: BrokerConfig) -> Arc<Self> {
        let devices = Arc::new(DeviceRegistry::new());
        let pairing = Arc::new(PairingCoordinator::new(
            Arc::clone(&devices),
            config.pair_timeout,
        ));
        Arc::new(Self {
            config,
            devices,
            pairing,
            tunnels: Arc::new(HolderMap::new("tunnels")),
        })
    }

    /// A watchdog over every registry this broker owns.
    pub fn watchdog(&self) -> Watchdog {
        Watchdog::new(self.config.keepalive_interval)
            .watch(self.tunnels.clone())
            .watch(self.devices.clone())
            .watch(self.pairing.clone())
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Binds `config.listen_addr` and serves until `running` is cleared.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound.  This is the only error
/// that stops the broker; per-connection failures are logged and dropped.
pub async fn run_server(config: BrokerConfig, running: Arc<AtomicBool>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind broker listener on {}", config.listen_addr))?;

    info!(
        "broker listening on {} (tunnels at {}, pairing at {})",
        config.listen_addr, config.xport_path, config.pair_path
    );

    serve(listener, BrokerState::new(config), running).await
}

/// Runs the accept loop on an already-bound listener.
///
/// Also runs the keepalive watchdog for as long as the loop runs.
pub async fn serve(
    listener: TcpListener,
    state: Arc<BrokerState>,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    // One watchdog task probes every holder the broker knows about: plain
    // tunnels, established pair legs, registered devices and pending pairs.
    let watchdog = state.watchdog().spawn();

    loop {
        // Check the shutdown flag before each accept attempt.
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping accept loop");
            break;
        }

        // `accept()` is bounded by ACCEPT_POLL so the loop wakes up to see a
        // cleared flag even when nobody is connecting.
        match timeout(ACCEPT_POLL, listener.accept()).await {
            Ok(Ok((stream, peer_addr))) => {
                debug!("connection from {peer_addr}");
                // Each task gets its own handle on the shared registries.
                // The upgrade handshake runs inside the task, so a slow
                // client never holds up the next accept.
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    handle_connection(stream, peer_addr, state).await;
                });
            }
            Ok(Err(e)) => {
                // Transient (e.g. too many open files); keep serving.
                error!("accept error: {e}");
            }
            Err(_) => {
                // No connection within ACCEPT_POLL; re-check the flag.
            }
        }
    }

    // In-flight sessions keep running on their own tasks; only the
    // watchdog is tied to the accept loop.
    watchdog.abort();
    Ok(())
}

// ── Routing ───────────────────────────────────────────────────────────────────

/// What an upgraded connection is for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Pair(PairQuery),
    Tunnel(TunnelQuery),
}

/// Why an upgrade request was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub status: StatusCode,
    pub reason: String,
}

impl Rejection {
    fn into_response(self) -> ErrorResponse {
        let mut response = ErrorResponse::new(Some(self.reason));
        *response.status_mut() = self.status;
        response
    }
}

/// Maps an upgrade request URI to a [`Route`].
pub fn route(uri: &Uri, config: &BrokerConfig) -> Result<Route, Rejection> {
    let path = uri.path();
    let query = uri.query().unwrap_or("");

    let bad_request = |e: lxport_core::ProtocolError| Rejection {
        status: StatusCode::BAD_REQUEST,
        reason: e.to_string(),
    };

    if same_path(path, &config.pair_path) {
        PairQuery::parse(query).map(Route::Pair).map_err(bad_request)
    } else if same_path(path, &config.xport_path) {
        TunnelQuery::parse(query).map(Route::Tunnel).map_err(bad_request)
    } else {
        Err(Rejection {
            status: StatusCode::NOT_FOUND,
            reason: format!("no endpoint at {path}"),
        })
    }
}

fn same_path(path: &str, endpoint: &str) -> bool {
    path.trim_end_matches('/') == endpoint.trim_end_matches('/')
}

// ── Per-connection handler ────────────────────────────────────────────────────

/// Entry point of each connection task; logs the outcome of [`run_connection`].
async fn handle_connection(stream: TcpStream, peer_addr: SocketAddr, state: Arc<BrokerState>) {
    match run_connection(stream, peer_addr, state).await {
        Ok(()) => debug!("{peer_addr}: connection finished"),
        Err(e) => warn!("{peer_addr}: {e:#}"),
    }
}

/// Completes the upgrade, then hands the connection to its session handler.
async fn run_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    state: Arc<BrokerState>,
) -> anyhow::Result<()> {
    let mut routed = None;
    let callback = |request: &Request, response: Response| match route(request.uri(), &state.config) {
        Ok(route) => {
            routed = Some(route);
            Ok(response)
        }
        Err(rejection) => {
            debug!(
                "{peer_addr}: refusing {} ({}): {}",
                request.uri(),
                rejection.status,
                rejection.reason
            );
            Err(rejection.into_response())
        }
    };

    let ws = accept_hdr_async(stream, callback)
        .await
        .context("websocket handshake failed")?;
    let route = routed.context("handshake accepted without a route")?;

    match route {
        Route::Pair(PairQuery::Device { uuid }) => sessions::device_session(ws, uuid, &state).await,
        Route::Pair(PairQuery::Request { uuid, port }) => {
            sessions::pair_request(ws, uuid, port, &state).await
        }
        Route::Pair(PairQuery::Response { token }) => {
            sessions::pair_response(ws, token, &state).await
        }
        Route::Tunnel(query) => sessions::direct_tunnel(ws, query, &state).await,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
