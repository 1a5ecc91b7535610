//! Session handlers, one per upgrade route.
//!
//! Each handler owns its WebSocket for the whole session and returns when the
//! session is over.  Errors are returned to the connection task, which logs
//! them; nothing here can stop the broker.

use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use lxport_core::{CommandFrame, ProtocolError, TunnelQuery};
use lxport_transport::{bridge, dial_tcp, BridgeOptions, Leg, TransportHolder};

use super::ws_server::BrokerState;

// ── pt=dev ────────────────────────────────────────────────────────────────────

/// Registers a device's command channel and reads it until it closes.
///
/// The registration lease is held for exactly as long as the read loop runs,
/// so a re-registering device waits for this function to leave its loop.
pub async fn device_session<S>(
    ws: WebSocketStream<S>,
    device_id: String,
    state: &BrokerState,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (holder, mut reader) = TransportHolder::new(device_id.clone(), ws);

    let lease = match state.devices.register(&device_id, Arc::clone(&holder)).await {
        Ok(lease) => lease,
        Err(e) => {
            holder.shutdown().await;
            return Err(e).context("device registration refused");
        }
    };
    info!("device {device_id}: registered");

    loop {
        match reader.next_frame().await {
            Ok(Some(frame)) => on_device_command(&device_id, &frame),
            Ok(None) => break,
            Err(e) => {
                debug!("device {device_id}: {e}");
                break;
            }
        }
    }

    drop(lease);
    holder.shutdown().await;
    info!("device {device_id}: disconnected");
    Ok(())
}

fn on_device_command(device_id: &str, frame: &[u8]) {
    match CommandFrame::decode(frame) {
        Ok(CommandFrame::PairAccepted { token }) => {
            debug!("device {device_id}: accepted pair {token}");
        }
        Ok(other) => {
            warn!("device {device_id}: ignoring unexpected command {other:?}");
        }
        Err(ProtocolError::EmptyFrame) => {}
        Err(e) => warn!("device {device_id}: ignoring frame: {e}"),
    }
}

// ── pt=req ────────────────────────────────────────────────────────────────────

/// Runs a pairing request: waits for the device's response leg, then bridges.
pub async fn pair_request<S>(
    ws: WebSocketStream<S>,
    device_id: String,
    port: u16,
    state: &BrokerState,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (master, master_reader) = TransportHolder::new(format!("req:{device_id}"), ws);

    let pair = match state
        .pairing
        .request_pair(&device_id, port, Arc::clone(&master))
        .await
    {
        Ok(pair) => pair,
        Err(e) => {
            master.shutdown().await;
            return Err(e).with_context(|| format!("pairing with device {device_id} failed"));
        }
    };

    let token = pair.token;
    let _master_entry = state
        .tunnels
        .track(format!("pair:{token}:master"), Arc::clone(&master));
    let _slave_entry = state
        .tunnels
        .track(format!("pair:{token}:slave"), Arc::clone(pair.slave.holder()));

    bridge(
        &format!("pair {token}"),
        Leg::Ws(master_reader),
        Leg::Ws(pair.slave),
        BridgeOptions::default(),
    )
    .await;
    Ok(())
}

// ── pt=resp ───────────────────────────────────────────────────────────────────

/// Hands a device's response leg to the request waiting on `token`.
///
/// The leg's lifetime belongs to the requester's bridge from then on.
pub async fn pair_response<S>(
    ws: WebSocketStream<S>,
    token: String,
    state: &BrokerState,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (slave, slave_reader) = TransportHolder::new(token.clone(), ws);

    match state.pairing.complete_pair(&token, slave_reader) {
        Ok(device_id) => {
            debug!("pair {token}: response leg from device {device_id} handed over");
            Ok(())
        }
        Err(e) => {
            slave.shutdown().await;
            Err(e).context("response leg refused")
        }
    }
}

// ── direct tunnel ─────────────────────────────────────────────────────────────

/// Dials `target:port` and bridges it to the client's WebSocket.
pub async fn direct_tunnel<S>(
    ws: WebSocketStream<S>,
    query: TunnelQuery,
    state: &BrokerState,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let seq = state.tunnels.next_key();
    let (holder, reader) = TransportHolder::new(seq.clone(), ws);
    let addr = query.target_addr();

    let stream = match dial_tcp(&addr).await {
        Ok(stream) => stream,
        Err(e) => {
            holder.shutdown().await;
            return Err(e).with_context(|| format!("tunnel {seq}: target unreachable"));
        }
    };
    debug!("tunnel {seq}: connected to {addr}");

    let _entry = state.tunnels.track(seq.clone(), Arc::clone(&holder));
    bridge(
        &format!("tunnel {seq}"),
        Leg::Ws(reader),
        Leg::Tcp(stream),
        BridgeOptions::default(),
    )
    .await;
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
