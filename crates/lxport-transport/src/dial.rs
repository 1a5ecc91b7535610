//! Outbound connections: TCP dials to local services and WebSocket connects
//! to the broker.

use std::sync::Arc;

use tokio::net::TcpStream;
use tokio_tungstenite::connect_async;
use tracing::debug;

use crate::error::TransportError;
use crate::holder::{HolderReader, TransportHolder};

/// Opens a TCP connection to `addr` (`host:port`).
pub async fn dial_tcp(addr: &str) -> Result<TcpStream, TransportError> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|source| TransportError::DialFailed {
            addr: addr.to_string(),
            source,
        })?;
    // Tunnels carry interactive protocols (RDP, SSH); don't batch small writes.
    if let Err(e) = stream.set_nodelay(true) {
        debug!("set_nodelay on {addr} failed: {e}");
    }
    Ok(stream)
}

/// Connects to a broker endpoint and wraps the connection in a holder.
pub async fn connect_holder(
    url: &str,
    key: impl Into<String>,
) -> Result<(Arc<TransportHolder>, HolderReader), TransportError> {
    let (ws, response) = connect_async(url)
        .await
        .map_err(|source| TransportError::ConnectFailed {
            url: url.to_string(),
            source,
        })?;
    debug!("connected to {url} ({})", response.status());
    Ok(TransportHolder::new(key, ws))
}
