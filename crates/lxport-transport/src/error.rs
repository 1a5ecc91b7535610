//! Error type shared by holders, the bridge and the dial helpers.

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

/// Errors raised by the transport layer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The holder was closed before or during the operation.
    #[error("transport {key} is closed")]
    Closed { key: String },

    /// Writing a frame failed; the holder should be dropped.
    #[error("write to {key} failed: {source}")]
    WriteFailed {
        key: String,
        #[source]
        source: WsError,
    },

    /// Reading from the connection failed.
    #[error("read from {key} failed: {source}")]
    ReadFailed {
        key: String,
        #[source]
        source: WsError,
    },

    /// The peer stopped answering keepalive pings.
    #[error("transport {key} missed {missed} keepalive replies")]
    Unresponsive { key: String, missed: u32 },

    /// A TCP dial to a local or target service failed.
    #[error("failed to dial {addr}: {source}")]
    DialFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Opening a WebSocket connection to the broker failed.
    #[error("websocket connect to {url} failed: {source}")]
    ConnectFailed {
        url: String,
        #[source]
        source: WsError,
    },
}

impl TransportError {
    /// Returns `true` for errors that only mean "the other side went away".
    pub fn is_closed(&self) -> bool {
        matches!(self, TransportError::Closed { .. })
    }
}
