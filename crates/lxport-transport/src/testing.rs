//! In-memory WebSocket pairs for tests.
//!
//! Enabled for this crate's own tests and, through the `test-util` feature,
//! for the broker and agent crates.

use std::sync::Arc;

use tokio::io::DuplexStream;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::WebSocketStream;

use crate::holder::{HolderReader, TransportHolder};

/// Buffer size of the in-memory pipe between the two ends.
const PIPE_CAPACITY: usize = 256 * 1024;

/// Two connected WebSocket endpoints: `(server, client)`.
pub async fn ws_pair() -> (WebSocketStream<DuplexStream>, WebSocketStream<DuplexStream>) {
    let (a, b) = tokio::io::duplex(PIPE_CAPACITY);
    tokio::join!(
        WebSocketStream::from_raw_socket(a, Role::Server, None),
        WebSocketStream::from_raw_socket(b, Role::Client, None),
    )
}

/// A holder on the server end and the raw client end as its peer.
pub async fn holder_pair(
    key: &str,
) -> (
    Arc<TransportHolder>,
    HolderReader,
    WebSocketStream<DuplexStream>,
) {
    let (server, client) = ws_pair().await;
    let (holder, reader) = TransportHolder::new(key, server);
    (holder, reader, client)
}
