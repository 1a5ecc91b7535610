//! Full-duplex forwarding between two legs.
//!
//! A leg is either a raw TCP stream or a WebSocket connection (through its
//! [`HolderReader`]).  [`bridge`] runs one pump per direction:
//!
//! ```text
//!            pump a → b
//!   leg a  ───────────────▶  leg b
//!          ◀───────────────
//!            pump b → a
//! ```
//!
//! Whichever pump stops first (EOF, read error, write error, holder closed)
//! raises a shared teardown signal; the other pump abandons whatever it is
//! blocked on and both legs are closed.  One WebSocket binary message carries
//! one chunk of TCP bytes; TCP stream boundaries are not preserved.
//!
//! Optional [`BlockCodec`]s transform frames at the WebSocket edge: frames read
//! from a WebSocket leg are decoded before being forwarded, bytes written to a
//! WebSocket leg are encoded first.  A frame the codec rejects is dropped and
//! the bridge keeps running.

use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use lxport_core::BlockCodec;

use crate::error::TransportError;
use crate::holder::{FrameKind, HolderReader, TransportHolder};

/// Read buffer size for TCP legs.
pub const TUNNEL_BUFFER_SIZE: usize = 8192;

/// One side of a bridge.
pub enum Leg {
    Ws(HolderReader),
    Tcp(TcpStream),
}

impl Leg {
    fn describe(&self) -> String {
        match self {
            Leg::Ws(reader) => format!("ws:{}", reader.holder().key()),
            Leg::Tcp(stream) => match stream.peer_addr() {
                Ok(addr) => format!("tcp:{addr}"),
                Err(_) => "tcp:?".to_string(),
            },
        }
    }

    fn split(self) -> (LegSource, LegSink) {
        match self {
            Leg::Ws(reader) => {
                let holder = Arc::clone(reader.holder());
                (LegSource::Ws(reader), LegSink::Ws(holder))
            }
            Leg::Tcp(stream) => {
                let (read_half, write_half) = stream.into_split();
                (LegSource::Tcp(read_half), LegSink::Tcp(write_half))
            }
        }
    }
}

/// Tunables for one bridge.
#[derive(Clone)]
pub struct BridgeOptions {
    /// Read buffer size for TCP legs.
    pub buffer_size: usize,
    /// Applied to every frame read from a WebSocket leg.
    pub inbound: Option<Arc<dyn BlockCodec>>,
    /// Applied to every chunk written to a WebSocket leg.
    pub outbound: Option<Arc<dyn BlockCodec>>,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            buffer_size: TUNNEL_BUFFER_SIZE,
            inbound: None,
            outbound: None,
        }
    }
}

impl BridgeOptions {
    /// Decode frames arriving on WebSocket legs with `codec`.
    pub fn decode_inbound(mut self, codec: Arc<dyn BlockCodec>) -> Self {
        self.inbound = Some(codec);
        self
    }

    /// Encode chunks leaving on WebSocket legs with `codec`.
    pub fn encode_outbound(mut self, codec: Arc<dyn BlockCodec>) -> Self {
        self.outbound = Some(codec);
        self
    }
}

/// Bytes forwarded in each direction over a bridge's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub a_to_b: u64,
    pub b_to_a: u64,
}

/// Forwards bytes between `a` and `b` until either side ends.
///
/// Both legs are closed when this returns: WebSocket holders are shut down
/// (close frame sent best-effort) and TCP streams are dropped.
pub async fn bridge(label: &str, a: Leg, b: Leg, options: BridgeOptions) -> BridgeStats {
    let a_to_b_name = format!("{label} {} -> {}", a.describe(), b.describe());
    let b_to_a_name = format!("{label} {} -> {}", b.describe(), a.describe());

    let holders: Vec<Arc<TransportHolder>> = [&a, &b]
        .into_iter()
        .filter_map(|leg| match leg {
            Leg::Ws(reader) => Some(Arc::clone(reader.holder())),
            Leg::Tcp(_) => None,
        })
        .collect();

    let (a_source, a_sink) = a.split();
    let (b_source, b_sink) = b.split();
    let (teardown, _) = watch::channel(false);

    debug!("{label}: bridge started");
    let (a_to_b, b_to_a) = tokio::join!(
        pump(&a_to_b_name, a_source, b_sink, &options, &teardown),
        pump(&b_to_a_name, b_source, a_sink, &options, &teardown),
    );

    for holder in holders {
        holder.shutdown().await;
    }

    info!("{label}: bridge closed ({a_to_b} bytes a->b, {b_to_a} bytes b->a)");
    BridgeStats { a_to_b, b_to_a }
}

// ── Pumps ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
enum PumpError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

enum LegSource {
    Ws(HolderReader),
    Tcp(OwnedReadHalf),
}

impl LegSource {
    /// `Ok(None)` means the source is finished.
    async fn read(&mut self, buf: &mut [u8]) -> Result<Option<Vec<u8>>, PumpError> {
        match self {
            LegSource::Ws(reader) => Ok(reader.next_frame().await?),
            LegSource::Tcp(read_half) => match read_half.read(buf).await? {
                0 => Ok(None),
                n => Ok(Some(buf[..n].to_vec())),
            },
        }
    }

    fn is_ws(&self) -> bool {
        matches!(self, LegSource::Ws(_))
    }
}

enum LegSink {
    Ws(Arc<TransportHolder>),
    Tcp(OwnedWriteHalf),
}

impl LegSink {
    async fn write(&mut self, chunk: Vec<u8>) -> Result<(), PumpError> {
        match self {
            LegSink::Ws(holder) => Ok(holder.send(FrameKind::Binary, chunk).await?),
            LegSink::Tcp(write_half) => Ok(write_half.write_all(&chunk).await?),
        }
    }

    fn is_ws(&self) -> bool {
        matches!(self, LegSink::Ws(_))
    }
}

/// Copies from `from` to `to` until either fails or teardown is raised.
/// Returns the number of bytes read from `from` and delivered.
async fn pump(
    name: &str,
    mut from: LegSource,
    mut to: LegSink,
    options: &BridgeOptions,
    teardown: &watch::Sender<bool>,
) -> u64 {
    let mut stop = teardown.subscribe();
    let mut buf = vec![0u8; options.buffer_size];
    let mut forwarded = 0u64;

    loop {
        let read = tokio::select! {
            read = from.read(&mut buf) => read,
            _ = stop.wait_for(|stopped| *stopped) => break,
        };

        let chunk = match read {
            Ok(Some(chunk)) => chunk,
            Ok(None) => {
                debug!("{name}: source finished");
                break;
            }
            Err(e) => {
                debug!("{name}: read failed: {e}");
                break;
            }
        };
        let read_len = chunk.len() as u64;

        let Some(chunk) = transcode(name, chunk, from.is_ws(), to.is_ws(), options) else {
            continue;
        };

        let written = tokio::select! {
            written = to.write(chunk) => written,
            _ = stop.wait_for(|stopped| *stopped) => break,
        };
        if let Err(e) = written {
            debug!("{name}: write failed: {e}");
            break;
        }
        forwarded += read_len;
    }

    teardown.send_replace(true);
    forwarded
}

/// Applies the configured codecs; `None` drops the frame.
fn transcode(
    name: &str,
    chunk: Vec<u8>,
    from_ws: bool,
    to_ws: bool,
    options: &BridgeOptions,
) -> Option<Vec<u8>> {
    let chunk = match (&options.inbound, from_ws) {
        (Some(codec), true) => match codec.decode(&chunk) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("{name}: {} decode failed, frame dropped: {e}", codec.name());
                return None;
            }
        },
        _ => chunk,
    };

    match (&options.outbound, to_ws) {
        (Some(codec), true) => match codec.encode(&chunk) {
            Ok(encoded) => Some(encoded),
            Err(e) => {
                warn!("{name}: {} encode failed, chunk dropped: {e}", codec.name());
                None
            }
        },
        _ => Some(chunk),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
