//! Transport holder: one WebSocket connection with serialized writes.
//!
//! A WebSocket connection is split into two owners:
//!
//! - [`TransportHolder`] owns the write half.  It is shared (`Arc`) between the
//!   bridge, the keepalive watchdog and the registries, so every write goes
//!   through one async mutex and frames are never interleaved.
//! - [`HolderReader`] owns the read half.  Exactly one task reads from it.  It
//!   answers peer pings, resets the missed-pong counter on pongs, and hands
//!   data frames to its caller.
//!
//! Closing is a flag plus a `watch` signal: [`TransportHolder::close`] is
//! synchronous and idempotent, and wakes any task blocked in a read or write
//! on the same connection.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{watch, Mutex};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, warn};

use lxport_core::protocol::keepalive::{now_payload, MAX_MISSED_PONGS, PING_WRITE_TIMEOUT};

use crate::error::TransportError;

/// How long [`TransportHolder::shutdown`] waits for the close frame to flush.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

type FrameSink = Pin<Box<dyn Sink<Message, Error = WsError> + Send>>;
type FrameSource = Pin<Box<dyn Stream<Item = Result<Message, WsError>> + Send>>;

/// The kinds of frame a holder writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Binary,
    Ping,
    Pong,
}

impl FrameKind {
    fn into_message(self, payload: Vec<u8>) -> Message {
        match self {
            FrameKind::Binary => Message::Binary(payload),
            FrameKind::Ping => Message::Ping(payload),
            FrameKind::Pong => Message::Pong(payload),
        }
    }
}

/// Write side of one WebSocket connection, plus its keepalive state.
pub struct TransportHolder {
    key: String,
    writer: Mutex<Option<FrameSink>>,
    missed_pongs: AtomicU32,
    closed: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl std::fmt::Debug for TransportHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportHolder")
            .field("key", &self.key)
            .field("missed_pongs", &self.missed_pongs())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl TransportHolder {
    /// Wraps an established WebSocket connection.
    ///
    /// Returns the shared write side and the single read side.  `key` names
    /// the connection in logs and registries (device id, pair token, or a
    /// sequence number).
    pub fn new<S>(key: impl Into<String>, ws: WebSocketStream<S>) -> (Arc<Self>, HolderReader)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, source) = ws.split();
        let (shutdown, shutdown_rx) = watch::channel(false);

        let holder = Arc::new(Self {
            key: key.into(),
            writer: Mutex::new(Some(Box::pin(sink))),
            missed_pongs: AtomicU32::new(0),
            closed: AtomicBool::new(false),
            shutdown,
        });

        let reader = HolderReader {
            holder: Arc::clone(&holder),
            source: Box::pin(source),
            shutdown: shutdown_rx,
        };

        (holder, reader)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Pings sent since the last pong arrived.
    pub fn missed_pongs(&self) -> u32 {
        self.missed_pongs.load(Ordering::Acquire)
    }

    /// Writes one frame.
    ///
    /// Concurrent callers are serialized.  A call blocked on a slow peer is
    /// abandoned as soon as the holder is closed.
    ///
    /// # Errors
    ///
    /// [`TransportError::Closed`] if the holder is (or becomes) closed,
    /// [`TransportError::WriteFailed`] if the underlying write fails.  Callers
    /// treat both as fatal for this connection.
    pub async fn send(&self, kind: FrameKind, payload: Vec<u8>) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(self.closed_error());
        }

        let mut shutdown = self.shutdown.subscribe();
        let mut writer = self.writer.lock().await;
        let Some(sink) = writer.as_mut() else {
            return Err(self.closed_error());
        };

        let message = kind.into_message(payload);
        tokio::select! {
            result = sink.send(message) => result.map_err(|source| TransportError::WriteFailed {
                key: self.key.clone(),
                source,
            }),
            _ = shutdown.wait_for(|closed| *closed) => Err(self.closed_error()),
        }
    }

    /// [`probe_within`](Self::probe_within) with the default [`PING_WRITE_TIMEOUT`].
    pub async fn probe(&self) -> Result<(), TransportError> {
        self.probe_within(PING_WRITE_TIMEOUT).await
    }

    /// Sends one keepalive ping, or gives up on the peer.
    ///
    /// If more than [`MAX_MISSED_PONGS`] pings are already unanswered the
    /// holder is closed and [`TransportError::Unresponsive`] is returned.
    /// Otherwise the missed counter is incremented and a ping carrying the
    /// current Unix time is sent.
    ///
    /// A ping that cannot be written within `write_timeout` (the peer stopped
    /// reading, or another writer is stuck on it) is abandoned and stays
    /// counted as unanswered, so a stalled peer is still evicted after enough
    /// probes.
    pub async fn probe_within(&self, write_timeout: Duration) -> Result<(), TransportError> {
        let missed = self.missed_pongs();
        if missed > MAX_MISSED_PONGS {
            warn!("{}: {missed} pings unanswered, closing", self.key);
            self.close();
            return Err(TransportError::Unresponsive {
                key: self.key.clone(),
                missed,
            });
        }

        self.missed_pongs.fetch_add(1, Ordering::AcqRel);
        let ping = self.send(FrameKind::Ping, now_payload().to_vec());
        match tokio::time::timeout(write_timeout, ping).await {
            Ok(sent) => sent,
            Err(_) => {
                debug!("{}: ping not written within {write_timeout:?}", self.key);
                Ok(())
            }
        }
    }

    /// Marks the holder closed and wakes every blocked reader and writer.
    ///
    /// Returns `true` for the call that actually closed it.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.shutdown.send_replace(true);
        debug!("{}: holder closed", self.key);
        true
    }

    /// Closes the holder and tries to send a WebSocket close frame.
    pub async fn shutdown(&self) {
        self.close();
        let sink = self.writer.lock().await.take();
        if let Some(mut sink) = sink {
            // The peer may already be gone; the close frame is best-effort.
            if tokio::time::timeout(CLOSE_GRACE, sink.close()).await.is_err() {
                debug!("{}: close frame timed out", self.key);
            }
        }
    }

    /// Resolves once the holder has been closed.
    pub async fn closed(&self) {
        let mut rx = self.shutdown.subscribe();
        // The sender lives in `self`, so `wait_for` can only return Ok here.
        let _ = rx.wait_for(|closed| *closed).await;
    }

    fn pong_received(&self) {
        self.missed_pongs.store(0, Ordering::Release);
    }

    fn closed_error(&self) -> TransportError {
        TransportError::Closed {
            key: self.key.clone(),
        }
    }
}

/// Read side of a holder's connection.
pub struct HolderReader {
    holder: Arc<TransportHolder>,
    source: FrameSource,
    shutdown: watch::Receiver<bool>,
}

impl std::fmt::Debug for HolderReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HolderReader")
            .field("key", &self.holder.key)
            .field("closed", &self.holder.is_closed())
            .finish()
    }
}

impl HolderReader {
    /// The holder this reader belongs to.
    pub fn holder(&self) -> &Arc<TransportHolder> {
        &self.holder
    }

    /// Waits for the next data frame.
    ///
    /// Control frames are handled here and never returned: a ping is answered
    /// with a pong carrying the same payload, a pong resets the holder's
    /// missed-pong counter.  Text frames are returned as their UTF-8 bytes.
    ///
    /// Returns `Ok(None)` once the peer closes, the stream ends, or the holder
    /// is closed locally.  Every terminal outcome leaves the holder closed.
    pub async fn next_frame(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        loop {
            let next = tokio::select! {
                next = self.source.next() => next,
                _ = self.shutdown.wait_for(|closed| *closed) => return Ok(None),
            };

            match next {
                Some(Ok(Message::Binary(data))) => return Ok(Some(data)),
                Some(Ok(Message::Text(text))) => return Ok(Some(text.into_bytes())),
                Some(Ok(Message::Ping(payload))) => {
                    // tungstenite also queues its own pong; a duplicate is harmless.
                    if let Err(e) = self.holder.send(FrameKind::Pong, payload).await {
                        debug!("{}: pong not sent: {e}", self.holder.key);
                    }
                }
                Some(Ok(Message::Pong(_))) => self.holder.pong_received(),
                Some(Ok(Message::Frame(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    debug!("{}: peer closed ({frame:?})", self.holder.key);
                    self.holder.close();
                    return Ok(None);
                }
                Some(Err(source)) => {
                    self.holder.close();
                    return Err(TransportError::ReadFailed {
                        key: self.holder.key.clone(),
                        source,
                    });
                }
                None => {
                    self.holder.close();
                    return Ok(None);
                }
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
