//! Pairing coordinator: the request/response handshake behind paired tunnels.
//!
//! ```text
//! client agent          broker                           device agent
//!     │ pt=req&uuid=D&port=P │                                  │
//!     ├─────────────────────▶│ mint token T, park the request   │
//!     │                      ├── [0][P le][T] on D's channel ──▶│ dial 127.0.0.1:P
//!     │                      │◀──────── pt=resp&uuid=T ─────────┤
//!     │                      │ complete T: hand the response    │
//!     │                      │ leg to the parked request        │
//!     │◀═════════════ bridge(master, slave) ═══════════════════▶│
//! ```
//!
//! A pending pair lives in the coordinator only while the handshake is open:
//! it is removed exactly once, either by [`PairingCoordinator::complete_pair`]
//! or by the requester giving up after the pair timeout.  The completion
//! signal is a `oneshot` channel, so a pair can be completed at most once.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

use lxport_core::CommandFrame;
use lxport_transport::{FrameKind, HolderReader, HolderSource, TransportError, TransportHolder};

use super::device_registry::DeviceRegistry;

/// Errors raised while pairing.
#[derive(Debug, Error)]
pub enum PairingError {
    /// No device is registered under the requested id.
    #[error("device {device_id} is not registered")]
    DeviceNotFound { device_id: String },

    /// No pending pair carries this token (never issued, already completed,
    /// or already timed out).
    #[error("no pending pair for token {token}")]
    PairNotFound { token: String },

    /// The device did not open the response leg in time.
    #[error("pair {token} was not completed in time")]
    HandshakeTimeout { token: String },

    /// The pair-create command could not be written to the device.
    #[error("device {device_id} could not be notified: {source}")]
    DeviceUnreachable {
        device_id: String,
        #[source]
        source: TransportError,
    },
}

/// A handshake that completed: the requester now bridges to `slave`.
pub struct EstablishedPair {
    pub token: String,
    pub device_id: String,
    pub slave: HolderReader,
}

struct PendingPair {
    device_id: String,
    master: Arc<TransportHolder>,
    complete: oneshot::Sender<HolderReader>,
}

/// Process-wide registry of pending pairs.
pub struct PairingCoordinator {
    devices: Arc<DeviceRegistry>,
    pending: Mutex<HashMap<String, PendingPair>>,
    timeout: Duration,
}

impl PairingCoordinator {
    pub fn new(devices: Arc<DeviceRegistry>, timeout: Duration) -> Self {
        Self {
            devices,
            pending: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Asks device `device_id` to open a tunnel to its local `port` and waits
    /// for the response leg.
    ///
    /// `master` is the requester's own connection.  It is recorded with the
    /// pending pair (so the watchdog can probe it while it waits) and closed
    /// if the handshake times out.
    ///
    /// # Errors
    ///
    /// - [`PairingError::DeviceNotFound`] immediately, with no pair created.
    /// - [`PairingError::DeviceUnreachable`] if the command cannot be sent.
    /// - [`PairingError::HandshakeTimeout`] if no response leg arrives within
    ///   the pair timeout.
    ///
    /// The pending entry is gone from the coordinator whichever way this
    /// returns.
    pub async fn request_pair(
        &self,
        device_id: &str,
        port: u16,
        master: Arc<TransportHolder>,
    ) -> Result<EstablishedPair, PairingError> {
        let device = self
            .devices
            .lookup(device_id)
            .ok_or_else(|| PairingError::DeviceNotFound {
                device_id: device_id.to_string(),
            })?;

        let (complete, mut completed) = oneshot::channel();
        let token = self.park(device_id, Arc::clone(&master), complete);
        // Removes the entry however this future ends, including cancellation.
        let _parked = Parked {
            coordinator: self,
            token: token.clone(),
        };
        debug!("pair {token}: requesting port {port} on device {device_id}");

        let command = CommandFrame::PairCreate {
            port,
            token: token.clone(),
        };
        if let Err(source) = device.send(FrameKind::Binary, command.encode()).await {
            return Err(PairingError::DeviceUnreachable {
                device_id: device_id.to_string(),
                source,
            });
        }

        let slave = match tokio::time::timeout(self.timeout, &mut completed).await {
            Ok(Ok(slave)) => slave,
            // The entry was dropped without completing (evicted).
            Ok(Err(_)) => return Err(abandon(token, &master)),
            Err(_elapsed) => {
                if self.pending.lock().remove(&token).is_none() {
                    // Completed between the deadline and the removal.
                    if let Ok(slave) = completed.try_recv() {
                        return Ok(established(token, device_id, slave));
                    }
                }
                warn!("pair {token}: device {device_id} did not respond in time");
                return Err(abandon(token, &master));
            }
        };

        Ok(established(token, device_id, slave))
    }

    /// Hands the response leg of pair `token` to its waiting requester.
    ///
    /// Returns the id of the device the pair belongs to.
    ///
    /// # Errors
    ///
    /// [`PairingError::PairNotFound`] if `token` is not pending (including a
    /// second completion of the same token).  [`PairingError::HandshakeTimeout`]
    /// if the requester stopped waiting; the response leg is closed.
    pub fn complete_pair(&self, token: &str, slave: HolderReader) -> Result<String, PairingError> {
        let pending = self
            .pending
            .lock()
            .remove(token)
            .ok_or_else(|| PairingError::PairNotFound {
                token: token.to_string(),
            })?;

        if let Err(slave) = pending.complete.send(slave) {
            slave.holder().close();
            return Err(PairingError::HandshakeTimeout {
                token: token.to_string(),
            });
        }
        Ok(pending.device_id)
    }

    /// Whether `token` is still waiting for its response leg.
    pub fn is_pending(&self, token: &str) -> bool {
        self.pending.lock().contains_key(token)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Inserts a pending pair under a fresh token.
    fn park(
        &self,
        device_id: &str,
        master: Arc<TransportHolder>,
        complete: oneshot::Sender<HolderReader>,
    ) -> String {
        let mut pending = self.pending.lock();
        let token = loop {
            let candidate = Uuid::new_v4().to_string();
            if !pending.contains_key(&candidate) {
                break candidate;
            }
        };
        pending.insert(
            token.clone(),
            PendingPair {
                device_id: device_id.to_string(),
                master,
                complete,
            },
        );
        token
    }
}

struct Parked<'a> {
    coordinator: &'a PairingCoordinator,
    token: String,
}

impl Drop for Parked<'_> {
    fn drop(&mut self) {
        self.coordinator.pending.lock().remove(&self.token);
    }
}

fn abandon(token: String, master: &Arc<TransportHolder>) -> PairingError {
    master.close();
    PairingError::HandshakeTimeout { token }
}

fn established(token: String, device_id: &str, slave: HolderReader) -> EstablishedPair {
    info!("pair {token}: established with device {device_id}");
    EstablishedPair {
        token,
        device_id: device_id.to_string(),
        slave,
    }
}

impl HolderSource for PairingCoordinator {
    fn name(&self) -> &str {
        "pending pairs"
    }

    fn holders(&self) -> Vec<(String, Arc<TransportHolder>)> {
        self.pending
            .lock()
            .iter()
            .map(|(token, pair)| (format!("pair:{token}:master"), Arc::clone(&pair.master)))
            .collect()
    }

    fn evict(&self, _key: &str, holder: &Arc<TransportHolder>) {
        self.pending
            .lock()
            .retain(|_, pair| !Arc::ptr_eq(&pair.master, holder));
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
