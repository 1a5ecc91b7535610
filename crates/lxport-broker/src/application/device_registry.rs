//! Device registry: device id → the device's live command-channel holder.
//!
//! At most one connection is registered per id.  A device that reconnects
//! under an id that is still registered (typically after a network change the
//! old connection has not noticed yet) retires the old connection first:
//!
//! 1. the old holder is closed, which wakes its read loop;
//! 2. `register` waits until that read loop has fully exited, observed through
//!    the loop's [`DeviceLease`] being dropped;
//! 3. only then is the new holder installed.
//!
//! If a third connection slipped in while step 2 was waiting, the late
//! registration fails with [`RegistryError::RegistrationConflict`] and its
//! caller closes its connection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info};

use lxport_transport::{HolderSource, TransportHolder};

/// Errors raised by [`DeviceRegistry`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Another connection registered the same id while the previous one was
    /// being retired.
    #[error("device {id} was registered by another connection in the meantime")]
    RegistrationConflict { id: String },
}

struct DeviceEntry {
    holder: Arc<TransportHolder>,
    generation: u64,
    /// Closed (sender dropped) once the owning read loop has exited.
    exited: watch::Receiver<()>,
}

/// Process-wide map of registered devices.
#[derive(Default)]
pub struct DeviceRegistry {
    devices: Mutex<HashMap<String, DeviceEntry>>,
    next_generation: AtomicU64,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `holder` as the live connection of device `id`.
    ///
    /// The returned lease must be held by the connection's read loop for as
    /// long as it runs; dropping it unregisters the device and tells any
    /// waiting re-registration that the loop is gone.
    pub async fn register(
        self: &Arc<Self>,
        id: &str,
        holder: Arc<TransportHolder>,
    ) -> Result<DeviceLease, RegistryError> {
        let previous = self
            .devices
            .lock()
            .get(id)
            .map(|entry| (Arc::clone(&entry.holder), entry.exited.clone()));

        if let Some((old, mut exited)) = previous {
            info!("device {id}: retiring previous connection");
            old.close();
            // `changed` only ever fails here, once the old lease is dropped.
            while exited.changed().await.is_ok() {}
            debug!("device {id}: previous read loop exited");
        }

        let mut devices = self.devices.lock();
        if devices.contains_key(id) {
            return Err(RegistryError::RegistrationConflict { id: id.to_string() });
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (exited_tx, exited_rx) = watch::channel(());
        devices.insert(
            id.to_string(),
            DeviceEntry {
                holder,
                generation,
                exited: exited_rx,
            },
        );

        Ok(DeviceLease {
            registry: Arc::clone(self),
            id: id.to_string(),
            generation,
            _exited: exited_tx,
        })
    }

    /// The live holder of device `id`, if any.
    pub fn lookup(&self, id: &str) -> Option<Arc<TransportHolder>> {
        self.devices
            .lock()
            .get(id)
            .map(|entry| Arc::clone(&entry.holder))
    }

    /// Removes device `id` only if it is still registered with `holder`.
    pub fn unregister(&self, id: &str, holder: &Arc<TransportHolder>) -> bool {
        let mut devices = self.devices.lock();
        match devices.get(id) {
            Some(entry) if Arc::ptr_eq(&entry.holder, holder) => {
                devices.remove(id);
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.devices.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.lock().is_empty()
    }

    fn release(&self, id: &str, generation: u64) {
        let mut devices = self.devices.lock();
        if devices.get(id).is_some_and(|entry| entry.generation == generation) {
            devices.remove(id);
            debug!("device {id}: unregistered");
        }
    }
}

impl HolderSource for DeviceRegistry {
    fn name(&self) -> &str {
        "devices"
    }

    fn holders(&self) -> Vec<(String, Arc<TransportHolder>)> {
        self.devices
            .lock()
            .iter()
            .map(|(id, entry)| (id.clone(), Arc::clone(&entry.holder)))
            .collect()
    }

    fn evict(&self, key: &str, holder: &Arc<TransportHolder>) {
        self.unregister(key, holder);
    }
}

/// Proof that a read loop owns a device registration.
///
/// Dropping the lease removes the registration (if it is still this one) and
/// then signals that the read loop has exited.
pub struct DeviceLease {
    registry: Arc<DeviceRegistry>,
    id: String,
    generation: u64,
    // Dropped after `Drop::drop` runs, i.e. after the entry is gone.
    _exited: watch::Sender<()>,
}

impl DeviceLease {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        self.registry.release(&self.id, self.generation);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use lxport_transport::testing::holder_pair;
    use lxport_transport::HolderReader;
    use tokio::task::JoinHandle;

    use super::*;

    /// Stand-in for the broker's device read loop.
    fn spawn_read_loop(lease: DeviceLease, mut reader: HolderReader) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Ok(Some(_)) = reader.next_frame().await {}
            drop(lease);
        })
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        // Arrange
        let registry = Arc::new(DeviceRegistry::new());
        let (holder, _reader, _peer) = holder_pair("dev-1").await;

        // Act
        let lease = registry.register("dev-1", Arc::clone(&holder)).await.unwrap();

        // Assert
        assert_eq!(lease.id(), "dev-1");
        assert!(Arc::ptr_eq(&registry.lookup("dev-1").unwrap(), &holder));
        assert!(registry.lookup("dev-2").is_none());
    }

    #[tokio::test]
    async fn test_dropping_lease_unregisters() {
        let registry = Arc::new(DeviceRegistry::new());
        let (holder, _reader, _peer) = holder_pair("dev-1").await;
        let lease = registry.register("dev-1", holder).await.unwrap();

        drop(lease);

        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_second_registration_retires_first() {
        // Arrange: a registered device with a running read loop
        let registry = Arc::new(DeviceRegistry::new());
        let (first, first_reader, _p1) = holder_pair("dev-1").await;
        let lease = registry.register("dev-1", Arc::clone(&first)).await.unwrap();
        let first_loop = spawn_read_loop(lease, first_reader);

        // Act: the same device connects again
        let (second, _r2, _p2) = holder_pair("dev-1").await;
        let _lease2 = tokio::time::timeout(
            Duration::from_secs(2),
            registry.register("dev-1", Arc::clone(&second)),
        )
        .await
        .expect("registration must not hang")
        .unwrap();

        // Assert: exactly one live device, the old one fully retired
        assert!(first.is_closed());
        assert!(first_loop.is_finished());
        assert_eq!(registry.len(), 1);
        assert!(Arc::ptr_eq(&registry.lookup("dev-1").unwrap(), &second));
    }

    #[tokio::test]
    async fn test_racing_registrations_yield_one_conflict() {
        // Arrange
        let registry = Arc::new(DeviceRegistry::new());
        let (first, first_reader, _p1) = holder_pair("dev-1").await;
        let lease = registry.register("dev-1", first).await.unwrap();
        spawn_read_loop(lease, first_reader);
        let (b, _rb, _pb) = holder_pair("dev-1").await;
        let (c, _rc, _pc) = holder_pair("dev-1").await;

        // Act: both wait for the same retirement
        let (rb, rc) = tokio::join!(
            registry.register("dev-1", Arc::clone(&b)),
            registry.register("dev-1", Arc::clone(&c)),
        );

        // Assert: whichever woke first won, the other was refused
        let (winner, loser) = match (rb, rc) {
            (Ok(lease), Err(e)) => ((lease, b), e),
            (Err(e), Ok(lease)) => ((lease, c), e),
            (rb, rc) => panic!("expected one winner, got {:?} / {:?}", rb.is_ok(), rc.is_ok()),
        };
        assert_eq!(
            loser,
            RegistryError::RegistrationConflict {
                id: "dev-1".to_string()
            }
        );
        assert!(Arc::ptr_eq(&registry.lookup("dev-1").unwrap(), &winner.1));
    }

    #[tokio::test]
    async fn test_unregister_only_removes_own_holder() {
        let registry = Arc::new(DeviceRegistry::new());
        let (holder, _r1, _p1) = holder_pair("dev-1").await;
        let (stranger, _r2, _p2) = holder_pair("dev-1").await;
        let _lease = registry.register("dev-1", Arc::clone(&holder)).await.unwrap();

        assert!(!registry.unregister("dev-1", &stranger));
        assert_eq!(registry.len(), 1);

        assert!(registry.unregister("dev-1", &holder));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_stale_lease_does_not_remove_newer_registration() {
        // Arrange: the watchdog evicted the first holder, a new one registered
        let registry = Arc::new(DeviceRegistry::new());
        let (first, _r1, _p1) = holder_pair("dev-1").await;
        let stale = registry.register("dev-1", Arc::clone(&first)).await.unwrap();
        registry.evict("dev-1", &first);
        let (second, _r2, _p2) = holder_pair("dev-1").await;
        let _fresh = registry.register("dev-1", Arc::clone(&second)).await.unwrap();

        // Act
        drop(stale);

        // Assert
        assert!(Arc::ptr_eq(&registry.lookup("dev-1").unwrap(), &second));
    }

    #[tokio::test]
    async fn test_holder_source_snapshot_lists_devices() {
        let registry = Arc::new(DeviceRegistry::new());
        let (h1, _r1, _p1) = holder_pair("a").await;
        let (h2, _r2, _p2) = holder_pair("b").await;
        let _l1 = registry.register("a", h1).await.unwrap();
        let _l2 = registry.register("b", h2).await.unwrap();

        let mut keys: Vec<String> = registry.holders().into_iter().map(|(k, _)| k).collect();
        keys.sort();

        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
    }
}
