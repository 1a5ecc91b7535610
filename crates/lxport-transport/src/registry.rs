//! Keyed collections of live holders.
//!
//! [`HolderMap`] is the plain "everything that is currently open" registry: the
//! broker keeps its direct tunnels and established pair legs in one, the device
//! agent keeps its response legs in one.  The keepalive watchdog walks every
//! [`HolderSource`] it is given.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::holder::TransportHolder;

/// Something the watchdog can probe and evict from.
pub trait HolderSource: Send + Sync {
    /// Name used in log lines.
    fn name(&self) -> &str;

    /// A snapshot of `(key, holder)` pairs to probe.
    fn holders(&self) -> Vec<(String, Arc<TransportHolder>)>;

    /// Forgets `holder` after it was declared dead.  Must not remove a
    /// different holder that has since taken the same key.
    fn evict(&self, key: &str, holder: &Arc<TransportHolder>);
}

/// Thread-safe map of key to holder.
#[derive(Debug)]
pub struct HolderMap {
    name: &'static str,
    holders: RwLock<HashMap<String, Arc<TransportHolder>>>,
    next_seq: AtomicU64,
}

impl HolderMap {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            holders: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(1),
        }
    }

    /// Returns a fresh key from this map's monotonic sequence.
    pub fn next_key(&self) -> String {
        self.next_seq.fetch_add(1, Ordering::Relaxed).to_string()
    }

    /// Inserts `holder` under `key`, returning any holder it replaced.
    pub fn insert(
        &self,
        key: impl Into<String>,
        holder: Arc<TransportHolder>,
    ) -> Option<Arc<TransportHolder>> {
        self.holders.write().insert(key.into(), holder)
    }

    /// Inserts `holder` and removes it again when the returned guard drops.
    pub fn track(
        self: &Arc<Self>,
        key: impl Into<String>,
        holder: Arc<TransportHolder>,
    ) -> TrackedHolder {
        let key = key.into();
        if self.insert(key.clone(), Arc::clone(&holder)).is_some() {
            debug!("{}: {key} replaced an older holder", self.name);
        }
        TrackedHolder {
            map: Arc::clone(self),
            key,
            holder,
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<TransportHolder>> {
        self.holders.read().get(key).cloned()
    }

    pub fn remove(&self, key: &str) -> Option<Arc<TransportHolder>> {
        self.holders.write().remove(key)
    }

    /// Removes the entry under `key` only if it is this exact holder.
    pub fn remove_if_same(&self, key: &str, holder: &Arc<TransportHolder>) -> bool {
        let mut holders = self.holders.write();
        match holders.get(key) {
            Some(current) if Arc::ptr_eq(current, holder) => {
                holders.remove(key);
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.holders.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.holders.read().is_empty()
    }
}

impl HolderSource for HolderMap {
    fn name(&self) -> &str {
        self.name
    }

    fn holders(&self) -> Vec<(String, Arc<TransportHolder>)> {
        self.holders
            .read()
            .iter()
            .map(|(key, holder)| (key.clone(), Arc::clone(holder)))
            .collect()
    }

    fn evict(&self, key: &str, holder: &Arc<TransportHolder>) {
        if self.remove_if_same(key, holder) {
            debug!("{}: evicted {key}", self.name);
        }
    }
}

/// Keeps a holder in a [`HolderMap`] for as long as the guard lives.
#[derive(Debug)]
pub struct TrackedHolder {
    map: Arc<HolderMap>,
    key: String,
    holder: Arc<TransportHolder>,
}

impl TrackedHolder {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn holder(&self) -> &Arc<TransportHolder> {
        &self.holder
    }
}

impl Drop for TrackedHolder {
    fn drop(&mut self) {
        self.map.remove_if_same(&self.key, &self.holder);
    }
}
