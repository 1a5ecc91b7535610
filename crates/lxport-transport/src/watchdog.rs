//! Keepalive watchdog.
//!
//! Every interval the watchdog pings each holder of each registered
//! [`HolderSource`].  A holder that has gone too long without a pong (see
//! [`TransportHolder::probe_within`]) or whose ping fails is closed and
//! evicted from its source.  Closing the holder also ends any bridge it is
//! part of.
//!
//! A ping write is bounded by a quarter of the interval (at most
//! [`PING_WRITE_TIMEOUT`]), so a peer that stopped reading cannot hold up a
//! sweep; its ping just counts as unanswered.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use lxport_core::protocol::keepalive::{KEEPALIVE_INTERVAL, PING_WRITE_TIMEOUT};

use crate::holder::TransportHolder;
use crate::registry::HolderSource;

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub probed: usize,
    pub evicted: usize,
}

pub struct Watchdog {
    interval: Duration,
    ping_timeout: Duration,
    sources: Vec<Arc<dyn HolderSource>>,
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new(KEEPALIVE_INTERVAL)
    }
}

impl Watchdog {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            ping_timeout: (interval / 4).min(PING_WRITE_TIMEOUT),
            sources: Vec::new(),
        }
    }

    /// Adds a source to probe on every sweep.
    pub fn watch(mut self, source: Arc<dyn HolderSource>) -> Self {
        self.sources.push(source);
        self
    }

    /// Probes every holder once.
    ///
    /// Probes run concurrently so a peer with a full send buffer does not
    /// delay the rest of the sweep.
    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();

        for source in &self.sources {
            let holders = source.holders();
            report.probed += holders.len();

            let ping_timeout = self.ping_timeout;
            let outcomes = join_all(holders.into_iter().map(|(key, holder)| async move {
                let result = holder.probe_within(ping_timeout).await;
                (key, holder, result)
            }))
            .await;

            for (key, holder, result) in outcomes {
                if let Err(e) = result {
                    info!("{}: dropping {key}: {e}", source.name());
                    evict(source.as_ref(), &key, &holder);
                    report.evicted += 1;
                }
            }
        }

        if report.evicted > 0 {
            debug!(
                "keepalive sweep: {} probed, {} evicted",
                report.probed, report.evicted
            );
        }
        report
    }

    /// Sweeps forever, sleeping one interval before each sweep.
    pub async fn run(self) {
        loop {
            tokio::time::sleep(self.interval).await;
            self.sweep().await;
        }
    }

    /// Runs the watchdog on its own task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

fn evict(source: &dyn HolderSource, key: &str, holder: &Arc<TransportHolder>) {
    holder.close();
    source.evict(key, holder);
}
