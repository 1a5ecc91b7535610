//! The device agent: a command channel to the broker and one tunnel per
//! pair-create command.
//!
//! ```text
//! broker ──[0][port][token]──▶ command channel
//!                              │ dial 127.0.0.1:port
//!                              │ connect pt=resp&uuid=token
//!                              │ send [1][token] on the command channel
//!                              ▼
//! broker ◀══ response leg ══ bridge ══ tcp ══▶ local service
//! ```
//!
//! The command channel is reconnected forever.  It and every open response
//! leg live in one local [`HolderMap`] that the agent's own watchdog probes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, info, warn};

use lxport_core::{CommandFrame, ProtocolError};
use lxport_transport::{
    bridge, connect_holder, dial_tcp, BridgeOptions, FrameKind, HolderMap, HolderReader, Leg,
    TransportHolder, Watchdog,
};

use crate::domain::config::LOCAL_HOST;
use crate::domain::DeviceConfig;

/// How often blocking waits re-check the shutdown flag.
const STOP_POLL: Duration = Duration::from_millis(200);

/// Runs the agent until `running` is cleared.
///
/// # Errors
///
/// Only an invalid configuration is an error; connection failures are
/// logged and retried.
pub async fn run_device(config: DeviceConfig, running: Arc<AtomicBool>) -> anyhow::Result<()> {
    config.validate()?;
    let agent = Arc::new(DeviceAgent::new(config));
    agent.run(&running).await;
    Ok(())
}

/// Shared state of one device agent.
pub struct DeviceAgent {
    config: DeviceConfig,
    holders: Arc<HolderMap>,
}

impl DeviceAgent {
    pub fn new(config: DeviceConfig) -> Self {
        Self {
            config,
            holders: Arc::new(HolderMap::new("device holders")),
        }
    }

    /// The command channel (keyed by device id) and open response legs
    /// (keyed by token).
    pub fn holders(&self) -> &Arc<HolderMap> {
        &self.holders
    }

    /// Keeps the command channel up until `running` is cleared.
    ///
    /// Only a failed connect waits out the reconnect interval; a session
    /// that ends after connecting is redialed at once.
    pub async fn run(self: &Arc<Self>, running: &AtomicBool) {
        let watchdog = Watchdog::new(self.config.keepalive_interval)
            .watch(self.holders.clone())
            .spawn();
        let id = &self.config.device_id;

        while running.load(Ordering::Relaxed) {
            let (holder, reader) = match self.open_command_channel().await {
                Ok(channel) => channel,
                Err(e) => {
                    warn!("device {id}: {e:#}");
                    debug!(
                        "device {id}: reconnecting in {:?}",
                        self.config.reconnect_interval
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.reconnect_interval) => {}
                        _ = stopped(running) => {}
                    }
                    continue;
                }
            };

            match self.serve_commands(holder, reader, running).await {
                Ok(()) => info!("device {id}: command channel closed"),
                Err(e) => warn!("device {id}: {e:#}"),
            }
        }

        watchdog.abort();
        info!("device {id}: stopped");
    }

    async fn open_command_channel(&self) -> anyhow::Result<(Arc<TransportHolder>, HolderReader)> {
        let url = self.config.command_url()?;
        let channel = connect_holder(&url, self.config.device_id.clone())
            .await
            .context("command channel not opened")?;
        info!(
            "device {}: connected to {}",
            self.config.device_id, self.config.broker_url
        );
        Ok(channel)
    }

    /// Reads commands until the channel closes or `running` is cleared.
    async fn serve_commands(
        self: &Arc<Self>,
        holder: Arc<TransportHolder>,
        mut reader: HolderReader,
        running: &AtomicBool,
    ) -> anyhow::Result<()> {
        let _entry = self
            .holders
            .track(self.config.device_id.clone(), Arc::clone(&holder));

        let result = loop {
            let frame = tokio::select! {
                frame = reader.next_frame() => frame,
                _ = stopped(running) => break Ok(()),
            };
            match frame {
                Ok(Some(bytes)) => self.on_command(&holder, &bytes),
                Ok(None) => break Ok(()),
                Err(e) => break Err(e).context("command channel failed"),
            }
        };

        holder.shutdown().await;
        result
    }

    fn on_command(self: &Arc<Self>, command_holder: &Arc<TransportHolder>, frame: &[u8]) {
        let id = &self.config.device_id;
        match CommandFrame::decode(frame) {
            Ok(CommandFrame::PairCreate { port, token }) => {
                debug!("device {id}: pair {token} requests port {port}");
                let agent = Arc::clone(self);
                let command_holder = Arc::clone(command_holder);
                tokio::spawn(async move {
                    if let Err(e) = agent.pair_tunnel(&command_holder, port, &token).await {
                        warn!("pair {token}: {e:#}");
                    }
                });
            }
            Ok(other) => warn!("device {id}: ignoring unexpected command {other:?}"),
            Err(ProtocolError::EmptyFrame) => {}
            Err(e) => warn!("device {id}: ignoring frame: {e}"),
        }
    }

    /// Serves one pair-create command.
    ///
    /// The local service is dialed before the response leg is opened; if it
    /// is down, no leg is opened and the broker's pending pair times out.
    async fn pair_tunnel(
        &self,
        command_holder: &TransportHolder,
        port: u16,
        token: &str,
    ) -> anyhow::Result<()> {
        let local = dial_tcp(&format!("{LOCAL_HOST}:{port}"))
            .await
            .context("local service unreachable")?;

        let url = self.config.response_url(token)?;
        let (holder, reader) = connect_holder(&url, token)
            .await
            .context("response leg not opened")?;
        let _entry = self.holders.track(token, Arc::clone(&holder));

        let ack = CommandFrame::PairAccepted {
            token: token.to_string(),
        };
        if let Err(e) = command_holder.send(FrameKind::Binary, ack.encode()).await {
            debug!("pair {token}: acknowledgement not sent: {e}");
        }

        let mut options = BridgeOptions::default();
        if self.config.compress {
            options = options.encode_outbound(self.config.codec.build());
        }
        bridge(&format!("pair {token}"), Leg::Ws(reader), Leg::Tcp(local), options).await;
        Ok(())
    }
}

/// Resolves once `running` is cleared.
async fn stopped(running: &AtomicBool) {
    while running.load(Ordering::Relaxed) {
        tokio::time::sleep(STOP_POLL).await;
    }
}
