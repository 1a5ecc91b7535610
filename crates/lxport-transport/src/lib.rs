//! # lxport-transport
//!
//! Connection plumbing shared by the lxport broker and agents.
//!
//! - **`holder`** – [`TransportHolder`]: one WebSocket connection with
//!   serialized writes, ping/pong bookkeeping and an idempotent close.
//! - **`bridge`** – [`bridge`](bridge::bridge): full-duplex forwarding between
//!   two legs (TCP or WebSocket), with optional block codecs at the
//!   WebSocket edge.
//! - **`registry`** – [`HolderMap`]: keyed live holders, and the
//!   [`HolderSource`] seam the watchdog probes through.
//! - **`watchdog`** – [`Watchdog`]: periodic pings, eviction of silent peers.
//! - **`dial`** – outbound TCP and WebSocket connections.

pub mod bridge;
pub mod dial;
pub mod error;
pub mod holder;
pub mod registry;
pub mod watchdog;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use bridge::{bridge, BridgeOptions, BridgeStats, Leg, TUNNEL_BUFFER_SIZE};
pub use dial::{connect_holder, dial_tcp};
pub use error::TransportError;
pub use holder::{FrameKind, HolderReader, TransportHolder};
pub use registry::{HolderMap, HolderSource, TrackedHolder};
pub use watchdog::{SweepReport, Watchdog};
