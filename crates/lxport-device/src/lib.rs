//! lxport-device library crate.
//!
//! The device agent runs on the host that owns the target service.  It keeps
//! a command channel open to the broker's pairing endpoint under its device
//! id, and for every pair-create command it dials the requested local port
//! and opens a response leg back to the broker.
//!
//! ```text
//! [lxport-device]
//!   ├── domain/           DeviceConfig
//!   └── infrastructure/
//!         └── agent       reconnect loop, command handling, pair tunnels
//! ```

/// Domain layer: configuration types.
pub mod domain;

/// Infrastructure layer: broker connections and local tunnels.
pub mod infrastructure;
