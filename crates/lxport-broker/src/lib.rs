//! lxport-broker library crate.
//!
//! The broker is the publicly reachable middle of every lxport tunnel.  It
//! serves one WebSocket listener with two endpoints:
//!
//! ```text
//! client agent ──ws──▶ /xport?port=P[&target=H] ──tcp──▶ H:P
//!
//! device agent ──ws──▶ /pair?pt=dev&uuid=D          (command channel)
//! client agent ──ws──▶ /pair?pt=req&uuid=D&port=P   (master leg)
//! device agent ──ws──▶ /pair?pt=resp&uuid=T         (slave leg)
//! ```
//!
//! # Architecture
//!
//! ```text
//! [lxport-broker]
//!   ├── domain/           BrokerConfig and its validation
//!   ├── application/      DeviceRegistry, PairingCoordinator
//!   └── infrastructure/
//!         ├── config_file  TOML config file
//!         ├── ws_server    accept loop, upgrade routing, keepalive watchdog
//!         └── sessions     one handler per route
//! ```
//!
//! `domain` does no I/O.  `application` depends on holders from
//! `lxport-transport` but never on sockets.  `infrastructure` owns the
//! listener and every spawned task.

/// Domain layer: configuration types.
pub mod domain;

/// Application layer: device registry and pairing handshake.
pub mod application;

/// Infrastructure layer: config file, front door and session handlers.
pub mod infrastructure;
