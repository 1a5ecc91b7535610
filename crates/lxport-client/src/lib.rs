//! lxport-client library crate.
//!
//! The client agent runs next to the application that wants to reach a remote
//! service.  It listens on a loopback port and opens one broker leg per
//! accepted connection, either as a pairing request to a registered device or
//! as a direct tunnel the broker dials itself.
//!
//! ```text
//! [lxport-client]
//!   ├── domain/           ClientConfig, TunnelMode
//!   └── infrastructure/
//!         └── tcp_server  local accept loop and per-connection bridge
//! ```

/// Domain layer: configuration types.
pub mod domain;

/// Infrastructure layer: local listener.
pub mod infrastructure;
