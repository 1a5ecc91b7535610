//! Domain layer for lxport-client: configuration with no I/O.

pub mod config;

pub use config::{ClientConfig, InvalidConfig, TunnelMode};
