//! Domain layer for lxport-device: configuration with no I/O.

pub mod config;

pub use config::{DeviceConfig, InvalidConfig};
