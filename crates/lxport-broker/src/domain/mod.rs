//! Domain layer for lxport-broker: plain configuration types with no I/O.

pub mod config;

pub use config::{BrokerConfig, InvalidConfig};
