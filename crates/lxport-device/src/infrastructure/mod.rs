//! Infrastructure layer: the command channel and the tunnels it opens.

pub mod agent;

pub use agent::{run_device, DeviceAgent};
