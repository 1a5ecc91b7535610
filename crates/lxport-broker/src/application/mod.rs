//! Application layer for lxport-broker.
//!
//! The application layer owns the broker's shared state and the rules that
//! govern it: which connection is a device's live command channel, and how a
//! pairing request is matched with the device's response leg.  It does not
//! accept sockets or parse URLs; the infrastructure layer hands it holders.

pub mod device_registry;
pub mod pairing;

pub use device_registry::{DeviceLease, DeviceRegistry, RegistryError};
pub use pairing::{EstablishedPair, PairingCoordinator, PairingError};
