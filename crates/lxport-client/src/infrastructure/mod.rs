//! Infrastructure layer: the local TCP listener.

pub mod tcp_server;

pub use tcp_server::{run_client, serve};
