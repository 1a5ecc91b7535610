//! Infrastructure layer: config file, WebSocket front door, session handlers.

pub mod config_file;
pub mod sessions;
pub mod ws_server;

pub use ws_server::{route, run_server, serve, BrokerState, Rejection, Route};
