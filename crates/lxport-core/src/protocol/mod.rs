//! Protocol module containing the command frames, query strings and keepalive payload.

pub mod command;
pub mod keepalive;
pub mod query;

pub use command::{CommandFrame, ProtocolError, OP_PAIR_ACCEPTED, OP_PAIR_CREATE};
pub use keepalive::{MAX_MISSED_PONGS, KEEPALIVE_INTERVAL};
pub use query::{endpoint_url, PairQuery, TunnelQuery, DEFAULT_TUNNEL_TARGET};
