//! # lxport-core
//!
//! Shared library for lxport containing the command-channel wire format, the
//! query-parameter protocol spoken on the broker's upgrade endpoints, the
//! keepalive payload, and the block-compression codec.
//!
//! This crate is used by the broker and by both agents.  It has no
//! dependencies on sockets or async runtimes.
//!
//! # Architecture overview (for beginners)
//!
//! lxport lets a TCP client on one private host reach a TCP service on another
//! private host by tunneling the byte stream through a public WebSocket relay:
//!
//! ```text
//! client app <--tcp--> lxport-client <--ws--> lxport-broker <--ws--> lxport-device <--tcp--> target port
//! ```
//!
//! This crate defines how the three processes talk to each other:
//!
//! - **`protocol::command`** – the op-coded binary frames sent on a device's
//!   long-lived command channel (e.g. "open a tunnel to port 3389 under token X").
//! - **`protocol::query`** – the `?pt=req&uuid=...&port=...` query strings that
//!   select what an upgraded WebSocket connection is for.
//! - **`protocol::keepalive`** – the timestamp carried in WebSocket pings and the
//!   missed-pong threshold.
//! - **`codec`** – the pluggable block codec used by the compressed tunnel variant.

pub mod codec;
pub mod protocol;

// Re-export the most-used types at the crate root.
pub use codec::{BlockCodec, CodecKind, DeflateCodec, SnappyCodec};
pub use protocol::command::{CommandFrame, ProtocolError};
pub use protocol::query::{PairQuery, TunnelQuery};
