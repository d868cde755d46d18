//! Length-prefixed, typed message framing over TCP and Unix-domain
//! sockets, with a pooled request client and a server dispatcher.
//!
//! A wire message is an ASCII kind tag and an opaque byte payload, framed
//! as `kind ++ 0x1E ++ big-endian u32 length ++ payload`. The building
//! blocks, leaf first:
//!
//! - [`codec::MessageCodec`]: the incremental streaming parser/encoder,
//!   tolerant of frames split or merged across reads.
//! - [`connection::Connection`]: one transport socket plus one codec
//!   instance, with positional request/reply (`send_wait`).
//! - [`pool::Pool`]: a bounded set of client connections with FIFO
//!   fairness and idle eviction.
//! - [`client::Client`]: one logical request per call, always releasing
//!   its connection.
//! - [`server::Server`]: accepts connections and routes decoded messages
//!   to an application handler.

pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod message;
pub mod pool;
pub mod server;

pub use client::Client;
pub use codec::{MessageCodec, SEP};
pub use config::{Config, Endpoint};
pub use connection::{Connection, ConnectionId, Transport};
pub use error::WireError;
pub use message::Message;
pub use pool::{Pool, PooledConn};
pub use server::{BoundServer, Handler, Server};
