//! Canonical error taxonomy for the crate.
//!
//! Every fallible operation surfaces a [`WireError`]. The variants form a
//! closed set: framing violations that kill a connection, transport
//! failures, and peer closure. Address-in-use during server bind is
//! recovered internally by the dispatcher and never reaches callers as an
//! error value.

use std::io;

use thiserror::Error;

/// Errors produced by the codec, connections, the pool, and the server.
#[derive(Debug, Error)]
pub enum WireError {
    /// A frame declared a payload longer than the configured maximum.
    ///
    /// Framing state is unrecoverable past this point: the remainder of the
    /// stream cannot be re-synchronised, so the owning connection destroys
    /// its transport.
    #[error("declared payload length {declared} exceeds maximum {limit}")]
    PayloadOverflow {
        /// Length taken from the frame's length field.
        declared: u64,
        /// Configured `max_payload` bound.
        limit: u64,
    },

    /// A message kind containing the separator byte or non-ASCII bytes.
    #[error("invalid message kind {kind:?}")]
    InvalidKind {
        /// The offending kind (possibly a partial prefix when detected
        /// mid-decode).
        kind: String,
    },

    /// Transport-level failure: connect, read, or write.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// The peer closed the connection while a reply was outstanding, or the
    /// pool was torn down under a queued waiter.
    #[error("connection closed")]
    Closed,
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, WireError>;
