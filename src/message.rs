//! The message value type carried by the wire protocol.

use bytes::Bytes;

/// A typed message: an ASCII kind tag plus an opaque payload.
///
/// The kind names what the message is (`"echo"`, `"status"`); the payload
/// is raw bytes the protocol never interprets. The codec rejects kinds
/// containing the separator byte or non-ASCII characters at encode time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    kind: String,
    payload: Bytes,
}

impl Message {
    /// Create a message from a kind and a byte payload.
    pub fn new(kind: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            kind: kind.into(),
            payload: payload.into(),
        }
    }

    /// Create a message whose payload is UTF-8 text.
    pub fn text(kind: impl Into<String>, payload: impl Into<String>) -> Self {
        Self::new(kind, payload.into())
    }

    /// The kind tag.
    #[must_use]
    pub fn kind(&self) -> &str { &self.kind }

    /// The payload as a byte slice.
    #[must_use]
    pub fn payload(&self) -> &[u8] { &self.payload }

    /// A cheap owned handle to the payload.
    #[must_use]
    pub fn payload_bytes(&self) -> Bytes { self.payload.clone() }

    /// Consume the message into its parts.
    #[must_use]
    pub fn into_parts(self) -> (String, Bytes) { (self.kind, self.payload) }
}
