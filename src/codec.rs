//! Wire format constants and the streaming message codec.
//!
//! One frame on the wire is `kind ++ SEP ++ length ++ payload`: the ASCII
//! kind tag, the 0x1E separator byte, a big-endian `u32` payload length,
//! then exactly that many payload bytes. There is no terminator; the
//! length field alone bounds the frame.
//!
//! [`MessageCodec`] implements [`Encoder`] and a stateful [`Decoder`].
//! The decoder is a three-phase state machine (kind, length, payload)
//! that persists partial state across calls, so frames may arrive a byte
//! at a time or many to a single read without dropping or duplicating a
//! byte. [`Framed`](tokio_util::codec::Framed) re-invokes `decode` in a
//! loop until it returns `None`, which keeps leftover-byte handling
//! iterative rather than recursive.

use std::io;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{error::WireError, message::Message};

/// Separator byte between the kind field and the length field (ASCII
/// record separator).
pub const SEP: u8 = 0x1E;

/// Size of the payload length field in bytes.
pub const LENGTH_SIZE: usize = 4;

/// Hard ceiling on payload length imposed by the 4-byte length field.
pub const MAX_PAYLOAD_CEILING: u32 = u32::MAX;

/// Streaming codec for wire messages.
///
/// Each codec instance belongs to exactly one connection; its decode state
/// is the parser state for that connection's inbound stream.
#[derive(Debug)]
pub struct MessageCodec {
    max_payload: u32,
    state: DecodeState,
}

#[derive(Debug)]
enum DecodeState {
    /// Accumulating kind bytes until the separator.
    Kind { kind: String },
    /// Accumulating the four big-endian length bytes.
    Length {
        kind: String,
        buf: [u8; LENGTH_SIZE],
        filled: usize,
    },
    /// Accumulating payload bytes until `remaining` reaches zero.
    Payload {
        kind: String,
        remaining: usize,
        payload: BytesMut,
    },
}

impl DecodeState {
    fn start() -> Self {
        DecodeState::Kind {
            kind: String::new(),
        }
    }

    /// True only between frames, with no partial kind accumulated.
    fn at_boundary(&self) -> bool {
        matches!(self, DecodeState::Kind { kind } if kind.is_empty())
    }
}

impl MessageCodec {
    /// Create a codec accepting payloads up to `max_payload` bytes.
    #[must_use]
    pub fn new(max_payload: u32) -> Self {
        Self {
            max_payload,
            state: DecodeState::start(),
        }
    }

    /// The configured payload bound.
    #[must_use]
    pub fn max_payload(&self) -> u32 { self.max_payload }
}

impl Default for MessageCodec {
    fn default() -> Self { Self::new(MAX_PAYLOAD_CEILING) }
}

/// Append raw bytes to the kind accumulator, rejecting non-ASCII input.
fn push_kind_bytes(kind: &mut String, bytes: &[u8]) -> Result<(), WireError> {
    match std::str::from_utf8(bytes) {
        Ok(s) if s.is_ascii() => {
            kind.push_str(s);
            Ok(())
        }
        _ => Err(WireError::InvalidKind { kind: kind.clone() }),
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, WireError> {
        loop {
            match &mut self.state {
                DecodeState::Kind { kind } => {
                    let Some(pos) = src.iter().position(|b| *b == SEP) else {
                        // No separator yet: the whole buffer is kind bytes.
                        let head = src.split();
                        push_kind_bytes(kind, &head)?;
                        return Ok(None);
                    };
                    let head = src.split_to(pos);
                    push_kind_bytes(kind, &head)?;
                    src.advance(1); // the separator itself
                    let kind = std::mem::take(kind);
                    self.state = DecodeState::Length {
                        kind,
                        buf: [0; LENGTH_SIZE],
                        filled: 0,
                    };
                }
                DecodeState::Length { kind, buf, filled } => {
                    let take = (LENGTH_SIZE - *filled).min(src.len());
                    buf[*filled..*filled + take].copy_from_slice(&src[..take]);
                    src.advance(take);
                    *filled += take;
                    if *filled < LENGTH_SIZE {
                        return Ok(None);
                    }
                    let declared = u32::from_be_bytes(*buf);
                    if declared > self.max_payload {
                        return Err(WireError::PayloadOverflow {
                            declared: declared.into(),
                            limit: self.max_payload.into(),
                        });
                    }
                    let kind = std::mem::take(kind);
                    let remaining = declared as usize;
                    self.state = DecodeState::Payload {
                        kind,
                        remaining,
                        payload: BytesMut::with_capacity(remaining),
                    };
                }
                DecodeState::Payload {
                    kind,
                    remaining,
                    payload,
                } => {
                    let take = (*remaining).min(src.len());
                    payload.extend_from_slice(&src[..take]);
                    src.advance(take);
                    *remaining -= take;
                    if *remaining > 0 {
                        return Ok(None);
                    }
                    let message = Message::new(std::mem::take(kind), payload.split().freeze());
                    self.state = DecodeState::start();
                    return Ok(Some(message));
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Message>, WireError> {
        if let Some(message) = self.decode(src)? {
            return Ok(Some(message));
        }
        if self.state.at_boundary() && src.is_empty() {
            // Clean close at a frame boundary.
            Ok(None)
        } else {
            Err(WireError::Transport(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed mid-frame",
            )))
        }
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = WireError;

    fn encode(&mut self, message: Message, dst: &mut BytesMut) -> Result<(), WireError> {
        let kind = message.kind();
        if !kind.is_ascii() || kind.bytes().any(|b| b == SEP) {
            return Err(WireError::InvalidKind {
                kind: kind.to_owned(),
            });
        }
        let len = message.payload().len();
        if len as u64 > u64::from(self.max_payload) {
            return Err(WireError::PayloadOverflow {
                declared: len as u64,
                limit: self.max_payload.into(),
            });
        }
        dst.reserve(kind.len() + 1 + LENGTH_SIZE + len);
        dst.put_slice(kind.as_bytes());
        dst.put_u8(SEP);
        dst.put_u32(len as u32);
        dst.put_slice(message.payload());
        Ok(())
    }
}
