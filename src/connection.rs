//! A transport socket paired with one streaming codec instance.
//!
//! [`Connection`] wraps a TCP or Unix stream in a
//! [`Framed`](tokio_util::codec::Framed) running [`MessageCodec`], and
//! exposes the protocol's request/reply semantics. Correlation is
//! positional: the next inbound message after a write is taken to be the
//! reply to that write. Every receiver is `&mut self`, so a second
//! outstanding [`send_wait`](Connection::send_wait) on the same connection
//! is unrepresentable; the pool's busy discipline extends that guarantee
//! across tasks.

use std::{
    fmt, io,
    pin::Pin,
    sync::atomic::{AtomicU64, Ordering},
    task::{Context, Poll},
};

use futures::{SinkExt, StreamExt};
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    net::{TcpSocket, TcpStream},
};
#[cfg(unix)]
use tokio::net::UnixStream;
use tokio_util::codec::Framed;

use crate::{
    codec::MessageCodec,
    config::{Config, Endpoint},
    error::WireError,
    message::Message,
};

/// Process-unique connection identifier for logging and pool bookkeeping.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "#{}", self.0) }
}

/// Byte-stream transport underneath a connection.
#[derive(Debug)]
pub enum Transport {
    /// TCP stream.
    Tcp(TcpStream),
    /// Unix-domain stream.
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Transport {
    async fn connect(endpoint: &Endpoint, keep_alive: bool) -> io::Result<Self> {
        match endpoint {
            Endpoint::Tcp(addr) => {
                let socket = if addr.is_ipv4() {
                    TcpSocket::new_v4()?
                } else {
                    TcpSocket::new_v6()?
                };
                if keep_alive {
                    socket.set_keepalive(true)?;
                }
                Ok(Self::Tcp(socket.connect(*addr).await?))
            }
            #[cfg(unix)]
            Endpoint::Unix(path) => Ok(Self::Unix(UnixStream::connect(path).await?)),
        }
    }

    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.try_read(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.try_read(buf),
        }
    }
}

impl AsyncRead for Transport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            #[cfg(unix)]
            Self::Unix(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            #[cfg(unix)]
            Self::Unix(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            #[cfg(unix)]
            Self::Unix(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            #[cfg(unix)]
            Self::Unix(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// A transport socket with message framing and request/reply semantics.
pub struct Connection {
    id: ConnectionId,
    framed: Framed<Transport, MessageCodec>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Establish a new transport connection to the configured endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Transport`] if the connection cannot be
    /// established.
    pub async fn connect(config: &Config) -> Result<Self, WireError> {
        let transport = Transport::connect(&config.endpoint, config.keep_alive).await?;
        let conn = Self::from_transport(transport, config.max_payload);
        tracing::debug!(conn = %conn.id, endpoint = %config.endpoint, "connection established");
        Ok(conn)
    }

    /// Wrap an already-accepted transport (server side).
    #[must_use]
    pub fn from_transport(transport: Transport, max_payload: u32) -> Self {
        Self {
            id: ConnectionId::next(),
            framed: Framed::new(transport, MessageCodec::new(max_payload)),
        }
    }

    /// This connection's identifier.
    #[must_use]
    pub fn id(&self) -> ConnectionId { self.id }

    /// Cheap liveness probe for a connection that should be quiescent.
    ///
    /// An idle connection has no outstanding request, so the peer has no
    /// business sending bytes: end-of-file, unsolicited data, and read
    /// errors all mean the connection can no longer carry a request.
    #[must_use]
    pub fn is_live(&self) -> bool {
        let mut probe = [0u8; 8];
        match self.framed.get_ref().try_read(&mut probe) {
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => true,
            Ok(_) | Err(_) => false,
        }
    }

    /// Encode and write one message, resolving once it is flushed to the
    /// transport.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Transport`] if the write fails, or an encode
    /// error for an invalid kind or oversized payload.
    pub async fn send(&mut self, message: Message) -> Result<(), WireError> {
        self.framed.send(message).await
    }

    /// Send one message, then suspend until the next inbound message and
    /// return it as the reply.
    ///
    /// There is no request identifier on the wire; the reply is whatever
    /// the peer sends next. The caller must therefore be the connection's
    /// only user until this resolves, which `&mut self` guarantees.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Closed`] if the peer closes before replying,
    /// [`WireError::PayloadOverflow`] if the reply declares an oversized
    /// payload, or [`WireError::Transport`] for I/O failures. All of these
    /// leave the connection unusable.
    pub async fn send_wait(&mut self, message: Message) -> Result<Message, WireError> {
        self.framed.send(message).await?;
        match self.framed.next().await {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(e)) => {
                tracing::debug!(conn = %self.id, error = %e, "receive failed");
                Err(e)
            }
            None => Err(WireError::Closed),
        }
    }

    /// The next decoded message, or `None` once the peer closes cleanly at
    /// a frame boundary.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::PayloadOverflow`] for an oversized frame or
    /// [`WireError::Transport`] for I/O failures, either of which leaves
    /// the connection unusable.
    pub async fn next_message(&mut self) -> Result<Option<Message>, WireError> {
        match self.framed.next().await {
            Some(Ok(message)) => Ok(Some(message)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    /// Flush pending frames and shut the transport down.
    pub async fn close(mut self) {
        // Ignore errors: the transport is going away regardless.
        let _ = self.framed.close().await;
        tracing::debug!(conn = %self.id, "connection closed");
    }
}
