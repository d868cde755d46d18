//! Server dispatcher: accept connections, decode messages, hand them to
//! the application handler.
//!
//! Every accepted transport gets its own [`Connection`] and its own task.
//! The handler receives each decoded message together with the connection
//! it arrived on, which doubles as the reply handle: `send` and
//! `send_wait` go back over the same socket. Handler failures are logged
//! and never disturb framing on other connections.

use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use futures::future::BoxFuture;
use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::{
    config::{Config, Endpoint},
    connection::{Connection, Transport},
    error::WireError,
    message::Message,
};

/// Delay before retrying a bind whose address is in use.
const REBIND_DELAY: Duration = Duration::from_millis(500);

/// Delay before retrying after a failed accept.
const REACCEPT_DELAY: Duration = Duration::from_millis(10);

/// Application handler invoked for every decoded message.
pub type Handler = Arc<
    dyn for<'a> Fn(Message, &'a mut Connection) -> BoxFuture<'a, Result<(), WireError>>
        + Send
        + Sync,
>;

/// Wrap a closure as a [`Handler`].
pub fn handler<F>(f: F) -> Handler
where
    F: for<'a> Fn(Message, &'a mut Connection) -> BoxFuture<'a, Result<(), WireError>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(f)
}

enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

impl Listener {
    async fn bind(endpoint: &Endpoint) -> io::Result<Self> {
        match endpoint {
            Endpoint::Tcp(addr) => Ok(Self::Tcp(TcpListener::bind(*addr).await?)),
            #[cfg(unix)]
            Endpoint::Unix(path) => Ok(Self::Unix(UnixListener::bind(path)?)),
        }
    }

    async fn accept(&self) -> io::Result<Transport> {
        match self {
            Self::Tcp(listener) => listener
                .accept()
                .await
                .map(|(stream, _)| Transport::Tcp(stream)),
            #[cfg(unix)]
            Self::Unix(listener) => listener
                .accept()
                .await
                .map(|(stream, _)| Transport::Unix(stream)),
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        match self {
            Self::Tcp(listener) => listener.local_addr().ok(),
            #[cfg(unix)]
            Self::Unix(_) => None,
        }
    }
}

/// Server dispatcher for one listening endpoint.
pub struct Server {
    config: Config,
}

impl Server {
    /// Create a dispatcher over `config` (only the endpoint and payload
    /// bound are read).
    #[must_use]
    pub fn new(config: Config) -> Self { Self { config } }

    /// Open the passive socket, retrying indefinitely while the address is
    /// in use.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Transport`] for bind failures other than
    /// address-in-use; those are retried after a fixed delay, forever.
    pub async fn bind(self) -> Result<BoundServer, WireError> {
        let listener = loop {
            match Listener::bind(&self.config.endpoint).await {
                Ok(listener) => break listener,
                Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                    tracing::warn!(endpoint = %self.config.endpoint, "listen address in use, retrying");
                    sleep(REBIND_DELAY).await;
                }
                Err(e) => return Err(e.into()),
            }
        };
        tracing::debug!(endpoint = %self.config.endpoint, "server listening");
        Ok(BoundServer {
            listener,
            config: self.config,
            shutdown: CancellationToken::new(),
        })
    }
}

/// A dispatcher with its listening socket open.
pub struct BoundServer {
    listener: Listener,
    config: Config,
    shutdown: CancellationToken,
}

impl BoundServer {
    /// The bound TCP address, if the endpoint is TCP. Useful after binding
    /// port zero.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> { self.listener.local_addr() }

    /// Token that stops the accept loop when cancelled.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken { self.shutdown.clone() }

    /// Accept and dispatch until ctrl-c.
    ///
    /// # Errors
    ///
    /// Currently never returns an error; accept failures are retried.
    pub async fn run(self, handler: Handler) -> Result<(), WireError> {
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown.cancel();
            }
        });
        self.run_until(handler).await
    }

    /// Accept and dispatch until the shutdown token is cancelled.
    ///
    /// On exit a Unix-socket path is removed from the filesystem.
    ///
    /// # Errors
    ///
    /// Currently never returns an error; accept failures are retried.
    pub async fn run_until(self, handler: Handler) -> Result<(), WireError> {
        self.accept_loop(&handler).await;
        self.cleanup();
        Ok(())
    }

    async fn accept_loop(&self, handler: &Handler) {
        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => return,
                res = self.listener.accept() => match res {
                    Ok(transport) => {
                        let conn = Connection::from_transport(transport, self.config.max_payload);
                        tracing::debug!(conn = %conn.id(), "accepted connection");
                        tokio::spawn(serve_connection(conn, Arc::clone(handler)));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed, retrying");
                        sleep(REACCEPT_DELAY).await;
                    }
                },
            }
        }
    }

    fn cleanup(&self) {
        #[cfg(unix)]
        if let Endpoint::Unix(path) = &self.config.endpoint {
            if let Err(e) = std::fs::remove_file(path) {
                tracing::debug!(error = %e, "could not remove socket path");
            }
        }
    }
}

/// Read messages off one connection and feed them to the handler until the
/// peer goes away.
async fn serve_connection(mut conn: Connection, handler: Handler) {
    loop {
        match conn.next_message().await {
            Ok(Some(message)) => {
                tracing::trace!(conn = %conn.id(), kind = message.kind(), "dispatching message");
                if let Err(e) = handler(message, &mut conn).await {
                    // The application's problem; framing on this
                    // connection is still intact.
                    tracing::error!(conn = %conn.id(), error = %e, "handler failed");
                }
            }
            Ok(None) => {
                tracing::debug!(conn = %conn.id(), "peer closed");
                return;
            }
            Err(e) => {
                tracing::debug!(conn = %conn.id(), error = %e, "connection error, closing");
                return;
            }
        }
    }
}
