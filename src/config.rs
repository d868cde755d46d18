//! Connection endpoints and runtime configuration.
//!
//! A [`Config`] is consumed by the pool, the client, and the server alike;
//! the server reads only the endpoint and the payload bound.

use std::{fmt, net::SocketAddr, time::Duration};
#[cfg(unix)]
use std::path::PathBuf;

use crate::codec::MAX_PAYLOAD_CEILING;

/// Where a client connects or a server listens.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Endpoint {
    /// TCP socket address.
    Tcp(SocketAddr),
    /// Unix-domain socket path.
    #[cfg(unix)]
    Unix(PathBuf),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "tcp://{addr}"),
            #[cfg(unix)]
            Self::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self { Self::Tcp(addr) }
}

/// Pool and protocol settings.
///
/// Defaults follow the protocol's original tuning: at most five pooled
/// connections, one kept warm, a two-second idle linger, payloads up to
/// the protocol ceiling, and TCP keep-alive on.
#[derive(Clone, Debug)]
pub struct Config {
    pub(crate) endpoint: Endpoint,
    pub(crate) max_count: usize,
    pub(crate) min_count: usize,
    pub(crate) linger_time: Duration,
    pub(crate) max_payload: u32,
    pub(crate) keep_alive: bool,
}

impl Config {
    /// Create a configuration for `endpoint` with default tuning.
    pub fn new(endpoint: impl Into<Endpoint>) -> Self {
        Self {
            endpoint: endpoint.into(),
            max_count: 5,
            min_count: 1,
            linger_time: Duration::from_millis(2000),
            max_payload: MAX_PAYLOAD_CEILING,
            keep_alive: true,
        }
    }

    /// Upper bound on pooled connections.
    #[must_use]
    pub fn max_count(mut self, value: usize) -> Self {
        self.max_count = value;
        self
    }

    /// Number of connections kept alive through idle periods.
    #[must_use]
    pub fn min_count(mut self, value: usize) -> Self {
        self.min_count = value;
        self
    }

    /// How long an idle connection above `min_count` lingers before
    /// eviction.
    #[must_use]
    pub fn linger_time(mut self, value: Duration) -> Self {
        self.linger_time = value;
        self
    }

    /// Largest payload accepted on encode and decode.
    #[must_use]
    pub fn max_payload(mut self, value: u32) -> Self {
        self.max_payload = value;
        self
    }

    /// Whether SO_KEEPALIVE is set on outbound TCP connections.
    #[must_use]
    pub fn keep_alive(mut self, enabled: bool) -> Self {
        self.keep_alive = enabled;
        self
    }

    /// The configured connect or bind target.
    #[must_use]
    pub fn endpoint_ref(&self) -> &Endpoint { &self.endpoint }
}
