//! Pooled request/reply client.

use bytes::Bytes;

use crate::{config::Config, error::WireError, message::Message, pool::Pool};

/// Client facade issuing one logical request per call over a pooled
/// connection.
///
/// Cloning is cheap; clones share the same pool.
#[derive(Clone)]
pub struct Client {
    pool: Pool,
}

impl Client {
    /// Create a client with its own connection pool over `config`.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            pool: Pool::new(config),
        }
    }

    /// The underlying pool, for observation.
    #[must_use]
    pub fn pool(&self) -> &Pool { &self.pool }

    /// Send one message and return the peer's reply.
    ///
    /// A connection is acquired for the duration of exactly this exchange
    /// and released back to the pool whether the exchange succeeds or
    /// fails; the guard's drop makes a leaked busy connection impossible.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Transport`] if no connection can be
    /// established, or whatever error the exchange itself produced.
    pub async fn request(
        &self,
        kind: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Result<Message, WireError> {
        let mut conn = self.pool.acquire().await?;
        conn.send_wait(Message::new(kind, payload)).await
    }
}
