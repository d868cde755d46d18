//! Bounded pool of reusable client connections.
//!
//! The pool arbitrates acquisition, release, fairness, and idle eviction.
//! All bookkeeping lives behind a single mutex that is never held across
//! an await: acquire and release lock it briefly, and the connect that
//! grows the pool happens outside the critical section against a slot
//! reserved up front.
//!
//! A connection is either idle-and-in-pool or held by exactly one
//! [`PooledConn`] guard. Dropping the guard releases the connection: a
//! healthy one is handed to the oldest waiter (no idle gap) or parked
//! idle, a broken one is removed and its transport destroyed. Idle
//! connections above `min_count` are reaped after `linger_time` without
//! re-acquisition.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
};

use tokio::{runtime::Handle, sync::oneshot, task::JoinHandle, time};

use crate::{
    config::Config,
    connection::{Connection, ConnectionId},
    error::WireError,
    message::Message,
};

/// Bounded set of reusable client connections.
///
/// Cloning is cheap; clones share the same pool.
#[derive(Clone)]
pub struct Pool {
    shared: Arc<Shared>,
}

struct Shared {
    config: Config,
    max_count: usize,
    min_count: usize,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    idle: VecDeque<Idle>,
    total: usize,
    waiters: VecDeque<oneshot::Sender<PooledConn>>,
}

struct Idle {
    conn: Connection,
    reaper: Option<JoinHandle<()>>,
}

enum Acquire {
    Ready(Connection),
    Grow,
    Wait(oneshot::Receiver<PooledConn>),
}

impl Pool {
    /// Create a pool over `config`, clamping the pool bounds into range
    /// (`max_count` at least one, `min_count` at most `max_count`).
    #[must_use]
    pub fn new(config: Config) -> Self {
        let max_count = config.max_count.max(1);
        let min_count = config.min_count.min(max_count);
        Self {
            shared: Arc::new(Shared {
                config,
                max_count,
                min_count,
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Acquire a connection: reuse an idle one, grow the pool while below
    /// capacity, or queue until a holder releases.
    ///
    /// Idle connections whose peer went away are removed on the spot
    /// rather than handed out. Waiters are satisfied strictly in arrival
    /// order. Exhaustion is not an error; it queues.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Transport`] if growing the pool requires a new
    /// connection and the connect fails, or [`WireError::Closed`] if the
    /// pool is torn down while queued.
    pub async fn acquire(&self) -> Result<PooledConn, WireError> {
        let action = {
            let mut state = self.shared.lock();
            let mut ready = None;
            while let Some(mut entry) = state.idle.pop_front() {
                if let Some(reaper) = entry.reaper.take() {
                    reaper.abort();
                }
                if entry.conn.is_live() {
                    tracing::trace!(conn = %entry.conn.id(), "reusing idle connection");
                    ready = Some(entry.conn);
                    break;
                }
                // The peer went away while this connection sat idle.
                state.total -= 1;
                tracing::debug!(conn = %entry.conn.id(), "removing dead idle connection");
            }
            if let Some(conn) = ready {
                Acquire::Ready(conn)
            } else if state.total < self.shared.max_count {
                // Reserve the slot before connecting so concurrent
                // acquires cannot overshoot max_count.
                state.total += 1;
                Acquire::Grow
            } else {
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                tracing::trace!("pool at capacity, queueing acquire");
                Acquire::Wait(rx)
            }
        };

        match action {
            Acquire::Ready(conn) => Ok(PooledConn::new(conn, Arc::clone(&self.shared))),
            Acquire::Grow => match Connection::connect(&self.shared.config).await {
                Ok(conn) => {
                    tracing::debug!(conn = %conn.id(), "pool grew by one connection");
                    Ok(PooledConn::new(conn, Arc::clone(&self.shared)))
                }
                Err(e) => {
                    self.shared.lock().total -= 1;
                    Err(e)
                }
            },
            Acquire::Wait(rx) => rx.await.map_err(|_| WireError::Closed),
        }
    }

    /// Number of live connections, busy and idle together.
    #[must_use]
    pub fn size(&self) -> usize { self.shared.lock().total }

    /// Number of idle connections currently parked in the pool.
    #[must_use]
    pub fn idle_count(&self) -> usize { self.shared.lock().idle.len() }

    /// Number of acquires queued for a connection.
    #[must_use]
    pub fn waiting(&self) -> usize { self.shared.lock().waiters.len() }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("pool state poisoned")
    }

    /// Return a connection to the pool.
    ///
    /// Broken connections are removed unconditionally. Removal does not
    /// satisfy queued waiters; only the release of a healthy connection or
    /// a later acquire under capacity does.
    fn release(self: &Arc<Self>, conn: Connection, broken: bool) {
        if broken {
            let total = {
                let mut state = self.lock();
                state.total -= 1;
                state.total
            };
            tracing::debug!(conn = %conn.id(), total, "discarding broken connection");
            drop(conn);
            return;
        }

        let mut conn = conn;
        let mut state = self.lock();
        loop {
            let Some(waiter) = state.waiters.pop_front() else {
                let reaper = if state.total > self.min_count {
                    self.arm_reaper(conn.id())
                } else {
                    None
                };
                tracing::trace!(conn = %conn.id(), "connection parked idle");
                state.idle.push_back(Idle { conn, reaper });
                return;
            };
            match waiter.send(PooledConn::new(conn, Arc::clone(self))) {
                Ok(()) => {
                    tracing::trace!("handed connection to queued waiter");
                    return;
                }
                Err(mut unsent) => {
                    // The waiter gave up; defuse the guard and try the next.
                    conn = unsent
                        .conn
                        .take()
                        .expect("connection present in unsent guard");
                }
            }
        }
    }

    /// Arm the one-shot eviction timer for a freshly idled connection.
    ///
    /// Without a runtime there is nothing to run the timer on; the
    /// connection then simply stays idle.
    fn arm_reaper(self: &Arc<Self>, id: ConnectionId) -> Option<JoinHandle<()>> {
        let handle = Handle::try_current().ok()?;
        let shared = Arc::clone(self);
        let linger = self.config.linger_time;
        Some(handle.spawn(async move {
            time::sleep(linger).await;
            shared.evict(id);
        }))
    }

    /// Remove `id` from the idle set if it is still there and the pool is
    /// above its floor.
    fn evict(&self, id: ConnectionId) {
        let entry = {
            let mut state = self.lock();
            if state.total <= self.min_count {
                return;
            }
            let Some(pos) = state.idle.iter().position(|e| e.conn.id() == id) else {
                // Re-acquired (or already evicted) before the timer fired.
                return;
            };
            state.total -= 1;
            state.idle.remove(pos)
        };
        if entry.is_some() {
            tracing::debug!(conn = %id, "evicting idle connection after linger");
        }
    }
}

/// Exclusive handle to a pooled connection.
///
/// Dropping the guard releases the connection on every path, success and
/// failure alike. Operations that fail after bytes may have reached the
/// wire mark the guard broken, so the drop path discards the connection
/// instead of recycling it.
pub struct PooledConn {
    conn: Option<Connection>,
    shared: Arc<Shared>,
    broken: bool,
}

impl PooledConn {
    fn new(conn: Connection, shared: Arc<Shared>) -> Self {
        Self {
            conn: Some(conn),
            shared,
            broken: false,
        }
    }

    /// Identifier of the held connection.
    #[must_use]
    pub fn id(&self) -> ConnectionId { self.conn_ref().id() }

    /// [`Connection::send`] with pool breakage tracking.
    ///
    /// # Errors
    ///
    /// Propagates the underlying [`WireError`]. Encode-stage rejections
    /// (invalid kind, oversized payload) write nothing and leave the
    /// connection reusable; transport failures condemn it.
    pub async fn send(&mut self, message: Message) -> Result<(), WireError> {
        let result = self.conn_mut().send(message).await;
        if matches!(result, Err(WireError::Transport(_) | WireError::Closed)) {
            self.broken = true;
        }
        result
    }

    /// [`Connection::send_wait`] with pool breakage tracking.
    ///
    /// # Errors
    ///
    /// Propagates the underlying [`WireError`]. Any failure once the
    /// request has reached the wire condemns the connection, including a
    /// peer close before the reply arrives.
    pub async fn send_wait(&mut self, message: Message) -> Result<Message, WireError> {
        match self.conn_mut().send(message).await {
            Ok(()) => {}
            Err(e @ (WireError::InvalidKind { .. } | WireError::PayloadOverflow { .. })) => {
                // Rejected before encoding; nothing reached the wire.
                return Err(e);
            }
            Err(e) => {
                self.broken = true;
                return Err(e);
            }
        }
        match self.conn_mut().next_message().await {
            Ok(Some(reply)) => Ok(reply),
            Ok(None) => {
                self.broken = true;
                Err(WireError::Closed)
            }
            Err(e) => {
                self.broken = true;
                Err(e)
            }
        }
    }

    fn conn_ref(&self) -> &Connection {
        self.conn.as_ref().expect("connection present until drop")
    }

    fn conn_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl Drop for PooledConn {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.shared.release(conn, self.broken);
        }
    }
}
