//! Connection pool for Strata clients.
//!
//! Holds at most `max_connections` TCP connections per
//! `(backend_kind, server_index)` pair. [`ConnectionPool::pop`] leases a
//! connection — reusing an idle one, opening a new one below the cap, and
//! blocking on a semaphore at the cap. [`ConnectionPool::push`] returns the
//! lease; a connection that saw any protocol or I/O error must be
//! [discarded](PooledConnection::discard) instead, which closes it and frees
//! its slot.
//!
//! Nagle's algorithm is disabled on every new connection; leased
//! connections are exclusively owned and never shared.

use std::sync::Arc;

use strata_types::{BackendKind, Configuration};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Semaphore};
use tracing::debug;

/// Errors that can occur while leasing connections.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// No server is configured at the requested index.
    #[error("no {kind:?} server configured at index {index}")]
    NoSuchServer { kind: BackendKind, index: u32 },

    /// Connecting to the server failed.
    #[error("connect to {address} failed: {source}")]
    Connect {
        address: String,
        source: std::io::Error,
    },

    /// The pool is shutting down.
    #[error("pool closed")]
    Closed,
}

struct ServerSlot {
    address: String,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<TcpStream>>,
}

/// Process-wide connection pool, one slot per configured server.
pub struct ConnectionPool {
    object: Vec<ServerSlot>,
    kv: Vec<ServerSlot>,
}

impl ConnectionPool {
    /// Build a pool from the configured server lists.
    pub fn new(config: &Configuration) -> Self {
        let slot = |address: &String| ServerSlot {
            address: address.clone(),
            permits: Arc::new(Semaphore::new(config.max_connections)),
            idle: Mutex::new(Vec::new()),
        };
        Self {
            object: config.object_servers.iter().map(slot).collect(),
            kv: config.kv_servers.iter().map(slot).collect(),
        }
    }

    fn slot(&self, kind: BackendKind, index: u32) -> Result<&ServerSlot, PoolError> {
        let slots = match kind {
            BackendKind::Object => &self.object,
            BackendKind::Kv => &self.kv,
        };
        slots
            .get(index as usize)
            .ok_or(PoolError::NoSuchServer { kind, index })
    }

    /// Lease a connection to the `index`-th server of `kind`.
    ///
    /// Blocks while all `max_connections` leases for that server are out.
    pub async fn pop(&self, kind: BackendKind, index: u32) -> Result<PooledConnection, PoolError> {
        let slot = self.slot(kind, index)?;
        let permit = slot
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;

        let reused = slot.idle.lock().await.pop();
        let stream = match reused {
            Some(stream) => stream,
            None => {
                let stream =
                    TcpStream::connect(&slot.address)
                        .await
                        .map_err(|source| PoolError::Connect {
                            address: slot.address.clone(),
                            source,
                        })?;
                stream.set_nodelay(true).map_err(|source| PoolError::Connect {
                    address: slot.address.clone(),
                    source,
                })?;
                debug!(address = %slot.address, ?kind, index, "opened pooled connection");
                stream
            }
        };

        Ok(PooledConnection {
            stream,
            kind,
            index,
            _permit: permit,
        })
    }

    /// Return a healthy leased connection to the pool.
    pub async fn push(&self, connection: PooledConnection) {
        let Ok(slot) = self.slot(connection.kind, connection.index) else {
            return;
        };
        slot.idle.lock().await.push(connection.stream);
        // The permit drops with `connection`, freeing the slot.
    }
}

/// An exclusively owned, leased connection.
///
/// Dropping it without [`ConnectionPool::push`] closes the socket and frees
/// the lease — that is exactly what the executor does after a network error.
pub struct PooledConnection {
    stream: TcpStream,
    kind: BackendKind,
    index: u32,
    _permit: tokio::sync::OwnedSemaphorePermit,
}

impl PooledConnection {
    /// The underlying stream.
    pub fn stream(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    /// Close the connection without returning it to the pool.
    pub fn discard(self) {
        debug!(kind = ?self.kind, index = self.index, "discarding pooled connection");
    }
}
