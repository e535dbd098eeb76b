//! Client half of the Strata storage framework.
//!
//! A [`Client`] bundles the configuration, the optional in-process
//! backends and the connection pool, and hands out [`Batch`]es.
//! Applications enqueue operations against [`TransformationObject`]s and
//! [`ChunkedTransformationObject`]s into a batch and then execute it; the
//! batch groups operations by target, merges each group into a single
//! framed message (or a single local backend pass) and reports the
//! conjunction of all per-run results.

mod batch;
mod chunked;
mod error;
mod kv;
mod object;

use std::sync::Arc;

use strata_backend::{KvStore, ObjectStore};
use strata_message::{Message, MessageType};
use strata_pool::{ConnectionPool, PooledConnection};
use strata_types::{BackendKind, Configuration, Semantics};

pub use batch::Batch;
pub use chunked::{ChunkedStatusResult, ChunkedTransformationObject};
pub use error::ClientError;
pub use object::{StatusResult, TransformationObject};

/// Aggregate server statistics, as returned by [`Client::server_statistics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStatistics {
    pub files_created: u64,
    pub files_deleted: u64,
    pub files_stated: u64,
    pub syncs: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
}

/// Handle to the storage framework.
///
/// Owns the process-wide state the operations need: configuration, the
/// optional client-side backends, and the connection pool. Cheap to share
/// behind an `Arc`; batch executors receive it explicitly instead of
/// discovering global singletons.
pub struct Client {
    config: Configuration,
    object_store: Option<Arc<dyn ObjectStore>>,
    kv_store: Option<Arc<KvStore>>,
    pool: ConnectionPool,
}

impl Client {
    /// Build a client from configuration, instantiating any client-side
    /// backends it names.
    ///
    /// A failed backend init is fatal: the affected kind would be unusable
    /// for every subsequent operation.
    pub fn new(config: Configuration) -> Result<Self, ClientError> {
        let object_store = match config.client_backend(BackendKind::Object) {
            Some(spec) => Some(strata_backend::object_store_from_spec(spec)?),
            None => None,
        };
        let kv_store = match config.client_backend(BackendKind::Kv) {
            Some(spec) => Some(strata_backend::kv_store_from_spec(spec)?),
            None => None,
        };
        let pool = ConnectionPool::new(&config);
        Ok(Self {
            config,
            object_store,
            kv_store,
            pool,
        })
    }

    /// Build a client around pre-constructed stores. Used by tests that
    /// share a store between a client and an in-process server.
    pub fn with_stores(
        config: Configuration,
        object_store: Option<Arc<dyn ObjectStore>>,
        kv_store: Option<Arc<KvStore>>,
    ) -> Self {
        let pool = ConnectionPool::new(&config);
        Self {
            config,
            object_store,
            kv_store,
            pool,
        }
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// Start an empty batch under the given semantics.
    pub fn batch(&self, semantics: Semantics) -> Batch<'_> {
        Batch::new(self, semantics)
    }

    pub(crate) fn object_store(&self) -> Option<&Arc<dyn ObjectStore>> {
        self.object_store.as_ref()
    }

    pub(crate) fn kv_store(&self) -> Option<&Arc<KvStore>> {
        self.kv_store.as_ref()
    }

    pub(crate) fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Lease a connection, run `body` on it, and return it to the pool on
    /// success or drop it on error (a failed connection is never reused).
    pub(crate) async fn with_connection<T>(
        &self,
        kind: BackendKind,
        index: u32,
        body: impl AsyncFnOnce(&mut PooledConnection) -> Result<T, ClientError>,
    ) -> Result<T, ClientError> {
        let mut connection = self.pool.pop(kind, index).await?;
        match body(&mut connection).await {
            Ok(value) => {
                self.pool.push(connection).await;
                Ok(value)
            }
            Err(e) => {
                connection.discard();
                Err(e)
            }
        }
    }

    /// Ping a server and return the backend kinds it advertises.
    pub async fn ping(&self, kind: BackendKind, index: u32) -> Result<Vec<String>, ClientError> {
        self.with_connection(kind, index, async |connection| {
            let request = Message::new(MessageType::Ping);
            request.send(connection.stream()).await?;
            let mut reply = Message::receive_reply(connection.stream(), &request).await?;

            let mut backends = Vec::new();
            for _ in 0..reply.operation_count() {
                backends.push(reply.get_str()?);
            }
            Ok(backends)
        })
        .await
    }

    /// Fetch the aggregate statistics of an object server.
    pub async fn server_statistics(&self, index: u32) -> Result<ServerStatistics, ClientError> {
        self.with_connection(BackendKind::Object, index, async |connection| {
            let mut request = Message::new(MessageType::Statistics);
            request.add_operation();
            request.append_u8(1); // process-global counters
            request.send(connection.stream()).await?;

            let mut reply = Message::receive_reply(connection.stream(), &request).await?;
            Ok(ServerStatistics {
                files_created: reply.get_u64()?,
                files_deleted: reply.get_u64()?,
                files_stated: reply.get_u64()?,
                syncs: reply.get_u64()?,
                bytes_read: reply.get_u64()?,
                bytes_written: reply.get_u64()?,
                bytes_received: reply.get_u64()?,
                bytes_sent: reply.get_u64()?,
            })
        })
        .await
    }
}
