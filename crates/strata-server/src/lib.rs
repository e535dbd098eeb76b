//! Strata storage server.
//!
//! [`Server`] owns the configured backends and the process-global
//! statistics, listens on a TCP port, and spawns one [worker](dispatch)
//! task per accepted connection. The `stratad` binary wraps this library
//! with TOML configuration and a CLI.

mod config;
mod dispatch;
mod error;
mod scratch;
mod stats;

use std::sync::Arc;

use strata_backend::{KvStore, ObjectStore};
use tokio::net::TcpListener;
use tracing::{debug, info};

pub use config::ServerConfig;
pub use error::ServerError;
pub use stats::{Statistics, StatisticsSnapshot};

/// A storage server instance.
///
/// Cheap to clone; all clones share the backends and statistics.
#[derive(Clone)]
pub struct Server {
    object_store: Option<Arc<dyn ObjectStore>>,
    kv_store: Option<Arc<KvStore>>,
    stripe_size: usize,
    stats: Arc<Statistics>,
}

impl Server {
    /// Build a server over the given backends.
    ///
    /// `stripe_size` bounds the per-connection scratch region used to
    /// stage read and write payloads.
    pub fn new(
        object_store: Option<Arc<dyn ObjectStore>>,
        kv_store: Option<Arc<KvStore>>,
        stripe_size: usize,
    ) -> Self {
        Self {
            object_store,
            kv_store,
            stripe_size,
            stats: Arc::new(Statistics::default()),
        }
    }

    /// Process-global statistics, aggregated from closed connections.
    pub fn statistics(&self) -> &Arc<Statistics> {
        &self.stats
    }

    /// Accept connections forever, one worker task per connection.
    pub async fn serve(self, listener: TcpListener) -> Result<(), ServerError> {
        let local = listener.local_addr()?;
        info!(address = %local, "server listening");

        loop {
            let (stream, peer) = listener.accept().await?;
            debug!(peer = %peer, "accepted connection");

            let worker = dispatch::Worker::new(
                self.object_store.clone(),
                self.kv_store.clone(),
                self.stripe_size,
                self.stats.clone(),
            );
            tokio::spawn(worker.run(stream));
        }
    }
}
