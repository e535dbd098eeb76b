//! Shared harness for Strata integration tests.
//!
//! [`TestServer`] runs the real dispatcher on an ephemeral TCP port with
//! memory backends; [`TestServer::client`] builds clients that reach it
//! over real sockets. [`local_harness`] wires a client directly to
//! in-process stores instead, with the stores kept accessible so tests can
//! inspect the raw stored bytes.

use std::sync::Arc;

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use strata_backend::{KvStore, MemoryStore, ObjectStore};
use strata_client::Client;
use strata_server::Server;
use strata_types::Configuration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// An in-process storage server on an ephemeral port.
pub struct TestServer {
    address: String,
    server: Server,
    accept_task: JoinHandle<()>,
}

impl TestServer {
    /// Spawn a server with memory backends and the default 1 MiB scratch
    /// region.
    pub async fn spawn() -> Self {
        Self::spawn_with_stripe(1024 * 1024).await
    }

    /// Spawn a server with a specific scratch region size.
    pub async fn spawn_with_stripe(stripe_size: usize) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let server = Server::new(
            Some(Arc::new(MemoryStore::new()) as Arc<dyn ObjectStore>),
            Some(Arc::new(KvStore::in_memory())),
            stripe_size,
        );
        let accept_task = tokio::spawn({
            let server = server.clone();
            async move {
                let _ = server.serve(listener).await;
            }
        });

        Self {
            address,
            server,
            accept_task,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn server(&self) -> &Server {
        &self.server
    }

    /// A client that reaches this server for both objects and KV.
    pub fn client(&self) -> Client {
        self.client_with_max_operation_size(1024 * 1024)
    }

    /// A client with a specific operation-splitting threshold.
    pub fn client_with_max_operation_size(&self, max_operation_size: u64) -> Client {
        let config = Configuration {
            object_servers: vec![self.address.clone()],
            kv_servers: vec![self.address.clone()],
            max_operation_size,
            ..Configuration::default()
        };
        Client::with_stores(config, None, None)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

/// A client wired to in-process memory stores, plus handles to the stores
/// themselves for raw inspection.
pub struct LocalHarness {
    pub client: Client,
    pub object_store: Arc<MemoryStore>,
    pub kv_store: Arc<KvStore>,
}

/// Build a client running entirely in-process against memory backends.
pub fn local_harness() -> LocalHarness {
    let object_store = Arc::new(MemoryStore::new());
    let kv_store = Arc::new(KvStore::in_memory());
    let client = Client::with_stores(
        Configuration::default(),
        Some(object_store.clone() as Arc<dyn ObjectStore>),
        Some(kv_store.clone()),
    );
    LocalHarness {
        client,
        object_store,
        kv_store,
    }
}

/// Deterministic pseudo-random test data.
pub fn test_data_seeded(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.random()).collect()
}

/// Compressible test data: long runs with occasional breaks.
pub fn runs_data_seeded(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut data = Vec::with_capacity(len);
    while data.len() < len {
        let value: u8 = rng.random_range(0..8);
        let run: usize = rng.random_range(1..400);
        let run = run.min(len - data.len());
        data.resize(data.len() + run, value);
    }
    data
}
