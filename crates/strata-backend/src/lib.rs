//! Storage backends for Strata.
//!
//! Two capability sets behind uniform interfaces: byte-addressable objects
//! ([`ObjectStore`]/[`ObjectHandle`]) and a namespaced key-value store
//! ([`KvStore`]). Implementations are selected from configuration at
//! process start; a process may run with either, both, or neither — absent
//! a backend, the corresponding operations are serviced over the network.

mod error;
mod file_store;
mod kv;
mod memory_store;
mod object;

use std::sync::Arc;

use strata_types::BackendSpec;

pub use error::StoreError;
pub use file_store::FileStore;
pub use kv::{KvStore, KvWriteBatch};
pub use memory_store::MemoryStore;
pub use object::{ObjectHandle, ObjectStatus, ObjectStore};

/// Instantiate an object store from a configured backend spec.
///
/// Known implementations: `"posix"` (file per object) and `"memory"`.
pub fn object_store_from_spec(spec: &BackendSpec) -> Result<Arc<dyn ObjectStore>, StoreError> {
    match spec.name.as_str() {
        "posix" => Ok(Arc::new(FileStore::new(&spec.path)?)),
        "memory" => Ok(Arc::new(MemoryStore::new())),
        other => Err(StoreError::UnknownBackend(other.to_owned())),
    }
}

/// Instantiate a KV store from a configured backend spec.
///
/// Known implementations: `"fjall"` (embedded disk database) and `"memory"`.
pub fn kv_store_from_spec(spec: &BackendSpec) -> Result<Arc<KvStore>, StoreError> {
    match spec.name.as_str() {
        "fjall" => Ok(Arc::new(KvStore::open(&spec.path)?)),
        "memory" => Ok(Arc::new(KvStore::in_memory())),
        other => Err(StoreError::UnknownBackend(other.to_owned())),
    }
}
