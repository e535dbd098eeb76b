//! Key-value backend with fjall (disk) and in-memory variants.
//!
//! Keys are namespaced: the stored key is `"{namespace}/{key}"`, so a
//! namespace scan is a prefix scan over the composite key space.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::RwLock;

use fjall::{Database, Keyspace, KeyspaceCreateOptions};
use tracing::debug;

use crate::error::StoreError;

type Result<T> = std::result::Result<T, StoreError>;

/// Inner backend: fjall-backed (disk) or pure in-memory.
enum Backend {
    Fjall {
        #[allow(dead_code)]
        db: Database,
        entries: Keyspace,
    },
    Memory(RwLock<BTreeMap<String, Vec<u8>>>),
}

/// Namespaced key-value store.
///
/// Values are opaque byte runs; callers serialise their records before
/// storing them.
pub struct KvStore {
    backend: Backend,
}

impl KvStore {
    /// Open a persistent store at the given path (fjall backend).
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::builder(path).open()?;
        let entries = db.keyspace("entries", KeyspaceCreateOptions::default)?;
        Ok(Self {
            backend: Backend::Fjall { db, entries },
        })
    }

    /// Open a temporary fjall-backed store (cleaned up on drop).
    pub fn open_temporary() -> Result<Self> {
        let tmp = tempfile::tempdir().map_err(std::io::Error::other)?;
        let db = Database::builder(tmp.path()).temporary(true).open()?;
        let entries = db.keyspace("entries", KeyspaceCreateOptions::default)?;
        Ok(Self {
            backend: Backend::Fjall { db, entries },
        })
    }

    /// Create a pure in-memory store. Zero disk I/O.
    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory(RwLock::new(BTreeMap::new())),
        }
    }

    /// Store a value under `(namespace, key)`.
    pub fn put(&self, namespace: &str, key: &str, value: &[u8]) -> Result<()> {
        let storage_key = storage_key(namespace, key);
        match &self.backend {
            Backend::Fjall { entries, .. } => {
                entries.insert(storage_key.as_bytes(), value)?;
            }
            Backend::Memory(map) => {
                map.write()
                    .expect("lock poisoned")
                    .insert(storage_key, value.to_vec());
            }
        }
        debug!(namespace, key, len = value.len(), "stored kv entry");
        Ok(())
    }

    /// Look up a value by `(namespace, key)`.
    pub fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let storage_key = storage_key(namespace, key);
        match &self.backend {
            Backend::Fjall { entries, .. } => match entries.get(storage_key.as_bytes())? {
                Some(bytes) => Ok(Some(bytes.to_vec())),
                None => Ok(None),
            },
            Backend::Memory(map) => Ok(map
                .read()
                .expect("lock poisoned")
                .get(&storage_key)
                .cloned()),
        }
    }

    /// Delete the entry under `(namespace, key)`. Idempotent.
    pub fn delete(&self, namespace: &str, key: &str) -> Result<()> {
        let storage_key = storage_key(namespace, key);
        match &self.backend {
            Backend::Fjall { entries, .. } => {
                entries.remove(storage_key.as_bytes())?;
            }
            Backend::Memory(map) => {
                map.write().expect("lock poisoned").remove(&storage_key);
            }
        }
        debug!(namespace, key, "deleted kv entry");
        Ok(())
    }

    /// List all `(key, value)` pairs in a namespace.
    pub fn get_all(&self, namespace: &str) -> Result<Vec<(String, Vec<u8>)>> {
        self.get_by_prefix(namespace, "")
    }

    /// List `(key, value)` pairs in a namespace whose key starts with `prefix`.
    ///
    /// Returned keys have the namespace stripped.
    pub fn get_by_prefix(&self, namespace: &str, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let scan_prefix = format!("{namespace}/{prefix}");
        let namespace_prefix = format!("{namespace}/");

        match &self.backend {
            Backend::Fjall { entries, .. } => {
                let mut result = Vec::new();
                for guard in entries.prefix(scan_prefix.as_bytes()) {
                    let (k, v) = guard.into_inner()?;
                    let full_key = std::str::from_utf8(&k).map_err(|e| {
                        StoreError::CorruptData(format!("kv key is not valid UTF-8: {e}"))
                    })?;
                    if let Some(stripped) = full_key.strip_prefix(&namespace_prefix) {
                        result.push((stripped.to_owned(), v.to_vec()));
                    }
                }
                Ok(result)
            }
            Backend::Memory(map) => {
                let map = map.read().expect("lock poisoned");
                let mut result = Vec::new();
                for (full_key, value) in map.range(scan_prefix.clone()..) {
                    if !full_key.starts_with(&scan_prefix) {
                        break;
                    }
                    if let Some(stripped) = full_key.strip_prefix(&namespace_prefix) {
                        result.push((stripped.to_owned(), value.clone()));
                    }
                }
                Ok(result)
            }
        }
    }

    /// Start an empty write batch for a namespace.
    pub fn batch(&self, namespace: &str) -> KvWriteBatch {
        KvWriteBatch {
            namespace: namespace.to_owned(),
            ops: Vec::new(),
        }
    }

    /// Apply all queued operations of a batch in order.
    pub fn apply(&self, batch: KvWriteBatch) -> Result<()> {
        for op in batch.ops {
            match op {
                BatchOp::Put { key, value } => self.put(&batch.namespace, &key, &value)?,
                BatchOp::Delete { key } => self.delete(&batch.namespace, &key)?,
            }
        }
        Ok(())
    }
}

/// A queued sequence of writes against one namespace.
pub struct KvWriteBatch {
    namespace: String,
    ops: Vec<BatchOp>,
}

enum BatchOp {
    Put { key: String, value: Vec<u8> },
    Delete { key: String },
}

impl KvWriteBatch {
    pub fn put(&mut self, key: &str, value: Vec<u8>) {
        self.ops.push(BatchOp::Put {
            key: key.to_owned(),
            value,
        });
    }

    pub fn delete(&mut self, key: &str) {
        self.ops.push(BatchOp::Delete {
            key: key.to_owned(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Composite storage key: `"namespace/key"`.
fn storage_key(namespace: &str, key: &str) -> String {
    format!("{namespace}/{key}")
}
