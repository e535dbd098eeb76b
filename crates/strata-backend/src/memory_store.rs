//! In-memory object backend.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tracing::debug;

use crate::error::StoreError;
use crate::object::{ObjectHandle, ObjectStatus, ObjectStore};

type ObjectMap = HashMap<(String, String), StoredObject>;

#[derive(Default, Debug)]
struct StoredObject {
    data: Vec<u8>,
    modification_time: i64,
}

/// In-memory object store backed by a `RwLock<HashMap>`.
///
/// Useful for testing and for servers configured to run in memory-only mode.
#[derive(Default)]
pub struct MemoryStore {
    objects: Arc<RwLock<ObjectMap>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn create(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Box<dyn ObjectHandle>, StoreError> {
        let key = (namespace.to_owned(), name.to_owned());
        {
            let mut map = self.objects.write().expect("lock poisoned");
            map.entry(key.clone()).or_insert_with(|| StoredObject {
                data: Vec::new(),
                modification_time: now_micros(),
            });
        }
        debug!(namespace, name, "created object in memory");
        Ok(Box::new(MemoryHandle {
            objects: self.objects.clone(),
            key,
        }))
    }

    async fn open(&self, namespace: &str, name: &str) -> Result<Box<dyn ObjectHandle>, StoreError> {
        let key = (namespace.to_owned(), name.to_owned());
        let map = self.objects.read().expect("lock poisoned");
        if !map.contains_key(&key) {
            return Err(StoreError::NotFound {
                namespace: namespace.to_owned(),
                name: name.to_owned(),
            });
        }
        drop(map);
        Ok(Box::new(MemoryHandle {
            objects: self.objects.clone(),
            key,
        }))
    }
}

#[derive(Debug)]
struct MemoryHandle {
    objects: Arc<RwLock<ObjectMap>>,
    key: (String, String),
}

impl MemoryHandle {
    fn not_found(&self) -> StoreError {
        StoreError::NotFound {
            namespace: self.key.0.clone(),
            name: self.key.1.clone(),
        }
    }
}

#[async_trait]
impl ObjectHandle for MemoryHandle {
    async fn read(&mut self, buf: &mut [u8], offset: u64) -> Result<u64, StoreError> {
        let map = self.objects.read().expect("lock poisoned");
        let object = map.get(&self.key).ok_or_else(|| self.not_found())?;

        let offset = offset as usize;
        if offset >= object.data.len() {
            return Ok(0);
        }
        let available = object.data.len() - offset;
        let n = buf.len().min(available);
        buf[..n].copy_from_slice(&object.data[offset..offset + n]);
        Ok(n as u64)
    }

    async fn write(&mut self, data: &[u8], offset: u64) -> Result<u64, StoreError> {
        let mut map = self.objects.write().expect("lock poisoned");
        let object = map.get_mut(&self.key).ok_or_else(|| self.not_found())?;

        let offset = offset as usize;
        let end = offset + data.len();
        if object.data.len() < end {
            object.data.resize(end, 0);
        }
        object.data[offset..end].copy_from_slice(data);
        object.modification_time = now_micros();
        Ok(data.len() as u64)
    }

    async fn status(&mut self) -> Result<ObjectStatus, StoreError> {
        let map = self.objects.read().expect("lock poisoned");
        let object = map.get(&self.key).ok_or_else(|| self.not_found())?;
        Ok(ObjectStatus {
            modification_time: object.modification_time,
            size: object.data.len() as u64,
        })
    }

    async fn sync(&mut self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn delete(self: Box<Self>) -> Result<(), StoreError> {
        let mut map = self.objects.write().expect("lock poisoned");
        map.remove(&self.key);
        debug!(namespace = %self.key.0, name = %self.key.1, "deleted object from memory");
        Ok(())
    }
}
