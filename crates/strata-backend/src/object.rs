//! Capability traits for object storage backends.

use async_trait::async_trait;

use crate::error::StoreError;

/// Modification time and physical size of a stored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectStatus {
    /// Last modification time, microseconds since the Unix epoch.
    pub modification_time: i64,
    /// Physical size of the stored bytes.
    pub size: u64,
}

/// An open object. Closing is dropping; deletion consumes the handle.
#[async_trait]
pub trait ObjectHandle: Send + std::fmt::Debug {
    /// Read up to `buf.len()` bytes at `offset`. Returns the number of
    /// bytes actually read (short at end-of-object).
    async fn read(&mut self, buf: &mut [u8], offset: u64) -> Result<u64, StoreError>;

    /// Write `data` at `offset`, extending the object if needed. Returns
    /// the number of bytes written.
    async fn write(&mut self, data: &[u8], offset: u64) -> Result<u64, StoreError>;

    /// Report modification time and physical size.
    async fn status(&mut self) -> Result<ObjectStatus, StoreError>;

    /// Flush the object to stable storage.
    async fn sync(&mut self) -> Result<(), StoreError>;

    /// Delete the object, consuming the handle.
    async fn delete(self: Box<Self>) -> Result<(), StoreError>;
}

/// A pluggable object storage backend.
///
/// Implementations must be `Send + Sync`; clients and servers hold them as
/// `Arc<dyn ObjectStore>` selected from configuration.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Create the object (idempotent) and return an open handle.
    async fn create(&self, namespace: &str, name: &str)
    -> Result<Box<dyn ObjectHandle>, StoreError>;

    /// Open an existing object.
    async fn open(&self, namespace: &str, name: &str) -> Result<Box<dyn ObjectHandle>, StoreError>;
}
