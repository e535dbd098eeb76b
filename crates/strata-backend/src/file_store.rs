//! File-based object backend.
//!
//! Stores one file per object at `{base_dir}/{namespace}/{name}`.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::debug;

use crate::error::StoreError;
use crate::object::{ObjectHandle, ObjectStatus, ObjectStore};

/// Object backend with one file per object.
pub struct FileStore {
    base_dir: PathBuf,
}

impl FileStore {
    /// Create a file store rooted at the given directory.
    ///
    /// The directory is created if it does not exist.
    pub fn new(base_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let base_dir = base_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    fn object_path(&self, namespace: &str, name: &str) -> PathBuf {
        self.base_dir.join(namespace).join(name)
    }
}

#[async_trait]
impl ObjectStore for FileStore {
    async fn create(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Box<dyn ObjectHandle>, StoreError> {
        let path = self.object_path(namespace, name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .await?;

        debug!(namespace, name, path = %path.display(), "created object file");
        Ok(Box::new(FileHandle { file, path }))
    }

    async fn open(&self, namespace: &str, name: &str) -> Result<Box<dyn ObjectHandle>, StoreError> {
        let path = self.object_path(namespace, name);
        let file = match OpenOptions::new().read(true).write(true).open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    namespace: namespace.to_owned(),
                    name: name.to_owned(),
                });
            }
            Err(e) => return Err(StoreError::Io(e)),
        };
        Ok(Box::new(FileHandle { file, path }))
    }
}

#[derive(Debug)]
struct FileHandle {
    file: File,
    path: PathBuf,
}

#[async_trait]
impl ObjectHandle for FileHandle {
    async fn read(&mut self, buf: &mut [u8], offset: u64) -> Result<u64, StoreError> {
        self.file.seek(SeekFrom::Start(offset)).await?;

        // Loop until the buffer is full or the file ends.
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.file.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled as u64)
    }

    async fn write(&mut self, data: &[u8], offset: u64) -> Result<u64, StoreError> {
        self.file.seek(SeekFrom::Start(offset)).await?;
        self.file.write_all(data).await?;
        Ok(data.len() as u64)
    }

    async fn status(&mut self) -> Result<ObjectStatus, StoreError> {
        let metadata = self.file.metadata().await?;
        let modification_time = metadata
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or(0);
        Ok(ObjectStatus {
            modification_time,
            size: metadata.len(),
        })
    }

    async fn sync(&mut self) -> Result<(), StoreError> {
        self.file.sync_all().await?;
        Ok(())
    }

    async fn delete(self: Box<Self>) -> Result<(), StoreError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!(path = %self.path.display(), "deleted object file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}
