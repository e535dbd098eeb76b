//! Chunked transformation objects.
//!
//! A logical object tiled across many equally-sized transformation-object
//! chunks: chunk `i` is the transformation object `"{name}_{i}"` in the
//! same namespace. Reads and writes split at chunk boundaries; writes past
//! the current last chunk create new chunks on demand.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use strata_transform::Transformation;
use strata_types::{
    BackendKind, ChunkedMeta, Semantics, TransformationMode, TransformationType, server_index,
};
use tracing::debug;

use crate::batch::Batch;
use crate::object::{self, ReadOp, StatusResult, TransformationObject, WriteOp};
use crate::{Client, ClientError};

#[derive(Debug, Clone, Copy, Default)]
struct ChunkedState {
    transformation_type: TransformationType,
    transformation_mode: TransformationMode,
    chunk_count: u64,
    chunk_size: u64,
    loaded: bool,
}

/// A logical object fanned out over transformation-object chunks.
pub struct ChunkedTransformationObject {
    index: u32,
    namespace: String,
    name: String,
    state: Mutex<ChunkedState>,
}

impl ChunkedTransformationObject {
    /// Pure allocation; no I/O.
    pub fn new(client: &Client, namespace: &str, name: &str) -> Arc<Self> {
        let count = client.config().server_count(BackendKind::Object);
        Arc::new(Self {
            index: server_index(name, count),
            namespace: namespace.to_owned(),
            name: name.to_owned(),
            state: Mutex::new(ChunkedState::default()),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    fn state(&self) -> ChunkedState {
        *self.state.lock().expect("lock poisoned")
    }

    fn update_state(&self, f: impl FnOnce(&mut ChunkedState)) {
        f(&mut self.state.lock().expect("lock poisoned"));
    }

    fn chunk_name(&self, chunk_id: u64) -> String {
        format!("{}_{}", self.name, chunk_id)
    }

    /// Enqueue creation: establishes the transformation and `chunk_size`,
    /// creates chunk zero and writes the metadata record.
    pub fn create(
        self: &Arc<Self>,
        ty: TransformationType,
        mode: TransformationMode,
        chunk_size: u64,
        batch: &mut Batch<'_>,
    ) {
        self.update_state(|state| {
            state.transformation_type = ty;
            state.transformation_mode = mode;
            state.chunk_size = chunk_size;
            state.chunk_count = 0;
            state.loaded = true;
        });
        batch.push_chunked_create(self.clone());
    }

    /// Enqueue deletion of every chunk and the metadata record.
    pub fn delete(self: &Arc<Self>, batch: &mut Batch<'_>) {
        batch.push_chunked_delete(self.clone());
    }

    /// Enqueue a status query aggregated over all chunks.
    pub fn status(self: &Arc<Self>, batch: &mut Batch<'_>) -> Arc<ChunkedStatusResult> {
        let result = Arc::new(ChunkedStatusResult::default());
        batch.push_chunked_status(self.clone(), result.clone());
        result
    }

    /// Enqueue a read of `buf.len()` logical bytes at `offset`.
    pub fn read<'a>(
        self: &Arc<Self>,
        buf: &'a mut [u8],
        offset: u64,
        bytes_read: &'a AtomicU64,
        batch: &mut Batch<'a>,
    ) {
        if buf.is_empty() {
            debug!(name = %self.name, "ignoring empty chunked read");
            return;
        }
        bytes_read.store(0, Ordering::SeqCst);
        batch.push_chunked_read(
            self.clone(),
            ReadOp {
                buf,
                offset,
                bytes_read,
            },
        );
    }

    /// Enqueue a write of `data` at `offset`.
    pub fn write<'a>(
        self: &Arc<Self>,
        data: &'a [u8],
        offset: u64,
        bytes_written: &'a AtomicU64,
        batch: &mut Batch<'a>,
    ) {
        if data.is_empty() {
            debug!(name = %self.name, "ignoring empty chunked write");
            return;
        }
        bytes_written.store(0, Ordering::SeqCst);
        batch.push_chunked_write(
            self.clone(),
            WriteOp {
                data,
                offset,
                bytes_written,
            },
        );
    }
}

/// Out-slot for a chunked status operation.
#[derive(Debug, Default)]
pub struct ChunkedStatusResult {
    modification_time: AtomicI64,
    original_size: AtomicU64,
    transformed_size: AtomicU64,
    transformation_type: Mutex<Option<TransformationType>>,
    chunk_count: AtomicU64,
    chunk_size: AtomicU64,
}

impl ChunkedStatusResult {
    /// Maximum modification time over all chunks.
    pub fn modification_time(&self) -> i64 {
        self.modification_time.load(Ordering::SeqCst)
    }

    /// Sum of the chunks' logical sizes.
    pub fn original_size(&self) -> u64 {
        self.original_size.load(Ordering::SeqCst)
    }

    /// Sum of the chunks' stored sizes.
    pub fn transformed_size(&self) -> u64 {
        self.transformed_size.load(Ordering::SeqCst)
    }

    pub fn transformation_type(&self) -> Option<TransformationType> {
        *self.transformation_type.lock().expect("lock poisoned")
    }

    pub fn chunk_count(&self) -> u64 {
        self.chunk_count.load(Ordering::SeqCst)
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

async fn store_metadata(
    client: &Client,
    object: &ChunkedTransformationObject,
    semantics: &Semantics,
) -> Result<(), ClientError> {
    let state = object.state();
    let meta = ChunkedMeta {
        transformation_type: state.transformation_type,
        transformation_mode: state.transformation_mode,
        chunk_count: state.chunk_count,
        chunk_size: state.chunk_size,
    };
    let bytes = postcard::to_allocvec(&meta)?;
    client
        .kv_put(&object.namespace, &object.name, &bytes, semantics)
        .await
}

async fn load_metadata(
    client: &Client,
    object: &ChunkedTransformationObject,
) -> Result<(), ClientError> {
    let Some(bytes) = client.kv_get(&object.namespace, &object.name).await? else {
        if object.state().loaded {
            return Ok(());
        }
        return Err(ClientError::InputInvalid(
            "chunked object has no metadata record",
        ));
    };
    let meta: ChunkedMeta =
        postcard::from_bytes(&bytes).map_err(|e| ClientError::CorruptMetadata {
            namespace: object.namespace.clone(),
            name: object.name.clone(),
            reason: e.to_string(),
        })?;
    object.update_state(|state| {
        state.transformation_type = meta.transformation_type;
        state.transformation_mode = meta.transformation_mode;
        state.chunk_count = meta.chunk_count;
        state.chunk_size = meta.chunk_size;
        state.loaded = true;
    });
    Ok(())
}

/// Build a chunk's transformation object with its transformation
/// pre-established from the chunked metadata.
fn chunk_object(
    client: &Client,
    object: &ChunkedTransformationObject,
    chunk_id: u64,
) -> Arc<TransformationObject> {
    let state = object.state();
    let chunk = TransformationObject::new(client, &object.namespace, &object.chunk_name(chunk_id));
    chunk.update_state(|chunk_state| {
        chunk_state.transformation = Some(Transformation::new(
            state.transformation_type,
            state.transformation_mode,
        ));
    });
    chunk
}

// ---------------------------------------------------------------------------
// Executors
// ---------------------------------------------------------------------------

pub(crate) async fn create_run(
    client: &Client,
    semantics: &Semantics,
    object: &Arc<ChunkedTransformationObject>,
    count: usize,
) -> Result<(), ClientError> {
    for _ in 0..count {
        let chunk = chunk_object(client, object, 0);
        chunk.update_state(|state| {
            state.original_size = 0;
            state.transformed_size = 0;
        });
        object::create_run(client, semantics, &chunk, 1).await?;

        object.update_state(|state| state.chunk_count = 1);
        store_metadata(client, object, semantics).await?;
    }
    Ok(())
}

pub(crate) async fn delete_run(
    client: &Client,
    semantics: &Semantics,
    object: &Arc<ChunkedTransformationObject>,
    count: usize,
) -> Result<(), ClientError> {
    for _ in 0..count {
        load_metadata(client, object).await?;
        let chunk_count = object.state().chunk_count;

        for chunk_id in 0..chunk_count {
            let chunk = chunk_object(client, object, chunk_id);
            object::delete_run(client, semantics, &chunk, 1).await?;
        }
        client
            .kv_delete(&object.namespace, &object.name, semantics)
            .await?;
    }
    Ok(())
}

pub(crate) async fn read_run(
    client: &Client,
    semantics: &Semantics,
    object: &Arc<ChunkedTransformationObject>,
    ops: Vec<ReadOp<'_>>,
) -> Result<(), ClientError> {
    let max = client.config().max_operation_size as usize;

    for op in ops {
        load_metadata(client, object).await?;
        let state = object.state();
        let chunk_size = state.chunk_size;
        if chunk_size == 0 {
            return Err(ClientError::InputInvalid("chunked object has no chunk size"));
        }

        let mut rest = op.buf;
        let mut offset = op.offset;
        while !rest.is_empty() {
            let chunk_id = offset / chunk_size;
            if chunk_id >= state.chunk_count {
                break;
            }
            let local_offset = offset % chunk_size;
            let local_len = ((chunk_size - local_offset) as usize).min(rest.len());
            let (head, tail) = std::mem::take(&mut rest).split_at_mut(local_len);

            let chunk = chunk_object(client, object, chunk_id);
            let mut chunk_ops = Vec::new();
            let mut piece_offset = local_offset;
            for piece in head.chunks_mut(max) {
                let piece_len = piece.len() as u64;
                chunk_ops.push(ReadOp {
                    buf: piece,
                    offset: piece_offset,
                    bytes_read: op.bytes_read,
                });
                piece_offset += piece_len;
            }
            object::read_run(client, semantics, &chunk, chunk_ops).await?;

            rest = tail;
            offset += local_len as u64;
        }
    }
    Ok(())
}

pub(crate) async fn write_run(
    client: &Client,
    semantics: &Semantics,
    object: &Arc<ChunkedTransformationObject>,
    ops: Vec<WriteOp<'_>>,
) -> Result<(), ClientError> {
    let max = client.config().max_operation_size as usize;

    for op in ops {
        load_metadata(client, object).await?;
        let chunk_size = object.state().chunk_size;
        if chunk_size == 0 {
            return Err(ClientError::InputInvalid("chunked object has no chunk size"));
        }

        let mut rest = op.data;
        let mut offset = op.offset;
        while !rest.is_empty() {
            let chunk_id = offset / chunk_size;
            let local_offset = offset % chunk_size;
            let local_len = ((chunk_size - local_offset) as usize).min(rest.len());
            let (head, tail) = rest.split_at(local_len);

            // Create chunks on demand, including any the write skipped over.
            let known = object.state().chunk_count;
            for missing in known..=chunk_id {
                let chunk = chunk_object(client, object, missing);
                chunk.update_state(|state| {
                    state.original_size = 0;
                    state.transformed_size = 0;
                });
                object::create_run(client, semantics, &chunk, 1).await?;
                object.update_state(|state| state.chunk_count = missing + 1);
            }

            let chunk = chunk_object(client, object, chunk_id);
            let mut chunk_ops = Vec::new();
            let mut piece_offset = local_offset;
            for piece in head.chunks(max) {
                chunk_ops.push(WriteOp {
                    data: piece,
                    offset: piece_offset,
                    bytes_written: op.bytes_written,
                });
                piece_offset += piece.len() as u64;
            }
            object::write_run(client, semantics, &chunk, chunk_ops).await?;

            rest = tail;
            offset += local_len as u64;
        }

        store_metadata(client, object, semantics).await?;
    }
    Ok(())
}

pub(crate) async fn status_run(
    client: &Client,
    semantics: &Semantics,
    object: &Arc<ChunkedTransformationObject>,
    results: Vec<Arc<ChunkedStatusResult>>,
) -> Result<(), ClientError> {
    for result in results {
        load_metadata(client, object).await?;
        let state = object.state();

        let mut modification_time = 0i64;
        let mut original_size = 0u64;
        let mut transformed_size = 0u64;

        for chunk_id in 0..state.chunk_count {
            let chunk = chunk_object(client, object, chunk_id);
            let chunk_result = Arc::new(StatusResult::default());
            object::status_run(client, semantics, &chunk, vec![chunk_result.clone()]).await?;

            original_size += chunk_result.original_size();
            transformed_size += chunk_result.transformed_size();
            modification_time = modification_time.max(chunk_result.modification_time());
        }

        result
            .modification_time
            .store(modification_time, Ordering::SeqCst);
        result.original_size.store(original_size, Ordering::SeqCst);
        result
            .transformed_size
            .store(transformed_size, Ordering::SeqCst);
        *result.transformation_type.lock().expect("lock poisoned") =
            Some(state.transformation_type);
        result.chunk_count.store(state.chunk_count, Ordering::SeqCst);
        result.chunk_size.store(state.chunk_size, Ordering::SeqCst);
    }
    Ok(())
}
