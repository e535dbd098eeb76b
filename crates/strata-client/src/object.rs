//! Transformation objects: byte-addressable objects whose stored payload is
//! an encoding of the logical bytes.
//!
//! Every public operation enqueues into a [`Batch`](crate::Batch); the
//! `*_run` functions in this module are the executors the batch dispatches
//! runs to. Each run targets one object and becomes a single framed message
//! (or one pass over the local backend).

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use strata_backend::{ObjectHandle as _, ObjectStore as _};
use strata_message::{Message, MessageError, MessageType, read_bulk};
use strata_transform::Transformation;
use strata_types::{
    BackendKind, Safety, Semantics, TransformationCaller, TransformationMode, TransformationType,
    ObjectMeta, server_index,
};
use tracing::debug;

use crate::batch::Batch;
use crate::{Client, ClientError};

/// Cached per-object view of the KV metadata record.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ObjectState {
    pub transformation: Option<Transformation>,
    pub original_size: u64,
    pub transformed_size: u64,
}

/// A named object with a transparent payload transformation.
///
/// Constructing one performs no I/O; the transformation and sizes are
/// established by `create` or loaded lazily from the KV metadata record.
pub struct TransformationObject {
    index: u32,
    namespace: String,
    name: String,
    state: Mutex<ObjectState>,
}

impl TransformationObject {
    /// Pure allocation: derives the server index from the name.
    pub fn new(client: &Client, namespace: &str, name: &str) -> Arc<Self> {
        let count = client.config().server_count(BackendKind::Object);
        Arc::new(Self {
            index: server_index(name, count),
            namespace: namespace.to_owned(),
            name: name.to_owned(),
            state: Mutex::new(ObjectState::default()),
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

    pub(crate) fn state(&self) -> ObjectState {
        *self.state.lock().expect("lock poisoned")
    }

    pub(crate) fn update_state(&self, f: impl FnOnce(&mut ObjectState)) {
        f(&mut self.state.lock().expect("lock poisoned"));
    }

    /// Enqueue creation of the underlying object and its metadata record.
    pub fn create(
        self: &Arc<Self>,
        ty: TransformationType,
        mode: TransformationMode,
        batch: &mut Batch<'_>,
    ) {
        self.update_state(|state| {
            state.transformation = Some(Transformation::new(ty, mode));
            state.original_size = 0;
            state.transformed_size = 0;
        });
        batch.push_create(self.clone());
    }

    /// Enqueue deletion of the object and its metadata record.
    pub fn delete(self: &Arc<Self>, batch: &mut Batch<'_>) {
        batch.push_delete(self.clone());
    }

    /// Enqueue a status query. The result materialises after the batch
    /// executes.
    pub fn status(self: &Arc<Self>, batch: &mut Batch<'_>) -> Arc<StatusResult> {
        let result = Arc::new(StatusResult::default());
        batch.push_status(self.clone(), result.clone());
        result
    }

    /// Enqueue a read of `buf.len()` logical bytes at `offset`.
    ///
    /// Requests larger than `max_operation_size` are split here; every
    /// split accumulates into the same `bytes_read` counter.
    pub fn read<'a>(
        self: &Arc<Self>,
        buf: &'a mut [u8],
        offset: u64,
        bytes_read: &'a AtomicU64,
        batch: &mut Batch<'a>,
    ) {
        if buf.is_empty() {
            debug!(name = %self.name, "ignoring empty read");
            return;
        }
        bytes_read.store(0, Ordering::SeqCst);

        let max = batch.client().config().max_operation_size as usize;
        let mut chunk_offset = offset;
        for chunk in buf.chunks_mut(max) {
            let len = chunk.len() as u64;
            batch.push_read(
                self.clone(),
                ReadOp {
                    buf: chunk,
                    offset: chunk_offset,
                    bytes_read,
                },
            );
            chunk_offset += len;
        }
    }

    /// Enqueue a write of `data` at `offset`, split at
    /// `max_operation_size` boundaries.
    pub fn write<'a>(
        self: &Arc<Self>,
        data: &'a [u8],
        offset: u64,
        bytes_written: &'a AtomicU64,
        batch: &mut Batch<'a>,
    ) {
        if data.is_empty() {
            debug!(name = %self.name, "ignoring empty write");
            return;
        }
        bytes_written.store(0, Ordering::SeqCst);

        let max = batch.client().config().max_operation_size as usize;
        let mut chunk_offset = offset;
        for chunk in data.chunks(max) {
            let len = chunk.len() as u64;
            batch.push_write(
                self.clone(),
                WriteOp {
                    data: chunk,
                    offset: chunk_offset,
                    bytes_written,
                },
            );
            chunk_offset += len;
        }
    }
}

/// Out-slot for a status operation, filled during batch execution.
#[derive(Debug, Default)]
pub struct StatusResult {
    modification_time: AtomicI64,
    original_size: AtomicU64,
    transformed_size: AtomicU64,
    transformation_type: Mutex<Option<TransformationType>>,
}

impl StatusResult {
    pub fn modification_time(&self) -> i64 {
        self.modification_time.load(Ordering::SeqCst)
    }

    /// Logical (pre-encoding) size.
    pub fn original_size(&self) -> u64 {
        self.original_size.load(Ordering::SeqCst)
    }

    /// Bytes actually stored.
    pub fn transformed_size(&self) -> u64 {
        self.transformed_size.load(Ordering::SeqCst)
    }

    pub fn transformation_type(&self) -> Option<TransformationType> {
        *self.transformation_type.lock().expect("lock poisoned")
    }

    pub(crate) fn fill(
        &self,
        modification_time: i64,
        original_size: u64,
        transformed_size: u64,
        ty: TransformationType,
    ) {
        self.modification_time
            .store(modification_time, Ordering::SeqCst);
        self.original_size.store(original_size, Ordering::SeqCst);
        self.transformed_size
            .store(transformed_size, Ordering::SeqCst);
        *self.transformation_type.lock().expect("lock poisoned") = Some(ty);
    }
}

/// Per-operation payload of a read.
pub(crate) struct ReadOp<'a> {
    pub buf: &'a mut [u8],
    pub offset: u64,
    pub bytes_read: &'a AtomicU64,
}

/// Per-operation payload of a write.
pub(crate) struct WriteOp<'a> {
    pub data: &'a [u8],
    pub offset: u64,
    pub bytes_written: &'a AtomicU64,
}

// ---------------------------------------------------------------------------
// Metadata bootstrap
// ---------------------------------------------------------------------------

fn decode_meta(object: &TransformationObject, bytes: &[u8]) -> Result<ObjectMeta, ClientError> {
    postcard::from_bytes(bytes).map_err(|e| ClientError::CorruptMetadata {
        namespace: object.namespace.clone(),
        name: object.name.clone(),
        reason: e.to_string(),
    })
}

/// Load the transformation and sizes from the KV record.
///
/// A present underlying object with no KV record is treated as
/// untransformed: identity codec, client mode, sizes equal to the physical
/// size reported by the backend.
pub(crate) async fn load_metadata(
    client: &Client,
    object: &TransformationObject,
) -> Result<Transformation, ClientError> {
    match client.kv_get(&object.namespace, &object.name).await? {
        Some(bytes) => {
            let meta = decode_meta(object, &bytes)?;
            let transformation =
                Transformation::new(meta.transformation_type, meta.transformation_mode);
            object.update_state(|state| {
                state.transformation = Some(transformation);
                state.original_size = meta.original_size;
                state.transformed_size = meta.transformed_size;
            });
            Ok(transformation)
        }
        None => {
            let status = physical_status(client, object).await?;
            let transformation =
                Transformation::new(TransformationType::None, TransformationMode::Client);
            object.update_state(|state| {
                state.transformation = Some(transformation);
                state.original_size = status.size;
                state.transformed_size = status.size;
            });
            debug!(
                namespace = %object.namespace,
                name = %object.name,
                size = status.size,
                "no metadata record, treating object as untransformed"
            );
            Ok(transformation)
        }
    }
}

/// The cached transformation, loading the metadata record on first use.
async fn ensure_transformation(
    client: &Client,
    object: &TransformationObject,
) -> Result<Transformation, ClientError> {
    if let Some(transformation) = object.state().transformation {
        return Ok(transformation);
    }
    load_metadata(client, object).await
}

/// Refresh only the cached sizes from the KV record.
async fn refresh_sizes(client: &Client, object: &TransformationObject) -> Result<(), ClientError> {
    if let Some(bytes) = client.kv_get(&object.namespace, &object.name).await? {
        let meta = decode_meta(object, &bytes)?;
        object.update_state(|state| {
            state.original_size = meta.original_size;
            state.transformed_size = meta.transformed_size;
        });
    }
    Ok(())
}

/// Rewrite the KV metadata record from the cached state.
pub(crate) async fn update_stored_metadata(
    client: &Client,
    object: &TransformationObject,
    semantics: &Semantics,
) -> Result<(), ClientError> {
    let state = object.state();
    let Some(transformation) = state.transformation else {
        return Err(ClientError::InputInvalid("object has no transformation"));
    };
    let meta = ObjectMeta {
        transformation_type: transformation.transformation_type(),
        transformation_mode: transformation.mode(),
        original_size: state.original_size,
        transformed_size: state.transformed_size,
    };
    let bytes = postcard::to_allocvec(&meta)?;
    client
        .kv_put(&object.namespace, &object.name, &bytes, semantics)
        .await
}

/// Modification time and physical size straight from the backend.
async fn physical_status(
    client: &Client,
    object: &TransformationObject,
) -> Result<strata_backend::ObjectStatus, ClientError> {
    if let Some(store) = client.object_store() {
        let mut handle = store.open(&object.namespace, &object.name).await?;
        return Ok(handle.status().await?);
    }

    let mut request = Message::new(MessageType::TransformationObjectStatus);
    request.append_str(&object.namespace);
    request.add_operation();
    request.append_str(&object.name);

    client
        .with_connection(BackendKind::Object, object.index, async |connection| {
            request.send(connection.stream()).await?;
            let mut reply = Message::receive_reply(connection.stream(), &request).await?;
            Ok(strata_backend::ObjectStatus {
                modification_time: reply.get_i64()?,
                size: reply.get_u64()?,
            })
        })
        .await
}

// ---------------------------------------------------------------------------
// Create / delete
// ---------------------------------------------------------------------------

pub(crate) async fn create_run(
    client: &Client,
    semantics: &Semantics,
    object: &Arc<TransformationObject>,
    count: usize,
) -> Result<(), ClientError> {
    if let Some(store) = client.object_store() {
        for _ in 0..count {
            let handle = store.create(&object.namespace, &object.name).await?;
            drop(handle);
            update_stored_metadata(client, object, semantics).await?;
        }
        return Ok(());
    }

    let mut request = Message::new(MessageType::TransformationObjectCreate);
    request.set_safety(semantics);
    request.append_str(&object.namespace);
    for _ in 0..count {
        request.add_operation();
        request.append_str(&object.name);
        update_stored_metadata(client, object, semantics).await?;
    }

    client
        .with_connection(BackendKind::Object, object.index, async |connection| {
            request.send(connection.stream()).await?;
            if request.wants_reply() {
                // One empty operation record per create; nothing to parse.
                Message::receive_reply(connection.stream(), &request).await?;
            }
            Ok(())
        })
        .await
}

pub(crate) async fn delete_run(
    client: &Client,
    semantics: &Semantics,
    object: &Arc<TransformationObject>,
    count: usize,
) -> Result<(), ClientError> {
    if let Some(store) = client.object_store() {
        for _ in 0..count {
            client
                .kv_delete(&object.namespace, &object.name, semantics)
                .await?;
            let handle = store.open(&object.namespace, &object.name).await?;
            handle.delete().await?;
        }
        return Ok(());
    }

    let mut request = Message::new(MessageType::TransformationObjectDelete);
    request.set_safety(semantics);
    request.append_str(&object.namespace);
    for _ in 0..count {
        request.add_operation();
        request.append_str(&object.name);
        client
            .kv_delete(&object.namespace, &object.name, semantics)
            .await?;
    }

    client
        .with_connection(BackendKind::Object, object.index, async |connection| {
            request.send(connection.stream()).await?;
            if request.wants_reply() {
                Message::receive_reply(connection.stream(), &request).await?;
            }
            Ok(())
        })
        .await
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

pub(crate) async fn status_run(
    client: &Client,
    _semantics: &Semantics,
    object: &Arc<TransformationObject>,
    results: Vec<Arc<StatusResult>>,
) -> Result<(), ClientError> {
    if let Some(store) = client.object_store() {
        for result in results {
            let mut handle = store.open(&object.namespace, &object.name).await?;
            let status = handle.status().await?;
            drop(handle);

            let transformation = load_metadata(client, object).await?;
            let state = object.state();
            result.fill(
                status.modification_time,
                state.original_size,
                state.transformed_size,
                transformation.transformation_type(),
            );
        }
        return Ok(());
    }

    let mut request = Message::new(MessageType::TransformationObjectStatus);
    request.append_str(&object.namespace);
    for _ in &results {
        request.add_operation();
        request.append_str(&object.name);
    }

    let times = client
        .with_connection(BackendKind::Object, object.index, async |connection| {
            request.send(connection.stream()).await?;
            let mut reply = Message::receive_reply(connection.stream(), &request).await?;

            let mut times = Vec::with_capacity(results.len());
            for _ in 0..results.len() {
                let modification_time = reply.get_i64()?;
                // The physical size is not a trustworthy proxy for the
                // logical sizes; only the mtime is taken from the reply.
                let _physical_size = reply.get_u64()?;
                times.push(modification_time);
            }
            Ok(times)
        })
        .await?;

    for (result, modification_time) in results.iter().zip(times) {
        let transformation = load_metadata(client, object).await?;
        let state = object.state();
        result.fill(
            modification_time,
            state.original_size,
            state.transformed_size,
            transformation.transformation_type(),
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Read
// ---------------------------------------------------------------------------

/// Copy the caller's window out of a decoded whole-object buffer.
fn copy_window(logical: &[u8], buf: &mut [u8], offset: u64) -> u64 {
    let offset = offset as usize;
    if offset >= logical.len() {
        return 0;
    }
    let n = buf.len().min(logical.len() - offset);
    buf[..n].copy_from_slice(&logical[offset..offset + n]);
    n as u64
}

pub(crate) async fn read_run(
    client: &Client,
    semantics: &Semantics,
    object: &Arc<TransformationObject>,
    ops: Vec<ReadOp<'_>>,
) -> Result<(), ClientError> {
    let transformation = ensure_transformation(client, object).await?;
    let whole = !transformation.partial_access();
    let caller = if transformation.mode() == TransformationMode::Server {
        TransformationCaller::ServerRead
    } else {
        TransformationCaller::ClientRead
    };

    if let Some(store) = client.object_store() {
        let mut handle = store.open(&object.namespace, &object.name).await?;

        for op in ops {
            if whole {
                refresh_sizes(client, object).await?;
                let state = object.state();

                let mut stored = vec![0u8; state.transformed_size as usize];
                let n = handle.read(&mut stored, 0).await?;
                stored.truncate(n as usize);

                let logical = match transformation.apply(caller, &stored, 0)? {
                    Some((logical, _)) => logical,
                    None => stored,
                };
                let copied = copy_window(&logical, op.buf, op.offset);
                op.bytes_read.fetch_add(copied, Ordering::SeqCst);
            } else {
                let n = handle.read(op.buf, op.offset).await?;
                transformation.apply_in_place(caller, &mut op.buf[..n as usize]);
                op.bytes_read.fetch_add(n, Ordering::SeqCst);
            }
        }
        return Ok(());
    }

    refresh_sizes(client, object).await?;
    let state = object.state();

    let mut request = Message::new(MessageType::TransformationObjectRead);
    request.set_safety(semantics);
    request.append_str(&object.namespace);
    request.append_str(&object.name);
    request.append_u8(transformation.mode() as u8);
    request.append_u8(transformation.transformation_type() as u8);
    request.append_u64(state.original_size);
    request.append_u64(state.transformed_size);

    for op in &ops {
        request.add_operation();
        if whole && transformation.mode() != TransformationMode::Server {
            // The whole stored object comes back for every operation; the
            // window is cut out after decoding.
            request.append_u64(state.transformed_size);
            request.append_u64(0);
        } else {
            request.append_u64(op.buf.len() as u64);
            request.append_u64(op.offset);
        }
    }

    let server_mode = transformation.mode() == TransformationMode::Server;
    client
        .with_connection(BackendKind::Object, object.index, async |connection| {
            request.send(connection.stream()).await?;

            let expected = request.operation_count();
            let mut done = 0u32;
            let mut op_iter = ops.into_iter();

            // The server may split the reply across multiple datagrams,
            // each with its own operation count.
            while done < expected {
                let mut reply = Message::receive_reply(connection.stream(), &request).await?;
                let reply_count = reply.operation_count();
                if done + reply_count > expected {
                    return Err(MessageError::CountMismatch {
                        expected,
                        got: done + reply_count,
                    }
                    .into());
                }

                for _ in 0..reply_count {
                    let Some(op) = op_iter.next() else { break };
                    let nbytes = reply.get_u64()? as usize;
                    if nbytes == 0 {
                        continue;
                    }

                    if whole && !server_mode {
                        let mut stored = vec![0u8; nbytes];
                        read_bulk(connection.stream(), &mut stored).await?;
                        let logical = match transformation.apply(caller, &stored, 0)? {
                            Some((logical, _)) => logical,
                            None => stored,
                        };
                        let copied = copy_window(&logical, op.buf, op.offset);
                        op.bytes_read.fetch_add(copied, Ordering::SeqCst);
                    } else {
                        let n = nbytes.min(op.buf.len());
                        read_bulk(connection.stream(), &mut op.buf[..n]).await?;
                        if nbytes > n {
                            // Drain payload beyond the requested window.
                            let mut excess = vec![0u8; nbytes - n];
                            read_bulk(connection.stream(), &mut excess).await?;
                        }
                        if !server_mode {
                            transformation.apply_in_place(caller, &mut op.buf[..n]);
                        }
                        op.bytes_read.fetch_add(n as u64, Ordering::SeqCst);
                    }
                }
                done += reply_count;
            }
            Ok(())
        })
        .await
}

// ---------------------------------------------------------------------------
// Write
// ---------------------------------------------------------------------------

/// Fetch and decode the object's current logical content.
///
/// Used by the whole-object write path. Issues a single-operation read —
/// locally, or as its own network round before the write connection is
/// leased.
async fn fetch_decoded(
    client: &Client,
    object: &TransformationObject,
    transformation: Transformation,
) -> Result<Vec<u8>, ClientError> {
    let state = object.state();
    if state.transformed_size == 0 {
        return Ok(Vec::new());
    }

    let stored = if let Some(store) = client.object_store() {
        let mut handle = store.open(&object.namespace, &object.name).await?;
        let mut stored = vec![0u8; state.transformed_size as usize];
        let n = handle.read(&mut stored, 0).await?;
        stored.truncate(n as usize);
        stored
    } else {
        let mut request = Message::new(MessageType::TransformationObjectRead);
        request.append_str(&object.namespace);
        request.append_str(&object.name);
        request.append_u8(transformation.mode() as u8);
        request.append_u8(transformation.transformation_type() as u8);
        request.append_u64(state.original_size);
        request.append_u64(state.transformed_size);
        request.add_operation();
        request.append_u64(state.transformed_size);
        request.append_u64(0);

        client
            .with_connection(BackendKind::Object, object.index, async |connection| {
                request.send(connection.stream()).await?;
                let mut reply = Message::receive_reply(connection.stream(), &request).await?;
                let nbytes = reply.get_u64()? as usize;
                let mut stored = vec![0u8; nbytes];
                read_bulk(connection.stream(), &mut stored).await?;
                Ok(stored)
            })
            .await?
    };

    Ok(transformation.decode(&stored)?)
}

pub(crate) async fn write_run(
    client: &Client,
    semantics: &Semantics,
    object: &Arc<TransformationObject>,
    ops: Vec<WriteOp<'_>>,
) -> Result<(), ClientError> {
    let transformation = ensure_transformation(client, object).await?;
    let whole = !transformation.partial_access();
    let server_mode = transformation.mode() == TransformationMode::Server;
    let caller = if server_mode {
        TransformationCaller::ServerWrite
    } else {
        TransformationCaller::ClientWrite
    };

    if let Some(store) = client.object_store() {
        let mut handle = store.open(&object.namespace, &object.name).await?;

        for op in ops {
            if whole {
                refresh_sizes(client, object).await?;
                let mut logical = fetch_decoded(client, object, transformation).await?;

                let end = (op.offset as usize) + op.data.len();
                if logical.len() < end {
                    logical.resize(end, 0);
                }
                logical[op.offset as usize..end].copy_from_slice(op.data);

                let encoded = transformation.encode(&logical);
                handle.write(&encoded, 0).await?;

                object.update_state(|state| {
                    state.original_size = logical.len() as u64;
                    state.transformed_size = encoded.len() as u64;
                });
                update_stored_metadata(client, object, semantics).await?;
                op.bytes_written
                    .fetch_add(op.data.len() as u64, Ordering::SeqCst);
            } else {
                let n = match transformation.apply(caller, op.data, op.offset)? {
                    Some((encoded, offset)) => handle.write(&encoded, offset).await?,
                    None => handle.write(op.data, op.offset).await?,
                };
                op.bytes_written.fetch_add(n, Ordering::SeqCst);

                refresh_sizes(client, object).await?;
                let end = op.offset + op.data.len() as u64;
                if end > object.state().original_size {
                    object.update_state(|state| {
                        state.original_size = end;
                        state.transformed_size = end;
                    });
                    update_stored_metadata(client, object, semantics).await?;
                }
            }
        }
        return Ok(());
    }

    refresh_sizes(client, object).await?;
    let state = object.state();

    let mut request = Message::new(MessageType::TransformationObjectWrite);
    request.set_safety(semantics);
    if server_mode && semantics.safety == Safety::None {
        // The reply carries the authoritative new sizes; without it the
        // metadata record would go stale.
        request.force_safety(Safety::Network);
    }
    request.append_str(&object.namespace);
    request.append_str(&object.name);
    request.append_u8(transformation.mode() as u8);
    request.append_u8(transformation.transformation_type() as u8);
    request.append_u64(state.original_size);
    request.append_u64(state.transformed_size);

    let fake_locally = !request.wants_reply();
    // (user length, counter) pairs for the reply loop.
    let mut pending: Vec<(u64, &AtomicU64)> = Vec::with_capacity(ops.len());
    // Running logical image for the whole-object codecs. The server sees
    // nothing from this run until the message is sent, so later operations
    // must patch the image the earlier ones produced, not a fresh fetch of
    // the pre-run content.
    let mut logical_image: Option<Vec<u8>> = None;

    for op in &ops {
        let user_len = op.data.len() as u64;
        request.add_operation();

        if server_mode {
            request.append_u64(user_len);
            request.append_u64(op.offset);
            request.add_send(Bytes::copy_from_slice(op.data));
        } else if whole {
            let mut logical = match logical_image.take() {
                Some(logical) => logical,
                None => fetch_decoded(client, object, transformation).await?,
            };
            let end = (op.offset as usize) + op.data.len();
            if logical.len() < end {
                logical.resize(end, 0);
            }
            logical[op.offset as usize..end].copy_from_slice(op.data);

            let encoded = transformation.encode(&logical);
            request.append_u64(encoded.len() as u64);
            request.append_u64(0);

            object.update_state(|state| {
                state.original_size = logical.len() as u64;
                state.transformed_size = encoded.len() as u64;
            });
            update_stored_metadata(client, object, semantics).await?;
            request.add_send(Bytes::from(encoded));
            logical_image = Some(logical);
        } else {
            request.append_u64(user_len);
            request.append_u64(op.offset);
            match transformation.apply(caller, op.data, op.offset)? {
                Some((encoded, _)) => request.add_send(Bytes::from(encoded)),
                None => request.add_send(Bytes::copy_from_slice(op.data)),
            }

            let end = op.offset + user_len;
            if end > object.state().original_size {
                object.update_state(|state| {
                    state.original_size = end;
                    state.transformed_size = end;
                });
                update_stored_metadata(client, object, semantics).await?;
            }
        }

        if fake_locally {
            // No reply will come; the counter is updated before the batch
            // returns.
            op.bytes_written.fetch_add(user_len, Ordering::SeqCst);
        } else {
            pending.push((user_len, op.bytes_written));
        }
    }

    client
        .with_connection(BackendKind::Object, object.index, async |connection| {
            request.send(connection.stream()).await?;

            if request.wants_reply() {
                let mut reply = Message::receive_reply(connection.stream(), &request).await?;
                for (user_len, bytes_written) in &pending {
                    let nbytes = reply.get_u64()?;
                    if server_mode {
                        let original_size = reply.get_u64()?;
                        let transformed_size = reply.get_u64()?;
                        object.update_state(|state| {
                            state.original_size = original_size;
                            state.transformed_size = transformed_size;
                        });
                        bytes_written.fetch_add(nbytes, Ordering::SeqCst);
                    } else if whole {
                        // The wire carried the encoded object; credit the
                        // caller with their own bytes once acknowledged.
                        bytes_written.fetch_add(*user_len, Ordering::SeqCst);
                    } else {
                        bytes_written.fetch_add(nbytes, Ordering::SeqCst);
                    }
                }
            }
            Ok(())
        })
        .await?;

    if server_mode {
        update_stored_metadata(client, object, semantics).await?;
    }
    Ok(())
}
