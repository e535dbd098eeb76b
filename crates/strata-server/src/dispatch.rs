//! Per-connection request dispatcher.
//!
//! Each accepted connection gets one worker task. The worker loops over
//! framed requests, fans them out to the backends, and assembles replies
//! according to the request's safety bits: reads and status queries always
//! reply, mutations reply only when a safety bit is set, and `STORAGE`
//! safety additionally syncs before acknowledging.

use std::sync::Arc;

use bytes::BytesMut;
use strata_backend::{KvStore, ObjectHandle, ObjectStore};
use strata_message::{Message, MessageType, read_bulk};
use strata_transform::Transformation;
use strata_types::{TransformationCaller, TransformationMode, TransformationType};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::error::ServerError;
use crate::scratch::ScratchRegion;
use crate::stats::Statistics;

/// Whole-object transformation state parsed from a
/// `TransformationObject*` read/write prefix, present when the server owns
/// the transformation.
struct ServerTransform {
    transformation: Transformation,
    original_size: u64,
    transformed_size: u64,
}

pub(crate) struct Worker {
    object_store: Option<Arc<dyn ObjectStore>>,
    kv_store: Option<Arc<KvStore>>,
    stripe_size: usize,
    stats: Statistics,
    global_stats: Arc<Statistics>,
}

impl Worker {
    pub fn new(
        object_store: Option<Arc<dyn ObjectStore>>,
        kv_store: Option<Arc<KvStore>>,
        stripe_size: usize,
        global_stats: Arc<Statistics>,
    ) -> Self {
        Self {
            object_store,
            kv_store,
            stripe_size,
            stats: Statistics::default(),
            global_stats,
        }
    }

    /// Drive one connection until it closes or a protocol error occurs.
    pub async fn run(mut self, mut stream: TcpStream) {
        if let Err(e) = stream.set_nodelay(true) {
            warn!(error = %e, "failed to disable Nagle on accepted connection");
        }
        let mut scratch = ScratchRegion::new(self.stripe_size);

        loop {
            let message = match Message::receive(&mut stream).await {
                Ok(message) => message,
                Err(e) => {
                    debug!(error = %e, "connection closed");
                    break;
                }
            };
            if let Err(e) = self.dispatch(&mut stream, &mut scratch, message).await {
                warn!(error = %e, "dropping connection after dispatch failure");
                break;
            }
        }

        self.stats.merge_into(&self.global_stats);
    }

    fn object_store(&self) -> Result<&Arc<dyn ObjectStore>, ServerError> {
        self.object_store
            .as_ref()
            .ok_or(ServerError::BackendUnavailable("object"))
    }

    fn kv_store(&self) -> Result<&Arc<KvStore>, ServerError> {
        self.kv_store
            .as_ref()
            .ok_or(ServerError::BackendUnavailable("kv"))
    }

    async fn dispatch(
        &mut self,
        stream: &mut TcpStream,
        scratch: &mut ScratchRegion,
        mut message: Message,
    ) -> Result<(), ServerError> {
        use MessageType::*;
        match message.message_type() {
            None => Ok(()),
            Ping => self.handle_ping(stream, &message).await,
            Statistics => self.handle_statistics(stream, &mut message).await,
            ObjectCreate | TransformationObjectCreate => {
                self.handle_create(stream, &mut message).await
            }
            ObjectDelete | TransformationObjectDelete => {
                self.handle_delete(stream, &mut message).await
            }
            ObjectStatus | TransformationObjectStatus => {
                self.handle_status(stream, &mut message).await
            }
            ObjectRead => self.handle_read(stream, scratch, &mut message, false).await,
            TransformationObjectRead => self.handle_read(stream, scratch, &mut message, true).await,
            ObjectWrite => self.handle_write(stream, &mut message, false).await,
            TransformationObjectWrite => self.handle_write(stream, &mut message, true).await,
            KvPut => self.handle_kv_put(stream, &mut message).await,
            KvDelete => self.handle_kv_delete(stream, &mut message).await,
            KvGet => self.handle_kv_get(stream, &mut message).await,
            KvGetAll => self.handle_kv_scan(stream, &mut message, false).await,
            KvGetByPrefix => self.handle_kv_scan(stream, &mut message, true).await,
        }
    }

    /// Parse the `(mode, type, original_size, transformed_size)` prefix of
    /// a transformation-object read/write. Returns state only when the
    /// server owns the transformation; client and transport modes are
    /// handled exactly like plain object operations.
    fn parse_transform_prefix(
        &self,
        message: &mut Message,
    ) -> Result<Option<ServerTransform>, ServerError> {
        let mode_byte = message.get_u8()?;
        let type_byte = message.get_u8()?;
        let original_size = message.get_u64()?;
        let transformed_size = message.get_u64()?;

        let mode = TransformationMode::from_u8(mode_byte)
            .ok_or_else(|| ServerError::Protocol(format!("bad transformation mode {mode_byte}")))?;
        let ty = TransformationType::from_u8(type_byte)
            .ok_or_else(|| ServerError::Protocol(format!("bad transformation type {type_byte}")))?;

        if mode != TransformationMode::Server {
            return Ok(Option::None);
        }
        Ok(Some(ServerTransform {
            transformation: Transformation::new(ty, mode),
            original_size,
            transformed_size,
        }))
    }

    // -------------------------------------------------------------------
    // Create / delete / status
    // -------------------------------------------------------------------

    async fn handle_create(
        &mut self,
        stream: &mut TcpStream,
        message: &mut Message,
    ) -> Result<(), ServerError> {
        let store = self.object_store()?.clone();
        let mut reply = message.wants_reply().then(|| Message::reply_to(message));
        let storage_safety = message.safety() == strata_types::Safety::Storage;

        let namespace = message.get_str()?;
        for _ in 0..message.operation_count() {
            let name = message.get_str()?;
            match store.create(&namespace, &name).await {
                Ok(mut handle) => {
                    self.stats.add(&self.stats.files_created, 1);
                    if storage_safety {
                        match handle.sync().await {
                            Ok(()) => self.stats.add(&self.stats.syncs, 1),
                            Err(e) => warn!(namespace, name, error = %e, "object sync failed"),
                        }
                    }
                }
                Err(e) => warn!(namespace, name, error = %e, "object create failed"),
            }
            if let Some(reply) = reply.as_mut() {
                reply.add_operation();
            }
        }

        if let Some(reply) = reply {
            reply.send(stream).await?;
        }
        Ok(())
    }

    async fn handle_delete(
        &mut self,
        stream: &mut TcpStream,
        message: &mut Message,
    ) -> Result<(), ServerError> {
        let store = self.object_store()?.clone();
        let mut reply = message.wants_reply().then(|| Message::reply_to(message));

        let namespace = message.get_str()?;
        for _ in 0..message.operation_count() {
            let name = message.get_str()?;
            match store.open(&namespace, &name).await {
                Ok(handle) => match handle.delete().await {
                    Ok(()) => self.stats.add(&self.stats.files_deleted, 1),
                    Err(e) => warn!(namespace, name, error = %e, "object delete failed"),
                },
                Err(e) => warn!(namespace, name, error = %e, "object open for delete failed"),
            }
            if let Some(reply) = reply.as_mut() {
                reply.add_operation();
            }
        }

        if let Some(reply) = reply {
            reply.send(stream).await?;
        }
        Ok(())
    }

    async fn handle_status(
        &mut self,
        stream: &mut TcpStream,
        message: &mut Message,
    ) -> Result<(), ServerError> {
        let store = self.object_store()?.clone();
        let mut reply = Message::reply_to(message);

        let namespace = message.get_str()?;
        for _ in 0..message.operation_count() {
            let name = message.get_str()?;
            let (modification_time, size) = match store.open(&namespace, &name).await {
                Ok(mut handle) => match handle.status().await {
                    Ok(status) => {
                        self.stats.add(&self.stats.files_stated, 1);
                        (status.modification_time, status.size)
                    }
                    Err(e) => {
                        warn!(namespace, name, error = %e, "object status failed");
                        (0, 0)
                    }
                },
                Err(e) => {
                    warn!(namespace, name, error = %e, "object open for status failed");
                    (0, 0)
                }
            };
            reply.add_operation();
            reply.append_i64(modification_time);
            reply.append_u64(size);
        }

        reply.send(stream).await?;
        Ok(())
    }

    // -------------------------------------------------------------------
    // Read
    // -------------------------------------------------------------------

    async fn handle_read(
        &mut self,
        stream: &mut TcpStream,
        scratch: &mut ScratchRegion,
        message: &mut Message,
        transformation_object: bool,
    ) -> Result<(), ServerError> {
        let store = self.object_store()?.clone();
        let namespace = message.get_str()?;
        let name = message.get_str()?;
        let server_transform = if transformation_object {
            self.parse_transform_prefix(message)?
        } else {
            Option::None
        };

        let mut handle = match store.open(&namespace, &name).await {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(namespace, name, error = %e, "object open for read failed");
                Option::None
            }
        };

        let mut reply = Message::reply_to(message);
        for _ in 0..message.operation_count() {
            let length = message.get_u64()? as usize;
            let offset = message.get_u64()?;

            // Stage the payload in the scratch region; when the region is
            // exhausted, flush the reply built so far and start fresh.
            let mut buf = match scratch.try_alloc(length) {
                Some(buf) => buf,
                Option::None => {
                    if reply.operation_count() > 0 {
                        reply.send(stream).await?;
                        reply = Message::reply_to(message);
                    }
                    scratch.reset();
                    match scratch.try_alloc(length) {
                        Some(buf) => buf,
                        // Larger than the whole region: one-off heap buffer.
                        Option::None => BytesMut::zeroed(length),
                    }
                }
            };

            // A failed backend read is a zero-byte result for this
            // operation, not a reason to drop the connection.
            let nbytes = match (&mut handle, &server_transform) {
                (Some(handle), Option::None) => match handle.read(&mut buf, offset).await {
                    Ok(n) => {
                        buf.truncate(n as usize);
                        n
                    }
                    Err(e) => {
                        warn!(namespace, name, error = %e, "object read failed");
                        0
                    }
                },
                (Some(handle), Some(state)) => {
                    self.server_transformed_read(handle, state, &mut buf, length, offset)
                        .await
                }
                (Option::None, _) => 0,
            };
            self.stats.add(&self.stats.bytes_read, nbytes);

            reply.add_operation();
            reply.append_u64(nbytes);
            if nbytes > 0 {
                reply.add_send(buf.freeze());
                self.stats.add(&self.stats.bytes_sent, nbytes);
            }
        }

        drop(handle);
        reply.send(stream).await?;
        scratch.reset();
        Ok(())
    }

    /// Server-owned read: decode the stored bytes before replying.
    ///
    /// Size-preserving codecs decode the requested range in place; the
    /// compressing ones round-trip the whole stored object and cut the
    /// caller's window out of the decoded buffer. `buf` is truncated to
    /// the bytes produced. Backend or decode failures are logged and
    /// reported as a zero-byte result.
    async fn server_transformed_read(
        &self,
        handle: &mut Box<dyn ObjectHandle>,
        state: &ServerTransform,
        buf: &mut BytesMut,
        length: usize,
        offset: u64,
    ) -> u64 {
        let transformation = state.transformation;
        if transformation.partial_access() {
            let n = match handle.read(buf, offset).await {
                Ok(n) => n,
                Err(e) => {
                    warn!(error = %e, "object read failed");
                    return 0;
                }
            };
            buf.truncate(n as usize);
            transformation.apply_in_place(TransformationCaller::ServerRead, buf);
            return n;
        }

        let mut stored = vec![0u8; state.transformed_size as usize];
        let n = match handle.read(&mut stored, 0).await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "object read failed");
                return 0;
            }
        };
        stored.truncate(n as usize);

        let logical = match transformation.apply(TransformationCaller::ServerRead, &stored, 0) {
            Ok(Some((logical, _))) => logical,
            Ok(Option::None) => stored,
            Err(e) => {
                warn!(error = %e, "stored payload decode failed");
                return 0;
            }
        };

        let start = (offset as usize).min(logical.len());
        let end = (start + length).min(logical.len());
        let window = &logical[start..end];
        buf.truncate(window.len());
        buf.copy_from_slice(window);
        window.len() as u64
    }

    // -------------------------------------------------------------------
    // Write
    // -------------------------------------------------------------------

    async fn handle_write(
        &mut self,
        stream: &mut TcpStream,
        message: &mut Message,
        transformation_object: bool,
    ) -> Result<(), ServerError> {
        let store = self.object_store()?.clone();
        let namespace = message.get_str()?;
        let name = message.get_str()?;
        let server_transform = if transformation_object {
            self.parse_transform_prefix(message)?
        } else {
            Option::None
        };
        let storage_safety = message.safety() == strata_types::Safety::Storage;
        let mut reply = message.wants_reply().then(|| Message::reply_to(message));

        let mut handle = match store.open(&namespace, &name).await {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(namespace, name, error = %e, "object open for write failed");
                Option::None
            }
        };

        if let Some(mut state) = server_transform {
            // Server-owned transformation: no coalescing, each operation
            // is decoded/patched/encoded on its own and acknowledged with
            // the new sizes.
            for _ in 0..message.operation_count() {
                let length = message.get_u64()? as usize;
                let offset = message.get_u64()?;

                // The payload must always be drained to keep the stream
                // in sync, even when the object failed to open.
                let mut data = vec![0u8; length];
                read_bulk(stream, &mut data).await?;
                self.stats.add(&self.stats.bytes_received, length as u64);

                let nbytes = match &mut handle {
                    Some(handle) => {
                        self.server_transformed_write(handle, &mut state, &data, offset)
                            .await
                    }
                    Option::None => 0,
                };
                self.stats.add(&self.stats.bytes_written, nbytes);

                if let Some(reply) = reply.as_mut() {
                    reply.add_operation();
                    reply.append_u64(nbytes);
                    reply.append_u64(state.original_size);
                    reply.append_u64(state.transformed_size);
                }
            }
        } else {
            // Plain path: coalesce adjacent operations whose ranges abut
            // and whose combined payload fits the scratch budget.
            let mut merge_length = 0u64;
            let mut merge_offset = 0u64;

            for _ in 0..message.operation_count() {
                let length = message.get_u64()?;
                let offset = message.get_u64()?;

                if merge_length > 0
                    && merge_offset + merge_length == offset
                    && merge_length + length <= self.stripe_size as u64
                {
                    merge_length += length;
                } else {
                    if merge_length > 0 {
                        self.flush_write(stream, &mut handle, merge_offset, merge_length)
                            .await?;
                    }
                    merge_length = length;
                    merge_offset = offset;
                }

                if let Some(reply) = reply.as_mut() {
                    reply.add_operation();
                    reply.append_u64(length);
                }
            }
            if merge_length > 0 {
                self.flush_write(stream, &mut handle, merge_offset, merge_length)
                    .await?;
            }
        }

        if storage_safety && let Some(handle) = handle.as_mut() {
            match handle.sync().await {
                Ok(()) => self.stats.add(&self.stats.syncs, 1),
                Err(e) => warn!(namespace, name, error = %e, "object sync failed"),
            }
        }
        drop(handle);

        if let Some(reply) = reply {
            reply.send(stream).await?;
        }
        Ok(())
    }

    /// Receive one coalesced payload range and hand it to the backend.
    ///
    /// The payload is always drained to keep the stream in sync; a failed
    /// backend write is logged and dropped, it does not poison the
    /// connection.
    async fn flush_write(
        &mut self,
        stream: &mut TcpStream,
        handle: &mut Option<Box<dyn ObjectHandle>>,
        offset: u64,
        length: u64,
    ) -> Result<(), ServerError> {
        let mut data = vec![0u8; length as usize];
        read_bulk(stream, &mut data).await?;
        self.stats.add(&self.stats.bytes_received, length);

        if let Some(handle) = handle {
            match handle.write(&data, offset).await {
                Ok(nbytes) => self.stats.add(&self.stats.bytes_written, nbytes),
                Err(e) => warn!(error = %e, "object write failed"),
            }
        }
        Ok(())
    }

    /// Server-owned write: encode before storing.
    ///
    /// Backend or decode failures are logged and reported as zero bytes
    /// written; the sizes stay untouched for the reply.
    async fn server_transformed_write(
        &self,
        handle: &mut Box<dyn ObjectHandle>,
        state: &mut ServerTransform,
        data: &[u8],
        offset: u64,
    ) -> u64 {
        let transformation = state.transformation;

        if transformation.partial_access() {
            let mut encoded = data.to_vec();
            transformation.apply_in_place(TransformationCaller::ServerWrite, &mut encoded);
            let n = match handle.write(&encoded, offset).await {
                Ok(n) => n,
                Err(e) => {
                    warn!(error = %e, "object write failed");
                    return 0;
                }
            };
            let end = offset + data.len() as u64;
            state.original_size = state.original_size.max(end);
            state.transformed_size = state.original_size;
            return n;
        }

        // Whole-object codec: decode current content, patch, re-encode.
        let mut logical = if state.transformed_size > 0 {
            let mut stored = vec![0u8; state.transformed_size as usize];
            let n = match handle.read(&mut stored, 0).await {
                Ok(n) => n,
                Err(e) => {
                    warn!(error = %e, "object read failed");
                    return 0;
                }
            };
            stored.truncate(n as usize);
            match transformation.decode(&stored) {
                Ok(logical) => logical,
                Err(e) => {
                    warn!(error = %e, "stored payload decode failed");
                    return 0;
                }
            }
        } else {
            Vec::new()
        };

        let end = (offset as usize) + data.len();
        if logical.len() < end {
            logical.resize(end, 0);
        }
        logical[offset as usize..end].copy_from_slice(data);

        let encoded = transformation.encode(&logical);
        if let Err(e) = handle.write(&encoded, 0).await {
            warn!(error = %e, "object write failed");
            return 0;
        }

        state.original_size = logical.len() as u64;
        state.transformed_size = encoded.len() as u64;
        data.len() as u64
    }

    // -------------------------------------------------------------------
    // KV
    // -------------------------------------------------------------------

    async fn handle_kv_put(
        &mut self,
        stream: &mut TcpStream,
        message: &mut Message,
    ) -> Result<(), ServerError> {
        let kv = self.kv_store()?.clone();
        let mut reply = message.wants_reply().then(|| Message::reply_to(message));

        let namespace = message.get_str()?;
        let mut batch = kv.batch(&namespace);
        for _ in 0..message.operation_count() {
            let key = message.get_str()?;
            let len = message.get_u32()? as usize;
            let value = message.get_bytes(len)?;
            batch.put(&key, value);

            if let Some(reply) = reply.as_mut() {
                reply.add_operation();
            }
        }
        kv.apply(batch)?;

        if let Some(reply) = reply {
            reply.send(stream).await?;
        }
        Ok(())
    }

    async fn handle_kv_delete(
        &mut self,
        stream: &mut TcpStream,
        message: &mut Message,
    ) -> Result<(), ServerError> {
        let kv = self.kv_store()?.clone();
        let mut reply = message.wants_reply().then(|| Message::reply_to(message));

        let namespace = message.get_str()?;
        let mut batch = kv.batch(&namespace);
        for _ in 0..message.operation_count() {
            let key = message.get_str()?;
            batch.delete(&key);

            if let Some(reply) = reply.as_mut() {
                reply.add_operation();
            }
        }
        kv.apply(batch)?;

        if let Some(reply) = reply {
            reply.send(stream).await?;
        }
        Ok(())
    }

    async fn handle_kv_get(
        &mut self,
        stream: &mut TcpStream,
        message: &mut Message,
    ) -> Result<(), ServerError> {
        let kv = self.kv_store()?.clone();
        let mut reply = Message::reply_to(message);

        let namespace = message.get_str()?;
        for _ in 0..message.operation_count() {
            let key = message.get_str()?;
            reply.add_operation();
            match kv.get(&namespace, &key)? {
                Some(value) => {
                    reply.append_u32(value.len() as u32);
                    reply.append_bytes(&value);
                }
                Option::None => reply.append_u32(0),
            }
        }

        reply.send(stream).await?;
        Ok(())
    }

    async fn handle_kv_scan(
        &mut self,
        stream: &mut TcpStream,
        message: &mut Message,
        by_prefix: bool,
    ) -> Result<(), ServerError> {
        let kv = self.kv_store()?.clone();
        let mut reply = Message::reply_to(message);

        let namespace = message.get_str()?;
        let entries = if by_prefix {
            let prefix = message.get_str()?;
            kv.get_by_prefix(&namespace, &prefix)?
        } else {
            kv.get_all(&namespace)?
        };

        for (_key, value) in entries {
            reply.add_operation();
            reply.append_u32(value.len() as u32);
            reply.append_bytes(&value);
        }
        // A zero length signals end-of-iteration.
        reply.add_operation();
        reply.append_u32(0);

        reply.send(stream).await?;
        Ok(())
    }

    // -------------------------------------------------------------------
    // Ping / statistics
    // -------------------------------------------------------------------

    async fn handle_ping(
        &self,
        stream: &mut TcpStream,
        message: &Message,
    ) -> Result<(), ServerError> {
        let mut reply = Message::reply_to(message);
        if self.object_store.is_some() {
            reply.add_operation();
            reply.append_str("object");
        }
        if self.kv_store.is_some() {
            reply.add_operation();
            reply.append_str("kv");
        }
        reply.send(stream).await?;
        Ok(())
    }

    async fn handle_statistics(
        &self,
        stream: &mut TcpStream,
        message: &mut Message,
    ) -> Result<(), ServerError> {
        let get_all = message.get_u8()? != 0;
        let snapshot = if get_all {
            self.global_stats.snapshot()
        } else {
            self.stats.snapshot()
        };

        let mut reply = Message::reply_to(message);
        reply.add_operation();
        reply.append_u64(snapshot.files_created);
        reply.append_u64(snapshot.files_deleted);
        reply.append_u64(snapshot.files_stated);
        reply.append_u64(snapshot.syncs);
        reply.append_u64(snapshot.bytes_read);
        reply.append_u64(snapshot.bytes_written);
        reply.append_u64(snapshot.bytes_received);
        reply.append_u64(snapshot.bytes_sent);

        reply.send(stream).await?;
        Ok(())
    }
}
