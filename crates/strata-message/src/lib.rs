//! Framed request/reply protocol spoken between Strata clients and servers.
//!
//! A message is a fixed 12-byte little-endian header followed by an
//! append-ordered payload region:
//!
//! ```text
//! length u32 | id u32 | flags u8 | type u8 | count u16
//! ```
//!
//! `length` counts the payload bytes following the header. Writers append
//! primitives in order; readers consume them in the same order. Bulk data
//! attached with [`Message::add_send`] is written to the socket *after* the
//! framed body and is not counted in `length` — receivers pull it straight
//! off the stream, one run per operation.

mod error;

use std::sync::atomic::{AtomicU32, Ordering};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use strata_types::{Safety, Semantics};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub use error::MessageError;

/// Upper bound on a single frame's payload: 64 MiB.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Reply bit in the `flags` field.
pub const FLAG_REPLY: u8 = 0x01;
/// Safety-storage bit in the `flags` field.
pub const FLAG_SAFETY_STORAGE: u8 = 0x02;
/// Safety-network bit in the `flags` field.
pub const FLAG_SAFETY_NETWORK: u8 = 0x04;

const HEADER_LEN: usize = 12;

static NEXT_ID: AtomicU32 = AtomicU32::new(1);

fn next_message_id() -> u32 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Message kinds. The numeric assignment is fixed across client and server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    None = 0,
    Ping = 1,
    Statistics = 2,
    ObjectCreate = 3,
    ObjectDelete = 4,
    ObjectRead = 5,
    ObjectStatus = 6,
    ObjectWrite = 7,
    KvPut = 8,
    KvDelete = 9,
    KvGet = 10,
    KvGetAll = 11,
    KvGetByPrefix = 12,
    TransformationObjectCreate = 13,
    TransformationObjectDelete = 14,
    TransformationObjectRead = 15,
    TransformationObjectStatus = 16,
    TransformationObjectWrite = 17,
}

impl MessageType {
    pub fn from_u8(v: u8) -> Option<Self> {
        use MessageType::*;
        Some(match v {
            0 => None,
            1 => Ping,
            2 => Statistics,
            3 => ObjectCreate,
            4 => ObjectDelete,
            5 => ObjectRead,
            6 => ObjectStatus,
            7 => ObjectWrite,
            8 => KvPut,
            9 => KvDelete,
            10 => KvGet,
            11 => KvGetAll,
            12 => KvGetByPrefix,
            13 => TransformationObjectCreate,
            14 => TransformationObjectDelete,
            15 => TransformationObjectRead,
            16 => TransformationObjectStatus,
            17 => TransformationObjectWrite,
            _ => return Option::None,
        })
    }
}

/// A framed protocol message.
///
/// One `Message` value serves both roles: writers build it with the
/// `append_*` primitives and [`send`](Message::send) it; readers obtain one
/// from [`receive`](Message::receive) and drain it with the `get_*`
/// primitives.
#[derive(Debug)]
pub struct Message {
    id: u32,
    flags: u8,
    ty: MessageType,
    count: u16,
    body: BytesMut,
    cursor: usize,
    send_list: Vec<Bytes>,
}

impl Message {
    /// Create an empty message of the given kind with a fresh id.
    pub fn new(ty: MessageType) -> Self {
        Self {
            id: next_message_id(),
            flags: 0,
            ty,
            count: 0,
            body: BytesMut::new(),
            cursor: 0,
            send_list: Vec::new(),
        }
    }

    /// Create a reply skeleton: same kind, same id, reply flag set.
    pub fn reply_to(request: &Message) -> Self {
        Self {
            id: request.id,
            flags: FLAG_REPLY,
            ty: request.ty,
            count: 0,
            body: BytesMut::new(),
            cursor: 0,
            send_list: Vec::new(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn message_type(&self) -> MessageType {
        self.ty
    }

    pub fn flags(&self) -> u8 {
        self.flags
    }

    pub fn is_reply(&self) -> bool {
        self.flags & FLAG_REPLY != 0
    }

    /// Number of logical operations carried by this message.
    pub fn operation_count(&self) -> u32 {
        self.count as u32
    }

    /// Record one more logical operation.
    pub fn add_operation(&mut self) {
        self.count += 1;
    }

    /// Set the safety bits from batch semantics.
    pub fn set_safety(&mut self, semantics: &Semantics) {
        self.force_safety(semantics.safety);
    }

    /// Overwrite the safety bits with an explicit level.
    pub fn force_safety(&mut self, safety: Safety) {
        self.flags &= !(FLAG_SAFETY_NETWORK | FLAG_SAFETY_STORAGE);
        match safety {
            Safety::None => {}
            Safety::Network => self.flags |= FLAG_SAFETY_NETWORK,
            Safety::Storage => self.flags |= FLAG_SAFETY_STORAGE,
        }
    }

    /// The safety level encoded in the flags.
    pub fn safety(&self) -> Safety {
        if self.flags & FLAG_SAFETY_STORAGE != 0 {
            Safety::Storage
        } else if self.flags & FLAG_SAFETY_NETWORK != 0 {
            Safety::Network
        } else {
            Safety::None
        }
    }

    /// Whether any safety bit is set (the server must acknowledge).
    pub fn wants_reply(&self) -> bool {
        self.flags & (FLAG_SAFETY_NETWORK | FLAG_SAFETY_STORAGE) != 0
    }

    // -------------------------------------------------------------------
    // Append primitives
    // -------------------------------------------------------------------

    pub fn append_u8(&mut self, v: u8) {
        self.body.put_u8(v);
    }

    pub fn append_u32(&mut self, v: u32) {
        self.body.put_u32_le(v);
    }

    pub fn append_u64(&mut self, v: u64) {
        self.body.put_u64_le(v);
    }

    pub fn append_i64(&mut self, v: i64) {
        self.body.put_i64_le(v);
    }

    /// Append a NUL-terminated string.
    pub fn append_str(&mut self, s: &str) {
        self.body.put_slice(s.as_bytes());
        self.body.put_u8(0);
    }

    /// Append a raw byte run into the framed payload.
    pub fn append_bytes(&mut self, data: &[u8]) {
        self.body.put_slice(data);
    }

    /// Queue bulk data to be written after the framed body.
    pub fn add_send(&mut self, data: Bytes) {
        self.send_list.push(data);
    }

    // -------------------------------------------------------------------
    // Consume primitives
    // -------------------------------------------------------------------

    fn remaining(&self) -> &[u8] {
        &self.body[self.cursor..]
    }

    pub fn get_u8(&mut self) -> Result<u8, MessageError> {
        let mut rest = self.remaining();
        if rest.len() < 1 {
            return Err(MessageError::Truncated("u8"));
        }
        let v = rest.get_u8();
        self.cursor += 1;
        Ok(v)
    }

    pub fn get_u32(&mut self) -> Result<u32, MessageError> {
        let mut rest = self.remaining();
        if rest.len() < 4 {
            return Err(MessageError::Truncated("u32"));
        }
        let v = rest.get_u32_le();
        self.cursor += 4;
        Ok(v)
    }

    pub fn get_u64(&mut self) -> Result<u64, MessageError> {
        let mut rest = self.remaining();
        if rest.len() < 8 {
            return Err(MessageError::Truncated("u64"));
        }
        let v = rest.get_u64_le();
        self.cursor += 8;
        Ok(v)
    }

    pub fn get_i64(&mut self) -> Result<i64, MessageError> {
        let mut rest = self.remaining();
        if rest.len() < 8 {
            return Err(MessageError::Truncated("i64"));
        }
        let v = rest.get_i64_le();
        self.cursor += 8;
        Ok(v)
    }

    /// Consume a NUL-terminated string.
    pub fn get_str(&mut self) -> Result<String, MessageError> {
        let rest = self.remaining();
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(MessageError::Truncated("string"))?;
        let s = std::str::from_utf8(&rest[..nul]).map_err(|_| MessageError::InvalidUtf8)?;
        let s = s.to_owned();
        self.cursor += nul + 1;
        Ok(s)
    }

    /// Consume `len` raw bytes from the framed payload.
    pub fn get_bytes(&mut self, len: usize) -> Result<Vec<u8>, MessageError> {
        let rest = self.remaining();
        if rest.len() < len {
            return Err(MessageError::Truncated("bytes"));
        }
        let v = rest[..len].to_vec();
        self.cursor += len;
        Ok(v)
    }

    // -------------------------------------------------------------------
    // Socket I/O
    // -------------------------------------------------------------------

    /// Write the header, body and queued bulk data to the stream.
    pub async fn send<W>(&self, stream: &mut W) -> Result<(), MessageError>
    where
        W: AsyncWrite + Unpin,
    {
        let mut header = [0u8; HEADER_LEN];
        header[0..4].copy_from_slice(&(self.body.len() as u32).to_le_bytes());
        header[4..8].copy_from_slice(&self.id.to_le_bytes());
        header[8] = self.flags;
        header[9] = self.ty as u8;
        header[10..12].copy_from_slice(&self.count.to_le_bytes());

        stream.write_all(&header).await?;
        stream.write_all(&self.body).await?;
        for chunk in &self.send_list {
            stream.write_all(chunk).await?;
        }
        stream.flush().await?;
        Ok(())
    }

    /// Read one framed message from the stream.
    ///
    /// Bulk data following the frame is left in the stream for the caller.
    pub async fn receive<R>(stream: &mut R) -> Result<Message, MessageError>
    where
        R: AsyncRead + Unpin,
    {
        let mut header = [0u8; HEADER_LEN];
        stream.read_exact(&mut header).await?;

        let length = u32::from_le_bytes(header[0..4].try_into().expect("4 bytes")) as usize;
        let id = u32::from_le_bytes(header[4..8].try_into().expect("4 bytes"));
        let flags = header[8];
        let ty = MessageType::from_u8(header[9]).ok_or(MessageError::UnknownType(header[9]))?;
        let count = u16::from_le_bytes(header[10..12].try_into().expect("2 bytes"));

        if length > MAX_MESSAGE_SIZE {
            return Err(MessageError::TooLarge(length));
        }

        let mut body = BytesMut::zeroed(length);
        stream.read_exact(&mut body).await?;

        Ok(Message {
            id,
            flags,
            ty,
            count,
            body,
            cursor: 0,
            send_list: Vec::new(),
        })
    }

    /// Read a reply to `request`, verifying the reply flag and id.
    ///
    /// An id mismatch is a protocol error; the caller must drop the
    /// connection rather than return it to the pool.
    pub async fn receive_reply<R>(stream: &mut R, request: &Message) -> Result<Message, MessageError>
    where
        R: AsyncRead + Unpin,
    {
        let reply = Self::receive(stream).await?;
        if !reply.is_reply() {
            return Err(MessageError::NotAReply);
        }
        if reply.id != request.id {
            return Err(MessageError::IdMismatch {
                expected: request.id,
                got: reply.id,
            });
        }
        Ok(reply)
    }
}

/// Read exactly `buf.len()` bulk bytes that follow a framed message.
pub async fn read_bulk<R>(stream: &mut R, buf: &mut [u8]) -> Result<(), MessageError>
where
    R: AsyncRead + Unpin,
{
    stream.read_exact(buf).await?;
    Ok(())
}
