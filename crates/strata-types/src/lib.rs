//! Shared types for the Strata storage framework.
//!
//! This crate defines the vocabulary used across the workspace:
//! transformation enums ([`TransformationType`], [`TransformationMode`],
//! [`TransformationCaller`]), batch semantics ([`Semantics`], [`Safety`]),
//! backend kinds, the persisted metadata records ([`ObjectMeta`],
//! [`ChunkedMeta`]) and the shared [`Configuration`].

pub mod config;

use serde::{Deserialize, Serialize};

pub use config::{BackendSpec, Configuration};

// ---------------------------------------------------------------------------
// Transformation vocabulary
// ---------------------------------------------------------------------------

/// Which encoding is applied to a transformation object's payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TransformationType {
    /// Identity — stored bytes equal logical bytes.
    #[default]
    None = 0,
    /// Each byte XORed with `0xFF`. Size-preserving.
    Xor = 1,
    /// Run-length encoding as `(copies, value)` pairs.
    Rle = 2,
    /// LZ4 block compression.
    Lz4 = 3,
}

impl TransformationType {
    /// Whether a byte range can be read or written without knowing its
    /// neighbourhood. Derived from the type: the size-preserving codecs
    /// support partial access, the compressing ones do not.
    pub fn partial_access(self) -> bool {
        matches!(self, TransformationType::None | TransformationType::Xor)
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::None),
            1 => Some(Self::Xor),
            2 => Some(Self::Rle),
            3 => Some(Self::Lz4),
            _ => None,
        }
    }
}

/// Which side of the connection owns the encode/decode step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TransformationMode {
    /// Client encodes on write and decodes on read.
    #[default]
    Client = 0,
    /// Data is encoded in transit: the writer encodes, the reader decodes.
    Transport = 1,
    /// Server encodes on write and decodes on read.
    Server = 2,
}

impl TransformationMode {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Client),
            1 => Some(Self::Transport),
            2 => Some(Self::Server),
            _ => None,
        }
    }
}

/// Identifies which code path is asking for a transformation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransformationCaller {
    ClientRead,
    ClientWrite,
    ServerRead,
    ServerWrite,
}

// ---------------------------------------------------------------------------
// Batch semantics
// ---------------------------------------------------------------------------

/// How many replies the server must emit and whether it must flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Safety {
    /// Fire and forget: writes elicit no reply.
    #[default]
    None,
    /// The server acknowledges every write group after accepting it.
    Network,
    /// The server additionally syncs to stable storage before acknowledging.
    Storage,
}

/// Reserved knob: per-batch atomicity. Currently not consulted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Atomicity {
    #[default]
    None,
    Operation,
    Batch,
}

/// Reserved knob: concurrency control. Currently not consulted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Concurrency {
    #[default]
    Overlapping,
    NonOverlapping,
    Serial,
}

/// Reserved knob: persistency requirements. Currently not consulted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Persistency {
    #[default]
    Eventual,
    Immediate,
}

/// Per-batch execution semantics.
///
/// Only [`Safety`] influences behaviour today; the remaining knobs are
/// carried for forward compatibility.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Semantics {
    pub safety: Safety,
    pub atomicity: Atomicity,
    pub concurrency: Concurrency,
    pub persistency: Persistency,
}

impl Semantics {
    /// Semantics with the given safety level and all other knobs defaulted.
    pub fn with_safety(safety: Safety) -> Self {
        Self {
            safety,
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Backend kinds
// ---------------------------------------------------------------------------

/// The two backend capability sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Object,
    Kv,
}

// ---------------------------------------------------------------------------
// Persisted metadata records
// ---------------------------------------------------------------------------

/// KV record describing a flat transformation object.
///
/// Stored under `(namespace, name)` next to the object itself; created and
/// deleted together with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub transformation_type: TransformationType,
    pub transformation_mode: TransformationMode,
    /// Logical (pre-encoding) size in bytes.
    pub original_size: u64,
    /// Bytes actually stored in the underlying object.
    pub transformed_size: u64,
}

/// KV record describing a chunked transformation object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkedMeta {
    pub transformation_type: TransformationType,
    pub transformation_mode: TransformationMode,
    /// Number of chunk objects currently backing the logical object.
    pub chunk_count: u64,
    /// Maximum logical size of each chunk. Immutable after create.
    pub chunk_size: u64,
}

// ---------------------------------------------------------------------------
// Placement
// ---------------------------------------------------------------------------

/// Derive the stable server index for an object name.
///
/// The first four little-endian bytes of `blake3(name)` reduced modulo the
/// server count. Both client and server use this function, so an object's
/// operations always land on the server that owns its bytes.
pub fn server_index(name: &str, server_count: usize) -> u32 {
    debug_assert!(server_count > 0);
    let hash = blake3::hash(name.as_bytes());
    let bytes: [u8; 4] = hash.as_bytes()[..4].try_into().expect("4 bytes");
    u32::from_le_bytes(bytes) % server_count as u32
}
