//! Payload transformations for Strata objects.
//!
//! A [`Transformation`] pairs a codec ([`TransformationType`]) with an
//! ownership mode ([`TransformationMode`]) that decides which side of the
//! connection encodes and which decodes. The `(mode, caller)` direction
//! policy is the single source of truth for who transforms what:
//!
//! | mode \ caller | ClientRead | ClientWrite | ServerRead | ServerWrite |
//! |---|---|---|---|---|
//! | Client    | inverse | forward | —       | —       |
//! | Transport | inverse | forward | forward | inverse |
//! | Server    | —       | —       | inverse | forward |

mod error;
pub mod rle;

use strata_types::{TransformationCaller, TransformationMode, TransformationType};

pub use error::TransformError;

/// What a given side must do with the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// The other side owns the transformation; pass bytes through.
    Skip,
    /// Encode.
    Forward,
    /// Decode.
    Inverse,
}

/// A payload transformation: codec plus ownership mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transformation {
    ty: TransformationType,
    mode: TransformationMode,
}

impl Transformation {
    pub fn new(ty: TransformationType, mode: TransformationMode) -> Self {
        Self { ty, mode }
    }

    pub fn transformation_type(&self) -> TransformationType {
        self.ty
    }

    pub fn mode(&self) -> TransformationMode {
        self.mode
    }

    /// Whether byte ranges can be edited without their neighbourhood.
    pub fn partial_access(&self) -> bool {
        self.ty.partial_access()
    }

    /// The direction policy for a given caller.
    pub fn direction(&self, caller: TransformationCaller) -> Direction {
        use TransformationCaller::*;
        use TransformationMode::*;
        match (self.mode, caller) {
            (Client, ClientRead) => Direction::Inverse,
            (Client, ClientWrite) => Direction::Forward,
            (Client, ServerRead | ServerWrite) => Direction::Skip,
            (Transport, ClientRead | ServerWrite) => Direction::Inverse,
            (Transport, ClientWrite | ServerRead) => Direction::Forward,
            (Server, ClientRead | ClientWrite) => Direction::Skip,
            (Server, ServerRead) => Direction::Inverse,
            (Server, ServerWrite) => Direction::Forward,
        }
    }

    /// Whether the caller must round-trip the whole object to honour a
    /// partial read or write.
    ///
    /// True only for the compressing codecs on the client-side paths; the
    /// server-side paths handle whole-object handling themselves.
    pub fn need_whole_object(&self, caller: TransformationCaller) -> bool {
        !self.partial_access()
            && matches!(
                caller,
                TransformationCaller::ClientRead | TransformationCaller::ClientWrite
            )
    }

    /// Apply the transformation for `caller`, allocating the output buffer.
    ///
    /// Returns `Ok(None)` when this side skips (the other side owns the
    /// transformation, or the codec is the identity) — the caller then uses
    /// the input bytes as they are. Otherwise returns the transformed bytes
    /// together with the offset at which they apply: the size-preserving
    /// codecs keep the caller's offset, the whole-object codecs always
    /// produce a buffer that starts at offset zero.
    pub fn apply(
        &self,
        caller: TransformationCaller,
        input: &[u8],
        offset: u64,
    ) -> Result<Option<(Vec<u8>, u64)>, TransformError> {
        if self.ty == TransformationType::None {
            return Ok(None);
        }

        let out = match self.direction(caller) {
            Direction::Skip => return Ok(None),
            Direction::Forward => self.encode(input),
            Direction::Inverse => self.decode(input)?,
        };

        let out_offset = if self.partial_access() { offset } else { 0 };
        Ok(Some((out, out_offset)))
    }

    /// In-place variant for the size-preserving codecs.
    ///
    /// Used on the partial read/write branches where the transformed bytes
    /// overwrite the buffer they came from. No-op when the direction policy
    /// says skip. Must not be called for the whole-object codecs.
    pub fn apply_in_place(&self, caller: TransformationCaller, buf: &mut [u8]) {
        debug_assert!(self.partial_access());
        match self.direction(caller) {
            Direction::Skip => {}
            Direction::Forward | Direction::Inverse => {
                // XOR is its own inverse; None is the identity.
                if self.ty == TransformationType::Xor {
                    for byte in buf.iter_mut() {
                        *byte ^= 0xFF;
                    }
                }
            }
        }
    }

    /// Encode raw bytes into the stored representation.
    pub fn encode(&self, input: &[u8]) -> Vec<u8> {
        match self.ty {
            TransformationType::None => input.to_vec(),
            TransformationType::Xor => input.iter().map(|b| b ^ 0xFF).collect(),
            TransformationType::Rle => rle::encode(input),
            TransformationType::Lz4 => lz4_flex::block::compress_prepend_size(input),
        }
    }

    /// Decode the stored representation back into raw bytes.
    pub fn decode(&self, input: &[u8]) -> Result<Vec<u8>, TransformError> {
        match self.ty {
            TransformationType::None => Ok(input.to_vec()),
            TransformationType::Xor => Ok(input.iter().map(|b| b ^ 0xFF).collect()),
            TransformationType::Rle => rle::decode(input),
            TransformationType::Lz4 => lz4_flex::block::decompress_size_prepended(input)
                .map_err(|e| TransformError::Lz4(e.to_string())),
        }
    }

    /// The stored size of `input` after encoding.
    pub fn encoded_len(&self, input: &[u8]) -> u64 {
        match self.ty {
            TransformationType::None | TransformationType::Xor => input.len() as u64,
            _ => self.encode(input).len() as u64,
        }
    }
}
