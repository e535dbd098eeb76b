//! Per-connection scratch region.
//!
//! Bounds the payload memory a worker stages between backend and socket.
//! Allocations are debited against a fixed budget of `stripe_size` bytes;
//! when a request's operations would exceed it, the caller flushes what it
//! has (sending the partial reply) and resets the region.

use bytes::BytesMut;

pub(crate) struct ScratchRegion {
    capacity: usize,
    used: usize,
}

impl ScratchRegion {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, used: 0 }
    }

    /// Allocate `len` zeroed bytes from the region, or `None` if the
    /// budget is exhausted.
    pub fn try_alloc(&mut self, len: usize) -> Option<BytesMut> {
        if self.used + len > self.capacity {
            return None;
        }
        self.used += len;
        Some(BytesMut::zeroed(len))
    }

    /// Release everything allocated since the last reset.
    pub fn reset(&mut self) {
        self.used = 0;
    }
}
