//! Operation statistics.
//!
//! Each connection worker keeps its own counters and folds them into the
//! process-global block when the connection closes; the global block is
//! queryable over the wire via the `Statistics` message.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counter block. All counters are monotonic.
#[derive(Debug, Default)]
pub struct Statistics {
    pub files_created: AtomicU64,
    pub files_deleted: AtomicU64,
    pub files_stated: AtomicU64,
    pub syncs: AtomicU64,
    pub bytes_read: AtomicU64,
    pub bytes_written: AtomicU64,
    pub bytes_received: AtomicU64,
    pub bytes_sent: AtomicU64,
}

/// Point-in-time copy of a counter block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatisticsSnapshot {
    pub files_created: u64,
    pub files_deleted: u64,
    pub files_stated: u64,
    pub syncs: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
}

impl Statistics {
    pub fn add(&self, counter: &AtomicU64, value: u64) {
        counter.fetch_add(value, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            files_created: self.files_created.load(Ordering::Relaxed),
            files_deleted: self.files_deleted.load(Ordering::Relaxed),
            files_stated: self.files_stated.load(Ordering::Relaxed),
            syncs: self.syncs.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
        }
    }

    /// Fold this block's counters into `other`.
    pub fn merge_into(&self, other: &Statistics) {
        let snapshot = self.snapshot();
        other
            .files_created
            .fetch_add(snapshot.files_created, Ordering::Relaxed);
        other
            .files_deleted
            .fetch_add(snapshot.files_deleted, Ordering::Relaxed);
        other
            .files_stated
            .fetch_add(snapshot.files_stated, Ordering::Relaxed);
        other.syncs.fetch_add(snapshot.syncs, Ordering::Relaxed);
        other
            .bytes_read
            .fetch_add(snapshot.bytes_read, Ordering::Relaxed);
        other
            .bytes_written
            .fetch_add(snapshot.bytes_written, Ordering::Relaxed);
        other
            .bytes_received
            .fetch_add(snapshot.bytes_received, Ordering::Relaxed);
        other
            .bytes_sent
            .fetch_add(snapshot.bytes_sent, Ordering::Relaxed);
    }
}
