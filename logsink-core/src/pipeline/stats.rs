//! Pipeline counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by the pipeline tasks
#[derive(Debug, Default)]
pub struct PipelineStats {
    accepted: AtomicU64,
    rejected: AtomicU64,
    appended: AtomicU64,
    dropped: AtomicU64,
    flushes: AtomicU64,
    flush_failures: AtomicU64,
    committed: AtomicU64,
    skipped: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Records accepted into the queue
    pub accepted: u64,
    /// Records refused because the queue was full or closed
    pub rejected: u64,
    /// Records appended to the journal
    pub appended: u64,
    /// Records lost to journal write errors
    pub dropped: u64,
    /// Flushes that completed
    pub flushes: u64,
    /// Flushes rolled back and left for retry
    pub flush_failures: u64,
    /// Records committed to the store
    pub committed: u64,
    /// Journal lines skipped as malformed
    pub skipped: u64,
}

impl PipelineStats {
    pub fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_appended(&self) {
        self.appended.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flush(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flush_failure(&self) {
        self.flush_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_committed(&self, records: usize) {
        self.committed.fetch_add(records as u64, Ordering::Relaxed);
    }

    pub fn record_skipped(&self, lines: usize) {
        self.skipped.fetch_add(lines as u64, Ordering::Relaxed);
    }

    /// Copy the current counter values
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            appended: self.appended.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            flush_failures: self.flush_failures.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}
