//! Pipeline counters shared by the worker and the facade.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters. All updates are relaxed; readers only need eventual
/// totals.
#[derive(Debug, Default)]
pub struct PipelineStats {
    enqueued: AtomicU64,
    enqueue_failures: AtomicU64,
    evicted: AtomicU64,
    accepted_records: AtomicU64,
    rejected_records: AtomicU64,
    transient_failures: AtomicU64,
    purged: AtomicU64,
    dropped_commands: AtomicU64,
}

/// Point-in-time copy of `PipelineStats`.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Records durably appended.
    pub enqueued: u64,
    /// Appends that failed (record lost).
    pub enqueue_failures: u64,
    /// Oldest records removed to honor the per-stream ceiling.
    pub evicted: u64,
    /// Records deleted after an accepted submission.
    pub accepted_records: u64,
    /// Records discarded after a permanent rejection.
    pub rejected_records: u64,
    /// Submissions that failed transiently or timed out.
    pub transient_failures: u64,
    /// Records removed by the retention purge.
    pub purged: u64,
    /// Commands that never reached the worker.
    pub dropped_commands: u64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_enqueue_failure(&self) {
        self.enqueue_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evicted(&self, n: u64) {
        self.evicted.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_accepted(&self, n: u64) {
        self.accepted_records.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_rejected(&self, n: u64) {
        self.rejected_records.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_transient_failure(&self) {
        self.transient_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_purged(&self, n: u64) {
        self.purged.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_dropped(&self, n: u64) {
        self.dropped_commands.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            enqueue_failures: self.enqueue_failures.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            accepted_records: self.accepted_records.load(Ordering::Relaxed),
            rejected_records: self.rejected_records.load(Ordering::Relaxed),
            transient_failures: self.transient_failures.load(Ordering::Relaxed),
            purged: self.purged.load(Ordering::Relaxed),
            dropped_commands: self.dropped_commands.load(Ordering::Relaxed),
        }
    }
}
