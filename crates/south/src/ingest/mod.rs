//! Ingestion
//!
//! Moves readings from the plugin to the downstream sink:
//!
//! ```text
//! plugin ──poll/push──▶ ReadingQueue (bounded, drops oldest) ──forwarder──▶ ReadingSink
//! ```
//!
//! The plugin never waits on the sink. When the sink falls behind, the queue
//! keeps the newest readings and counts what it had to drop.

mod coordinator;
mod queue;
mod sink;

pub use coordinator::*;
pub use queue::*;
pub use sink::*;

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters describing ingestion since the service was created
#[derive(Debug, Default)]
pub struct IngestStats {
    produced: AtomicU64,
    forwarded: AtomicU64,
    produce_errors: AtomicU64,
    send_failures: AtomicU64,
}

impl IngestStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_produced(&self) {
        self.produced.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_forwarded(&self, count: usize) {
        self.forwarded.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_produce_error(&self) {
        self.produce_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a snapshot, including the queue's depth and drop count
    pub fn snapshot(&self, queue: &ReadingQueue) -> IngestStatsSnapshot {
        IngestStatsSnapshot {
            produced: self.produced.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            dropped: queue.dropped(),
            produce_errors: self.produce_errors.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            queued: queue.len(),
        }
    }
}

/// Serializable view of `IngestStats`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStatsSnapshot {
    pub produced: u64,
    pub forwarded: u64,
    pub dropped: u64,
    pub produce_errors: u64,
    pub send_failures: u64,
    pub queued: usize,
}
