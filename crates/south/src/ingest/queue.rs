//! Bounded reading queue with drop-oldest overflow.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use south_plugin::Reading;
use tokio::sync::Notify;

/// Bounded FIFO between the plugin and the forwarder
///
/// `push` never blocks: when the queue is full the oldest reading is
/// discarded and the drop counter incremented.
#[derive(Debug)]
pub struct ReadingQueue {
    readings: Mutex<VecDeque<Reading>>,
    capacity: usize,
    dropped: AtomicU64,
    notify: Notify,
}

impl ReadingQueue {
    /// Create a queue holding at most `capacity` readings (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            readings: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            dropped: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    /// Enqueue a reading. Returns true if an older reading was dropped to make room.
    pub fn push(&self, reading: Reading) -> bool {
        let dropped = {
            let mut readings = self.readings.lock();
            let dropped = if readings.len() >= self.capacity {
                readings.pop_front();
                true
            } else {
                false
            };
            readings.push_back(reading);
            dropped
        };

        if dropped {
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::trace!(total, "Reading queue full, dropped oldest reading");
        }
        self.notify.notify_one();
        dropped
    }

    /// Remove up to `max` readings from the front of the queue
    pub fn drain(&self, max: usize) -> Vec<Reading> {
        let mut readings = self.readings.lock();
        let count = max.min(readings.len());
        readings.drain(..count).collect()
    }

    /// Wait until at least one reading is queued
    pub async fn wait_for_readings(&self) {
        loop {
            if !self.is_empty() {
                return;
            }
            self.notify.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.readings.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total readings dropped because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
