//! Ingestion Coordinator
//!
//! Drives the plugin's data production and forwards readings downstream.
//!
//! - Poll plugins: a poll loop task calls the plugin, then sleeps for the
//!   interval the plugin declares. Pausing is cooperative: the loop checks its
//!   run flag between iterations and never aborts an in-flight poll unless the
//!   grace period runs out.
//! - Push plugins: a callback is registered on resume and unregistered on
//!   pause. No poll task is ever spawned.
//!
//! The plugin is only touched through the `PluginSlot` lock, so the control
//! context can never reconfigure or tear down a plugin in the middle of a read.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use south_plugin::{IngestCallback, IngestMode};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::{IngestStats, ReadingQueue, ReadingSink};
use crate::service::{PluginSlot, ServiceError, ServiceResult};

// ─────────────────────────────────────────────────────────────────────────────
// Ingest Options
// ─────────────────────────────────────────────────────────────────────────────

/// Tuning for the ingestion pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestOptions {
    /// Maximum readings buffered between plugin and sink
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    /// Maximum readings handed to the sink in one batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// How long pausing or shutting down waits for in-flight work
    #[serde(default = "default_grace_ms")]
    pub shutdown_grace_ms: u64,
}

fn default_queue_depth() -> usize {
    1000
}

fn default_batch_size() -> usize {
    100
}

fn default_grace_ms() -> u64 {
    5000
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            queue_depth: default_queue_depth(),
            batch_size: default_batch_size(),
            shutdown_grace_ms: default_grace_ms(),
        }
    }
}

impl IngestOptions {
    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace_ms = grace.as_millis() as u64;
        self
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Background Tasks
// ─────────────────────────────────────────────────────────────────────────────

/// A background task stopped by flipping a watch flag
struct Task {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Task {
    fn spawn<F, Fut>(make: F) -> Self
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(make(stop_rx));
        Self { stop_tx, handle }
    }

    /// Signal the task and wait for it to finish, aborting it after `grace`.
    /// Returns false if the task had to be aborted.
    async fn stop(self, grace: Duration) -> bool {
        let _ = self.stop_tx.send(true);
        let mut handle = self.handle;
        match tokio::time::timeout(grace, &mut handle).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::error!(error = ?e, "Ingestion task panicked");
                true
            }
            Err(_) => {
                handle.abort();
                // Cancellation drops the task's plugin guard
                let _ = handle.await;
                false
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Ingest Coordinator
// ─────────────────────────────────────────────────────────────────────────────

/// Coordinates production (poll loop or push callback) and forwarding
pub struct IngestCoordinator {
    service: String,
    plugin: PluginSlot,
    mode: IngestMode,
    queue: Arc<ReadingQueue>,
    stats: Arc<IngestStats>,
    sink: Arc<dyn ReadingSink>,
    options: IngestOptions,
    /// Gates the push callback; readings arriving while false are discarded
    accepting: Arc<AtomicBool>,
    poll_task: Option<Task>,
    forwarder: Option<Task>,
}

impl IngestCoordinator {
    pub fn new(
        service: impl Into<String>,
        plugin: PluginSlot,
        mode: IngestMode,
        queue: Arc<ReadingQueue>,
        stats: Arc<IngestStats>,
        sink: Arc<dyn ReadingSink>,
        options: IngestOptions,
    ) -> Self {
        Self {
            service: service.into(),
            plugin,
            mode,
            queue,
            stats,
            sink,
            options,
            accepting: Arc::new(AtomicBool::new(false)),
            poll_task: None,
            forwarder: None,
        }
    }

    /// Start forwarding and production
    pub async fn start(&mut self) -> ServiceResult<()> {
        if self.forwarder.is_none() {
            let queue = Arc::clone(&self.queue);
            let sink = Arc::clone(&self.sink);
            let stats = Arc::clone(&self.stats);
            let batch_size = self.options.batch_size.max(1);
            let service = self.service.clone();
            self.forwarder = Some(Task::spawn(move |stop_rx| {
                run_forwarder(service, queue, sink, stats, batch_size, stop_rx)
            }));
        }
        self.resume().await
    }

    /// Resume production after a pause
    pub async fn resume(&mut self) -> ServiceResult<()> {
        match self.mode {
            IngestMode::Poll => {
                if self.poll_task.is_none() {
                    let service = self.service.clone();
                    let plugin = Arc::clone(&self.plugin);
                    let queue = Arc::clone(&self.queue);
                    let stats = Arc::clone(&self.stats);
                    self.poll_task = Some(Task::spawn(move |stop_rx| {
                        run_poll_loop(service, plugin, queue, stats, stop_rx)
                    }));
                    tracing::debug!(service = %self.service, "Poll loop started");
                }
                Ok(())
            }
            IngestMode::Push => {
                if self.accepting.load(Ordering::SeqCst) {
                    return Ok(());
                }
                let callback = self.push_callback();
                let mut slot = self.plugin.lock().await;
                let handle = slot
                    .as_mut()
                    .ok_or_else(|| ServiceError::Internal("no plugin loaded".to_string()))?;

                self.accepting.store(true, Ordering::SeqCst);
                if let Err(e) = handle.register_callback(callback).await {
                    self.accepting.store(false, Ordering::SeqCst);
                    return Err(e);
                }
                tracing::debug!(service = %self.service, "Push callback registered");
                Ok(())
            }
        }
    }

    /// Pause production. Queued readings continue to be forwarded.
    pub async fn pause(&mut self) {
        match self.mode {
            IngestMode::Poll => {
                if let Some(task) = self.poll_task.take() {
                    if !task.stop(self.options.shutdown_grace()).await {
                        tracing::warn!(
                            service = %self.service,
                            grace_ms = self.options.shutdown_grace_ms,
                            "Poll did not finish within grace period; aborted"
                        );
                    }
                    tracing::debug!(service = %self.service, "Poll loop stopped");
                }
            }
            IngestMode::Push => {
                if !self.accepting.swap(false, Ordering::SeqCst) {
                    return;
                }
                let mut slot = self.plugin.lock().await;
                if let Some(handle) = slot.as_mut() {
                    if let Err(e) = handle.unregister_callback().await {
                        tracing::warn!(service = %self.service, error = %e, "Failed to unregister push callback");
                    }
                }
                tracing::debug!(service = %self.service, "Push callback unregistered");
            }
        }
    }

    /// Stop production, flush what is queued and stop the forwarder
    pub async fn shutdown(&mut self) {
        self.pause().await;
        if let Some(forwarder) = self.forwarder.take() {
            if !forwarder.stop(self.options.shutdown_grace()).await {
                tracing::warn!(
                    service = %self.service,
                    remaining = self.queue.len(),
                    "Forwarder did not flush within grace period; remaining readings discarded"
                );
            }
        }
    }

    /// Check if a poll loop task is active
    pub fn is_polling(&self) -> bool {
        self.poll_task.as_ref().is_some_and(|task| !task.handle.is_finished())
    }

    pub fn mode(&self) -> IngestMode {
        self.mode
    }

    fn push_callback(&self) -> IngestCallback {
        let queue = Arc::clone(&self.queue);
        let stats = Arc::clone(&self.stats);
        let accepting = Arc::clone(&self.accepting);
        IngestCallback::new(move |reading| {
            if !accepting.load(Ordering::SeqCst) {
                tracing::trace!("Discarding reading pushed while paused");
                return;
            }
            stats.record_produced();
            queue.push(reading);
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Task Loops
// ─────────────────────────────────────────────────────────────────────────────

async fn run_poll_loop(
    service: String,
    plugin: PluginSlot,
    queue: Arc<ReadingQueue>,
    stats: Arc<IngestStats>,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        if *stop_rx.borrow() {
            break;
        }

        let interval = {
            let mut slot = plugin.lock().await;
            // A pause may have been requested while waiting for the lock
            if *stop_rx.borrow() {
                break;
            }
            let Some(handle) = slot.as_mut() else {
                break;
            };

            // A panicking plugin must not take the poll task down with it
            match AssertUnwindSafe(handle.produce()).catch_unwind().await {
                Ok(Ok(Some(reading))) => {
                    stats.record_produced();
                    queue.push(reading);
                }
                Ok(Ok(None)) => {}
                Ok(Err(e)) => {
                    stats.record_produce_error();
                    tracing::warn!(
                        service = %service,
                        plugin = %handle.name(),
                        error = %e,
                        "Poll failed; skipping reading"
                    );
                }
                Err(_) => {
                    stats.record_produce_error();
                    tracing::error!(
                        service = %service,
                        plugin = %handle.name(),
                        "Plugin panicked while polling; skipping reading"
                    );
                }
            }
            handle.poll_interval()
        };

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = stop_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
}

async fn run_forwarder(
    service: String,
    queue: Arc<ReadingQueue>,
    sink: Arc<dyn ReadingSink>,
    stats: Arc<IngestStats>,
    batch_size: usize,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = queue.wait_for_readings() => {}
            _ = stop_rx.changed() => break,
        }
        tokio::select! {
            _ = sink.ready() => {}
            _ = stop_rx.changed() => break,
        }
        let batch = queue.drain(batch_size);
        if !batch.is_empty() {
            forward(&service, sink.as_ref(), &stats, batch).await;
        }
    }

    // Final flush; bounded by the caller's grace period
    loop {
        sink.ready().await;
        let batch = queue.drain(batch_size);
        if batch.is_empty() {
            break;
        }
        forward(&service, sink.as_ref(), &stats, batch).await;
    }
}

async fn forward(service: &str, sink: &dyn ReadingSink, stats: &IngestStats, batch: Vec<south_plugin::Reading>) {
    let count = batch.len();
    match sink.send(batch).await {
        Ok(()) => stats.record_forwarded(count),
        Err(e) => {
            stats.record_send_failure();
            tracing::warn!(service = %service, count, error = %e, "Failed to forward readings");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{ChannelSink, SinkError};
    use crate::service::{empty_slot, PluginHandle};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use south_plugin::{ConfigCategory, PluginRegistry, Reading};

    /// Sink that refuses to become ready until the gate opens
    struct GatedSink {
        gate: watch::Receiver<bool>,
        received: Mutex<Vec<Reading>>,
    }

    #[async_trait]
    impl ReadingSink for GatedSink {
        async fn ready(&self) {
            let mut gate = self.gate.clone();
            let _ = gate.wait_for(|open| *open).await;
        }

        async fn send(&self, readings: Vec<Reading>) -> Result<(), SinkError> {
            self.received.lock().extend(readings);
            Ok(())
        }
    }

    async fn loaded_slot(name: &str, interval: &str) -> PluginSlot {
        let registry = PluginRegistry::with_builtins();
        let mut handle = PluginHandle::load(&registry, name).unwrap();
        let config = handle
            .info()
            .default_category(name)
            .unwrap()
            .apply(&ConfigCategory::new(name).with_item("interval", interval));
        handle.initialize(&config).await.unwrap();

        let slot = empty_slot();
        *slot.lock().await = Some(handle);
        slot
    }

    #[tokio::test]
    async fn test_backpressure_drops_oldest() {
        let (gate_tx, gate_rx) = watch::channel(false);
        let sink = Arc::new(GatedSink {
            gate: gate_rx,
            received: Mutex::new(Vec::new()),
        });
        let queue = Arc::new(ReadingQueue::new(3));
        let stats = Arc::new(IngestStats::new());

        let forwarder = Task::spawn({
            let (queue, sink, stats) = (Arc::clone(&queue), Arc::clone(&sink), Arc::clone(&stats));
            move |stop_rx| run_forwarder("test".into(), queue, sink, stats, 100, stop_rx)
        });

        // Production never blocks while the sink is stalled
        let produce = async {
            for i in 0..10_i64 {
                queue.push(Reading::new("a").with_datapoint("i", i));
                tokio::task::yield_now().await;
            }
        };
        tokio::time::timeout(Duration::from_secs(1), produce).await.unwrap();
        assert_eq!(queue.dropped(), 7);

        gate_tx.send(true).unwrap();
        assert!(forwarder.stop(Duration::from_secs(1)).await);

        let received: Vec<f64> = sink
            .received
            .lock()
            .iter()
            .filter_map(|r| r.get("i").and_then(|v| v.as_f64()))
            .collect();
        assert_eq!(received, vec![7.0, 8.0, 9.0]);
        assert_eq!(stats.snapshot(&queue).forwarded, 3);
        assert_eq!(stats.snapshot(&queue).dropped, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_mode_forwards_readings() {
        let slot = loaded_slot("sim-thermo", "100").await;
        let (sink, mut rx) = ChannelSink::new(16);
        let queue = Arc::new(ReadingQueue::new(16));
        let stats = Arc::new(IngestStats::new());

        let mut coordinator = IngestCoordinator::new(
            "test",
            slot,
            IngestMode::Poll,
            Arc::clone(&queue),
            Arc::clone(&stats),
            Arc::new(sink),
            IngestOptions::default(),
        );
        coordinator.start().await.unwrap();
        assert!(coordinator.is_polling());

        let batch = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(batch[0].asset, "temperature");

        coordinator.pause().await;
        assert!(!coordinator.is_polling());
        let produced = stats.snapshot(&queue).produced;

        // Paused: no further polls
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(stats.snapshot(&queue).produced, produced);

        coordinator.resume().await.unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(stats.snapshot(&queue).produced > produced);

        coordinator.shutdown().await;
        assert!(!coordinator.is_polling());
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_mode_never_polls() {
        let slot = loaded_slot("sim-counter", "100").await;
        let (sink, mut rx) = ChannelSink::new(16);
        let queue = Arc::new(ReadingQueue::new(16));
        let stats = Arc::new(IngestStats::new());

        let mut coordinator = IngestCoordinator::new(
            "test",
            slot,
            IngestMode::Push,
            Arc::clone(&queue),
            Arc::clone(&stats),
            Arc::new(sink),
            IngestOptions::default(),
        );
        coordinator.start().await.unwrap();
        assert!(!coordinator.is_polling());

        let batch = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(batch[0].asset, "counter");

        coordinator.pause().await;
        let produced = stats.snapshot(&queue).produced;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(stats.snapshot(&queue).produced, produced);
        assert!(!coordinator.is_polling());

        coordinator.shutdown().await;
    }
}
