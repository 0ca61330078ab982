//! Downstream reading sinks.

use async_trait::async_trait;
use south_plugin::Reading;
use tokio::sync::mpsc;

/// Errors reported by a downstream sink
#[derive(Debug, Clone, thiserror::Error)]
pub enum SinkError {
    #[error("Sink closed")]
    Closed,

    #[error("Sink rejected readings: {0}")]
    Rejected(String),
}

/// Receives readings forwarded by the ingestion coordinator
#[async_trait]
pub trait ReadingSink: Send + Sync + 'static {
    /// Wait until the sink can accept another batch.
    ///
    /// The forwarder takes nothing off the queue until this resolves, so the
    /// queue is the only place readings wait while the sink is busy.
    async fn ready(&self) {}

    /// Accept a batch of readings
    async fn send(&self, readings: Vec<Reading>) -> Result<(), SinkError>;
}

/// Sink delivering batches into a bounded tokio channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Vec<Reading>>,
}

impl ChannelSink {
    /// Create a sink and the receiver its batches arrive on
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Vec<Reading>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ReadingSink for ChannelSink {
    async fn ready(&self) {
        // Reserve and release a slot; the forwarder is the only sender
        let _ = self.tx.reserve().await;
    }

    async fn send(&self, readings: Vec<Reading>) -> Result<(), SinkError> {
        self.tx.send(readings).await.map_err(|_| SinkError::Closed)
    }
}

/// Sink that logs every batch, used when no storage is attached
#[derive(Debug, Clone, Default)]
pub struct TracingSink;

#[async_trait]
impl ReadingSink for TracingSink {
    async fn send(&self, readings: Vec<Reading>) -> Result<(), SinkError> {
        for reading in &readings {
            tracing::info!(
                asset = %reading.asset,
                timestamp = %reading.timestamp,
                datapoints = %serde_json::to_string(&reading.datapoints).unwrap_or_default(),
                "Reading"
            );
        }
        Ok(())
    }
}
