//! Simulated event counter (push plugin)
//!
//! Emits a monotonically increasing count from a background task through the
//! registered ingest callback.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::{
    ConfigCategory, IngestCallback, IngestMode, PluginError, PluginInfo, PluginResult, Reading,
    ReconfigureMode, SouthPlugin,
};

pub(super) const NAME: &str = "sim-counter";

#[derive(Debug, Clone)]
struct CounterSettings {
    interval: Duration,
    asset: String,
    step: i64,
}

impl CounterSettings {
    fn from_category(config: &ConfigCategory) -> PluginResult<Self> {
        let interval = config
            .get_duration_ms("interval")
            .filter(|d| !d.is_zero())
            .ok_or_else(|| PluginError::InvalidConfig("'interval' must be positive milliseconds".into()))?;
        let step = match config.get("step") {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| PluginError::InvalidConfig("'step' must be an integer".into()))?,
            None => 1,
        };
        Ok(Self {
            interval,
            asset: config.get("asset").unwrap_or("counter").to_string(),
            step,
        })
    }
}

/// Push plugin counting up at a fixed rate
#[derive(Default)]
pub struct SimCounter {
    settings: Option<CounterSettings>,
    callback: Option<IngestCallback>,
    count: Arc<AtomicI64>,
    task: Option<JoinHandle<()>>,
}

impl SimCounter {
    pub fn new() -> Self {
        Self::default()
    }

    fn stop_task(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[async_trait]
impl SouthPlugin for SimCounter {
    fn info(&self) -> PluginInfo {
        PluginInfo::new(NAME, env!("CARGO_PKG_VERSION"), IngestMode::Push)
            .with_reconfigure(ReconfigureMode::WhilePaused)
            .with_default_config(serde_json::json!({
                "interval": {
                    "description": "Milliseconds between pushed readings",
                    "type": "integer",
                    "default": "1000"
                },
                "asset": {
                    "description": "Asset name for produced readings",
                    "type": "string",
                    "default": "counter"
                },
                "step": {
                    "description": "Increment applied on every reading",
                    "type": "integer",
                    "default": "1"
                }
            }))
    }

    async fn init(&mut self, config: &ConfigCategory) -> PluginResult<()> {
        self.settings = Some(CounterSettings::from_category(config)?);
        Ok(())
    }

    fn register_ingest(&mut self, callback: IngestCallback) -> PluginResult<()> {
        self.callback = Some(callback);
        Ok(())
    }

    async fn start(&mut self) -> PluginResult<()> {
        let settings = self.settings.clone().ok_or(PluginError::NotInitialized)?;
        let callback = self
            .callback
            .clone()
            .ok_or_else(|| PluginError::Internal("no ingest callback registered".into()))?;
        self.stop_task();

        let count = Arc::clone(&self.count);
        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(settings.interval);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let value = count.fetch_add(settings.step, Ordering::SeqCst).wrapping_add(settings.step);
                callback.ingest(Reading::new(settings.asset.clone()).with_datapoint("count", value));
            }
        }));
        Ok(())
    }

    async fn unregister_ingest(&mut self) -> PluginResult<()> {
        self.stop_task();
        self.callback = None;
        Ok(())
    }

    async fn reconfigure(&mut self, config: &ConfigCategory) -> PluginResult<()> {
        self.settings = Some(CounterSettings::from_category(config)?);
        Ok(())
    }

    async fn shutdown(&mut self) -> PluginResult<()> {
        self.stop_task();
        self.callback = None;
        self.settings = None;
        Ok(())
    }
}

impl Drop for SimCounter {
    fn drop(&mut self) {
        self.stop_task();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DatapointValue;
    use parking_lot::Mutex;

    fn config(interval: &str) -> ConfigCategory {
        ConfigCategory::new(NAME).with_item("interval", interval).with_item("step", "2")
    }

    #[tokio::test(start_paused = true)]
    async fn test_pushes_through_callback() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);

        let mut plugin = SimCounter::new();
        plugin.init(&config("100")).await.unwrap();
        plugin
            .register_ingest(IngestCallback::new(move |r| sink.lock().push(r)))
            .unwrap();
        plugin.start().await.unwrap();

        tokio::time::sleep(Duration::from_millis(350)).await;
        plugin.unregister_ingest().await.unwrap();
        let counts: Vec<f64> = received
            .lock()
            .iter()
            .filter_map(|r| r.get("count").and_then(|v| v.as_f64()))
            .collect();
        assert_eq!(counts, vec![2.0, 4.0, 6.0]);

        // Nothing arrives once unregistered
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(received.lock().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_count_wraps_instead_of_overflowing() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);

        let mut plugin = SimCounter::new();
        let huge = ConfigCategory::new(NAME)
            .with_item("interval", "100")
            .with_item("step", i64::MAX.to_string());
        plugin.init(&huge).await.unwrap();
        plugin
            .register_ingest(IngestCallback::new(move |r| sink.lock().push(r)))
            .unwrap();
        plugin.start().await.unwrap();

        tokio::time::sleep(Duration::from_millis(350)).await;
        plugin.shutdown().await.unwrap();

        let counts: Vec<DatapointValue> = received
            .lock()
            .iter()
            .filter_map(|r| r.get("count").cloned())
            .collect();
        assert_eq!(
            counts,
            vec![
                DatapointValue::Integer(i64::MAX),
                DatapointValue::Integer(-2),
                DatapointValue::Integer(i64::MAX - 2),
            ]
        );
    }

    #[tokio::test]
    async fn test_start_requires_callback() {
        let mut plugin = SimCounter::new();
        plugin.init(&config("100")).await.unwrap();
        assert!(plugin.start().await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_step_rejected() {
        let mut plugin = SimCounter::new();
        let bad = config("100").apply(&ConfigCategory::new(NAME).with_item("step", "many"));
        assert!(matches!(plugin.init(&bad).await, Err(PluginError::InvalidConfig(_))));
    }
}
