//! Plugin Capability Contract
//!
//! A south plugin is one of two ingestion styles:
//! - Poll: the service calls `poll` at the cadence the plugin declares
//! - Push: the plugin calls a registered `IngestCallback` whenever data is available
//!
//! Lifecycle hooks are invoked in this order by the hosting service:
//! `init` → (`register_ingest` + `start` for push plugins) → `reconfigure`* → `shutdown`.
//! `shutdown` is called exactly once.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{ConfigCategory, PluginError, PluginResult, Reading};

/// Plugin interface version this crate hosts. Plugins must match the major part.
pub const PLUGIN_INTERFACE_VERSION: &str = "1.0.0";

/// Cadence used when a poll plugin does not declare one
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

// ─────────────────────────────────────────────────────────────────────────────
// Plugin Info
// ─────────────────────────────────────────────────────────────────────────────

/// How a plugin produces readings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestMode {
    /// The service polls the plugin
    Poll,
    /// The plugin pushes readings through a callback
    Push,
}

/// Whether a plugin can take configuration changes while ingesting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconfigureMode {
    /// Changes are applied while ingestion keeps running
    Live,
    /// Ingestion must be paused while the change is applied
    WhilePaused,
}

/// Static description a plugin gives of itself
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Plugin name, as registered
    pub name: String,

    /// Plugin version
    pub version: String,

    /// Interface version the plugin was written against
    pub interface: String,

    pub ingest: IngestMode,

    pub reconfigure: ReconfigureMode,

    /// Default configuration items (JSON object in category item form)
    #[serde(default)]
    pub default_config: serde_json::Value,
}

impl PluginInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>, ingest: IngestMode) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            interface: PLUGIN_INTERFACE_VERSION.to_string(),
            ingest,
            reconfigure: ReconfigureMode::WhilePaused,
            default_config: serde_json::Value::Null,
        }
    }

    pub fn with_reconfigure(mut self, mode: ReconfigureMode) -> Self {
        self.reconfigure = mode;
        self
    }

    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = interface.into();
        self
    }

    pub fn with_default_config(mut self, config: serde_json::Value) -> Self {
        self.default_config = config;
        self
    }

    /// Check that the plugin was written against a compatible interface
    pub fn is_interface_compatible(&self) -> bool {
        major(&self.interface).is_some_and(|m| Some(m) == major(PLUGIN_INTERFACE_VERSION))
    }

    /// The declared default configuration as a category
    pub fn default_category(&self, name: &str) -> PluginResult<ConfigCategory> {
        ConfigCategory::from_value(name, &self.default_config)
    }
}

fn major(version: &str) -> Option<u64> {
    version.split('.').next()?.trim().parse().ok()
}

// ─────────────────────────────────────────────────────────────────────────────
// Ingest Callback
// ─────────────────────────────────────────────────────────────────────────────

/// Callback a push plugin invokes for every reading it produces.
///
/// The callback never blocks; the hosting service buffers readings itself.
#[derive(Clone)]
pub struct IngestCallback(Arc<dyn Fn(Reading) + Send + Sync>);

impl IngestCallback {
    pub fn new(f: impl Fn(Reading) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Hand a reading to the service
    pub fn ingest(&self, reading: Reading) {
        (self.0)(reading)
    }
}

impl fmt::Debug for IngestCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("IngestCallback")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// South Plugin Trait
// ─────────────────────────────────────────────────────────────────────────────

/// The capability set every south plugin implements
///
/// Only the hooks matching the plugin's declared `IngestMode` and
/// `ReconfigureMode` are ever called; the defaults report `Unsupported`.
#[async_trait]
pub trait SouthPlugin: Send + 'static {
    /// Static description of the plugin
    fn info(&self) -> PluginInfo;

    /// Initialize the plugin with its configuration
    async fn init(&mut self, config: &ConfigCategory) -> PluginResult<()>;

    /// Produce one reading (poll plugins)
    ///
    /// `Ok(None)` means no data was available this cycle.
    async fn poll(&mut self) -> PluginResult<Option<Reading>> {
        Err(PluginError::Unsupported("poll"))
    }

    /// Time to wait between polls (poll plugins)
    fn poll_interval(&self) -> Duration {
        DEFAULT_POLL_INTERVAL
    }

    /// Register the callback readings are delivered through (push plugins)
    fn register_ingest(&mut self, _callback: IngestCallback) -> PluginResult<()> {
        Err(PluginError::Unsupported("push ingestion"))
    }

    /// Begin producing readings (push plugins)
    async fn start(&mut self) -> PluginResult<()> {
        Ok(())
    }

    /// Stop invoking the registered callback (push plugins)
    async fn unregister_ingest(&mut self) -> PluginResult<()> {
        Ok(())
    }

    /// Apply a new configuration
    async fn reconfigure(&mut self, _config: &ConfigCategory) -> PluginResult<()> {
        Err(PluginError::Unsupported("reconfiguration"))
    }

    /// Release every resource the plugin holds
    async fn shutdown(&mut self) -> PluginResult<()>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_interface_compatibility() {
        let info = PluginInfo::new("p", "0.1.0", IngestMode::Poll);
        assert!(info.is_interface_compatible());

        assert!(info.clone().with_interface("1.4.2").is_interface_compatible());
        assert!(!info.clone().with_interface("2.0.0").is_interface_compatible());
        assert!(!info.with_interface("garbage").is_interface_compatible());
    }

    #[test]
    fn test_default_category() {
        let info = PluginInfo::new("p", "0.1.0", IngestMode::Poll)
            .with_default_config(serde_json::json!({"interval": {"type": "integer", "default": "1000"}}));

        let category = info.default_category("p").unwrap();
        assert_eq!(category.get_u64("interval"), Some(1000));

        let empty = PluginInfo::new("p", "0.1.0", IngestMode::Poll).default_category("p").unwrap();
        assert!(empty.items.is_empty());
    }

    #[test]
    fn test_ingest_callback() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let callback = IngestCallback::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        callback.ingest(Reading::new("a"));
        callback.clone().ingest(Reading::new("b"));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
