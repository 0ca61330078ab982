//! Plugin Handle
//!
//! Single owner of the loaded plugin instance. The handle is created by
//! `load`, shared between the control and ingestion contexts only through a
//! `PluginSlot`, and consumed by `shutdown` so the plugin's shutdown hook can
//! run at most once.

use std::sync::Arc;
use std::time::Duration;

use south_plugin::{
    ConfigCategory, IngestCallback, IngestMode, PluginInfo, PluginRegistry, PluginResult, Reading,
    ReconfigureMode, SouthPlugin,
};
use tokio::sync::Mutex;

use super::{ServiceError, ServiceResult};

/// Shared, lockable home of the plugin handle. `None` before load and after shutdown.
pub type PluginSlot = Arc<Mutex<Option<PluginHandle>>>;

/// Create an empty plugin slot
pub fn empty_slot() -> PluginSlot {
    Arc::new(Mutex::new(None))
}

/// Owning handle to one loaded plugin
pub struct PluginHandle {
    name: String,
    info: PluginInfo,
    plugin: Box<dyn SouthPlugin>,
}

impl PluginHandle {
    /// Resolve a plugin by name, instantiate it and validate its capability set
    pub fn load(registry: &PluginRegistry, name: &str) -> ServiceResult<Self> {
        let plugin = registry
            .create(name)
            .map_err(|e| ServiceError::PluginResolution {
                plugin: name.to_string(),
                reason: e.to_string(),
            })?;
        Self::from_plugin(name, plugin)
    }

    /// Wrap an already instantiated plugin, validating its declared info
    pub fn from_plugin(name: &str, plugin: Box<dyn SouthPlugin>) -> ServiceResult<Self> {
        let info = plugin.info();

        if info.name != name {
            return Err(ServiceError::PluginResolution {
                plugin: name.to_string(),
                reason: format!("plugin identifies itself as '{}'", info.name),
            });
        }

        if !info.is_interface_compatible() {
            return Err(ServiceError::PluginResolution {
                plugin: name.to_string(),
                reason: format!(
                    "interface version {} is not supported (expected {})",
                    info.interface,
                    south_plugin::PLUGIN_INTERFACE_VERSION
                ),
            });
        }

        tracing::debug!(
            plugin = %name,
            version = %info.version,
            ingest = ?info.ingest,
            reconfigure = ?info.reconfigure,
            "Plugin loaded"
        );

        Ok(Self {
            name: name.to_string(),
            info,
            plugin,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn info(&self) -> &PluginInfo {
        &self.info
    }

    pub fn ingest_mode(&self) -> IngestMode {
        self.info.ingest
    }

    pub fn reconfigure_mode(&self) -> ReconfigureMode {
        self.info.reconfigure
    }

    /// Run the plugin's initialization hook. A failure is never retried here.
    pub async fn initialize(&mut self, config: &ConfigCategory) -> ServiceResult<()> {
        self.plugin
            .init(config)
            .await
            .map_err(|e| ServiceError::PluginInitialization {
                plugin: self.name.clone(),
                reason: e.to_string(),
            })
    }

    /// Hand a new configuration to the plugin
    pub async fn reconfigure(&mut self, config: &ConfigCategory) -> ServiceResult<()> {
        self.plugin
            .reconfigure(config)
            .await
            .map_err(|e| ServiceError::ReconfigurationRejected {
                plugin: self.name.clone(),
                reason: e.to_string(),
            })
    }

    /// Ask a poll plugin for one reading
    pub async fn produce(&mut self) -> PluginResult<Option<Reading>> {
        self.plugin.poll().await
    }

    /// Cadence the plugin currently wants to be polled at
    pub fn poll_interval(&self) -> Duration {
        self.plugin.poll_interval()
    }

    /// Register the ingest callback of a push plugin and let it begin producing
    pub async fn register_callback(&mut self, callback: IngestCallback) -> ServiceResult<()> {
        self.plugin
            .register_ingest(callback)
            .map_err(|e| ServiceError::Internal(format!("{}: {}", self.name, e)))?;
        self.plugin
            .start()
            .await
            .map_err(|e| ServiceError::Internal(format!("{}: {}", self.name, e)))
    }

    /// Stop a push plugin from invoking its callback
    pub async fn unregister_callback(&mut self) -> PluginResult<()> {
        self.plugin.unregister_ingest().await
    }

    /// Invoke the plugin's shutdown hook, consuming the handle
    pub async fn shutdown(mut self) {
        match self.plugin.shutdown().await {
            Ok(()) => tracing::info!(plugin = %self.name, "Plugin shut down"),
            Err(e) => tracing::warn!(plugin = %self.name, error = %e, "Plugin shutdown reported an error"),
        }
    }
}

impl std::fmt::Debug for PluginHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginHandle")
            .field("name", &self.name)
            .field("version", &self.info.version)
            .field("ingest", &self.info.ingest)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use south_plugin::PluginError;

    struct Misnamed;

    #[async_trait]
    impl SouthPlugin for Misnamed {
        fn info(&self) -> PluginInfo {
            PluginInfo::new("something-else", "0.1.0", IngestMode::Poll)
        }
        async fn init(&mut self, _config: &ConfigCategory) -> PluginResult<()> {
            Ok(())
        }
        async fn shutdown(&mut self) -> PluginResult<()> {
            Ok(())
        }
    }

    struct FutureInterface;

    #[async_trait]
    impl SouthPlugin for FutureInterface {
        fn info(&self) -> PluginInfo {
            PluginInfo::new("future", "0.1.0", IngestMode::Poll).with_interface("2.0.0")
        }
        async fn init(&mut self, _config: &ConfigCategory) -> PluginResult<()> {
            Err(PluginError::Internal("unreachable".into()))
        }
        async fn shutdown(&mut self) -> PluginResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_load_unknown_plugin() {
        let registry = PluginRegistry::with_builtins();
        let err = PluginHandle::load(&registry, "no-such-plugin").unwrap_err();
        assert!(matches!(err, ServiceError::PluginResolution { plugin, .. } if plugin == "no-such-plugin"));
    }

    #[test]
    fn test_load_validates_info() {
        let mut registry = PluginRegistry::new();
        registry.register("misnamed", || Box::new(Misnamed));
        registry.register("future", || Box::new(FutureInterface));

        assert!(matches!(
            PluginHandle::load(&registry, "misnamed"),
            Err(ServiceError::PluginResolution { .. })
        ));
        assert!(matches!(
            PluginHandle::load(&registry, "future"),
            Err(ServiceError::PluginResolution { .. })
        ));
    }

    #[tokio::test]
    async fn test_initialize_failure_maps_to_initialization_error() {
        let registry = PluginRegistry::with_builtins();
        let mut handle = PluginHandle::load(&registry, "sim-thermo").unwrap();
        assert_eq!(handle.ingest_mode(), IngestMode::Poll);
        assert_eq!(handle.reconfigure_mode(), ReconfigureMode::Live);

        let bad = ConfigCategory::new("sim-thermo").with_item("interval", "never");
        let err = handle.initialize(&bad).await.unwrap_err();
        assert!(matches!(err, ServiceError::PluginInitialization { .. }));
    }
}
