//! Lifecycle Controller
//!
//! `SouthService` owns the plugin, the ingestion coordinator and the core
//! registration for one run of the service. Control operations take the
//! control lock for their whole duration, so they apply strictly one after
//! another. Observers (`state`, `stats`, `config`, `status`) never wait on it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use south_plugin::{ConfigCategory, PluginRegistry, ReconfigureMode};
use tokio::sync::{watch, Mutex};

use super::{
    empty_slot, PluginHandle, PluginSlot, ServiceError, ServiceHandler, ServiceResult, ServiceState,
    ServiceStatus, StateCell,
};
use crate::ingest::{IngestCoordinator, IngestOptions, IngestStats, IngestStatsSnapshot, ReadingQueue, ReadingSink};
use crate::registration::{CoreEndpoint, RegistrationClient, ServiceRecord, ServiceToken};

// ─────────────────────────────────────────────────────────────────────────────
// Service Spec
// ─────────────────────────────────────────────────────────────────────────────

/// Identity and tuning of a south service
#[derive(Debug, Clone)]
pub struct ServiceSpec {
    /// Name the service registers under
    pub name: String,
    /// Plugin to host
    pub plugin: String,
    /// Configuration category the service listens to
    pub category: String,
    /// Operator-supplied configuration, overlaid on the plugin's defaults
    pub config: ConfigCategory,
    pub ingest: IngestOptions,
    /// Where this service answers management calls
    pub management_address: String,
    pub management_port: u16,
}

impl ServiceSpec {
    pub fn new(name: impl Into<String>, plugin: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            category: name.clone(),
            config: ConfigCategory::new(name.clone()),
            name,
            plugin: plugin.into(),
            ingest: IngestOptions::default(),
            management_address: "localhost".to_string(),
            management_port: 0,
        }
    }

    /// Listen to a category other than the service name
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self.config.name = self.category.clone();
        self
    }

    pub fn with_config(mut self, config: ConfigCategory) -> Self {
        self.config = config;
        self.config.name = self.category.clone();
        self
    }

    pub fn with_ingest(mut self, ingest: IngestOptions) -> Self {
        self.ingest = ingest;
        self
    }

    pub fn with_management(mut self, address: impl Into<String>, port: u16) -> Self {
        self.management_address = address.into();
        self.management_port = port;
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// South Service
// ─────────────────────────────────────────────────────────────────────────────

/// Resources acquired by `start` and released by `shutdown`
struct Control {
    plugin: PluginSlot,
    coordinator: Option<IngestCoordinator>,
    registration: Option<(CoreEndpoint, ServiceToken)>,
    /// Captured at load so reading it never waits on the plugin slot
    reconfigure: Option<ReconfigureMode>,
}

struct Inner {
    spec: ServiceSpec,
    registry: PluginRegistry,
    registration: RegistrationClient,
    sink: Arc<dyn ReadingSink>,
    queue: Arc<ReadingQueue>,
    stats: Arc<IngestStats>,
    state: StateCell,
    /// Set once by the first shutdown request
    shutting_down: AtomicBool,
    /// Cancels registration retries when shutdown begins
    shutdown_tx: watch::Sender<bool>,
    config: RwLock<Arc<ConfigCategory>>,
    control: Mutex<Control>,
    created_at: Instant,
}

/// Lifecycle controller hosting one south plugin
#[derive(Clone)]
pub struct SouthService {
    inner: Arc<Inner>,
}

impl SouthService {
    pub fn new(
        spec: ServiceSpec,
        registry: PluginRegistry,
        registration: RegistrationClient,
        sink: Arc<dyn ReadingSink>,
    ) -> Self {
        let queue = Arc::new(ReadingQueue::new(spec.ingest.queue_depth));
        let config = Arc::new(spec.config.clone());
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            inner: Arc::new(Inner {
                spec,
                registry,
                registration,
                sink,
                queue,
                stats: Arc::new(IngestStats::new()),
                state: StateCell::new(),
                shutting_down: AtomicBool::new(false),
                shutdown_tx,
                config: RwLock::new(config),
                control: Mutex::new(Control {
                    plugin: empty_slot(),
                    coordinator: None,
                    registration: None,
                    reconfigure: None,
                }),
                created_at: Instant::now(),
            }),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Observers
    // ─────────────────────────────────────────────────────────────────────

    pub fn name(&self) -> &str {
        &self.inner.spec.name
    }

    pub fn plugin_name(&self) -> &str {
        &self.inner.spec.plugin
    }

    pub fn category(&self) -> &str {
        &self.inner.spec.category
    }

    pub fn state(&self) -> ServiceState {
        self.inner.state.get()
    }

    /// Current configuration snapshot
    pub fn config(&self) -> Arc<ConfigCategory> {
        self.inner.config.read().clone()
    }

    pub fn stats(&self) -> IngestStatsSnapshot {
        self.inner.stats.snapshot(&self.inner.queue)
    }

    pub fn uptime(&self) -> Duration {
        self.inner.created_at.elapsed()
    }

    /// Check if shutdown has been requested
    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    /// Resolves once the service reaches `Shutdown`
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.inner.state.subscribe();
        let _ = rx.wait_for(|state| state.is_terminal()).await;
    }

    /// Check if a poll loop is active
    pub async fn is_polling(&self) -> bool {
        let control = self.inner.control.lock().await;
        control.coordinator.as_ref().is_some_and(|c| c.is_polling())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Control Operations
    // ─────────────────────────────────────────────────────────────────────

    /// Load the plugin, register with the core at `endpoint` and begin ingesting.
    ///
    /// Returns once the service is Running. On failure everything acquired so
    /// far is released and the service is left in `Shutdown`.
    pub async fn start(&self, endpoint: CoreEndpoint) -> ServiceResult<()> {
        let mut control = self.inner.control.lock().await;

        let state = self.state();
        if state != ServiceState::Created {
            return Err(ServiceError::InvalidState {
                operation: "start",
                state,
            });
        }

        self.transition(ServiceState::Starting);
        match self.start_inner(&mut control, &endpoint).await {
            Ok(()) => {
                self.transition(ServiceState::Running);
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    service = %self.name(),
                    plugin = %self.plugin_name(),
                    core = %endpoint,
                    error = %e,
                    "Service failed to start"
                );
                self.teardown(&mut control).await;
                Err(e)
            }
        }
    }

    async fn start_inner(&self, control: &mut Control, endpoint: &CoreEndpoint) -> ServiceResult<()> {
        let handle = self.load_plugin().await?;
        let mode = handle.ingest_mode();
        control.reconfigure = Some(handle.reconfigure_mode());
        *control.plugin.lock().await = Some(handle);

        if self.is_shutting_down() {
            return Err(ServiceError::ShuttingDown);
        }

        let spec = &self.inner.spec;
        let record = ServiceRecord::southbound(&spec.name, &spec.management_address, spec.management_port);
        let mut cancel = self.inner.shutdown_tx.subscribe();
        let token = self.inner.registration.register(endpoint, &record, &mut cancel).await?;
        control.registration = Some((endpoint.clone(), token.clone()));
        self.inner
            .registration
            .register_interest(endpoint, &token, &spec.category)
            .await;

        let coordinator = control.coordinator.insert(IngestCoordinator::new(
            spec.name.clone(),
            Arc::clone(&control.plugin),
            mode,
            Arc::clone(&self.inner.queue),
            Arc::clone(&self.inner.stats),
            Arc::clone(&self.inner.sink),
            spec.ingest.clone(),
        ));
        coordinator.start().await
    }

    /// Resolve and initialize the plugin with its effective configuration
    async fn load_plugin(&self) -> ServiceResult<PluginHandle> {
        let spec = &self.inner.spec;
        let mut handle = PluginHandle::load(&self.inner.registry, &spec.plugin)?;

        let current = self.config();
        let defaults = handle
            .info()
            .default_category(&spec.category)
            .map_err(|e| ServiceError::PluginInitialization {
                plugin: spec.plugin.clone(),
                reason: format!("invalid default configuration: {}", e),
            })?;
        let mut effective = defaults.apply(&current);
        effective.version = current.version;

        if let Err(e) = handle.initialize(&effective).await {
            handle.shutdown().await;
            return Err(e);
        }

        tracing::info!(
            service = %spec.name,
            plugin = %spec.plugin,
            items = effective.items.len(),
            "Plugin initialized"
        );
        *self.inner.config.write() = Arc::new(effective);
        Ok(handle)
    }

    /// Pause ingestion, keeping the plugin loaded
    pub async fn stop(&self) -> ServiceResult<()> {
        let mut control = self.inner.control.lock().await;
        if self.is_shutting_down() {
            return Err(ServiceError::ShuttingDown);
        }

        match self.state() {
            ServiceState::Running => {}
            ServiceState::Paused | ServiceState::Stopping => {
                tracing::debug!(service = %self.name(), "Service already stopped");
                return Ok(());
            }
            state => {
                return Err(ServiceError::InvalidState {
                    operation: "stop",
                    state,
                })
            }
        }

        self.transition(ServiceState::Stopping);
        if let Some(coordinator) = control.coordinator.as_mut() {
            coordinator.pause().await;
        }
        self.transition(ServiceState::Paused);
        Ok(())
    }

    /// Restart ingestion after `stop`
    pub async fn resume(&self) -> ServiceResult<()> {
        let mut control = self.inner.control.lock().await;
        if self.is_shutting_down() {
            return Err(ServiceError::ShuttingDown);
        }

        match self.state() {
            ServiceState::Paused => {}
            ServiceState::Running => {
                tracing::debug!(service = %self.name(), "Service already running");
                return Ok(());
            }
            state => {
                return Err(ServiceError::InvalidState {
                    operation: "resume",
                    state,
                })
            }
        }

        if let Some(coordinator) = control.coordinator.as_mut() {
            coordinator.resume().await?;
        }
        self.transition(ServiceState::Running);
        Ok(())
    }

    /// Terminate the service. Safe to call from any state and more than once.
    pub async fn shutdown(&self) -> ServiceResult<()> {
        if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            tracing::debug!(service = %self.name(), "Shutdown already requested");
            return Ok(());
        }
        self.inner.shutdown_tx.send_replace(true);

        let mut control = self.inner.control.lock().await;
        if self.state().is_terminal() {
            tracing::debug!(service = %self.name(), "Service already shut down");
            return Ok(());
        }

        self.transition(ServiceState::Stopping);
        self.teardown(&mut control).await;
        Ok(())
    }

    /// Apply a configuration change for `category`.
    ///
    /// Changes for other categories are ignored. A change the plugin rejects
    /// leaves the current configuration in place and is reported as
    /// `ReconfigurationRejected`. If the plugin stays busy for longer than the
    /// shutdown grace period the change fails with `Busy`, and a change still
    /// waiting when shutdown begins is discarded.
    pub async fn config_change(&self, category: &str, config: &str) -> ServiceResult<()> {
        if category != self.category() {
            tracing::debug!(service = %self.name(), category = %category, "Ignoring change to unrelated category");
            return Ok(());
        }
        if self.is_shutting_down() {
            tracing::debug!(service = %self.name(), "Discarding configuration change during shutdown");
            return Ok(());
        }

        let changes = ConfigCategory::from_json(category, config)
            .map_err(|e| ServiceError::InvalidConfiguration(e.to_string()))?;

        let mut control = self.inner.control.lock().await;
        let state = self.state();
        if self.is_shutting_down() || state.is_terminal() {
            tracing::debug!(service = %self.name(), "Discarding configuration change during shutdown");
            return Ok(());
        }

        let current = self.config();
        let updated = current.apply(&changes);
        let diff = current.diff(&updated);
        if diff.is_empty() {
            tracing::debug!(service = %self.name(), "Configuration unchanged");
            return Ok(());
        }

        match state {
            ServiceState::Created => {
                // Picked up by `start`
                *self.inner.config.write() = Arc::new(updated);
                return Ok(());
            }
            ServiceState::Running | ServiceState::Paused => {}
            state => {
                return Err(ServiceError::InvalidState {
                    operation: "apply configuration change",
                    state,
                })
            }
        }

        let pause_first = state.is_running() && control.reconfigure == Some(ReconfigureMode::WhilePaused);
        if pause_first {
            if let Some(coordinator) = control.coordinator.as_mut() {
                coordinator.pause().await;
            }
        }

        // A hung poll holds the slot; never let that hold up shutdown
        let grace = self.inner.spec.ingest.shutdown_grace();
        let plugin = Arc::clone(&control.plugin);
        let reconfigure = async {
            let Ok(mut slot) = tokio::time::timeout(grace, plugin.lock()).await else {
                return Err(ServiceError::Busy("plugin is busy producing a reading".to_string()));
            };
            match slot.as_mut() {
                Some(handle) => handle.reconfigure(&updated).await,
                None => Err(ServiceError::Internal("no plugin loaded".to_string())),
            }
        };
        let result = tokio::select! {
            result = reconfigure => result,
            _ = self.shutdown_requested() => {
                tracing::debug!(service = %self.name(), "Discarding configuration change during shutdown");
                return Ok(());
            }
        };

        match &result {
            Ok(()) => {
                tracing::info!(
                    service = %self.name(),
                    version = updated.version,
                    changed = ?diff.changed,
                    added = ?diff.added,
                    "Configuration updated"
                );
                *self.inner.config.write() = Arc::new(updated);
            }
            Err(e) => tracing::warn!(
                service = %self.name(),
                plugin = %self.plugin_name(),
                version = current.version,
                error = %e,
                "Configuration change rejected; keeping current configuration"
            ),
        }

        if pause_first {
            if let Some(coordinator) = control.coordinator.as_mut() {
                if let Err(e) = coordinator.resume().await {
                    tracing::error!(service = %self.name(), error = %e, "Failed to resume ingestion after reconfiguration");
                    self.transition(ServiceState::Paused);
                    return Err(e);
                }
            }
        }

        result
    }

    // ─────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────

    /// Resolves once shutdown has been requested
    async fn shutdown_requested(&self) {
        let mut rx = self.inner.shutdown_tx.subscribe();
        let _ = rx.wait_for(|requested| *requested).await;
    }

    fn transition(&self, to: ServiceState) {
        let from = self.inner.state.set(to);
        if from != to {
            tracing::info!(service = %self.name(), from = %from, to = %to, "State transition");
        }
    }

    /// Release everything `start` acquired and enter `Shutdown`
    async fn teardown(&self, control: &mut Control) {
        if let Some(mut coordinator) = control.coordinator.take() {
            coordinator.shutdown().await;
        }

        let handle = control.plugin.lock().await.take();
        if let Some(handle) = handle {
            handle.shutdown().await;
        }

        if let Some((endpoint, token)) = control.registration.take() {
            self.inner.registration.deregister(&endpoint, &token).await;
        }

        self.inner.shutting_down.store(true, Ordering::SeqCst);
        self.inner.shutdown_tx.send_replace(true);
        self.transition(ServiceState::Shutdown);
    }
}

impl std::fmt::Debug for SouthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SouthService")
            .field("name", &self.inner.spec.name)
            .field("plugin", &self.inner.spec.plugin)
            .field("state", &self.state())
            .finish()
    }
}

#[async_trait]
impl ServiceHandler for SouthService {
    fn service_name(&self) -> &str {
        self.name()
    }

    fn status(&self) -> ServiceStatus {
        ServiceStatus {
            name: self.name().to_string(),
            plugin: self.plugin_name().to_string(),
            state: self.state(),
            uptime_secs: self.uptime().as_secs(),
            config_version: self.config().version,
            ingest: self.stats(),
        }
    }

    async fn shutdown(&self) -> ServiceResult<()> {
        SouthService::shutdown(self).await
    }

    async fn config_change(&self, category: &str, config: &str) -> ServiceResult<()> {
        SouthService::config_change(self, category, config).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::ChannelSink;
    use crate::registration::{CoreCall, InMemoryCore, RetryPolicy};

    fn service(plugin: &str, config: ConfigCategory) -> (SouthService, Arc<InMemoryCore>) {
        let core = Arc::new(InMemoryCore::new());
        let (sink, _rx) = ChannelSink::new(1024);
        let service = SouthService::new(
            ServiceSpec::new("svc", plugin).with_config(config),
            PluginRegistry::with_builtins(),
            RegistrationClient::new(core.clone(), RetryPolicy::no_retry()),
            Arc::new(sink),
        );
        (service, core)
    }

    fn endpoint() -> CoreEndpoint {
        CoreEndpoint::new("localhost", 8081)
    }

    #[tokio::test]
    async fn test_stop_before_start_is_rejected() {
        let (service, _) = service("sim-thermo", ConfigCategory::new("svc"));
        let err = service.stop().await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::InvalidState {
                operation: "stop",
                state: ServiceState::Created
            }
        ));
        assert_eq!(service.state(), ServiceState::Created);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lifecycle() {
        let (service, core) = service("sim-thermo", ConfigCategory::new("svc").with_item("interval", "100"));

        service.start(endpoint()).await.unwrap();
        assert_eq!(service.state(), ServiceState::Running);
        assert!(service.is_polling().await);
        // Defaults overlaid with operator items
        assert_eq!(service.config().get("interval"), Some("100"));
        assert_eq!(service.config().get("asset"), Some("temperature"));
        assert_eq!(core.registered().len(), 1);

        service.stop().await.unwrap();
        assert_eq!(service.state(), ServiceState::Paused);
        assert!(!service.is_polling().await);
        service.stop().await.unwrap();

        service.resume().await.unwrap();
        assert_eq!(service.state(), ServiceState::Running);

        service.shutdown().await.unwrap();
        assert_eq!(service.state(), ServiceState::Shutdown);
        assert!(core.registered().is_empty());
        assert!(matches!(core.calls().last(), Some(CoreCall::Deregister { .. })));

        // Idempotent
        service.shutdown().await.unwrap();
        assert!(matches!(
            service.start(endpoint()).await,
            Err(ServiceError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_initial_config_fails_start() {
        let (service, core) = service("sim-thermo", ConfigCategory::new("svc").with_item("interval", "0"));

        let err = service.start(endpoint()).await.unwrap_err();
        assert!(matches!(err, ServiceError::PluginInitialization { .. }));
        assert_eq!(service.state(), ServiceState::Shutdown);
        assert!(core.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_change_keeps_config() {
        let (service, _) = service("sim-thermo", ConfigCategory::new("svc"));
        service.start(endpoint()).await.unwrap();
        let before = service.config();

        let err = service
            .config_change("svc", r#"{"interval": "-5"}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::ReconfigurationRejected { .. }));
        assert_eq!(service.config(), before);
        assert_eq!(service.state(), ServiceState::Running);

        service.config_change("svc", r#"{"interval": "250"}"#).await.unwrap();
        assert_eq!(service.config().get("interval"), Some("250"));
        assert_eq!(service.config().version, before.version + 1);

        service.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_change_filtering() {
        let (service, _) = service("sim-thermo", ConfigCategory::new("svc"));
        service.start(endpoint()).await.unwrap();
        let version = service.config().version;

        // Other category
        service.config_change("other", r#"{"interval": "5"}"#).await.unwrap();
        // Same value
        service.config_change("svc", r#"{"interval": "1000"}"#).await.unwrap();
        assert_eq!(service.config().version, version);

        assert!(matches!(
            service.config_change("svc", "not json").await,
            Err(ServiceError::InvalidConfiguration(_))
        ));

        service.shutdown().await.unwrap();
        // Discarded once shut down
        service.config_change("svc", r#"{"interval": "5"}"#).await.unwrap();
        assert_eq!(service.config().version, version);
    }

    #[tokio::test]
    async fn test_change_before_start_is_kept() {
        let (service, _) = service("sim-thermo", ConfigCategory::new("svc"));
        service.config_change("svc", r#"{"asset": "boiler"}"#).await.unwrap();
        assert_eq!(service.config().get("asset"), Some("boiler"));
        assert_eq!(service.state(), ServiceState::Created);
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_plugin_reconfigures_while_paused() {
        let (service, _) = service("sim-counter", ConfigCategory::new("svc").with_item("interval", "100"));
        service.start(endpoint()).await.unwrap();
        assert!(!service.is_polling().await);

        service.config_change("svc", r#"{"step": "5"}"#).await.unwrap();
        assert_eq!(service.state(), ServiceState::Running);
        assert_eq!(service.config().get("step"), Some("5"));

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(service.stats().produced > 0);
        service.shutdown().await.unwrap();
    }
}
