//! Service Settings
//!
//! Settings are layered, later sources overriding earlier ones:
//! 1. built-in defaults
//! 2. an optional TOML file
//! 3. environment variables prefixed with `SOUTH_`, `__` separating sections
//!    (e.g. `SOUTH_CORE__PORT=8082`)

use std::collections::BTreeMap;
use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use south_plugin::ConfigCategory;

use crate::ingest::IngestOptions;
use crate::registration::{CoreEndpoint, RetryPolicy};
use crate::service::ServiceSpec;

/// Errors loading or validating settings
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Failed to load settings: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("Invalid settings: {0}")]
    Invalid(String),
}

/// Top-level settings of the south service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SouthSettings {
    pub service: ServiceSection,
    pub core: CoreSection,
    pub management: ManagementSection,
    pub ingest: IngestOptions,
    pub registration: RetryPolicy,
    /// Initial configuration items, overlaid on the plugin's defaults
    pub config: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSection {
    pub name: String,
    pub plugin: String,
    /// Configuration category; the service name when unset
    pub category: Option<String>,
    /// Address the core uses to reach this service
    pub address: String,
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            name: "south".to_string(),
            plugin: "sim-thermo".to_string(),
            category: None,
            address: "localhost".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreSection {
    pub address: String,
    pub port: u16,
}

impl Default for CoreSection {
    fn default() -> Self {
        Self {
            address: "localhost".to_string(),
            port: 8081,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagementSection {
    /// Interface the management API binds to
    pub host: String,
    /// 0 picks a free port
    pub port: u16,
}

impl Default for ManagementSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 0,
        }
    }
}

impl SouthSettings {
    /// Load from defaults and environment only
    pub fn load() -> Result<Self, SettingsError> {
        Self::figment(None).extract().map_err(|e| SettingsError::Load(Box::new(e)))
    }

    /// Load with `path` layered between defaults and environment
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        Self::figment(Some(path.as_ref()))
            .extract()
            .map_err(|e| SettingsError::Load(Box::new(e)))
    }

    fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(SouthSettings::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed("SOUTH_").split("__"))
    }

    /// Validate settings after loading
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.service.name.trim().is_empty() {
            return Err(SettingsError::Invalid("service.name must not be empty".into()));
        }
        if self.service.plugin.trim().is_empty() {
            return Err(SettingsError::Invalid("service.plugin must not be empty".into()));
        }
        if self.category().trim().is_empty() {
            return Err(SettingsError::Invalid("service.category must not be empty".into()));
        }
        if self.core.address.trim().is_empty() {
            return Err(SettingsError::Invalid("core.address must not be empty".into()));
        }
        if self.ingest.queue_depth == 0 {
            return Err(SettingsError::Invalid("ingest.queue_depth must be at least 1".into()));
        }
        if self.ingest.batch_size == 0 {
            return Err(SettingsError::Invalid("ingest.batch_size must be at least 1".into()));
        }
        if self.registration.max_attempts == 0 {
            return Err(SettingsError::Invalid(
                "registration.max_attempts must be at least 1".into(),
            ));
        }
        if self.registration.multiplier < 1.0 {
            return Err(SettingsError::Invalid(format!(
                "registration.multiplier must be at least 1.0, got {}",
                self.registration.multiplier
            )));
        }
        Ok(())
    }

    pub fn category(&self) -> &str {
        self.service.category.as_deref().unwrap_or(&self.service.name)
    }

    pub fn core_endpoint(&self) -> CoreEndpoint {
        CoreEndpoint::new(&self.core.address, self.core.port)
    }

    /// Initial configuration category built from the `config` section
    pub fn initial_config(&self) -> Result<ConfigCategory, SettingsError> {
        let items = serde_json::Value::Object(self.config.clone().into_iter().collect());
        ConfigCategory::from_value(self.category(), &items)
            .map_err(|e| SettingsError::Invalid(format!("config: {}", e)))
    }

    /// Build the service spec; the management port is supplied once bound
    pub fn service_spec(&self, management_port: u16) -> Result<ServiceSpec, SettingsError> {
        Ok(ServiceSpec::new(&self.service.name, &self.service.plugin)
            .with_category(self.category())
            .with_config(self.initial_config()?)
            .with_ingest(self.ingest.clone())
            .with_management(&self.service.address, management_port))
    }
}
