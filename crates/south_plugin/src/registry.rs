// Plugin Registry - Named factories for south plugins
//
// Plugins are selected by name at service start. Each name maps to a factory
// producing a fresh, uninitialized plugin instance.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::builtin;
use crate::{PluginError, PluginResult, SouthPlugin};

/// Factory producing a new plugin instance
pub type PluginFactory = Arc<dyn Fn() -> Box<dyn SouthPlugin> + Send + Sync>;

/// Registry of available plugins
#[derive(Clone, Default)]
pub struct PluginRegistry {
    factories: BTreeMap<String, PluginFactory>,
}

impl PluginRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the built-in simulated plugins
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtin::register_all(&mut registry);
        registry
    }

    /// Register a plugin factory, replacing any existing factory with that name
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn SouthPlugin> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.factories.insert(name.clone(), Arc::new(factory)).is_some() {
            tracing::debug!(plugin = %name, "Replaced plugin factory");
        }
    }

    /// Instantiate a plugin by name
    pub fn create(&self, name: &str) -> PluginResult<Box<dyn SouthPlugin>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
        Ok(factory())
    }

    /// Check if a plugin is registered
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered plugin names, sorted
    pub fn names(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::SimThermo;

    #[test]
    fn test_builtins_registered() {
        let registry = PluginRegistry::with_builtins();
        assert!(registry.contains("sim-thermo"));
        assert!(registry.contains("sim-counter"));
        assert_eq!(registry.names(), vec!["sim-counter", "sim-thermo"]);
    }

    #[test]
    fn test_create_unknown_plugin() {
        let registry = PluginRegistry::new();
        assert!(registry.is_empty());
        assert!(matches!(registry.create("nope"), Err(PluginError::NotFound(name)) if name == "nope"));
    }

    #[test]
    fn test_create_returns_fresh_instances() {
        let mut registry = PluginRegistry::new();
        registry.register("thermo", || Box::new(SimThermo::new()));

        let a = registry.create("thermo").unwrap();
        let b = registry.create("thermo").unwrap();
        assert_eq!(a.info().name, "sim-thermo");
        assert_eq!(b.info().name, "sim-thermo");
        assert_eq!(registry.len(), 1);
    }
}
