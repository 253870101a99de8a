//! Plugin registry
//!
//! A name-keyed table of factories. Each lookup builds a fresh, empty
//! implementation that the config resolver then parses into. The table is
//! assembled once at start and only read afterwards.

use sdk::errors::{InstallerError, Result};
use sdk::plugin::PluginImplementation;
use std::collections::BTreeMap;
use vplug_pki::{PkiBackend, PkiMonitor};

/// Builds a new implementation instance
pub type PluginFactory = Box<dyn Fn() -> Box<dyn PluginImplementation> + Send + Sync>;

#[derive(Default)]
pub struct PluginRegistry {
    factories: BTreeMap<String, PluginFactory>,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("types", &self.supported_types())
            .finish()
    }
}

impl PluginRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every plugin type shipped in this workspace
    pub fn builtin() -> Self {
        Self::new()
            .with(vplug_pki::backend::TYPE_NAME, || {
                Box::new(PkiBackend::default())
            })
            .with(vplug_pki::monitor::TYPE_NAME, || {
                Box::new(PkiMonitor::default())
            })
    }

    /// Add a factory under `name`, replacing any previous one
    pub fn with<F>(mut self, name: &str, factory: F) -> Self
    where
        F: Fn() -> Box<dyn PluginImplementation> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Box::new(factory));
        self
    }

    /// Build a new instance of the plugin type `name`
    pub fn lookup(&self, name: &str) -> Result<Box<dyn PluginImplementation>> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| InstallerError::PluginNotFound(name.to_string()))
    }

    /// Registered type names, sorted
    pub fn supported_types(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_types() {
        let registry = PluginRegistry::builtin();
        assert_eq!(registry.supported_types(), vec!["pki-backend", "pki-monitor"]);
    }

    #[test]
    fn test_lookup_builds_fresh_instances() {
        let registry = PluginRegistry::builtin();
        let a = registry.lookup("pki-backend").unwrap();
        let b = registry.lookup("pki-backend").unwrap();
        assert_eq!(a.type_name(), "pki-backend");
        assert!(!std::ptr::eq(
            a.as_ref() as *const dyn PluginImplementation as *const u8,
            b.as_ref() as *const dyn PluginImplementation as *const u8
        ));
    }

    #[test]
    fn test_unknown_type() {
        let registry = PluginRegistry::builtin();
        assert_eq!(
            registry.lookup("kv").unwrap_err(),
            InstallerError::PluginNotFound("kv".into())
        );
    }
}
