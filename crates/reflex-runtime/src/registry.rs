//! Published driver registry
//!
//! Holds the compiled artifact for every loaded driver type. Publication
//! replaces the previous artifact wholesale: readers that already cloned
//! the `Arc` keep evaluating against the version they started with, new
//! lookups see the new one.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::compiler::CompiledDriver;

/// Registry of published compiled drivers, keyed by driver name
#[derive(Default)]
pub struct DriverRegistry {
    drivers: DashMap<String, Arc<CompiledDriver>>,
}

impl DriverRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a compiled driver, replacing any previous version
    pub fn publish(&self, compiled: CompiledDriver) -> Arc<CompiledDriver> {
        let compiled = Arc::new(compiled);
        debug!(
            driver = %compiled.name,
            version = %compiled.version,
            degraded = compiled.degraded,
            "publishing compiled driver"
        );
        self.drivers
            .insert(compiled.name.clone(), compiled.clone());
        compiled
    }

    /// Look up the current artifact for a driver
    pub fn get(&self, name: &str) -> Option<Arc<CompiledDriver>> {
        self.drivers.get(name).map(|entry| entry.value().clone())
    }

    /// Remove a driver, returning its last artifact
    pub fn remove(&self, name: &str) -> Option<Arc<CompiledDriver>> {
        self.drivers.remove(name).map(|(_, compiled)| compiled)
    }

    /// Number of published drivers
    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use reflex_model::DriverDefinition;

    #[test]
    fn test_publish_replaces_wholesale() {
        let registry = DriverRegistry::new();

        let first = registry.publish(compile(&DriverDefinition::new("bulb", "1.0.0", "h1")));
        let held = registry.get("bulb").unwrap();
        assert_eq!(held.version, "1.0.0");

        registry.publish(compile(&DriverDefinition::new("bulb", "1.1.0", "h2")));

        // the old Arc keeps its artifact; new lookups see the upgrade
        assert_eq!(first.version, "1.0.0");
        assert_eq!(held.version, "1.0.0");
        assert_eq!(registry.get("bulb").unwrap().version, "1.1.0");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove() {
        let registry = DriverRegistry::new();
        registry.publish(compile(&DriverDefinition::new("bulb", "1.0.0", "h1")));

        assert!(registry.remove("bulb").is_some());
        assert!(registry.get("bulb").is_none());
        assert!(registry.is_empty());
    }
}
