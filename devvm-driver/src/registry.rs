//! Driver registry: maps a driver tag to the factory that builds its drivers.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::{DriverError, Result};
use crate::none::NoneDriverFactory;
use crate::traits::Driver;
use crate::types::{DriverKind, MachineConfig};

/// Builds driver configuration and driver instances for one driver kind.
pub trait DriverFactory: Send + Sync {
    /// Kind this factory serves.
    fn kind(&self) -> DriverKind;

    /// Build the driver-specific configuration for a new machine.
    fn create_config(&self, machine_name: &str, config: &MachineConfig) -> Result<serde_json::Value>;

    /// Instantiate a driver from a persisted raw configuration.
    fn load(&self, machine_name: &str, raw: &serde_json::Value) -> Result<Box<dyn Driver>>;
}

/// Registry of available driver factories.
#[derive(Default, Clone)]
pub struct DriverRegistry {
    factories: BTreeMap<DriverKind, Arc<dyn DriverFactory>>,
}

impl DriverRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the drivers that need no external backend.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(NoneDriverFactory));
        registry
    }

    /// Register a factory, replacing any previous one for the same kind.
    pub fn register(&mut self, factory: Arc<dyn DriverFactory>) {
        debug!(driver = %factory.kind(), "Registering driver");
        self.factories.insert(factory.kind(), factory);
    }

    /// Look up the factory for a driver tag.
    ///
    /// Unknown tags fail with [`DriverError::UnsupportedDriver`], known but
    /// unregistered kinds with [`DriverError::DriverNotFound`].
    pub fn resolve(&self, tag: &str) -> Result<Arc<dyn DriverFactory>> {
        let kind: DriverKind = tag.parse()?;
        self.get(kind)
    }

    /// Look up the factory for a driver kind.
    pub fn get(&self, kind: DriverKind) -> Result<Arc<dyn DriverFactory>> {
        self.factories
            .get(&kind)
            .cloned()
            .ok_or_else(|| DriverError::DriverNotFound(kind.to_string()))
    }

    /// Registered driver kinds.
    pub fn kinds(&self) -> Vec<DriverKind> {
        self.factories.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry_has_none_driver() {
        let registry = DriverRegistry::with_builtin();
        assert_eq!(registry.kinds(), vec![DriverKind::None]);
        assert_eq!(registry.resolve("none").unwrap().kind(), DriverKind::None);
    }

    #[test]
    fn test_resolve_unknown_tag() {
        let registry = DriverRegistry::with_builtin();
        assert!(matches!(
            registry.resolve("bochs"),
            Err(DriverError::UnsupportedDriver(_))
        ));
    }

    #[test]
    fn test_resolve_unregistered_kind() {
        let registry = DriverRegistry::with_builtin();
        assert!(matches!(
            registry.resolve("kvm2"),
            Err(DriverError::DriverNotFound(kind)) if kind == "kvm2"
        ));
    }
}
