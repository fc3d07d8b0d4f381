/*!
 * Driver registry.
 *
 * Maps the `driver` option of a configured device to a factory producing a
 * fresh driver instance. The registry is populated at startup and only
 * read afterwards.
 */
use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use tagbridge_core::config::Device;

use crate::driver::DeviceDriver;
use crate::drivers::{BinderKbDriver, BinderKbfDriver, TestDriver};
use crate::error::{DeviceError, Result};

/// Factory producing a driver instance
pub type DriverFactory = Arc<dyn Fn() -> DeviceDriver + Send + Sync>;

/// Registry of driver kinds
#[derive(Clone, Default)]
pub struct DriverRegistry {
    factories: HashMap<String, DriverFactory>,
}

impl DriverRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Create a registry holding the drivers shipped with this crate
    pub fn with_builtin_drivers() -> Self {
        let mut registry = Self::new();
        registry.register(TestDriver::KIND, || DeviceDriver::single_request(TestDriver::new()));
        registry.register(BinderKbDriver::KIND, || {
            DeviceDriver::single_request(BinderKbDriver::new())
        });
        registry.register(BinderKbfDriver::KIND, || DeviceDriver::batch(BinderKbfDriver::new()));
        registry
    }

    /// Register a driver kind, replacing any previous factory of that name
    pub fn register<F>(&mut self, kind: &str, factory: F)
    where
        F: Fn() -> DeviceDriver + Send + Sync + 'static,
    {
        debug!("Registered driver kind {}", kind);
        self.factories.insert(kind.to_string(), Arc::new(factory));
    }

    /// Whether a driver kind is known
    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Registered driver kinds, sorted
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Create a driver for a configured device
    pub fn create(&self, device: &Device) -> Result<DeviceDriver> {
        let factory = self
            .factories
            .get(device.driver())
            .ok_or_else(|| DeviceError::UnknownDriver(device.driver().to_string()))?;
        Ok(factory())
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_kinds() {
        let registry = DriverRegistry::with_builtin_drivers();
        assert_eq!(registry.kinds(), vec!["binder_kb", "binder_kbf", "test"]);
        assert!(registry.contains("test"));
        assert!(!registry.contains("modbus"));
    }

    #[test]
    fn test_create_known_driver() {
        let registry = DriverRegistry::with_builtin_drivers();
        let device = Device::new("oven", "binder_kb", HashMap::new());
        let driver = registry.create(&device).unwrap();
        assert!(matches!(driver, DeviceDriver::SingleRequest(_)));

        let device = Device::new("oven", "binder_kbf", HashMap::new());
        let driver = registry.create(&device).unwrap();
        assert!(matches!(driver, DeviceDriver::Batch(_)));
    }

    #[test]
    fn test_unknown_driver() {
        let registry = DriverRegistry::with_builtin_drivers();
        let device = Device::new("plc", "modbus", HashMap::new());
        let err = registry.create(&device).unwrap_err();
        assert!(matches!(err, DeviceError::UnknownDriver(kind) if kind == "modbus"));

        let unset = Device::new("plc", "", HashMap::new());
        assert!(registry.create(&unset).is_err());
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = DriverRegistry::new();
        registry.register("test", || DeviceDriver::single_request(TestDriver::new()));
        registry.register("test", || DeviceDriver::single_request(TestDriver::new()));
        assert_eq!(registry.kinds(), vec!["test"]);
    }
}
