//! Device factory registry: opens devices on first use and caches them by [`DeviceSpec`].

use std::collections::HashMap;
use std::sync::Arc;

use kiln_device::{Device, DeviceSpec};
use parking_lot::RwLock;

use crate::config::RuntimeConfig;
use crate::error::{Result, UnsupportedDeviceSnafu};

/// Opens the device a [`DeviceSpec`] names.
pub type DeviceFactory = Arc<dyn Fn(&DeviceSpec, &RuntimeConfig) -> kiln_device::Result<Device> + Send + Sync>;

/// Registry for opened devices with caching and factory registration.
///
/// # Thread Safety
///
/// Uses `parking_lot::RwLock`: cached devices are served under a read lock, and a device is
/// opened under the write lock after re-checking the cache, so each spec is opened once.
pub struct DeviceFactoryRegistry {
    devices: RwLock<HashMap<DeviceSpec, Arc<Device>>>,
    factories: RwLock<HashMap<String, DeviceFactory>>,
}

impl std::fmt::Debug for DeviceFactoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceFactoryRegistry")
            .field("devices", &self.devices.read().keys().collect::<Vec<_>>())
            .field("factories", &self.factories.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl DeviceFactoryRegistry {
    /// Create a registry with the built-in backends registered.
    pub fn new() -> Self {
        let registry = Self { devices: RwLock::new(HashMap::new()), factories: RwLock::new(HashMap::new()) };

        registry.register_factory("HOST", Arc::new(|_spec, config| crate::devices::create_host_device(config)));
        #[cfg(feature = "opencl")]
        registry.register_factory("OPENCL", Arc::new(crate::devices::create_opencl_device));

        registry
    }

    /// Register a factory for a device type (case-insensitive), replacing any previous one.
    pub fn register_factory(&self, device_type: &str, factory: DeviceFactory) {
        self.factories.write().insert(device_type.to_uppercase(), factory);
    }

    pub fn has_factory(&self, device_type: &str) -> bool {
        self.factories.read().contains_key(&device_type.to_uppercase())
    }

    /// Get or open the device for `spec`.
    pub fn device(&self, spec: &DeviceSpec, config: &RuntimeConfig) -> Result<Arc<Device>> {
        if let Some(device) = self.devices.read().get(spec) {
            return Ok(Arc::clone(device));
        }

        let mut devices = self.devices.write();
        if let Some(device) = devices.get(spec) {
            return Ok(Arc::clone(device));
        }

        let device_type = spec.base_type();
        let factory = self
            .factories
            .read()
            .get(device_type)
            .cloned()
            .ok_or_else(|| UnsupportedDeviceSnafu { device: spec.to_string() }.build())?;

        let device = Arc::new(factory(spec, config)?);
        tracing::debug!(device.spec = %spec, device.identity = %device.identity(), "device opened");
        devices.insert(spec.clone(), Arc::clone(&device));
        Ok(device)
    }
}

impl Default for DeviceFactoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}
