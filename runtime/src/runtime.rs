//! The compute session: devices, caches and the default queue.

use std::sync::Arc;

use kiln_device::{Device, DeviceInfo, DeviceSpec, Kernel, Program, Queue};
use once_cell::sync::OnceCell;

use crate::config::RuntimeConfig;
use crate::device_registry::DeviceFactoryRegistry;
use crate::disk_cache::DiskCache;
use crate::error::Result;
use crate::parameter_cache::ParameterCache;
use crate::program_cache::ProgramCache;

/// Owns everything generated kernels share across calls.
///
/// Algorithms take a `&ComputeRuntime` explicitly; there is no process-wide instance. Two
/// runtimes never share compiled programs in memory, but they do share the disk cache when
/// configured with the same directory.
///
/// ```ignore
/// let rt = ComputeRuntime::from_env();
/// let queue = rt.default_queue()?;
/// let program = rt.program(queue.device(), "saxpy:float", "", || Ok(source.clone()))?;
/// ```
#[derive(Debug)]
pub struct ComputeRuntime {
    config: RuntimeConfig,
    devices: DeviceFactoryRegistry,
    programs: ProgramCache,
    parameters: ParameterCache,
    disk: Option<DiskCache>,
    default_queue: OnceCell<Queue>,
}

impl Default for ComputeRuntime {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

impl ComputeRuntime {
    pub fn new(config: RuntimeConfig) -> Self {
        let disk = config.disk_cache.then(|| DiskCache::new(&config.cache_dir));
        Self {
            config,
            devices: DeviceFactoryRegistry::new(),
            programs: ProgramCache::new(),
            parameters: ParameterCache::new(),
            disk,
            default_queue: OnceCell::new(),
        }
    }

    /// Runtime configured by [`RuntimeConfig::from_env`].
    pub fn from_env() -> Self {
        Self::new(RuntimeConfig::from_env())
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Backend registry, for registering additional device factories.
    pub fn devices(&self) -> &DeviceFactoryRegistry {
        &self.devices
    }

    /// The configured device.
    pub fn device(&self) -> Result<Arc<Device>> {
        self.device_for(&self.config.device)
    }

    pub fn device_for(&self, spec: &DeviceSpec) -> Result<Arc<Device>> {
        self.devices.device(spec, &self.config)
    }

    /// A queue on the configured device, created on first use and shared afterwards.
    pub fn default_queue(&self) -> Result<Queue> {
        self.default_queue.get_or_try_init(|| Ok(self.device()?.create_queue()?)).cloned()
    }

    pub fn programs(&self) -> &ProgramCache {
        &self.programs
    }

    pub fn parameters(&self) -> &ParameterCache {
        &self.parameters
    }

    pub fn disk_cache(&self) -> Option<&DiskCache> {
        self.disk.as_ref()
    }

    /// Shorthand for [`ParameterCache::get`].
    pub fn parameter(&self, device: &DeviceInfo, key: &str, name: &str, default: usize) -> usize {
        self.parameters.get(device, key, name, default)
    }

    /// The program for `key` on `device`, built from `source` on a miss.
    ///
    /// `key` names the computation (`{algorithm}:{types}`); the device identity and `options`
    /// are appended here, so callers only need to make `key` determine the source text.
    pub fn program(
        &self,
        device: &Device,
        key: &str,
        options: &str,
        source: impl FnOnce() -> Result<String>,
    ) -> Result<Arc<dyn Program>> {
        let full_key = format!("{key}:{}:{options}", device.identity());
        self.programs.get_or_build(device, &full_key, options, self.disk.as_ref(), source)
    }

    /// Entry `entry` of the program for `key`, with no arguments bound.
    pub fn kernel(
        &self,
        device: &Device,
        key: &str,
        entry: &str,
        options: &str,
        source: impl FnOnce() -> Result<String>,
    ) -> Result<Kernel> {
        let program = self.program(device, key, options, source)?;
        Ok(Kernel::new(program, entry)?)
    }
}
