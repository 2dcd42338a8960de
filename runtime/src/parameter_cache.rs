//! Tuned launch parameters per device.
//!
//! Algorithms read their geometry (work-group size, values per thread, groups per compute
//! unit) through [`ParameterCache::get`] with a built-in default; callers and the tuner may
//! override a value with [`ParameterCache::set`]. Nothing is persisted.

use kiln_device::DeviceInfo;
use papaya::HashMap;

/// `(device identity, algorithm key, parameter name)`
type ParamKey = (String, String, String);

#[derive(Default)]
pub struct ParameterCache {
    values: HashMap<ParamKey, usize>,
}

impl std::fmt::Debug for ParameterCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParameterCache").field("len", &self.values.pin().len()).finish()
    }
}

impl ParameterCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(device: &DeviceInfo, key: &str, name: &str) -> ParamKey {
        (device.identity(), key.to_string(), name.to_string())
    }

    pub fn get(&self, device: &DeviceInfo, key: &str, name: &str, default: usize) -> usize {
        self.values.pin().get(&Self::key(device, key, name)).copied().unwrap_or(default)
    }

    /// Store `value`, returning the value it replaced.
    pub fn set(&self, device: &DeviceInfo, key: &str, name: &str, value: usize) -> Option<usize> {
        tracing::debug!(device = %device.name, param.key = key, param.name = name, param.value = value, "set parameter");
        self.values.pin().insert(Self::key(device, key, name), value).copied()
    }

    /// Forget an override so that [`ParameterCache::get`] returns its default again.
    pub fn reset(&self, device: &DeviceInfo, key: &str, name: &str) -> Option<usize> {
        self.values.pin().remove(&Self::key(device, key, name)).copied()
    }

    /// Put back a value returned by [`ParameterCache::set`] or [`ParameterCache::reset`].
    pub fn restore(&self, device: &DeviceInfo, key: &str, name: &str, previous: Option<usize>) {
        match previous {
            Some(value) => {
                self.set(device, key, name, value);
            }
            None => {
                self.reset(device, key, name);
            }
        }
    }
}

/// Whether a tree reduction over `work_group_size` items of `bytes_per_item` leaves room for
/// four resident work-groups in local memory.
pub fn tree_fits_local_memory(device: &DeviceInfo, work_group_size: usize, bytes_per_item: usize) -> bool {
    bytes_per_item.saturating_mul(work_group_size).saturating_mul(4) <= device.local_mem_size
}
