use kiln_device::Queue;
use kiln_dtype::Element;
use kiln_runtime::{ComputeRuntime, RuntimeConfig};
use once_cell::sync::Lazy;

use crate::DeviceVec;


/// Shared host runtime, so each distinct kernel compiles once per test binary.
///
/// Tests that change tuning parameters build their own runtime instead.
pub static RUNTIME: Lazy<ComputeRuntime> = Lazy::new(|| {
    init_tracing();
    ComputeRuntime::new(RuntimeConfig::builder().disk_cache(false).build())
});

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn queue() -> Queue {
    RUNTIME.default_queue().unwrap()
}

/// A private runtime with its own parameter cache.
pub fn isolated_runtime(config: RuntimeConfig) -> ComputeRuntime {
    init_tracing();
    ComputeRuntime::new(config)
}

pub fn upload<T: Element>(data: &[T]) -> DeviceVec<T> {
    DeviceVec::from_slice(&queue(), data).unwrap()
}
