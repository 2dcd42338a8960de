use kiln_codegen::{KernelSource, Param};
use kiln_device::{Dialect, Queue};
use kiln_dtype::DType;
use once_cell::sync::Lazy;

use crate::{ComputeRuntime, RuntimeConfig};

pub mod unit;

/// Shared host runtime, so each distinct kernel compiles once per test binary.
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

/// `out[i] = value` for every work-item.
pub fn fill_source(name: &str, value: i32) -> String {
    let mut kernel = KernelSource::new(name, Dialect::HostC);
    kernel.declare_argument(Param::global("out", DType::Int32));
    kernel.emit_raw(format!("out[get_global_id(0)] = {value};\n"));
    kernel.serialize()
}
