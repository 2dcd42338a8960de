//! Run-time side of kiln: device backends, program and parameter caches, and the bound source
//! builder the algorithms generate kernels with.
//!
//! # Backends
//!
//! - **host** (always available): host C compiled by `clang`/`cc` into a shared library,
//!   loaded with `dlopen` and run on host threads with emulated work-groups
//! - **opencl** (feature `opencl`): OpenCL C built by the platform driver
//!
//! # Caching
//!
//! [`ComputeRuntime`] owns a [`ProgramCache`] (at most one build per key), an optional
//! [`DiskCache`] of compiled binaries, and a [`ParameterCache`] of tuned launch geometry.

pub mod clang;
pub mod config;
pub mod device_registry;
pub mod devices;
pub mod disk_cache;
pub mod error;
pub mod meta_kernel;
pub mod parameter_cache;
pub mod program_cache;
pub mod runtime;
pub mod tune;
pub mod work_size;

#[cfg(test)]
pub mod test;

pub use clang::{HostCompiler, HostProgram};
pub use config::RuntimeConfig;
pub use device_registry::{DeviceFactory, DeviceFactoryRegistry};
pub use devices::create_host_device;
pub use disk_cache::DiskCache;
pub use error::{Error, Result};
pub use meta_kernel::MetaKernel;
pub use parameter_cache::{ParameterCache, tree_fits_local_memory};
pub use program_cache::{CacheStats, ProgramCache};
pub use runtime::ComputeRuntime;
pub use tune::{Measurement, TuneConfig, TuneResult, measure, tune_parameter};
