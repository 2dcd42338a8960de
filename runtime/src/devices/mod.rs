//! Device backends.

pub mod host;
pub mod host_queue;
#[cfg(feature = "opencl")]
pub mod opencl;

pub use host::{create_host_device, host_info};
pub use host_queue::HostQueue;
#[cfg(feature = "opencl")]
pub use opencl::create_opencl_device;
