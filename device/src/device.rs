//! A device bundles what is needed to run generated kernels on one piece of hardware:
//!
//! - **Compiler**: kernel source to binary bytes
//! - **Runtime**: binary bytes to a loaded [`Program`](crate::program::Program)
//! - **Allocator**: device memory
//! - **Queue factory**: command streams
//!
//! ```ignore
//! let device = kiln_runtime::create_host_device(&config)?;
//! let binary = device.compiler.compile(&source, "")?;
//! let program = (device.runtime)("my_kernel", &binary)?;
//! let queue = device.create_queue()?;
//! ```

use std::fmt;
use std::sync::Arc;

use crate::allocator::Allocator;
use crate::buffer::Buffer;
use crate::error::Result;
use crate::info::{DeviceInfo, DeviceSpec, Dialect};
use crate::program::{Compiler, RuntimeFactory};
use crate::queue::{CommandQueue, Queue};

/// Creates a backend command stream for a device.
pub type QueueFactory = Arc<dyn Fn(&Arc<Device>) -> Result<Arc<dyn CommandQueue>> + Send + Sync>;

pub struct Device {
    pub spec: DeviceSpec,
    pub info: DeviceInfo,
    pub dialect: Dialect,
    pub allocator: Arc<dyn Allocator>,
    pub compiler: Arc<dyn Compiler>,
    pub runtime: RuntimeFactory,
    queue_factory: QueueFactory,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device").field("spec", &self.spec).field("info", &self.info).field("dialect", &self.dialect).finish()
    }
}

impl Device {
    pub fn new(
        spec: DeviceSpec,
        info: DeviceInfo,
        dialect: Dialect,
        allocator: Arc<dyn Allocator>,
        compiler: Arc<dyn Compiler>,
        runtime: RuntimeFactory,
        queue_factory: QueueFactory,
    ) -> Self {
        Self { spec, info, dialect, allocator, compiler, runtime, queue_factory }
    }

    /// Identity of compiled artifacts: the device identity plus the compiler configuration.
    pub fn identity(&self) -> String {
        match self.compiler.cache_key() {
            Some(key) => format!("{}/{key}", self.info.identity()),
            None => self.info.identity(),
        }
    }

    pub fn allocate(&self, bytes: usize) -> Result<Buffer> {
        Buffer::allocate(Arc::clone(&self.allocator), bytes)
    }

    pub fn create_queue(self: &Arc<Self>) -> Result<Queue> {
        let inner = (self.queue_factory)(self)?;
        Ok(Queue::new(Arc::clone(self), inner))
    }
}
