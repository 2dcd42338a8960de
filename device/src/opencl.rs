//! OpenCL handles shared between the device abstraction and the OpenCL backend.

use std::fmt;
use std::ptr;
use std::sync::Arc;

use parking_lot::Mutex;

use opencl3::context::Context;
use opencl3::event::Event;
use opencl3::memory::{Buffer, CL_MEM_READ_WRITE};

use crate::allocator::{Allocator, RawBuffer};
use crate::error::{AllocationSnafu, QueueFailedSnafu, Result};

macro_rules! opaque_handle {
    ($name:ident, $inner:ty) => {
        pub struct $name(pub $inner);

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(stringify!($name))
            }
        }

        // SAFETY: OpenCL handles are reference-counted objects that the API allows to be used
        // from any host thread.
        unsafe impl Send for $name {}
        unsafe impl Sync for $name {}
    };
}

opaque_handle!(ClContext, Context);
// Writes and copies need `&mut Buffer`; the lock also serializes them across queues.
opaque_handle!(ClMemory, Mutex<Buffer<u8>>);
opaque_handle!(ClEvent, Event);

impl ClEvent {
    pub fn wait(&self) -> Result<()> {
        self.0.wait().map_err(|e| QueueFailedSnafu { message: format!("OpenCL event: {e:?}") }.build())
    }

    pub fn is_complete(&self) -> bool {
        self.0.command_execution_status().is_ok_and(|status| status.0 == opencl3::event::CL_COMPLETE as i32)
    }
}

#[derive(Debug, Clone)]
pub struct ClAllocator {
    context: Arc<ClContext>,
}

impl ClAllocator {
    pub fn new(context: Arc<ClContext>) -> Self {
        Self { context }
    }
}

impl Allocator for ClAllocator {
    fn alloc(&self, size: usize) -> Result<RawBuffer> {
        // SAFETY: no host pointer is passed.
        let buffer = unsafe { Buffer::<u8>::create(&self.context.0, CL_MEM_READ_WRITE, size.max(1), ptr::null_mut()) }
            .map_err(|e| AllocationSnafu { bytes: size, reason: format!("{e:?}") }.build())?;
        Ok(RawBuffer::OpenCl { buffer: ClMemory(Mutex::new(buffer)), size })
    }

    fn name(&self) -> &str {
        "OPENCL"
    }
}
