//! Device capabilities consumed by kiln: memory, compiled programs, command queues, events.
//!
//! Backends (host threads, OpenCL) live in `kiln-runtime`; this crate only defines the surface
//! they implement and the validation every backend shares.

pub mod allocator;
pub mod buffer;
pub mod device;
pub mod error;
pub mod info;
#[cfg(feature = "opencl")]
pub mod opencl;
pub mod program;
pub mod queue;
pub mod sync;


pub use allocator::{Allocator, HostAllocator, HostMemory, LruAllocator, RawBuffer};
pub use buffer::Buffer;
pub use device::{Device, QueueFactory};
pub use error::{Error, ErrorClass, Result};
pub use info::{DeviceInfo, DeviceKind, DeviceSpec, Dialect};
pub use program::{ArgSlot, Compiler, Kernel, KernelArg, Program, RuntimeFactory};
pub use queue::{CommandQueue, NdRange, PendingRead, Queue};
pub use sync::{CpuTimelineSignal, Event, TimelineSignal, WaitList};
