//! Command queues.
//!
//! A [`CommandQueue`] is one in-order stream of transfers and kernel launches on a device.
//! Every enqueue returns immediately with an [`Event`]; the only blocking points are
//! [`Event::wait`], [`PendingRead::wait`] and [`CommandQueue::finish`]. Cross-queue ordering is
//! expressed with a [`WaitList`].
//!
//! [`Queue`] wraps a backend queue with the checks that must fail synchronously, before anything
//! is submitted: transfer bounds, work sizes and argument completeness.

use std::fmt;
use std::sync::Arc;

use bytemuck::Pod;
use parking_lot::Mutex;

use crate::buffer::Buffer;
use crate::device::Device;
use crate::error::{InvalidWorkSizeSnafu, Result};
use crate::info::DeviceInfo;
use crate::program::{Kernel, KernelArg};
use crate::sync::{Event, WaitList};

/// Global and local work sizes of a launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NdRange {
    pub dims: usize,
    pub global: [usize; 3],
    /// `None` lets the backend choose; the host backend then runs one work-item per group.
    pub local: Option<[usize; 3]>,
}

impl NdRange {
    pub fn new_1d(global: usize, local: impl Into<Option<usize>>) -> Self {
        Self { dims: 1, global: [global, 1, 1], local: local.into().map(|l| [l, 1, 1]) }
    }

    pub fn new_2d(global: [usize; 2], local: Option<[usize; 2]>) -> Self {
        Self { dims: 2, global: [global[0], global[1], 1], local: local.map(|l| [l[0], l[1], 1]) }
    }

    /// A single work-item.
    pub fn task() -> Self {
        Self::new_1d(1, 1)
    }

    pub fn local_or_unit(&self) -> [usize; 3] {
        self.local.unwrap_or([1, 1, 1])
    }

    pub fn work_group_size(&self) -> usize {
        self.local_or_unit().iter().product()
    }

    pub fn num_groups(&self) -> [usize; 3] {
        let local = self.local_or_unit();
        [self.global[0] / local[0], self.global[1] / local[1], self.global[2] / local[2]]
    }

    /// Reject empty ranges, locals that do not divide globals, and oversized work-groups.
    pub fn validate(&self, max_work_group_size: usize) -> Result<()> {
        snafu::ensure!(
            (1..=3).contains(&self.dims) && self.global.iter().all(|&g| g > 0),
            InvalidWorkSizeSnafu { reason: format!("empty global size {:?}", self.global) }
        );
        if let Some(local) = self.local {
            for (g, l) in self.global.iter().zip(local) {
                snafu::ensure!(
                    l > 0 && g % l == 0,
                    InvalidWorkSizeSnafu {
                        reason: format!("local size {local:?} does not divide global size {:?}", self.global)
                    }
                );
            }
            let group = self.work_group_size();
            snafu::ensure!(
                group <= max_work_group_size,
                InvalidWorkSizeSnafu {
                    reason: format!("work-group of {group} exceeds device maximum {max_work_group_size}")
                }
            );
        }
        Ok(())
    }
}

/// Backend command stream. Implementations may assume [`Queue`] already validated the request.
pub trait CommandQueue: Send + Sync + fmt::Debug {
    fn enqueue_write(&self, buffer: &Buffer, offset: usize, data: Vec<u8>, wait: &WaitList) -> Result<Event>;

    fn enqueue_read(&self, buffer: &Buffer, offset: usize, len: usize, wait: &WaitList) -> Result<PendingRead>;

    fn enqueue_copy(
        &self,
        src: &Buffer,
        src_offset: usize,
        dst: &Buffer,
        dst_offset: usize,
        len: usize,
        wait: &WaitList,
    ) -> Result<Event>;

    fn enqueue_kernel(&self, kernel: &Kernel, args: Vec<KernelArg>, range: &NdRange, wait: &WaitList)
    -> Result<Event>;

    /// Block until every submitted operation has finished.
    fn finish(&self) -> Result<()>;
}

/// A download in flight. The bytes become available once its event completes.
#[derive(Debug)]
pub struct PendingRead {
    event: Event,
    data: Arc<Mutex<Vec<u8>>>,
}

impl PendingRead {
    /// `data` is filled by the backend before `event` completes.
    pub fn new(event: Event, data: Arc<Mutex<Vec<u8>>>) -> Self {
        Self { event, data }
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    pub fn wait(self) -> Result<Vec<u8>> {
        self.event.wait()?;
        Ok(std::mem::take(&mut *self.data.lock()))
    }
}

/// A validated handle to a device command queue.
#[derive(Clone)]
pub struct Queue {
    device: Arc<Device>,
    inner: Arc<dyn CommandQueue>,
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue").field("device", &self.device.info.name).field("inner", &self.inner).finish()
    }
}

impl Queue {
    pub fn new(device: Arc<Device>, inner: Arc<dyn CommandQueue>) -> Self {
        Self { device, inner }
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.device.info
    }

    pub fn allocate(&self, bytes: usize) -> Result<Buffer> {
        self.device.allocate(bytes)
    }

    pub fn enqueue_write(&self, buffer: &Buffer, offset: usize, data: Vec<u8>, wait: &WaitList) -> Result<Event> {
        buffer.check_range(offset, data.len())?;
        if data.is_empty() {
            return Ok(Event::Complete);
        }
        self.inner.enqueue_write(buffer, offset, data, wait)
    }

    pub fn write(&self, buffer: &Buffer, offset: usize, data: &[u8]) -> Result<()> {
        self.enqueue_write(buffer, offset, data.to_vec(), &WaitList::new())?.wait()
    }

    pub fn enqueue_read(&self, buffer: &Buffer, offset: usize, len: usize, wait: &WaitList) -> Result<PendingRead> {
        buffer.check_range(offset, len)?;
        if len == 0 {
            return Ok(PendingRead::new(Event::Complete, Arc::default()));
        }
        self.inner.enqueue_read(buffer, offset, len, wait)
    }

    pub fn read(&self, buffer: &Buffer, offset: usize, len: usize) -> Result<Vec<u8>> {
        self.enqueue_read(buffer, offset, len, &WaitList::new())?.wait()
    }

    pub fn enqueue_copy(
        &self,
        src: &Buffer,
        src_offset: usize,
        dst: &Buffer,
        dst_offset: usize,
        len: usize,
        wait: &WaitList,
    ) -> Result<Event> {
        src.check_range(src_offset, len)?;
        dst.check_range(dst_offset, len)?;
        if len == 0 {
            return Ok(Event::Complete);
        }
        self.inner.enqueue_copy(src, src_offset, dst, dst_offset, len, wait)
    }

    pub fn enqueue_kernel(&self, kernel: &Kernel, range: &NdRange, wait: &WaitList) -> Result<Event> {
        range.validate(self.device.info.max_work_group_size)?;
        let args = kernel.bound_args()?;
        tracing::trace!(kernel.entry = kernel.entry(), range.global = ?range.global, range.local = ?range.local, "enqueue kernel");
        self.inner.enqueue_kernel(kernel, args, range, wait)
    }

    pub fn enqueue_task(&self, kernel: &Kernel, wait: &WaitList) -> Result<Event> {
        self.enqueue_kernel(kernel, &NdRange::task(), wait)
    }

    pub fn finish(&self) -> Result<()> {
        self.inner.finish()
    }

    /// Allocate a buffer holding `data`.
    pub fn upload<T: Pod>(&self, data: &[T]) -> Result<Buffer> {
        let buffer = self.allocate(std::mem::size_of_val(data))?;
        self.write(&buffer, 0, bytemuck::cast_slice(data))?;
        Ok(buffer)
    }

    /// Read `count` elements starting at element `first`.
    pub fn read_vec<T: Pod>(&self, buffer: &Buffer, first: usize, count: usize) -> Result<Vec<T>> {
        let size = std::mem::size_of::<T>();
        if size == 0 {
            return Ok(vec![bytemuck::Zeroable::zeroed(); count]);
        }
        let bytes = self.read(buffer, first * size, count * size)?;
        Ok(bytes.chunks_exact(size).map(bytemuck::pod_read_unaligned).collect())
    }
}
