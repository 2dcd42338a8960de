use std::marker::PhantomData;

use kiln_device::{Buffer, Queue};
use kiln_dtype::Element;

use crate::error::Result;
use crate::iterator::{BufferIter, DeviceIter, Destination, Source};

/// A typed, fixed-length device array bound to the queue that created it.
#[derive(Debug, Clone)]
pub struct DeviceVec<T: Element> {
    buffer: Buffer,
    len: usize,
    queue: Queue,
    _marker: PhantomData<T>,
}

impl<T: Element> DeviceVec<T> {
    /// `len` zeroed elements.
    pub fn with_len(queue: &Queue, len: usize) -> Result<Self> {
        let bytes = len * std::mem::size_of::<T>();
        let buffer = queue.allocate(bytes)?;
        // Recycled allocations keep their old contents.
        queue.write(&buffer, 0, &vec![0; bytes])?;
        Ok(Self { buffer, len, queue: queue.clone(), _marker: PhantomData })
    }

    pub fn from_slice(queue: &Queue, data: &[T]) -> Result<Self> {
        let buffer = queue.upload(data)?;
        Ok(Self { buffer, len: data.len(), queue: queue.clone(), _marker: PhantomData })
    }

    pub fn to_vec(&self) -> Result<Vec<T>> {
        Ok(self.queue.read_vec(&self.buffer, 0, self.len)?)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    pub fn iter(&self) -> BufferIter {
        BufferIter::new(self.buffer.clone(), T::dtype())
    }

    pub fn device_iter(&self) -> DeviceIter {
        DeviceIter::Buffer(self.iter())
    }
}

impl<T: Element> From<&DeviceVec<T>> for Source<'_> {
    fn from(vec: &DeviceVec<T>) -> Self {
        Self::Device(vec.device_iter())
    }
}

impl<T: Element> From<&DeviceVec<T>> for Destination<'_> {
    fn from(vec: &DeviceVec<T>) -> Self {
        Self::Device(vec.device_iter())
    }
}
