use std::mem::ManuallyDrop;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::allocator::{Allocator, RawBuffer};
use crate::error::{OutOfBoundsSnafu, Result};

static NEXT_BUFFER_ID: AtomicUsize = AtomicUsize::new(1);

#[derive(Debug)]
struct BufferData {
    id: usize,
    raw: ManuallyDrop<RawBuffer>,
    allocator: Arc<dyn Allocator>,
    size: usize,
}

impl Drop for BufferData {
    fn drop(&mut self) {
        // SAFETY: `raw` is never touched again after this point.
        let raw = unsafe { ManuallyDrop::take(&mut self.raw) };
        self.allocator.free(raw);
    }
}

/// A device memory allocation.
///
/// Cloning shares the allocation; it returns to its allocator when the last clone drops.
/// Source builders de-duplicate kernel parameters by [`Buffer::id`].
#[derive(Debug, Clone)]
pub struct Buffer {
    data: Arc<BufferData>,
}

impl Buffer {
    pub fn allocate(allocator: Arc<dyn Allocator>, size: usize) -> Result<Self> {
        let raw = allocator.alloc(size)?;
        let id = NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(buffer.id = id, buffer.size = size, allocator = allocator.name(), "buffer allocated");
        Ok(Self { data: Arc::new(BufferData { id, raw: ManuallyDrop::new(raw), allocator, size }) })
    }

    /// Process-unique identity of the underlying allocation.
    pub fn id(&self) -> usize {
        self.data.id
    }

    pub fn size(&self) -> usize {
        self.data.size
    }

    pub fn raw(&self) -> &RawBuffer {
        &self.data.raw
    }

    pub fn same_memory(&self, other: &Buffer) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    /// Check that `[offset, offset + len)` lies inside the buffer.
    pub fn check_range(&self, offset: usize, len: usize) -> Result<()> {
        let size = self.size();
        snafu::ensure!(offset.checked_add(len).is_some_and(|end| end <= size), OutOfBoundsSnafu { offset, len, size });
        Ok(())
    }
}
