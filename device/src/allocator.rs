use std::alloc::Layout;
use std::collections::HashMap;
use std::ptr::NonNull;

use parking_lot::Mutex;

use crate::error::{AllocationSnafu, Result};

/// Alignment of host allocations; covers the widest vector type (`double16`).
pub const HOST_ALIGN: usize = 128;

/// Zero-initialized, over-aligned host memory.
///
/// All access goes through raw pointers from the owning queue's worker thread, so the type
/// hands out no references to its contents.
#[derive(Debug)]
pub struct HostMemory {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: HostMemory owns its allocation; concurrent access is serialized by the command
// queue that executes transfers and kernels in submission order.
unsafe impl Send for HostMemory {}
unsafe impl Sync for HostMemory {}

impl HostMemory {
    pub fn zeroed(len: usize) -> Result<Self> {
        let layout = Self::layout(len)?;
        // SAFETY: layout has non-zero size.
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(ptr) else {
            return AllocationSnafu { bytes: len, reason: "host allocator returned null" }.fail();
        };
        Ok(Self { ptr, len })
    }

    fn layout(len: usize) -> Result<Layout> {
        Layout::from_size_align(len.max(1), HOST_ALIGN)
            .map_err(|e| AllocationSnafu { bytes: len, reason: e.to_string() }.build())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// # Safety
    ///
    /// `offset + dst.len()` must be within bounds and no kernel may be writing the range.
    pub unsafe fn read(&self, offset: usize, dst: &mut [u8]) {
        unsafe { std::ptr::copy_nonoverlapping(self.ptr.as_ptr().add(offset), dst.as_mut_ptr(), dst.len()) }
    }

    /// # Safety
    ///
    /// `offset + src.len()` must be within bounds and no kernel may be accessing the range.
    pub unsafe fn write(&self, offset: usize, src: &[u8]) {
        unsafe { std::ptr::copy_nonoverlapping(src.as_ptr(), self.ptr.as_ptr().add(offset), src.len()) }
    }

    /// Copy `len` bytes into `dst`; the ranges may overlap when both sides are the same memory.
    ///
    /// # Safety
    ///
    /// Both ranges must be within bounds.
    pub unsafe fn copy_to(&self, offset: usize, dst: &HostMemory, dst_offset: usize, len: usize) {
        unsafe { std::ptr::copy(self.ptr.as_ptr().add(offset), dst.ptr.as_ptr().add(dst_offset), len) }
    }
}

impl Drop for HostMemory {
    fn drop(&mut self) {
        if let Ok(layout) = Self::layout(self.len) {
            // SAFETY: allocated in `zeroed` with the same layout.
            unsafe { std::alloc::dealloc(self.ptr.as_ptr(), layout) }
        }
    }
}

/// Opaque handle to device memory.
#[derive(Debug)]
pub enum RawBuffer {
    Host(HostMemory),
    #[cfg(feature = "opencl")]
    OpenCl { buffer: crate::opencl::ClMemory, size: usize },
}

impl RawBuffer {
    pub fn size(&self) -> usize {
        match self {
            RawBuffer::Host(memory) => memory.len(),
            #[cfg(feature = "opencl")]
            RawBuffer::OpenCl { size, .. } => *size,
        }
    }
}

pub trait Allocator: Send + Sync + std::fmt::Debug {
    /// Allocate `size` bytes. Contents are unspecified.
    fn alloc(&self, size: usize) -> Result<RawBuffer>;
    fn free(&self, _buffer: RawBuffer) {}
    fn name(&self) -> &str;
}

#[derive(Debug, Clone)]
pub struct HostAllocator;

impl Allocator for HostAllocator {
    fn alloc(&self, size: usize) -> Result<RawBuffer> {
        Ok(RawBuffer::Host(HostMemory::zeroed(size)?))
    }

    fn name(&self) -> &str {
        "HOST"
    }
}

/// Allocator that keeps freed buffers for reuse by exact size.
///
/// Scan and sort allocate the same temporaries on every call; recycling them avoids an
/// allocation round trip per pass.
#[derive(Debug)]
pub struct LruAllocator {
    inner: Box<dyn Allocator>,
    cache: Mutex<HashMap<usize, Vec<RawBuffer>>>,
    max_buffers_per_size: usize,
    name: String,
}

impl LruAllocator {
    pub fn new(inner: Box<dyn Allocator>) -> Self {
        Self::with_capacity(inner, 32)
    }

    pub fn with_capacity(inner: Box<dyn Allocator>, max_buffers_per_size: usize) -> Self {
        let name = inner.name().to_string();
        Self { inner, cache: Mutex::new(HashMap::new()), max_buffers_per_size, name }
    }

    /// Number of buffers currently held for reuse.
    pub fn cached(&self) -> usize {
        self.cache.lock().values().map(Vec::len).sum()
    }
}

impl Allocator for LruAllocator {
    fn alloc(&self, size: usize) -> Result<RawBuffer> {
        {
            let mut cache = self.cache.lock();
            if let Some(buffers) = cache.get_mut(&size)
                && let Some(buffer) = buffers.pop()
            {
                if buffers.is_empty() {
                    cache.remove(&size);
                }
                return Ok(buffer);
            }
        }

        match self.inner.alloc(size) {
            Ok(buffer) => Ok(buffer),
            Err(e) => {
                // Drop everything held and retry once.
                self.cache.lock().clear();
                self.inner.alloc(size).map_err(|_| e)
            }
        }
    }

    fn free(&self, buffer: RawBuffer) {
        let mut cache = self.cache.lock();
        let buffers = cache.entry(buffer.size()).or_default();
        if buffers.len() < self.max_buffers_per_size {
            buffers.push(buffer);
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
