//! Data-parallel algorithms over generated kernels.
//!
//! Every algorithm builds its kernels at run time from the element types, operators and
//! iterators it is called with, and looks them up in the runtime's program cache first. Launch
//! geometry comes from the runtime's parameter cache, so tuned values apply on the next call.
//!
//! - [`copy`]: host and device ranges in any combination, plus [`fill`](copy::fill) and
//!   [`iota`](copy::iota)
//! - [`reduce`]: multi-pass reduction, [`accumulate`](reduce::accumulate) with an initial value
//! - [`scan`]: inclusive and exclusive prefix scans
//! - [`radix_sort`]: stable sort of scalar keys
//! - [`extrema`]: index of the smallest or largest element
//!
//! ```ignore
//! let rt = ComputeRuntime::from_env();
//! let queue = rt.default_queue()?;
//! let data = DeviceVec::from_slice(&queue, &[5i32, 1, 9, 17, 13])?;
//! let sum = reduce::<i32>(&rt, &queue, &data.device_iter(), data.len(), &BinaryOp::Plus)?;
//! assert_eq!(sum, Some(45));
//! ```

pub mod copy;
pub mod error;
pub mod extrema;
pub mod functional;
pub mod iterator;
pub mod radix_sort;
pub mod reduce;
pub mod scan;
pub mod vector;

#[cfg(test)]
pub mod test;

pub use copy::{CopyFuture, CopyPlan, copy, copy_async, fill, iota};
pub use error::{Error, Result};
pub use extrema::{Extremum, max_element, min_element};
pub use functional::{BinaryOp, CustomOp};
pub use iterator::{
    BufferIter, DeviceIter, Destination, HostSlice, HostSliceMut, HostStrided, HostStridedMut, IterKind, Source,
};
pub use radix_sort::sort;
pub use reduce::{accumulate, reduce, reduce_into};
pub use scan::{ScanKind, exclusive_scan, inclusive_scan, scan};
pub use vector::DeviceVec;
