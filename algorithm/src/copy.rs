//! Copy dispatch between host and device ranges.
//!
//! [`plan`] resolves the pair of [`IterKind`]s once per call:
//!
//! | source | destination | plan |
//! |---|---|---|
//! | host | host | slice copy |
//! | host | device buffer of the same type | one upload (gathered first when strided) |
//! | host | any other device range | upload to a staging buffer, then a copy kernel |
//! | device buffer of the same type | host | one download (scattered after when strided) |
//! | any other device range | host | copy kernel into a staging buffer, then a download |
//! | device buffer | device buffer of the same type | device buffer-to-buffer copy |
//! | device | device | element-wise copy kernel |
//!
//! Copy kernels convert scalar element types the way the device compiler converts implicitly,
//! narrowing included.

use kiln_device::{Event, NdRange, PendingRead, Queue, WaitList};
use kiln_dtype::{DType, Value};
use kiln_runtime::{ComputeRuntime, MetaKernel};
use kiln_runtime::work_size::clamp_work_group;

use crate::error::{NotWritableSnafu, Result, TypeMismatchSnafu};
use crate::iterator::{BufferIter, DeviceIter, Destination, HostBytes, Source, convert};

pub(crate) const PARAMS: &str = "copy";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyPlan {
    /// Zero elements; nothing is submitted.
    Empty,
    HostToHost,
    /// `staged`: the destination is not a plain buffer of the host type, so the upload lands
    /// in a temporary buffer a copy kernel reads from.
    Upload {
        gather: bool,
        staged: bool,
    },
    Download {
        scatter: bool,
        staged: bool,
    },
    BufferCopy,
    Kernel,
}

/// Plain buffer of exactly `dtype`.
fn is_plain(iter: &DeviceIter, dtype: &DType) -> bool {
    iter.as_buffer().is_some_and(|b| b.dtype() == dtype)
}

pub fn plan(src: &Source<'_>, dst: &Destination<'_>, count: usize) -> CopyPlan {
    if count == 0 {
        return CopyPlan::Empty;
    }
    match (src, dst) {
        (Source::Host(_), Destination::Host(_)) => CopyPlan::HostToHost,
        (Source::Host(host), Destination::Device(iter)) => {
            CopyPlan::Upload { gather: host.stride != 1, staged: !is_plain(iter, &host.dtype) }
        }
        (Source::Device(iter), Destination::Host(host)) => {
            CopyPlan::Download { scatter: host.stride != 1, staged: !is_plain(iter, &host.dtype) }
        }
        (Source::Device(from), Destination::Device(to)) => match (from.as_buffer(), to.as_buffer()) {
            (Some(a), Some(b)) if a.dtype() == b.dtype() => CopyPlan::BufferCopy,
            _ => CopyPlan::Kernel,
        },
    }
}

/// A copy in flight.
///
/// Device-side work is already queued; a download into a strided or staged host range is
/// finished by [`CopyFuture::wait`], which also writes the host destination.
#[must_use = "the copy is only complete once waited on"]
#[derive(Debug)]
pub struct CopyFuture<'a> {
    event: Event,
    download: Option<(PendingRead, HostBytes<&'a mut [u8]>)>,
}

impl CopyFuture<'_> {
    pub fn complete() -> Self {
        Self { event: Event::Complete, download: None }
    }

    fn device(event: Event) -> Self {
        Self { event, download: None }
    }

    /// Completion of the device-side work.
    pub fn event(&self) -> &Event {
        match &self.download {
            Some((read, _)) => read.event(),
            None => &self.event,
        }
    }

    pub fn wait(self) -> Result<()> {
        self.event.wait()?;
        if let Some((read, mut host)) = self.download {
            let bytes = read.wait()?;
            host.scatter(&bytes);
        }
        Ok(())
    }
}

/// Copy `count` elements from `src` to `dst` and wait for completion.
pub fn copy<'a, 'b>(
    rt: &ComputeRuntime,
    queue: &Queue,
    src: impl Into<Source<'a>>,
    count: usize,
    dst: impl Into<Destination<'b>>,
) -> Result<()> {
    copy_async(rt, queue, src, count, dst)?.wait()
}

/// Queue a copy of `count` elements from `src` to `dst`.
///
/// Length checks and kernel builds happen before anything is submitted.
pub fn copy_async<'a, 'b>(
    rt: &ComputeRuntime,
    queue: &Queue,
    src: impl Into<Source<'a>>,
    count: usize,
    dst: impl Into<Destination<'b>>,
) -> Result<CopyFuture<'b>> {
    let src = src.into();
    let dst = dst.into();
    let plan = plan(&src, &dst, count);
    tracing::debug!(?plan, count, src.kind = ?src.kind(), dst.kind = ?dst.kind(), "copy");
    if plan == CopyPlan::Empty {
        return Ok(CopyFuture::complete());
    }
    src.check_len(count)?;
    dst.check_len(count)?;

    match (src, dst) {
        (Source::Host(from), Destination::Host(mut to)) => {
            snafu::ensure!(from.dtype == to.dtype, TypeMismatchSnafu { from: from.dtype.name(), to: to.dtype.name() });
            to.scatter(&from.gather(count));
            Ok(CopyFuture::complete())
        }
        (Source::Host(from), Destination::Device(to)) => {
            let bytes = from.gather(count);
            match to.as_buffer().filter(|b| *b.dtype() == from.dtype) {
                Some(target) => {
                    let event = queue.enqueue_write(target.buffer(), target.byte_offset(), bytes, &WaitList::new())?;
                    Ok(CopyFuture::device(event))
                }
                None => {
                    let staging = queue.allocate(bytes.len())?;
                    let uploaded = queue.enqueue_write(&staging, 0, bytes, &WaitList::new())?;
                    let staging = DeviceIter::Buffer(BufferIter::new(staging, from.dtype));
                    let event = copy_kernel(rt, queue, &staging, count, &to, &uploaded.into())?;
                    Ok(CopyFuture::device(event))
                }
            }
        }
        (Source::Device(from), Destination::Host(to)) => {
            let elem = to.dtype.bytes();
            let read = match from.as_buffer().filter(|b| *b.dtype() == to.dtype) {
                Some(source) => {
                    queue.enqueue_read(source.buffer(), source.byte_offset(), count * elem, &WaitList::new())?
                }
                None => {
                    let staging = queue.allocate(count * elem)?;
                    let target = DeviceIter::Buffer(BufferIter::new(staging.clone(), to.dtype.clone()));
                    let copied = copy_kernel(rt, queue, &from, count, &target, &WaitList::new())?;
                    queue.enqueue_read(&staging, 0, count * elem, &copied.into())?
                }
            };
            Ok(CopyFuture { event: Event::Complete, download: Some((read, to)) })
        }
        (Source::Device(from), Destination::Device(to)) => match (from.as_buffer(), to.as_buffer()) {
            (Some(a), Some(b)) if a.dtype() == b.dtype() => {
                let len = count * a.dtype().bytes();
                let (src_offset, dst_offset) = (a.byte_offset(), b.byte_offset());
                let event = queue.enqueue_copy(a.buffer(), src_offset, b.buffer(), dst_offset, len, &WaitList::new())?;
                Ok(CopyFuture::device(event))
            }
            _ => Ok(CopyFuture::device(copy_kernel(rt, queue, &from, count, &to, &WaitList::new())?)),
        },
    }
}

/// `dst[i] = value` for `count` elements.
pub fn fill<'b>(
    rt: &ComputeRuntime,
    queue: &Queue,
    dst: impl Into<Destination<'b>>,
    count: usize,
    value: impl Into<Value>,
) -> Result<()> {
    copy(rt, queue, DeviceIter::constant(value), count, dst)
}

/// `dst[i] = start + i` for `count` elements, counted in the type of `start`.
pub fn iota<'b>(
    rt: &ComputeRuntime,
    queue: &Queue,
    dst: impl Into<Destination<'b>>,
    count: usize,
    start: impl Into<Value>,
) -> Result<()> {
    copy(rt, queue, DeviceIter::counting(start), count, dst)
}

/// Element-wise `dst[i] = src(i)`, picking the variant for the device kind.
pub fn copy_kernel(
    rt: &ComputeRuntime,
    queue: &Queue,
    src: &DeviceIter,
    count: usize,
    dst: &DeviceIter,
    wait: &WaitList,
) -> Result<Event> {
    snafu::ensure!(dst.is_writable(), NotWritableSnafu { iterator: dst.describe() });
    if queue.info().is_cpu() {
        copy_kernel_cpu(rt, queue, src, count, dst, wait)
    } else {
        copy_kernel_gpu(rt, queue, src, count, dst, wait)
    }
}

/// Draft whose body assigns `dst[i] = src(i)` at the end; `i` must be declared first.
fn copy_body(k: &mut MetaKernel, src: &DeviceIter, dst: &DeviceIter) -> Result<String> {
    let read = src.read(k, "i");
    let value = convert(k, read, &src.dtype(), &dst.dtype())?;
    let target = dst.write(k, "i")?;
    Ok(format!("{target} = {value};"))
}

/// Work-groups of `tpb` items, each item copying `vpt` elements `tpb` apart.
pub(crate) fn copy_kernel_gpu(
    rt: &ComputeRuntime,
    queue: &Queue,
    src: &DeviceIter,
    count: usize,
    dst: &DeviceIter,
    wait: &WaitList,
) -> Result<Event> {
    let info = queue.info();
    let vpt = rt.parameter(info, PARAMS, "vpt", 4).max(1);
    let tpb = clamp_work_group(rt.parameter(info, PARAMS, "tpb", 128), info);

    let mut k = MetaKernel::for_device(format!("copy_kernel_{}", dst.dtype().bytes()), queue.device());
    let n = k.add_set_arg("n", Value::UInt64(count as u64));
    let assign = copy_body(&mut k, src, dst)?;
    k.emit_raw(format!(
        "ulong i = get_group_id(0) * {span}UL + get_local_id(0);\n\
         for (uint v = 0; v < {vpt}u; ++v, i += {tpb}UL) {{\n\
         \x20   if (i < {n}) {assign}\n\
         }}\n",
        span = vpt * tpb,
    ));

    let groups = count.div_ceil(vpt * tpb);
    tracing::trace!(count, vpt, tpb, groups, "gpu copy kernel");
    Ok(k.exec(rt, queue, &NdRange::new_1d(groups * tpb, tpb), wait)?)
}

/// One contiguous block per compute unit.
pub(crate) fn copy_kernel_cpu(
    rt: &ComputeRuntime,
    queue: &Queue,
    src: &DeviceIter,
    count: usize,
    dst: &DeviceIter,
    wait: &WaitList,
) -> Result<Event> {
    let blocks = queue.info().compute_units.clamp(1, count.max(1));
    let block = count.div_ceil(blocks);

    let mut k = MetaKernel::for_device("serial_copy_kernel", queue.device());
    let n = k.add_set_arg("n", Value::UInt64(count as u64));
    let size = k.add_set_arg("block", Value::UInt64(block as u64));
    let assign = copy_body(&mut k, src, dst)?;
    k.emit_raw(format!(
        "const ulong start = get_global_id(0) * {size};\n\
         const ulong end = min(start + {size}, {n});\n\
         for (ulong i = start; i < end; ++i) {{\n\
         \x20   {assign}\n\
         }}\n"
    ));

    tracing::trace!(count, blocks, block, "cpu copy kernel");
    Ok(k.exec(rt, queue, &NdRange::new_1d(blocks, None), wait)?)
}
