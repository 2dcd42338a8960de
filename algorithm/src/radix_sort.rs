//! Stable LSD radix sort, four bits per pass.
//!
//! Each pass runs three launches over blocks of `block` keys:
//!
//! 1. `radix_count` histograms the digit of every key in a block into `counts[block * 16 + d]`.
//! 2. The counts, viewed as one `uint16` per block, are scanned exclusively, giving every
//!    block the number of keys per digit in the blocks before it. `radix_scan` then turns the
//!    per-digit totals into the start of each digit's run in the output.
//! 3. `radix_scatter` moves each key to `digit_start[d] + block_prefix[d] + rank`, where the rank
//!    counts equal digits earlier in the same block, which keeps the sort stable.
//!
//! Keys are sorted on an unsigned image: signed keys flip the sign bit, floats flip the sign
//! bit of positives and every bit of negatives. Key widths are a multiple of 8 bits, so the
//! pass count is even and the result lands back in the caller's buffer.

use kiln_codegen::{FunctionDef, KernelSource, Param, ProgramSource, type_name};
use kiln_device::{Buffer, Dialect, Event, KernelArg, NdRange, Queue, WaitList};
use kiln_dtype::{DType, ScalarType, Value};
use kiln_runtime::work_size::clamp_work_group;
use kiln_runtime::ComputeRuntime;

use crate::error::{Result, UnsupportedKeyTypeSnafu};
use crate::functional::BinaryOp;
use crate::iterator::{BufferIter, DeviceIter};
use crate::scan::{ScanKind, scan};

pub(crate) const PARAMS: &str = "radix";

const RADIX_BITS: usize = 4;
const BUCKETS: usize = 1 << RADIX_BITS;

/// `U radix_key(K x)`: the unsigned image whose order matches the key order.
fn radix_key(key: ScalarType, dialect: Dialect) -> Option<FunctionDef> {
    let unsigned = key.unsigned_counterpart()?;
    let u = unsigned.name();
    let width = unsigned.bit_width();
    let sign = format!("(({u})({:#x}UL))", 1u64 << (width - 1));
    let body = if key.is_float() {
        let bits = match dialect {
            Dialect::OpenCl => format!("const {u} u = as_{u}(x);"),
            Dialect::HostC => format!("{u} u;\n    __builtin_memcpy(&u, &x, sizeof u);"),
        };
        format!("{bits}\n    return u ^ (({u})(-({u})(u >> {})) | {sign});", width - 1)
    } else if key.is_signed() {
        format!("return ({u})x ^ {sign};")
    } else {
        "return x;".to_string()
    };
    Some(FunctionDef::new("radix_key", DType::Scalar(unsigned), vec![("x".into(), DType::Scalar(key))], body))
}

/// The three entry points for `key`, sharing the key transform.
fn program_source(
    key: ScalarType,
    transform: &FunctionDef,
    dialect: Dialect,
    block: usize,
) -> kiln_codegen::Result<String> {
    let dtype = DType::Scalar(key);
    let ty = type_name(&dtype, dialect);
    let digit = format!("(uint)((radix_key(x) >> shift) & {}u)", BUCKETS - 1);
    let uint = DType::UInt32;

    let mut count = KernelSource::new("radix_count", dialect);
    count.add_function(transform);
    for param in [
        Param::global("input", dtype.clone()).read_only(),
        Param::global("counts", uint.clone()),
        Param::value("first", DType::UInt64),
        Param::value("n", DType::UInt64),
        Param::value("shift", uint.clone()),
        Param::local("local_counts", uint.clone()),
    ] {
        count.declare_argument(param);
    }
    count.emit_raw(format!(
        "const ulong lid = get_local_id(0);\n\
         const ulong gid = get_global_id(0);\n\
         for (ulong b = lid; b < {BUCKETS}UL; b += {block}UL) local_counts[b] = 0;\n\
         barrier(CLK_LOCAL_MEM_FENCE);\n\
         if (gid < n) {{\n\
         \x20   const {ty} x = input[first + gid];\n\
         \x20   atomic_inc(&local_counts[{digit}]);\n\
         }}\n\
         barrier(CLK_LOCAL_MEM_FENCE);\n\
         const ulong base = get_group_id(0) * {BUCKETS}UL;\n\
         for (ulong b = lid; b < {BUCKETS}UL; b += {block}UL) counts[base + b] = local_counts[b];\n"
    ));

    let mut starts = KernelSource::new("radix_scan", dialect);
    for param in [
        Param::global("counts", uint.clone()).read_only(),
        Param::global("offsets", uint.clone()).read_only(),
        Param::global("digit_start", uint.clone()),
        Param::value("last", DType::UInt64),
    ] {
        starts.declare_argument(param);
    }
    starts.emit_raw(format!(
        "uint run = 0;\n\
         for (uint d = 0; d < {BUCKETS}u; ++d) {{\n\
         \x20   digit_start[d] = run;\n\
         \x20   run += offsets[last * {BUCKETS}UL + d] + counts[last * {BUCKETS}UL + d];\n\
         }}\n"
    ));

    let mut scatter = KernelSource::new("radix_scatter", dialect);
    scatter.add_function(transform);
    for param in [
        Param::global("input", dtype.clone()).read_only(),
        Param::global("output", dtype.clone()),
        Param::global("offsets", uint.clone()).read_only(),
        Param::global("digit_start", uint.clone()).read_only(),
        Param::value("in_first", DType::UInt64),
        Param::value("out_first", DType::UInt64),
        Param::value("n", DType::UInt64),
        Param::value("shift", uint.clone()),
        Param::local("local_digits", uint),
    ] {
        scatter.declare_argument(param);
    }
    scatter.emit_raw(format!(
        "const ulong lid = get_local_id(0);\n\
         const ulong gid = get_global_id(0);\n\
         {ty} x;\n\
         if (gid < n) x = input[in_first + gid];\n\
         local_digits[lid] = gid < n ? {digit} : {BUCKETS}u;\n\
         barrier(CLK_LOCAL_MEM_FENCE);\n\
         if (gid < n) {{\n\
         \x20   const uint d = local_digits[lid];\n\
         \x20   uint rank = 0;\n\
         \x20   for (ulong j = 0; j < lid; ++j) if (local_digits[j] == d) ++rank;\n\
         \x20   const uint at = digit_start[d] + offsets[get_group_id(0) * {BUCKETS}UL + d] + rank;\n\
         \x20   output[out_first + at] = x;\n\
         }}\n"
    ));

    let mut program = ProgramSource::new(dialect);
    program.add_kernel(count)?.add_kernel(starts)?.add_kernel(scatter)?;
    Ok(program.serialize())
}

/// Sort `keys[..n]` ascending in place.
///
/// Supports every scalar type except `bool`. Float keys order `-0.0` before `+0.0`; NaNs sort by
/// their bits, positive NaNs after `+inf` and negative NaNs before `-inf`.
pub fn sort(rt: &ComputeRuntime, queue: &Queue, keys: &BufferIter, n: usize) -> Result<Event> {
    let dtype = keys.dtype().clone();
    let device = queue.device();
    let Some((key, transform)) = dtype.scalar().and_then(|key| Some((key, radix_key(key, device.dialect)?))) else {
        return UnsupportedKeyTypeSnafu { operation: "radix sort", dtype: dtype.name() }.fail();
    };
    DeviceIter::Buffer(keys.clone()).check_len(n)?;
    if n <= 1 {
        return Ok(Event::Complete);
    }

    let block = clamp_work_group(rt.parameter(&device.info, PARAMS, "block_size", 128), &device.info);
    let program_key = format!("radix_sort:{}:{block}", key.name());
    let source = || -> kiln_runtime::Result<String> { Ok(program_source(key, &transform, device.dialect, block)?) };
    let mut count = rt.kernel(device, &program_key, "radix_count", "", source)?;
    let mut starts = rt.kernel(device, &program_key, "radix_scan", "", source)?;
    let mut scatter = rt.kernel(device, &program_key, "radix_scatter", "", source)?;

    let blocks = n.div_ceil(block);
    let elem = dtype.bytes();
    let counts = queue.allocate(blocks * BUCKETS * 4)?;
    let offsets = queue.allocate(blocks * BUCKETS * 4)?;
    let digit_start = queue.allocate(BUCKETS * 4)?;
    let spare = queue.allocate(n * elem)?;
    let per_block = DType::vector(ScalarType::UInt32, BUCKETS)?;
    let counts_iter = DeviceIter::Buffer(BufferIter::new(counts.clone(), per_block.clone()));
    let no_prior_blocks = ScanKind::Exclusive { init: Value::zero(&per_block) };
    let offsets_iter = BufferIter::new(offsets.clone(), per_block);

    let range = NdRange::new_1d(blocks * block, block);
    let passes = key.bit_width() / RADIX_BITS;
    // (buffer, first element) for the keys before and after each pass.
    let mut from: (Buffer, usize) = (keys.buffer().clone(), keys.offset());
    let mut to: (Buffer, usize) = (spare, 0);
    let mut event = Event::Complete;
    for pass in 0..passes {
        let shift = Value::UInt32((pass * RADIX_BITS) as u32);
        count.set_args([
            KernelArg::Buffer(from.0.clone()),
            KernelArg::Buffer(counts.clone()),
            KernelArg::Scalar(Value::UInt64(from.1 as u64)),
            KernelArg::Scalar(Value::UInt64(n as u64)),
            KernelArg::Scalar(shift.clone()),
            KernelArg::Local(BUCKETS * 4),
        ])?;
        queue.enqueue_kernel(&count, &range, &WaitList::new())?;

        scan(rt, queue, &counts_iter, blocks, &offsets_iter, &no_prior_blocks, &BinaryOp::Plus)?;

        starts.set_args([
            KernelArg::Buffer(counts.clone()),
            KernelArg::Buffer(offsets.clone()),
            KernelArg::Buffer(digit_start.clone()),
            KernelArg::Scalar(Value::UInt64((blocks - 1) as u64)),
        ])?;
        queue.enqueue_task(&starts, &WaitList::new())?;

        scatter.set_args([
            KernelArg::Buffer(from.0.clone()),
            KernelArg::Buffer(to.0.clone()),
            KernelArg::Buffer(offsets.clone()),
            KernelArg::Buffer(digit_start.clone()),
            KernelArg::Scalar(Value::UInt64(from.1 as u64)),
            KernelArg::Scalar(Value::UInt64(to.1 as u64)),
            KernelArg::Scalar(Value::UInt64(n as u64)),
            KernelArg::Scalar(shift),
            KernelArg::Local(block * 4),
        ])?;
        event = queue.enqueue_kernel(&scatter, &range, &WaitList::new())?;
        std::mem::swap(&mut from, &mut to);
    }

    tracing::debug!(n, %dtype, block, blocks, passes, "radix sort");
    Ok(event)
}
