//! Block prefix scan.
//!
//! 1. `local_scan`: each work-group scans one block in local memory (Hillis-Steele doubling)
//!    and its last item records the block total.
//! 2. With more than one block, the totals are scanned inclusively by the same engine.
//! 3. `write_scanned_output`: every block after the first adds the scanned total of the blocks
//!    before it; an exclusive scan also adds its initial value to every element.
//!
//! Exclusive scans seed lane 0 of each block with the operator's identity and read
//! `input[i - 1]` elsewhere, so the initial value is added exactly once, in pass 3.

use kiln_device::{Event, NdRange, Queue, WaitList};
use kiln_dtype::Value;
use kiln_runtime::work_size::prev_power_of_two;
use kiln_runtime::{ComputeRuntime, MetaKernel};

use crate::copy::copy_kernel;
use crate::error::{MissingIdentitySnafu, Result, TypeMismatchSnafu};
use crate::functional::BinaryOp;
use crate::iterator::{BufferIter, DeviceIter, convert};

pub(crate) const PARAMS: &str = "scan";

#[derive(Debug, Clone, PartialEq)]
pub enum ScanKind {
    Inclusive,
    /// `output[0] = init`, `output[i] = op(init, input[0..i])`.
    Exclusive { init: Value },
}

impl ScanKind {
    pub fn is_exclusive(&self) -> bool {
        matches!(self, Self::Exclusive { .. })
    }
}

/// Items per block for `n` elements of `elem_bytes` each.
pub fn block_size(rt: &ComputeRuntime, queue: &Queue, n: usize, elem_bytes: usize) -> usize {
    let info = queue.info();
    let cap = rt
        .parameter(info, PARAMS, "block_size", 256)
        .min(info.max_work_group_size)
        .min(info.local_mem_size / elem_bytes.max(1));
    n.next_power_of_two().min(prev_power_of_two(cap)).max(1)
}

/// Scan `input[..n]` into `output[..n]` with `op`.
///
/// The element type is the output's; input elements convert to it. `input` may alias
/// `output`, in which case the input is staged through a temporary buffer first.
pub fn scan(
    rt: &ComputeRuntime,
    queue: &Queue,
    input: &DeviceIter,
    n: usize,
    output: &BufferIter,
    kind: &ScanKind,
    op: &BinaryOp,
) -> Result<Event> {
    let dtype = output.dtype().clone();
    op.check(&dtype)?;
    let Some(identity) = op.identity(&dtype) else {
        return MissingIdentitySnafu { op: op.name(), dtype: dtype.name() }.fail();
    };
    if let ScanKind::Exclusive { init } = kind {
        let from = init.dtype();
        snafu::ensure!(from == dtype, TypeMismatchSnafu { from: from.name(), to: dtype.name() });
    }
    input.check_len(n)?;
    DeviceIter::Buffer(output.clone()).check_len(n)?;
    if n == 0 {
        return Ok(Event::Complete);
    }

    if input.aliases(output.buffer()) {
        let staging = BufferIter::new(queue.allocate(n * input.dtype().bytes())?, input.dtype());
        let staged = DeviceIter::Buffer(staging.clone());
        copy_kernel(rt, queue, input, n, &staged, &WaitList::new())?;
        tracing::debug!(n, "scan input staged");
        return scan_blocks(rt, queue, &staged, n, output, kind, op, &identity);
    }
    scan_blocks(rt, queue, input, n, output, kind, op, &identity)
}

pub fn inclusive_scan(
    rt: &ComputeRuntime,
    queue: &Queue,
    input: &DeviceIter,
    n: usize,
    output: &BufferIter,
    op: &BinaryOp,
) -> Result<Event> {
    scan(rt, queue, input, n, output, &ScanKind::Inclusive, op)
}

pub fn exclusive_scan(
    rt: &ComputeRuntime,
    queue: &Queue,
    input: &DeviceIter,
    n: usize,
    output: &BufferIter,
    init: impl Into<Value>,
    op: &BinaryOp,
) -> Result<Event> {
    scan(rt, queue, input, n, output, &ScanKind::Exclusive { init: init.into() }, op)
}

#[allow(clippy::too_many_arguments)]
fn scan_blocks(
    rt: &ComputeRuntime,
    queue: &Queue,
    input: &DeviceIter,
    n: usize,
    output: &BufferIter,
    kind: &ScanKind,
    op: &BinaryOp,
    identity: &Value,
) -> Result<Event> {
    let dtype = output.dtype().clone();
    let block = block_size(rt, queue, n, dtype.bytes());
    let blocks = n.div_ceil(block);
    let sums = BufferIter::new(queue.allocate(blocks * dtype.bytes())?, dtype.clone());

    let scanned_locally = local_scan(rt, queue, input, n, output, &sums, block, kind, op, identity)?;
    let scanned = if blocks > 1 {
        let scanned = BufferIter::new(queue.allocate(blocks * dtype.bytes())?, dtype.clone());
        scan(rt, queue, &DeviceIter::Buffer(sums), blocks, &scanned, &ScanKind::Inclusive, op)?;
        Some(scanned)
    } else {
        None
    };

    tracing::debug!(n, block, blocks, exclusive = kind.is_exclusive(), "scan");
    if scanned.is_none() && !kind.is_exclusive() {
        return Ok(scanned_locally);
    }
    write_scanned_output(rt, queue, n, output, scanned.as_ref(), block, kind, op)
}

#[allow(clippy::too_many_arguments)]
fn local_scan(
    rt: &ComputeRuntime,
    queue: &Queue,
    input: &DeviceIter,
    n: usize,
    output: &BufferIter,
    sums: &BufferIter,
    block: usize,
    kind: &ScanKind,
    op: &BinaryOp,
    identity: &Value,
) -> Result<Event> {
    let dtype = output.dtype().clone();
    let mut k = MetaKernel::for_device("local_scan", queue.device());
    let ty = k.type_name(&dtype);
    let count = k.add_set_arg("n", Value::UInt64(n as u64));
    let scratch = k.add_local("scratch", &dtype, block);
    let identity = k.literal(identity);
    let exclusive = kind.is_exclusive();
    let index = if exclusive { "i - 1" } else { "i" };
    let read = input.read(&mut k, index);
    let read = convert(&mut k, read, &input.dtype(), &dtype)?;
    let out = DeviceIter::Buffer(output.clone()).write(&mut k, "i")?;
    let total = DeviceIter::Buffer(sums.clone()).write(&mut k, "get_group_id(0)")?;
    let step = op.apply(&mut k, &format!("{scratch}[lid - offset]"), "v");
    let last_input = input.read(&mut k, "i");
    let last_input = convert(&mut k, last_input, &input.dtype(), &dtype)?;
    let close = op.apply(&mut k, "t", &last_input);

    let seed = if exclusive { "lid > 0 && i < n_items" } else { "i < n_items" };
    k.emit_raw(format!(
        "const ulong lid = get_local_id(0);\n\
         const ulong first = get_group_id(0) * {block}UL;\n\
         const ulong i = first + lid;\n\
         const ulong n_items = {count};\n\
         {ty} x = {identity};\n\
         if ({seed}) x = {read};\n\
         {scratch}[lid] = x;\n\
         for (ulong offset = 1; offset < {block}UL; offset <<= 1) {{\n\
         \x20   barrier(CLK_LOCAL_MEM_FENCE);\n\
         \x20   {ty} v = {scratch}[lid];\n\
         \x20   if (lid >= offset) v = {step};\n\
         \x20   barrier(CLK_LOCAL_MEM_FENCE);\n\
         \x20   {scratch}[lid] = v;\n\
         }}\n\
         barrier(CLK_LOCAL_MEM_FENCE);\n\
         if (i < n_items) {out} = {scratch}[lid];\n\
         if (lid == min((ulong){block}, n_items - first) - 1) {{\n\
         \x20   {ty} t = {scratch}[lid];\n"
    ));
    if exclusive {
        k.emit_raw(format!("    t = {close};\n"));
    }
    k.emit_raw(format!("    {total} = t;\n}}\n"));

    let groups = n.div_ceil(block);
    Ok(k.exec(rt, queue, &NdRange::new_1d(groups * block, block), &WaitList::new())?)
}

#[allow(clippy::too_many_arguments)]
fn write_scanned_output(
    rt: &ComputeRuntime,
    queue: &Queue,
    n: usize,
    output: &BufferIter,
    scanned: Option<&BufferIter>,
    block: usize,
    kind: &ScanKind,
    op: &BinaryOp,
) -> Result<Event> {
    let mut k = MetaKernel::for_device("write_scanned_output", queue.device());
    let count = k.add_set_arg("n", Value::UInt64(n as u64));
    let out = DeviceIter::Buffer(output.clone()).write(&mut k, "i")?;
    k.emit_raw(format!("const ulong i = get_global_id(0);\nif (i >= {count}) return;\n"));

    if let Some(scanned) = scanned {
        let prior = DeviceIter::Buffer(scanned.clone()).read(&mut k, &format!("i / {block}UL - 1"));
        let combined = op.apply(&mut k, &prior, &out);
        k.emit_raw(format!("if (i >= {block}UL) {out} = {combined};\n"));
    }
    if let ScanKind::Exclusive { init } = kind {
        let init = k.add_set_arg("init", init.clone());
        let combined = op.apply(&mut k, &init, &out);
        k.emit_raw(format!("{out} = {combined};\n"));
    }

    Ok(k.exec(rt, queue, &NdRange::new_1d(n, None), &WaitList::new())?)
}
