//! Position of the smallest or largest element.
//!
//! Large inputs run one pass of work-groups: every item scans a grid-strided slice of the
//! input, keeps its best `(value, index)` pair, and a local tree picks one pair per group. The
//! host compares the group candidates. Small inputs, and devices without local memory for the
//! pairs, scan serially in one work-item.
//!
//! Ties resolve to the lowest index. Comparisons use `<`, so a NaN is never replaced once held
//! and never replaces anything.

use std::cmp::Ordering;

use kiln_device::{NdRange, Queue, WaitList};
use kiln_dtype::{DType, Value};
use kiln_runtime::work_size::{clamp_work_group, prev_power_of_two};
use kiln_runtime::{ComputeRuntime, MetaKernel, tree_fits_local_memory};

use crate::error::{Result, UnsupportedKeyTypeSnafu};
use crate::iterator::{BufferIter, DeviceIter};

pub(crate) const PARAMS: &str = "extrema";

/// Index of an item that saw no elements.
const NO_INDEX: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extremum {
    Min,
    Max,
}

impl Extremum {
    fn name(self) -> &'static str {
        match self {
            Self::Min => "min_element",
            Self::Max => "max_element",
        }
    }

    /// Kernel expression: `a` strictly better than `b`.
    fn better(self, a: &str, b: &str) -> String {
        match self {
            Self::Min => format!("(({a}) < ({b}))"),
            Self::Max => format!("(({b}) < ({a}))"),
        }
    }

    fn prefers(self, a: &Value, b: &Value) -> bool {
        match (self, compare(a, b)) {
            (Self::Min, Some(Ordering::Less)) | (Self::Max, Some(Ordering::Greater)) => true,
            _ => false,
        }
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Int8(a), Value::Int8(b)) => a.partial_cmp(b),
        (Value::UInt8(a), Value::UInt8(b)) => a.partial_cmp(b),
        (Value::Int16(a), Value::Int16(b)) => a.partial_cmp(b),
        (Value::UInt16(a), Value::UInt16(b)) => a.partial_cmp(b),
        (Value::Int32(a), Value::Int32(b)) => a.partial_cmp(b),
        (Value::UInt32(a), Value::UInt32(b)) => a.partial_cmp(b),
        (Value::Int64(a), Value::Int64(b)) => a.partial_cmp(b),
        (Value::UInt64(a), Value::UInt64(b)) => a.partial_cmp(b),
        (Value::Float32(a), Value::Float32(b)) => a.partial_cmp(b),
        (Value::Float64(a), Value::Float64(b)) => a.partial_cmp(b),
        _ => None,
    }
}

pub fn min_element(rt: &ComputeRuntime, queue: &Queue, input: &DeviceIter, n: usize) -> Result<Option<usize>> {
    find_extremum(rt, queue, input, n, Extremum::Min)
}

pub fn max_element(rt: &ComputeRuntime, queue: &Queue, input: &DeviceIter, n: usize) -> Result<Option<usize>> {
    find_extremum(rt, queue, input, n, Extremum::Max)
}

/// Index of the first best element of `input[..n]`; `None` for empty input.
pub fn find_extremum(
    rt: &ComputeRuntime,
    queue: &Queue,
    input: &DeviceIter,
    n: usize,
    which: Extremum,
) -> Result<Option<usize>> {
    let dtype = input.dtype();
    snafu::ensure!(
        dtype.scalar().is_some_and(|s| !s.is_bool()),
        UnsupportedKeyTypeSnafu { operation: which.name(), dtype: dtype.name() }
    );
    input.check_len(n)?;
    if n == 0 {
        return Ok(None);
    }

    let info = queue.info();
    let wg = prev_power_of_two(clamp_work_group(rt.parameter(info, PARAMS, "wgsize", 256), info));
    let tree = n >= wg && n <= NO_INDEX as usize && tree_fits_local_memory(info, wg, 4 + dtype.bytes());
    if !tree {
        tracing::debug!(n, wg, %dtype, op = which.name(), "serial extremum");
        return serial_extremum(rt, queue, input, n, which).map(Some);
    }

    let wgpcu = rt.parameter(info, PARAMS, "wgpcu", 64).max(1);
    let groups = (wgpcu * info.compute_units.max(1)).min(n.div_ceil(wg));
    let values = BufferIter::new(queue.allocate(groups * dtype.bytes())?, dtype.clone());
    let indices = BufferIter::new(queue.allocate(groups * 4)?, DType::UInt32);
    group_candidates(rt, queue, input, n, which, wg, groups, &values, &indices)?;

    let raw_values = queue.read(values.buffer(), 0, groups * dtype.bytes())?;
    let raw_indices: Vec<u32> = queue.read_vec(indices.buffer(), 0, groups)?;
    let mut best: Option<(Value, u32)> = None;
    for (chunk, &index) in raw_values.chunks_exact(dtype.bytes()).zip(&raw_indices) {
        if index == NO_INDEX {
            continue;
        }
        let value = Value::from_bytes(&dtype, chunk)?;
        let replace = match &best {
            None => true,
            Some((held, at)) => {
                which.prefers(&value, held) || (!which.prefers(held, &value) && index < *at)
            }
        };
        if replace {
            best = Some((value, index));
        }
    }
    tracing::debug!(n, wg, groups, op = which.name(), "extremum");
    Ok(best.map(|(_, index)| index as usize))
}

#[allow(clippy::too_many_arguments)]
fn group_candidates(
    rt: &ComputeRuntime,
    queue: &Queue,
    input: &DeviceIter,
    n: usize,
    which: Extremum,
    wg: usize,
    groups: usize,
    values: &BufferIter,
    indices: &BufferIter,
) -> Result<()> {
    let dtype = input.dtype();
    let mut k = MetaKernel::for_device(format!("{}_tree", which.name()), queue.device());
    let ty = k.type_name(&dtype);
    let count = k.add_set_arg("n", Value::UInt64(n as u64));
    let local_values = k.add_local("local_values", &dtype, wg);
    let local_indices = k.add_local("local_indices", &DType::UInt32, wg);
    let x = input.read(&mut k, "i");
    let out_value = DeviceIter::Buffer(values.clone()).write(&mut k, "get_group_id(0)")?;
    let out_index = DeviceIter::Buffer(indices.clone()).write(&mut k, "get_group_id(0)")?;
    let take = which.better("x", "best");
    let other_better = which.better("ov", &format!("{local_values}[lid]"));
    let mine_better = which.better(&format!("{local_values}[lid]"), "ov");

    k.emit_raw(format!(
        "const ulong lid = get_local_id(0);\n\
         const ulong stride = get_global_size(0);\n\
         uint best_i = {NO_INDEX}u;\n\
         {ty} best;\n\
         for (ulong i = get_global_id(0); i < {count}; i += stride) {{\n\
         \x20   const {ty} x = {x};\n\
         \x20   if (best_i == {NO_INDEX}u || {take}) {{ best = x; best_i = (uint)i; }}\n\
         }}\n\
         {local_values}[lid] = best;\n\
         {local_indices}[lid] = best_i;\n\
         for (ulong s = {half}UL; s > 0; s >>= 1) {{\n\
         \x20   barrier(CLK_LOCAL_MEM_FENCE);\n\
         \x20   if (lid < s && {local_indices}[lid + s] != {NO_INDEX}u) {{\n\
         \x20       const {ty} ov = {local_values}[lid + s];\n\
         \x20       const uint oi = {local_indices}[lid + s];\n\
         \x20       const uint mi = {local_indices}[lid];\n\
         \x20       if (mi == {NO_INDEX}u || {other_better} || (!{mine_better} && oi < mi)) {{\n\
         \x20           {local_values}[lid] = ov;\n\
         \x20           {local_indices}[lid] = oi;\n\
         \x20       }}\n\
         \x20   }}\n\
         }}\n\
         if (lid == 0) {{\n\
         \x20   {out_value} = {local_values}[0];\n\
         \x20   {out_index} = {local_indices}[0];\n\
         }}\n",
        half = wg / 2,
    ));

    let event = k.exec(rt, queue, &NdRange::new_1d(groups * wg, wg), &WaitList::new())?;
    Ok(event.wait()?)
}

fn serial_extremum(rt: &ComputeRuntime, queue: &Queue, input: &DeviceIter, n: usize, which: Extremum) -> Result<usize> {
    let dtype = input.dtype();
    let mut k = MetaKernel::for_device(format!("serial_{}", which.name()), queue.device());
    let ty = k.type_name(&dtype);
    let count = k.add_set_arg("n", Value::UInt64(n as u64));
    let x = input.read(&mut k, "i");
    let first = input.read(&mut k, "0");
    let result = BufferIter::new(queue.allocate(8)?, DType::UInt64);
    let out = DeviceIter::Buffer(result.clone()).write(&mut k, "0")?;
    let take = which.better("x", "best");
    k.emit_raw(format!(
        "{ty} best = {first};\n\
         ulong best_i = 0;\n\
         for (ulong i = 1; i < {count}; ++i) {{\n\
         \x20   const {ty} x = {x};\n\
         \x20   if ({take}) {{ best = x; best_i = i; }}\n\
         }}\n\
         {out} = best_i;\n"
    ));
    let event = k.exec(rt, queue, &NdRange::task(), &WaitList::new())?;
    event.wait()?;
    let index: Vec<u64> = queue.read_vec(result.buffer(), 0, 1)?;
    Ok(index.first().copied().unwrap_or_default() as usize)
}
