//! Multi-pass reduction.
//!
//! Each pass folds `vpt * tpb` elements per work-group and writes one partial per group, so a
//! pass shrinks the input by that factor. Passes repeat over the partials until one group is
//! left. With a host destination and a builtin operator, the loop stops as soon as at most
//! `tpb` partials remain and the host folds them, saving the last launch.
//!
//! Group bodies:
//!
//! - **tree**: commutative operators. Item `lid` folds `start + lid + i * tpb`, then a halving
//!   tree over local memory combines the items.
//! - **ordered**: non-commutative operators. Item `lid` folds a contiguous chunk of `vpt`
//!   elements and an interleaved tree combines neighbours left to right.
//! - **subgroup**: commutative operators on scalars, on devices with sub-group shuffles. A
//!   butterfly inside each sub-group replaces most of the tree.
//!
//! Devices without room for the tree in local memory, and CPU OpenCL devices, fold serially in
//! a single work-item.

use kiln_device::{Buffer, DeviceInfo, Dialect, Event, NdRange, Queue, WaitList};
use kiln_dtype::{DType, Element, Value};
use kiln_runtime::work_size::clamp_work_group;
use kiln_runtime::{ComputeRuntime, MetaKernel, tree_fits_local_memory};

use crate::error::{LengthMismatchSnafu, Result, TypeMismatchSnafu, UnsupportedOperatorSnafu};
use crate::functional::BinaryOp;
use crate::iterator::{BufferIter, DeviceIter};

pub(crate) const PARAMS: &str = "reduce";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupBody {
    Tree,
    Ordered,
    Subgroup,
}

/// How a reduction runs on a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReducePlan {
    Serial,
    Groups { vpt: usize, tpb: usize, body: GroupBody },
}

/// Sub-group butterflies need a declared width no wider than the group, an identity to pad
/// idle lanes, and a value a shuffle can move.
pub fn use_subgroups(info: &DeviceInfo, op: &BinaryOp, dtype: &DType, tpb: usize) -> bool {
    info.subgroup_shuffle
        && info.subgroup_size.is_some_and(|width| tpb >= width)
        && op.is_commutative()
        && dtype.is_scalar()
        && op.identity(dtype).is_some()
}

pub fn reduce_plan(
    rt: &ComputeRuntime,
    info: &DeviceInfo,
    dialect: Dialect,
    op: &BinaryOp,
    dtype: &DType,
) -> ReducePlan {
    let vpt = rt.parameter(info, PARAMS, "vpt", 8).max(1);
    let tpb = clamp_work_group(rt.parameter(info, PARAMS, "tpb", 128), info);

    if info.is_cpu() && dialect == Dialect::OpenCl {
        tracing::debug!(device = %info.name, "serial reduce on CPU device");
        return ReducePlan::Serial;
    }
    if !tree_fits_local_memory(info, tpb, dtype.bytes()) {
        tracing::warn!(device = %info.name, %dtype, tpb, "local memory too small for a tree reduce, folding serially");
        return ReducePlan::Serial;
    }

    let body = if !op.is_commutative() {
        GroupBody::Ordered
    } else if use_subgroups(info, op, dtype, tpb) {
        GroupBody::Subgroup
    } else {
        GroupBody::Tree
    };
    ReducePlan::Groups { vpt, tpb, body }
}

/// One group pass: partial `g` of `input[..count]` lands at `output[g]`.
#[allow(clippy::too_many_arguments)]
fn group_pass(
    rt: &ComputeRuntime,
    queue: &Queue,
    input: &DeviceIter,
    count: usize,
    op: &BinaryOp,
    output: &BufferIter,
    vpt: usize,
    tpb: usize,
    body: GroupBody,
) -> Result<Event> {
    let dtype = input.dtype();
    let name = match body {
        GroupBody::Tree => "reduce_tree",
        GroupBody::Ordered => "reduce_ordered",
        GroupBody::Subgroup => "reduce_subgroup",
    };
    let mut k = MetaKernel::for_device(name, queue.device());
    let ty = k.type_name(&dtype);
    let n = k.add_set_arg("n", Value::UInt64(count as u64));
    let scratch = k.add_local("scratch", &dtype, tpb);
    let x = input.read(&mut k, "i");
    let out = DeviceIter::Buffer(output.clone()).write(&mut k, "get_group_id(0)")?;
    let fold = op.apply(&mut k, "acc", "x");
    let pair = op.apply(&mut k, &format!("{scratch}[lid]"), &format!("{scratch}[lid + s]"));

    k.emit_raw(format!(
        "const ulong lid = get_local_id(0);\n\
         const ulong start = get_group_id(0) * {span}UL;\n\
         const ulong end = min(start + {span}UL, {n});\n",
        span = vpt * tpb,
    ));
    match body {
        GroupBody::Tree => {
            k.emit_raw(format!(
                "const ulong active = min((ulong){tpb}, end - start);\n\
                 {ty} acc;\n\
                 for (ulong i = start + lid; i < end; i += {tpb}UL) {{\n\
                 \x20   const {ty} x = {x};\n\
                 \x20   if (i == start + lid) acc = x; else acc = {fold};\n\
                 }}\n\
                 if (lid < active) {scratch}[lid] = acc;\n\
                 for (ulong s = {half}UL; s > 0; s >>= 1) {{\n\
                 \x20   barrier(CLK_LOCAL_MEM_FENCE);\n\
                 \x20   if (lid < s && lid + s < active) {scratch}[lid] = {pair};\n\
                 }}\n\
                 if (lid == 0) {out} = {scratch}[0];\n",
                half = tpb / 2,
            ));
        }
        GroupBody::Ordered => {
            k.emit_raw(format!(
                "const ulong active = (end - start + {vpt}UL - 1) / {vpt}UL;\n\
                 const ulong first = start + lid * {vpt}UL;\n\
                 const ulong last = min(first + {vpt}UL, end);\n\
                 {ty} acc;\n\
                 for (ulong i = first; i < last; ++i) {{\n\
                 \x20   const {ty} x = {x};\n\
                 \x20   if (i == first) acc = x; else acc = {fold};\n\
                 }}\n\
                 if (lid < active) {scratch}[lid] = acc;\n\
                 for (ulong s = 1; s < {tpb}UL; s <<= 1) {{\n\
                 \x20   barrier(CLK_LOCAL_MEM_FENCE);\n\
                 \x20   if ((lid & (2 * s - 1)) == 0 && lid + s < active) {scratch}[lid] = {pair};\n\
                 }}\n\
                 if (lid == 0) {out} = {scratch}[0];\n"
            ));
        }
        GroupBody::Subgroup => {
            k.add_pragma("cl_khr_subgroups").add_pragma("cl_khr_subgroup_shuffle");
            let Some(identity) = op.identity(&dtype) else {
                return UnsupportedOperatorSnafu { op: op.name(), dtype: dtype.name() }.fail();
            };
            let identity = k.literal(&identity);
            let shuffle = op.apply(&mut k, "acc", "sub_group_shuffle_xor(acc, m)");
            let gather = op.apply(&mut k, "r", &format!("{scratch}[g]"));
            k.emit_raw(format!(
                "{ty} acc = {identity};\n\
                 for (ulong i = start + lid; i < end; i += {tpb}UL) {{\n\
                 \x20   const {ty} x = {x};\n\
                 \x20   acc = {fold};\n\
                 }}\n\
                 for (uint m = get_sub_group_size() / 2; m > 0; m >>= 1) acc = {shuffle};\n\
                 if (get_sub_group_local_id() == 0) {scratch}[get_sub_group_id()] = acc;\n\
                 barrier(CLK_LOCAL_MEM_FENCE);\n\
                 if (lid == 0) {{\n\
                 \x20   {ty} r = {scratch}[0];\n\
                 \x20   for (uint g = 1; g < get_num_sub_groups(); ++g) r = {gather};\n\
                 \x20   {out} = r;\n\
                 }}\n"
            ));
        }
    }

    let groups = count.div_ceil(vpt * tpb);
    tracing::trace!(kernel = name, count, groups, "reduce pass");
    Ok(k.exec(rt, queue, &NdRange::new_1d(groups * tpb, tpb), &WaitList::new())?)
}

/// A single work-item folds `input[..count]` into `output[0]`.
fn serial_pass(
    rt: &ComputeRuntime,
    queue: &Queue,
    input: &DeviceIter,
    count: usize,
    op: &BinaryOp,
    output: &BufferIter,
) -> Result<Event> {
    let dtype = input.dtype();
    let mut k = MetaKernel::for_device("serial_reduce", queue.device());
    let ty = k.type_name(&dtype);
    let n = k.add_set_arg("n", Value::UInt64(count as u64));
    let x = input.read(&mut k, "i");
    let out = DeviceIter::Buffer(output.clone()).write(&mut k, "0")?;
    let fold = op.apply(&mut k, "acc", "x");
    k.emit_raw(format!(
        "{ty} acc;\n\
         for (ulong i = 0; i < {n}; ++i) {{\n\
         \x20   const {ty} x = {x};\n\
         \x20   if (i == 0) acc = x; else acc = {fold};\n\
         }}\n\
         {out} = acc;\n"
    ));
    Ok(k.exec(rt, queue, &NdRange::task(), &WaitList::new())?)
}

/// Run passes over `input[..n]` (`n > 0`).
///
/// With `dest` the result lands there. Otherwise the returned partials still need folding on
/// the host; there is exactly one unless the operator is host-evaluable.
fn run_passes(
    rt: &ComputeRuntime,
    queue: &Queue,
    input: &DeviceIter,
    n: usize,
    op: &BinaryOp,
    dest: Option<&BufferIter>,
) -> Result<(Event, BufferIter, usize)> {
    let dtype = input.dtype();
    op.check(&dtype)?;
    let device = queue.device();

    let (vpt, tpb, body) = match reduce_plan(rt, &device.info, device.dialect, op, &dtype) {
        ReducePlan::Serial => {
            let out = match dest {
                Some(dest) => dest.clone(),
                None => BufferIter::new(queue.allocate(dtype.bytes())?, dtype.clone()),
            };
            let event = serial_pass(rt, queue, input, n, op, &out)?;
            return Ok((event, out, 1));
        }
        ReducePlan::Groups { vpt, tpb, body } => (vpt, tpb, body),
    };

    let host_fold = dest.is_none() && op.is_host_evaluable();
    let mut current = input.clone();
    let mut count = n;
    let mut buffers: [Option<Buffer>; 2] = [None, None];
    let mut pass = 0;
    loop {
        let groups = count.div_ceil(vpt * tpb);
        let out = match dest {
            Some(dest) if groups == 1 => dest.clone(),
            // The first pass to use a slot is its largest.
            _ => match &buffers[pass % 2] {
                Some(buffer) => BufferIter::new(buffer.clone(), dtype.clone()),
                None => {
                    let buffer = queue.allocate(groups * dtype.bytes())?;
                    buffers[pass % 2] = Some(buffer.clone());
                    BufferIter::new(buffer, dtype.clone())
                }
            },
        };

        let event = group_pass(rt, queue, &current, count, op, &out, vpt, tpb, body)?;
        if groups == 1 || (host_fold && groups <= tpb) {
            tracing::debug!(n, passes = pass + 1, partials = groups, ?body, "reduce");
            return Ok((event, out, groups));
        }
        current = DeviceIter::Buffer(out);
        count = groups;
        pass += 1;
    }
}

/// Reduce `input[..n]` with `op` into `dest[0]`. Empty input leaves `dest` untouched.
pub fn reduce_into(
    rt: &ComputeRuntime,
    queue: &Queue,
    input: &DeviceIter,
    n: usize,
    op: &BinaryOp,
    dest: &BufferIter,
) -> Result<Event> {
    input.check_len(n)?;
    snafu::ensure!(
        *dest.dtype() == input.dtype(),
        TypeMismatchSnafu { from: input.dtype().name(), to: dest.dtype().name() }
    );
    snafu::ensure!(dest.capacity() >= 1, LengthMismatchSnafu { expected: 1usize, actual: dest.capacity() });
    if n == 0 {
        return Ok(Event::Complete);
    }
    Ok(run_passes(rt, queue, input, n, op, Some(dest))?.0)
}

/// Reduce `input[..n]` with `op`; `None` for empty input.
pub fn reduce<T: Element>(
    rt: &ComputeRuntime,
    queue: &Queue,
    input: &DeviceIter,
    n: usize,
    op: &BinaryOp,
) -> Result<Option<T>> {
    let dtype = T::dtype();
    snafu::ensure!(dtype == input.dtype(), TypeMismatchSnafu { from: input.dtype().name(), to: dtype.name() });
    input.check_len(n)?;
    if n == 0 {
        return Ok(None);
    }

    let (event, partials, count) = run_passes(rt, queue, input, n, op, None)?;
    let bytes = queue.enqueue_read(partials.buffer(), 0, count * dtype.bytes(), &event.into())?.wait()?;
    if count == 1 {
        return Ok(Some(bytemuck::pod_read_unaligned(&bytes)));
    }

    let mut values = bytes.chunks_exact(dtype.bytes()).map(|chunk| Value::from_bytes(&dtype, chunk));
    let Some(first) = values.next() else {
        return Ok(None);
    };
    let mut acc = first?;
    for value in values {
        let value = value?;
        acc = op
            .eval(&acc, &value)
            .ok_or_else(|| UnsupportedOperatorSnafu { op: op.name(), dtype: dtype.name() }.build())?;
    }
    Ok(Some(T::from_value(&acc)?))
}

/// `op(init, reduce(input[..n]))`, or `init` for empty input.
pub fn accumulate<T: Element>(
    rt: &ComputeRuntime,
    queue: &Queue,
    input: &DeviceIter,
    n: usize,
    init: T,
    op: &BinaryOp,
) -> Result<T> {
    if op.is_host_evaluable() {
        let Some(partial) = reduce::<T>(rt, queue, input, n, op)? else {
            return Ok(init);
        };
        let dtype = T::dtype();
        let combined = op
            .eval(&init.to_value()?, &partial.to_value()?)
            .ok_or_else(|| UnsupportedOperatorSnafu { op: op.name(), dtype: dtype.name() }.build())?;
        return Ok(T::from_value(&combined)?);
    }

    if n == 0 {
        return Ok(init);
    }
    let dtype = T::dtype();
    let result = BufferIter::new(queue.allocate(dtype.bytes())?, dtype.clone());
    reduce_into(rt, queue, input, n, op, &result)?;

    let mut k = MetaKernel::for_device("accumulate_init", queue.device());
    let init = k.add_set_arg("init", init.to_value()?);
    let target = DeviceIter::Buffer(result.clone()).write(&mut k, "0")?;
    let combined = op.apply(&mut k, &init, &target);
    k.emit_raw(format!("{target} = {combined};\n"));
    let event = k.exec(rt, queue, &NdRange::task(), &WaitList::new())?;

    let bytes = queue.enqueue_read(result.buffer(), 0, dtype.bytes(), &event.into())?.wait()?;
    Ok(bytemuck::pod_read_unaligned(&bytes))
}
