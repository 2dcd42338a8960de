//! Host device: host C kernels compiled with the system C compiler and run on host threads.
//!
//! # Work-groups
//!
//! A launch with an explicit local size runs one *team* of `local_size` threads. Each thread
//! plays one work-item and walks every work-group in order; a [`Barrier`] across the team
//! implements `barrier()` inside the kernel and separates consecutive groups, so the team's
//! local memory can be reused by the next group.
//!
//! Without a local size every work-item is its own group. Items are spread over
//! `available_parallelism` workers and `barrier()` is a no-op.

use std::cell::UnsafeCell;
use std::ffi::c_void;
use std::num::NonZeroUsize;
use std::sync::{Arc, Barrier};

use kiln_device::error::{BackendSnafu, Result};
use kiln_device::{
    Device, DeviceInfo, DeviceKind, DeviceSpec, Dialect, HostAllocator, HostMemory, KernelArg, LruAllocator, NdRange,
    QueueFactory, RawBuffer, RuntimeFactory,
};

use crate::clang::{BindFn, EntryFn, HostCompiler, load_host_program};
use crate::config::RuntimeConfig;
use crate::devices::host_queue::HostQueue;

/// Work-item descriptor read by the host prelude's builtins.
///
/// Layout must match `kiln_item` in [`kiln_codegen::prelude::ITEM_STRUCT`].
#[repr(C)]
#[derive(Debug)]
struct WorkItem {
    global_id: [usize; 3],
    local_id: [usize; 3],
    group_id: [usize; 3],
    global_size: [usize; 3],
    local_size: [usize; 3],
    num_groups: [usize; 3],
    work_dim: u32,
    sync: extern "C" fn(*mut c_void),
    sync_ctx: *mut c_void,
}

extern "C" fn team_barrier(ctx: *mut c_void) {
    // SAFETY: `ctx` is the team's barrier, alive for the duration of the launch.
    let barrier = unsafe { &*(ctx as *const Barrier) };
    barrier.wait();
}

extern "C" fn no_barrier(_ctx: *mut c_void) {}

/// Argument pointers handed to an entry trampoline.
struct ArgTable(Vec<*mut c_void>);

// SAFETY: the pointers address allocations kept alive by the launch; the queue serializes
// launches against transfers touching the same memory.
unsafe impl Send for ArgTable {}
unsafe impl Sync for ArgTable {}

/// Storage for by-value arguments and local memory of one launch.
struct LaunchArgs {
    /// `None` marks a local-memory slot, filled per team.
    pointers: Vec<Option<*mut c_void>>,
    local_sizes: Vec<usize>,
    _owned: Vec<HostMemory>,
}

// SAFETY: see `ArgTable`.
unsafe impl Send for LaunchArgs {}
unsafe impl Sync for LaunchArgs {}

impl LaunchArgs {
    fn new(args: &[KernelArg]) -> Result<Self> {
        let mut pointers = Vec::with_capacity(args.len());
        let mut local_sizes = Vec::new();
        let mut owned = Vec::new();
        let mut own = |bytes: &[u8]| -> Result<*mut c_void> {
            let memory = HostMemory::zeroed(bytes.len())?;
            // SAFETY: freshly allocated with `bytes.len()` bytes.
            unsafe { memory.write(0, bytes) };
            let ptr = memory.as_ptr().cast();
            owned.push(memory);
            Ok(ptr)
        };

        for arg in args {
            let ptr = match arg {
                KernelArg::Buffer(buffer) => Some(host_memory(buffer.raw())?.as_ptr().cast()),
                KernelArg::Scalar(value) => Some(own(&value.to_bytes())?),
                KernelArg::HostConstant(bytes) => Some(own(bytes)?),
                KernelArg::Local(bytes) => {
                    local_sizes.push(*bytes);
                    None
                }
            };
            pointers.push(ptr);
        }
        Ok(Self { pointers, local_sizes, _owned: owned })
    }

    /// Pointer table for one team, with fresh local memory.
    fn for_team(&self) -> Result<(ArgTable, Vec<HostMemory>)> {
        let locals = self.local_sizes.iter().map(|&bytes| HostMemory::zeroed(bytes)).collect::<Result<Vec<_>>>()?;
        let mut next_local = locals.iter();
        let table = self
            .pointers
            .iter()
            .map(|ptr| match ptr {
                Some(ptr) => *ptr,
                None => next_local.next().map_or(std::ptr::null_mut(), |m| m.as_ptr().cast()),
            })
            .collect();
        Ok((ArgTable(table), locals))
    }
}

/// Host memory behind a buffer, or an error for memory owned by another backend.
pub(crate) fn host_memory(raw: &RawBuffer) -> Result<&HostMemory> {
    #[allow(unreachable_patterns)]
    match raw {
        RawBuffer::Host(memory) => Ok(memory),
        _ => BackendSnafu { message: "buffer was not allocated by the host device" }.fail(),
    }
}

fn unflatten(index: usize, extent: [usize; 3]) -> [usize; 3] {
    [index % extent[0], (index / extent[0]) % extent[1], index / (extent[0] * extent[1])]
}

/// Run `entry` over `range`, blocking until every work-item returned.
pub(crate) fn launch(entry: EntryFn, bind: BindFn, args: &[KernelArg], range: &NdRange) -> Result<()> {
    let launch_args = LaunchArgs::new(args)?;
    match range.local {
        Some(local) => launch_groups(entry, bind, &launch_args, range, local),
        None => launch_items(entry, bind, &launch_args, range),
    }
}

fn launch_groups(entry: EntryFn, bind: BindFn, args: &LaunchArgs, range: &NdRange, local: [usize; 3]) -> Result<()> {
    let team = local.iter().product::<usize>();
    let num_groups = range.num_groups();
    let total_groups = num_groups.iter().product::<usize>();
    let (table, _locals) = args.for_team()?;
    let barrier = Barrier::new(team);

    std::thread::scope(|scope| {
        for thread in 0..team {
            let (table, barrier) = (&table, &barrier);
            scope.spawn(move || {
                let local_id = unflatten(thread, local);
                let item = Box::new(UnsafeCell::new(WorkItem {
                    global_id: [0; 3],
                    local_id,
                    group_id: [0; 3],
                    global_size: range.global,
                    local_size: local,
                    num_groups,
                    work_dim: range.dims as u32,
                    sync: team_barrier,
                    sync_ctx: barrier as *const Barrier as *mut c_void,
                }));
                // SAFETY: the descriptor outlives every call made from this thread.
                unsafe { bind(item.get().cast_const().cast()) };

                for group in 0..total_groups {
                    let group_id = unflatten(group, num_groups);
                    // SAFETY: the kernel only reads the descriptor while `entry` runs, and no
                    // call is in flight here.
                    unsafe {
                        let item = &mut *item.get();
                        item.group_id = group_id;
                        item.global_id = std::array::from_fn(|d| group_id[d] * local[d] + local_id[d]);
                        entry(table.0.as_ptr());
                    }
                    // The next group reuses this team's local memory.
                    barrier.wait();
                }
            });
        }
    });
    Ok(())
}

fn launch_items(entry: EntryFn, bind: BindFn, args: &LaunchArgs, range: &NdRange) -> Result<()> {
    let total = range.global.iter().product::<usize>();
    let workers = std::thread::available_parallelism().map_or(1, NonZeroUsize::get).min(total).max(1);
    let teams = (0..workers).map(|_| args.for_team()).collect::<Result<Vec<_>>>()?;

    std::thread::scope(|scope| {
        for (worker, (table, _locals)) in teams.iter().enumerate() {
            scope.spawn(move || {
                let item = Box::new(UnsafeCell::new(WorkItem {
                    global_id: [0; 3],
                    local_id: [0; 3],
                    group_id: [0; 3],
                    global_size: range.global,
                    local_size: [1; 3],
                    num_groups: range.global,
                    work_dim: range.dims as u32,
                    sync: no_barrier,
                    sync_ctx: std::ptr::null_mut(),
                }));
                // SAFETY: as in `launch_groups`.
                unsafe { bind(item.get().cast_const().cast()) };

                for index in (worker..total).step_by(workers) {
                    let id = unflatten(index, range.global);
                    // SAFETY: as in `launch_groups`.
                    unsafe {
                        let item = &mut *item.get();
                        item.global_id = id;
                        item.group_id = id;
                        entry(table.0.as_ptr());
                    }
                }
            });
        }
    });
    Ok(())
}

/// Capabilities reported by the host device.
pub fn host_info(config: &RuntimeConfig) -> DeviceInfo {
    DeviceInfo {
        name: "kiln host".into(),
        vendor: "kiln".into(),
        platform: "host".into(),
        driver_version: env!("CARGO_PKG_VERSION").into(),
        kind: DeviceKind::Cpu,
        max_work_group_size: config.host_max_work_group,
        compute_units: std::thread::available_parallelism().map_or(1, NonZeroUsize::get),
        local_mem_size: config.host_local_mem,
        subgroup_size: None,
        subgroup_shuffle: false,
        supports_fp64: true,
    }
}

/// Create the host device described by `config`.
pub fn create_host_device(config: &RuntimeConfig) -> Result<Device> {
    let info = host_info(config);
    let compiler = HostCompiler::detect(config);
    tracing::info!(device = %info.name, cc = compiler.cc(), threads = info.compute_units, "host device ready");

    let runtime: RuntimeFactory = Arc::new(load_host_program);
    let local_mem = info.local_mem_size;
    let queue_factory: QueueFactory =
        Arc::new(move |_device: &Arc<Device>| Ok(Arc::new(HostQueue::new(local_mem)?) as Arc<_>));

    Ok(Device::new(
        DeviceSpec::Host,
        info,
        Dialect::HostC,
        Arc::new(LruAllocator::new(Box::new(HostAllocator))),
        Arc::new(compiler),
        runtime,
        queue_factory,
    ))
}
