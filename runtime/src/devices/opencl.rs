//! OpenCL device: OpenCL C kernels built by the platform driver.
//!
//! Transfers are blocking and return completed events; kernels and device-side copies are
//! asynchronous and return native OpenCL events. Events from other queues in a wait list are
//! waited on by the host before the enqueue.

use std::ffi::c_void;
use std::fmt;
use std::ptr;
use std::sync::Arc;

use kiln_device::error::{
    BackendSnafu, BuildSnafu, ForeignProgramSnafu, InvalidDeviceSnafu, KernelNotFoundSnafu, QueueFailedSnafu, Result,
};
use kiln_device::opencl::{ClAllocator, ClContext, ClEvent, ClMemory};
use kiln_device::{
    ArgSlot, Buffer, CommandQueue, Compiler, Device, DeviceInfo, DeviceKind, DeviceSpec, Dialect, Event, Kernel,
    KernelArg, LruAllocator, NdRange, PendingRead, Program, QueueFactory, RawBuffer, RuntimeFactory, WaitList,
};
use opencl3::command_queue::CommandQueue as RawQueue;
use opencl3::device::{CL_DEVICE_TYPE_ACCELERATOR, CL_DEVICE_TYPE_ALL, CL_DEVICE_TYPE_GPU, Device as RawDevice};
use opencl3::kernel::Kernel as RawKernel;
use opencl3::memory::{Buffer as RawBuffer_, CL_MEM_COPY_HOST_PTR, CL_MEM_READ_ONLY};
use opencl3::platform::get_platforms;
use opencl3::program::Program as RawProgram;
use opencl3::types::{CL_BLOCKING, cl_event};
use parking_lot::Mutex;

use crate::config::RuntimeConfig;

fn cl_error(what: &str, e: impl fmt::Debug) -> kiln_device::Error {
    BackendSnafu { message: format!("{what}: {e:?}") }.build()
}

struct Shared {
    context: Arc<ClContext>,
}

/// Builds OpenCL C and returns the driver's program binary.
pub struct ClCompiler {
    shared: Arc<Shared>,
    cache_key: String,
}

impl Compiler for ClCompiler {
    fn compile(&self, src: &str, options: &str) -> Result<Vec<u8>> {
        let program = RawProgram::create_and_build_from_source(&self.shared.context.0, src, options)
            .map_err(|log| BuildSnafu { log, code: src }.build())?;
        let binaries = program.get_binaries().map_err(|e| cl_error("failed to read program binary", e))?;
        binaries.into_iter().next().ok_or_else(|| BackendSnafu { message: "driver returned no binary" }.build())
    }

    fn cache_key(&self) -> Option<&str> {
        Some(&self.cache_key)
    }
}

pub struct ClProgram {
    name: String,
    program: RawProgram,
}

// SAFETY: OpenCL program objects may be used from any host thread.
unsafe impl Send for ClProgram {}
unsafe impl Sync for ClProgram {}

impl fmt::Debug for ClProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClProgram").field("name", &self.name).finish()
    }
}

impl ClProgram {
    fn kernel(&self, entry: &str) -> Result<RawKernel> {
        RawKernel::create(&self.program, entry).map_err(|_| KernelNotFoundSnafu { name: entry }.build())
    }
}

impl Program for ClProgram {
    fn name(&self) -> &str {
        &self.name
    }

    /// The driver validates argument kinds itself at launch.
    fn signature(&self, entry: &str) -> Result<Vec<ArgSlot>> {
        let kernel = self.kernel(entry)?;
        let arity = kernel.num_args().map_err(|e| cl_error("failed to query kernel arguments", e))?;
        Ok(vec![ArgSlot::Opaque; arity as usize])
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

pub struct ClQueue {
    queue: RawQueue,
    context: Arc<ClContext>,
    last: Mutex<Option<Arc<ClEvent>>>,
}

// SAFETY: OpenCL command queues are thread-safe API objects.
unsafe impl Send for ClQueue {}
unsafe impl Sync for ClQueue {}

impl fmt::Debug for ClQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ClQueue")
    }
}

fn cl_memory(raw: &RawBuffer) -> Result<&ClMemory> {
    #[allow(unreachable_patterns)]
    match raw {
        RawBuffer::OpenCl { buffer, .. } => Ok(buffer),
        _ => BackendSnafu { message: "buffer was not allocated by an OpenCL device" }.fail(),
    }
}

impl ClQueue {
    /// Native events of `wait`; host-timeline events are waited on here.
    fn native_wait_list(wait: &WaitList) -> Result<Vec<cl_event>> {
        let mut native = Vec::with_capacity(wait.len());
        for event in wait.iter() {
            match event {
                Event::OpenCl(event) => native.push(event.0.get()),
                other => other.wait()?,
            }
        }
        Ok(native)
    }

    fn track(&self, event: opencl3::event::Event) -> Event {
        let event = Arc::new(ClEvent(event));
        *self.last.lock() = Some(Arc::clone(&event));
        Event::OpenCl(event)
    }

    fn set_arg(&self, kernel: &RawKernel, index: u32, arg: &KernelArg, keep: &mut Vec<RawBuffer_<u8>>) -> Result<()> {
        let failed = |e| QueueFailedSnafu { message: format!("argument {index}: {e:?}") }.build();
        // SAFETY: argument sizes and pointers describe live host values or memory objects.
        unsafe {
            match arg {
                KernelArg::Buffer(buffer) => {
                    let memory = cl_memory(buffer.raw())?.0.lock().get();
                    kernel.set_arg(index, &memory).map_err(failed)?;
                }
                KernelArg::Scalar(value) => {
                    let bytes = value.to_bytes();
                    kernel.set_arg_raw(index, bytes.len(), bytes.as_ptr().cast::<c_void>()).map_err(failed)?;
                }
                KernelArg::HostConstant(bytes) => {
                    let constant = RawBuffer_::<u8>::create(
                        &self.context.0,
                        CL_MEM_READ_ONLY | CL_MEM_COPY_HOST_PTR,
                        bytes.len().max(1),
                        bytes.as_ptr() as *mut c_void,
                    )
                    .map_err(|e| cl_error("failed to upload constant", e))?;
                    kernel.set_arg(index, &constant.get()).map_err(failed)?;
                    keep.push(constant);
                }
                KernelArg::Local(bytes) => {
                    kernel.set_arg_local_buffer(index, *bytes).map_err(failed)?;
                }
            }
        }
        Ok(())
    }
}

impl CommandQueue for ClQueue {
    fn enqueue_write(&self, buffer: &Buffer, offset: usize, data: Vec<u8>, wait: &WaitList) -> Result<Event> {
        let native = Self::native_wait_list(wait)?;
        let mut memory = cl_memory(buffer.raw())?.0.lock();
        // SAFETY: blocking write from a live slice.
        let event = unsafe { self.queue.enqueue_write_buffer(&mut memory, CL_BLOCKING, offset, &data, &native) }
            .map_err(|e| cl_error("write failed", e))?;
        ClEvent(event).wait()?;
        Ok(Event::Complete)
    }

    fn enqueue_read(&self, buffer: &Buffer, offset: usize, len: usize, wait: &WaitList) -> Result<PendingRead> {
        let native = Self::native_wait_list(wait)?;
        let mut data = vec![0u8; len];
        let memory = cl_memory(buffer.raw())?.0.lock();
        // SAFETY: blocking read into a live slice.
        let event = unsafe { self.queue.enqueue_read_buffer(&memory, CL_BLOCKING, offset, &mut data, &native) }
            .map_err(|e| cl_error("read failed", e))?;
        ClEvent(event).wait()?;
        Ok(PendingRead::new(Event::Complete, Arc::new(Mutex::new(data))))
    }

    fn enqueue_copy(
        &self,
        src: &Buffer,
        src_offset: usize,
        dst: &Buffer,
        dst_offset: usize,
        len: usize,
        wait: &WaitList,
    ) -> Result<Event> {
        if src.same_memory(dst) {
            // One lock cannot hand out both sides; stage through the host.
            let bytes = self.enqueue_read(src, src_offset, len, wait)?.wait()?;
            return self.enqueue_write(dst, dst_offset, bytes, &WaitList::new());
        }
        let native = Self::native_wait_list(wait)?;
        let src_memory = cl_memory(src.raw())?.0.lock();
        let mut dst_memory = cl_memory(dst.raw())?.0.lock();
        // SAFETY: ranges were bounds-checked by `Queue`.
        let event = unsafe {
            self.queue.enqueue_copy_buffer(&src_memory, &mut dst_memory, src_offset, dst_offset, len, &native)
        }
        .map_err(|e| cl_error("copy failed", e))?;
        Ok(self.track(event))
    }

    fn enqueue_kernel(
        &self,
        kernel: &Kernel,
        args: Vec<KernelArg>,
        range: &NdRange,
        wait: &WaitList,
    ) -> Result<Event> {
        let program = kernel
            .program()
            .as_any()
            .downcast_ref::<ClProgram>()
            .ok_or_else(|| ForeignProgramSnafu { kernel: kernel.entry() }.build())?;
        let raw = program.kernel(kernel.entry())?;
        let mut constants = Vec::new();
        for (index, arg) in args.iter().enumerate() {
            self.set_arg(&raw, index as u32, arg, &mut constants)?;
        }

        let native = Self::native_wait_list(wait)?;
        let local = range.local;
        // SAFETY: every argument is set and the size arrays outlive the call.
        let event = unsafe {
            self.queue.enqueue_nd_range_kernel(
                raw.get(),
                range.dims as u32,
                ptr::null(),
                range.global.as_ptr(),
                local.as_ref().map_or(ptr::null(), |l| l.as_ptr()),
                &native,
            )
        }
        .map_err(|e| QueueFailedSnafu { message: format!("launch of {} failed: {e:?}", kernel.entry()) }.build())?;
        // Constants are released once the launch holds its own reference.
        drop(constants);
        Ok(self.track(event))
    }

    fn finish(&self) -> Result<()> {
        self.queue.finish().map_err(|e| QueueFailedSnafu { message: format!("{e:?}") }.build())?;
        if let Some(last) = self.last.lock().take() {
            last.wait()?;
        }
        Ok(())
    }
}

const SUBGROUP_EXTENSIONS: [&str; 1] = ["cl_khr_subgroups"];
// Reductions emit `sub_group_shuffle_xor`, which only this extension names.
const SHUFFLE_EXTENSIONS: [&str; 1] = ["cl_khr_subgroup_shuffle"];

fn device_info(device: &RawDevice, platform: &str, config: &RuntimeConfig) -> DeviceInfo {
    let extensions = device.extensions().unwrap_or_default();
    let has = |names: &[&str]| names.iter().any(|name| extensions.split_whitespace().any(|ext| ext == *name));
    let dev_type = device.dev_type().unwrap_or(0);
    let kind = if dev_type & CL_DEVICE_TYPE_GPU != 0 {
        DeviceKind::Gpu
    } else if dev_type & CL_DEVICE_TYPE_ACCELERATOR != 0 {
        DeviceKind::Accelerator
    } else {
        DeviceKind::Cpu
    };
    // The width is declared by configuration; drivers do not report it without a kernel.
    let subgroup_size = if has(&SUBGROUP_EXTENSIONS) { config.subgroup_size } else { None };

    DeviceInfo {
        name: device.name().unwrap_or_default().trim().to_string(),
        vendor: device.vendor().unwrap_or_default().trim().to_string(),
        platform: platform.trim().to_string(),
        driver_version: device.driver_version().unwrap_or_default().trim().to_string(),
        kind,
        max_work_group_size: device.max_work_group_size().unwrap_or(1).max(1),
        compute_units: device.max_compute_units().unwrap_or(1).max(1) as usize,
        local_mem_size: device.local_mem_size().unwrap_or(0) as usize,
        subgroup_size,
        subgroup_shuffle: subgroup_size.is_some() && has(&SHUFFLE_EXTENSIONS),
        supports_fp64: has(&["cl_khr_fp64"]),
    }
}

/// Open device `device` of platform `platform`.
pub fn create_opencl_device(spec: &DeviceSpec, config: &RuntimeConfig) -> Result<Device> {
    let DeviceSpec::OpenCl { platform: platform_index, device: device_index } = *spec else {
        return InvalidDeviceSnafu { device: spec.to_string() }.fail();
    };
    let invalid = || InvalidDeviceSnafu { device: spec.to_string() }.build();

    let platforms = get_platforms().map_err(|e| cl_error("no OpenCL platforms", e))?;
    let platform = platforms.get(platform_index).ok_or_else(invalid)?;
    let ids = platform.get_devices(CL_DEVICE_TYPE_ALL).map_err(|e| cl_error("failed to list devices", e))?;
    let id = *ids.get(device_index).ok_or_else(invalid)?;
    let device = RawDevice::new(id);

    let info = device_info(&device, &platform.name().unwrap_or_default(), config);
    let context = opencl3::context::Context::from_device(&device).map_err(|e| cl_error("failed to create context", e))?;
    let shared = Arc::new(Shared { context: Arc::new(ClContext(context)) });
    tracing::info!(device = %info.name, platform = %info.platform, subgroup = ?info.subgroup_size, "OpenCL device ready");

    let compiler = ClCompiler { shared: Arc::clone(&shared), cache_key: info.identity() };
    let runtime_shared = Arc::clone(&shared);
    let runtime: RuntimeFactory = Arc::new(move |name: &str, binary: &[u8]| {
        let program =
            RawProgram::create_and_build_from_binary(&runtime_shared.context.0, &[binary], "").map_err(|e| {
                BackendSnafu { message: format!("failed to load program binary {name}: {e:?}") }.build()
            })?;
        Ok(Arc::new(ClProgram { name: name.to_string(), program }) as Arc<dyn Program>)
    });
    let queue_shared = Arc::clone(&shared);
    let queue_factory: QueueFactory = Arc::new(move |_device: &Arc<Device>| {
        #[allow(deprecated)]
        let queue = RawQueue::create_default(&queue_shared.context.0, 0)
            .map_err(|e| cl_error("failed to create command queue", e))?;
        Ok(Arc::new(ClQueue { queue, context: Arc::clone(&queue_shared.context), last: Mutex::new(None) })
            as Arc<dyn CommandQueue>)
    });

    Ok(Device::new(
        spec.clone(),
        info,
        Dialect::OpenCl,
        Arc::new(LruAllocator::new(Box::new(ClAllocator::new(Arc::clone(&shared.context))))),
        Arc::new(compiler),
        runtime,
        queue_factory,
    ))
}
