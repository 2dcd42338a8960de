//! In-order command queue executing on a dedicated host thread.
//!
//! Operations are numbered at submission and sent to the worker over a channel; the worker
//! publishes progress on a [`CpuTimelineSignal`], which is what the returned events wait on.
//! A failed operation poisons its own number and every later wait on the queue.

use std::fmt;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;

use kiln_device::error::{BackendSnafu, ForeignProgramSnafu, InvalidWorkSizeSnafu, Result};
use kiln_device::{
    Buffer, CommandQueue, CpuTimelineSignal, Event, Kernel, KernelArg, NdRange, PendingRead, Program, TimelineSignal,
    WaitList,
};
use parking_lot::Mutex;

use crate::clang::{BindFn, EntryFn, HostProgram};
use crate::devices::host::{host_memory, launch};

enum Op {
    Write {
        buffer: Buffer,
        offset: usize,
        data: Vec<u8>,
    },
    Read {
        buffer: Buffer,
        offset: usize,
        out: Arc<Mutex<Vec<u8>>>,
    },
    Copy {
        src: Buffer,
        src_offset: usize,
        dst: Buffer,
        dst_offset: usize,
        len: usize,
    },
    Kernel {
        /// Keeps the library mapped while `entry` may run.
        _program: Arc<dyn Program>,
        entry: EntryFn,
        bind: BindFn,
        args: Vec<KernelArg>,
        range: NdRange,
    },
}

impl Op {
    fn execute(self) -> Result<()> {
        match self {
            Op::Write { buffer, offset, data } => {
                // SAFETY: bounds were checked at submission; the queue runs one op at a time.
                unsafe { host_memory(buffer.raw())?.write(offset, &data) };
            }
            Op::Read { buffer, offset, out } => {
                let mut out = out.lock();
                // SAFETY: as above.
                unsafe { host_memory(buffer.raw())?.read(offset, &mut out) };
            }
            Op::Copy { src, src_offset, dst, dst_offset, len } => {
                let dst = host_memory(dst.raw())?;
                // SAFETY: as above.
                unsafe { host_memory(src.raw())?.copy_to(src_offset, dst, dst_offset, len) };
            }
            Op::Kernel { entry, bind, args, range, .. } => launch(entry, bind, &args, &range)?,
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        match self {
            Op::Write { .. } => "write",
            Op::Read { .. } => "read",
            Op::Copy { .. } => "copy",
            Op::Kernel { .. } => "kernel",
        }
    }
}

struct Submission {
    value: u64,
    wait: WaitList,
    op: Op,
}

struct QueueState {
    last: u64,
    sender: Option<Sender<Submission>>,
}

pub struct HostQueue {
    signal: Arc<CpuTimelineSignal>,
    state: Mutex<QueueState>,
    worker: Mutex<Option<JoinHandle<()>>>,
    local_mem_size: usize,
}

impl fmt::Debug for HostQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostQueue")
            .field("completed", &self.signal.value())
            .field("submitted", &self.state.lock().last)
            .finish()
    }
}

impl HostQueue {
    pub fn new(local_mem_size: usize) -> Result<Self> {
        let signal = Arc::new(CpuTimelineSignal::new());
        let (sender, receiver) = mpsc::channel();
        let worker_signal = Arc::clone(&signal);
        let worker = std::thread::Builder::new()
            .name("kiln-host-queue".into())
            .spawn(move || run(receiver, worker_signal))
            .map_err(|e| BackendSnafu { message: format!("failed to spawn queue worker: {e}") }.build())?;

        Ok(Self {
            signal,
            state: Mutex::new(QueueState { last: 0, sender: Some(sender) }),
            worker: Mutex::new(Some(worker)),
            local_mem_size,
        })
    }

    fn submit(&self, op: Op, wait: &WaitList) -> Result<Event> {
        let mut state = self.state.lock();
        let value = state.last + 1;
        let sender = state.sender.as_ref().ok_or_else(|| BackendSnafu { message: "queue is shut down" }.build())?;
        sender
            .send(Submission { value, wait: wait.clone(), op })
            .map_err(|_| BackendSnafu { message: "queue worker exited" }.build())?;
        state.last = value;
        Ok(Event::Timeline { signal: Arc::clone(&self.signal) as Arc<dyn TimelineSignal>, value })
    }
}

fn run(receiver: Receiver<Submission>, signal: Arc<CpuTimelineSignal>) {
    for Submission { value, wait, op } in receiver {
        let name = op.name();
        if let Err(e) = wait.wait_all().and_then(|()| op.execute()) {
            tracing::warn!(op = name, op.value = value, error = %e, "queued operation failed");
            signal.fail(value, e.to_string());
        }
        signal.set(value);
    }
}

impl CommandQueue for HostQueue {
    fn enqueue_write(&self, buffer: &Buffer, offset: usize, data: Vec<u8>, wait: &WaitList) -> Result<Event> {
        host_memory(buffer.raw())?;
        self.submit(Op::Write { buffer: buffer.clone(), offset, data }, wait)
    }

    fn enqueue_read(&self, buffer: &Buffer, offset: usize, len: usize, wait: &WaitList) -> Result<PendingRead> {
        host_memory(buffer.raw())?;
        let out = Arc::new(Mutex::new(vec![0; len]));
        let event = self.submit(Op::Read { buffer: buffer.clone(), offset, out: Arc::clone(&out) }, wait)?;
        Ok(PendingRead::new(event, out))
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
        host_memory(src.raw())?;
        host_memory(dst.raw())?;
        self.submit(Op::Copy { src: src.clone(), src_offset, dst: dst.clone(), dst_offset, len }, wait)
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
            .downcast_ref::<HostProgram>()
            .ok_or_else(|| ForeignProgramSnafu { kernel: kernel.entry() }.build())?;
        let entry = program.entry(kernel.entry())?;

        let mut local_bytes = 0usize;
        for arg in &args {
            match arg {
                KernelArg::Buffer(buffer) => {
                    host_memory(buffer.raw())?;
                }
                KernelArg::Local(bytes) => local_bytes = local_bytes.saturating_add(*bytes),
                _ => {}
            }
        }
        snafu::ensure!(
            local_bytes <= self.local_mem_size,
            InvalidWorkSizeSnafu {
                reason: format!("{local_bytes} bytes of local memory exceed the device's {}", self.local_mem_size)
            }
        );

        let op = Op::Kernel {
            _program: Arc::clone(kernel.program()),
            entry,
            bind: program.bind_fn(),
            args,
            range: *range,
        };
        self.submit(op, wait)
    }

    fn finish(&self) -> Result<()> {
        let last = self.state.lock().last;
        self.signal.wait(last, 0)
    }
}

impl Drop for HostQueue {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain what was submitted and exit.
        self.state.lock().sender = None;
        if let Some(worker) = self.worker.lock().take()
            && worker.join().is_err()
        {
            tracing::error!("host queue worker panicked");
        }
    }
}
