//! Single-use kernel drafts with bound arguments.
//!
//! A [`MetaKernel`] is a [`KernelSource`] plus the value bound to each parameter. Algorithms
//! declare parameters as they need them (buffers, scalars, local scratch), emit the body, and
//! finally [`compile`](MetaKernel::compile) or [`exec`](MetaKernel::exec) the draft, which
//! consumes it.
//!
//! ```ignore
//! let mut k = MetaKernel::new("scale", queue.device().dialect);
//! let data = k.buffer_identifier(&buffer, &DType::Float32, AddressSpace::Global);
//! let factor = k.add_set_arg("factor", Value::Float32(2.0));
//! k.emit_raw(format!("{data}[get_global_id(0)] *= {factor};"));
//! k.exec(&rt, &queue, &NdRange::new_1d(n, None), &WaitList::new())?.wait()?;
//! ```

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};

use kiln_codegen::{AddressSpace, KernelSource, Param};
use kiln_device::{Buffer, Device, Dialect, Event, Kernel, KernelArg, NdRange, Queue, WaitList};
use kiln_dtype::{DType, Value};
use xxhash_rust::xxh3::xxh3_64;

use crate::error::{Result, UnboundArgumentSnafu};
use crate::runtime::ComputeRuntime;

#[derive(Debug)]
pub struct MetaKernel {
    source: KernelSource,
    args: Vec<Option<KernelArg>>,
    buffers: HashMap<(usize, DType, AddressSpace), String>,
    options: String,
}

impl Deref for MetaKernel {
    type Target = KernelSource;

    fn deref(&self) -> &KernelSource {
        &self.source
    }
}

impl DerefMut for MetaKernel {
    fn deref_mut(&mut self) -> &mut KernelSource {
        &mut self.source
    }
}

impl MetaKernel {
    pub fn new(name: impl Into<String>, dialect: Dialect) -> Self {
        Self { source: KernelSource::new(name, dialect), args: Vec::new(), buffers: HashMap::new(), options: String::new() }
    }

    /// A draft in the dialect `device` compiles.
    pub fn for_device(name: impl Into<String>, device: &Device) -> Self {
        Self::new(name, device.dialect)
    }

    /// Build options passed to the device compiler.
    pub fn set_options(&mut self, options: impl Into<String>) -> &mut Self {
        self.options = options.into();
        self
    }

    pub fn options(&self) -> &str {
        &self.options
    }

    /// Declare a parameter left unbound until [`MetaKernel::bind`].
    pub fn add_arg(&mut self, param: Param) -> usize {
        let index = self.source.declare_argument(param);
        self.args.push(None);
        index
    }

    pub fn bind(&mut self, index: usize, arg: KernelArg) -> &mut Self {
        if let Some(slot) = self.args.get_mut(index) {
            *slot = Some(arg);
        }
        self
    }

    fn add_bound(&mut self, param: Param, arg: KernelArg) -> String {
        let name = param.name.clone();
        let index = self.add_arg(param);
        self.bind(index, arg);
        name
    }

    /// Declare a by-value parameter bound to `value`, returning its identifier.
    pub fn add_set_arg(&mut self, name: impl Into<String>, value: Value) -> String {
        let param = Param::value(name, value.dtype());
        self.add_bound(param, KernelArg::Scalar(value))
    }

    /// Identifier of `buffer` viewed as `dtype*` in `space`.
    ///
    /// Asking twice for the same memory, element type and address space yields the same
    /// parameter; another element type gets its own parameter over the same memory.
    pub fn buffer_identifier(&mut self, buffer: &Buffer, dtype: &DType, space: AddressSpace) -> String {
        let key = (buffer.id(), dtype.clone(), space);
        if let Some(name) = self.buffers.get(&key) {
            return name.clone();
        }
        let name = format!("_buf{}", self.buffers.len());
        let mut param = Param::pointer(&name, dtype.clone(), space);
        if space == AddressSpace::Constant {
            param = param.read_only();
        }
        self.add_bound(param, KernelArg::Buffer(buffer.clone()));
        self.buffers.insert(key, name.clone());
        name
    }

    /// `__local dtype* name` with room for `count` elements.
    pub fn add_local(&mut self, name: impl Into<String>, dtype: &DType, count: usize) -> String {
        let bytes = dtype.bytes() * count;
        self.add_bound(Param::local(name, dtype.clone()), KernelArg::Local(bytes))
    }

    /// `__constant dtype* name` holding host `bytes`.
    pub fn add_host_constant(&mut self, name: impl Into<String>, dtype: &DType, bytes: Vec<u8>) -> String {
        self.add_bound(Param::constant(name, dtype.clone()), KernelArg::HostConstant(bytes.into()))
    }

    /// Cache key of the draft's current source and options.
    pub fn cache_key(&self) -> String {
        let source = self.source.serialize();
        let hash = xxh3_64(format!("{source}\0{}", self.options).as_bytes());
        format!("meta:{}:{hash:016x}", self.source.name())
    }

    /// Compile (or fetch) the program and bind every argument.
    pub fn compile(self, rt: &ComputeRuntime, device: &Device) -> Result<Kernel> {
        if let Some(index) = self.args.iter().position(Option::is_none) {
            return UnboundArgumentSnafu { name: &self.source.params()[index].name }.fail();
        }

        let key = self.cache_key();
        let source = self.source.serialize();
        let program = rt.program(device, &key, &self.options, || Ok(source))?;
        let mut kernel = Kernel::new(program, self.source.name())?;
        kernel.set_args(self.args.into_iter().flatten())?;
        Ok(kernel)
    }

    pub fn exec(self, rt: &ComputeRuntime, queue: &Queue, range: &NdRange, wait: &WaitList) -> Result<Event> {
        let kernel = self.compile(rt, queue.device())?;
        Ok(queue.enqueue_kernel(&kernel, range, wait)?)
    }
}
