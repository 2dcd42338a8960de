//! Host and device ranges the algorithms read from and write to.
//!
//! Device iterators render themselves into a [`MetaKernel`] as an index expression, so one
//! element-wise kernel body serves plain buffers, strided views and computed sequences alike.
//! Host ranges are typed at the call site and erased to bytes plus a [`DType`] once they
//! reach [`Source`] or [`Destination`], where [`IterKind`] is resolved.

use kiln_codegen::{AddressSpace, FunctionDef};
use kiln_device::Buffer;
use kiln_dtype::{DType, Element, Value};
use kiln_runtime::MetaKernel;

use crate::error::{LengthMismatchSnafu, NotWritableSnafu, Result, TypeMismatchSnafu};
use crate::functional::call_user_function;

/// Where a range lives and how it is laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IterKind {
    HostContiguous,
    HostStrided,
    DeviceBuffer,
    /// Strided views and computed sequences; only reachable through a kernel.
    DeviceComputed,
}

impl IterKind {
    pub fn is_host(&self) -> bool {
        matches!(self, Self::HostContiguous | Self::HostStrided)
    }
}

/// A device buffer viewed as elements of `dtype`, starting at element `offset`.
#[derive(Debug, Clone)]
pub struct BufferIter {
    buffer: Buffer,
    offset: usize,
    dtype: DType,
}

impl BufferIter {
    pub fn new(buffer: Buffer, dtype: DType) -> Self {
        Self { buffer, offset: 0, dtype }
    }

    /// The same buffer starting `offset` elements in.
    pub fn at(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn dtype(&self) -> &DType {
        &self.dtype
    }

    pub fn byte_offset(&self) -> usize {
        self.offset * self.dtype.bytes()
    }

    /// Elements between the offset and the end of the buffer.
    pub fn capacity(&self) -> usize {
        (self.buffer.size() / self.dtype.bytes()).saturating_sub(self.offset)
    }

    /// The same memory read as `dtype`. The byte offset must be a multiple of its size.
    pub fn view(&self, dtype: DType) -> Self {
        let offset = self.byte_offset() / dtype.bytes();
        Self { buffer: self.buffer.clone(), offset, dtype }
    }

    fn element(&self, k: &mut MetaKernel, index: &str) -> String {
        let id = k.buffer_identifier(&self.buffer, &self.dtype, AddressSpace::Global);
        if self.offset == 0 {
            format!("{id}[{index}]")
        } else {
            let offset = k.add_set_arg(fresh_name(k), Value::UInt64(self.offset as u64));
            format!("{id}[{offset} + ({index})]")
        }
    }
}

/// A range on the device.
#[derive(Debug, Clone)]
pub enum DeviceIter {
    Buffer(BufferIter),
    /// Every `stride`-th element of `base`.
    Strided {
        base: BufferIter,
        stride: usize,
    },
    /// `start, start + 1, ...` in the type of `start`.
    Counting {
        start: Value,
    },
    Constant(Value),
    /// `func(inner[i])`. `func` takes one argument.
    Transform {
        inner: Box<DeviceIter>,
        func: FunctionDef,
    },
}

impl From<BufferIter> for DeviceIter {
    fn from(iter: BufferIter) -> Self {
        Self::Buffer(iter)
    }
}

impl DeviceIter {
    pub fn counting(start: impl Into<Value>) -> Self {
        Self::Counting { start: start.into() }
    }

    pub fn constant(value: impl Into<Value>) -> Self {
        Self::Constant(value.into())
    }

    pub fn strided(base: BufferIter, stride: usize) -> Self {
        Self::Strided { base, stride: stride.max(1) }
    }

    pub fn transform(self, func: FunctionDef) -> Self {
        Self::Transform { inner: Box::new(self), func }
    }

    pub fn kind(&self) -> IterKind {
        match self {
            Self::Buffer(_) => IterKind::DeviceBuffer,
            _ => IterKind::DeviceComputed,
        }
    }

    /// Element type produced by a read.
    pub fn dtype(&self) -> DType {
        match self {
            Self::Buffer(iter) | Self::Strided { base: iter, .. } => iter.dtype.clone(),
            Self::Counting { start: value } | Self::Constant(value) => value.dtype(),
            Self::Transform { func, .. } => func.returns.clone(),
        }
    }

    pub fn is_writable(&self) -> bool {
        matches!(self, Self::Buffer(_) | Self::Strided { .. })
    }

    pub fn as_buffer(&self) -> Option<&BufferIter> {
        match self {
            Self::Buffer(iter) => Some(iter),
            _ => None,
        }
    }

    /// Whether any read goes through `buffer`'s memory, looking through transforms.
    pub fn aliases(&self, buffer: &Buffer) -> bool {
        match self {
            Self::Buffer(iter) | Self::Strided { base: iter, .. } => iter.buffer().same_memory(buffer),
            Self::Counting { .. } | Self::Constant(_) => false,
            Self::Transform { inner, .. } => inner.aliases(buffer),
        }
    }

    /// Elements addressable from the start; `None` for unbounded sequences.
    pub fn available(&self) -> Option<usize> {
        match self {
            Self::Buffer(iter) => Some(iter.capacity()),
            Self::Strided { base, stride } => Some(base.capacity().div_ceil(*stride)),
            Self::Counting { .. } | Self::Constant(_) => None,
            Self::Transform { inner, .. } => inner.available(),
        }
    }

    pub fn check_len(&self, count: usize) -> Result<()> {
        if let Some(actual) = self.available() {
            snafu::ensure!(actual >= count, LengthMismatchSnafu { expected: count, actual });
        }
        Ok(())
    }

    pub(crate) fn describe(&self) -> &'static str {
        match self {
            Self::Buffer(_) => "buffer",
            Self::Strided { .. } => "strided",
            Self::Counting { .. } => "counting",
            Self::Constant(_) => "constant",
            Self::Transform { .. } => "transform",
        }
    }

    /// Expression reading element `index` (a kernel expression of integer type).
    pub fn read(&self, k: &mut MetaKernel, index: &str) -> String {
        match self {
            Self::Buffer(iter) => iter.element(k, index),
            Self::Strided { base, stride } => {
                let stride = k.add_set_arg(fresh_name(k), Value::UInt64(*stride as u64));
                base.element(k, &format!("({index}) * {stride}"))
            }
            Self::Counting { start } => {
                let ty = k.type_name(&start.dtype());
                let start = k.add_set_arg(fresh_name(k), start.clone());
                format!("({start} + ({ty})({index}))")
            }
            Self::Constant(value) => k.add_set_arg(fresh_name(k), value.clone()),
            Self::Transform { inner, func } => {
                let arg = inner.read(k, index);
                call_user_function(k, func, &arg)
            }
        }
    }

    /// Assignable expression for element `index`.
    pub fn write(&self, k: &mut MetaKernel, index: &str) -> Result<String> {
        match self {
            Self::Buffer(_) | Self::Strided { .. } => Ok(self.read(k, index)),
            _ => NotWritableSnafu { iterator: self.describe() }.fail(),
        }
    }
}

/// A parameter name no earlier parameter of `k` uses.
pub(crate) fn fresh_name(k: &MetaKernel) -> String {
    format!("_arg{}", k.params().len())
}

/// `expr` of type `from` as `to`, converted the way the device compiler converts implicitly.
///
/// Only scalars convert; vectors and structs must already match.
pub(crate) fn convert(k: &mut MetaKernel, expr: String, from: &DType, to: &DType) -> Result<String> {
    if from == to {
        return Ok(expr);
    }
    snafu::ensure!(from.is_scalar() && to.is_scalar(), TypeMismatchSnafu { from: from.name(), to: to.name() });
    Ok(format!("(({}){expr})", k.type_name(to)))
}

/// A contiguous host input.
#[derive(Debug, Clone, Copy)]
pub struct HostSlice<'a, T>(pub &'a [T]);

/// Every `stride`-th element of a host slice.
#[derive(Debug, Clone, Copy)]
pub struct HostStrided<'a, T> {
    pub data: &'a [T],
    pub stride: usize,
}

impl<'a, T> HostStrided<'a, T> {
    pub fn new(data: &'a [T], stride: usize) -> Self {
        Self { data, stride: stride.max(1) }
    }
}

/// A contiguous host output.
#[derive(Debug)]
pub struct HostSliceMut<'a, T>(pub &'a mut [T]);

#[derive(Debug)]
pub struct HostStridedMut<'a, T> {
    pub data: &'a mut [T],
    pub stride: usize,
}

impl<'a, T> HostStridedMut<'a, T> {
    pub fn new(data: &'a mut [T], stride: usize) -> Self {
        Self { data, stride: stride.max(1) }
    }
}

/// Host memory erased to bytes, `stride` elements apart.
#[derive(Debug)]
pub struct HostBytes<B> {
    pub bytes: B,
    pub dtype: DType,
    pub stride: usize,
}

impl<B: AsRef<[u8]>> HostBytes<B> {
    fn kind(&self) -> IterKind {
        if self.stride == 1 { IterKind::HostContiguous } else { IterKind::HostStrided }
    }

    fn available(&self) -> usize {
        (self.bytes.as_ref().len() / self.dtype.bytes()).div_ceil(self.stride)
    }

    /// The first `count` elements, packed.
    pub(crate) fn gather(&self, count: usize) -> Vec<u8> {
        let elem = self.dtype.bytes();
        let bytes = self.bytes.as_ref();
        if self.stride == 1 {
            return bytes[..count * elem].to_vec();
        }
        let mut out = Vec::with_capacity(count * elem);
        for i in 0..count {
            let at = i * self.stride * elem;
            out.extend_from_slice(&bytes[at..at + elem]);
        }
        out
    }
}

impl HostBytes<&mut [u8]> {
    /// Spread packed elements over the range.
    pub(crate) fn scatter(&mut self, packed: &[u8]) {
        let elem = self.dtype.bytes();
        if self.stride == 1 {
            self.bytes[..packed.len()].copy_from_slice(packed);
            return;
        }
        for (i, chunk) in packed.chunks_exact(elem).enumerate() {
            let at = i * self.stride * elem;
            self.bytes[at..at + elem].copy_from_slice(chunk);
        }
    }
}

fn host<T: Element, B>(bytes: B, stride: usize) -> HostBytes<B> {
    HostBytes { bytes, dtype: T::dtype(), stride }
}

/// Input of a copy or a host-side algorithm call.
#[derive(Debug)]
pub enum Source<'a> {
    Host(HostBytes<&'a [u8]>),
    Device(DeviceIter),
}

/// Output of a copy.
#[derive(Debug)]
pub enum Destination<'a> {
    Host(HostBytes<&'a mut [u8]>),
    Device(DeviceIter),
}

impl Source<'_> {
    pub fn kind(&self) -> IterKind {
        match self {
            Self::Host(host) => host.kind(),
            Self::Device(iter) => iter.kind(),
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            Self::Host(host) => host.dtype.clone(),
            Self::Device(iter) => iter.dtype(),
        }
    }

    pub fn check_len(&self, count: usize) -> Result<()> {
        match self {
            Self::Host(host) => check_host(host.available(), count),
            Self::Device(iter) => iter.check_len(count),
        }
    }
}

impl Destination<'_> {
    pub fn kind(&self) -> IterKind {
        match self {
            Self::Host(host) => host.kind(),
            Self::Device(iter) => iter.kind(),
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            Self::Host(host) => host.dtype.clone(),
            Self::Device(iter) => iter.dtype(),
        }
    }

    pub fn check_len(&self, count: usize) -> Result<()> {
        match self {
            Self::Host(host) => check_host(host.available(), count),
            Self::Device(iter) => iter.check_len(count),
        }
    }
}

fn check_host(actual: usize, expected: usize) -> Result<()> {
    snafu::ensure!(actual >= expected, LengthMismatchSnafu { expected, actual });
    Ok(())
}

impl<'a, T: Element> From<&'a [T]> for Source<'a> {
    fn from(data: &'a [T]) -> Self {
        Self::Host(host::<T, _>(bytemuck::cast_slice(data), 1))
    }
}

impl<'a, T: Element> From<&'a Vec<T>> for Source<'a> {
    fn from(data: &'a Vec<T>) -> Self {
        data.as_slice().into()
    }
}

impl<'a, T: Element> From<HostSlice<'a, T>> for Source<'a> {
    fn from(slice: HostSlice<'a, T>) -> Self {
        slice.0.into()
    }
}

impl<'a, T: Element> From<HostStrided<'a, T>> for Source<'a> {
    fn from(strided: HostStrided<'a, T>) -> Self {
        Self::Host(host::<T, _>(bytemuck::cast_slice(strided.data), strided.stride))
    }
}

impl From<DeviceIter> for Source<'_> {
    fn from(iter: DeviceIter) -> Self {
        Self::Device(iter)
    }
}

impl From<BufferIter> for Source<'_> {
    fn from(iter: BufferIter) -> Self {
        Self::Device(iter.into())
    }
}

impl<'a, T: Element> From<&'a mut [T]> for Destination<'a> {
    fn from(data: &'a mut [T]) -> Self {
        Self::Host(host::<T, _>(bytemuck::cast_slice_mut(data), 1))
    }
}

impl<'a, T: Element> From<&'a mut Vec<T>> for Destination<'a> {
    fn from(data: &'a mut Vec<T>) -> Self {
        data.as_mut_slice().into()
    }
}

impl<'a, T: Element> From<HostSliceMut<'a, T>> for Destination<'a> {
    fn from(slice: HostSliceMut<'a, T>) -> Self {
        slice.0.into()
    }
}

impl<'a, T: Element> From<HostStridedMut<'a, T>> for Destination<'a> {
    fn from(strided: HostStridedMut<'a, T>) -> Self {
        Self::Host(host::<T, _>(bytemuck::cast_slice_mut(strided.data), strided.stride))
    }
}

impl From<DeviceIter> for Destination<'_> {
    fn from(iter: DeviceIter) -> Self {
        Self::Device(iter)
    }
}

impl From<BufferIter> for Destination<'_> {
    fn from(iter: BufferIter) -> Self {
        Self::Device(iter.into())
    }
}
