//! Compiled programs and bound kernels.
//!
//! A device turns kernel source into a binary with its [`Compiler`], and a binary into a loaded
//! [`Program`] with its [`RuntimeFactory`]. Keeping the two steps apart lets the runtime persist
//! binaries and reload them without recompiling.

use std::any::Any;
use std::sync::Arc;

use kiln_dtype::Value;

use crate::buffer::Buffer;
use crate::error::{ArgumentMismatchSnafu, MissingArgumentSnafu, Result};

/// A compiled, loaded program holding one or more kernel entry points.
pub trait Program: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    /// Argument slots of `entry`, used to validate bindings before a launch.
    fn signature(&self, entry: &str) -> Result<Vec<ArgSlot>>;

    /// Backend queues downcast to their own program type.
    fn as_any(&self) -> &dyn Any;
}

/// Transforms kernel source into device-native binary bytes.
pub trait Compiler: Send + Sync {
    /// Fails with [`Error::Build`](crate::Error::Build) carrying the compiler log.
    fn compile(&self, src: &str, options: &str) -> Result<Vec<u8>>;

    /// Distinguishes compilers whose output differs for the same device (flags, toolchain).
    fn cache_key(&self) -> Option<&str> {
        None
    }
}

/// Loads a binary produced by the device's compiler: `(program name, bytes)`.
pub type RuntimeFactory = Arc<dyn Fn(&str, &[u8]) -> Result<Arc<dyn Program>> + Send + Sync>;

/// What a kernel parameter accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgSlot {
    /// Global, local or constant memory.
    Pointer,
    /// Pass-by-value parameter of the given size.
    Value { bytes: usize },
    /// The backend validates this slot itself at launch.
    Opaque,
}

/// A value bound to a kernel parameter.
#[derive(Debug, Clone)]
pub enum KernelArg {
    Buffer(Buffer),
    Scalar(Value),
    /// Host bytes exposed to the kernel as a read-only constant array.
    HostConstant(Arc<[u8]>),
    /// Local scratch of the given byte size, one allocation per work-group.
    Local(usize),
}

impl KernelArg {
    fn describe(&self) -> String {
        match self {
            Self::Buffer(_) => "buffer".into(),
            Self::Scalar(value) => format!("{} value", value.dtype()),
            Self::HostConstant(_) => "host constant".into(),
            Self::Local(bytes) => format!("{bytes} bytes of local memory"),
        }
    }

    fn fits(&self, slot: ArgSlot) -> bool {
        match (self, slot) {
            (_, ArgSlot::Opaque) => true,
            (Self::Buffer(_) | Self::HostConstant(_) | Self::Local(_), ArgSlot::Pointer) => true,
            (Self::Scalar(value), ArgSlot::Value { bytes }) => value.dtype().bytes() == bytes,
            _ => false,
        }
    }
}

/// A named entry point of a program plus its positional argument table.
#[derive(Debug, Clone)]
pub struct Kernel {
    program: Arc<dyn Program>,
    entry: String,
    slots: Vec<ArgSlot>,
    args: Vec<Option<KernelArg>>,
}

impl Kernel {
    pub fn new(program: Arc<dyn Program>, entry: impl Into<String>) -> Result<Self> {
        let entry = entry.into();
        let slots = program.signature(&entry)?;
        let args = vec![None; slots.len()];
        Ok(Self { program, entry, slots, args })
    }

    pub fn program(&self) -> &Arc<dyn Program> {
        &self.program
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn arity(&self) -> usize {
        self.slots.len()
    }

    pub fn set_arg(&mut self, index: usize, arg: KernelArg) -> Result<&mut Self> {
        let Some(slot) = self.slots.get(index).copied() else {
            return ArgumentMismatchSnafu {
                kernel: &self.entry,
                index,
                reason: format!("kernel takes {} arguments", self.slots.len()),
            }
            .fail();
        };
        snafu::ensure!(
            arg.fits(slot),
            ArgumentMismatchSnafu { kernel: &self.entry, index, reason: format!("{} does not fit {slot:?}", arg.describe()) }
        );
        self.args[index] = Some(arg);
        Ok(self)
    }

    /// Bind arguments `0..args.len()` in order.
    pub fn set_args(&mut self, args: impl IntoIterator<Item = KernelArg>) -> Result<&mut Self> {
        for (index, arg) in args.into_iter().enumerate() {
            self.set_arg(index, arg)?;
        }
        Ok(self)
    }

    /// Every argument, failing on the first unbound slot.
    pub fn bound_args(&self) -> Result<Vec<KernelArg>> {
        self.args
            .iter()
            .enumerate()
            .map(|(index, arg)| arg.clone().ok_or_else(|| MissingArgumentSnafu { kernel: &self.entry, index }.build()))
            .collect()
    }
}
