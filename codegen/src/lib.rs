//! Kernel source generation for kiln.
//!
//! Kernels are written as OpenCL C text. The same text serves two dialects: OpenCL devices
//! compile it natively, and the host backend compiles it with the system C compiler after a
//! prelude that maps the work-item builtins onto host threads.
//!
//! - [`KernelSource`]: one entry point plus the declarations it depends on
//! - [`ProgramSource`]: several entry points as one compilation unit
//! - [`types`]: exact literal and type spelling per [`Dialect`](kiln_device::Dialect)

pub mod error;
pub mod function;
pub mod prelude;
pub mod source;
pub mod types;


pub use error::{Error, Result};
pub use function::FunctionDef;
pub use source::{AddressSpace, KernelSource, Param, ProgramSource, Var};
pub use types::{render_literal, type_name};
