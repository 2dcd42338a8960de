//! Kernel source text model.
//!
//! A [`KernelSource`] accumulates one entry point: its parameter list, its body, and the
//! declarations the body depends on (extension pragmas, type declarations, helper functions).
//! A [`ProgramSource`] merges several kernels into one compilation unit, de-duplicating shared
//! declarations by name.
//!
//! ```ignore
//! let mut k = KernelSource::new("fill", Dialect::OpenCl);
//! let out = k.declare_argument(Param::global("out", DType::Float32));
//! k.emit_raw("out[get_global_id(0)] = ").emit_literal(&Value::from(1.5f32)).emit_raw(";\n");
//! let text = k.serialize();
//! ```

use std::fmt::Write;

use kiln_device::Dialect;
use kiln_dtype::{DType, Value};

use crate::error::{DialectMismatchSnafu, DuplicateEntrySnafu, Result};
use crate::function::FunctionDef;
use crate::prelude::{host_entry_exports, host_prelude};
use crate::types::{host_vector_typedef, render_literal, type_name};

const FP64_PRAGMA: &str = "cl_khr_fp64";

/// Address space of a pointer parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressSpace {
    Global,
    Local,
    Constant,
}

impl AddressSpace {
    pub fn qualifier(&self) -> &'static str {
        match self {
            Self::Global => "__global",
            Self::Local => "__local",
            Self::Constant => "__constant",
        }
    }
}

/// A kernel parameter. With an address space it is a pointer to `dtype`, otherwise a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub dtype: DType,
    pub space: Option<AddressSpace>,
    pub is_const: bool,
}

impl Param {
    pub fn value(name: impl Into<String>, dtype: DType) -> Self {
        Self { name: name.into(), dtype, space: None, is_const: false }
    }

    pub fn global(name: impl Into<String>, dtype: DType) -> Self {
        Self::pointer(name, dtype, AddressSpace::Global)
    }

    pub fn local(name: impl Into<String>, dtype: DType) -> Self {
        Self::pointer(name, dtype, AddressSpace::Local)
    }

    pub fn constant(name: impl Into<String>, dtype: DType) -> Self {
        Self::pointer(name, dtype, AddressSpace::Constant).read_only()
    }

    pub fn pointer(name: impl Into<String>, dtype: DType, space: AddressSpace) -> Self {
        Self { name: name.into(), dtype, space: Some(space), is_const: false }
    }

    pub fn read_only(mut self) -> Self {
        self.is_const = true;
        self
    }

    pub fn is_pointer(&self) -> bool {
        self.space.is_some()
    }

    pub fn render(&self, dialect: Dialect) -> String {
        let ty = type_name(&self.dtype, dialect);
        let constness = if self.is_const { "const " } else { "" };
        match self.space {
            Some(space) => format!("{} {constness}{ty}* {}", space.qualifier(), self.name),
            None => format!("{constness}{ty} {}", self.name),
        }
    }
}

/// A typed name usable in a kernel body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Var {
    pub name: String,
    pub dtype: DType,
}

impl Var {
    pub fn new(name: impl Into<String>, dtype: DType) -> Self {
        Self { name: name.into(), dtype }
    }
}

/// Named declaration blocks shared by every kernel of a program.
#[derive(Debug, Clone, Default)]
struct Declarations {
    pragmas: Vec<String>,
    types: Vec<(String, String)>,
    functions: Vec<(String, String)>,
}

impl Declarations {
    fn add_pragma(&mut self, extension: &str) {
        if !self.pragmas.iter().any(|p| p == extension) {
            self.pragmas.push(extension.to_string());
        }
    }

    fn has_type(&self, name: &str) -> bool {
        self.types.iter().any(|(n, _)| n == name)
    }

    fn has_function(&self, name: &str) -> bool {
        self.functions.iter().any(|(n, _)| n == name)
    }

    fn merge(&mut self, other: &Declarations) {
        for pragma in &other.pragmas {
            self.add_pragma(pragma);
        }
        for (name, text) in &other.types {
            if !self.has_type(name) {
                self.types.push((name.clone(), text.clone()));
            }
        }
        for (name, text) in &other.functions {
            if !self.has_function(name) {
                self.functions.push((name.clone(), text.clone()));
            }
        }
    }

    fn write(&self, dialect: Dialect, out: &mut String) {
        if dialect == Dialect::OpenCl && !self.pragmas.is_empty() {
            for pragma in &self.pragmas {
                let _ = writeln!(out, "#pragma OPENCL EXTENSION {pragma} : enable");
            }
            out.push('\n');
        }
        for (_, text) in &self.types {
            let _ = writeln!(out, "{text}");
        }
        if !self.types.is_empty() {
            out.push('\n');
        }
        for (_, text) in &self.functions {
            let _ = writeln!(out, "{text}\n");
        }
    }
}

/// One entry point under construction.
#[derive(Debug, Clone)]
pub struct KernelSource {
    name: String,
    dialect: Dialect,
    params: Vec<Param>,
    body: String,
    decls: Declarations,
}

impl KernelSource {
    pub fn new(name: impl Into<String>, dialect: Dialect) -> Self {
        Self { name: name.into(), dialect, params: Vec::new(), body: String::new(), decls: Declarations::default() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// Append a parameter, returning its position.
    pub fn declare_argument(&mut self, param: Param) -> usize {
        self.inject_type_declaration(&param.dtype);
        self.params.push(param);
        self.params.len() - 1
    }

    pub fn emit_raw(&mut self, text: impl AsRef<str>) -> &mut Self {
        self.body.push_str(text.as_ref());
        self
    }

    pub fn emit_literal(&mut self, value: &Value) -> &mut Self {
        let text = self.literal(value);
        self.emit_raw(text)
    }

    pub fn emit_identifier(&mut self, var: &Var) -> &mut Self {
        self.inject_type_declaration(&var.dtype);
        self.body.push_str(&var.name);
        self
    }

    /// Rendered literal, with its type declared.
    pub fn literal(&mut self, value: &Value) -> String {
        self.inject_type_declaration(&value.dtype());
        render_literal(value, self.dialect)
    }

    /// Spelling of `dtype`, with its type declared.
    pub fn type_name(&mut self, dtype: &DType) -> String {
        self.inject_type_declaration(dtype);
        type_name(dtype, self.dialect)
    }

    /// Make `dtype` usable in this kernel. A no-op when its name is already declared.
    pub fn inject_type_declaration(&mut self, dtype: &DType) -> &mut Self {
        if dtype.uses_double() && self.dialect == Dialect::OpenCl {
            self.decls.add_pragma(FP64_PRAGMA);
        }
        match dtype {
            DType::Scalar(_) => {}
            DType::Vector { scalar, count } => {
                if self.dialect == Dialect::HostC {
                    let name = type_name(dtype, self.dialect);
                    if !self.decls.has_type(&name) {
                        self.decls.types.push((name, host_vector_typedef(*scalar, *count)));
                    }
                }
            }
            DType::Struct(ty) => {
                if self.decls.has_type(ty.name()) {
                    return self;
                }
                for field in ty.fields() {
                    self.inject_type_declaration(&field.dtype);
                }
                let mut text = String::from("typedef struct {\n");
                for field in ty.fields() {
                    let _ = writeln!(text, "    {} {};", type_name(&field.dtype, self.dialect), field.name);
                }
                let _ = write!(text, "}} {};", ty.name());
                self.decls.types.push((ty.name().to_string(), text));
            }
        }
        self
    }

    pub fn has_declaration(&self, name: &str) -> bool {
        self.decls.has_type(name) || self.decls.has_function(name)
    }

    /// Enable an OpenCL extension. Host C ignores pragmas.
    pub fn add_pragma(&mut self, extension: &str) -> &mut Self {
        self.decls.add_pragma(extension);
        self
    }

    /// Add a helper function; the first definition of a name wins.
    pub fn add_function(&mut self, function: &FunctionDef) -> &mut Self {
        if self.decls.has_function(&function.name) {
            return self;
        }
        for dtype in function.types() {
            self.inject_type_declaration(dtype);
        }
        self.decls.functions.push((function.name.clone(), function.render(self.dialect)));
        self
    }

    /// Complete compilation unit holding this kernel alone.
    pub fn serialize(&self) -> String {
        let mut program = ProgramSource::new(self.dialect);
        program.push(self);
        program.serialize()
    }

    fn write_entry(&self, out: &mut String) {
        let params = self.params.iter().map(|p| p.render(self.dialect)).collect::<Vec<_>>().join(", ");
        let _ = writeln!(out, "__kernel void {}({params})\n{{", self.name);
        out.push_str(&self.body);
        if !self.body.ends_with('\n') {
            out.push('\n');
        }
        out.push_str("}\n\n");
    }
}

/// Several kernels compiled as one unit.
#[derive(Debug, Clone)]
pub struct ProgramSource {
    dialect: Dialect,
    decls: Declarations,
    entries: Vec<KernelSource>,
}

impl ProgramSource {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect, decls: Declarations::default(), entries: Vec::new() }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn add_kernel(&mut self, kernel: KernelSource) -> Result<&mut Self> {
        snafu::ensure!(
            kernel.dialect == self.dialect,
            DialectMismatchSnafu { kernel: &kernel.name, expected: self.dialect, actual: kernel.dialect }
        );
        snafu::ensure!(self.entry(&kernel.name).is_none(), DuplicateEntrySnafu { name: &kernel.name });
        self.push(&kernel);
        Ok(self)
    }

    fn push(&mut self, kernel: &KernelSource) {
        self.decls.merge(&kernel.decls);
        self.entries.push(kernel.clone());
    }

    pub fn entry(&self, name: &str) -> Option<&KernelSource> {
        self.entries.iter().find(|k| k.name == name)
    }

    pub fn entry_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|k| k.name.as_str())
    }

    /// Prelude (host C), pragmas, types, helper functions, then entry points.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        if self.dialect == Dialect::HostC {
            out.push_str(&host_prelude());
            out.push('\n');
        }
        self.decls.write(self.dialect, &mut out);
        for kernel in &self.entries {
            kernel.write_entry(&mut out);
        }
        if self.dialect == Dialect::HostC {
            for kernel in &self.entries {
                out.push_str(&host_entry_exports(&kernel.name, &kernel.params));
                out.push('\n');
            }
        }
        out
    }
}

