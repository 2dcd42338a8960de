//! Host C compilation and dynamic loading.
//!
//! Kernel source in the host C dialect is compiled into a shared library with the system C
//! compiler. The library bytes are the device binary: they can be persisted by the disk cache
//! and loaded again through `dlopen` without recompiling.

use std::ffi::{c_ulong, c_void};
use std::io::Write;
use std::path::Path;
use std::process::Command;

use kiln_codegen::prelude::{ARITY_PREFIX, BIND_ITEM_SYMBOL, ENTRY_PREFIX, SIZES_PREFIX};
use kiln_device::error::{BackendSnafu, BuildSnafu, KernelNotFoundSnafu};
use kiln_device::{ArgSlot, Compiler, Program, Result};

use crate::config::RuntimeConfig;

const BASE_FLAGS: [&str; 6] = ["-shared", "-fPIC", "-O2", "-std=gnu11", "-fwrapv", "-fno-math-errno"];

/// Compiles host C source into shared-library bytes.
#[derive(Debug, Clone)]
pub struct HostCompiler {
    cc: String,
    flags: Vec<String>,
    cache_key: String,
}

impl HostCompiler {
    pub fn new(cc: impl Into<String>, flags: Vec<String>) -> Self {
        let cc = cc.into();
        let cache_key = format!("{cc} {}", flags.join(" ")).trim().to_string();
        Self { cc, flags, cache_key }
    }

    /// Use `KILN_CC`/config when given, otherwise `clang` if it runs, otherwise `cc`.
    pub fn detect(config: &RuntimeConfig) -> Self {
        let cc = config.cc.clone().unwrap_or_else(|| {
            let clang = Command::new("clang").arg("--version").output().is_ok_and(|out| out.status.success());
            if clang { "clang".to_string() } else { "cc".to_string() }
        });
        tracing::debug!(cc = %cc, "host compiler selected");
        Self::new(cc, config.cflags.clone())
    }

    pub fn cc(&self) -> &str {
        &self.cc
    }
}

impl Compiler for HostCompiler {
    fn compile(&self, src: &str, options: &str) -> Result<Vec<u8>> {
        let backend = |what: &str, e: std::io::Error| BackendSnafu { message: format!("{what}: {e}") }.build();

        let dir = tempfile::tempdir().map_err(|e| backend("failed to create temp directory", e))?;
        let src_path = dir.path().join("kernel.c");
        let so_path = dir.path().join("kernel.so");
        std::fs::File::create(&src_path)
            .and_then(|mut file| file.write_all(src.as_bytes()))
            .map_err(|e| backend("failed to write kernel source", e))?;

        let output = Command::new(&self.cc)
            .args(BASE_FLAGS)
            .args(&self.flags)
            .args(options.split_whitespace())
            .arg("-o")
            .arg(&so_path)
            .arg(&src_path)
            .arg("-lm")
            .output()
            .map_err(|e| backend(&format!("failed to run {}", self.cc), e))?;

        if !output.status.success() {
            let log = String::from_utf8_lossy(&output.stderr).into_owned();
            tracing::debug!(cc = %self.cc, log = %log, "host kernel build failed");
            return BuildSnafu { log, code: src }.fail();
        }
        std::fs::read(&so_path).map_err(|e| backend("failed to read compiled library", e))
    }

    fn cache_key(&self) -> Option<&str> {
        Some(&self.cache_key)
    }
}

/// `void kiln_entry_<name>(void** args)`
pub type EntryFn = unsafe extern "C" fn(*const *mut c_void);
/// `void kiln_bind_item(const kiln_item*)`
pub type BindFn = unsafe extern "C" fn(*const c_void);

/// A loaded host program.
#[derive(Debug)]
pub struct HostProgram {
    name: String,
    /// Keep the library mapped (prevents dlclose) for as long as entry points may run.
    library: libloading::Library,
    bind: BindFn,
    /// Keep the temp directory alive so the .so isn't deleted.
    _dir: tempfile::TempDir,
}

impl HostProgram {
    /// Load shared-library bytes produced by [`HostCompiler`].
    pub fn load(name: &str, binary: &[u8]) -> Result<Self> {
        let backend = |message: String| BackendSnafu { message }.build();

        let dir = tempfile::tempdir().map_err(|e| backend(format!("failed to create temp directory: {e}")))?;
        let path = dir.path().join("program.so");
        std::fs::write(&path, binary).map_err(|e| backend(format!("failed to write program: {e}")))?;

        let library = open(&path).map_err(|e| backend(format!("failed to load {name}: {e}")))?;
        // SAFETY: the symbol is emitted by the host prelude with this signature.
        let bind = unsafe { library.get::<BindFn>(BIND_ITEM_SYMBOL.as_bytes()) }
            .map(|sym| *sym)
            .map_err(|e| backend(format!("{name} is not a kiln host program: {e}")))?;

        tracing::debug!(program.name = name, program.bytes = binary.len(), "host program loaded");
        Ok(Self { name: name.to_string(), library, bind, _dir: dir })
    }

    pub fn bind_fn(&self) -> BindFn {
        self.bind
    }

    /// Trampoline of `entry`.
    pub fn entry(&self, entry: &str) -> Result<EntryFn> {
        let symbol = format!("{ENTRY_PREFIX}{entry}");
        // SAFETY: trampolines are emitted with this signature.
        unsafe { self.library.get::<EntryFn>(symbol.as_bytes()) }
            .map(|sym| *sym)
            .map_err(|_| KernelNotFoundSnafu { name: entry }.build())
    }

    fn table(&self, prefix: &str, entry: &str) -> Result<*const c_ulong> {
        let symbol = format!("{prefix}{entry}");
        // SAFETY: a data symbol lookup only yields its address.
        unsafe { self.library.get::<*const c_ulong>(symbol.as_bytes()) }
            .map(|sym| *sym)
            .map_err(|_| KernelNotFoundSnafu { name: entry }.build())
    }
}

fn open(path: &Path) -> std::result::Result<libloading::Library, libloading::Error> {
    // SAFETY: host programs have no initializers besides the C runtime's.
    unsafe { libloading::Library::new(path) }
}

impl Program for HostProgram {
    fn name(&self) -> &str {
        &self.name
    }

    fn signature(&self, entry: &str) -> Result<Vec<ArgSlot>> {
        let arity = self.table(ARITY_PREFIX, entry)?;
        let sizes = self.table(SIZES_PREFIX, entry)?;
        // SAFETY: both tables are emitted next to the trampoline; `kiln_sizes_*` has `arity`
        // entries (at least one).
        let slots = unsafe {
            let arity = *arity as usize;
            std::slice::from_raw_parts(sizes, arity.max(1))[..arity]
                .iter()
                .map(|&bytes| if bytes == 0 { ArgSlot::Pointer } else { ArgSlot::Value { bytes: bytes as usize } })
                .collect()
        };
        Ok(slots)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Factory for [`Device::runtime`](kiln_device::Device::runtime).
pub fn load_host_program(name: &str, binary: &[u8]) -> Result<std::sync::Arc<dyn Program>> {
    Ok(std::sync::Arc::new(HostProgram::load(name, binary)?))
}
