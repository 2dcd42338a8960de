//! Runtime configuration.

use std::path::PathBuf;
use std::str::FromStr;

use bon::bon;
use kiln_device::DeviceSpec;

/// Settings fixed when a [`ComputeRuntime`](crate::ComputeRuntime) is created.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Device used by [`ComputeRuntime::default_queue`](crate::ComputeRuntime::default_queue).
    pub device: DeviceSpec,
    /// Persist compiled binaries under [`RuntimeConfig::cache_dir`].
    pub disk_cache: bool,
    pub cache_dir: PathBuf,
    /// Host C compiler; detected when unset.
    pub cc: Option<String>,
    pub cflags: Vec<String>,
    pub host_max_work_group: usize,
    /// Bytes of local memory the host device reports.
    pub host_local_mem: usize,
    /// Sub-group width of OpenCL devices that expose sub-group shuffles.
    pub subgroup_size: Option<usize>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir().unwrap_or_else(std::env::temp_dir).join("kiln")
}

#[bon]
impl RuntimeConfig {
    #[builder]
    pub fn new(
        #[builder(default)] device: DeviceSpec,
        #[builder(default = true)] disk_cache: bool,
        #[builder(into)] cache_dir: Option<PathBuf>,
        #[builder(into)] cc: Option<String>,
        #[builder(default)] cflags: Vec<String>,
        #[builder(default = 256)] host_max_work_group: usize,
        #[builder(default = 64 * 1024)] host_local_mem: usize,
        subgroup_size: Option<usize>,
    ) -> Self {
        Self {
            device,
            disk_cache,
            cache_dir: cache_dir.unwrap_or_else(default_cache_dir),
            cc,
            cflags,
            host_max_work_group,
            host_local_mem,
            subgroup_size,
        }
    }

    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// * `KILN_DEVICE` - `host` (default), `opencl`, `opencl:P` or `opencl:P:D`
    /// * `KILN_DISK_CACHE` - `0` disables the on-disk program cache (default: `1`)
    /// * `KILN_CACHE_DIR` - Program cache directory (default: `<user cache>/kiln`)
    /// * `KILN_CC` - Host C compiler (default: `clang`, falling back to `cc`)
    /// * `KILN_CFLAGS` - Extra host compiler flags, whitespace separated
    /// * `KILN_HOST_MAX_WORK_GROUP` - Host work-group limit (default: 256)
    /// * `KILN_HOST_LOCAL_MEM` - Host local memory in bytes (default: 65536)
    /// * `KILN_SUBGROUP_SIZE` - Sub-group width to assume on OpenCL devices with shuffles
    ///
    /// Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            device: parsed("KILN_DEVICE").unwrap_or(defaults.device),
            disk_cache: std::env::var("KILN_DISK_CACHE").map(|v| v.trim() != "0").unwrap_or(defaults.disk_cache),
            cache_dir: std::env::var_os("KILN_CACHE_DIR").map(PathBuf::from).unwrap_or(defaults.cache_dir),
            cc: std::env::var("KILN_CC").ok().filter(|cc| !cc.trim().is_empty()),
            cflags: std::env::var("KILN_CFLAGS")
                .map(|flags| flags.split_whitespace().map(String::from).collect())
                .unwrap_or_default(),
            host_max_work_group: parsed("KILN_HOST_MAX_WORK_GROUP")
                .filter(|&n: &usize| n > 0)
                .unwrap_or(defaults.host_max_work_group),
            host_local_mem: parsed("KILN_HOST_LOCAL_MEM").unwrap_or(defaults.host_local_mem),
            subgroup_size: parsed("KILN_SUBGROUP_SIZE").filter(|&n: &usize| n > 0),
        }
    }
}

fn parsed<T: FromStr>(var: &str) -> Option<T> {
    let raw = std::env::var(var).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(env.var = var, env.value = %raw, "ignoring invalid environment value");
            None
        }
    }
}
