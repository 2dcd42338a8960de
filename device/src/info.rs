//! Device description and selection.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, InvalidDeviceSnafu, Result};

/// Kernel language a device consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// OpenCL C, compiled by the platform driver.
    OpenCl,
    /// C11 with a work-item prelude, compiled by the host C compiler and run on host threads.
    HostC,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Cpu,
    Gpu,
    Accelerator,
}

/// Capabilities queried once when a device is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub vendor: String,
    pub platform: String,
    pub driver_version: String,
    pub kind: DeviceKind,
    pub max_work_group_size: usize,
    pub compute_units: usize,
    /// Bytes of work-group local memory.
    pub local_mem_size: usize,
    /// Sub-group width, when the device reports one.
    pub subgroup_size: Option<usize>,
    /// Whether sub-group shuffle builtins are available to kernels.
    pub subgroup_shuffle: bool,
    pub supports_fp64: bool,
}

impl DeviceInfo {
    /// Identity string used in program cache keys and disk cache hashes.
    pub fn identity(&self) -> String {
        format!("{}/{}/{}", self.platform, self.name, self.driver_version)
    }

    pub fn is_cpu(&self) -> bool {
        self.kind == DeviceKind::Cpu
    }
}

/// Which device to open.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum DeviceSpec {
    /// Host threads running host-C kernels.
    #[default]
    Host,
    OpenCl {
        platform: usize,
        device: usize,
    },
}

impl DeviceSpec {
    /// Registry key of the backend serving this spec.
    pub fn base_type(&self) -> &'static str {
        match self {
            Self::Host => "HOST",
            Self::OpenCl { .. } => "OPENCL",
        }
    }

    /// Parse `host`, `opencl`, `opencl:P` or `opencl:P:D` (case-insensitive).
    pub fn parse(s: &str) -> Result<Self> {
        let upper = s.trim().to_uppercase();
        let parts: Vec<&str> = upper.split(':').collect();
        let index = |i: usize| -> Result<usize> {
            match parts.get(i) {
                Some(part) => part.parse().map_err(|_| Error::InvalidDevice { device: s.to_string() }),
                None => Ok(0),
            }
        };

        match parts[0] {
            "HOST" | "CPU" if parts.len() == 1 => Ok(Self::Host),
            "OPENCL" | "CL" if parts.len() <= 3 => Ok(Self::OpenCl { platform: index(1)?, device: index(2)? }),
            _ => InvalidDeviceSnafu { device: s }.fail(),
        }
    }
}

impl FromStr for DeviceSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for DeviceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host => write!(f, "host"),
            Self::OpenCl { platform, device } => write!(f, "opencl:{platform}:{device}"),
        }
    }
}
