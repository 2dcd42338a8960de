//! Error types for the runtime.

use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(transparent)]
    Device { source: kiln_device::Error },

    #[snafu(transparent)]
    Codegen { source: kiln_codegen::Error },

    /// No backend is registered for the requested device type.
    #[snafu(display("unsupported device: {device}"))]
    UnsupportedDevice { device: String },

    #[snafu(display("kernel argument {name} was declared but never bound"))]
    UnboundArgument { name: String },
}

impl Error {
    pub fn class(&self) -> kiln_device::ErrorClass {
        match self {
            Self::Device { source } => source.class(),
            Self::UnboundArgument { .. } => kiln_device::ErrorClass::Launch,
            _ => kiln_device::ErrorClass::Other,
        }
    }

    /// Compiler log of a rejected build.
    pub fn build_log(&self) -> Option<&str> {
        match self {
            Self::Device { source: kiln_device::Error::Build { log, .. } } => Some(log),
            _ => None,
        }
    }
}
