//! Error types for the algorithms.

use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(transparent)]
    Runtime { source: kiln_runtime::Error },

    #[snafu(transparent)]
    Device { source: kiln_device::Error },

    #[snafu(transparent)]
    Codegen { source: kiln_codegen::Error },

    #[snafu(transparent)]
    DType { source: kiln_dtype::Error },

    /// Radix sort and extrema compare keys bit by bit or with `<`; other types have no order.
    #[snafu(display("{operation} does not support {dtype} keys"))]
    UnsupportedKeyType { operation: String, dtype: String },

    #[snafu(display("operator {op} has no identity for {dtype}"))]
    MissingIdentity { op: String, dtype: String },

    #[snafu(display("operator {op} is not defined for {dtype}"))]
    UnsupportedOperator { op: String, dtype: String },

    #[snafu(display("{iterator} iterator cannot be written to"))]
    NotWritable { iterator: String },

    #[snafu(display("range holds {actual} elements, {expected} required"))]
    LengthMismatch { expected: usize, actual: usize },

    #[snafu(display("cannot convert {from} to {to}"))]
    TypeMismatch { from: String, to: String },
}

impl Error {
    pub fn class(&self) -> kiln_device::ErrorClass {
        match self {
            Self::Runtime { source } => source.class(),
            Self::Device { source } => source.class(),
            _ => kiln_device::ErrorClass::Other,
        }
    }

    /// Compiler log of a rejected build.
    pub fn build_log(&self) -> Option<&str> {
        match self {
            Self::Runtime { source } => source.build_log(),
            Self::Device { source: kiln_device::Error::Build { log, .. } } => Some(log),
            _ => None,
        }
    }
}
