use snafu::Snafu;

use crate::ScalarType;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("no {scalar}{count} vector type"))]
    InvalidVectorWidth { scalar: ScalarType, count: usize },

    #[snafu(display("invalid struct {name}: {reason}"))]
    InvalidStruct { name: String, reason: String },

    /// A different layout is already registered under this name.
    #[snafu(display("struct {name} is already registered with a different layout"))]
    ConflictingStruct { name: String },

    #[snafu(display("value mismatch: expected {expected}, got {actual}"))]
    ValueMismatch { expected: String, actual: String },

    #[snafu(display("byte length mismatch for {dtype}: expected {expected}, got {actual}"))]
    ByteLength { dtype: String, expected: usize, actual: usize },
}
