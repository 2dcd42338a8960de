//! Error types for kernel source assembly.

use kiln_device::Dialect;
use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// A program can only hold kernels written for one dialect.
    #[snafu(display("kernel {kernel} targets {actual:?}, program targets {expected:?}"))]
    DialectMismatch { kernel: String, expected: Dialect, actual: Dialect },

    #[snafu(display("program already has an entry point named {name}"))]
    DuplicateEntry { name: String },
}
