use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Coarse failure class of a device operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The device compiler rejected generated source.
    Build,
    /// A launch was rejected before submission.
    Launch,
    /// A host/device transfer was rejected before submission.
    Transfer,
    Other,
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Device compiler rejected the source. `code` is the submitted source text.
    #[snafu(display("kernel build failed:\n{log}"))]
    Build { log: String, code: String },

    #[snafu(display("invalid work size: {reason}"))]
    InvalidWorkSize { reason: String },

    #[snafu(display("kernel {kernel}: argument {index} is not bound"))]
    MissingArgument { kernel: String, index: usize },

    #[snafu(display("kernel {kernel}: argument {index}: {reason}"))]
    ArgumentMismatch { kernel: String, index: usize, reason: String },

    #[snafu(display("kernel entry point {name} not found"))]
    KernelNotFound { name: String },

    /// The program was built by a different backend than the queue executing it.
    #[snafu(display("kernel {kernel} was not built for this queue's backend"))]
    ForeignProgram { kernel: String },

    #[snafu(display("transfer out of bounds: offset {offset} + len {len} exceeds buffer size {size}"))]
    OutOfBounds { offset: usize, len: usize, size: usize },

    #[snafu(display("size mismatch: expected {expected}, got {actual}"))]
    SizeMismatch { expected: usize, actual: usize },

    #[snafu(display("failed to allocate {bytes} bytes: {reason}"))]
    Allocation { bytes: usize, reason: String },

    /// A previously submitted queue operation failed.
    #[snafu(display("queue operation failed: {message}"))]
    QueueFailed { message: String },

    #[snafu(display("invalid device: {device}"))]
    InvalidDevice { device: String },

    #[snafu(display("{message}"))]
    Backend { message: String },
}

impl Error {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Build { .. } => ErrorClass::Build,
            Self::InvalidWorkSize { .. }
            | Self::MissingArgument { .. }
            | Self::ArgumentMismatch { .. }
            | Self::KernelNotFound { .. }
            | Self::ForeignProgram { .. } => ErrorClass::Launch,
            Self::OutOfBounds { .. } | Self::SizeMismatch { .. } => ErrorClass::Transfer,
            _ => ErrorClass::Other,
        }
    }
}
