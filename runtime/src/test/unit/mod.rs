pub mod config;
pub mod host;
pub mod meta_kernel;
pub mod parameters;
