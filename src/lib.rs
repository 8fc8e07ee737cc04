pub mod binary;
pub mod execution;
pub mod host;
pub mod wasi;

pub use execution::*;
