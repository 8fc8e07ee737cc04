//! Embedding layer: brings the interpreter up, greets every name and
//! shuts it down again.

pub mod controller;
pub mod embedding;
pub mod error;
pub mod wasm;

pub use controller::{run, Report};
pub use embedding::{Embedding, Session};
pub use error::HostError;
pub use wasm::{ModuleSource, WasmEmbedding, WasmSession};
