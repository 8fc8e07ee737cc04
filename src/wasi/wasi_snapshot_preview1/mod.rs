pub mod file;
pub mod preview1;
pub mod types;

pub use file::{File, FileTable};
pub use preview1::WasiSnapshotPreview1;
