pub mod error;
pub mod importer;
mod macros;
pub mod module;
pub(crate) mod op;
pub mod runtime;
pub mod store;
pub mod value;

pub use importer::*;
pub use runtime::*;
pub use store::*;
pub use value::*;
