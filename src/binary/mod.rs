pub mod error;
pub mod instruction;
pub mod module;
pub mod section;
pub mod types;
