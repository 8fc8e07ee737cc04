use anyhow::Result;
use std::ffi::OsStr;

/// A scripting runtime that can be brought up by the host process.
///
/// `initialize` is the only way to obtain a [`Session`], and dropping the
/// session is the only way to finalize the runtime, so finalization happens
/// exactly once on every exit path.
pub trait Embedding {
    type Session: Session;

    /// `program` is the name the host was invoked as.
    fn initialize(&mut self, program: &str) -> Result<Self::Session>;
}

/// A live runtime with the collaborator module loaded.
pub trait Session {
    /// `name` is passed through as given on the command line, which need
    /// not be valid UTF-8.
    fn say_hello_to(&mut self, name: &OsStr) -> Result<()>;
}
