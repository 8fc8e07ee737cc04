use std::ffi::OsString;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HostError {
    #[error("failed to initialize the embedded runtime: {0:#}")]
    Initialize(anyhow::Error),
    #[error("say_hello_to({name:?}) failed: {cause:#}")]
    Call { name: OsString, cause: anyhow::Error },
}
