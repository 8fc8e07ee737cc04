use super::embedding::{Embedding, Session};
use crate::execution::{ExternalVal, Imports, Runtime, Value};
use crate::wasi::wasi_snapshot_preview1::{File, FileTable, WasiSnapshotPreview1};
use anyhow::{bail, Context as _, Result};
use log::{debug, error, info};
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

const HELLO_WAT: &str = include_str!("hello.wat");

/// Where the collaborator module comes from.
#[derive(Debug, Clone, Default)]
pub enum ModuleSource {
    /// The bundled `hello` module.
    #[default]
    Hello,
    Bytes(Vec<u8>),
    File(PathBuf),
}

impl ModuleSource {
    fn instantiate(&self, imports: Imports) -> Result<Runtime> {
        match self {
            ModuleSource::Hello => {
                let wasm = wat::parse_str(HELLO_WAT).context("failed to compile hello module")?;
                Runtime::from_bytes(wasm, imports)
            }
            ModuleSource::Bytes(bytes) => Runtime::from_bytes(bytes, imports),
            ModuleSource::File(path) => Runtime::from_file(path, imports),
        }
    }
}

/// Hosts the collaborator module on the Wasm interpreter.
///
/// The module must export `memory`, `alloc(len) -> ptr` and
/// `say_hello_to(ptr, len)`; it may import `wasi_snapshot_preview1`.
#[derive(Default)]
pub struct WasmEmbedding {
    source: ModuleSource,
    stdout: Option<Arc<Mutex<File>>>,
}

impl WasmEmbedding {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module(mut self, source: ModuleSource) -> Self {
        self.source = source;
        self
    }

    /// Replaces fd 1 of the guest, e.g. with a buffer to capture greetings.
    pub fn with_stdout(mut self, stdout: Arc<Mutex<File>>) -> Self {
        self.stdout = Some(stdout);
        self
    }
}

impl Embedding for WasmEmbedding {
    type Session = WasmSession;

    fn initialize(&mut self, program: &str) -> Result<WasmSession> {
        debug!("initializing runtime as {program:?}");

        let mut file_table = FileTable::default();
        if let Some(stdout) = &self.stdout {
            file_table.set(1, Arc::clone(stdout));
        }
        let wasi = WasiSnapshotPreview1::with_io(vec![program.to_string()], file_table);
        let runtime = self.source.instantiate(vec![Box::new(wasi)])?;

        if !matches!(runtime.export("memory"), Some(ExternalVal::Memory(_))) {
            bail!("collaborator module does not export memory");
        }
        for name in ["alloc", "say_hello_to"] {
            if !matches!(runtime.export(name), Some(ExternalVal::Func(_))) {
                bail!("collaborator module does not export function {name}");
            }
        }

        info!("runtime initialized");
        Ok(WasmSession { runtime })
    }
}

pub struct WasmSession {
    runtime: Runtime,
}

impl Session for WasmSession {
    fn say_hello_to(&mut self, name: &OsStr) -> Result<()> {
        let bytes = name.as_encoded_bytes();
        let len = i32::try_from(bytes.len()).context("name is too long")?;

        let ptr = match self.runtime.call("alloc", vec![Value::I32(len)])? {
            Some(Value::I32(ptr)) => ptr,
            other => bail!("alloc returned unexpected value: {other:?}"),
        };
        self.runtime
            .memory_mut()?
            .write_bytes(ptr as u32 as usize, bytes)
            .context("alloc returned a buffer outside of memory")?;

        self.runtime
            .call("say_hello_to", vec![Value::I32(ptr), Value::I32(len)])?;
        Ok(())
    }
}

impl Drop for WasmSession {
    fn drop(&mut self) {
        match self.runtime.finalize() {
            Ok(()) => info!("runtime finalized"),
            Err(e) => error!("failed to finalize runtime: {e:#}"),
        }
    }
}
