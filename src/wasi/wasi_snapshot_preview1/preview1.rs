use super::file::FileTable;
use super::types::Errno;
use crate::execution::error::{Error, Resource};
use crate::execution::module::{ExternalFuncInst, MemoryInst};
use crate::execution::{Importer, Store, Value};
use anyhow::{bail, Context as _, Result};
use log::debug;
use rand::prelude::*;

pub const MODULE_NAME: &str = "wasi_snapshot_preview1";

const FUNCTIONS: &[&str] = &[
    "fd_write",
    "args_get",
    "args_sizes_get",
    "random_get",
    "proc_exit",
];

#[derive(Default)]
pub struct WasiSnapshotPreview1 {
    file_table: FileTable,
    args: Vec<String>,
}

impl Importer for WasiSnapshotPreview1 {
    fn name(&self) -> &str {
        MODULE_NAME
    }

    fn provides(&self, field: &str) -> bool {
        FUNCTIONS.contains(&field)
    }

    fn invoke(
        &self,
        store: &mut Store,
        func: &ExternalFuncInst,
        args: Vec<Value>,
    ) -> Result<Option<Value>> {
        let args = i32_args(args)?;
        if func.field == "proc_exit" {
            let code = args.first().copied().unwrap_or_default();
            bail!(Error::Exit(code));
        }

        let memory = store.memory_mut()?;
        let errno = match func.field.as_str() {
            "fd_write" => self.fd_write(memory, &args)?,
            "args_get" => self.args_get(memory, &args)?,
            "args_sizes_get" => self.args_sizes_get(memory, &args)?,
            "random_get" => self.random_get(memory, &args)?,
            field => bail!(Error::NotFoundImportFunction(
                MODULE_NAME.to_string(),
                field.to_string()
            )),
        };
        Ok(Some(errno.into()))
    }

    fn finalize(&self) -> Result<()> {
        for file in self.file_table.files() {
            let mut file = file
                .lock()
                .map_err(|_| Error::CanNotLockForThread(Resource::File))?;
            file.flush()?;
        }
        Ok(())
    }
}

fn i32_args(args: Vec<Value>) -> Result<Vec<i32>> {
    args.into_iter()
        .map(|arg| Ok(i32::try_from(arg)?))
        .collect()
}

fn arg(args: &[i32], idx: usize) -> Result<usize> {
    let value = args
        .get(idx)
        .with_context(|| format!("missing argument {idx}"))?;
    Ok(*value as u32 as usize)
}

// guest memory faults are reported to the guest instead of trapping
fn fault(err: anyhow::Error) -> Errno {
    debug!("wasi memory access failed: {err}");
    Errno::Fault
}

impl WasiSnapshotPreview1 {
    /// `args` become the guest's argv, the first one being the program name.
    pub fn new(args: Vec<String>) -> Self {
        Self {
            args,
            ..Default::default()
        }
    }

    pub fn with_io(args: Vec<String>, file_table: FileTable) -> Self {
        Self { file_table, args }
    }

    fn fd_write(&self, memory: &mut MemoryInst, args: &[i32]) -> Result<Errno> {
        let (fd, iovs, iovs_len, nwritten) =
            (arg(args, 0)?, arg(args, 1)?, arg(args, 2)?, arg(args, 3)?);

        let Some(file) = self.file_table.get(fd as u32) else {
            return Ok(Errno::Badf);
        };

        let data = match gather(memory, iovs, iovs_len) {
            Ok(data) => data,
            Err(err) => return Ok(fault(err)),
        };

        let written = {
            let mut file = file
                .lock()
                .map_err(|_| Error::CanNotLockForThread(Resource::File))?;
            match file.write(&data) {
                Ok(written) => written,
                Err(err) => {
                    debug!("fd_write to {fd} failed: {err}");
                    return Ok(Errno::Io);
                }
            }
        };

        Ok(match memory.write(nwritten, written as u32) {
            Ok(_) => Errno::Success,
            Err(err) => fault(err),
        })
    }

    fn args_sizes_get(&self, memory: &mut MemoryInst, args: &[i32]) -> Result<Errno> {
        let (argc, argv_buf_size) = (arg(args, 0)?, arg(args, 1)?);
        let size: usize = self.args.iter().map(|arg| arg.len() + 1).sum();

        let result = memory
            .write(argc, self.args.len() as u32)
            .and_then(|_| memory.write(argv_buf_size, size as u32));
        Ok(match result {
            Ok(_) => Errno::Success,
            Err(err) => fault(err),
        })
    }

    fn args_get(&self, memory: &mut MemoryInst, args: &[i32]) -> Result<Errno> {
        let (mut argv, mut argv_buf) = (arg(args, 0)?, arg(args, 1)?);

        for value in self.args.iter() {
            let result = memory
                .write(argv, argv_buf as u32)
                .and_then(|_| memory.write_bytes(argv_buf, value.as_bytes()))
                .and_then(|_| memory.write(argv_buf + value.len(), 0_u8));
            if let Err(err) = result {
                return Ok(fault(err));
            }
            argv += 4;
            argv_buf += value.len() + 1;
        }

        Ok(Errno::Success)
    }

    fn random_get(&self, memory: &mut MemoryInst, args: &[i32]) -> Result<Errno> {
        let (buf, buf_len) = (arg(args, 0)?, arg(args, 1)?);
        if let Err(err) = memory.read_bytes(buf, buf_len) {
            return Ok(fault(err));
        }

        let mut bytes = vec![0u8; buf_len];
        rand::thread_rng().fill_bytes(&mut bytes);

        Ok(match memory.write_bytes(buf, &bytes) {
            Ok(_) => Errno::Success,
            Err(err) => fault(err),
        })
    }
}

// collect every iovec (ptr: u32, len: u32) into a single buffer
fn gather(memory: &MemoryInst, iovs: usize, iovs_len: usize) -> Result<Vec<u8>> {
    let mut data = vec![];
    for i in 0..iovs_len {
        let at = iovs + i * 8;
        let ptr = memory.read::<u32>(at)? as usize;
        let len = memory.read::<u32>(at + 4)? as usize;
        data.extend_from_slice(memory.read_bytes(ptr, len)?);
    }
    Ok(data)
}
