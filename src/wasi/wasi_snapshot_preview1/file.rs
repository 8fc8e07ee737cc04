use anyhow::{bail, Result};
use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

pub enum File {
    Stdout(io::Stdout),
    Stderr(io::Stderr),
    Buffer(Vec<u8>),
}

impl File {
    pub fn stdout() -> Self {
        File::Stdout(io::stdout())
    }

    pub fn stderr() -> Self {
        File::Stderr(io::stderr())
    }

    pub fn from_buffer(buffer: Vec<u8>) -> Self {
        File::Buffer(buffer)
    }

    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        match self {
            File::Stdout(out) => out.write_all(data)?,
            File::Stderr(err) => err.write_all(data)?,
            File::Buffer(buf) => buf.extend_from_slice(data),
        }
        Ok(data.len())
    }

    pub fn flush(&mut self) -> Result<()> {
        match self {
            File::Stdout(out) => out.flush()?,
            File::Stderr(err) => err.flush()?,
            File::Buffer(_) => {}
        }
        Ok(())
    }

    pub fn read_string(&self) -> Result<String> {
        match self {
            File::Buffer(buf) => Ok(String::from_utf8(buf.clone())?),
            _ => bail!("cannot read from standard stream"),
        }
    }
}

pub struct FileTable(HashMap<u32, Arc<Mutex<File>>>);

impl Default for FileTable {
    fn default() -> Self {
        let mut table = FileTable(HashMap::new());
        table.set(1, Arc::new(Mutex::new(File::stdout())));
        table.set(2, Arc::new(Mutex::new(File::stderr())));
        table
    }
}

impl FileTable {
    /// Files are numbered from fd 0 in the given order.
    pub fn with_io(files: Vec<Arc<Mutex<File>>>) -> Self {
        let mut file_table = FileTable(HashMap::new());
        for (fd, file) in files.into_iter().enumerate() {
            file_table.set(fd as u32, file);
        }
        file_table
    }

    pub fn get(&self, fd: u32) -> Option<&Arc<Mutex<File>>> {
        self.0.get(&fd)
    }

    pub fn set(&mut self, fd: u32, file: Arc<Mutex<File>>) {
        self.0.insert(fd, file);
    }

    pub fn files(&self) -> impl Iterator<Item = &Arc<Mutex<File>>> {
        self.0.values()
    }
}
