use super::error::Error;
use super::value::{ExternalVal, Value};
use crate::binary::instruction::{Instruction, MemoryArg};
use crate::binary::module::Module;
use crate::binary::types::{FuncType, ValueType};
use anyhow::{bail, Context as _, Result};
use std::collections::HashMap;
use std::mem::size_of;
use std::ops::Range;
use std::rc::Rc;

// https://www.w3.org/TR/wasm-core-1/#memory-instances%E2%91%A0
pub const PAGE_SIZE: u32 = 65536; // 64Ki
pub const MAX_PAGES: u32 = 65536; // 4Gi
/// Pages a guest may hold regardless of its declared maximum.
pub const HOST_MAX_PAGES: u32 = 1024; // 64Mi

#[derive(Debug, Clone)]
pub struct Func {
    pub locals: Vec<ValueType>,
    pub body: Rc<Vec<Instruction>>,
}

#[derive(Debug, Clone)]
pub struct InternalFuncInst {
    pub func_type: FuncType,
    pub code: Func,
}

#[derive(Debug, Clone)]
pub struct ExternalFuncInst {
    pub module: String,
    pub field: String,
    pub func_type: FuncType,
}

#[derive(Debug, Clone)]
pub enum FuncInst {
    Internal(InternalFuncInst),
    External(ExternalFuncInst),
}

impl FuncInst {
    pub fn func_type(&self) -> &FuncType {
        match self {
            FuncInst::Internal(func) => &func.func_type,
            FuncInst::External(func) => &func.func_type,
        }
    }
}

pub trait Numberic: Sized {
    fn read(buf: &[u8]) -> Self;
    fn write(self, buf: &mut [u8]);
}

macro_rules! impl_numberic {
    ($($ty: ty),*) => {
        $(
            impl Numberic for $ty {
                fn read(buf: &[u8]) -> $ty {
                    let mut bytes = [0u8; size_of::<$ty>()];
                    bytes.copy_from_slice(&buf[..size_of::<$ty>()]);
                    <$ty>::from_le_bytes(bytes)
                }

                fn write(self, buf: &mut [u8]) {
                    buf[..size_of::<$ty>()].copy_from_slice(&self.to_le_bytes());
                }
            }
        )*
    }
}

impl_numberic!(i8, i16, i32, i64, u8, u16, u32);

#[derive(Default, Debug)]
pub struct MemoryInst {
    pub data: Vec<u8>,
    pub max: Option<u32>,
}

impl MemoryInst {
    pub fn new(min: u32, max: Option<u32>) -> Self {
        Self {
            data: vec![0; min as usize * PAGE_SIZE as usize],
            max,
        }
    }

    // size in pages
    pub fn size(&self) -> u32 {
        (self.data.len() / PAGE_SIZE as usize) as u32
    }

    /// Returns the previous size in pages, or `None` when the declared
    /// maximum would be exceeded. Growing past [`HOST_MAX_PAGES`] traps.
    pub fn grow(&mut self, n: u32) -> Result<Option<u32>> {
        let max = self.max.unwrap_or(MAX_PAGES).min(MAX_PAGES);
        let size = self.size();
        let Some(grown) = size.checked_add(n).filter(|pages| *pages <= max) else {
            return Ok(None);
        };
        if grown > HOST_MAX_PAGES {
            bail!(Error::MemoryLimitExceeded(grown, HOST_MAX_PAGES));
        }
        self.data.resize((grown as usize) * PAGE_SIZE as usize, 0);
        Ok(Some(size))
    }

    fn range(&self, addr: usize, len: usize) -> Result<Range<usize>> {
        match addr.checked_add(len) {
            Some(end) if end <= self.data.len() => Ok(addr..end),
            _ => bail!(Error::MemoryOutOfBounds(addr, len)),
        }
    }

    pub fn read<T: Numberic>(&self, addr: usize) -> Result<T> {
        let range = self.range(addr, size_of::<T>())?;
        Ok(T::read(&self.data[range]))
    }

    pub fn write<T: Numberic>(&mut self, addr: usize, value: T) -> Result<()> {
        let range = self.range(addr, size_of::<T>())?;
        value.write(&mut self.data[range]);
        Ok(())
    }

    pub fn load<T: Numberic>(&self, addr: usize, arg: &MemoryArg) -> Result<T> {
        self.read(addr + arg.offset as usize)
    }

    pub fn store<T: Numberic>(&mut self, addr: usize, arg: &MemoryArg, value: T) -> Result<()> {
        self.write(addr + arg.offset as usize, value)
    }

    pub fn read_bytes(&self, addr: usize, len: usize) -> Result<&[u8]> {
        let range = self.range(addr, len)?;
        Ok(&self.data[range])
    }

    pub fn write_bytes(&mut self, addr: usize, bytes: &[u8]) -> Result<()> {
        let range = self.range(addr, bytes.len())?;
        self.data[range].copy_from_slice(bytes);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct GlobalInst {
    pub value: Value,
    pub mutability: bool,
}

#[derive(Debug, Default)]
pub struct ModuleInst {
    pub func_types: Vec<FuncType>,
    pub exports: HashMap<String, ExternalVal>,
}

impl ModuleInst {
    // https://www.w3.org/TR/wasm-core-1/#modules%E2%91%A6
    pub fn allocate(module: &Module) -> Self {
        let func_types = module.type_section.clone().unwrap_or_default();
        let exports = module
            .export_section
            .iter()
            .flatten()
            .map(|export| (export.name.clone(), ExternalVal::from(&export.desc)))
            .collect();

        ModuleInst {
            func_types,
            exports,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_read_write() -> Result<()> {
        let mut memory = MemoryInst::new(1, None);
        memory.write(8, 0x1234_5678_i32)?;
        assert_eq!(memory.read::<u8>(8)?, 0x78);
        assert_eq!(memory.read::<i16>(10)?, 0x1234);
        assert_eq!(memory.load::<i32>(4, &MemoryArg { align: 2, offset: 4 })?, 0x1234_5678);
        Ok(())
    }

    #[test]
    fn memory_out_of_bounds() {
        let memory = MemoryInst::new(1, None);
        let err = memory.read::<i32>(PAGE_SIZE as usize - 2).unwrap_err();
        assert_eq!(err.to_string(), "out of bounds memory access: address 65534, size 4");
        assert!(memory.read_bytes(usize::MAX, 2).is_err());
    }

    #[test]
    fn memory_grow() -> Result<()> {
        let mut memory = MemoryInst::new(1, Some(2));
        assert_eq!(memory.grow(1)?, Some(1));
        assert_eq!(memory.size(), 2);
        assert_eq!(memory.grow(1)?, None);
        assert_eq!(memory.size(), 2);
        Ok(())
    }

    #[test]
    fn memory_grow_stops_at_host_limit() -> Result<()> {
        let mut memory = MemoryInst::new(1, None);
        let err = memory.grow(HOST_MAX_PAGES).unwrap_err();
        assert_eq!(
            err.to_string(),
            "memory limit exceeded: 1025 pages requested, the host allows 1024"
        );
        assert_eq!(memory.size(), 1);
        assert_eq!(memory.grow(1)?, Some(1));
        Ok(())
    }
}
