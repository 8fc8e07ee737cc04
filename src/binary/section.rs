use super::error::Error::*;
use super::instruction::{Block, BlockType, Instruction, MemoryArg, Opcode};
use super::types::*;
use anyhow::{bail, Context as _, Result};
use log::trace;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive as _;
use std::io::{BufRead, Cursor, Read};

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum SectionID {
    Custom = 0x00,
    Type = 0x01,
    Import = 0x02,
    Function = 0x03,
    Table = 0x04,
    Memory = 0x05,
    Global = 0x06,
    Export = 0x07,
    Start = 0x08,
    Element = 0x09,
    Code = 0x0a,
    Data = 0x0b,
    DataCount = 0x0c,
}

// https://webassembly.github.io/spec/core/binary/modules.html#sections
#[derive(Debug)]
pub enum Section {
    Custom(Custom),
    Type(Vec<FuncType>),
    Import(Vec<Import>),
    Function(Vec<u32>),
    Memory(Vec<Memory>), // only 1 memory for now
    Global(Vec<Global>),
    Export(Vec<Export>),
    Start(u32),
    Data(Vec<Data>),
    DataCount(u32),
    Code(Vec<FunctionBody>),
}

pub fn decode(id: SectionID, data: &[u8]) -> Result<Section> {
    let mut reader = SectionReader::new(data);
    let section = match id {
        SectionID::Custom => Section::Custom(Custom {
            name: reader.name()?,
            data: reader.bytes(reader.remaining())?,
        }),
        SectionID::Type => Section::Type(reader.vec(SectionReader::func_type)?),
        SectionID::Import => Section::Import(reader.vec(SectionReader::import)?),
        SectionID::Function => Section::Function(reader.vec(SectionReader::u32)?),
        SectionID::Memory => {
            let memories = reader.vec(|r| Ok(Memory { limits: r.limits()? }))?;
            if memories.len() != 1 {
                bail!(InvalidMemoryCount);
            }
            Section::Memory(memories)
        }
        SectionID::Global => Section::Global(reader.vec(SectionReader::global)?),
        SectionID::Export => Section::Export(reader.vec(SectionReader::export)?),
        SectionID::Start => Section::Start(reader.u32()?),
        SectionID::Data => Section::Data(reader.vec(SectionReader::data)?),
        SectionID::DataCount => Section::DataCount(reader.u32()?),
        SectionID::Code => Section::Code(reader.vec(|r| {
            let size = r.u32()? as usize;
            r.sub_reader(size)?.function_body()
        })?),
        SectionID::Table | SectionID::Element => bail!(UnsupportedSection(id)),
    };
    Ok(section)
}

/// Cursor over the payload of one section or one function body.
pub struct SectionReader<'a> {
    buf: Cursor<&'a [u8]>,
}

impl<'a> SectionReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self {
            buf: Cursor::new(buf),
        }
    }

    fn byte(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.buf.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn u32(&mut self) -> Result<u32> {
        let num = leb128::read::unsigned(&mut self.buf)?;
        Ok(u32::try_from(num)?)
    }

    // https://www.w3.org/TR/wasm-core-1/#integers%E2%91%A4
    fn i32(&mut self) -> Result<i32> {
        let num = leb128::read::signed(&mut self.buf)?;
        Ok(i32::try_from(num)?)
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(leb128::read::signed(&mut self.buf)?)
    }

    fn bytes(&mut self, num: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; num];
        self.buf.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn name(&mut self) -> Result<String> {
        let size = self.u32()? as usize;
        Ok(String::from_utf8(self.bytes(size)?)?)
    }

    /// Reads a LEB128 count followed by that many items.
    fn vec<T>(&mut self, mut item: impl FnMut(&mut Self) -> Result<T>) -> Result<Vec<T>> {
        let count = self.u32()? as usize;
        // count is untrusted input
        let mut items = Vec::with_capacity(count.min(self.remaining()));
        for _ in 0..count {
            items.push(item(self)?);
        }
        Ok(items)
    }

    /// Splits the next `len` bytes off into their own reader.
    fn sub_reader(&mut self, len: usize) -> Result<SectionReader<'a>> {
        let data: &'a [u8] = *self.buf.get_ref();
        let start = self.buf.position() as usize;
        let end = start.checked_add(len).filter(|end| *end <= data.len());
        let end = end.with_context(|| Truncated("function body"))?;
        self.buf.set_position(end as u64);
        Ok(SectionReader::new(&data[start..end]))
    }

    fn remaining(&self) -> usize {
        self.buf.get_ref().len() - self.buf.position() as usize
    }

    fn has_remaining(&mut self) -> Result<bool> {
        Ok(self.buf.fill_buf().map(|b| !b.is_empty())?)
    }

    fn value_type(&mut self) -> Result<ValueType> {
        Ok(ValueType::try_from(self.byte()?)?)
    }

    fn func_type(&mut self) -> Result<FuncType> {
        let form = self.byte()?;
        if form != 0x60 {
            bail!(InvalidFuncTypeForm(form));
        }
        Ok(FuncType {
            params: self.vec(Self::value_type)?,
            results: self.vec(Self::value_type)?,
        })
    }

    fn import(&mut self) -> Result<Import> {
        let module = self.name()?;
        let field = self.name()?;
        let kind = match self.byte()? {
            0x00 => ImportKind::Func(self.u32()?),
            kind @ 0x01..=0x03 => bail!(UnsupportedImportKind(kind)),
            kind => bail!(InvalidImportKind(kind)),
        };
        Ok(Import {
            module,
            field,
            kind,
        })
    }

    fn export(&mut self) -> Result<Export> {
        let name = self.name()?;
        let kind = self.byte()?;
        let idx = self.u32()?;
        let desc = match kind {
            0x00 => ExportDesc::Func(idx),
            0x02 => ExportDesc::Memory(idx),
            0x03 => ExportDesc::Global(idx),
            _ => bail!(InvalidExportKind(kind)),
        };
        Ok(Export { name, desc })
    }

    fn limits(&mut self) -> Result<Limits> {
        let has_max = self.u32()? != 0x00;
        let min = self.u32()?;
        let max = if has_max { Some(self.u32()?) } else { None };
        Ok(Limits { min, max })
    }

    fn global(&mut self) -> Result<Global> {
        let value_type = self.value_type()?;
        let mutability = self.byte()?;
        let mutability =
            Mutability::from_u8(mutability).with_context(|| InvalidMutability(mutability))?;
        Ok(Global {
            global_type: GlobalType {
                value_type,
                mutability,
            },
            init_expr: self.const_expr()?,
        })
    }

    fn data(&mut self) -> Result<Data> {
        // 0: active segment for memory 0, 2: active segment with explicit memory index
        let memory_index = match self.u32()? {
            0 => 0,
            2 => self.u32()?,
            flags => bail!(UnsupportedDataSegment(flags)),
        };
        let offset = self.const_expr()?;
        let size = self.u32()? as usize;
        Ok(Data {
            memory_index,
            offset,
            init: self.bytes(size)?,
        })
    }

    // constant expression: a single `t.const` followed by `end`
    fn const_expr(&mut self) -> Result<ExprValue> {
        let byte = self.byte()?;
        let value = match Opcode::from_u8(byte) {
            Some(Opcode::I32Const) => ExprValue::I32(self.i32()?),
            Some(Opcode::I64Const) => ExprValue::I64(self.i64()?),
            _ => bail!(InvalidInitExprOpcode(byte)),
        };
        let end = self.byte()?;
        match Opcode::from_u8(end) {
            Some(Opcode::End) => Ok(value),
            Some(op) => bail!(InvalidInitExprEndOpcode(op)),
            None => bail!(UnimplementedOpcode(end)),
        }
    }

    fn function_body(&mut self) -> Result<FunctionBody> {
        let locals = self.vec(|r| {
            Ok(FunctionLocal {
                type_count: r.u32()?,
                value_type: r.value_type()?,
            })
        })?;
        let mut code = vec![];
        while self.has_remaining()? {
            code.push(self.instruction()?);
        }
        Ok(FunctionBody { locals, code })
    }

    fn block_type(&mut self) -> Result<BlockType> {
        match self.byte()? {
            0x40 => Ok(BlockType::Empty),
            byte @ (0x7f | 0x7e) => Ok(BlockType::Value(ValueType::try_from(byte)?)),
            byte => bail!(UnsupportedBlockType(byte)),
        }
    }

    /// Instructions up to the next `else` or `end`, and which one it was.
    fn sequence(&mut self) -> Result<(Vec<Instruction>, Instruction)> {
        let mut body = vec![];
        loop {
            match self.instruction()? {
                inst @ (Instruction::Else | Instruction::End) => return Ok((body, inst)),
                inst => body.push(inst),
            }
        }
    }

    fn block(&mut self) -> Result<Block> {
        let block_type = self.block_type()?;
        let (then_body, terminator) = self.sequence()?;
        let else_body = match terminator {
            Instruction::Else => match self.sequence()? {
                (body, Instruction::End) => body,
                _ => bail!(UnexpectedElse),
            },
            _ => vec![],
        };
        Ok(Block {
            block_type,
            then_body,
            else_body,
        })
    }

    fn memory_arg(&mut self) -> Result<MemoryArg> {
        Ok(MemoryArg {
            align: self.u32()?,
            offset: self.u32()?,
        })
    }

    fn instruction(&mut self) -> Result<Instruction> {
        let byte = self.byte()?;
        let op = Opcode::from_u8(byte).with_context(|| UnimplementedOpcode(byte))?;
        trace!("decode opcode: {:?}", op);
        let inst = match op {
            Opcode::Block => Instruction::Block(self.block()?),
            Opcode::Loop => Instruction::Loop(self.block()?),
            Opcode::If => Instruction::If(self.block()?),
            Opcode::Br => Instruction::Br(self.u32()?),
            Opcode::BrIf => Instruction::BrIf(self.u32()?),
            Opcode::BrTable => {
                let labels = self.vec(Self::u32)?;
                Instruction::BrTable(labels, self.u32()?)
            }
            Opcode::Call => Instruction::Call(self.u32()?),
            Opcode::LocalGet => Instruction::LocalGet(self.u32()?),
            Opcode::LocalSet => Instruction::LocalSet(self.u32()?),
            Opcode::LocalTee => Instruction::LocalTee(self.u32()?),
            Opcode::GlobalGet => Instruction::GlobalGet(self.u32()?),
            Opcode::GlobalSet => Instruction::GlobalSet(self.u32()?),
            Opcode::I32Load => Instruction::I32Load(self.memory_arg()?),
            Opcode::I64Load => Instruction::I64Load(self.memory_arg()?),
            Opcode::I32Load8S => Instruction::I32Load8S(self.memory_arg()?),
            Opcode::I32Load8U => Instruction::I32Load8U(self.memory_arg()?),
            Opcode::I32Load16S => Instruction::I32Load16S(self.memory_arg()?),
            Opcode::I32Load16U => Instruction::I32Load16U(self.memory_arg()?),
            Opcode::I32Store => Instruction::I32Store(self.memory_arg()?),
            Opcode::I64Store => Instruction::I64Store(self.memory_arg()?),
            Opcode::I32Store8 => Instruction::I32Store8(self.memory_arg()?),
            Opcode::I32Store16 => Instruction::I32Store16(self.memory_arg()?),
            // NOTE: memory index is always 0 now
            Opcode::MemorySize => {
                self.byte()?;
                Instruction::MemorySize
            }
            Opcode::MemoryGrow => {
                self.byte()?;
                Instruction::MemoryGrow
            }
            Opcode::I32Const => Instruction::I32Const(self.i32()?),
            Opcode::I64Const => Instruction::I64Const(self.i64()?),
            op => without_immediate(op)?,
        };
        Ok(inst)
    }
}

macro_rules! without_immediate {
    ($($name:ident),* $(,)?) => {
        fn without_immediate(op: Opcode) -> Result<Instruction> {
            Ok(match op {
                $(Opcode::$name => Instruction::$name,)*
                op => bail!(UnimplementedOpcode(op as u8)),
            })
        }
    };
}

without_immediate!(
    Unreachable, Nop, Else, End, Return, Drop, Select,
    I32Eqz, I32Eq, I32Ne, I32LtS, I32LtU, I32GtS, I32GtU, I32LeS, I32LeU, I32GeS, I32GeU,
    I64Eqz, I64Eq, I64Ne,
    I32Clz, I32Ctz, I32Popcnt, I32Add, I32Sub, I32Mul, I32DivS, I32DivU, I32RemS, I32RemU,
    I32And, I32Or, I32Xor, I32Shl, I32ShrS, I32ShrU, I32Rotl, I32Rotr,
    I64Add, I64Sub, I64Mul,
    I32WrapI64, I64ExtendI32S, I64ExtendI32U,
);

#[cfg(test)]
mod tests {
    use super::{decode, Section, SectionID};
    use crate::binary::instruction::Instruction;
    use anyhow::Result;
    use pretty_assertions::assert_eq;

    #[test]
    fn function_body_longer_than_section() {
        let err = decode(SectionID::Code, &[1, 10, 0]).unwrap_err();
        assert_eq!(err.to_string(), "function body is truncated");
    }

    #[test]
    fn code_section_bodies_are_split() -> Result<()> {
        // two bodies: `nop end` and `i32.const 7 drop end`
        let bytes = [2, 3, 0, 0x01, 0x0b, 5, 0, 0x41, 7, 0x1a, 0x0b];
        let Section::Code(bodies) = decode(SectionID::Code, &bytes)? else {
            panic!("expected code section");
        };
        assert_eq!(bodies[0].code, vec![Instruction::Nop, Instruction::End]);
        assert_eq!(
            bodies[1].code,
            vec![Instruction::I32Const(7), Instruction::Drop, Instruction::End]
        );
        Ok(())
    }

    #[test]
    fn invalid_func_type_form() {
        let err = decode(SectionID::Type, &[1, 0x61, 0, 0]).unwrap_err();
        assert_eq!(err.to_string(), "invalid func type form: 0x61");
    }

    #[test]
    fn memory_section_needs_one_memory() {
        let err = decode(SectionID::Memory, &[0]).unwrap_err();
        assert_eq!(err.to_string(), "invalid count of memory, must be 1");
    }

    #[test]
    fn oversized_count_fails_on_missing_items() {
        assert!(decode(SectionID::Function, &[0xff, 0xff, 0xff, 0xff, 0x0f]).is_err());
    }

    #[test]
    fn else_inside_else_is_rejected() {
        // if (empty) else else end
        let err = decode(SectionID::Code, &[1, 5, 0, 0x04, 0x40, 0x05, 0x05]).unwrap_err();
        assert_eq!(err.to_string(), "else without a matching if");
    }
}
