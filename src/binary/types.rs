use super::error::Error;
use super::instruction::Instruction;
use num_derive::FromPrimitive;

// https://webassembly.github.io/spec/core/binary/types.html#value-types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    I32, // 0x7F
    I64, // 0x7E
}

impl TryFrom<u8> for ValueType {
    type Error = Error;

    fn try_from(value_type: u8) -> Result<Self, Self::Error> {
        match value_type {
            0x7F => Ok(Self::I32),
            0x7E => Ok(Self::I64),
            _ => Err(Error::InvalidValueType(value_type)),
        }
    }
}

// https://webassembly.github.io/spec/core/binary/types.html#function-types
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FuncType {
    pub params: Vec<ValueType>,
    pub results: Vec<ValueType>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionLocal {
    pub type_count: u32,
    pub value_type: ValueType,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct FunctionBody {
    pub locals: Vec<FunctionLocal>,
    pub code: Vec<Instruction>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportDesc {
    Func(u32),
    Memory(u32),
    Global(u32),
}

#[derive(Debug, PartialEq)]
pub struct Export {
    pub name: String,
    pub desc: ExportDesc,
}

#[derive(Debug, PartialEq)]
pub struct Import {
    pub module: String,
    pub field: String,
    pub kind: ImportKind,
}

#[derive(Debug, PartialEq)]
pub enum ImportKind {
    Func(u32),
}

#[derive(Debug, PartialEq, Eq)]
pub struct Limits {
    pub min: u32,
    pub max: Option<u32>,
}

#[derive(Debug, PartialEq, Eq)]
pub struct Memory {
    pub limits: Limits,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum Mutability {
    Const = 0x00,
    Var = 0x01,
}

#[derive(Debug, PartialEq)]
pub struct GlobalType {
    pub value_type: ValueType,
    pub mutability: Mutability,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprValue {
    I32(i32),
    I64(i64),
}

#[derive(Debug, PartialEq)]
pub struct Global {
    pub global_type: GlobalType,
    pub init_expr: ExprValue,
}

#[derive(Debug, PartialEq)]
pub struct Data {
    pub memory_index: u32,
    pub offset: ExprValue,
    pub init: Vec<u8>,
}

#[derive(Debug, PartialEq)]
pub struct Custom {
    pub name: String,
    pub data: Vec<u8>,
}
