use super::instruction::Opcode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid count of memory, must be 1")]
    InvalidMemoryCount,
    #[error("invalid import kind: {0:#x}")]
    InvalidImportKind(u8),
    #[error("unsupported import kind: {0:#x}, only functions can be imported")]
    UnsupportedImportKind(u8),
    #[error("invalid func type form: {0:#x}")]
    InvalidFuncTypeForm(u8),
    #[error("invalid export kind: {0:#x}")]
    InvalidExportKind(u8),
    #[error("{0} is truncated")]
    Truncated(&'static str),
    #[error("else without a matching if")]
    UnexpectedElse,
    #[error("invalid value type: {0:#x}")]
    InvalidValueType(u8),
    #[error("invalid mutability: {0:#x}")]
    InvalidMutability(u8),
    #[error("invalid init expr opcode: {0:#x}")]
    InvalidInitExprOpcode(u8),
    #[error("invalid init expr end opcode: {0:?}")]
    InvalidInitExprEndOpcode(Opcode),
    #[error("unknown section id: {0:#x}")]
    UnknownSection(u8),
    #[error("unsupported section: {0:?}")]
    UnsupportedSection(super::section::SectionID),
    #[error("unsupported data segment flags: {0:#x}")]
    UnsupportedDataSegment(u32),
    #[error("unimplemented opcode: {0:#x}")]
    UnimplementedOpcode(u8),
    #[error("unsupported block type: {0:#x}")]
    UnsupportedBlockType(u8),
}
