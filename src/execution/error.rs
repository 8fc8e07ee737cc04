use super::value::Value;
use std::fmt::{Display, Formatter};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("unreachable")]
    Unreachable,
    #[error("integer divide by zero")]
    IntegerDivideByZero,
    #[error("integer overflow")]
    IntegerOverflow,
    #[error("cannot pop value from stack")]
    StackPopError,
    #[error("unexpected stack value type: {0:?}")]
    UnexpectedStackValueType(Value),
    #[error("out of bounds memory access: address {0}, size {1}")]
    MemoryOutOfBounds(usize, usize),
    #[error("memory limit exceeded: {0} pages requested, the host allows {1}")]
    MemoryLimitExceeded(u32, u32),
    #[error("not found local variable with index: {0}")]
    NotFoundLocalVariable(usize),
    #[error("not found global variable with index: {0}")]
    NotFoundGlobalVariable(usize),
    #[error("cannot set immutable global variable with index: {0}")]
    ImmutableGlobal(usize),
    #[error("not found import module: {0}")]
    NotFoundImportModule(String),
    #[error("not found import function: {0}.{1}")]
    NotFoundImportFunction(String, String),
    #[error("not found exported function by name: {0}")]
    NotFoundExportedFunction(String),
    #[error("not found memory by index: {0}")]
    NotFoundMemory(usize),
    #[error("not found function by index: {0}")]
    NotFoundFunction(usize),
    #[error("not found function type by index: {0}")]
    NotFoundFuncType(usize),
    #[error("not found type section")]
    NotFoundTypeSection,
    #[error("multiple return values are not supported")]
    UnsupportedMultiValue,
    #[error("function expects {0} arguments, but got {1}")]
    ArgumentCountMismatch(usize, usize),
    #[error("argument type mismatch at index {0}")]
    ArgumentTypeMismatch(usize),
    #[error("invalid branch depth: {0}")]
    InvalidBranchDepth(usize),
    #[error("call stack exhausted")]
    CallStackExhausted,
    #[error("process exited with code {0}")]
    Exit(i32),
    #[error("can not lock {0} for thread")]
    CanNotLockForThread(Resource),
}

#[derive(Debug)]
pub enum Resource {
    File,
}

impl Display for Resource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Resource::File => {
                write!(f, "file")
            }
        }
    }
}
