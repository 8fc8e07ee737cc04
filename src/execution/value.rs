use super::error::Error;
use crate::binary::types::{ExportDesc, ValueType};
use anyhow::{Context as _, Result};
use std::fmt::Display;

// https://webassembly.github.io/spec/core/exec/runtime.html#syntax-val
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    I32(i32),
    I64(i64),
}

impl Value {
    pub fn is_true(&self) -> bool {
        match *self {
            Value::I32(v) => v != 0,
            Value::I64(v) => v != 0,
        }
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            Value::I32(_) => ValueType::I32,
            Value::I64(_) => ValueType::I64,
        }
    }

    pub fn zero(value_type: ValueType) -> Self {
        match value_type {
            ValueType::I32 => Value::I32(0),
            ValueType::I64 => Value::I64(0),
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::I32(n) => {
                write!(f, "{n}")
            }
            Self::I64(n) => {
                write!(f, "{n}")
            }
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Frame {
    pub arity: usize,       // result arity
    pub locals: Vec<Value>, // local variables
}

// trait for stack access
pub trait StackAccess {
    fn pop_value(&mut self) -> Result<Value>;
    fn pop1<T: TryFrom<Value, Error = Error>>(&mut self) -> Result<T>;
    fn pop_rl<T: TryFrom<Value, Error = Error>>(&mut self) -> Result<(T, T)>;
}

impl StackAccess for Vec<Value> {
    fn pop_value(&mut self) -> Result<Value> {
        let value = self.pop().context(Error::StackPopError)?;
        Ok(value)
    }

    fn pop1<T: TryFrom<Value, Error = Error>>(&mut self) -> Result<T> {
        let value = self.pop_value()?;
        Ok(T::try_from(value)?)
    }

    fn pop_rl<T: TryFrom<Value, Error = Error>>(&mut self) -> Result<(T, T)> {
        let r = self.pop1()?;
        let l = self.pop1()?;
        Ok((r, l))
    }
}

macro_rules! into_into_value {
    ($($ty: ty => $variant: ident),*) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Self::$variant(value)
                }
            }
        )*
    };
}

into_into_value!(i32 => I32, i64 => I64);

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::I32(value as i32)
    }
}

macro_rules! try_from_value {
    ($($ty: ty => $variant: ident),*) => {
        $(
            impl TryFrom<Value> for $ty {
                type Error = Error;

                fn try_from(value: Value) -> Result<Self, Self::Error> {
                    match value {
                        Value::$variant(v) => Ok(v),
                        _ => Err(Error::UnexpectedStackValueType(value)),
                    }
                }
            }
        )*
    };
}

try_from_value!(i32 => I32, i64 => I64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalVal {
    Func(u32),
    Memory(u32),
    Global(u32),
}

impl From<&ExportDesc> for ExternalVal {
    fn from(value: &ExportDesc) -> Self {
        match *value {
            ExportDesc::Func(idx) => Self::Func(idx),
            ExportDesc::Memory(idx) => Self::Memory(idx),
            ExportDesc::Global(idx) => Self::Global(idx),
        }
    }
}

#[derive(Debug)]
pub enum State {
    Continue,     // continue to next instruction
    Return,       // return from current frame
    Break(usize), // jump to the label
}
