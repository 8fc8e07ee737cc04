use crate::Value;

// https://github.com/WebAssembly/WASI/blob/main/legacy/preview1/docs.md#errno
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Errno {
    Success = 0,
    Badf = 8,
    Fault = 21,
    Io = 29,
}

impl From<Errno> for Value {
    fn from(errno: Errno) -> Self {
        Value::I32(errno as i32)
    }
}
