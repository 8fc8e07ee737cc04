use super::error::Error;
use super::{section::*, types::*};
use anyhow::{bail, Context as _, Result};
use num_traits::FromPrimitive as _;
use std::io::{self, BufRead, BufReader, Read};

#[derive(Debug, Default, PartialEq)]
pub struct Module {
    pub magic: String,
    pub version: u32,
    pub custom_sections: Vec<Custom>,
    pub type_section: Option<Vec<FuncType>>,
    pub import_section: Option<Vec<Import>>,
    pub function_section: Option<Vec<u32>>,
    pub memory_section: Option<Vec<Memory>>,
    pub global_section: Option<Vec<Global>>,
    pub export_section: Option<Vec<Export>>,
    pub start_section: Option<u32>,
    pub data: Option<Vec<Data>>,
    pub code_section: Option<Vec<FunctionBody>>,
}

impl Module {
    pub fn add_section(&mut self, section: Section) {
        match section {
            Section::Custom(section) => self.custom_sections.push(section),
            Section::Type(section) => self.type_section = Some(section),
            Section::Import(section) => self.import_section = Some(section),
            Section::Function(section) => self.function_section = Some(section),
            Section::Memory(section) => self.memory_section = Some(section),
            Section::Global(section) => self.global_section = Some(section),
            Section::Export(section) => self.export_section = Some(section),
            Section::Code(section) => self.code_section = Some(section),
            Section::Data(section) => self.data = Some(section),
            Section::Start(section) => self.start_section = Some(section),
            // only needed by validators of bulk memory instructions
            Section::DataCount(_) => {}
        };
    }
}

pub struct Decoder<R> {
    reader: BufReader<R>,
}

impl<R: io::Read> Decoder<R> {
    pub fn new(reader: R) -> Self {
        let reader = BufReader::new(reader);
        Self { reader }
    }

    fn has_remaining(&mut self) -> Result<bool> {
        Ok(self.reader.fill_buf().map(|b| !b.is_empty())?)
    }

    fn byte(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.reader.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn bytes(&mut self, num: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; num];
        self.reader.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn decode_to_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.bytes(4)?.as_slice().try_into()?))
    }

    fn decode_to_string(&mut self, num: usize) -> Result<String> {
        let str = String::from_utf8_lossy(self.bytes(num)?.as_slice()).to_string();
        Ok(str)
    }

    fn u32(&mut self) -> Result<u32> {
        let num = leb128::read::unsigned(&mut self.reader)?;
        let num = u32::try_from(num)?;
        Ok(num)
    }

    pub fn decode_section_header(&mut self) -> Result<(SectionID, u32)> {
        let byte = self.byte()?;
        let id = SectionID::from_u8(byte).with_context(|| Error::UnknownSection(byte))?;
        let size: u32 = self.u32()?;
        Ok((id, size))
    }

    pub fn decode_header(&mut self) -> Result<(String, u32)> {
        let magic = self.decode_to_string(4)?;
        if magic != "\0asm" {
            bail!("invalid binary magic")
        }

        let version = self.decode_to_u32()?;
        if version != 1 {
            bail!("invalid binary version")
        }
        Ok((magic, version))
    }

    pub fn decode(&mut self) -> Result<Module> {
        let (magic, version) = self.decode_header()?;
        let mut module = Module {
            magic,
            version,
            ..Module::default()
        };
        while self.has_remaining()? {
            let (id, size) = self.decode_section_header()?;
            let bytes = self.bytes(size as usize)?;
            let section =
                decode(id, &bytes).with_context(|| format!("failed to decode {id:?} section"))?;
            module.add_section(section);
        }
        Ok(module)
    }
}

#[cfg(test)]
mod test {
    use super::Decoder;
    use crate::binary::instruction::{Block, BlockType, Instruction};
    use crate::binary::types::*;
    use anyhow::Result;
    use pretty_assertions::assert_eq;

    fn decode(source: &str) -> Result<super::Module> {
        let wasm = wat::parse_str(source)?;
        let reader = std::io::Cursor::new(wasm);
        Decoder::new(reader).decode()
    }

    #[test]
    fn test_decode_module() -> Result<()> {
        let source = r#"
(module
  (import "env" "print_i32" (func $print_i32 (param i32)))
  (memory 1 256)
  (global $a i32 (i32.const -2))
  (global $x (mut i64) (i64.const 5))
  (func (export "add") (param i32) (param i32) (result i32)
    (i32.add
      (local.get 0)
      (local.get 1)
    )
  )
  (func $main (call $print_i32 (i32.const 2)))
  (data (i32.const 1) "a" "" "bcd")
  (start $main)
)
            "#;
        let module = decode(source)?;

        assert_eq!(module.magic, "\0asm");
        assert_eq!(module.version, 1);
        assert_eq!(
            module.import_section,
            Some(vec![Import {
                module: "env".into(),
                field: "print_i32".into(),
                kind: ImportKind::Func(0),
            }])
        );
        assert_eq!(
            module.memory_section,
            Some(vec![Memory {
                limits: Limits {
                    min: 1,
                    max: Some(256)
                }
            }])
        );
        assert_eq!(
            module.global_section,
            Some(vec![
                Global {
                    global_type: GlobalType {
                        value_type: ValueType::I32,
                        mutability: Mutability::Const,
                    },
                    init_expr: ExprValue::I32(-2),
                },
                Global {
                    global_type: GlobalType {
                        value_type: ValueType::I64,
                        mutability: Mutability::Var,
                    },
                    init_expr: ExprValue::I64(5),
                },
            ])
        );
        assert_eq!(
            module.export_section,
            Some(vec![Export {
                name: "add".into(),
                desc: ExportDesc::Func(1),
            }])
        );
        assert_eq!(module.start_section, Some(2));
        assert_eq!(
            module.data,
            Some(vec![Data {
                memory_index: 0,
                offset: ExprValue::I32(1),
                init: b"abcd".to_vec(),
            }])
        );

        let code = module.code_section.unwrap();
        assert_eq!(
            code[0].code,
            vec![
                Instruction::LocalGet(0),
                Instruction::LocalGet(1),
                Instruction::I32Add,
                Instruction::End,
            ]
        );
        Ok(())
    }

    #[test]
    fn test_nested_if() -> Result<()> {
        let source = r#"
(module
  (func (export "nested") (param i32 i32) (result i32)
    (if (result i32) (local.get 0)
      (then
        (if (result i32) (local.get 1)
          (then (i32.const 9))
          (else (i32.const 10))
        )
      )
      (else (i32.const 11))
    )
  )
)
            "#;
        let module = decode(source)?;
        let code = &module.code_section.unwrap()[0].code;

        let inner = Instruction::If(Block {
            block_type: BlockType::Value(ValueType::I32),
            then_body: vec![Instruction::I32Const(9)],
            else_body: vec![Instruction::I32Const(10)],
        });
        assert_eq!(
            code,
            &vec![
                Instruction::LocalGet(0),
                Instruction::If(Block {
                    block_type: BlockType::Value(ValueType::I32),
                    then_body: vec![Instruction::LocalGet(1), inner],
                    else_body: vec![Instruction::I32Const(11)],
                }),
                Instruction::End,
            ]
        );
        Ok(())
    }

    #[test]
    fn test_keep_custom_section() -> Result<()> {
        let module = decode(r#"(module $hello (func $greet))"#)?;
        assert!(module.custom_sections.iter().any(|c| c.name == "name"));
        Ok(())
    }

    #[test]
    fn test_unimplemented_opcode() {
        let source = r#"(module (func (param i64) (result i64) (i64.div_s (local.get 0) (local.get 0))))"#;
        let err = decode(source).unwrap_err();
        assert!(
            format!("{err:#}").contains("unimplemented opcode: 0x7f"),
            "unexpected error: {err:#}"
        );
    }

    #[test]
    fn test_unsupported_table_section() {
        let err = decode(r#"(module (table 1 funcref))"#).unwrap_err();
        assert!(format!("{err:#}").contains("unsupported section: Table"));
    }

    #[test]
    fn test_invalid_magic() {
        let reader = std::io::Cursor::new(b"\0wat\x01\0\0\0".to_vec());
        let err = Decoder::new(reader).decode().unwrap_err();
        assert_eq!(err.to_string(), "invalid binary magic");
    }
}
