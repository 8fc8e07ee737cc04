use super::{error::Error, importer::Importer, module::*, value::Value};
use crate::binary::{
    module::Module,
    types::{ExprValue, FuncType, ImportKind, Mutability},
};
use anyhow::{bail, Context, Result};
use log::trace;
use std::{collections::HashMap, rc::Rc};

#[derive(Debug, Default)]
pub struct Store {
    pub funcs: Vec<FuncInst>,
    pub memory: Vec<MemoryInst>,
    pub globals: Vec<GlobalInst>,
    pub module: ModuleInst,
    pub start: Option<u32>,
}

fn func_type(module: &Module, idx: u32) -> Result<FuncType> {
    let idx = idx as usize;
    let func_type = module
        .type_section
        .as_ref()
        .with_context(|| Error::NotFoundTypeSection)?
        .get(idx)
        .with_context(|| Error::NotFoundFuncType(idx))?;
    if func_type.results.len() > 1 {
        bail!(Error::UnsupportedMultiValue);
    }
    Ok(func_type.clone())
}

fn eval_offset(offset: ExprValue) -> Result<usize> {
    match offset {
        ExprValue::I32(v) => Ok(v as u32 as usize),
        ExprValue::I64(_) => bail!("offset must be i32 constant"),
    }
}

impl Store {
    pub fn new(module: &Module, importers: &HashMap<String, Box<dyn Importer>>) -> Result<Self> {
        let mut funcs = vec![];
        let mut globals = vec![];
        let mut memories = vec![];

        // imported functions come first in the function index space
        for import in module.import_section.iter().flatten() {
            let importer = importers
                .get(&import.module)
                .with_context(|| Error::NotFoundImportModule(import.module.clone()))?;
            if !importer.provides(&import.field) {
                bail!(Error::NotFoundImportFunction(
                    import.module.clone(),
                    import.field.clone()
                ));
            }

            let ImportKind::Func(typeidx) = import.kind;
            funcs.push(FuncInst::External(ExternalFuncInst {
                module: import.module.clone(),
                field: import.field.clone(),
                func_type: func_type(module, typeidx)?,
            }));
        }

        let func_type_idxs = module.function_section.clone().unwrap_or_default();
        let code_section = module.code_section.as_deref().unwrap_or_default();
        if code_section.len() != func_type_idxs.len() {
            bail!("code section length must be equal to function section length");
        }
        for (func_body, typeidx) in code_section.iter().zip(func_type_idxs) {
            let mut locals = Vec::with_capacity(func_body.locals.len());
            for local in func_body.locals.iter() {
                for _ in 0..local.type_count {
                    locals.push(local.value_type);
                }
            }

            funcs.push(FuncInst::Internal(InternalFuncInst {
                func_type: func_type(module, typeidx)?,
                code: Func {
                    locals,
                    body: Rc::new(func_body.code.clone()),
                },
            }));
        }

        for global in module.global_section.iter().flatten() {
            let value = match global.init_expr {
                ExprValue::I32(v) => Value::I32(v),
                ExprValue::I64(v) => Value::I64(v),
            };
            globals.push(GlobalInst {
                value,
                mutability: global.global_type.mutability == Mutability::Var,
            });
        }

        // NOTE: only support one memory now
        for memory in module.memory_section.iter().flatten() {
            if memory.limits.min > HOST_MAX_PAGES {
                bail!(Error::MemoryLimitExceeded(memory.limits.min, HOST_MAX_PAGES));
            }
            memories.push(MemoryInst::new(memory.limits.min, memory.limits.max));
        }

        for data in module.data.iter().flatten() {
            let offset = eval_offset(data.offset)?;
            let memory = memories
                .get_mut(data.memory_index as usize)
                .with_context(|| Error::NotFoundMemory(data.memory_index as usize))?;
            memory
                .write_bytes(offset, &data.init)
                .context("data is too large to fit in memory")?;
        }

        let store = Self {
            funcs,
            memory: memories,
            globals,
            module: ModuleInst::allocate(module),
            start: module.start_section,
        };
        trace!(
            "allocated store: {} funcs, {} globals, {} memories",
            store.funcs.len(),
            store.globals.len(),
            store.memory.len()
        );

        Ok(store)
    }

    pub fn memory(&self) -> Result<&MemoryInst> {
        self.memory.first().with_context(|| Error::NotFoundMemory(0))
    }

    pub fn memory_mut(&mut self) -> Result<&mut MemoryInst> {
        self.memory.first_mut().with_context(|| Error::NotFoundMemory(0))
    }
}
