use super::error::Error;
use super::importer::{Importer, Imports};
use super::module::{ExternalFuncInst, FuncInst, InternalFuncInst, MemoryInst};
use super::op::*;
use super::store::Store;
use super::value::{ExternalVal, Frame, StackAccess as _, State, Value};
use crate::binary::instruction::*;
use crate::binary::module::{Decoder, Module};
use crate::{load, store};
use anyhow::{bail, Context as _, Result};
use log::{debug, trace};
use std::collections::HashMap;
use std::fs;
use std::io::{Cursor, Read};
use std::path::Path;
use std::rc::Rc;

pub const MAX_CALL_DEPTH: usize = 256;

pub struct Runtime {
    pub store: Store,
    pub stack: Vec<Value>,
    pub call_stack: Vec<Frame>,
    imports: HashMap<String, Box<dyn Importer>>,
}

impl Runtime {
    pub fn from_file(path: impl AsRef<Path>, imports: Imports) -> Result<Self> {
        let path = path.as_ref();
        let file = fs::File::open(path)
            .with_context(|| format!("failed to open module {}", path.display()))?;
        let module = Decoder::new(file).decode()?;
        Self::instantiate(&module, imports)
    }

    pub fn from_reader(reader: &mut impl Read, imports: Imports) -> Result<Self> {
        let module = Decoder::new(reader).decode()?;
        Self::instantiate(&module, imports)
    }

    pub fn from_bytes<T: AsRef<[u8]>>(b: T, imports: Imports) -> Result<Self> {
        let module = Decoder::new(Cursor::new(b)).decode()?;
        Self::instantiate(&module, imports)
    }

    // https://www.w3.org/TR/wasm-core-1/#instantiation%E2%91%A1
    pub fn instantiate(module: &Module, imports: Imports) -> Result<Self> {
        let imports: HashMap<_, _> = imports
            .into_iter()
            .map(|importer| (importer.name().to_string(), importer))
            .collect();
        let store = Store::new(module, &imports)?;
        let start = store.start;
        let mut runtime = Self {
            store,
            stack: vec![],
            call_stack: vec![],
            imports,
        };

        // https://www.w3.org/TR/wasm-core-1/#start-function%E2%91%A1
        if let Some(idx) = start {
            trace!("run start function: {idx}");
            runtime.call_by_idx(idx as usize, vec![])?;
        }

        Ok(runtime)
    }

    pub fn export(&self, name: &str) -> Option<ExternalVal> {
        self.store.module.exports.get(name).copied()
    }

    pub fn memory_mut(&mut self) -> Result<&mut MemoryInst> {
        self.store.memory_mut()
    }

    pub fn current_frame(&self) -> Result<&Frame> {
        self.call_stack.last().context("call stack is empty")
    }

    pub fn current_frame_mut(&mut self) -> Result<&mut Frame> {
        self.call_stack.last_mut().context("call stack is empty")
    }

    pub fn call(&mut self, name: &str, args: Vec<Value>) -> Result<Option<Value>> {
        trace!("call function: {}", name);
        let idx = match self.export(name) {
            Some(ExternalVal::Func(idx)) => idx as usize,
            _ => bail!(Error::NotFoundExportedFunction(name.to_string())),
        };
        self.call_by_idx(idx, args)
    }

    /// Lets every importer release what it holds, e.g. flush buffered output.
    /// Every importer is finalized even if an earlier one fails; the first
    /// failure is returned.
    pub fn finalize(&mut self) -> Result<()> {
        let mut result = Ok(());
        for importer in self.imports.values() {
            if let Err(e) = importer.finalize() {
                debug!("failed to finalize {}: {e:#}", importer.name());
                if result.is_ok() {
                    result = Err(e.context(format!("failed to finalize {}", importer.name())));
                }
            }
        }
        result
    }

    fn call_by_idx(&mut self, idx: usize, args: Vec<Value>) -> Result<Option<Value>> {
        let func_type = self
            .store
            .funcs
            .get(idx)
            .with_context(|| Error::NotFoundFunction(idx))?
            .func_type();
        if func_type.params.len() != args.len() {
            bail!(Error::ArgumentCountMismatch(
                func_type.params.len(),
                args.len()
            ));
        }
        for (i, (param, arg)) in func_type.params.iter().zip(args.iter()).enumerate() {
            if *param != arg.value_type() {
                bail!(Error::ArgumentTypeMismatch(i));
            }
        }

        self.stack.extend(args);
        let result = self.invoke_by_idx(idx);
        if result.is_err() {
            // when trapped, need to cleanup stack
            self.stack.clear();
            self.call_stack.clear();
        }
        trace!("stack when after call function: {:?}", &self.stack);
        result
    }

    fn pop_args(&mut self, count: usize) -> Result<Vec<Value>> {
        let bottom = self
            .stack
            .len()
            .checked_sub(count)
            .context(Error::StackPopError)?;
        Ok(self.stack.split_off(bottom))
    }

    fn invoke_internal(&mut self, func: InternalFuncInst) -> Result<Option<Value>> {
        if self.call_stack.len() >= MAX_CALL_DEPTH {
            bail!(Error::CallStackExhausted);
        }

        let mut locals = self.pop_args(func.func_type.params.len())?;
        locals.extend(func.code.locals.iter().map(|ty| Value::zero(*ty)));

        let arity = func.func_type.results.len();
        self.call_stack.push(Frame { arity, locals });

        // get stack pointer for unwind the stack
        let sp = self.stack.len();

        let body = Rc::clone(&func.code.body);
        match execute(self, &body)? {
            State::Continue | State::Return | State::Break(0) => {}
            State::Break(depth) => bail!(Error::InvalidBranchDepth(depth)),
        }

        // NOTE: only returns one value now
        let result = if arity > 0 {
            Some(self.stack.pop_value()?)
        } else {
            None
        };

        self.stack.truncate(sp);
        self.call_stack.pop();

        Ok(result)
    }

    fn invoke_external(&mut self, func: ExternalFuncInst) -> Result<Option<Value>> {
        let args = self.pop_args(func.func_type.params.len())?;
        let importer = self
            .imports
            .get(&func.module)
            .with_context(|| Error::NotFoundImportModule(func.module.clone()))?;
        let result = importer.invoke(&mut self.store, &func, args);
        trace!(
            "execute external function {}.{}, result is {:?}",
            func.module,
            func.field,
            &result
        );
        result
    }

    // https://www.w3.org/TR/wasm-core-1/#exec-invoke
    fn invoke_by_idx(&mut self, idx: usize) -> Result<Option<Value>> {
        let func = self
            .store
            .funcs
            .get(idx)
            .with_context(|| Error::NotFoundFunction(idx))?
            .clone();
        match func {
            FuncInst::Internal(func) => self.invoke_internal(func),
            FuncInst::External(func) => self.invoke_external(func),
        }
    }
}

// keep the top `arity` values and drop everything above the label's stack pointer
fn unwind(stack: &mut Vec<Value>, sp: usize, arity: usize) -> Result<()> {
    let top = stack
        .len()
        .checked_sub(arity)
        .filter(|top| *top >= sp)
        .context(Error::StackPopError)?;
    let results = stack.split_off(top);
    stack.truncate(sp);
    stack.extend(results);
    Ok(())
}

fn execute_block(runtime: &mut Runtime, block: &Block, body: &[Instruction]) -> Result<State> {
    let sp = runtime.stack.len();
    let state = match execute(runtime, body)? {
        State::Continue => State::Continue,
        State::Return => State::Return,
        State::Break(0) => {
            unwind(&mut runtime.stack, sp, block.block_type.result_count())?;
            State::Continue
        }
        State::Break(level) => State::Break(level - 1),
    };
    Ok(state)
}

fn execute(runtime: &mut Runtime, insts: &[Instruction]) -> Result<State> {
    for inst in insts {
        if !matches!(
            inst,
            Instruction::Block(_) | Instruction::If(_) | Instruction::Loop(_)
        ) {
            trace!("instruction: {:?}", &inst);
        }
        match inst {
            Instruction::Unreachable => bail!(Error::Unreachable),
            Instruction::Nop | Instruction::End => {}
            // NOTE: this instruction will not be executed
            Instruction::Else => {}
            Instruction::Block(block) => match execute_block(runtime, block, &block.then_body)? {
                State::Continue => {}
                state => return Ok(state),
            },
            Instruction::If(block) => {
                let cond: i32 = runtime.stack.pop1()?;
                let body = if cond != 0 {
                    &block.then_body
                } else {
                    &block.else_body
                };
                match execute_block(runtime, block, body)? {
                    State::Continue => {}
                    state => return Ok(state),
                }
            }
            Instruction::Loop(block) => {
                let sp = runtime.stack.len();
                loop {
                    match execute(runtime, &block.then_body)? {
                        // branch to a loop label restarts the loop
                        State::Break(0) => {
                            runtime.stack.truncate(sp);
                        }
                        State::Continue => break,
                        State::Return => return Ok(State::Return),
                        State::Break(level) => return Ok(State::Break(level - 1)),
                    }
                }
            }
            Instruction::Br(level) => {
                return Ok(State::Break(*level as usize));
            }
            Instruction::BrIf(level) => {
                let value = runtime.stack.pop_value()?;
                if value.is_true() {
                    return Ok(State::Break(*level as usize));
                }
            }
            Instruction::BrTable(label_idxs, default_idx) => {
                let idx: i32 = runtime.stack.pop1()?;
                let level = label_idxs
                    .get(idx as u32 as usize)
                    .unwrap_or(default_idx);
                return Ok(State::Break(*level as usize));
            }
            Instruction::Return => {
                return Ok(State::Return);
            }
            Instruction::Call(idx) => {
                if let Some(value) = runtime.invoke_by_idx(*idx as usize)? {
                    runtime.stack.push(value);
                }
            }
            Instruction::Drop => {
                runtime.stack.pop_value()?;
            }
            Instruction::Select => select(&mut runtime.stack)?,
            Instruction::LocalGet(idx) => {
                let idx = *idx as usize;
                let value = *runtime
                    .current_frame()?
                    .locals
                    .get(idx)
                    .with_context(|| Error::NotFoundLocalVariable(idx))?;
                runtime.stack.push(value);
            }
            Instruction::LocalSet(idx) | Instruction::LocalTee(idx) => {
                let idx = *idx as usize;
                let value = runtime.stack.pop_value()?;
                if matches!(inst, Instruction::LocalTee(_)) {
                    runtime.stack.push(value);
                }
                let local = runtime
                    .current_frame_mut()?
                    .locals
                    .get_mut(idx)
                    .with_context(|| Error::NotFoundLocalVariable(idx))?;
                *local = value;
            }
            Instruction::GlobalGet(idx) => {
                let idx = *idx as usize;
                let global = runtime
                    .store
                    .globals
                    .get(idx)
                    .with_context(|| Error::NotFoundGlobalVariable(idx))?;
                runtime.stack.push(global.value);
            }
            Instruction::GlobalSet(idx) => {
                let idx = *idx as usize;
                let value = runtime.stack.pop_value()?;
                let global = runtime
                    .store
                    .globals
                    .get_mut(idx)
                    .with_context(|| Error::NotFoundGlobalVariable(idx))?;
                if !global.mutability {
                    bail!(Error::ImmutableGlobal(idx));
                }
                global.value = value;
            }
            Instruction::I32Load(arg) => load!(runtime, i32, arg),
            Instruction::I64Load(arg) => load!(runtime, i64, arg),
            Instruction::I32Load8S(arg) => load!(runtime, i8, arg, i32),
            Instruction::I32Load8U(arg) => load!(runtime, u8, arg, i32),
            Instruction::I32Load16S(arg) => load!(runtime, i16, arg, i32),
            Instruction::I32Load16U(arg) => load!(runtime, u16, arg, i32),
            Instruction::I32Store(arg) => store!(runtime, i32, arg),
            Instruction::I64Store(arg) => store!(runtime, i64, arg),
            Instruction::I32Store8(arg) => store!(runtime, i32, arg, i8),
            Instruction::I32Store16(arg) => store!(runtime, i32, arg, i16),
            // NOTE: only support 1 memory now
            Instruction::MemorySize => {
                let size = runtime.store.memory()?.size() as i32;
                runtime.stack.push(size.into());
            }
            Instruction::MemoryGrow => {
                let n: i32 = runtime.stack.pop1()?;
                let memory = runtime.store.memory_mut()?;
                match memory.grow(n as u32)? {
                    Some(size) => runtime.stack.push((size as i32).into()),
                    None => {
                        debug!("memory grow by {n} pages exceeds declared maximum");
                        runtime.stack.push((-1).into());
                    }
                }
            }
            Instruction::I32Const(v) => runtime.stack.push((*v).into()),
            Instruction::I64Const(v) => runtime.stack.push((*v).into()),
            Instruction::I32Eqz => i32_eqz(&mut runtime.stack)?,
            Instruction::I32Eq => i32_eq(&mut runtime.stack)?,
            Instruction::I32Ne => i32_ne(&mut runtime.stack)?,
            Instruction::I32LtS => i32_lt_s(&mut runtime.stack)?,
            Instruction::I32LtU => i32_lt_u(&mut runtime.stack)?,
            Instruction::I32GtS => i32_gt_s(&mut runtime.stack)?,
            Instruction::I32GtU => i32_gt_u(&mut runtime.stack)?,
            Instruction::I32LeS => i32_le_s(&mut runtime.stack)?,
            Instruction::I32LeU => i32_le_u(&mut runtime.stack)?,
            Instruction::I32GeS => i32_ge_s(&mut runtime.stack)?,
            Instruction::I32GeU => i32_ge_u(&mut runtime.stack)?,
            Instruction::I64Eqz => i64_eqz(&mut runtime.stack)?,
            Instruction::I64Eq => i64_eq(&mut runtime.stack)?,
            Instruction::I64Ne => i64_ne(&mut runtime.stack)?,
            Instruction::I32Clz => i32_clz(&mut runtime.stack)?,
            Instruction::I32Ctz => i32_ctz(&mut runtime.stack)?,
            Instruction::I32Popcnt => i32_popcnt(&mut runtime.stack)?,
            Instruction::I32Add => i32_add(&mut runtime.stack)?,
            Instruction::I32Sub => i32_sub(&mut runtime.stack)?,
            Instruction::I32Mul => i32_mul(&mut runtime.stack)?,
            Instruction::I32DivS => i32_div_s(&mut runtime.stack)?,
            Instruction::I32DivU => i32_div_u(&mut runtime.stack)?,
            Instruction::I32RemS => i32_rem_s(&mut runtime.stack)?,
            Instruction::I32RemU => i32_rem_u(&mut runtime.stack)?,
            Instruction::I32And => i32_and(&mut runtime.stack)?,
            Instruction::I32Or => i32_or(&mut runtime.stack)?,
            Instruction::I32Xor => i32_xor(&mut runtime.stack)?,
            Instruction::I32Shl => i32_shl(&mut runtime.stack)?,
            Instruction::I32ShrS => i32_shr_s(&mut runtime.stack)?,
            Instruction::I32ShrU => i32_shr_u(&mut runtime.stack)?,
            Instruction::I32Rotl => i32_rotl(&mut runtime.stack)?,
            Instruction::I32Rotr => i32_rotr(&mut runtime.stack)?,
            Instruction::I64Add => i64_add(&mut runtime.stack)?,
            Instruction::I64Sub => i64_sub(&mut runtime.stack)?,
            Instruction::I64Mul => i64_mul(&mut runtime.stack)?,
            Instruction::I32WrapI64 => i32_wrap_i64(&mut runtime.stack)?,
            Instruction::I64ExtendI32S => i64_extend_i32_s(&mut runtime.stack)?,
            Instruction::I64ExtendI32U => i64_extend_i32_u(&mut runtime.stack)?,
        };
    }
    Ok(State::Continue)
}

#[cfg(test)]
mod test {
    use super::{Runtime, Value};
    use crate::execution::importer::Importer;
    use crate::execution::module::ExternalFuncInst;
    use crate::execution::store::Store;
    use anyhow::{bail, Context, Result};
    use std::cell::Cell;
    use std::rc::Rc;
    use pretty_assertions::assert_eq;

    fn runtime() -> Result<Runtime> {
        let wat_code = include_str!("./fixtures/invoke.wat");
        let wasm = wat::parse_str(wat_code)?;
        Runtime::from_bytes(wasm, vec![])
    }

    #[test]
    fn invoke() -> Result<()> {
        let mut runtime = runtime()?;

        let tests = [
            ("add", vec![10, 10], 20),
            ("call", vec![3, 4], 7),
            ("fib", vec![10], 55),
            ("while", vec![5], 120),
            ("return", vec![], 15),
            ("br-nested", vec![], 1),
            ("singleton", vec![0], 22),
            ("singleton", vec![1], 20),
            ("singleton", vec![7], 20),
            ("select", vec![1], 10),
            ("select", vec![0], 20),
            ("i32.load", vec![], 1684234849),
            ("load8", vec![], 254),
            ("memsize", vec![], 1),
            ("div", vec![-7, 2], -3),
        ];

        for test in tests.into_iter() {
            let args = test.1.into_iter().map(Value::from).collect();
            let result = runtime.call(test.0, args)?;
            assert_eq!(
                result.context("no return value")?,
                Value::from(test.2),
                "func {} fail",
                test.0
            );
        }

        assert_eq!(
            runtime.call("i64.load", vec![])?,
            Some(Value::I64(0x6867666564636261))
        );
        assert_eq!(runtime.call("if_else_empty", vec![])?, None);
        Ok(())
    }

    #[test]
    fn globals_persist_between_calls() -> Result<()> {
        let mut runtime = runtime()?;
        assert_eq!(runtime.call("tick", vec![])?, Some(Value::I32(3)));
        assert_eq!(runtime.call("tick", vec![])?, Some(Value::I32(6)));
        Ok(())
    }

    #[test]
    fn memory_grow_respects_max() -> Result<()> {
        let mut runtime = runtime()?;
        assert_eq!(runtime.call("grow", vec![Value::I32(1)])?, Some(Value::I32(1)));
        assert_eq!(runtime.call("grow", vec![Value::I32(1)])?, Some(Value::I32(-1)));
        assert_eq!(runtime.call("memsize", vec![])?, Some(Value::I32(2)));
        Ok(())
    }

    #[test]
    fn traps_leave_runtime_usable() -> Result<()> {
        let mut runtime = runtime()?;

        let err = runtime.call("trap", vec![]).unwrap_err();
        assert_eq!(err.to_string(), "unreachable");

        let err = runtime
            .call("div", vec![Value::I32(1), Value::I32(0)])
            .unwrap_err();
        assert_eq!(err.to_string(), "integer divide by zero");

        let err = runtime.call("oob", vec![]).unwrap_err();
        assert!(err.to_string().starts_with("out of bounds memory access"));

        let err = runtime.call("recurse", vec![]).unwrap_err();
        assert_eq!(err.to_string(), "call stack exhausted");

        assert!(runtime.stack.is_empty());
        assert!(runtime.call_stack.is_empty());
        assert_eq!(
            runtime.call("add", vec![Value::I32(1), Value::I32(2)])?,
            Some(Value::I32(3))
        );
        Ok(())
    }

    #[test]
    fn call_checks_signature() -> Result<()> {
        let mut runtime = runtime()?;

        let err = runtime.call("add", vec![Value::I32(1)]).unwrap_err();
        assert_eq!(err.to_string(), "function expects 2 arguments, but got 1");

        let err = runtime
            .call("add", vec![Value::I32(1), Value::I64(2)])
            .unwrap_err();
        assert_eq!(err.to_string(), "argument type mismatch at index 1");

        let err = runtime.call("missing", vec![]).unwrap_err();
        assert_eq!(err.to_string(), "not found exported function by name: missing");
        Ok(())
    }

    #[test]
    fn start_function_runs_on_instantiate() -> Result<()> {
        let wasm = wat::parse_str(
            r#"
(module
  (global $ready (mut i32) (i32.const 0))
  (func $init (global.set $ready (i32.const 42)))
  (func (export "ready") (result i32) (global.get $ready))
  (start $init))
            "#,
        )?;
        let mut runtime = Runtime::from_bytes(wasm, vec![])?;
        assert_eq!(runtime.call("ready", vec![])?, Some(Value::I32(42)));
        Ok(())
    }

    #[test]
    fn unresolved_import() -> Result<()> {
        let wasm = wat::parse_str(r#"(module (import "env" "log" (func (param i32))))"#)?;
        let err = Runtime::from_bytes(wasm, vec![]).err().context("expected error")?;
        assert_eq!(err.to_string(), "not found import module: env");
        Ok(())
    }

    #[test]
    fn memory_grow_past_host_limit_traps() -> Result<()> {
        let wasm = wat::parse_str(
            r#"
(module
  (memory 1)
  (func (export "grow") (param i32) (result i32)
    (memory.grow (local.get 0)))
  (func (export "memsize") (result i32)
    (memory.size)))
            "#,
        )?;
        let mut runtime = Runtime::from_bytes(wasm, vec![])?;

        let err = runtime.call("grow", vec![Value::I32(2048)]).unwrap_err();
        assert!(err.to_string().starts_with("memory limit exceeded"));
        assert_eq!(runtime.call("memsize", vec![])?, Some(Value::I32(1)));
        assert_eq!(runtime.call("grow", vec![Value::I32(1)])?, Some(Value::I32(1)));
        Ok(())
    }

    #[test]
    fn initial_memory_past_host_limit_is_rejected() -> Result<()> {
        let wasm = wat::parse_str("(module (memory 2048))")?;
        let err = Runtime::from_bytes(wasm, vec![]).err().context("expected error")?;
        assert!(err.to_string().starts_with("memory limit exceeded"));
        Ok(())
    }

    struct Flushing {
        name: &'static str,
        fail: bool,
        finalized: Rc<Cell<usize>>,
    }

    impl Importer for Flushing {
        fn name(&self) -> &str {
            self.name
        }

        fn invoke(
            &self,
            _store: &mut Store,
            _func: &ExternalFuncInst,
            _args: Vec<Value>,
        ) -> Result<Option<Value>> {
            Ok(None)
        }

        fn finalize(&self) -> Result<()> {
            self.finalized.set(self.finalized.get() + 1);
            if self.fail {
                bail!("disk full");
            }
            Ok(())
        }
    }

    #[test]
    fn finalize_reaches_every_importer_after_a_failure() -> Result<()> {
        let finalized = Rc::new(Cell::new(0));
        let imports: Vec<Box<dyn Importer>> = ["a", "b", "c"]
            .into_iter()
            .map(|name| {
                Box::new(Flushing {
                    name,
                    fail: name == "b",
                    finalized: Rc::clone(&finalized),
                }) as Box<dyn Importer>
            })
            .collect();
        let wasm = wat::parse_str("(module)")?;
        let mut runtime = Runtime::from_bytes(wasm, imports)?;

        let err = runtime.finalize().unwrap_err();
        assert_eq!(format!("{err:#}"), "failed to finalize b: disk full");
        assert_eq!(finalized.get(), 3);
        Ok(())
    }
}
