//! The instruction dispatcher (§4): the fetch/decode/execute loop, call-frame
//! management with tail-call elision, and block-stack unwinding.
//!
//! This module is the only place that mutates runtime state. `bytecode`
//! decodes, `operators` and `builtins` compute, `image` loads — `Vm` is where
//! all of it gets driven one instruction at a time.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::builtins::call_builtin;
use crate::bytecode::{Op, decode_instruction};
use crate::capability::{FileTable, Filesystem};
use crate::diagnostic::Diagnostic;
use crate::error::{Error, ErrorKind};
use crate::image::Image;
use crate::operators::{self, OrderOp};
use crate::value::Value;

/// Resource limits enforced during dispatch (§5, §9). `None` means
/// unlimited. Checked once per instruction and once per `CALL`.
#[derive(Debug, Clone, Default)]
pub struct Limits {
    pub max_instructions: Option<u64>,
    pub max_recursion_depth: Option<usize>,
}

/// A call-frame activation record (§3.3). `name` is carried only so that a
/// `Diagnostic` produced while this frame is active can report which
/// function the error happened in (§7); it plays no role in dispatch.
struct Frame {
    name: String,
    locals: HashMap<String, Value>,
    return_pc: usize,
    caller_stack_depth: usize,
}

/// An installed exception handler (§3.3, §4.4).
struct Block {
    handler_pc: usize,
    operand_depth: usize,
    frame_depth: usize,
}

/// What's left once dispatch halts or falls off the end of the code vector.
pub struct RunOutcome {
    pub stdout: Vec<String>,
    pub return_value: Value,
    pub instructions_executed: u64,
    /// One entry per error caught and handled by a `SETUP_EXCEPT` block
    /// during this run (§6.2, §7). Empty for a run that never raised.
    pub diagnostics: Vec<Diagnostic>,
}

/// The bytecode dispatcher. Holds every piece of mutable evaluation state
/// (§3.3): the operand stack, call-frame stack, block stack, globals, and
/// program counter, plus the VM-scoped open-file table.
pub struct Vm<'a> {
    image: &'a Image,
    stack: Vec<Value>,
    frames: Vec<Frame>,
    blocks: Vec<Block>,
    globals: Rc<RefCell<HashMap<String, Value>>>,
    pc: usize,
    stdout: Vec<String>,
    files: FileTable,
    fs: &'a dyn Filesystem,
    limits: Limits,
    instructions_executed: u64,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> Vm<'a> {
    /// Construct a VM ready to run from `image`'s entry offset. `args`
    /// seeds the special `args` global (§3.3).
    pub fn new(image: &'a Image, args: Vec<Value>, fs: &'a dyn Filesystem, limits: Limits) -> Self {
        let mut globals = HashMap::new();
        globals.insert("args".to_string(), Value::new_list(args));
        Vm {
            image,
            stack: Vec::new(),
            frames: Vec::new(),
            blocks: Vec::new(),
            globals: Rc::new(RefCell::new(globals)),
            pc: image.entry_offset as usize,
            stdout: Vec::new(),
            files: FileTable::new(),
            fs,
            limits,
            instructions_executed: 0,
            diagnostics: Vec::new(),
        }
    }

    /// Drive the dispatch loop to completion: normal halt, an uncaught
    /// error, or a resource limit. Consumes the VM — it is not meant to be
    /// reused after a full run (an embedder constructs a fresh `Vm` per
    /// `run` call, matching §6.2).
    pub fn run(mut self) -> Result<RunOutcome, Error> {
        loop {
            if self.pc >= self.image.code.len() {
                break;
            }
            match self.step() {
                Ok(true) => break,
                Ok(false) => {}
                Err(err) => {
                    if !err.is_catchable() || !self.unwind(&err) {
                        self.files.flush(self.fs);
                        return Err(err);
                    }
                }
            }
        }
        self.files.flush(self.fs);
        let return_value = self.stack.pop().unwrap_or(Value::None);
        Ok(RunOutcome {
            stdout: self.stdout,
            return_value,
            instructions_executed: self.instructions_executed,
            diagnostics: self.diagnostics,
        })
    }

    /// Execute exactly one instruction. Returns `Ok(true)` on `HALT`.
    fn step(&mut self) -> Result<bool, Error> {
        if let Some(max) = self.limits.max_instructions {
            if self.instructions_executed >= max {
                return Err(Error::ResourceExceeded("instruction budget exceeded".to_string()));
            }
        }
        let (op, next_pc) = decode_instruction(&self.image.code, self.pc)?;
        self.instructions_executed += 1;

        match op {
            Op::PushInt(v) => {
                self.stack.push(Value::Int(v));
                self.pc = next_pc;
            }
            Op::PushStr(kidx) => {
                let s = self.image.const_str(kidx)?.to_string();
                self.stack.push(Value::Str(s));
                self.pc = next_pc;
            }
            Op::PushBool(b) => {
                self.stack.push(Value::Bool(b));
                self.pc = next_pc;
            }
            Op::PushNone => {
                self.stack.push(Value::None);
                self.pc = next_pc;
            }
            Op::Load(kidx) => {
                self.exec_load(kidx)?;
                self.pc = next_pc;
            }
            Op::Store(kidx) => {
                self.exec_store(kidx)?;
                self.pc = next_pc;
            }
            Op::StoreGlobal(kidx) => {
                self.exec_store_global(kidx)?;
                self.pc = next_pc;
            }
            Op::Add => self.binop(next_pc, |a, b| operators::add(a, b))?,
            Op::Sub => self.binop(next_pc, |a, b| operators::sub(a, b))?,
            Op::Mul => self.binop(next_pc, |a, b| operators::mul(a, b))?,
            Op::Div => self.binop(next_pc, |a, b| operators::div(a, b))?,
            Op::Mod => self.binop(next_pc, |a, b| operators::modulo(a, b))?,
            Op::BAnd => self.binop(next_pc, |a, b| operators::band(a, b))?,
            Op::BOr => self.binop(next_pc, |a, b| operators::bor(a, b))?,
            Op::BXor => self.binop(next_pc, |a, b| operators::bxor(a, b))?,
            Op::Shl => self.binop(next_pc, |a, b| operators::shl(a, b))?,
            Op::Shr => self.binop(next_pc, |a, b| operators::shr(a, b))?,
            Op::BNot => {
                let a = self.pop()?;
                self.stack.push(operators::bnot(&a)?);
                self.pc = next_pc;
            }
            Op::Eq => {
                let (a, b) = self.pop_pair()?;
                self.stack.push(Value::Bool(a == b));
                self.pc = next_pc;
            }
            Op::Ne => {
                let (a, b) = self.pop_pair()?;
                self.stack.push(Value::Bool(a != b));
                self.pc = next_pc;
            }
            Op::Lt => self.order_op(next_pc, OrderOp::Lt)?,
            Op::Le => self.order_op(next_pc, OrderOp::Le)?,
            Op::Gt => self.order_op(next_pc, OrderOp::Gt)?,
            Op::Ge => self.order_op(next_pc, OrderOp::Ge)?,
            Op::Not => {
                let v = self.pop()?;
                self.stack.push(Value::Bool(!v.is_truthy()));
                self.pc = next_pc;
            }
            Op::BuildList(n) => {
                self.exec_build_list(n)?;
                self.pc = next_pc;
            }
            Op::BuildDict(n) => {
                self.exec_build_dict(n)?;
                self.pc = next_pc;
            }
            Op::Index => {
                let (target, key) = self.pop2()?;
                let value = index_get(&target, &key)?;
                self.stack.push(value);
                self.pc = next_pc;
            }
            Op::Slice => {
                let (target, start, end) = self.pop3()?;
                let value = slice_get(&target, &start, &end)?;
                self.stack.push(value);
                self.pc = next_pc;
            }
            Op::IndexSet => {
                let (target, key, value) = self.pop3()?;
                index_set(&target, &key, value)?;
                self.pc = next_pc;
            }
            Op::Attr(kidx) => {
                let name = self.image.const_str(kidx)?.to_string();
                let target = self.pop()?;
                let value = index_get(&target, &Value::Str(name))?;
                self.stack.push(value);
                self.pc = next_pc;
            }
            Op::AttrSet(kidx) => {
                let name = self.image.const_str(kidx)?.to_string();
                let (target, value) = self.pop2()?;
                index_set(&target, &Value::Str(name), value)?;
                self.pc = next_pc;
            }
            Op::Jmp(target) => {
                self.pc = target as usize;
            }
            Op::JmpIfFalse(target) => {
                let v = self.pop()?;
                self.pc = if v.is_truthy() { next_pc } else { target as usize };
            }
            Op::Call(fidx, argc) => self.exec_call(fidx, argc, next_pc)?,
            Op::TCall(fidx, argc) => self.exec_tcall(fidx, argc)?,
            Op::Return => self.exec_return()?,
            Op::Halt => return Ok(true),
            Op::SetupExcept(target) => {
                self.blocks.push(Block {
                    handler_pc: target as usize,
                    operand_depth: self.stack.len(),
                    frame_depth: self.frames.len(),
                });
                self.pc = next_pc;
            }
            Op::PopBlock => {
                self.blocks
                    .pop()
                    .ok_or_else(|| Error::VmInvariant("POP_BLOCK with an empty block stack".to_string()))?;
                self.pc = next_pc;
            }
            Op::Raise(kind) => {
                let message = self.pop()?;
                return Err(Error::raised(kind, message.stringify()));
            }
            Op::Assert => {
                let v = self.pop()?;
                if !v.is_truthy() {
                    return Err(Error::raised(ErrorKind::Assertion, "assertion failed"));
                }
                self.pc = next_pc;
            }
            Op::Emit => {
                let v = self.pop()?;
                self.stdout.push(v.stringify());
                self.pc = next_pc;
            }
            Op::Builtin(name_kidx, argc) => {
                self.exec_builtin(name_kidx, argc)?;
                self.pc = next_pc;
            }
        }
        Ok(false)
    }

    fn pop(&mut self) -> Result<Value, Error> {
        self.stack
            .pop()
            .ok_or_else(|| Error::VmInvariant("operand stack underflow".to_string()))
    }

    /// Pops two values in `ADD`/`SUB`/…'s documented order: `b` then `a`,
    /// returned as `(a, b)` so callers read naturally as `op(a, b)`.
    fn pop_pair(&mut self) -> Result<(Value, Value), Error> {
        let b = self.pop()?;
        let a = self.pop()?;
        Ok((a, b))
    }

    /// Pops two values preserving push order: `(first_pushed, second_pushed)`.
    fn pop2(&mut self) -> Result<(Value, Value), Error> {
        if self.stack.len() < 2 {
            return Err(Error::VmInvariant("operand stack underflow".to_string()));
        }
        let base = self.stack.len() - 2;
        let mut items = self.stack.split_off(base);
        let second = items.pop().unwrap();
        let first = items.pop().unwrap();
        Ok((first, second))
    }

    /// Pops three values preserving push order.
    fn pop3(&mut self) -> Result<(Value, Value, Value), Error> {
        if self.stack.len() < 3 {
            return Err(Error::VmInvariant("operand stack underflow".to_string()));
        }
        let base = self.stack.len() - 3;
        let mut items = self.stack.split_off(base);
        let third = items.pop().unwrap();
        let second = items.pop().unwrap();
        let first = items.pop().unwrap();
        Ok((first, second, third))
    }

    fn binop(&mut self, next_pc: usize, f: impl FnOnce(&Value, &Value) -> Result<Value, Error>) -> Result<(), Error> {
        let (a, b) = self.pop_pair()?;
        self.stack.push(f(&a, &b)?);
        self.pc = next_pc;
        Ok(())
    }

    fn order_op(&mut self, next_pc: usize, op: OrderOp) -> Result<(), Error> {
        let (a, b) = self.pop_pair()?;
        self.stack.push(Value::Bool(operators::order(op, &a, &b)?));
        self.pc = next_pc;
        Ok(())
    }

    fn exec_load(&mut self, kidx: u16) -> Result<(), Error> {
        let name = self.image.const_str(kidx)?.to_string();
        if let Some(frame) = self.frames.last() {
            if let Some(v) = frame.locals.get(&name) {
                self.stack.push(v.clone());
                return Ok(());
            }
        }
        if let Some(v) = self.globals.borrow().get(&name) {
            self.stack.push(v.clone());
            return Ok(());
        }
        Err(Error::raised(ErrorKind::UndefinedIdent, format!("undefined identifier: {}", name)))
    }

    fn exec_store(&mut self, kidx: u16) -> Result<(), Error> {
        let name = self.image.const_str(kidx)?.to_string();
        let value = self.pop()?;
        if let Some(frame) = self.frames.last_mut() {
            frame.locals.insert(name, value);
        } else {
            self.globals.borrow_mut().insert(name, value);
        }
        Ok(())
    }

    fn exec_store_global(&mut self, kidx: u16) -> Result<(), Error> {
        let name = self.image.const_str(kidx)?.to_string();
        let value = self.pop()?;
        self.globals.borrow_mut().insert(name, value);
        Ok(())
    }

    fn exec_build_list(&mut self, n: u16) -> Result<(), Error> {
        let n = n as usize;
        if self.stack.len() < n {
            return Err(Error::VmInvariant("operand stack underflow on BUILD_LIST".to_string()));
        }
        let base = self.stack.len() - n;
        let items = self.stack.split_off(base);
        self.stack.push(Value::new_list(items));
        Ok(())
    }

    fn exec_build_dict(&mut self, n: u16) -> Result<(), Error> {
        let count = n as usize * 2;
        if self.stack.len() < count {
            return Err(Error::VmInvariant("operand stack underflow on BUILD_DICT".to_string()));
        }
        let base = self.stack.len() - count;
        let items = self.stack.split_off(base);
        let mut pairs = Vec::with_capacity(n as usize);
        for chunk in items.chunks(2) {
            let key = chunk[0]
                .as_str()
                .ok_or_else(|| Error::raised(ErrorKind::Type, "dict key must be Str"))?
                .to_string();
            pairs.push((key, chunk[1].clone()));
        }
        self.stack.push(Value::new_dict(pairs));
        Ok(())
    }

    fn exec_call(&mut self, fidx: u16, argc: u8, return_pc: usize) -> Result<(), Error> {
        if let Some(max) = self.limits.max_recursion_depth {
            if self.frames.len() >= max {
                return Err(Error::ResourceExceeded("call-frame depth exceeded".to_string()));
            }
        }
        let func = self.image.function(fidx)?;
        if argc as usize != func.param_count as usize {
            return Err(Error::raised(
                ErrorKind::Type,
                format!("Function expects {} arguments", func.param_count),
            ));
        }
        let argc = argc as usize;
        if self.stack.len() < argc {
            return Err(Error::VmInvariant("operand stack underflow on CALL".to_string()));
        }
        let caller_stack_depth = self.stack.len() - argc;
        let args = self.stack.split_off(caller_stack_depth);
        let locals = bind_params(&func.local_names, args);
        let name = func.name.clone();

        self.frames.push(Frame {
            name,
            locals,
            return_pc,
            caller_stack_depth,
        });
        self.pc = func.entry_offset as usize;
        Ok(())
    }

    /// `TCALL`: replaces the current frame instead of stacking a new one, so
    /// unbounded tail recursion runs in O(1) call-frame space (§4.3, P3).
    fn exec_tcall(&mut self, fidx: u16, argc: u8) -> Result<(), Error> {
        let func = self.image.function(fidx)?;
        if argc as usize != func.param_count as usize {
            return Err(Error::raised(
                ErrorKind::Type,
                format!("Function expects {} arguments", func.param_count),
            ));
        }
        let argc = argc as usize;
        if self.stack.len() < argc {
            return Err(Error::VmInvariant("operand stack underflow on TCALL".to_string()));
        }
        let base = self.stack.len() - argc;
        let args = self.stack.split_off(base);
        let locals = bind_params(&func.local_names, args);

        let name = func.name.clone();
        let entry_offset = func.entry_offset as usize;
        let frame = self
            .frames
            .last_mut()
            .ok_or_else(|| Error::VmInvariant("TCALL with no active frame".to_string()))?;
        frame.name = name;
        frame.locals = locals;
        self.pc = entry_offset;
        Ok(())
    }

    fn exec_return(&mut self) -> Result<(), Error> {
        let value = self.pop()?;
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| Error::VmInvariant("RETURN with no active frame".to_string()))?;
        self.stack.truncate(frame.caller_stack_depth);
        self.stack.push(value);
        self.pc = frame.return_pc;
        Ok(())
    }

    fn exec_builtin(&mut self, name_kidx: u16, argc: u8) -> Result<(), Error> {
        let name = self.image.const_str(name_kidx)?.to_string();
        let argc = argc as usize;
        if self.stack.len() < argc {
            return Err(Error::VmInvariant("operand stack underflow on BUILTIN".to_string()));
        }
        let base = self.stack.len() - argc;
        let args = self.stack.split_off(base);
        let result = call_builtin(&name, args, &mut self.files, self.fs)?;
        self.stack.push(result);
        Ok(())
    }

    /// Unwinding (§4.4). Returns `false` if the block stack is empty — the
    /// caller then surfaces `err` to the embedder unchanged.
    fn unwind(&mut self, err: &Error) -> bool {
        let Some(block) = self.blocks.pop() else {
            return false;
        };
        let function_name = self.frames.last().map(|f| f.name.clone());
        self.diagnostics
            .push(Diagnostic::from_error(err, function_name, Some(self.pc as u32)));
        self.stack.truncate(block.operand_depth);
        self.frames.truncate(block.frame_depth);
        let error_value = Value::new_dict(vec![
            ("kind".to_string(), Value::Str(err.kind_name().to_string())),
            ("message".to_string(), Value::Str(raised_message(err))),
        ]);
        self.stack.push(error_value);
        self.pc = block.handler_pc;
        true
    }
}

fn raised_message(err: &Error) -> String {
    match err {
        Error::Raised { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

fn bind_params(local_names: &[String], args: Vec<Value>) -> HashMap<String, Value> {
    local_names.iter().cloned().zip(args).collect()
}

/// Only non-negative in-bounds indices are valid; the instruction set has
/// no Python-style negative-index convention to honor.
fn normalize_index(idx: i64, len: usize) -> Option<usize> {
    if idx >= 0 && (idx as usize) < len { Some(idx as usize) } else { None }
}

fn normalize_slice(start: i64, end: i64, len: usize) -> Option<(usize, usize)> {
    if start < 0 || end < 0 {
        return None;
    }
    let (s, e) = (start as usize, end as usize);
    if s > len || e > len || s > e {
        return None;
    }
    Some((s, e))
}

fn index_get(target: &Value, key: &Value) -> Result<Value, Error> {
    match target {
        Value::List(l) => {
            let idx = key
                .as_int()
                .ok_or_else(|| Error::raised(ErrorKind::Type, "list index must be Int"))?;
            let items = l.borrow();
            let i = normalize_index(idx, items.len())
                .ok_or_else(|| Error::raised(ErrorKind::Index, format!("list index {} out of range", idx)))?;
            Ok(items[i].clone())
        }
        Value::Str(s) => {
            let idx = key
                .as_int()
                .ok_or_else(|| Error::raised(ErrorKind::Type, "string index must be Int"))?;
            let chars: Vec<char> = s.chars().collect();
            let i = normalize_index(idx, chars.len())
                .ok_or_else(|| Error::raised(ErrorKind::Index, format!("string index {} out of range", idx)))?;
            Ok(Value::Str(chars[i].to_string()))
        }
        Value::Dict(_) | Value::FrozenDict(_) => {
            let key_str = key
                .as_str()
                .ok_or_else(|| Error::raised(ErrorKind::Type, "dict key must be Str"))?;
            target
                .with_dict_pairs(|pairs| pairs.get(key_str).cloned())
                .flatten()
                .ok_or_else(|| Error::raised(ErrorKind::Key, format!("no such key: {}", key_str)))
        }
        other => Err(Error::raised(ErrorKind::Type, format!("{} is not indexable", other.type_name()))),
    }
}

fn index_set(target: &Value, key: &Value, value: Value) -> Result<(), Error> {
    match target {
        Value::List(l) => {
            let idx = key
                .as_int()
                .ok_or_else(|| Error::raised(ErrorKind::Type, "list index must be Int"))?;
            let mut items = l.borrow_mut();
            let i = normalize_index(idx, items.len())
                .ok_or_else(|| Error::raised(ErrorKind::Index, format!("list index {} out of range", idx)))?;
            items[i] = value;
            Ok(())
        }
        Value::Dict(d) => {
            let key_str = key
                .as_str()
                .ok_or_else(|| Error::raised(ErrorKind::Type, "dict key must be Str"))?;
            d.borrow_mut().insert(key_str.to_string(), value);
            Ok(())
        }
        Value::FrozenDict(_) => Err(Error::raised(ErrorKind::Type, "FrozenDict does not support mutation")),
        other => Err(Error::raised(
            ErrorKind::Type,
            format!("{} does not support item assignment", other.type_name()),
        )),
    }
}

fn slice_get(target: &Value, start: &Value, end: &Value) -> Result<Value, Error> {
    let start = start
        .as_int()
        .ok_or_else(|| Error::raised(ErrorKind::Type, "slice bounds must be Int"))?;
    let end = end
        .as_int()
        .ok_or_else(|| Error::raised(ErrorKind::Type, "slice bounds must be Int"))?;
    match target {
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let (s0, e0) =
                normalize_slice(start, end, chars.len()).ok_or_else(|| Error::raised(ErrorKind::Index, "invalid slice bounds"))?;
            Ok(Value::Str(chars[s0..e0].iter().collect()))
        }
        Value::List(l) => {
            let items = l.borrow();
            let (s0, e0) =
                normalize_slice(start, end, items.len()).ok_or_else(|| Error::raised(ErrorKind::Index, "invalid slice bounds"))?;
            Ok(Value::new_list(items[s0..e0].to_vec()))
        }
        other => Err(Error::raised(ErrorKind::Type, format!("{} is not sliceable", other.type_name()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use crate::bytecode::OpTag;
    use crate::capability::MemoryFilesystem;
    use crate::image::{Constant, FunctionDef};

    /// A tiny in-test assembler: readable opcode emission plus forward-jump
    /// patching, so hand-encoded test programs don't require pre-computing
    /// byte offsets by hand.
    struct Asm {
        code: Vec<u8>,
    }

    impl Asm {
        fn new() -> Self {
            Asm { code: Vec::new() }
        }

        fn op(&mut self, tag: OpTag) -> &mut Self {
            self.code.push(tag as u8);
            self
        }

        fn u8(&mut self, v: u8) -> &mut Self {
            self.code.push(v);
            self
        }

        fn u16(&mut self, v: u16) -> &mut Self {
            self.code.extend_from_slice(&v.to_le_bytes());
            self
        }

        fn i64(&mut self, v: i64) -> &mut Self {
            self.code.extend_from_slice(&v.to_le_bytes());
            self
        }

        fn here(&self) -> u32 {
            self.code.len() as u32
        }

        fn placeholder_u32(&mut self) -> usize {
            let at = self.code.len();
            self.code.extend_from_slice(&0u32.to_le_bytes());
            at
        }

        fn patch_u32(&mut self, at: usize, v: u32) {
            self.code[at..at + 4].copy_from_slice(&v.to_le_bytes());
        }

        fn finish(self) -> Vec<u8> {
            self.code
        }
    }

    fn str_const(constants: &mut Vec<Constant>, s: &str) -> u16 {
        constants.push(Constant::Str(s.to_string()));
        (constants.len() - 1) as u16
    }

    fn run_code(constants: Vec<Constant>, functions: Vec<FunctionDef>, code: Vec<u8>) -> Result<RunOutcome, Error> {
        let image = Image {
            constants,
            functions,
            code,
            entry_offset: 0,
        };
        let fs = MemoryFilesystem::new();
        // Safety for the test harness only: `image` outlives the Vm within
        // this function body, so the borrow below is sound.
        let vm = Vm::new(&image, vec![], &fs, Limits::default());
        vm.run()
    }

    #[test]
    fn arithmetic_and_emit_produces_fourteen() {
        let mut asm = Asm::new();
        asm.op(OpTag::PushInt).i64(2);
        asm.op(OpTag::PushInt).i64(3);
        asm.op(OpTag::PushInt).i64(4);
        asm.op(OpTag::Mul);
        asm.op(OpTag::Add);
        asm.op(OpTag::Emit);
        asm.op(OpTag::Halt);

        let outcome = run_code(vec![], vec![], asm.finish()).unwrap();
        assert_eq!(outcome.stdout, vec!["14".to_string()]);
    }

    #[test]
    fn list_concat_via_add() {
        let mut asm = Asm::new();
        asm.op(OpTag::PushInt).i64(1);
        asm.op(OpTag::PushInt).i64(2);
        asm.op(OpTag::BuildList).u16(2);
        asm.op(OpTag::PushInt).i64(3);
        asm.op(OpTag::BuildList).u16(1);
        asm.op(OpTag::Add);
        asm.op(OpTag::Emit);
        asm.op(OpTag::Halt);

        let outcome = run_code(vec![], vec![], asm.finish()).unwrap();
        assert_eq!(outcome.stdout, vec!["[1, 2, 3]".to_string()]);
    }

    #[test]
    fn division_by_zero_is_uncaught() {
        let mut asm = Asm::new();
        asm.op(OpTag::PushInt).i64(10);
        asm.op(OpTag::PushInt).i64(0);
        asm.op(OpTag::Div);
        asm.op(OpTag::Emit);
        asm.op(OpTag::Halt);

        let err = run_code(vec![], vec![], asm.finish()).unwrap_err();
        assert_eq!(err.kind_name(), "ZeroDivision");
    }

    #[test]
    fn catch_and_recover_reads_the_error_message() {
        let mut constants = Vec::new();
        let bad_k = str_const(&mut constants, "bad");
        let message_k = str_const(&mut constants, "message");

        let mut asm = Asm::new();
        asm.op(OpTag::SetupExcept);
        let patch_at = asm.placeholder_u32();
        asm.op(OpTag::PushStr).u16(bad_k);
        asm.op(OpTag::Raise).u8(ErrorKind::Value as u8);
        let handler = asm.here();
        asm.patch_u32(patch_at, handler);
        asm.op(OpTag::Attr).u16(message_k);
        asm.op(OpTag::Emit);
        asm.op(OpTag::Halt);

        let outcome = run_code(constants, vec![], asm.finish()).unwrap();
        assert_eq!(outcome.stdout, vec!["bad".to_string()]);
        assert_eq!(outcome.diagnostics.len(), 1);
        assert_eq!(outcome.diagnostics[0].kind, "Value");
        assert_eq!(outcome.diagnostics[0].message, "bad");
    }

    #[test]
    fn frozen_dict_mutation_is_a_type_error() {
        let mut constants = Vec::new();
        let a_k = str_const(&mut constants, "a");
        let freeze_k = str_const(&mut constants, "freeze");

        let mut asm = Asm::new();
        asm.op(OpTag::PushStr).u16(a_k);
        asm.op(OpTag::PushInt).i64(1);
        asm.op(OpTag::BuildDict).u16(1);
        asm.op(OpTag::Builtin).u16(freeze_k).u8(1);
        asm.op(OpTag::PushInt).i64(2);
        asm.op(OpTag::AttrSet).u16(a_k);
        asm.op(OpTag::Halt);

        let err = run_code(constants, vec![], asm.finish()).unwrap_err();
        assert_eq!(err.kind_name(), "Type");
    }

    #[test]
    fn tail_call_uses_constant_frame_space() {
        let mut constants = Vec::new();
        let n_k = str_const(&mut constants, "n");

        let mut asm = Asm::new();
        asm.op(OpTag::PushInt).i64(50_000);
        asm.op(OpTag::Call).u16(0).u8(1);
        asm.op(OpTag::Emit);
        asm.op(OpTag::Halt);

        let countdown_entry = asm.here();
        asm.op(OpTag::Load).u16(n_k);
        asm.op(OpTag::PushInt).i64(0);
        asm.op(OpTag::Eq);
        asm.op(OpTag::JmpIfFalse);
        let else_patch = asm.placeholder_u32();
        asm.op(OpTag::PushInt).i64(0);
        asm.op(OpTag::Return);
        let else_target = asm.here();
        asm.patch_u32(else_patch, else_target);
        asm.op(OpTag::Load).u16(n_k);
        asm.op(OpTag::PushInt).i64(1);
        asm.op(OpTag::Sub);
        asm.op(OpTag::TCall).u16(0).u8(1);

        let functions = vec![FunctionDef {
            name: "countdown".to_string(),
            param_count: 1,
            entry_offset: countdown_entry,
            local_names: vec!["n".to_string()],
        }];

        let image = Image {
            constants,
            functions,
            code: asm.finish(),
            entry_offset: 0,
        };
        let fs = MemoryFilesystem::new();
        // A recursion ceiling of 1 would reject this program if TCALL grew
        // the frame stack the way CALL does.
        let limits = Limits {
            max_instructions: None,
            max_recursion_depth: Some(1),
        };
        let vm = Vm::new(&image, vec![], &fs, limits);
        let outcome = vm.run().unwrap();
        assert_eq!(outcome.stdout, vec!["0".to_string()]);
    }

    #[test]
    fn call_then_return_behaves_like_pushing_the_value() {
        let mut constants = Vec::new();
        let x_k = str_const(&mut constants, "x");

        let mut asm = Asm::new();
        asm.op(OpTag::PushInt).i64(41);
        asm.op(OpTag::Call).u16(0).u8(1);
        asm.op(OpTag::Emit);
        asm.op(OpTag::Halt);

        let add_one_entry = asm.here();
        asm.op(OpTag::Load).u16(x_k);
        asm.op(OpTag::PushInt).i64(1);
        asm.op(OpTag::Add);
        asm.op(OpTag::Return);

        let functions = vec![FunctionDef {
            name: "add_one".to_string(),
            param_count: 1,
            entry_offset: add_one_entry,
            local_names: vec!["x".to_string()],
        }];

        let outcome = run_code(constants, functions, asm.finish()).unwrap();
        assert_eq!(outcome.stdout, vec!["42".to_string()]);
    }
}
