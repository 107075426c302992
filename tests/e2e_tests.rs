//! End-to-end scenarios, driven entirely through the public `Engine` façade
//! against hand-assembled `.omgb` images. There is no compiler in this
//! crate, so each scenario assembles its own bytecode.

use omg_vm::{Engine, Limits, Value};
use pretty_assertions::assert_eq;

/// Opcode byte tags, mirrored from the private `bytecode::OpTag` enum since
/// integration tests only see the public surface.
mod op {
    pub const PUSH_INT: u8 = 0;
    pub const PUSH_STR: u8 = 1;
    pub const LOAD: u8 = 4;
    pub const ADD: u8 = 7;
    pub const SUB: u8 = 8;
    pub const MUL: u8 = 9;
    pub const DIV: u8 = 10;
    pub const EQ: u8 = 18;
    pub const BUILD_LIST: u8 = 25;
    pub const BUILD_DICT: u8 = 26;
    pub const ATTR: u8 = 30;
    pub const ATTR_SET: u8 = 31;
    pub const JMP_IF_FALSE: u8 = 33;
    pub const CALL: u8 = 34;
    pub const TCALL: u8 = 35;
    pub const RETURN: u8 = 36;
    pub const HALT: u8 = 37;
    pub const SETUP_EXCEPT: u8 = 38;
    pub const RAISE: u8 = 40;
    pub const EMIT: u8 = 42;
    pub const BUILTIN: u8 = 43;
}

const KIND_VALUE: u8 = 4;

/// Builds a `.omgb` byte image (§6.1) from an assembled code vector, a
/// constant pool, and a function table, so each scenario below reads as a
/// short program rather than a wall of byte-offset arithmetic.
#[derive(Default)]
struct ImageBuilder {
    constants: Vec<ConstEntry>,
    functions: Vec<FuncEntry>,
    code: Vec<u8>,
}

enum ConstEntry {
    Str(String),
}

struct FuncEntry {
    name_kidx: u16,
    param_count: u8,
    entry_offset: u32,
    local_kidxs: Vec<u16>,
}

impl ImageBuilder {
    fn new() -> Self {
        Self::default()
    }

    fn str_const(&mut self, s: &str) -> u16 {
        self.constants.push(ConstEntry::Str(s.to_string()));
        (self.constants.len() - 1) as u16
    }

    fn here(&self) -> u32 {
        self.code.len() as u32
    }

    fn op(&mut self, tag: u8) -> &mut Self {
        self.code.push(tag);
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

    fn placeholder_u32(&mut self) -> usize {
        let at = self.code.len();
        self.code.extend_from_slice(&0u32.to_le_bytes());
        at
    }

    fn patch_u32(&mut self, at: usize, v: u32) {
        self.code[at..at + 4].copy_from_slice(&v.to_le_bytes());
    }

    fn declare_function(&mut self, name: &str, param_names: &[&str], entry_offset: u32) {
        let name_kidx = self.str_const(name);
        let local_kidxs = param_names.iter().map(|p| self.str_const(p)).collect();
        self.functions.push(FuncEntry {
            name_kidx,
            param_count: param_names.len() as u8,
            entry_offset,
            local_kidxs,
        });
    }

    fn build(self, entry_offset: u32) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"OMGB");
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes());

        bytes.extend_from_slice(&(self.constants.len() as u32).to_le_bytes());
        for c in &self.constants {
            match c {
                ConstEntry::Str(s) => {
                    bytes.push(1);
                    bytes.extend_from_slice(&(s.len() as u32).to_le_bytes());
                    bytes.extend_from_slice(s.as_bytes());
                }
            }
        }

        bytes.extend_from_slice(&(self.functions.len() as u32).to_le_bytes());
        for f in &self.functions {
            bytes.extend_from_slice(&f.name_kidx.to_le_bytes());
            bytes.push(f.param_count);
            bytes.extend_from_slice(&f.entry_offset.to_le_bytes());
            bytes.extend_from_slice(&(f.local_kidxs.len() as u16).to_le_bytes());
            for kidx in &f.local_kidxs {
                bytes.extend_from_slice(&kidx.to_le_bytes());
            }
        }

        bytes.extend_from_slice(&(self.code.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&self.code);
        bytes.extend_from_slice(&entry_offset.to_le_bytes());
        bytes
    }
}

#[test]
fn scenario_arithmetic_and_emit() {
    let mut img = ImageBuilder::new();
    img.op(op::PUSH_INT).i64(2);
    img.op(op::PUSH_INT).i64(3);
    img.op(op::PUSH_INT).i64(4);
    img.op(op::MUL);
    img.op(op::ADD);
    img.op(op::EMIT);
    img.op(op::HALT);
    let bytes = img.build(0);

    let engine = Engine::load(&bytes).unwrap();
    let outcome = engine.run(vec![]).unwrap();
    assert_eq!(outcome.stdout, vec!["14".to_string()]);
}

#[test]
fn scenario_tail_recursive_factorial() {
    let mut img = ImageBuilder::new();

    // top level: emit fact(20, 1)
    img.op(op::PUSH_INT).i64(20);
    img.op(op::PUSH_INT).i64(1);
    img.op(op::CALL).u16(0).u8(2);
    img.op(op::EMIT);
    img.op(op::HALT);

    // fact(n, acc): if n == 0 { return acc } else { tcall fact(n - 1, n * acc) }
    let n_k = img.str_const("n");
    let acc_k = img.str_const("acc");
    let entry = img.here();
    img.op(op::LOAD).u16(n_k);
    img.op(op::PUSH_INT).i64(0);
    img.op(op::EQ);
    img.op(op::JMP_IF_FALSE);
    let else_patch = img.placeholder_u32();
    img.op(op::LOAD).u16(acc_k);
    img.op(op::RETURN);
    let else_target = img.here();
    img.patch_u32(else_patch, else_target);
    img.op(op::LOAD).u16(n_k);
    img.op(op::LOAD).u16(acc_k);
    img.op(op::MUL);
    img.op(op::LOAD).u16(n_k);
    img.op(op::PUSH_INT).i64(1);
    img.op(op::SUB);
    img.op(op::TCALL).u16(0).u8(2);

    img.declare_function("fact", &["n", "acc"], entry);
    let bytes = img.build(0);

    let engine = Engine::load(&bytes)
        .unwrap()
        .with_limits(Limits {
            max_instructions: None,
            max_recursion_depth: Some(2),
        });
    let outcome = engine.run(vec![]).unwrap();
    assert_eq!(outcome.stdout, vec!["2432902008176640000".to_string()]);
}

#[test]
fn scenario_catch_and_recover() {
    let mut img = ImageBuilder::new();
    let bad_k = img.str_const("bad");
    let message_k = img.str_const("message");

    img.op(op::SETUP_EXCEPT);
    let patch = img.placeholder_u32();
    img.op(op::PUSH_STR).u16(bad_k);
    img.op(op::RAISE).u8(KIND_VALUE);
    let handler = img.here();
    img.patch_u32(patch, handler);
    img.op(op::ATTR).u16(message_k);
    img.op(op::EMIT);
    img.op(op::HALT);

    let bytes = img.build(0);
    let engine = Engine::load(&bytes).unwrap();
    let outcome = engine.run(vec![]).unwrap();
    assert_eq!(outcome.stdout, vec!["bad".to_string()]);
    assert_eq!(outcome.diagnostics.len(), 1);
    assert_eq!(outcome.diagnostics[0].kind, "Value");
}

#[test]
fn scenario_frozen_dict_rejects_mutation() {
    let mut img = ImageBuilder::new();
    let a_k = img.str_const("a");
    let freeze_k = img.str_const("freeze");

    img.op(op::PUSH_STR).u16(a_k);
    img.op(op::PUSH_INT).i64(1);
    img.op(op::BUILD_DICT).u16(1);
    img.op(op::BUILTIN).u16(freeze_k).u8(1);
    img.op(op::PUSH_INT).i64(2);
    img.op(op::ATTR_SET).u16(a_k);
    img.op(op::HALT);

    let bytes = img.build(0);
    let engine = Engine::load(&bytes).unwrap();
    let err = engine.run(vec![]).unwrap_err();
    assert_eq!(err.kind_name(), "Type");
}

#[test]
fn scenario_division_by_zero_is_uncaught_and_nonzero_exit() {
    let mut img = ImageBuilder::new();
    img.op(op::PUSH_INT).i64(10);
    img.op(op::PUSH_INT).i64(0);
    img.op(op::DIV);
    img.op(op::EMIT);
    img.op(op::HALT);

    let bytes = img.build(0);
    let engine = Engine::load(&bytes).unwrap();
    let err = engine.run(vec![]).unwrap_err();
    assert_eq!(err.kind_name(), "ZeroDivision");
    assert!(err.is_catchable());
}

#[test]
fn scenario_list_concat_via_add() {
    let mut img = ImageBuilder::new();
    img.op(op::PUSH_INT).i64(1);
    img.op(op::PUSH_INT).i64(2);
    img.op(op::BUILD_LIST).u16(2);
    img.op(op::PUSH_INT).i64(3);
    img.op(op::BUILD_LIST).u16(1);
    img.op(op::ADD);
    img.op(op::EMIT);
    img.op(op::HALT);

    let bytes = img.build(0);
    let engine = Engine::load(&bytes).unwrap();
    let outcome = engine.run(vec![]).unwrap();
    assert_eq!(outcome.stdout, vec!["[1, 2, 3]".to_string()]);
}

#[test]
fn args_global_is_seeded_from_the_embedder() {
    let mut img = ImageBuilder::new();
    let args_k = img.str_const("args");
    img.op(op::LOAD).u16(args_k);
    img.op(op::EMIT);
    img.op(op::HALT);

    let bytes = img.build(0);
    let engine = Engine::load(&bytes).unwrap();
    let outcome = engine.run(vec![Value::Str("hello".to_string())]).unwrap();
    assert_eq!(outcome.stdout, vec!["[hello]".to_string()]);
}
