//! The loader: decodes a `.omgb` byte sequence (§6.1) into an immutable
//! [`Image`], verifying it in two passes as §4.1 requires.
//!
//! Pass 1 walks the code vector decoding every instruction once, recording
//! the byte offset each one starts at. Pass 2 walks it again checking that
//! every jump target, `SETUP_EXCEPT` handler, and function entry offset
//! lands on one of those recorded starts. Splitting verification this way
//! means a forward jump can be validated without a second decode of the
//! target instruction itself — we only need to know *that* it starts there.

use std::collections::HashSet;

use crate::bytecode::{Op, decode_instruction};
use crate::error::ImageError;

const MAGIC: [u8; 4] = *b"OMGB";
const SUPPORTED_VERSION: u16 = 1;

#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Int(i64),
    Str(String),
}

#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub name: String,
    pub param_count: u8,
    pub entry_offset: u32,
    pub local_names: Vec<String>,
}

/// The immutable, loaded program. Shared read-only across every frame of
/// every VM that runs it.
#[derive(Debug, Clone)]
pub struct Image {
    pub constants: Vec<Constant>,
    pub functions: Vec<FunctionDef>,
    pub code: Vec<u8>,
    pub entry_offset: u32,
}

impl Image {
    pub fn const_str(&self, idx: u16) -> Result<&str, ImageError> {
        match self.constants.get(idx as usize) {
            Some(Constant::Str(s)) => Ok(s),
            Some(Constant::Int(_)) => Err(ImageError::BadConstantTag(0)),
            None => Err(ImageError::BadConstantIndex(idx as u32)),
        }
    }

    pub fn const_int(&self, idx: u16) -> Result<i64, ImageError> {
        match self.constants.get(idx as usize) {
            Some(Constant::Int(i)) => Ok(*i),
            Some(Constant::Str(_)) => Err(ImageError::BadConstantTag(1)),
            None => Err(ImageError::BadConstantIndex(idx as u32)),
        }
    }

    pub fn function(&self, idx: u16) -> Result<&FunctionDef, ImageError> {
        self.functions
            .get(idx as usize)
            .ok_or(ImageError::BadFunctionIndex(idx))
    }
}

/// A bounds-checked cursor over the raw image bytes.
struct Cursor<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Cursor { bytes, offset: 0 }
    }

    fn take(&mut self, n: usize, what: &'static str) -> Result<&'a [u8], ImageError> {
        let end = self
            .offset
            .checked_add(n)
            .ok_or(ImageError::Truncated(what))?;
        let slice = self.bytes.get(self.offset..end).ok_or(ImageError::Truncated(what))?;
        self.offset = end;
        Ok(slice)
    }

    fn u8(&mut self, what: &'static str) -> Result<u8, ImageError> {
        Ok(self.take(1, what)?[0])
    }

    fn u16(&mut self, what: &'static str) -> Result<u16, ImageError> {
        let b = self.take(2, what)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self, what: &'static str) -> Result<u32, ImageError> {
        let b = self.take(4, what)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i64(&mut self, what: &'static str) -> Result<i64, ImageError> {
        let b = self.take(8, what)?;
        Ok(i64::from_le_bytes(b.try_into().unwrap()))
    }

    fn utf8(&mut self, len: usize, what: &'static str) -> Result<String, ImageError> {
        let b = self.take(len, what)?;
        String::from_utf8(b.to_vec()).map_err(|_| ImageError::InvalidUtf8)
    }
}

/// Load and verify a `.omgb` image. See §4.1 and §6.1.
pub fn load_image(bytes: &[u8]) -> Result<Image, ImageError> {
    let mut cur = Cursor::new(bytes);

    let magic = cur.take(4, "magic")?;
    if magic != MAGIC {
        return Err(ImageError::BadMagic);
    }
    let version = cur.u16("version")?;
    if version != SUPPORTED_VERSION {
        return Err(ImageError::UnsupportedVersion(version));
    }
    let _flags = cur.u16("flags")?;

    let constant_count = cur.u32("constant pool count")?;
    let mut constants = Vec::with_capacity(constant_count as usize);
    for _ in 0..constant_count {
        let tag = cur.u8("constant tag")?;
        let constant = match tag {
            0 => Constant::Int(cur.i64("int constant")?),
            1 => {
                let len = cur.u32("string constant length")? as usize;
                Constant::Str(cur.utf8(len, "string constant bytes")?)
            }
            other => return Err(ImageError::BadConstantTag(other)),
        };
        constants.push(constant);
    }

    let str_const = |idx: u16| -> Result<String, ImageError> {
        match constants.get(idx as usize) {
            Some(Constant::Str(s)) => Ok(s.clone()),
            Some(Constant::Int(_)) => Err(ImageError::BadConstantTag(0)),
            None => Err(ImageError::BadConstantIndex(idx as u32)),
        }
    };

    let function_count = cur.u32("function table count")?;
    let mut functions = Vec::with_capacity(function_count as usize);
    for _ in 0..function_count {
        let name_kidx = cur.u16("function name index")?;
        let param_count = cur.u8("function param count")?;
        let entry_offset = cur.u32("function entry offset")?;
        let local_count = cur.u16("function local count")?;
        let mut local_names = Vec::with_capacity(local_count as usize);
        for _ in 0..local_count {
            let local_kidx = cur.u16("local name index")?;
            local_names.push(str_const(local_kidx)?);
        }
        functions.push(FunctionDef {
            name: str_const(name_kidx)?,
            param_count,
            entry_offset,
            local_names,
        });
    }

    let code_len = cur.u32("code length")? as usize;
    let code = cur.take(code_len, "code bytes")?.to_vec();
    let entry_offset = cur.u32("entry offset")?;

    verify_code(&code, &functions, entry_offset)?;

    Ok(Image {
        constants,
        functions,
        code,
        entry_offset,
    })
}

/// Two-pass verification (§4.1): pass 1 indexes instruction starts, pass 2
/// checks every jump target, `SETUP_EXCEPT` handler, and function entry
/// offset against that index.
fn verify_code(code: &[u8], functions: &[FunctionDef], entry_offset: u32) -> Result<(), ImageError> {
    let mut starts = HashSet::new();
    let mut pc = 0usize;
    let mut ops = Vec::new();
    while pc < code.len() {
        starts.insert(pc as u32);
        let (op, next) = decode_instruction(code, pc)?;
        ops.push(op);
        pc = next;
    }
    // An instruction that ends exactly at `code.len()` is a valid jump
    // target (falling off the end behaves as an implicit HALT, §6.1).
    starts.insert(code.len() as u32);

    let check_target = |target: u32| -> Result<(), ImageError> {
        if starts.contains(&target) {
            Ok(())
        } else {
            Err(ImageError::BadJumpTarget(target))
        }
    };

    for op in &ops {
        match op {
            Op::Jmp(target) | Op::JmpIfFalse(target) | Op::SetupExcept(target) => {
                check_target(*target)?;
            }
            Op::Call(fidx, _) | Op::TCall(fidx, _) => {
                if *fidx as usize >= functions.len() {
                    return Err(ImageError::BadFunctionIndex(*fidx));
                }
            }
            _ => {}
        }
    }

    for f in functions {
        if !starts.contains(&f.entry_offset) {
            return Err(ImageError::BadEntryOffset(f.entry_offset));
        }
    }

    if !starts.contains(&entry_offset) {
        return Err(ImageError::BadEntryOffset(entry_offset));
    }

    Ok(())
}
