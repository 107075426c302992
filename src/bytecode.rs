//! The instruction set: opcode byte assignment, the decoded `Op`
//! representation, and the single decoder shared by the loader's
//! verification pass and the dispatcher's fetch step.

use crate::error::{ErrorKind, ImageError};

/// Raw opcode byte tags. `num_enum` gives us a checked `TryFrom<u8>` so the
/// loader can reject an unrecognized byte with `ImageError::InvalidOpcode`
/// instead of panicking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, num_enum::TryFromPrimitive)]
#[repr(u8)]
pub enum OpTag {
    PushInt = 0,
    PushStr = 1,
    PushBool = 2,
    PushNone = 3,
    Load = 4,
    Store = 5,
    StoreGlobal = 6,
    Add = 7,
    Sub = 8,
    Mul = 9,
    Div = 10,
    Mod = 11,
    BAnd = 12,
    BOr = 13,
    BXor = 14,
    Shl = 15,
    Shr = 16,
    BNot = 17,
    Eq = 18,
    Ne = 19,
    Lt = 20,
    Le = 21,
    Gt = 22,
    Ge = 23,
    Not = 24,
    BuildList = 25,
    BuildDict = 26,
    Index = 27,
    Slice = 28,
    IndexSet = 29,
    Attr = 30,
    AttrSet = 31,
    Jmp = 32,
    JmpIfFalse = 33,
    Call = 34,
    TCall = 35,
    Return = 36,
    Halt = 37,
    SetupExcept = 38,
    PopBlock = 39,
    Raise = 40,
    Assert = 41,
    Emit = 42,
    Builtin = 43,
    /// Pre-consolidation `raise generic` with no kind operand.
    LegacyRaiseGeneric = 47,
    LegacyRaiseType = 48,
    LegacyRaiseValue = 49,
    LegacyRaiseIndex = 50,
    LegacyRaiseKey = 51,
}

/// A fully decoded instruction, operands included.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    PushInt(i64),
    PushStr(u16),
    PushBool(bool),
    PushNone,
    Load(u16),
    Store(u16),
    StoreGlobal(u16),
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BAnd,
    BOr,
    BXor,
    Shl,
    Shr,
    BNot,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Not,
    BuildList(u16),
    BuildDict(u16),
    Index,
    Slice,
    IndexSet,
    Attr(u16),
    AttrSet(u16),
    Jmp(u32),
    JmpIfFalse(u32),
    Call(u16, u8),
    TCall(u16, u8),
    Return,
    Halt,
    SetupExcept(u32),
    PopBlock,
    Raise(ErrorKind),
    Assert,
    Emit,
    Builtin(u16, u8),
}

fn read_u8(code: &[u8], pc: usize) -> Result<u8, ImageError> {
    code.get(pc).copied().ok_or(ImageError::TruncatedInstruction(pc as u32))
}

fn read_u16(code: &[u8], pc: usize) -> Result<u16, ImageError> {
    let bytes = code
        .get(pc..pc + 2)
        .ok_or(ImageError::TruncatedInstruction(pc as u32))?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

fn read_u32(code: &[u8], pc: usize) -> Result<u32, ImageError> {
    let bytes = code
        .get(pc..pc + 4)
        .ok_or(ImageError::TruncatedInstruction(pc as u32))?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn read_i64(code: &[u8], pc: usize) -> Result<i64, ImageError> {
    let bytes = code
        .get(pc..pc + 8)
        .ok_or(ImageError::TruncatedInstruction(pc as u32))?;
    Ok(i64::from_le_bytes(bytes.try_into().unwrap()))
}

/// Decode one instruction starting at `pc`, returning it along with the
/// offset of the next instruction. Used both by the loader's two-pass
/// verifier and by the dispatcher's fetch step, so decode bugs can't make
/// the two disagree about instruction boundaries.
pub fn decode_instruction(code: &[u8], pc: usize) -> Result<(Op, usize), ImageError> {
    let opcode = read_u8(code, pc)?;
    let mut at = pc + 1;
    let tag = OpTag::try_from(opcode).map_err(|_| ImageError::InvalidOpcode(opcode, pc as u32))?;

    macro_rules! u16_operand {
        () => {{
            let v = read_u16(code, at)?;
            at += 2;
            v
        }};
    }
    macro_rules! u32_operand {
        () => {{
            let v = read_u32(code, at)?;
            at += 4;
            v
        }};
    }
    macro_rules! u8_operand {
        () => {{
            let v = read_u8(code, at)?;
            at += 1;
            v
        }};
    }

    let op = match tag {
        OpTag::PushInt => {
            let v = read_i64(code, at)?;
            at += 8;
            Op::PushInt(v)
        }
        OpTag::PushStr => Op::PushStr(u16_operand!()),
        OpTag::PushBool => {
            // The loader's verifier treats a missing operand byte here as a
            // load error rather than silently defaulting to `false` (see
            // SPEC_FULL.md's resolved open question on legacy encodings).
            let raw = read_u8(code, at).map_err(|_| ImageError::TruncatedLegacyBool)?;
            at += 1;
            Op::PushBool(raw != 0)
        }
        OpTag::PushNone => Op::PushNone,
        OpTag::Load => Op::Load(u16_operand!()),
        OpTag::Store => Op::Store(u16_operand!()),
        OpTag::StoreGlobal => Op::StoreGlobal(u16_operand!()),
        OpTag::Add => Op::Add,
        OpTag::Sub => Op::Sub,
        OpTag::Mul => Op::Mul,
        OpTag::Div => Op::Div,
        OpTag::Mod => Op::Mod,
        OpTag::BAnd => Op::BAnd,
        OpTag::BOr => Op::BOr,
        OpTag::BXor => Op::BXor,
        OpTag::Shl => Op::Shl,
        OpTag::Shr => Op::Shr,
        OpTag::BNot => Op::BNot,
        OpTag::Eq => Op::Eq,
        OpTag::Ne => Op::Ne,
        OpTag::Lt => Op::Lt,
        OpTag::Le => Op::Le,
        OpTag::Gt => Op::Gt,
        OpTag::Ge => Op::Ge,
        OpTag::Not => Op::Not,
        OpTag::BuildList => Op::BuildList(u16_operand!()),
        OpTag::BuildDict => Op::BuildDict(u16_operand!()),
        OpTag::Index => Op::Index,
        OpTag::Slice => Op::Slice,
        OpTag::IndexSet => Op::IndexSet,
        OpTag::Attr => Op::Attr(u16_operand!()),
        OpTag::AttrSet => Op::AttrSet(u16_operand!()),
        OpTag::Jmp => Op::Jmp(u32_operand!()),
        OpTag::JmpIfFalse => Op::JmpIfFalse(u32_operand!()),
        OpTag::Call => {
            let fidx = u16_operand!();
            let argc = u8_operand!();
            Op::Call(fidx, argc)
        }
        OpTag::TCall => {
            let fidx = u16_operand!();
            let argc = u8_operand!();
            Op::TCall(fidx, argc)
        }
        OpTag::Return => Op::Return,
        OpTag::Halt => Op::Halt,
        OpTag::SetupExcept => Op::SetupExcept(u32_operand!()),
        OpTag::PopBlock => Op::PopBlock,
        OpTag::Raise => {
            let kind_byte = u8_operand!();
            let kind = ErrorKind::try_from(kind_byte)
                .map_err(|_| ImageError::InvalidOpcode(kind_byte, pc as u32))?;
            Op::Raise(kind)
        }
        OpTag::Assert => Op::Assert,
        OpTag::Emit => Op::Emit,
        OpTag::Builtin => {
            let name = u16_operand!();
            let argc = u8_operand!();
            Op::Builtin(name, argc)
        }
        OpTag::LegacyRaiseGeneric => Op::Raise(ErrorKind::Generic),
        OpTag::LegacyRaiseType => Op::Raise(ErrorKind::Type),
        OpTag::LegacyRaiseValue => Op::Raise(ErrorKind::Value),
        OpTag::LegacyRaiseIndex => Op::Raise(ErrorKind::Index),
        OpTag::LegacyRaiseKey => Op::Raise(ErrorKind::Key),
    };

    Ok((op, at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn decodes_push_int() {
        let mut code = vec![OpTag::PushInt as u8];
        code.extend_from_slice(&42i64.to_le_bytes());
        let (op, next) = decode_instruction(&code, 0).unwrap();
        assert_eq!(op, Op::PushInt(42));
        assert_eq!(next, code.len());
    }

    #[test]
    fn rejects_unknown_opcode() {
        let code = vec![200u8];
        let err = decode_instruction(&code, 0).unwrap_err();
        assert_eq!(err, ImageError::InvalidOpcode(200, 0));
    }

    #[test]
    fn legacy_raise_opcode_decodes_to_modern_raise() {
        let code = vec![OpTag::LegacyRaiseValue as u8];
        let (op, _) = decode_instruction(&code, 0).unwrap();
        assert_eq!(op, Op::Raise(ErrorKind::Value));
    }

    #[test]
    fn truncated_legacy_bool_is_rejected() {
        let code = vec![OpTag::PushBool as u8];
        let err = decode_instruction(&code, 0).unwrap_err();
        assert_eq!(err, ImageError::TruncatedLegacyBool);
    }

    #[test]
    fn decodes_call_with_both_operands() {
        let mut code = vec![OpTag::Call as u8];
        code.extend_from_slice(&7u16.to_le_bytes());
        code.push(3);
        let (op, next) = decode_instruction(&code, 0).unwrap();
        assert_eq!(op, Op::Call(7, 3));
        assert_eq!(next, code.len());
    }
}
