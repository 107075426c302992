//! Arithmetic, bitwise, and comparison operators (§3.1, §4.2).
//!
//! The value model has no `Float` variant, so every arithmetic and bitwise
//! operator other than `ADD`'s string/list coercions is strictly `Int, Int
//! -> Int`; anything else is a `TypeError`. `DIV`/`MOD` truncate toward
//! zero, matching `i64`'s native `/`/`%`, since the spec does not otherwise
//! pin down a rounding mode.

use crate::error::{Error, ErrorKind};
use crate::value::Value;

type OpResult = Result<Value, Error>;

fn type_error(expected: &str, got: &Value) -> Error {
    Error::raised(
        ErrorKind::Type,
        format!("expected {}, got {}", expected, got.type_name()),
    )
}

fn both_ints(left: &Value, right: &Value) -> Result<(i64, i64), Error> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Ok((*a, *b)),
        (Value::Int(_), other) => Err(type_error("Int", other)),
        (other, _) => Err(type_error("Int", other)),
    }
}

pub fn add(left: &Value, right: &Value) -> OpResult {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a + b)),
        (Value::List(a), Value::List(b)) => {
            let mut items = a.borrow().clone();
            items.extend(b.borrow().iter().cloned());
            Ok(Value::new_list(items))
        }
        (Value::Str(a), other) => Ok(Value::Str(format!("{}{}", a, other.stringify()))),
        (other, Value::Str(b)) => Ok(Value::Str(format!("{}{}", other.stringify(), b))),
        _ => Err(type_error("compatible operands for +", right)),
    }
}

pub fn sub(left: &Value, right: &Value) -> OpResult {
    let (a, b) = both_ints(left, right)?;
    Ok(Value::Int(a - b))
}

pub fn mul(left: &Value, right: &Value) -> OpResult {
    let (a, b) = both_ints(left, right)?;
    Ok(Value::Int(a * b))
}

pub fn div(left: &Value, right: &Value) -> OpResult {
    let (a, b) = both_ints(left, right)?;
    if b == 0 {
        return Err(Error::raised(ErrorKind::ZeroDivision, "division by zero"));
    }
    Ok(Value::Int(a / b))
}

pub fn modulo(left: &Value, right: &Value) -> OpResult {
    let (a, b) = both_ints(left, right)?;
    if b == 0 {
        return Err(Error::raised(ErrorKind::ZeroDivision, "modulo by zero"));
    }
    Ok(Value::Int(a % b))
}

pub fn band(left: &Value, right: &Value) -> OpResult {
    let (a, b) = both_ints(left, right)?;
    Ok(Value::Int(a & b))
}

pub fn bor(left: &Value, right: &Value) -> OpResult {
    let (a, b) = both_ints(left, right)?;
    Ok(Value::Int(a | b))
}

pub fn bxor(left: &Value, right: &Value) -> OpResult {
    let (a, b) = both_ints(left, right)?;
    Ok(Value::Int(a ^ b))
}

pub fn shl(left: &Value, right: &Value) -> OpResult {
    let (a, b) = both_ints(left, right)?;
    Ok(Value::Int(a.wrapping_shl(b as u32)))
}

pub fn shr(left: &Value, right: &Value) -> OpResult {
    let (a, b) = both_ints(left, right)?;
    Ok(Value::Int(a.wrapping_shr(b as u32)))
}

pub fn bnot(value: &Value) -> OpResult {
    match value {
        Value::Int(a) => Ok(Value::Int(!a)),
        other => Err(type_error("Int", other)),
    }
}

/// `LT`/`LE`/`GT`/`GE`: defined only on two Ints or two Strs.
pub fn order(op: OrderOp, left: &Value, right: &Value) -> Result<bool, Error> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Ok(op.apply_int(*a, *b)),
        (Value::Str(a), Value::Str(b)) => Ok(op.apply_str(a, b)),
        _ => Err(Error::raised(
            ErrorKind::Type,
            format!(
                "'{}' not supported between {} and {}",
                op.symbol(),
                left.type_name(),
                right.type_name()
            ),
        )),
    }
}

#[derive(Debug, Clone, Copy)]
pub enum OrderOp {
    Lt,
    Le,
    Gt,
    Ge,
}

impl OrderOp {
    fn apply_int(self, a: i64, b: i64) -> bool {
        match self {
            OrderOp::Lt => a < b,
            OrderOp::Le => a <= b,
            OrderOp::Gt => a > b,
            OrderOp::Ge => a >= b,
        }
    }

    fn apply_str(self, a: &str, b: &str) -> bool {
        match self {
            OrderOp::Lt => a < b,
            OrderOp::Le => a <= b,
            OrderOp::Gt => a > b,
            OrderOp::Ge => a >= b,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            OrderOp::Lt => "<",
            OrderOp::Le => "<=",
            OrderOp::Gt => ">",
            OrderOp::Ge => ">=",
        }
    }
}
