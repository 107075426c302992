//! The built-in dispatch catalogue (§4.5): a single `call_builtin(name,
//! args)` entry point, reachable from the `BUILTIN` opcode and from the
//! `call_builtin` meta-builtin itself.

use std::rc::Rc;

use crate::capability::{FileTable, Filesystem};
use crate::error::{Error, ErrorKind};
use crate::value::Value;

type BResult = Result<Value, Error>;

fn arity_error(name: &str, expected: &str, got: usize) -> Error {
    Error::raised(
        ErrorKind::Generic,
        format!("{}() takes {} argument(s), got {}", name, expected, got),
    )
}

fn type_error(expected: &str, got: &Value) -> Error {
    Error::raised(
        ErrorKind::Type,
        format!("expected {}, got {}", expected, got.type_name()),
    )
}

/// Dispatch a built-in call by name. Shared by `BUILTIN` and by the
/// `call_builtin` meta-builtin, which forwards here after peeling off its
/// own first argument.
pub fn call_builtin(
    name: &str,
    args: Vec<Value>,
    files: &mut FileTable,
    fs: &dyn Filesystem,
) -> BResult {
    match name {
        "length" => length(args),
        "chr" => chr(args),
        "ascii" => ascii(args),
        "hex" => hex(args),
        "binary" => binary(args),
        "freeze" => freeze(args),
        "panic" => panic_builtin(args),
        "raise" => raise_builtin(args),
        "read_file" => read_file(args, fs),
        "file_exists" => file_exists(args, fs),
        "file_open" => file_open(args, files, fs),
        "file_read" => file_read(args, files),
        "file_write" => file_write(args, files),
        "file_close" => file_close(args, files, fs),
        "call_builtin" => call_builtin_meta(args, files, fs),
        other => Err(Error::raised(
            ErrorKind::UndefinedIdent,
            format!("no such builtin: {}", other),
        )),
    }
}

fn length(args: Vec<Value>) -> BResult {
    if args.len() != 1 {
        return Err(arity_error("length", "1", args.len()));
    }
    let n = match &args[0] {
        Value::Str(s) => s.chars().count(),
        Value::List(l) => l.borrow().len(),
        Value::Dict(d) => d.borrow().len(),
        Value::FrozenDict(d) => d.len(),
        other => return Err(type_error("Str, List, Dict, or FrozenDict", other)),
    };
    Ok(Value::Int(n as i64))
}

fn chr(args: Vec<Value>) -> BResult {
    if args.len() != 1 {
        return Err(arity_error("chr", "1", args.len()));
    }
    let n = args[0]
        .as_int()
        .ok_or_else(|| type_error("Int", &args[0]))?;
    if !(0..=0x10FFFF).contains(&n) {
        return Err(Error::raised(
            ErrorKind::Value,
            format!("{} is not a valid codepoint", n),
        ));
    }
    let c = char::from_u32(n as u32)
        .ok_or_else(|| Error::raised(ErrorKind::Value, format!("{} is not a valid codepoint", n)))?;
    Ok(Value::Str(c.to_string()))
}

fn ascii(args: Vec<Value>) -> BResult {
    if args.len() != 1 {
        return Err(arity_error("ascii", "1", args.len()));
    }
    let s = args[0].as_str().ok_or_else(|| type_error("Str", &args[0]))?;
    let mut chars = s.chars();
    let first = chars.next();
    match (first, chars.next()) {
        (Some(c), None) => Ok(Value::Int(c as i64)),
        _ => Err(type_error("a 1-character Str", &args[0])),
    }
}

fn hex(args: Vec<Value>) -> BResult {
    if args.len() != 1 {
        return Err(arity_error("hex", "1", args.len()));
    }
    let n = args[0].as_int().ok_or_else(|| type_error("Int", &args[0]))?;
    if n < 0 {
        Ok(Value::Str(format!("-0x{:x}", -(n as i128))))
    } else {
        Ok(Value::Str(format!("0x{:x}", n)))
    }
}

fn binary(args: Vec<Value>) -> BResult {
    match args.len() {
        1 => {
            let n = args[0].as_int().ok_or_else(|| type_error("Int", &args[0]))?;
            if n < 0 {
                Ok(Value::Str(format!("-{:b}", -(n as i128))))
            } else {
                Ok(Value::Str(format!("{:b}", n)))
            }
        }
        2 => {
            let n = args[0].as_int().ok_or_else(|| type_error("Int", &args[0]))?;
            let w = args[1].as_int().ok_or_else(|| type_error("Int", &args[1]))?;
            if !(0..=63).contains(&w) {
                return Err(Error::raised(ErrorKind::Value, "width out of range"));
            }
            let w = w as u32;
            let mask: u64 = if w == 64 { u64::MAX } else { (1u64 << w) - 1 };
            let masked = (n as u64) & mask;
            Ok(Value::Str(format!("{:0width$b}", masked, width = w as usize)))
        }
        n => Err(arity_error("binary", "1 or 2", n)),
    }
}

fn freeze(args: Vec<Value>) -> BResult {
    if args.len() != 1 {
        return Err(arity_error("freeze", "1", args.len()));
    }
    match &args[0] {
        Value::Dict(d) => Ok(Value::FrozenDict(Rc::new(d.borrow().clone()))),
        Value::FrozenDict(d) => Ok(Value::FrozenDict(d.clone())),
        other => Err(type_error("Dict or FrozenDict", other)),
    }
}

fn panic_builtin(args: Vec<Value>) -> BResult {
    if args.len() != 1 {
        return Err(arity_error("panic", "1", args.len()));
    }
    Err(Error::raised(ErrorKind::Generic, args[0].stringify()))
}

fn raise_builtin(args: Vec<Value>) -> BResult {
    match args.len() {
        1 => Err(Error::raised(ErrorKind::Generic, args[0].stringify())),
        2 => {
            let kind_name = args[0].as_str().ok_or_else(|| type_error("Str", &args[0]))?;
            let kind = kind_from_name(kind_name)
                .ok_or_else(|| Error::raised(ErrorKind::Value, format!("no such error kind: {}", kind_name)))?;
            Err(Error::raised(kind, args[1].stringify()))
        }
        n => Err(arity_error("raise", "1 or 2", n)),
    }
}

fn kind_from_name(name: &str) -> Option<ErrorKind> {
    Some(match name {
        "Generic" => ErrorKind::Generic,
        "Syntax" => ErrorKind::Syntax,
        "Type" => ErrorKind::Type,
        "UndefinedIdent" => ErrorKind::UndefinedIdent,
        "Value" => ErrorKind::Value,
        "ModuleImport" => ErrorKind::ModuleImport,
        "Assertion" => ErrorKind::Assertion,
        "Index" => ErrorKind::Index,
        "Key" => ErrorKind::Key,
        "ZeroDivision" => ErrorKind::ZeroDivision,
        _ => return None,
    })
}

fn io_error(err: std::io::Error) -> Error {
    Error::Io(err.to_string())
}

fn read_file(args: Vec<Value>, fs: &dyn Filesystem) -> BResult {
    if args.len() != 1 {
        return Err(arity_error("read_file", "1", args.len()));
    }
    let path = args[0].as_str().ok_or_else(|| type_error("Str", &args[0]))?;
    let contents = fs.read_to_string(path).map_err(io_error)?;
    Ok(Value::Str(contents))
}

fn file_exists(args: Vec<Value>, fs: &dyn Filesystem) -> BResult {
    if args.len() != 1 {
        return Err(arity_error("file_exists", "1", args.len()));
    }
    let path = args[0].as_str().ok_or_else(|| type_error("Str", &args[0]))?;
    Ok(Value::Bool(fs.exists(path)))
}

fn file_open(args: Vec<Value>, files: &mut FileTable, fs: &dyn Filesystem) -> BResult {
    if args.len() != 2 {
        return Err(arity_error("file_open", "2", args.len()));
    }
    let path = args[0].as_str().ok_or_else(|| type_error("Str", &args[0]))?;
    let mode = args[1].as_str().ok_or_else(|| type_error("Str", &args[1]))?;
    let handle = files.open(fs, path, mode).map_err(io_error)?;
    Ok(Value::Int(handle))
}

fn file_read(args: Vec<Value>, files: &mut FileTable) -> BResult {
    if args.len() != 1 {
        return Err(arity_error("file_read", "1", args.len()));
    }
    let handle = args[0].as_int().ok_or_else(|| type_error("Int", &args[0]))?;
    match files.read(handle) {
        Some(s) => Ok(Value::Str(s)),
        None => Err(Error::raised(ErrorKind::Value, "no such file handle")),
    }
}

fn file_write(args: Vec<Value>, files: &mut FileTable) -> BResult {
    if args.len() != 2 {
        return Err(arity_error("file_write", "2", args.len()));
    }
    let handle = args[0].as_int().ok_or_else(|| type_error("Int", &args[0]))?;
    let data = args[1].as_str().ok_or_else(|| type_error("Str", &args[1]))?;
    match files.write(handle, data) {
        Some(()) => Ok(Value::None),
        None => Err(Error::raised(ErrorKind::Value, "no such writable file handle")),
    }
}

fn file_close(args: Vec<Value>, files: &mut FileTable, fs: &dyn Filesystem) -> BResult {
    if args.len() != 1 {
        return Err(arity_error("file_close", "1", args.len()));
    }
    let handle = args[0].as_int().ok_or_else(|| type_error("Int", &args[0]))?;
    files.close(fs, handle).map_err(io_error)?;
    Ok(Value::None)
}

fn call_builtin_meta(mut args: Vec<Value>, files: &mut FileTable, fs: &dyn Filesystem) -> BResult {
    if args.is_empty() {
        return Err(arity_error("call_builtin", "at least 1", 0));
    }
    let name = args.remove(0);
    let name = name.as_str().ok_or_else(|| type_error("Str", &name))?.to_string();
    call_builtin(&name, args, files, fs)
}
