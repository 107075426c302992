//! omg-vm — the runtime execution core of the OMG language.
//!
//! This crate is a stack-based bytecode virtual machine: it loads a compact
//! binary program image (`.omgb`), evaluates it under a well-defined
//! operational semantics, manages call frames with tail-call optimization,
//! supports structured exception handling via block unwinding, and
//! dispatches a fixed catalogue of built-in operations.
//!
//! The lexer, parser, and bytecode compiler that *produce* a `.omgb` image
//! are external collaborators — this crate only specifies and consumes the
//! binary container they emit.
//!
//! # Quick start
//!
//! ```
//! use omg_vm::Engine;
//!
//! // PUSH_INT 2; PUSH_INT 3; PUSH_INT 4; MUL; ADD; EMIT; HALT
//! let mut code = vec![0u8];
//! code.extend_from_slice(&2i64.to_le_bytes());
//! code.push(0);
//! code.extend_from_slice(&3i64.to_le_bytes());
//! code.push(0);
//! code.extend_from_slice(&4i64.to_le_bytes());
//! code.push(9); // MUL
//! code.push(7); // ADD
//! code.push(42); // EMIT
//! code.push(37); // HALT
//!
//! let mut bytes = Vec::new();
//! bytes.extend_from_slice(b"OMGB");
//! bytes.extend_from_slice(&1u16.to_le_bytes());
//! bytes.extend_from_slice(&0u16.to_le_bytes());
//! bytes.extend_from_slice(&0u32.to_le_bytes());
//! bytes.extend_from_slice(&0u32.to_le_bytes());
//! bytes.extend_from_slice(&(code.len() as u32).to_le_bytes());
//! bytes.extend_from_slice(&code);
//! bytes.extend_from_slice(&0u32.to_le_bytes());
//!
//! let engine = Engine::load(&bytes).unwrap();
//! let outcome = engine.run(vec![]).unwrap();
//! assert_eq!(outcome.stdout, vec!["14".to_string()]);
//! ```
//!
//! # Value model
//! `Int`, `Str`, `Bool`, `None`, `List`, `Dict`, `FrozenDict`, `FuncRef`. List
//! and Dict are reference-shared; FrozenDict is an immutable snapshot.
//!
//! # Resource limits
//! An embedder may cap the instruction budget and call-frame recursion
//! ceiling via [`Limits`] and [`Engine::with_limits`]; exceeding either is a
//! fatal, uncatchable [`Error::ResourceExceeded`].
//!
//! # Not supported
//! - Compiling source text to bytecode (bring your own compiler)
//! - Multi-threaded execution of a single VM instance
//! - Garbage collection of reference cycles in List/Dict
//! - Source-level debugging or stepping

mod builtins;
mod bytecode;
mod capability;
mod diagnostic;
mod engine;
mod error;
mod image;
mod operators;
mod value;
mod vm;

pub use capability::{Filesystem, MemoryFilesystem, RealFilesystem};
pub use diagnostic::Diagnostic;
pub use engine::{Engine, Limits, RunOutcome};
pub use error::{Error, ErrorKind, ImageError, Result};
pub use image::{Constant, FunctionDef, Image, load_image};
pub use value::Value;
