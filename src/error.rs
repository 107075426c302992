//! The VM's error taxonomy.
//!
//! Errors come in two flavors, distinguished operationally rather than at
//! the type level so that `?` composes across the whole crate: *catchable*
//! kinds, which the dispatcher hands to `SETUP_EXCEPT` unwinding (§4.4 of the
//! spec), and *fatal* kinds, which abort the dispatch loop outright.

use std::fmt;

use thiserror::Error;

/// The catchable error kinds an OMG program can `RAISE` and trap with
/// `SETUP_EXCEPT`. The discriminants match the `RAISE <kind>` operand byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, num_enum::TryFromPrimitive)]
#[repr(u8)]
pub enum ErrorKind {
    Generic = 0,
    Syntax = 1,
    Type = 2,
    UndefinedIdent = 3,
    Value = 4,
    ModuleImport = 5,
    Assertion = 6,
    Index = 7,
    Key = 8,
    ZeroDivision = 9,
    /// Accepted as a `RAISE` operand (so a program can construct it), but
    /// never catchable — see `Error::is_catchable`.
    VmInvariant = 255,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Generic => "Generic",
            ErrorKind::Syntax => "Syntax",
            ErrorKind::Type => "Type",
            ErrorKind::UndefinedIdent => "UndefinedIdent",
            ErrorKind::Value => "Value",
            ErrorKind::ModuleImport => "ModuleImport",
            ErrorKind::Assertion => "Assertion",
            ErrorKind::Index => "Index",
            ErrorKind::Key => "Key",
            ErrorKind::ZeroDivision => "ZeroDivision",
            ErrorKind::VmInvariant => "VmInvariant",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the loader rejected an image. Load-time only; never raised from
/// running OMG code.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ImageError {
    #[error("bad magic number")]
    BadMagic,
    #[error("unsupported image version {0}")]
    UnsupportedVersion(u16),
    #[error("image truncated while reading {0}")]
    Truncated(&'static str),
    #[error("constant pool index {0} out of range")]
    BadConstantIndex(u32),
    #[error("invalid constant tag {0}")]
    BadConstantTag(u8),
    #[error("invalid opcode byte {0:#x} at offset {1}")]
    InvalidOpcode(u8, u32),
    #[error("instruction at offset {0} decodes past the end of the code vector")]
    TruncatedInstruction(u32),
    #[error("jump target {0} does not address the start of an instruction")]
    BadJumpTarget(u32),
    #[error("function table index {0} out of range")]
    BadFunctionIndex(u16),
    #[error("function entry offset {0} does not address the start of an instruction")]
    BadEntryOffset(u32),
    #[error("string constant is not valid UTF-8")]
    InvalidUtf8,
    #[error("a legacy boolean-push opcode is missing its operand byte")]
    TruncatedLegacyBool,
}

/// A runtime error: either catchable OMG-level error or a fatal VM/resource
/// failure.
#[derive(Debug, Error, Clone)]
pub enum Error {
    /// A catchable error raised explicitly or by an instruction handler.
    #[error("{kind}: {message}")]
    Raised { kind: ErrorKind, message: String },

    /// A violated VM invariant: stack underflow, a corrupt frame, or a
    /// runtime decode failure despite load-time verification. Never
    /// catchable.
    #[error("VM invariant violated: {0}")]
    VmInvariant(String),

    /// Failure loading an image, surfaced to the embedder before any
    /// dispatch occurs.
    #[error("image load failed: {0}")]
    Image(#[from] ImageError),

    /// The embedder-configured instruction budget or recursion ceiling was
    /// exceeded.
    #[error("resource limit exceeded: {0}")]
    ResourceExceeded(String),

    /// A host filesystem operation performed by a file builtin failed.
    #[error("I/O error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn raised(kind: ErrorKind, message: impl Into<String>) -> Error {
        Error::Raised {
            kind,
            message: message.into(),
        }
    }

    /// Whether this error is subject to `SETUP_EXCEPT` unwinding (§4.4) or
    /// propagates straight to the embedder.
    pub fn is_catchable(&self) -> bool {
        match self {
            Error::Raised { kind, .. } => *kind != ErrorKind::VmInvariant,
            Error::VmInvariant(_) | Error::Image(_) | Error::ResourceExceeded(_) => false,
            Error::Io(_) => true,
        }
    }

    /// The kind tag used to build the error Dict pushed by unwinding
    /// (`{kind: Str, message: Str}`).
    pub fn kind_name(&self) -> &'static str {
        match self {
            Error::Raised { kind, .. } => kind.as_str(),
            Error::VmInvariant(_) => "VmInvariant",
            Error::Image(_) => "ImageError",
            Error::ResourceExceeded(_) => "ResourceExceeded",
            Error::Io(_) => "Generic",
        }
    }
}
