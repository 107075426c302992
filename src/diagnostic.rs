//! Rendering an [`Error`](crate::error::Error) for a human reader.
//!
//! Unlike a source-level compiler diagnostic, the VM never sees source text
//! or line numbers — only a byte offset into the code vector and, when the
//! error occurred inside a call, the name of the active function. Diagnostic
//! rendering is offset-based rather than line-based for that reason (§7,
//! §9 "Diagnostics").

use std::fmt;

use crate::error::Error;

/// A rendered error, suitable for printing to a CLI embedder's stderr.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub kind: String,
    pub message: String,
    pub function_name: Option<String>,
    pub offset: Option<u32>,
}

impl Diagnostic {
    /// Build a diagnostic from a runtime error and the dispatch position
    /// where it was caught.
    pub fn from_error(err: &Error, function_name: Option<String>, offset: Option<u32>) -> Self {
        Diagnostic {
            kind: err.kind_name().to_string(),
            message: message_of(err),
            function_name,
            offset,
        }
    }
}

fn message_of(err: &Error) -> String {
    match err {
        Error::Raised { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error[{}]: {}", self.kind, self.message)?;
        match (&self.function_name, self.offset) {
            (Some(name), Some(offset)) => write!(f, " (in `{}` at offset {})", name, offset),
            (Some(name), None) => write!(f, " (in `{}`)", name),
            (None, Some(offset)) => write!(f, " (at offset {})", offset),
            (None, None) => Ok(()),
        }
    }
}
