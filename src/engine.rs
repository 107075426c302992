//! The embedder façade (§6.2): `Engine` loads an image once and runs it
//! under configurable resource [`Limits`], against an embedder-supplied
//! [`Filesystem`] capability.

use crate::capability::{Filesystem, RealFilesystem};
use crate::error::{Error, Result};
use crate::image::{Image, load_image};
use crate::value::Value;
use crate::vm::Vm;

pub use crate::vm::{Limits, RunOutcome};

/// A loaded program, ready to run. Construct with [`Engine::load`].
///
/// # Example
///
/// ```
/// use omg_vm::{Engine, Value};
///
/// // PUSH_INT 42; HALT, wrapped in a minimal `.omgb` header.
/// let mut bytes = Vec::new();
/// bytes.extend_from_slice(b"OMGB");
/// bytes.extend_from_slice(&1u16.to_le_bytes()); // version
/// bytes.extend_from_slice(&0u16.to_le_bytes()); // flags
/// bytes.extend_from_slice(&0u32.to_le_bytes()); // constant pool count
/// bytes.extend_from_slice(&0u32.to_le_bytes()); // function table count
/// let mut code = vec![0u8]; // PushInt opcode tag
/// code.extend_from_slice(&42i64.to_le_bytes());
/// code.push(37); // Halt opcode tag
/// bytes.extend_from_slice(&(code.len() as u32).to_le_bytes());
/// bytes.extend_from_slice(&code);
/// bytes.extend_from_slice(&0u32.to_le_bytes()); // entry offset
///
/// let engine = Engine::load(&bytes).unwrap();
/// let outcome = engine.run(vec![]).unwrap();
/// assert_eq!(outcome.return_value, Value::Int(42));
/// ```
pub struct Engine {
    image: Image,
    fs: Box<dyn Filesystem>,
    limits: Limits,
}

impl Engine {
    /// Load and verify a `.omgb` image (§4.1). Runs against the real
    /// filesystem and with no resource limits until configured otherwise.
    pub fn load(bytes: &[u8]) -> Result<Self> {
        let image = load_image(bytes)?;
        Ok(Engine {
            image,
            fs: Box::new(RealFilesystem),
            limits: Limits::default(),
        })
    }

    /// Replace the filesystem capability file-oriented builtins will use.
    pub fn with_filesystem(mut self, fs: impl Filesystem + 'static) -> Self {
        self.fs = Box::new(fs);
        self
    }

    /// Apply an instruction budget and/or recursion ceiling (§5, §9).
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Run the loaded image from its entry offset, seeding the `args`
    /// global with `args` (§3.3).
    pub fn run(&self, args: Vec<Value>) -> Result<RunOutcome, Error> {
        let vm = Vm::new(&self.image, args, self.fs.as_ref(), self.limits.clone());
        vm.run()
    }
}
