//! seed: a small stack bytecode VM.
//!
//! A [`bytecode::Module`] is loaded from text or JSON ([`loader`]), checked
//! ([`verify`]) and run by a [`vm::Vm`] that owns a mark-sweep
//! [`heap::Heap`]. [`codegen`] lowers one fixed program shape to AArch64
//! assembly or a Cranelift JIT.

pub mod bytecode;
pub mod codegen;
pub mod heap;
pub mod lexer;
pub mod loader;
pub mod value;
pub mod verify;
pub mod vm;

pub use bytecode::{Function, Instr, Module, Op};
pub use value::Value;
pub use vm::{Outcome, Vm, VmConfig, VmError};

/// Any failure the library can report.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Load(#[from] loader::LoadError),
    #[error(transparent)]
    Vm(#[from] VmError),
    #[error("{} verification error(s):\n{}", .0.len(), render_verify(.0))]
    Verify(Vec<verify::VerifyError>),
    #[error(transparent)]
    Codegen(#[from] codegen::CodegenError),
    #[error("output error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<Vec<verify::VerifyError>> for Error {
    fn from(errors: Vec<verify::VerifyError>) -> Self {
        Error::Verify(errors)
    }
}

fn render_verify(errors: &[verify::VerifyError]) -> String {
    errors.iter().map(|e| format!("  {e}")).collect::<Vec<_>>().join("\n")
}

pub type Result<T> = std::result::Result<T, Error>;
