//! Native code generation
//!
//! Translates [`FunctionIr`](crate::ir::FunctionIr) to native code through
//! Cranelift. Reflective instructions lower to calls into the host API in
//! [`runtime`], with a fault check after every call so a faulting macro bails
//! out instead of crashing the host.

mod backend;
mod code;
pub mod runtime;

pub use backend::JitBackend;
pub use code::CompiledCode;

use std::fmt;

use crate::error::CompileError;

/// Code generation error
#[derive(Debug, Clone)]
pub enum JitError {
    /// Cranelift settings, declaration, or compilation failed
    CompilationFailed(String),
    /// The IR asks for a value width the ISA cannot hold
    UnsupportedWidth(u16),
    /// Malformed IR reached the backend (unresolved label, missing terminator)
    InvalidIr(String),
}

impl fmt::Display for JitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JitError::CompilationFailed(msg) => write!(f, "JIT compilation failed: {}", msg),
            JitError::UnsupportedWidth(w) => {
                write!(f, "JIT: no machine type for {}-bit integers", w)
            }
            JitError::InvalidIr(msg) => write!(f, "JIT: invalid IR: {}", msg),
        }
    }
}

impl std::error::Error for JitError {}

impl From<JitError> for CompileError {
    fn from(err: JitError) -> Self {
        CompileError::backend(err.to_string())
    }
}
