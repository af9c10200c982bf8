//! JIT compilation error types.
//!
//! A [`CompError`] means the code generator could not lower a construct
//! or version; the caller marks the function/version not-JIT-eligible
//! and the interpreter runs it. Compilation failures are never fatal to
//! the program.

use matlang_core::error::RunError;

/// Errors from the JIT specializer.
#[derive(Debug, thiserror::Error)]
pub enum CompError {
    /// A construct the code generator does not lower; the offending
    /// node's printout is carried for diagnostics.
    #[error("unsupported construct: {construct}\n  at: {node}")]
    Unsupported { construct: String, node: String },

    /// The callee's analyses could not be computed.
    #[error("analysis failed: {0}")]
    AnalysisFailed(RunError),

    /// LLVM API failure (builder errors, verification, pass pipeline,
    /// engine creation).
    #[error("LLVM error: {0}")]
    Llvm(String),

    /// A call version could not be resolved (argument arity mismatch
    /// with the function's parameters).
    #[error("argument count does not match function parameters: {0}")]
    ArityMismatch(String),
}

impl CompError {
    pub fn unsupported(construct: impl Into<String>, node: &dyn std::fmt::Display) -> CompError {
        CompError::Unsupported {
            construct: construct.into(),
            node: node.to_string(),
        }
    }

    pub fn llvm(err: impl std::fmt::Display) -> CompError {
        CompError::Llvm(err.to_string())
    }
}
