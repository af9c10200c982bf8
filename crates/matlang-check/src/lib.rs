//! Program transformation, analysis, and reference interpretation.
//!
//! This crate takes the IIR produced by the frontend and makes it
//! executable and analyzable:
//!
//! - [`lowering`] rewrites surface constructs into the canonical core
//!   (loop unification, switch elimination, end binding, short-circuit
//!   elimination, split form).
//! - [`analysis`] hosts the memoizing analysis manager and the concrete
//!   data-flow analyses (metrics, reaching definitions, live variables,
//!   type inference, bounds-check elimination, array-copy placement).
//! - [`interpreter`] executes lowered IIR directly, serves as the JIT's
//!   fallback, and provides the hook through which the JIT installs
//!   itself.

pub mod analysis;
pub mod interpreter;
pub mod lowering;

pub use analysis::manager::{self as analysis_manager};
pub use interpreter::{ExecStatus, Interpreter};
pub use lowering::lower_function;
