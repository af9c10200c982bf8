//! The JIT specializer: per-version native code generation via
//! LLVM/inkwell.
//!
//! For each `(program function, argument-type string)` pair the crate
//! emits a specialized native entry plus a dynamic wrapper, guided by
//! the analyses in `matlang-check`. Constructs it cannot lower run in
//! the interpreter, statement by statement; whole functions that fail
//! to compile are marked interpreter-only.
//!
//! # Modules
//!
//! - [`error`] -- `CompError`, the lower-or-fall-back failure type
//! - [`types`] -- storage modes and mode conversions
//! - [`runtime`] -- runtime helper shims, declarations, symbol mapping
//! - [`codegen`] -- per-version body compilation (variable map,
//!   branch-point matching, control flow, expressions)
//! - [`binops`] / [`array_ops`] / [`calls`] -- operator, array
//!   fast-path, and call-strategy lowering
//! - [`compiler`] -- the version cache and compilation pipeline
//! - [`wrapper`] -- the dynamic argument-array adapter
//!
//! [`initialize`] registers the `jit_*` configuration variables and
//! installs the dispatch hook through which the interpreter offers
//! program calls to the JIT.

pub mod array_ops;
pub mod binops;
pub mod calls;
pub mod codegen;
pub mod compiler;
pub mod error;
pub mod runtime;
pub mod types;
pub mod wrapper;

use tracing::warn;

use matlang_check::interpreter;
use matlang_core::config::{self, ConfigKind, ConfigVar};
use matlang_core::error::RunError;
use matlang_core::function::FuncRef;
use matlang_core::object::ObjRef;
use matlang_core::typeinfo::type_set_string_of_args;

pub use compiler::{CompiledVersion, JitCompiler};
pub use error::CompError;

/// Configuration variables owned by the JIT.
const JIT_VARS: &[ConfigVar] = &[
    ConfigVar::new("jit_enable", ConfigKind::Bool, "false"),
    ConfigVar::new("jit_copy_enable", ConfigKind::Bool, "false"),
    ConfigVar::new("jit_use_array_opts", ConfigKind::Bool, "true"),
    ConfigVar::new("jit_use_binop_opts", ConfigKind::Bool, "true"),
    ConfigVar::new("jit_use_libfunc_opts", ConfigKind::Bool, "true"),
    ConfigVar::new("jit_use_direct_calls", ConfigKind::Bool, "true"),
    ConfigVar::new("jit_no_read_bound_checks", ConfigKind::Bool, "false"),
    ConfigVar::new("jit_no_write_bound_checks", ConfigKind::Bool, "false"),
];

/// Registers the JIT's configuration variables and installs the
/// interpreter's dispatch hook. Idempotent; call once at startup before
/// parsing the command line.
pub fn initialize() {
    for var in JIT_VARS {
        config::register_var(var.clone());
    }
    interpreter::set_jit_dispatch(jit_dispatch);
}

/// The dispatch hook: compile (or fetch) a version specialized for the
/// actual argument types and run it. `None` hands the call back to the
/// interpreter.
fn jit_dispatch(
    func: FuncRef,
    args: &[ObjRef],
    nargout: usize,
) -> Option<Result<Vec<ObjRef>, RunError>> {
    let prog = func.as_prog()?;
    if prog.is_script {
        return None;
    }
    // Partial application keeps interpreter semantics (absent
    // parameters never bind).
    if args.len() != prog.in_params.len() {
        return None;
    }
    JitCompiler::with(|jit| {
        if jit.is_ineligible(func) {
            return None;
        }
        let arg_types = type_set_string_of_args(args);
        match jit.get_or_compile(func, &arg_types) {
            Ok(version) => Some(wrapper::call_version(&version, &prog.name, args, nargout)),
            Err(e) => {
                warn!(function = %prog.name, error = %e, "JIT compilation failed; interpreter takes over");
                jit.mark_ineligible(func);
                None
            }
        }
    })
}
