//! Tree interpreter over lowered IIR.
//!
//! Executes program functions directly, provides the reference semantics
//! the JIT must agree with, and serves as the JIT's fallback for
//! constructs it cannot lower.
//!
//! # Architecture
//!
//! - [`Interpreter`] owns the global environment (library builtins plus
//!   loaded program functions) and lives in a thread-local singleton so
//!   compiled code's runtime shims can re-enter it.
//! - [`ExecStatus`] threads non-local control flow (`break`, `continue`,
//!   `return`) back up the statement walk as a status value; it is
//!   consumed by the matching loop or call frame, never surfaced.
//! - [`eval`] holds statement execution and expression evaluation;
//!   [`indexing`] the matrix/cell read-write machinery; [`builtins`] the
//!   library function table.
//!
//! # JIT delegation
//!
//! The code generator registers a dispatch hook at initialization. A
//! program-function call first offers itself to the hook (when
//! `jit_enable` is set); a `None` answer means "not eligible, interpret
//! it".

pub mod builtins;
pub mod eval;
pub mod indexing;

use std::cell::RefCell;
use std::sync::OnceLock;

use tracing::debug;

use matlang_core::config;
use matlang_core::env::{EnvRef, Environment};
use matlang_core::error::RunError;
use matlang_core::function::{FuncRef, Function};
use matlang_core::heap;
use matlang_core::object::{DataObject, ObjRef};
use matlang_core::symbol::Symbol;

use crate::lowering;

/// Non-local control flow status propagated by statement execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStatus {
    Normal,
    Break,
    Continue,
    Return,
}

/// JIT dispatch hook: `Some(result)` when the JIT handled the call,
/// `None` to fall back to interpretation.
pub type JitDispatchFn = fn(FuncRef, &[ObjRef], usize) -> Option<Result<Vec<ObjRef>, RunError>>;

static JIT_DISPATCH: OnceLock<JitDispatchFn> = OnceLock::new();

/// Installs the JIT dispatch hook (called by the code generator's
/// initialization; only the first installation wins).
pub fn set_jit_dispatch(hook: JitDispatchFn) {
    let _ = JIT_DISPATCH.set(hook);
}

/// The tree interpreter. A cheap handle: the state lives on the heap
/// behind the environment reference, so the handle copies freely and
/// [`Interpreter::with`] stays re-entrant (compiled code calls back in
/// through the runtime shims mid-execution).
#[derive(Debug, Clone, Copy)]
pub struct Interpreter {
    global_env: EnvRef,
}

thread_local! {
    static INSTANCE: RefCell<Option<Interpreter>> = const { RefCell::new(None) };
}

impl Interpreter {
    /// Runs `f` against the thread's interpreter, creating and
    /// initializing it on first use.
    pub fn with<R>(f: impl FnOnce(&Interpreter) -> R) -> R {
        let interp = INSTANCE.with(|slot| {
            let mut slot = slot.borrow_mut();
            *slot.get_or_insert_with(Interpreter::new)
        });
        f(&interp)
    }

    fn new() -> Interpreter {
        let global_env = heap::alloc_env(Environment::new());
        let interp = Interpreter { global_env };
        builtins::bind_library_functions(interp.global_env);
        interp
    }

    pub fn global_env(&self) -> EnvRef {
        self.global_env
    }

    /// Binds a value in the global environment.
    pub fn set_global(&self, name: &str, obj: ObjRef) {
        self.global_env.bind(Symbol::intern(name), obj);
    }

    /// Loads program functions: binds each by name in the global
    /// environment, attaches local environments, and lowers bodies.
    pub fn load_functions(&self, funcs: &[FuncRef]) {
        for &func in funcs {
            if let Some(prog) = func.as_prog() {
                self.global_env
                    .bind(Symbol::intern(&prog.name), heap::alloc(DataObject::Func(func)));
            }
        }
        // Bind first, then lower: lowering and inference may resolve
        // sibling names through the environment.
        for &func in funcs {
            self.prepare_function(func);
        }
    }

    /// Ensures a function is ready to run: local environment attached,
    /// nested functions bound, body lowered. Idempotent; also used by
    /// the JIT before compiling a version.
    pub fn prepare_function(&self, func: FuncRef) {
        let Some(prog) = func.as_prog() else { return };
        if prog.local_env.borrow().is_none() {
            let local = Environment::extend(self.global_env);
            for &nested in prog.nested.borrow().iter() {
                local.bind(
                    Symbol::intern(&nested.name()),
                    heap::alloc(DataObject::Func(nested)),
                );
            }
            *prog.local_env.borrow_mut() = Some(local);
        }
        // The current body still being the original body means the
        // function has never been lowered.
        let needs_lowering = std::rc::Rc::ptr_eq(&prog.current_body(), &prog.orig_body);
        if needs_lowering {
            lowering::lower_function(prog);
            debug!(function = %prog.name, "function loaded and lowered");
        }
        for &nested in prog.nested.borrow().iter() {
            if let Some(nested_prog) = nested.as_prog() {
                // Nested functions resolve through the parent's local
                // environment.
                if nested_prog.local_env.borrow().is_none() {
                    let parent_env = prog.local_env.borrow().expect("parent env just built");
                    *nested_prog.local_env.borrow_mut() = Some(parent_env);
                }
                nested_prog.parent.set(Some(func));
            }
            self.prepare_function(nested);
        }
    }

    /// Calls a function by its global name.
    pub fn call_by_name(
        &self,
        name: &str,
        args: &[ObjRef],
        nargout: usize,
    ) -> Result<Vec<ObjRef>, RunError> {
        let sym = Symbol::intern(name);
        match self.global_env.lookup(sym)? {
            DataObject::Func(func) => self.call_function(func, args, nargout),
            other => Err(RunError::new(format!(
                "'{}' is not callable (it is a {})",
                name,
                other.kind()
            ))),
        }
    }

    /// Performs a function call, offering program functions to the JIT
    /// first when enabled.
    pub fn call_function(
        &self,
        func: FuncRef,
        args: &[ObjRef],
        nargout: usize,
    ) -> Result<Vec<ObjRef>, RunError> {
        if let Function::Prog(prog) = func {
            if !prog.is_script && config::get_bool("jit_enable") {
                if let Some(hook) = JIT_DISPATCH.get() {
                    if let Some(result) = hook(func, args, nargout) {
                        return result;
                    }
                }
            }
        }
        self.interpret_call(func, args, nargout)
    }

    /// Calls a function strictly through the interpreter (the JIT's
    /// fallback entry; also used internally once delegation declined).
    pub fn interpret_call(
        &self,
        func: FuncRef,
        args: &[ObjRef],
        nargout: usize,
    ) -> Result<Vec<ObjRef>, RunError> {
        match func {
            Function::Lib(lib) => {
                (lib.handler)(args, nargout).map_err(|e| e.during_call_to(lib.name))
            }
            Function::Prog(prog) => self
                .interpret_prog_call(func, args, nargout, None)
                .map_err(|e| e.during_call_to(&prog.name)),
        }
    }

    /// Calls a program function with an explicit base environment
    /// (closures extend their captured environment instead of the
    /// function's local one).
    pub fn interpret_prog_call(
        &self,
        func: FuncRef,
        args: &[ObjRef],
        nargout: usize,
        base_env: Option<EnvRef>,
    ) -> Result<Vec<ObjRef>, RunError> {
        let Some(prog) = func.as_prog() else {
            return self.interpret_call(func, args, nargout);
        };
        if args.len() > prog.in_params.len() {
            return Err(RunError::new("too many input arguments"));
        }
        self.prepare_function(func);

        let base = match base_env {
            Some(env) => env,
            None => prog
                .local_env
                .borrow()
                .expect("local environment attached by prepare_function"),
        };
        let call_env = Environment::extend(base);

        call_env.bind(
            Symbol::intern("nargin"),
            heap::alloc(DataObject::f64_scalar(args.len() as f64)),
        );
        call_env.bind(
            Symbol::intern("nargout"),
            heap::alloc(DataObject::f64_scalar(nargout as f64)),
        );
        for (&param, &arg) in prog.in_params.iter().zip(args) {
            // Value semantics: matrices are copied at the call boundary
            // so callee writes never leak into the caller.
            let bound = if arg.is_matrix() {
                heap::alloc(arg.copy())
            } else {
                arg
            };
            call_env.bind(param, bound);
        }

        let body = prog.current_body();
        let status = self.exec_seq(&body, call_env)?;
        debug_assert!(matches!(status, ExecStatus::Normal | ExecStatus::Return));

        // Collect outputs in order, stopping at the first one never
        // assigned; the caller sees only as many as were set.
        let mut outputs = Vec::with_capacity(prog.out_params.len());
        for &out in &prog.out_params {
            match call_env.try_lookup(out) {
                Some(obj) => outputs.push(obj),
                None => break,
            }
        }
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_status_is_comparable() {
        assert_eq!(ExecStatus::Normal, ExecStatus::Normal);
        assert_ne!(ExecStatus::Break, ExecStatus::Continue);
    }

    #[test]
    fn with_initializes_singleton() {
        Interpreter::with(|interp| {
            // Builtins are bound.
            assert!(interp
                .global_env()
                .try_lookup(Symbol::intern("size"))
                .is_some());
        });
    }

    #[test]
    fn call_by_name_rejects_non_function() {
        Interpreter::with(|interp| {
            interp.set_global(
                "itp_not_a_fn",
                heap::alloc(DataObject::f64_scalar(1.0)),
            );
            let err = interp.call_by_name("itp_not_a_fn", &[], 1).unwrap_err();
            assert!(err.message().contains("not callable"));
        });
    }
}
