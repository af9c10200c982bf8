//! Function-call lowering: the four dispatch strategies, tried in
//! order.
//!
//! 1. *Optimized library path* -- a registered `(library function,
//!    scalar signature)` native entry is called directly with
//!    mode-converted arguments.
//! 2. *Direct JIT path* -- the callee's compiled version (compiled on
//!    demand by the resolver) is invoked through the shared in/out
//!    storage buffers.
//! 3. *Recursive* -- a call to the function currently being compiled
//!    becomes an in-module direct call.
//! 4. *Interpreter fallback* -- arguments are packed into an argument
//!    array and the interpreter's call entry is invoked; the result
//!    array is destructured with an insufficient-returns check.
//!
//! A callee nested inside the caller takes the nested-call convention:
//! locals are flushed and the caller's environment becomes the callee's
//! local environment for the duration of the call.

use inkwell::values::BasicValueEnum;
use inkwell::IntPredicate;

use matlang_core::expr::Expr;
use matlang_core::function::{FuncRef, Function};
use matlang_core::object::ObjKind;
use matlang_core::typeinfo::TypeSetString;

use crate::codegen::{DirectCallee, FunctionCompiler, VarMap, VarState};
use crate::error::CompError;
use crate::runtime;
use crate::types::{convert_mode, JitValue, StorageMode};

impl<'ctx, 'r> FunctionCompiler<'ctx, 'r> {
    /// Compiles a call expression to its (first) return value.
    pub(crate) fn compile_call_expr(
        &mut self,
        expr: &Expr,
        head: matlang_core::symbol::Symbol,
        args: &[Expr],
        vars: &mut VarMap<'ctx>,
    ) -> Result<JitValue<'ctx>, CompError> {
        let Some(callee) = self.resolve_static_function(head) else {
            return Err(CompError::unsupported("unresolved call target", expr));
        };
        let result_kind = self.expr_kind_of(expr);

        // Strategy 1: optimized library path.
        if let Function::Lib(lib) = callee {
            if self.use_libfunc_opts && args.len() == 1 {
                if let Some(native) = runtime::lib_native_entry(lib.name) {
                    let arg = self.compile_expr(&args[0], vars)?;
                    if arg.mode != StorageMode::ObjPtr {
                        let a = convert_mode(
                            self.context,
                            &self.builder,
                            self.module,
                            arg,
                            StorageMode::F64,
                        )?;
                        let out = runtime::call_runtime(
                            &self.builder,
                            self.module,
                            native,
                            &[a.value.into()],
                            lib.name,
                        )?;
                        return Ok(JitValue::new(out, StorageMode::F64, ObjKind::MatrixF64));
                    }
                }
            }
            return self.fallback_call_value(callee, args, vars, result_kind);
        }

        let prog = callee.as_prog().expect("non-library callee is a program");

        // Nested callees always use the environment-sharing convention
        // (the fallback path routes them through the nested-call shim).
        if self.is_nested_callee(callee) {
            return self.fallback_call_value(callee, args, vars, result_kind);
        }

        // Strategies 2 and 3: direct native invocation.
        if self.use_direct_calls && !prog.is_script && args.len() == prog.in_params.len() {
            let call_arg_types: TypeSetString =
                args.iter().map(|a| self.expr_type_set(a)).collect();

            // Recursive self-call on the same argument types stays in
            // this module.
            if std::ptr::eq(callee, self.func) && call_arg_types == self.arg_types {
                let target = DirectCallee {
                    symbol: self.symbol_name.clone(),
                    address: 0,
                    in_modes: self.in_modes.clone(),
                    out_modes: self.out_modes.clone(),
                    n_outs: self.prog.out_params.len(),
                };
                return self.emit_direct_call(&target, args, vars, result_kind, true);
            }

            if let Some(target) = self.resolver.resolve(callee, &call_arg_types) {
                let mapping = (target.symbol.clone(), target.address);
                if !self.external_callees.contains(&mapping) {
                    self.external_callees.push(mapping);
                }
                return self.emit_direct_call(&target, args, vars, result_kind, false);
            }
        }

        // Strategy 4: interpreter fallback.
        self.fallback_call_value(callee, args, vars, result_kind)
    }

    fn is_nested_callee(&self, callee: FuncRef) -> bool {
        self.prog
            .nested
            .borrow()
            .iter()
            .any(|&n| std::ptr::eq(n, callee))
    }

    /// Emits a direct call through the shared storage buffers.
    fn emit_direct_call(
        &mut self,
        target: &DirectCallee,
        args: &[Expr],
        vars: &mut VarMap<'ctx>,
        result_kind: ObjKind,
        recursive: bool,
    ) -> Result<JitValue<'ctx>, CompError> {
        let (in_buf, out_buf) = self.call_bufs()?;

        for (i, arg) in args.iter().enumerate() {
            let v = self.compile_expr(arg, vars)?;
            let mode = target.in_modes.get(i).copied().unwrap_or(StorageMode::ObjPtr);
            self.store_slot(in_buf, i, v, mode)?;
        }

        let callee_fn = if recursive {
            self.llvm_fn
        } else {
            match self.module.get_function(&target.symbol) {
                Some(f) => f,
                None => {
                    let ptr = self.context.ptr_type(inkwell::AddressSpace::default());
                    let fn_type = self
                        .context
                        .void_type()
                        .fn_type(&[ptr.into(), ptr.into()], false);
                    self.module.add_function(&target.symbol, fn_type, None)
                }
            }
        };
        self.builder
            .build_call(callee_fn, &[in_buf.into(), out_buf.into()], "direct")
            .map_err(CompError::llvm)?;

        // The callee records how many outputs it produced; one is
        // required here.
        let count = self.load_slot(out_buf, target.n_outs, StorageMode::I64)?;
        let short = self
            .builder
            .build_int_compare(
                IntPredicate::SLT,
                count.into_int_value(),
                self.i64_const(1),
                "nret",
            )
            .map_err(CompError::llvm)?;
        let fail_bb = self.context.append_basic_block(self.llvm_fn, "ret_fail");
        let ok_bb = self.context.append_basic_block(self.llvm_fn, "ret_ok");
        self.builder
            .build_conditional_branch(short, fail_bb, ok_bb)
            .map_err(CompError::llvm)?;
        self.builder.position_at_end(fail_bb);
        runtime::call_runtime_void(
            &self.builder,
            self.module,
            runtime::RT_THROW_INSUFFICIENT,
            &[],
        )?;
        self.builder
            .build_unreachable()
            .map_err(CompError::llvm)?;
        self.builder.position_at_end(ok_bb);

        let mode = target
            .out_modes
            .first()
            .copied()
            .unwrap_or(StorageMode::ObjPtr);
        let value = self.load_slot(out_buf, 0, mode)?;
        Ok(JitValue::new(value, mode, result_kind))
    }

    /// Interpreter-fallback call returning the results array value.
    pub(crate) fn emit_fallback_call(
        &mut self,
        callee: FuncRef,
        args: &[Expr],
        nargout: usize,
        vars: &mut VarMap<'ctx>,
    ) -> Result<BasicValueEnum<'ctx>, CompError> {
        let arr = runtime::call_runtime(
            &self.builder,
            self.module,
            runtime::RT_ARGS_CREATE,
            &[self.i64_const(args.len() as i64).into()],
            "cargs",
        )?;
        for arg in args {
            let v = self.compile_expr(arg, vars)?;
            let boxed = convert_mode(
                self.context,
                &self.builder,
                self.module,
                v,
                StorageMode::ObjPtr,
            )?;
            runtime::call_runtime_void(
                &self.builder,
                self.module,
                runtime::RT_ARGS_PUSH,
                &[arr.into(), boxed.value.into()],
            )?;
        }

        if self.is_nested_callee(callee) {
            // Nested convention: flush caller-visible state and hand
            // the callee the caller's environment.
            self.flush_all(vars)?;
            let callee_const = self.func_ptr_const(callee);
            runtime::call_runtime(
                &self.builder,
                self.module,
                runtime::RT_CALL_NESTED,
                &[
                    callee_const.into(),
                    self.env().into(),
                    arr.into(),
                    self.i64_const(nargout as i64).into(),
                ],
                "ncall",
            )
        } else {
            let callee_const = self.func_ptr_const(callee);
            runtime::call_runtime(
                &self.builder,
                self.module,
                runtime::RT_CALL_FUNCTION,
                &[
                    callee_const.into(),
                    arr.into(),
                    self.i64_const(nargout as i64).into(),
                ],
                "icall",
            )
        }
    }

    /// Fallback call destructured to its first value.
    fn fallback_call_value(
        &mut self,
        callee: FuncRef,
        args: &[Expr],
        vars: &mut VarMap<'ctx>,
        result_kind: ObjKind,
    ) -> Result<JitValue<'ctx>, CompError> {
        let results = self.emit_fallback_call(callee, args, 1, vars)?;
        runtime::call_runtime_void(
            &self.builder,
            self.module,
            runtime::RT_CHECK_RETURNS,
            &[results.into(), self.i64_const(1).into()],
        )?;
        let value = runtime::call_runtime(
            &self.builder,
            self.module,
            runtime::RT_ARGS_GET,
            &[results.into(), self.i64_const(0).into()],
            "ret0",
        )?;
        Ok(JitValue::new(value, StorageMode::ObjPtr, result_kind))
    }
}
