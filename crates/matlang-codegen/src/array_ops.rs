//! Assignment lowering and the scalar array fast paths.
//!
//! A scalar array read fires when the head symbol is a non-complex
//! matrix and every index argument infers to a scalar: per-dimension
//! guards are emitted unless the bounds analysis or configuration
//! elides them, then the element loads through a typed runtime helper
//! (char and logical elements widen to the natural native type on the
//! way out).
//!
//! The scalar write path mirrors it; indices past the current shape
//! take the matrix-expansion slow path inside the write helper, and
//! negative indices raise the usual write error.

use matlang_core::expr::{Expr, ExprKind};
use matlang_core::object::ObjKind;
use matlang_core::stmt::{Stmt, StmtKind};
use matlang_core::symbol::Symbol;
use matlang_core::typeinfo::type_set_widest;

use inkwell::IntPredicate;

use crate::codegen::{FunctionCompiler, VarMap, VarState};
use crate::error::CompError;
use crate::runtime;
use crate::types::{convert_mode, JitValue, StorageMode};

/// Matrix kinds the scalar paths handle: element reads widen to f64.
fn fast_path_kind(kind: ObjKind) -> bool {
    matches!(
        kind,
        ObjKind::MatrixI32
            | ObjKind::MatrixF32
            | ObjKind::MatrixF64
            | ObjKind::LogicalArray
            | ObjKind::CharArray
    )
}

impl<'ctx, 'r> FunctionCompiler<'ctx, 'r> {
    /// Compiles an `Assign` or `Expr` statement natively.
    pub(crate) fn try_compile_simple(
        &mut self,
        stmt: &Stmt,
        vars: &mut VarMap<'ctx>,
    ) -> Result<(), CompError> {
        match &stmt.kind {
            StmtKind::Assign { lhs, rhs } => {
                if lhs.len() != 1 {
                    return self.compile_multi_assign(stmt, lhs, rhs, vars);
                }
                match &lhs[0].kind {
                    ExprKind::Symbol(sym) => {
                        let mut value = self.compile_expr(rhs, vars)?;
                        // Mirroring the interpreter's value semantics:
                        // binding an object held by another name stores
                        // a private copy.
                        if value.mode == StorageMode::ObjPtr
                            && matches!(rhs.kind, ExprKind::Symbol(_))
                        {
                            let copied = runtime::call_runtime(
                                &self.builder,
                                self.module,
                                runtime::RT_COPY_OBJ,
                                &[value.value.into()],
                                "acopy",
                            )?;
                            value = JitValue::new(copied, StorageMode::ObjPtr, value.kind);
                        }
                        vars.insert(*sym, VarState::Local(value));
                        Ok(())
                    }
                    ExprKind::Param {
                        symbol: target,
                        args,
                    } => self.compile_array_write(stmt, &lhs[0], *target, args, rhs, vars),
                    _ => Err(CompError::unsupported("assignment target", &lhs[0])),
                }
            }
            StmtKind::Expr(e) => {
                // Calls execute for their side effects; anything else a
                // bare expression could do is interpreter territory.
                if let ExprKind::Param { symbol, args } = &e.kind {
                    if self.is_statically_function(*symbol, vars) {
                        self.compile_call_expr(e, *symbol, args, vars)?;
                        return Ok(());
                    }
                }
                Err(CompError::unsupported("bare expression statement", e))
            }
            _ => Err(CompError::unsupported("statement", stmt)),
        }
    }

    /// `[a, b] = f(...)` -- lowered through the interpreter-call path
    /// with the requested output count, destructuring the result array.
    fn compile_multi_assign(
        &mut self,
        stmt: &Stmt,
        lhs: &[Expr],
        rhs: &Expr,
        vars: &mut VarMap<'ctx>,
    ) -> Result<(), CompError> {
        let ExprKind::Param { symbol, args } = &rhs.kind else {
            return Err(CompError::unsupported("multi-target assignment", stmt));
        };
        if !lhs.iter().all(|t| matches!(t.kind, ExprKind::Symbol(_))) {
            return Err(CompError::unsupported(
                "multi-target assignment with indexed targets",
                stmt,
            ));
        }
        let Some(callee) = self.resolve_static_function(*symbol) else {
            return Err(CompError::unsupported("unresolved callee", rhs));
        };

        let results = self.emit_fallback_call(callee, args, lhs.len(), vars)?;
        runtime::call_runtime_void(
            &self.builder,
            self.module,
            runtime::RT_CHECK_RETURNS,
            &[results.into(), self.i64_const(lhs.len() as i64).into()],
        )?;
        for (i, target) in lhs.iter().enumerate() {
            let ExprKind::Symbol(sym) = target.kind else {
                unreachable!("targets checked above")
            };
            let value = runtime::call_runtime(
                &self.builder,
                self.module,
                runtime::RT_ARGS_GET,
                &[results.into(), self.i64_const(i as i64).into()],
                "ret",
            )?;
            vars.insert(
                sym,
                VarState::Local(JitValue::new(value, StorageMode::ObjPtr, ObjKind::Unknown)),
            );
        }
        Ok(())
    }

    /// Scalar array read: `x = m(i)` / `x = m(i, j)`.
    pub(crate) fn compile_array_read(
        &mut self,
        expr: &Expr,
        head: Symbol,
        args: &[Expr],
        vars: &mut VarMap<'ctx>,
    ) -> Result<JitValue<'ctx>, CompError> {
        let head_set = self.expr_type_set_of_symbol(head, vars);
        let head_info = type_set_widest(&head_set);
        let eligible = self.use_array_opts
            && fast_path_kind(head_info.kind)
            && (1..=2).contains(&args.len())
            && args
                .iter()
                .all(|a| type_set_widest(&self.expr_type_set(a)).is_scalar);
        if !eligible {
            return Err(CompError::unsupported("general indexing read", expr));
        }

        let obj = self.read_var(head, vars, head_info.kind)?;
        let obj = convert_mode(
            self.context,
            &self.builder,
            self.module,
            obj,
            StorageMode::ObjPtr,
        )?;

        let mut idx_values = Vec::with_capacity(args.len());
        for arg in args {
            let v = self.compile_expr(arg, vars)?;
            let i = convert_mode(self.context, &self.builder, self.module, v, StorageMode::I64)?;
            idx_values.push(i.value.into_int_value());
        }

        // Guards, guided by the bounds analysis.
        for (dim, idx) in idx_values.iter().enumerate() {
            let check = self.bounds.check_for(expr.id, dim);
            if self.no_read_bound_checks {
                continue;
            }
            if check.lower_needed {
                let bad = self
                    .builder
                    .build_int_compare(
                        IntPredicate::SLT,
                        *idx,
                        self.i64_const(1),
                        "lb",
                    )
                    .map_err(CompError::llvm)?;
                self.emit_guard(bad, runtime::BOUNDS_READ_NEG)?;
            }
            if check.upper_needed {
                let extent = if idx_values.len() == 1 {
                    runtime::call_runtime(
                        &self.builder,
                        self.module,
                        runtime::RT_MAT_ELEM_COUNT,
                        &[obj.value.into()],
                        "count",
                    )?
                } else {
                    runtime::call_runtime(
                        &self.builder,
                        self.module,
                        runtime::RT_MAT_DIM,
                        &[obj.value.into(), self.i64_const((dim + 1) as i64).into()],
                        "dim",
                    )?
                };
                let bad = self
                    .builder
                    .build_int_compare(
                        IntPredicate::SGT,
                        *idx,
                        extent.into_int_value(),
                        "ub",
                    )
                    .map_err(CompError::llvm)?;
                self.emit_guard(bad, runtime::BOUNDS_READ_OOB)?;
            }
        }

        let loaded = match idx_values.as_slice() {
            [i] => runtime::call_runtime(
                &self.builder,
                self.module,
                runtime::RT_MAT_READ_F64_1D,
                &[obj.value.into(), (*i).into()],
                "rd1",
            )?,
            [i, j] => runtime::call_runtime(
                &self.builder,
                self.module,
                runtime::RT_MAT_READ_F64_2D,
                &[obj.value.into(), (*i).into(), (*j).into()],
                "rd2",
            )?,
            _ => unreachable!("arity checked above"),
        };
        Ok(JitValue::new(loaded, StorageMode::F64, ObjKind::MatrixF64))
    }

    /// Scalar array write: `m(i) = v` / `m(i, j) = v`.
    #[allow(clippy::too_many_arguments)]
    fn compile_array_write(
        &mut self,
        stmt: &Stmt,
        target: &Expr,
        head: Symbol,
        args: &[Expr],
        rhs: &Expr,
        vars: &mut VarMap<'ctx>,
    ) -> Result<(), CompError> {
        let head_set = self.expr_type_set_of_symbol(head, vars);
        let head_info = type_set_widest(&head_set);
        let eligible = self.use_array_opts
            && fast_path_kind(head_info.kind)
            && (1..=2).contains(&args.len())
            && args
                .iter()
                .all(|a| type_set_widest(&self.expr_type_set(a)).is_scalar);
        if !eligible {
            return Err(CompError::unsupported("general indexing write", target));
        }

        // Copy placement: clone the matrix before mutating when the
        // analysis placed a copy at this statement.
        if self.copy_enable {
            let needs_copy = self
                .copies
                .as_ref()
                .is_some_and(|c| c.at_stmt.contains_key(&stmt.id));
            if needs_copy {
                self.flush_var(head, vars)?;
                runtime::call_runtime_void(
                    &self.builder,
                    self.module,
                    runtime::RT_COPY_FOR_WRITE,
                    &[self.env().into(), self.sym_id_const(head).into()],
                )?;
            }
        }

        let value = self.compile_expr(rhs, vars)?;
        let value_f64 = convert_mode(
            self.context,
            &self.builder,
            self.module,
            value,
            StorageMode::F64,
        )?;

        let obj = self.read_var(head, vars, head_info.kind)?;
        let obj = convert_mode(
            self.context,
            &self.builder,
            self.module,
            obj,
            StorageMode::ObjPtr,
        )?;

        let mut idx_values = Vec::with_capacity(args.len());
        for arg in args {
            let v = self.compile_expr(arg, vars)?;
            let i = convert_mode(self.context, &self.builder, self.module, v, StorageMode::I64)?;
            idx_values.push(i.value.into_int_value());
        }

        // The write path only guards negatives; indices past the end
        // branch into the expansion slow path inside the helper.
        if !self.no_write_bound_checks {
            for idx in &idx_values {
                let bad = self
                    .builder
                    .build_int_compare(IntPredicate::SLT, *idx, self.i64_const(1), "wlb")
                    .map_err(CompError::llvm)?;
                self.emit_guard(bad, runtime::BOUNDS_WRITE_NEG)?;
            }
        }

        match idx_values.as_slice() {
            [i] => runtime::call_runtime_void(
                &self.builder,
                self.module,
                runtime::RT_MAT_WRITE_F64_1D,
                &[obj.value.into(), (*i).into(), value_f64.value.into()],
            )?,
            [i, j] => runtime::call_runtime_void(
                &self.builder,
                self.module,
                runtime::RT_MAT_WRITE_F64_2D,
                &[
                    obj.value.into(),
                    (*i).into(),
                    (*j).into(),
                    value_f64.value.into(),
                ],
            )?,
            _ => unreachable!("arity checked above"),
        }

        // The mutated object is the symbol's current value.
        vars.insert(head, VarState::Local(obj));
        Ok(())
    }

    /// Emits `if (bad) throw-bounds(code)`.
    fn emit_guard(
        &mut self,
        bad: inkwell::values::IntValue<'ctx>,
        code: u64,
    ) -> Result<(), CompError> {
        let fail_bb = self.context.append_basic_block(self.llvm_fn, "bounds_fail");
        let ok_bb = self.context.append_basic_block(self.llvm_fn, "bounds_ok");
        self.builder
            .build_conditional_branch(bad, fail_bb, ok_bb)
            .map_err(CompError::llvm)?;
        self.builder.position_at_end(fail_bb);
        runtime::call_runtime_void(
            &self.builder,
            self.module,
            runtime::RT_THROW_BOUNDS,
            &[self.i64_const(code as i64).into()],
        )?;
        self.builder
            .build_unreachable()
            .map_err(CompError::llvm)?;
        self.builder.position_at_end(ok_bb);
        Ok(())
    }

    /// Type set of a symbol at the current point: the local value's
    /// kind when stored, otherwise whatever inference recorded for the
    /// function's arguments.
    fn expr_type_set_of_symbol(
        &self,
        sym: Symbol,
        vars: &VarMap<'ctx>,
    ) -> matlang_core::typeinfo::TypeSet {
        use matlang_core::typeinfo::{type_set_make, TypeInfo};
        if let Some(VarState::Local(jv)) = vars.get(&sym) {
            if jv.kind != ObjKind::Unknown {
                let mut info = TypeInfo::matrix(jv.kind);
                if jv.mode != StorageMode::ObjPtr {
                    info = TypeInfo::scalar(jv.kind, jv.mode == StorageMode::I64);
                }
                return type_set_make(info);
            }
        }
        // Fall back to the entry-type view of parameters.
        if let Some(i) = self.prog.in_params.iter().position(|&p| p == sym) {
            let mut info = TypeInfo::matrix(self.in_kinds[i]);
            if self.in_modes[i] != StorageMode::ObjPtr {
                info = TypeInfo::scalar(self.in_kinds[i], self.in_modes[i] == StorageMode::I64);
            }
            return type_set_make(info);
        }
        type_set_make(TypeInfo::unknown())
    }
}
