//! Binary operation lowering.
//!
//! The operand storage-mode pair selects the dispatch target:
//!
//! - two scalar-stored operands use native instructions (or a runtime
//!   call where no instruction exists, e.g. power);
//! - a scalar paired with a matrix object calls the scalar-matrix
//!   runtime entry for that side, which dispatches on the matrix kind;
//! - two objects call the two-matrix runtime entry;
//! - unknown operand kinds go through the fully generic object path.
//!
//! With `jit_use_binop_opts` off, everything is boxed and the generic
//! path is taken.

use inkwell::{FloatPredicate, IntPredicate};

use matlang_core::expr::BinOp;
use matlang_core::object::ObjKind;

use crate::codegen::FunctionCompiler;
use crate::error::CompError;
use crate::runtime;
use crate::types::{convert_mode, JitValue, StorageMode};

impl<'ctx, 'r> FunctionCompiler<'ctx, 'r> {
    /// Compiles one binary operation over already-compiled operands.
    pub(crate) fn compile_binop(
        &mut self,
        op: BinOp,
        lhs: JitValue<'ctx>,
        rhs: JitValue<'ctx>,
        result_kind: ObjKind,
    ) -> Result<JitValue<'ctx>, CompError> {
        let lhs_scalar = lhs.mode != StorageMode::ObjPtr;
        let rhs_scalar = rhs.mode != StorageMode::ObjPtr;

        if !self.use_binop_opts {
            return self.binop_generic(op, lhs, rhs, result_kind);
        }

        match (lhs_scalar, rhs_scalar) {
            (true, true) => self.binop_scalar_scalar(op, lhs, rhs),
            (true, false) => {
                let s = convert_mode(
                    self.context,
                    &self.builder,
                    self.module,
                    lhs,
                    StorageMode::F64,
                )?;
                let out = runtime::call_runtime(
                    &self.builder,
                    self.module,
                    runtime::RT_BIN_OP_LHS_SCALAR,
                    &[
                        self.i64_const(runtime::bin_op_code(op) as i64).into(),
                        s.value.into(),
                        rhs.value.into(),
                    ],
                    "smop",
                )?;
                Ok(JitValue::new(out, StorageMode::ObjPtr, result_kind))
            }
            (false, true) => {
                let s = convert_mode(
                    self.context,
                    &self.builder,
                    self.module,
                    rhs,
                    StorageMode::F64,
                )?;
                let out = runtime::call_runtime(
                    &self.builder,
                    self.module,
                    runtime::RT_BIN_OP_RHS_SCALAR,
                    &[
                        self.i64_const(runtime::bin_op_code(op) as i64).into(),
                        lhs.value.into(),
                        s.value.into(),
                    ],
                    "msop",
                )?;
                Ok(JitValue::new(out, StorageMode::ObjPtr, result_kind))
            }
            (false, false) => self.binop_generic(op, lhs, rhs, result_kind),
        }
    }

    /// Two-matrix (or unknown-kind) runtime path.
    fn binop_generic(
        &mut self,
        op: BinOp,
        lhs: JitValue<'ctx>,
        rhs: JitValue<'ctx>,
        result_kind: ObjKind,
    ) -> Result<JitValue<'ctx>, CompError> {
        let l = convert_mode(
            self.context,
            &self.builder,
            self.module,
            lhs,
            StorageMode::ObjPtr,
        )?;
        let r = convert_mode(
            self.context,
            &self.builder,
            self.module,
            rhs,
            StorageMode::ObjPtr,
        )?;
        let out = runtime::call_runtime(
            &self.builder,
            self.module,
            runtime::RT_BIN_OP,
            &[
                self.i64_const(runtime::bin_op_code(op) as i64).into(),
                l.value.into(),
                r.value.into(),
            ],
            "genop",
        )?;
        Ok(JitValue::new(out, StorageMode::ObjPtr, result_kind))
    }

    /// Native two-scalar path.
    fn binop_scalar_scalar(
        &mut self,
        op: BinOp,
        lhs: JitValue<'ctx>,
        rhs: JitValue<'ctx>,
    ) -> Result<JitValue<'ctx>, CompError> {
        use BinOp::*;
        match op {
            // Logic wants booleans.
            And | Or | ScAnd | ScOr => {
                let l = convert_mode(
                    self.context,
                    &self.builder,
                    self.module,
                    lhs,
                    StorageMode::I1,
                )?;
                let r = convert_mode(
                    self.context,
                    &self.builder,
                    self.module,
                    rhs,
                    StorageMode::I1,
                )?;
                let out = match op {
                    And | ScAnd => self
                        .builder
                        .build_and(l.value.into_int_value(), r.value.into_int_value(), "and"),
                    _ => self
                        .builder
                        .build_or(l.value.into_int_value(), r.value.into_int_value(), "or"),
                }
                .map_err(CompError::llvm)?;
                Ok(JitValue::new(
                    out.into(),
                    StorageMode::I1,
                    ObjKind::LogicalArray,
                ))
            }
            // Divisions and powers are float operations.
            Div | ElemDiv | LeftDiv | ElemLeftDiv => {
                let l = convert_mode(
                    self.context,
                    &self.builder,
                    self.module,
                    lhs,
                    StorageMode::F64,
                )?;
                let r = convert_mode(
                    self.context,
                    &self.builder,
                    self.module,
                    rhs,
                    StorageMode::F64,
                )?;
                let (num, den) = match op {
                    LeftDiv | ElemLeftDiv => (r, l),
                    _ => (l, r),
                };
                let out = self
                    .builder
                    .build_float_div(
                        num.value.into_float_value(),
                        den.value.into_float_value(),
                        "fdiv",
                    )
                    .map_err(CompError::llvm)?;
                Ok(JitValue::new(
                    out.into(),
                    StorageMode::F64,
                    ObjKind::MatrixF64,
                ))
            }
            Pow | ElemPow => {
                let l = convert_mode(
                    self.context,
                    &self.builder,
                    self.module,
                    lhs,
                    StorageMode::F64,
                )?;
                let r = convert_mode(
                    self.context,
                    &self.builder,
                    self.module,
                    rhs,
                    StorageMode::F64,
                )?;
                let out = runtime::call_runtime(
                    &self.builder,
                    self.module,
                    runtime::RT_POW_F64,
                    &[l.value.into(), r.value.into()],
                    "pow",
                )?;
                Ok(JitValue::new(out, StorageMode::F64, ObjKind::MatrixF64))
            }
            // Arithmetic at the widest common scalar mode (booleans
            // widen to integers first).
            Add | Sub | Mult | ElemMult => {
                let mode = StorageMode::widen(
                    StorageMode::widen(lhs.mode, rhs.mode),
                    StorageMode::I64,
                );
                let l = convert_mode(self.context, &self.builder, self.module, lhs, mode)?;
                let r = convert_mode(self.context, &self.builder, self.module, rhs, mode)?;
                let out: inkwell::values::BasicValueEnum<'ctx> = if mode == StorageMode::I64 {
                    let (a, b) = (l.value.into_int_value(), r.value.into_int_value());
                    match op {
                        Add => self.builder.build_int_add(a, b, "add"),
                        Sub => self.builder.build_int_sub(a, b, "sub"),
                        _ => self.builder.build_int_mul(a, b, "mul"),
                    }
                    .map_err(CompError::llvm)?
                    .into()
                } else {
                    let (a, b) = (l.value.into_float_value(), r.value.into_float_value());
                    match op {
                        Add => self.builder.build_float_add(a, b, "fadd"),
                        Sub => self.builder.build_float_sub(a, b, "fsub"),
                        _ => self.builder.build_float_mul(a, b, "fmul"),
                    }
                    .map_err(CompError::llvm)?
                    .into()
                };
                Ok(JitValue::new(out, mode, ObjKind::MatrixF64))
            }
            // Comparisons.
            Eq | Ne | Lt | Le | Gt | Ge => {
                let mode = StorageMode::widen(
                    StorageMode::widen(lhs.mode, rhs.mode),
                    StorageMode::I64,
                );
                let l = convert_mode(self.context, &self.builder, self.module, lhs, mode)?;
                let r = convert_mode(self.context, &self.builder, self.module, rhs, mode)?;
                let out: inkwell::values::BasicValueEnum<'ctx> = if mode == StorageMode::I64 {
                    let pred = match op {
                        Eq => IntPredicate::EQ,
                        Ne => IntPredicate::NE,
                        Lt => IntPredicate::SLT,
                        Le => IntPredicate::SLE,
                        Gt => IntPredicate::SGT,
                        _ => IntPredicate::SGE,
                    };
                    self.builder
                        .build_int_compare(
                            pred,
                            l.value.into_int_value(),
                            r.value.into_int_value(),
                            "icmp",
                        )
                        .map_err(CompError::llvm)?
                        .into()
                } else {
                    let pred = match op {
                        Eq => FloatPredicate::OEQ,
                        Ne => FloatPredicate::UNE,
                        Lt => FloatPredicate::OLT,
                        Le => FloatPredicate::OLE,
                        Gt => FloatPredicate::OGT,
                        _ => FloatPredicate::OGE,
                    };
                    self.builder
                        .build_float_compare(
                            pred,
                            l.value.into_float_value(),
                            r.value.into_float_value(),
                            "fcmp",
                        )
                        .map_err(CompError::llvm)?
                        .into()
                };
                Ok(JitValue::new(out, StorageMode::I1, ObjKind::LogicalArray))
            }
        }
    }
}
