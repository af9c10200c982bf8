//! Statement execution and expression evaluation.
//!
//! Statement dispatch returns an [`ExecStatus`]; loops consume `Break`
//! and `Continue`, call frames consume `Return`, and anything escaping
//! its frame is a bug. Expression evaluation produces heap objects;
//! parameterized expressions resolve to either a function call or a
//! matrix/cell indexing operation depending on what the head symbol is
//! bound to.
//!
//! The interpreter executes lowered bodies, but the surface forms
//! (`for`, `while`, `switch`) are also evaluated directly so unlowered
//! trees remain runnable.

use matlang_core::env::{EnvRef, Environment};
use matlang_core::error::RunError;
use matlang_core::expr::{BinOp, EndAssoc, Expr, ExprKind};
use matlang_core::function::ProgFunction;
use matlang_core::heap;
use matlang_core::matrix::Matrix;
use matlang_core::object::{DataObject, ObjKind, ObjRef, RangeObj};
use matlang_core::ops;
use matlang_core::stmt::{Stmt, StmtKind, StmtSeq};
use matlang_core::symbol::Symbol;

use super::indexing::{self, IndexArg};
use super::{ExecStatus, Interpreter};

impl Interpreter {
    /// Executes a statement sequence; stops at the first non-normal
    /// status and propagates it.
    pub fn exec_seq(&self, seq: &StmtSeq, env: EnvRef) -> Result<ExecStatus, RunError> {
        for stmt in &seq.stmts {
            match self.exec_stmt(stmt, env)? {
                ExecStatus::Normal => {}
                status => return Ok(status),
            }
        }
        Ok(ExecStatus::Normal)
    }

    /// Executes one statement.
    pub fn exec_stmt(&self, stmt: &Stmt, env: EnvRef) -> Result<ExecStatus, RunError> {
        match &stmt.kind {
            StmtKind::Assign { lhs, rhs } => {
                self.exec_assign(lhs, rhs, env, !stmt.suppress_output)?;
                Ok(ExecStatus::Normal)
            }
            StmtKind::Expr(e) => {
                let values = self.eval_expr_multi(e, env, 1)?;
                if let Some(&value) = values.first() {
                    // A bare expression's value lands in `ans`.
                    if !matches!(e.kind, ExprKind::Symbol(_)) {
                        env.bind(Symbol::intern("ans"), value);
                        if !stmt.suppress_output {
                            print_value("ans", value);
                        }
                    } else if !stmt.suppress_output {
                        print_value(&e.to_string(), value);
                    }
                }
                Ok(ExecStatus::Normal)
            }
            StmtKind::IfElse {
                cond,
                then_seq,
                else_seq,
            } => {
                let test = self.eval_expr(cond, env)?.as_logical_scalar()?;
                if test {
                    self.exec_seq(then_seq, env)
                } else {
                    self.exec_seq(else_seq, env)
                }
            }
            StmtKind::Loop {
                init,
                test,
                body,
                incr,
                test_var,
            } => self.exec_loop(init, test, body, incr, *test_var, env),
            StmtKind::Break => Ok(ExecStatus::Break),
            StmtKind::Continue => Ok(ExecStatus::Continue),
            StmtKind::Return => Ok(ExecStatus::Return),
            // Surface forms, evaluated directly when running unlowered
            // trees.
            StmtKind::For { var, iter, body } => self.exec_for(*var, iter, body, env),
            StmtKind::While { cond, body } => self.exec_while(cond, body, env),
            StmtKind::Switch {
                value,
                cases,
                default,
            } => self.exec_switch(value, cases, default.as_ref(), env),
        }
    }

    fn exec_assign(
        &self,
        lhs: &[Expr],
        rhs: &Expr,
        env: EnvRef,
        print: bool,
    ) -> Result<(), RunError> {
        let values = self.eval_expr_multi(rhs, env, lhs.len())?;
        if values.len() < lhs.len() {
            return Err(RunError::new(
                "insufficient number of return values in assignment",
            ));
        }
        for (target, &value) in lhs.iter().zip(&values) {
            self.assign_to(target, value, env)?;
            if print {
                let shown = match &target.kind {
                    ExprKind::Symbol(s)
                    | ExprKind::Param { symbol: s, .. }
                    | ExprKind::CellIndex { symbol: s, .. } => {
                        env.try_lookup(*s).map(|obj| (s.name(), obj))
                    }
                    _ => None,
                };
                if let Some((name, obj)) = shown {
                    print_value(&name, obj);
                }
            }
        }
        Ok(())
    }

    /// Assigns one value to one target expression.
    fn assign_to(&self, target: &Expr, value: ObjRef, env: EnvRef) -> Result<(), RunError> {
        match &target.kind {
            ExprKind::Symbol(sym) => {
                // Value semantics: binding a matrix stores a private
                // copy, so later in-place indexed writes cannot be
                // observed through other names.
                let stored = if value.is_matrix() {
                    heap::alloc(value.copy())
                } else {
                    value
                };
                env.bind(*sym, stored);
                Ok(())
            }
            ExprKind::Param { symbol, args } => {
                let idx_args = self.eval_index_args(args, env)?;
                let target_obj = self.writable_target(*symbol, value, env)?;
                indexing::write_indexed(target_obj, &idx_args, value)
            }
            ExprKind::CellIndex { symbol, args } => {
                let idx_args = self.eval_index_args(args, env)?;
                let target_obj = match env.try_lookup(*symbol) {
                    Some(obj) if obj.kind() == ObjKind::CellArray => obj,
                    Some(_) | None => {
                        let fresh = heap::alloc(DataObject::Cells(Matrix::empty().into()));
                        env.bind(*symbol, fresh);
                        fresh
                    }
                };
                indexing::write_indexed(target_obj, &idx_args, value)
            }
            other => Err(RunError::with_node(
                "invalid assignment target",
                &format_args!("{:?}", other),
            )),
        }
    }

    /// Locates (or creates, or kind-promotes) the matrix object behind
    /// an indexed write.
    fn writable_target(
        &self,
        symbol: Symbol,
        value: ObjRef,
        env: EnvRef,
    ) -> Result<ObjRef, RunError> {
        let fresh_kind = indexing::fresh_target_kind(value);
        match env.try_lookup(symbol) {
            Some(obj) if obj.is_matrix() => {
                // Writing a complex value into a real matrix promotes
                // the whole matrix first.
                if value.kind() == ObjKind::MatrixC128 && obj.kind() != ObjKind::MatrixC128 {
                    let promoted = heap::alloc(obj.convert(ObjKind::MatrixC128)?);
                    env.bind(symbol, promoted);
                    Ok(promoted)
                } else {
                    Ok(obj)
                }
            }
            _ => {
                let fresh = heap::alloc(match fresh_kind {
                    ObjKind::MatrixC128 => DataObject::MatrixC128(Matrix::empty().into()),
                    ObjKind::CharArray => DataObject::Chars(Matrix::empty().into()),
                    ObjKind::LogicalArray => DataObject::Logical(Matrix::empty().into()),
                    _ => DataObject::MatrixF64(Matrix::empty().into()),
                });
                env.bind(symbol, fresh);
                Ok(fresh)
            }
        }
    }

    fn exec_loop(
        &self,
        init: &StmtSeq,
        test: &StmtSeq,
        body: &StmtSeq,
        incr: &StmtSeq,
        test_var: Symbol,
        env: EnvRef,
    ) -> Result<ExecStatus, RunError> {
        if self.exec_seq(init, env)? == ExecStatus::Return {
            return Ok(ExecStatus::Return);
        }
        loop {
            if self.exec_seq(test, env)? == ExecStatus::Return {
                return Ok(ExecStatus::Return);
            }
            if !env.lookup(test_var)?.as_logical_scalar()? {
                return Ok(ExecStatus::Normal);
            }
            match self.exec_seq(body, env)? {
                ExecStatus::Break => return Ok(ExecStatus::Normal),
                ExecStatus::Return => return Ok(ExecStatus::Return),
                ExecStatus::Normal | ExecStatus::Continue => {}
            }
            if self.exec_seq(incr, env)? == ExecStatus::Return {
                return Ok(ExecStatus::Return);
            }
        }
    }

    fn exec_for(
        &self,
        var: Symbol,
        iter: &Expr,
        body: &StmtSeq,
        env: EnvRef,
    ) -> Result<ExecStatus, RunError> {
        let iter_obj = self.eval_expr(iter, env)?;
        let cols = match iter_obj {
            DataObject::Range(r) => r.count(),
            _ => {
                let dims = obj_dims(iter_obj)?;
                dims.get(1).copied().unwrap_or(0)
            }
        };
        for j in 1..=cols {
            let column = match iter_obj {
                DataObject::Range(r) => {
                    heap::alloc(DataObject::f64_scalar(r.start + r.step * (j - 1) as f64))
                }
                _ => heap::alloc(indexing::read_indexed(
                    iter_obj,
                    &[IndexArg::Colon, IndexArg::Scalar(j as i64)],
                )?),
            };
            env.bind(var, column);
            match self.exec_seq(body, env)? {
                ExecStatus::Break => return Ok(ExecStatus::Normal),
                ExecStatus::Return => return Ok(ExecStatus::Return),
                ExecStatus::Normal | ExecStatus::Continue => {}
            }
        }
        Ok(ExecStatus::Normal)
    }

    fn exec_while(
        &self,
        cond: &Expr,
        body: &StmtSeq,
        env: EnvRef,
    ) -> Result<ExecStatus, RunError> {
        while self.eval_expr(cond, env)?.as_logical_scalar()? {
            match self.exec_seq(body, env)? {
                ExecStatus::Break => return Ok(ExecStatus::Normal),
                ExecStatus::Return => return Ok(ExecStatus::Return),
                ExecStatus::Normal | ExecStatus::Continue => {}
            }
        }
        Ok(ExecStatus::Normal)
    }

    fn exec_switch(
        &self,
        value: &Expr,
        cases: &[(Expr, StmtSeq)],
        default: Option<&StmtSeq>,
        env: EnvRef,
    ) -> Result<ExecStatus, RunError> {
        let subject = self.eval_expr(value, env)?;
        for (case_expr, case_body) in cases {
            let case_val = self.eval_expr(case_expr, env)?;
            let eq = ops::apply_bin_op(BinOp::Eq, subject, case_val)?;
            if eq.as_logical_scalar()? {
                return self.exec_seq(case_body, env);
            }
        }
        match default {
            Some(seq) => self.exec_seq(seq, env),
            None => Ok(ExecStatus::Normal),
        }
    }

    /// Evaluates an expression to a single value. Expressions that can
    /// produce several (calls, cell indexing) yield their first; zero
    /// values is an error here.
    pub fn eval_expr(&self, expr: &Expr, env: EnvRef) -> Result<ObjRef, RunError> {
        let values = self.eval_expr_multi(expr, env, 1)?;
        values.into_iter().next().ok_or_else(|| {
            RunError::with_node("expression produced no value", expr)
        })
    }

    /// Evaluates an expression requesting `nargout` values.
    pub fn eval_expr_multi(
        &self,
        expr: &Expr,
        env: EnvRef,
        nargout: usize,
    ) -> Result<Vec<ObjRef>, RunError> {
        match &expr.kind {
            ExprKind::IntConst(v) => Ok(vec![heap::alloc(DataObject::f64_scalar(*v as f64))]),
            ExprKind::FpConst(v) => Ok(vec![heap::alloc(DataObject::f64_scalar(*v))]),
            ExprKind::StrConst(s) => Ok(vec![heap::alloc(DataObject::string(s))]),
            ExprKind::Symbol(sym) => {
                let obj = env.lookup(*sym)?;
                // A bare function-valued symbol auto-calls with no
                // arguments.
                if let DataObject::Func(func) = obj {
                    return self.call_function(func, &[], nargout.max(1));
                }
                Ok(vec![obj])
            }
            ExprKind::Unary { op, operand } => {
                let v = self.eval_expr(operand, env)?;
                Ok(vec![heap::alloc(ops::apply_un_op(*op, v)?)])
            }
            ExprKind::Binary { op, lhs, rhs } => {
                // Short-circuit forms evaluate lazily.
                if let BinOp::ScAnd | BinOp::ScOr = op {
                    let l = self.eval_expr(lhs, env)?.as_logical_scalar()?;
                    let result = match op {
                        BinOp::ScAnd if !l => false,
                        BinOp::ScOr if l => true,
                        _ => self.eval_expr(rhs, env)?.as_logical_scalar()?,
                    };
                    return Ok(vec![heap::alloc(DataObject::bool_scalar(result))]);
                }
                let l = self.eval_expr(lhs, env)?;
                let r = self.eval_expr(rhs, env)?;
                Ok(vec![heap::alloc(ops::apply_bin_op(*op, l, r)?)])
            }
            ExprKind::Param { symbol, args } => self.eval_param(*symbol, args, env, nargout),
            ExprKind::CellIndex { symbol, args } => {
                let obj = env.lookup(*symbol)?;
                let idx_args = self.eval_index_args(args, env)?;
                indexing::read_cell_contents(obj, &idx_args)
            }
            ExprKind::Range { start, step, stop } => {
                let (Some(start), Some(stop)) = (start, stop) else {
                    return Err(RunError::with_node(
                        "colon is only valid inside an indexing context",
                        expr,
                    ));
                };
                let start = self.eval_expr(start, env)?.scalar_f64()?;
                let step = match step {
                    Some(e) => self.eval_expr(e, env)?.scalar_f64()?,
                    None => 1.0,
                };
                let stop = self.eval_expr(stop, env)?.scalar_f64()?;
                Ok(vec![heap::alloc(DataObject::Range(RangeObj {
                    start,
                    step,
                    stop,
                }))])
            }
            ExprKind::End { assocs } => {
                let value = self.eval_end(assocs, env)?;
                Ok(vec![heap::alloc(DataObject::f64_scalar(value))])
            }
            ExprKind::Matrix { rows } => {
                Ok(vec![heap::alloc(self.eval_matrix_literal(rows, env)?)])
            }
            ExprKind::CellArray { rows } => {
                Ok(vec![heap::alloc(self.eval_cell_literal(rows, env)?)])
            }
            ExprKind::FnHandle(sym) => match env.lookup(*sym)? {
                DataObject::Func(func) => Ok(vec![heap::alloc(DataObject::Handle {
                    func,
                    env: None,
                })]),
                other => Err(RunError::new(format!(
                    "'@{}' does not name a function (it is a {})",
                    sym,
                    other.kind()
                ))),
            },
            ExprKind::Lambda { params, body } => {
                // Synthesize a single-output closure whose body assigns
                // the lambda expression to its output parameter.
                let out_sym = Symbol::intern("$lambda_out");
                let lambda_body = StmtSeq::single(Stmt::assign(out_sym, body.deep_copy()));
                let mut prog =
                    ProgFunction::new("@anonymous", params.clone(), vec![out_sym], lambda_body);
                prog.is_closure = true;
                let func = heap::alloc_func(matlang_core::function::Function::Prog(prog));
                Ok(vec![heap::alloc(DataObject::Handle {
                    func,
                    env: Some(env),
                })])
            }
        }
    }

    /// Evaluates a parameterized expression: a call when the head names
    /// a function or handle, an indexing read when it names a matrix.
    fn eval_param(
        &self,
        symbol: Symbol,
        args: &[Expr],
        env: EnvRef,
        nargout: usize,
    ) -> Result<Vec<ObjRef>, RunError> {
        let head = env.lookup(symbol)?;
        match head {
            DataObject::Func(func) => {
                let call_args = self.eval_call_args(args, env)?;
                self.call_function(func, &call_args, nargout)
            }
            DataObject::Handle { func, env: captured } => {
                let call_args = self.eval_call_args(args, env)?;
                match captured {
                    Some(closure_env) => {
                        let call_base = Environment::extend(closure_env);
                        self.interpret_prog_call(func, &call_args, nargout, Some(call_base))
                            .map_err(|e| e.during_call_to(&func.name()))
                    }
                    None => self.call_function(func, &call_args, nargout),
                }
            }
            _ if head.is_matrix() || head.kind() == ObjKind::Range => {
                let idx_args = self.eval_index_args(args, env)?;
                Ok(vec![heap::alloc(indexing::read_indexed(head, &idx_args)?)])
            }
            other => Err(RunError::new(format!(
                "'{}' is neither a function nor an indexable value (it is a {})",
                symbol,
                other.kind()
            ))),
        }
    }

    /// Evaluates call arguments, expanding cell-content indexing into
    /// multiple values (`f(c{:})`).
    fn eval_call_args(&self, args: &[Expr], env: EnvRef) -> Result<Vec<ObjRef>, RunError> {
        let mut out = Vec::with_capacity(args.len());
        for arg in args {
            if let ExprKind::CellIndex { .. } = arg.kind {
                out.extend(self.eval_expr_multi(arg, env, usize::MAX)?);
            } else {
                out.push(self.eval_expr(arg, env)?);
            }
        }
        Ok(out)
    }

    /// Evaluates indexing arguments into [`IndexArg`]s. Ranges stay
    /// unmaterialized when possible; `end` resolves via its bound
    /// associations.
    fn eval_index_args(&self, args: &[Expr], env: EnvRef) -> Result<Vec<IndexArg>, RunError> {
        let mut out = Vec::with_capacity(args.len());
        for arg in args {
            if arg.is_full_range() {
                out.push(IndexArg::Colon);
                continue;
            }
            let obj = self.eval_expr(arg, env)?;
            out.push(IndexArg::from_object(obj)?);
        }
        Ok(out)
    }

    /// Resolves a bound `end` expression to its numeric value.
    fn eval_end(&self, assocs: &[EndAssoc], env: EnvRef) -> Result<f64, RunError> {
        let Some(assoc) = assocs.first() else {
            return Err(RunError::new(
                "'end' is only valid inside an indexing context",
            ));
        };
        let obj = env.lookup(assoc.symbol)?;
        let dims = obj_dims(obj)?;
        let value = if assoc.is_last {
            if assoc.dim_index == 0 {
                // Single-index context: the full element count.
                dims.iter().product::<usize>()
            } else {
                dims.get(assoc.dim_index..)
                    .map(|d| d.iter().product())
                    .unwrap_or(1)
            }
        } else {
            dims.get(assoc.dim_index).copied().unwrap_or(1)
        };
        Ok(value as f64)
    }

    fn eval_matrix_literal(&self, rows: &[Vec<Expr>], env: EnvRef) -> Result<DataObject, RunError> {
        let mut row_objs: Vec<Vec<ObjRef>> = Vec::with_capacity(rows.len());
        for row in rows {
            let mut objs = Vec::with_capacity(row.len());
            for e in row {
                objs.push(self.eval_expr(e, env)?);
            }
            row_objs.push(objs);
        }

        let all = row_objs.iter().flatten().copied().collect::<Vec<_>>();
        if all.is_empty() {
            return Ok(DataObject::MatrixF64(Matrix::empty().into()));
        }
        let all_char = all.iter().all(|o| o.kind() == ObjKind::CharArray);
        let all_logical = all.iter().all(|o| o.kind() == ObjKind::LogicalArray);
        let any_complex = all.iter().any(|o| o.kind() == ObjKind::MatrixC128);

        if all_char {
            let cat = concat_blocks(&row_objs, |o| Ok(chars_of(o)))?;
            return Ok(DataObject::Chars(cat.into()));
        }
        if all_logical {
            let cat = concat_blocks(&row_objs, |o| match o {
                DataObject::Logical(m) => Ok(m.borrow().clone()),
                _ => unreachable!("all blocks checked logical"),
            })?;
            return Ok(DataObject::Logical(cat.into()));
        }
        if any_complex {
            let cat = concat_blocks(&row_objs, |o| o.to_c128_matrix())?;
            return Ok(DataObject::MatrixC128(cat.into()));
        }
        let cat = concat_blocks(&row_objs, |o| o.to_f64_matrix())?;
        Ok(DataObject::MatrixF64(cat.into()))
    }

    fn eval_cell_literal(&self, rows: &[Vec<Expr>], env: EnvRef) -> Result<DataObject, RunError> {
        let mut blocks: Vec<Vec<Matrix<ObjRef>>> = Vec::with_capacity(rows.len());
        for row in rows {
            let mut row_blocks = Vec::with_capacity(row.len());
            for e in row {
                let v = self.eval_expr(e, env)?;
                row_blocks.push(Matrix::scalar(v));
            }
            blocks.push(row_blocks);
        }
        let row_mats: Result<Vec<Matrix<ObjRef>>, RunError> =
            blocks.iter().map(|r| Matrix::horzcat(r)).collect();
        let cat = Matrix::vertcat(&row_mats?)?;
        Ok(DataObject::Cells(cat.into()))
    }
}

/// Concatenates literal rows: each element converts to a typed block,
/// blocks join horizontally, rows join vertically.
fn concat_blocks<T: Clone>(
    rows: &[Vec<ObjRef>],
    convert: impl Fn(&DataObject) -> Result<Matrix<T>, RunError>,
) -> Result<Matrix<T>, RunError> {
    let mut row_mats = Vec::with_capacity(rows.len());
    for row in rows {
        let blocks: Result<Vec<Matrix<T>>, RunError> =
            row.iter().map(|&o| convert(o)).collect();
        row_mats.push(Matrix::horzcat(&blocks?)?);
    }
    Matrix::vertcat(&row_mats)
}

fn chars_of(o: &DataObject) -> Matrix<char> {
    match o {
        DataObject::Chars(m) => m.borrow().clone(),
        _ => unreachable!("all blocks checked char"),
    }
}

/// Dimension vector of any matrix-like object.
pub fn obj_dims(obj: &DataObject) -> Result<Vec<usize>, RunError> {
    match obj {
        DataObject::MatrixI32(m) => Ok(m.borrow().dims().to_vec()),
        DataObject::MatrixF32(m) => Ok(m.borrow().dims().to_vec()),
        DataObject::MatrixF64(m) => Ok(m.borrow().dims().to_vec()),
        DataObject::MatrixC128(m) => Ok(m.borrow().dims().to_vec()),
        DataObject::Logical(m) => Ok(m.borrow().dims().to_vec()),
        DataObject::Chars(m) => Ok(m.borrow().dims().to_vec()),
        DataObject::Cells(m) => Ok(m.borrow().dims().to_vec()),
        DataObject::Range(r) => Ok(vec![1, r.count()]),
        other => Err(RunError::new(format!(
            "cannot take the size of a {} value",
            other.kind()
        ))),
    }
}

fn print_value(name: &str, obj: ObjRef) {
    println!("{} =\n{}\n", name, obj);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(name: &str) -> Symbol {
        Symbol::intern(name)
    }

    fn fresh_env(interp: &Interpreter) -> EnvRef {
        Environment::extend(interp.global_env())
    }

    #[test]
    fn arithmetic_assignment_binds() {
        Interpreter::with(|interp| {
            let env = fresh_env(interp);
            // x = 1 + 2; y = x * 3
            let x = sym("ev_x");
            let y = sym("ev_y");
            let s1 = Stmt::assign(
                x,
                Expr::binary(BinOp::Add, Expr::int_const(1), Expr::int_const(2)),
            );
            let s2 = Stmt::assign(
                y,
                Expr::binary(BinOp::Mult, Expr::symbol(x), Expr::int_const(3)),
            );
            let status = interp.exec_seq(&StmtSeq::new(vec![s1, s2]), env).unwrap();
            assert_eq!(status, ExecStatus::Normal);
            assert_eq!(env.lookup(x).unwrap().scalar_f64().unwrap(), 3.0);
            assert_eq!(env.lookup(y).unwrap().scalar_f64().unwrap(), 9.0);
        });
    }

    #[test]
    fn value_semantics_on_alias() {
        Interpreter::with(|interp| {
            let env = fresh_env(interp);
            let (a, b) = (sym("ev_al_a"), sym("ev_al_b"));
            // a = [1 2]; b = a; b(1) = 9; a unchanged.
            let lit = Expr::new(ExprKind::Matrix {
                rows: vec![vec![Expr::int_const(1), Expr::int_const(2)]],
            });
            let write = Stmt::new(StmtKind::Assign {
                lhs: vec![Expr::new(ExprKind::Param {
                    symbol: b,
                    args: vec![Expr::int_const(1)],
                })],
                rhs: Expr::int_const(9),
            });
            let seq = StmtSeq::new(vec![
                Stmt::assign(a, lit),
                Stmt::assign(b, Expr::symbol(a)),
                write,
            ]);
            interp.exec_seq(&seq, env).unwrap();
            let a_val = env.lookup(a).unwrap().to_f64_matrix().unwrap();
            let b_val = env.lookup(b).unwrap().to_f64_matrix().unwrap();
            assert_eq!(a_val.data(), &[1.0, 2.0]);
            assert_eq!(b_val.data(), &[9.0, 2.0]);
        });
    }

    #[test]
    fn if_else_takes_false_branch() {
        Interpreter::with(|interp| {
            let env = fresh_env(interp);
            let r = sym("ev_if_r");
            let stmt = Stmt::new(StmtKind::IfElse {
                cond: Expr::int_const(0),
                then_seq: StmtSeq::single(Stmt::assign(r, Expr::int_const(1))),
                else_seq: StmtSeq::single(Stmt::assign(r, Expr::int_const(2))),
            });
            interp.exec_seq(&StmtSeq::single(stmt), env).unwrap();
            assert_eq!(env.lookup(r).unwrap().scalar_f64().unwrap(), 2.0);
        });
    }

    #[test]
    fn while_loop_accumulates() {
        Interpreter::with(|interp| {
            let env = fresh_env(interp);
            let (s, i) = (sym("ev_wh_s"), sym("ev_wh_i"));
            // s = 0; i = 1; while i <= 5: s = s + i; i = i + 1
            let seq = StmtSeq::new(vec![
                Stmt::assign(s, Expr::int_const(0)),
                Stmt::assign(i, Expr::int_const(1)),
                Stmt::new(StmtKind::While {
                    cond: Expr::binary(BinOp::Le, Expr::symbol(i), Expr::int_const(5)),
                    body: StmtSeq::new(vec![
                        Stmt::assign(
                            s,
                            Expr::binary(BinOp::Add, Expr::symbol(s), Expr::symbol(i)),
                        ),
                        Stmt::assign(
                            i,
                            Expr::binary(BinOp::Add, Expr::symbol(i), Expr::int_const(1)),
                        ),
                    ]),
                }),
            ]);
            interp.exec_seq(&seq, env).unwrap();
            assert_eq!(env.lookup(s).unwrap().scalar_f64().unwrap(), 15.0);
        });
    }

    #[test]
    fn for_over_range_binds_columns() {
        Interpreter::with(|interp| {
            let env = fresh_env(interp);
            let (acc, v) = (sym("ev_for_acc"), sym("ev_for_v"));
            let seq = StmtSeq::new(vec![
                Stmt::assign(acc, Expr::int_const(0)),
                Stmt::new(StmtKind::For {
                    var: v,
                    iter: Expr::new(ExprKind::Range {
                        start: Some(Box::new(Expr::int_const(1))),
                        step: None,
                        stop: Some(Box::new(Expr::int_const(4))),
                    }),
                    body: StmtSeq::single(Stmt::assign(
                        acc,
                        Expr::binary(BinOp::Add, Expr::symbol(acc), Expr::symbol(v)),
                    )),
                }),
            ]);
            interp.exec_seq(&seq, env).unwrap();
            assert_eq!(env.lookup(acc).unwrap().scalar_f64().unwrap(), 10.0);
        });
    }

    #[test]
    fn break_exits_loop() {
        Interpreter::with(|interp| {
            let env = fresh_env(interp);
            let n = sym("ev_br_n");
            let seq = StmtSeq::new(vec![
                Stmt::assign(n, Expr::int_const(0)),
                Stmt::new(StmtKind::While {
                    cond: Expr::int_const(1),
                    body: StmtSeq::new(vec![
                        Stmt::assign(
                            n,
                            Expr::binary(BinOp::Add, Expr::symbol(n), Expr::int_const(1)),
                        ),
                        Stmt::new(StmtKind::IfElse {
                            cond: Expr::binary(
                                BinOp::Ge,
                                Expr::symbol(n),
                                Expr::int_const(3),
                            ),
                            then_seq: StmtSeq::single(Stmt::new(StmtKind::Break)),
                            else_seq: StmtSeq::empty(),
                        }),
                    ]),
                }),
            ]);
            interp.exec_seq(&seq, env).unwrap();
            assert_eq!(env.lookup(n).unwrap().scalar_f64().unwrap(), 3.0);
        });
    }

    #[test]
    fn end_resolves_via_association() {
        Interpreter::with(|interp| {
            let env = fresh_env(interp);
            let (a, x) = (sym("ev_end_a"), sym("ev_end_x"));
            let lit = Expr::new(ExprKind::Matrix {
                rows: vec![vec![
                    Expr::int_const(5),
                    Expr::int_const(6),
                    Expr::int_const(7),
                ]],
            });
            // x = a(end)
            let read = Expr::new(ExprKind::Param {
                symbol: a,
                args: vec![Expr::new(ExprKind::End {
                    assocs: vec![EndAssoc {
                        symbol: a,
                        dim_index: 0,
                        is_last: true,
                    }],
                })],
            });
            let seq = StmtSeq::new(vec![Stmt::assign(a, lit), Stmt::assign(x, read)]);
            interp.exec_seq(&seq, env).unwrap();
            assert_eq!(env.lookup(x).unwrap().scalar_f64().unwrap(), 7.0);
        });
    }

    #[test]
    fn string_literal_concat() {
        Interpreter::with(|interp| {
            let env = fresh_env(interp);
            let s = sym("ev_str_s");
            // s = ['ab' 'cd']
            let lit = Expr::new(ExprKind::Matrix {
                rows: vec![vec![
                    Expr::new(ExprKind::StrConst("ab".into())),
                    Expr::new(ExprKind::StrConst("cd".into())),
                ]],
            });
            interp
                .exec_seq(&StmtSeq::single(Stmt::assign(s, lit)), env)
                .unwrap();
            assert_eq!(env.lookup(s).unwrap().string_value().unwrap(), "abcd");
        });
    }

    #[test]
    fn lambda_captures_environment() {
        Interpreter::with(|interp| {
            let env = fresh_env(interp);
            let (k, f, r) = (sym("ev_lam_k"), sym("ev_lam_f"), sym("ev_lam_r"));
            let p = sym("ev_lam_p");
            // k = 10; f = @(p) p + k; r = f(5)
            let lambda = Expr::new(ExprKind::Lambda {
                params: vec![p],
                body: Box::new(Expr::binary(
                    BinOp::Add,
                    Expr::symbol(p),
                    Expr::symbol(k),
                )),
            });
            let call = Expr::new(ExprKind::Param {
                symbol: f,
                args: vec![Expr::int_const(5)],
            });
            let seq = StmtSeq::new(vec![
                Stmt::assign(k, Expr::int_const(10)),
                Stmt::assign(f, lambda),
                Stmt::assign(r, call),
            ]);
            interp.exec_seq(&seq, env).unwrap();
            assert_eq!(env.lookup(r).unwrap().scalar_f64().unwrap(), 15.0);
        });
    }

    #[test]
    fn switch_selects_matching_case() {
        Interpreter::with(|interp| {
            let env = fresh_env(interp);
            let (x, y) = (sym("ev_sw_x"), sym("ev_sw_y"));
            let seq = StmtSeq::new(vec![
                Stmt::assign(x, Expr::int_const(2)),
                Stmt::new(StmtKind::Switch {
                    value: Expr::symbol(x),
                    cases: vec![
                        (
                            Expr::int_const(1),
                            StmtSeq::single(Stmt::assign(y, Expr::int_const(10))),
                        ),
                        (
                            Expr::int_const(2),
                            StmtSeq::single(Stmt::assign(y, Expr::int_const(20))),
                        ),
                    ],
                    default: Some(StmtSeq::single(Stmt::assign(y, Expr::int_const(0)))),
                }),
            ]);
            interp.exec_seq(&seq, env).unwrap();
            assert_eq!(env.lookup(y).unwrap().scalar_f64().unwrap(), 20.0);
        });
    }
}
