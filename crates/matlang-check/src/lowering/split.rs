//! Split form: every intermediate value gets a name.
//!
//! After this pass, a statement's expressions satisfy: every
//! sub-expression is a constant, a symbol, a bound `end`, or an indexing
//! form kept in argument position; every compound operation (binary,
//! unary, call, literal) appears only at the top of an assignment's
//! right-hand side. Hoisted sub-expressions become assignments to
//! freshly minted `$t<k>` temporaries inserted immediately before the
//! enclosing statement, preserving evaluation order.
//!
//! Index arguments keep their `Range` nodes in place (a bare `:` has no
//! value outside the indexing context); range components are atomized.
//! `end` is atomic once the binding pass has run -- its associations make
//! it evaluable anywhere.

use matlang_core::expr::{Expr, ExprKind};
use matlang_core::function::ProgFunction;
use matlang_core::id::StmtId;
use matlang_core::stmt::{Stmt, StmtKind, StmtSeq};

/// Rewrites `seq` into split form.
pub fn split_form(seq: &StmtSeq, func: &ProgFunction) -> StmtSeq {
    let mut out = Vec::with_capacity(seq.stmts.len());
    for stmt in &seq.stmts {
        split_stmt(stmt, func, &mut out);
    }
    StmtSeq::new(out)
}

fn split_stmt(stmt: &Stmt, func: &ProgFunction, out: &mut Vec<Stmt>) {
    match &stmt.kind {
        StmtKind::Assign { lhs, rhs } => {
            let mut pre = Vec::new();
            let mut new_rhs = rhs.deep_copy();
            atomize_children(&mut new_rhs, &mut pre, func);
            let new_lhs = lhs
                .iter()
                .map(|target| {
                    let mut t = target.deep_copy();
                    // Indexed targets keep their shape; their index
                    // arguments are atomized like any other.
                    atomize_children(&mut t, &mut pre, func);
                    t
                })
                .collect();
            out.extend(pre);
            out.push(Stmt {
                id: StmtId::fresh(),
                kind: StmtKind::Assign {
                    lhs: new_lhs,
                    rhs: new_rhs,
                },
                suppress_output: stmt.suppress_output,
                annotations: stmt.annotations,
            });
        }
        StmtKind::Expr(e) => {
            let mut pre = Vec::new();
            let mut new_e = e.deep_copy();
            atomize_children(&mut new_e, &mut pre, func);
            out.extend(pre);
            out.push(Stmt {
                id: StmtId::fresh(),
                kind: StmtKind::Expr(new_e),
                suppress_output: stmt.suppress_output,
                annotations: stmt.annotations,
            });
        }
        StmtKind::IfElse {
            cond,
            then_seq,
            else_seq,
        } => {
            let mut pre = Vec::new();
            let new_cond = atomize_to_symbol(cond, &mut pre, func);
            out.extend(pre);
            out.push(Stmt {
                id: StmtId::fresh(),
                kind: StmtKind::IfElse {
                    cond: new_cond,
                    then_seq: split_form(then_seq, func),
                    else_seq: split_form(else_seq, func),
                },
                suppress_output: stmt.suppress_output,
                annotations: stmt.annotations,
            });
        }
        StmtKind::Loop {
            init,
            test,
            body,
            incr,
            test_var,
        } => {
            out.push(Stmt {
                id: StmtId::fresh(),
                kind: StmtKind::Loop {
                    init: split_form(init, func),
                    test: split_form(test, func),
                    body: split_form(body, func),
                    incr: split_form(incr, func),
                    test_var: *test_var,
                },
                suppress_output: stmt.suppress_output,
                annotations: stmt.annotations,
            });
        }
        // For/While/Switch are gone by this point in the pipeline; if the
        // pass is run stand-alone they pass through untouched.
        _ => out.push(stmt.deep_copy()),
    }
}

/// Returns `true` for expressions that may stay in place anywhere.
fn is_atomic(e: &Expr) -> bool {
    e.is_const() || e.is_symbol() || matches!(e.kind, ExprKind::End { .. })
}

/// Reduces `cond` to a constant or symbol, hoisting if needed.
fn atomize_to_symbol(cond: &Expr, pre: &mut Vec<Stmt>, func: &ProgFunction) -> Expr {
    if is_atomic(cond) {
        return cond.deep_copy();
    }
    let mut hoisted = cond.deep_copy();
    atomize_children(&mut hoisted, pre, func);
    let temp = func.new_temp();
    pre.push(Stmt::assign(temp, hoisted));
    Expr::symbol(temp)
}

/// Atomizes the children of `e`, leaving `e` itself in place.
fn atomize_children(e: &mut Expr, pre: &mut Vec<Stmt>, func: &ProgFunction) {
    match &mut e.kind {
        ExprKind::Param { args, .. } | ExprKind::CellIndex { args, .. } => {
            for arg in args {
                atomize_index_arg(arg, pre, func);
            }
        }
        // Lambda bodies are separate evaluation contexts; they are not
        // split here.
        ExprKind::Lambda { .. } => {}
        _ => {
            for child in e.sub_exprs_mut() {
                atomize_value(child, pre, func);
            }
        }
    }
}

/// Atomizes an index argument: ranges stay in place (their components
/// atomized), everything else follows the value rule.
fn atomize_index_arg(arg: &mut Expr, pre: &mut Vec<Stmt>, func: &ProgFunction) {
    if let ExprKind::Range { .. } = arg.kind {
        for part in arg.sub_exprs_mut() {
            atomize_value(part, pre, func);
        }
        return;
    }
    atomize_value(arg, pre, func);
}

/// Atomizes a value position: compound expressions are hoisted into a
/// temporary assignment after their own children have been atomized.
fn atomize_value(e: &mut Expr, pre: &mut Vec<Stmt>, func: &ProgFunction) {
    if is_atomic(e) {
        return;
    }
    atomize_children(e, pre, func);
    let temp = func.new_temp();
    let hoisted = std::mem::replace(e, Expr::symbol(temp));
    pre.push(Stmt::assign(temp, hoisted));
}
