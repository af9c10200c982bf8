//! Function metrics: statement counts, loop nesting, call sites.
//!
//! A lightweight walk that feeds the process-wide profiling counters and
//! reports the set of callees a body can reach (used by the CLI's
//! verbose report).

use std::collections::BTreeSet;
use std::rc::Rc;

use matlang_core::error::RunError;
use matlang_core::expr::{Expr, ExprKind};
use matlang_core::function::FuncRef;
use matlang_core::metrics as counters;
use matlang_core::stmt::{Stmt, StmtKind, StmtSeq};
use matlang_core::symbol::Symbol;
use matlang_core::typeinfo::TypeSetString;

/// Analysis result.
#[derive(Debug, Default)]
pub struct MetricsInfo {
    pub num_stmts: usize,
    pub max_loop_depth: usize,
    pub num_call_sites: usize,
    /// Head symbols of call-shaped expressions (unresolved names
    /// included).
    pub callees: BTreeSet<Symbol>,
}

/// The metrics pass (signature per the analysis manager).
pub fn compute_metrics(
    _func: FuncRef,
    body: &Rc<StmtSeq>,
    _arg_types: &TypeSetString,
    return_bottom: bool,
) -> Result<MetricsInfo, RunError> {
    if return_bottom {
        return Ok(MetricsInfo::default());
    }
    let mut info = MetricsInfo::default();
    walk_seq(body, 0, &mut info);

    counters::incr_counter(counters::METRIC_NUM_STMTS, info.num_stmts as u64);
    counters::max_counter(counters::METRIC_MAX_LOOP_DEPTH, info.max_loop_depth as u64);
    counters::incr_counter(counters::METRIC_NUM_CALL_SITES, info.num_call_sites as u64);
    Ok(info)
}

fn walk_seq(seq: &StmtSeq, depth: usize, info: &mut MetricsInfo) {
    for stmt in &seq.stmts {
        walk_stmt(stmt, depth, info);
    }
}

fn walk_stmt(stmt: &Stmt, depth: usize, info: &mut MetricsInfo) {
    info.num_stmts += 1;
    info.max_loop_depth = info.max_loop_depth.max(depth);
    match &stmt.kind {
        StmtKind::Assign { lhs, rhs } => {
            for t in lhs {
                walk_expr(t, info);
            }
            walk_expr(rhs, info);
        }
        StmtKind::Expr(e) => walk_expr(e, info),
        StmtKind::IfElse {
            cond,
            then_seq,
            else_seq,
        } => {
            walk_expr(cond, info);
            walk_seq(then_seq, depth, info);
            walk_seq(else_seq, depth, info);
        }
        StmtKind::Loop {
            init,
            test,
            body,
            incr,
            ..
        } => {
            walk_seq(init, depth + 1, info);
            walk_seq(test, depth + 1, info);
            walk_seq(body, depth + 1, info);
            walk_seq(incr, depth + 1, info);
        }
        StmtKind::For { iter, body, .. } => {
            walk_expr(iter, info);
            walk_seq(body, depth + 1, info);
        }
        StmtKind::While { cond, body } => {
            walk_expr(cond, info);
            walk_seq(body, depth + 1, info);
        }
        StmtKind::Switch {
            value,
            cases,
            default,
        } => {
            walk_expr(value, info);
            for (e, s) in cases {
                walk_expr(e, info);
                walk_seq(s, depth, info);
            }
            if let Some(s) = default {
                walk_seq(s, depth, info);
            }
        }
        StmtKind::Break | StmtKind::Continue | StmtKind::Return => {}
    }
}

fn walk_expr(expr: &Expr, info: &mut MetricsInfo) {
    if let ExprKind::Param { symbol, .. } = &expr.kind {
        info.num_call_sites += 1;
        info.callees.insert(*symbol);
    }
    for sub in expr.sub_exprs() {
        walk_expr(sub, info);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matlang_core::function::{Function, ProgFunction};
    use matlang_core::heap;

    fn sym(name: &str) -> Symbol {
        Symbol::intern(name)
    }

    #[test]
    fn counts_statements_and_depth() {
        let t = sym("mx_t");
        let inner = Stmt::new(StmtKind::Loop {
            init: StmtSeq::empty(),
            test: StmtSeq::single(Stmt::assign(t, Expr::int_const(0))),
            body: StmtSeq::single(Stmt::new(StmtKind::Break)),
            incr: StmtSeq::empty(),
            test_var: t,
        });
        let outer = Stmt::new(StmtKind::Loop {
            init: StmtSeq::empty(),
            test: StmtSeq::single(Stmt::assign(t, Expr::int_const(1))),
            body: StmtSeq::single(inner),
            incr: StmtSeq::empty(),
            test_var: t,
        });
        let f = heap::alloc_func(Function::Prog(ProgFunction::new(
            "mx_f",
            vec![],
            vec![],
            StmtSeq::single(outer),
        )));
        let body = f.as_prog().unwrap().current_body();
        let info = compute_metrics(f, &body, &TypeSetString::new(), false).unwrap();
        // outer, its test assign, inner, inner's test assign, break.
        assert_eq!(info.num_stmts, 5);
        assert_eq!(info.max_loop_depth, 2);
    }

    #[test]
    fn counts_call_sites() {
        let y = sym("mx_y");
        let call = Expr::new(ExprKind::Param {
            symbol: sym("mx_callee"),
            args: vec![Expr::int_const(1)],
        });
        let f = heap::alloc_func(Function::Prog(ProgFunction::new(
            "mx_g",
            vec![],
            vec![],
            StmtSeq::single(Stmt::assign(y, call)),
        )));
        let body = f.as_prog().unwrap().current_body();
        let info = compute_metrics(f, &body, &TypeSetString::new(), false).unwrap();
        assert_eq!(info.num_call_sites, 1);
        assert!(info.callees.contains(&sym("mx_callee")));
    }
}
