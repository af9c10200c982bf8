//! End-expression binding.
//!
//! Every `end` appearing inside an indexing argument is annotated with
//! the matrix symbol being indexed, the argument position it occupies,
//! and whether it is the last argument (in which case it means the
//! product of the remaining dimensions). Nested indexing rebinds: in
//! `a(b(end))` the inner `end` refers to `b`.
//!
//! This pass mutates the tree in place (associations are annotation
//! state, not structure).

use matlang_core::expr::{EndAssoc, Expr, ExprKind};
use matlang_core::stmt::{StmtKind, StmtSeq};
use matlang_core::symbol::Symbol;

/// Binds all `end` expressions in a body.
pub fn bind_end_exprs(seq: &mut StmtSeq) {
    for stmt in &mut seq.stmts {
        match &mut stmt.kind {
            StmtKind::IfElse {
                cond,
                then_seq,
                else_seq,
            } => {
                bind_in_expr(cond, None);
                bind_end_exprs(then_seq);
                bind_end_exprs(else_seq);
            }
            StmtKind::Switch {
                value,
                cases,
                default,
            } => {
                bind_in_expr(value, None);
                for (e, s) in cases {
                    bind_in_expr(e, None);
                    bind_end_exprs(s);
                }
                if let Some(s) = default {
                    bind_end_exprs(s);
                }
            }
            StmtKind::For { iter, body, .. } => {
                bind_in_expr(iter, None);
                bind_end_exprs(body);
            }
            StmtKind::While { cond, body } => {
                bind_in_expr(cond, None);
                bind_end_exprs(body);
            }
            StmtKind::Loop {
                init,
                test,
                body,
                incr,
                ..
            } => {
                bind_end_exprs(init);
                bind_end_exprs(test);
                bind_end_exprs(body);
                bind_end_exprs(incr);
            }
            StmtKind::Assign { lhs, rhs } => {
                for target in lhs {
                    bind_in_expr(target, None);
                }
                bind_in_expr(rhs, None);
            }
            StmtKind::Expr(e) => bind_in_expr(e, None),
            StmtKind::Break | StmtKind::Continue | StmtKind::Return => {}
        }
    }
}

/// Context for an `end`: the matrix symbol, the argument slot, and the
/// last-argument flag.
type EndContext = (Symbol, usize, bool);

fn bind_in_expr(expr: &mut Expr, ctx: Option<EndContext>) {
    match &mut expr.kind {
        ExprKind::End { assocs } => {
            if let Some((symbol, dim_index, is_last)) = ctx {
                *assocs = vec![EndAssoc {
                    symbol,
                    dim_index,
                    is_last,
                }];
            }
        }
        ExprKind::Param { symbol, args } | ExprKind::CellIndex { symbol, args } => {
            let n_args = args.len();
            let head = *symbol;
            for (k, arg) in args.iter_mut().enumerate() {
                bind_in_expr(arg, Some((head, k, k == n_args - 1)));
            }
        }
        ExprKind::Unary { operand, .. } => bind_in_expr(operand, ctx),
        ExprKind::Binary { lhs, rhs, .. } => {
            bind_in_expr(lhs, ctx);
            bind_in_expr(rhs, ctx);
        }
        ExprKind::Range { start, step, stop } => {
            for part in [start, step, stop].into_iter().flatten() {
                bind_in_expr(part, ctx);
            }
        }
        ExprKind::Matrix { rows } | ExprKind::CellArray { rows } => {
            for e in rows.iter_mut().flatten() {
                bind_in_expr(e, ctx);
            }
        }
        ExprKind::Lambda { body, .. } => bind_in_expr(body, None),
        _ => {}
    }
}
