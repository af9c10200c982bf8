//! Short-circuit elimination.
//!
//! `&&` and `||` at the top of an if-else condition become nested
//! if-else control flow, so the second operand is only evaluated when the
//! first one requires it:
//!
//! ```text
//! if (a && b) T else E  ==>  if a { if b T else E' } else E''
//! if (a || b) T else E  ==>  if a T' else { if b T'' else E }
//! ```
//!
//! (`E'`, `T'` are structural copies.) The rewrite applies recursively,
//! so chained short-circuit conditions unfold completely. Array-form
//! `&`/`|` are untouched, as are short-circuit operators in non-test
//! positions (the interpreter evaluates those lazily itself).

use matlang_core::expr::{BinOp, Expr, ExprKind};
use matlang_core::id::StmtId;
use matlang_core::stmt::{Stmt, StmtKind, StmtSeq};

use super::map_seq;

/// Rewrites short-circuit conditional tests in `seq`.
pub fn eliminate_short_circuits(seq: &StmtSeq) -> StmtSeq {
    map_seq(seq, |stmt| vec![eliminate_stmt(stmt)])
}

fn eliminate_stmt(stmt: &Stmt) -> Stmt {
    let kind = match &stmt.kind {
        StmtKind::IfElse {
            cond,
            then_seq,
            else_seq,
        } => {
            let then_seq = eliminate_short_circuits(then_seq);
            let else_seq = eliminate_short_circuits(else_seq);
            return build_if(cond, then_seq, else_seq, stmt);
        }
        StmtKind::Loop {
            init,
            test,
            body,
            incr,
            test_var,
        } => StmtKind::Loop {
            init: eliminate_short_circuits(init),
            test: eliminate_short_circuits(test),
            body: eliminate_short_circuits(body),
            incr: eliminate_short_circuits(incr),
            test_var: *test_var,
        },
        _ => return stmt.deep_copy(),
    };
    Stmt {
        id: StmtId::fresh(),
        kind,
        suppress_output: stmt.suppress_output,
        annotations: stmt.annotations,
    }
}

/// Builds an if-else over `cond`, unfolding top-level short-circuit
/// operators into nesting.
fn build_if(cond: &Expr, then_seq: StmtSeq, else_seq: StmtSeq, origin: &Stmt) -> Stmt {
    if let ExprKind::Binary { op, lhs, rhs } = &cond.kind {
        match op {
            BinOp::ScAnd => {
                let inner = build_if(rhs, then_seq, else_seq.deep_copy(), origin);
                return build_if(lhs, StmtSeq::single(inner), else_seq, origin);
            }
            BinOp::ScOr => {
                let inner = build_if(rhs, then_seq.deep_copy(), else_seq, origin);
                return build_if(lhs, then_seq, StmtSeq::single(inner), origin);
            }
            _ => {}
        }
    }
    Stmt {
        id: StmtId::fresh(),
        kind: StmtKind::IfElse {
            cond: cond.deep_copy(),
            then_seq,
            else_seq,
        },
        suppress_output: origin.suppress_output,
        annotations: origin.annotations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matlang_core::symbol::Symbol;

    fn sym_expr(name: &str) -> Expr {
        Expr::symbol(Symbol::intern(name))
    }

    fn assign_marker(value: i64) -> StmtSeq {
        StmtSeq::single(Stmt::assign(Symbol::intern("m"), Expr::int_const(value)))
    }

    #[test]
    fn and_condition_nests() {
        let cond = Expr::binary(BinOp::ScAnd, sym_expr("a"), sym_expr("b"));
        let stmt = Stmt::new(StmtKind::IfElse {
            cond,
            then_seq: assign_marker(1),
            else_seq: assign_marker(2),
        });
        let out = eliminate_short_circuits(&StmtSeq::single(stmt));
        let StmtKind::IfElse {
            cond,
            then_seq,
            else_seq,
        } = &out.stmts[0].kind
        else {
            panic!("expected IfElse");
        };
        assert!(matches!(cond.kind, ExprKind::Symbol(_)));
        // then branch holds the inner test on b.
        assert!(matches!(then_seq.stmts[0].kind, StmtKind::IfElse { .. }));
        // else branch is the original else.
        assert!(matches!(else_seq.stmts[0].kind, StmtKind::Assign { .. }));
    }

    #[test]
    fn or_condition_nests_in_else() {
        let cond = Expr::binary(BinOp::ScOr, sym_expr("a"), sym_expr("b"));
        let stmt = Stmt::new(StmtKind::IfElse {
            cond,
            then_seq: assign_marker(1),
            else_seq: assign_marker(2),
        });
        let out = eliminate_short_circuits(&StmtSeq::single(stmt));
        let StmtKind::IfElse {
            then_seq, else_seq, ..
        } = &out.stmts[0].kind
        else {
            panic!("expected IfElse");
        };
        assert!(matches!(then_seq.stmts[0].kind, StmtKind::Assign { .. }));
        assert!(matches!(else_seq.stmts[0].kind, StmtKind::IfElse { .. }));
    }

    #[test]
    fn chained_conditions_unfold_completely() {
        // a && b && c -- parsed left-associative: (a && b) && c.
        let cond = Expr::binary(
            BinOp::ScAnd,
            Expr::binary(BinOp::ScAnd, sym_expr("a"), sym_expr("b")),
            sym_expr("c"),
        );
        let stmt = Stmt::new(StmtKind::IfElse {
            cond,
            then_seq: assign_marker(1),
            else_seq: StmtSeq::empty(),
        });
        let out = eliminate_short_circuits(&StmtSeq::single(stmt));
        // No short-circuit operator survives in any condition.
        fn no_sc(seq: &StmtSeq) -> bool {
            seq.stmts.iter().all(|s| match &s.kind {
                StmtKind::IfElse {
                    cond,
                    then_seq,
                    else_seq,
                } => {
                    !matches!(
                        cond.kind,
                        ExprKind::Binary {
                            op: BinOp::ScAnd | BinOp::ScOr,
                            ..
                        }
                    ) && no_sc(then_seq)
                        && no_sc(else_seq)
                }
                _ => true,
            })
        }
        assert!(no_sc(&out));
    }

    #[test]
    fn array_forms_left_untouched() {
        let cond = Expr::binary(BinOp::And, sym_expr("a"), sym_expr("b"));
        let stmt = Stmt::new(StmtKind::IfElse {
            cond,
            then_seq: StmtSeq::empty(),
            else_seq: StmtSeq::empty(),
        });
        let out = eliminate_short_circuits(&StmtSeq::single(stmt));
        let StmtKind::IfElse { cond, .. } = &out.stmts[0].kind else {
            panic!("expected IfElse");
        };
        assert!(matches!(
            cond.kind,
            ExprKind::Binary { op: BinOp::And, .. }
        ));
    }
}
