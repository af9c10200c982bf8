//! Switch elimination: a switch becomes an if-else chain.
//!
//! The switch value is evaluated once into a temporary; each case arm
//! tests it against the case expression with the equality operator, and
//! the default arm becomes the final else:
//!
//! ```text
//! switch E; case C1; B1; case C2; B2; otherwise; D; end
//! ==>
//! $s = E;
//! if ($s == C1) B1 else { if ($s == C2) B2 else D }
//! ```

use matlang_core::expr::{BinOp, Expr};
use matlang_core::function::ProgFunction;
use matlang_core::id::StmtId;
use matlang_core::stmt::{Stmt, StmtKind, StmtSeq};

use super::map_seq;

/// Rewrites every `switch` in `seq` into nested `IfElse` chains.
pub fn eliminate_switches(seq: &StmtSeq, func: &ProgFunction) -> StmtSeq {
    map_seq(seq, |stmt| eliminate_stmt(stmt, func))
}

fn eliminate_stmt(stmt: &Stmt, func: &ProgFunction) -> Vec<Stmt> {
    let kind = match &stmt.kind {
        StmtKind::Switch {
            value,
            cases,
            default,
        } => {
            let value_sym = func.new_temp();
            let bind = Stmt::assign(value_sym, value.deep_copy());

            // Build the chain inside-out: the default arm is the
            // innermost else.
            let mut chain = default
                .as_ref()
                .map(|s| eliminate_switches(s, func))
                .unwrap_or_else(StmtSeq::empty);
            for (case_expr, case_body) in cases.iter().rev() {
                let test = Expr::binary(
                    BinOp::Eq,
                    Expr::symbol(value_sym),
                    case_expr.deep_copy(),
                );
                let if_stmt = Stmt::new(StmtKind::IfElse {
                    cond: test,
                    then_seq: eliminate_switches(case_body, func),
                    else_seq: chain,
                });
                chain = StmtSeq::single(if_stmt);
            }
            return std::iter::once(bind).chain(chain.stmts).collect();
        }
        StmtKind::IfElse {
            cond,
            then_seq,
            else_seq,
        } => StmtKind::IfElse {
            cond: cond.deep_copy(),
            then_seq: eliminate_switches(then_seq, func),
            else_seq: eliminate_switches(else_seq, func),
        },
        StmtKind::Loop {
            init,
            test,
            body,
            incr,
            test_var,
        } => StmtKind::Loop {
            init: eliminate_switches(init, func),
            test: eliminate_switches(test, func),
            body: eliminate_switches(body, func),
            incr: eliminate_switches(incr, func),
            test_var: *test_var,
        },
        StmtKind::For { var, iter, body } => StmtKind::For {
            var: *var,
            iter: iter.deep_copy(),
            body: eliminate_switches(body, func),
        },
        StmtKind::While { cond, body } => StmtKind::While {
            cond: cond.deep_copy(),
            body: eliminate_switches(body, func),
        },
        _ => return vec![stmt.deep_copy()],
    };
    vec![Stmt {
        id: StmtId::fresh(),
        kind,
        suppress_output: stmt.suppress_output,
        annotations: stmt.annotations,
    }]
}

#[cfg(test)]
mod tests {
    use super::*;
    use matlang_core::stmt::collect_stmt_kinds;
    use matlang_core::symbol::Symbol;

    #[test]
    fn switch_becomes_if_chain() {
        let f = ProgFunction::new("t", vec![], vec![], StmtSeq::empty());
        let y = Symbol::intern("y");
        let sw = Stmt::new(StmtKind::Switch {
            value: Expr::symbol(Symbol::intern("x")),
            cases: vec![
                (Expr::int_const(1), StmtSeq::single(Stmt::assign(y, Expr::int_const(10)))),
                (Expr::int_const(2), StmtSeq::single(Stmt::assign(y, Expr::int_const(20)))),
            ],
            default: Some(StmtSeq::single(Stmt::assign(y, Expr::int_const(0)))),
        });
        let lowered = eliminate_switches(&StmtSeq::single(sw), &f);
        let kinds = collect_stmt_kinds(&lowered);
        assert!(!kinds.contains("Switch"));
        assert!(kinds.contains("IfElse"));
        // First statement binds the switch value to a temp.
        assert!(matches!(lowered.stmts[0].kind, StmtKind::Assign { .. }));
        // The chain nests: if == 1 else { if == 2 else default }.
        match &lowered.stmts[1].kind {
            StmtKind::IfElse { else_seq, .. } => {
                assert!(matches!(else_seq.stmts[0].kind, StmtKind::IfElse { .. }));
            }
            other => panic!("expected IfElse, got {:?}", other),
        }
    }

    #[test]
    fn switch_without_default_gets_empty_else() {
        let f = ProgFunction::new("t", vec![], vec![], StmtSeq::empty());
        let sw = Stmt::new(StmtKind::Switch {
            value: Expr::int_const(1),
            cases: vec![(Expr::int_const(1), StmtSeq::empty())],
            default: None,
        });
        let lowered = eliminate_switches(&StmtSeq::single(sw), &f);
        match &lowered.stmts[1].kind {
            StmtKind::IfElse { else_seq, .. } => assert!(else_seq.is_empty()),
            other => panic!("expected IfElse, got {:?}", other),
        }
    }
}
