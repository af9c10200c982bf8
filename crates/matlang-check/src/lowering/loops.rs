//! Loop unification: `for` and `while` become the single `Loop` form.
//!
//! A `for` loop iterates the columns of its iterator expression. The
//! unified form binds the iterator and a column index in the init
//! sequence, tests the index against the column count, extracts the
//! current column into the induction variable at the top of the body, and
//! advances the index in the increment sequence:
//!
//! ```text
//! for v = E; B; end
//! ==>
//! init: $i = E; $k = 1;
//! test: $t = ($k <= size($i, 2));
//! body: v = $i(:, $k); B
//! incr: $k = $k + 1;
//! ```
//!
//! A `while` loop keeps its condition as the test-sequence assignment and
//! has empty init and increment sequences.

use matlang_core::expr::{BinOp, Expr, ExprKind};
use matlang_core::function::ProgFunction;
use matlang_core::stmt::{Stmt, StmtKind, StmtSeq};
use matlang_core::symbol::Symbol;

use super::map_seq;

/// Rewrites every `for` and `while` in `seq` into the `Loop` form.
pub fn unify_loops(seq: &StmtSeq, func: &ProgFunction) -> StmtSeq {
    map_seq(seq, |stmt| vec![unify_stmt(stmt, func)])
}

fn unify_stmt(stmt: &Stmt, func: &ProgFunction) -> Stmt {
    let kind = match &stmt.kind {
        StmtKind::For { var, iter, body } => {
            let body = unify_loops(body, func);
            lower_for(*var, iter, body, func)
        }
        StmtKind::While { cond, body } => {
            let body = unify_loops(body, func);
            lower_while(cond, body, func)
        }
        StmtKind::Loop {
            init,
            test,
            body,
            incr,
            test_var,
        } => StmtKind::Loop {
            init: unify_loops(init, func),
            test: unify_loops(test, func),
            body: unify_loops(body, func),
            incr: unify_loops(incr, func),
            test_var: *test_var,
        },
        StmtKind::IfElse {
            cond,
            then_seq,
            else_seq,
        } => StmtKind::IfElse {
            cond: cond.deep_copy(),
            then_seq: unify_loops(then_seq, func),
            else_seq: unify_loops(else_seq, func),
        },
        StmtKind::Switch {
            value,
            cases,
            default,
        } => StmtKind::Switch {
            value: value.deep_copy(),
            cases: cases
                .iter()
                .map(|(e, s)| (e.deep_copy(), unify_loops(s, func)))
                .collect(),
            default: default.as_ref().map(|s| unify_loops(s, func)),
        },
        _ => return stmt.deep_copy(),
    };
    Stmt {
        id: matlang_core::id::StmtId::fresh(),
        kind,
        suppress_output: stmt.suppress_output,
        annotations: stmt.annotations,
    }
}

fn lower_for(var: Symbol, iter: &Expr, body: StmtSeq, func: &ProgFunction) -> StmtKind {
    let iter_sym = func.new_temp();
    let index_sym = func.new_temp();
    let test_sym = func.new_temp();

    let init = StmtSeq::new(vec![
        Stmt::assign(iter_sym, iter.deep_copy()),
        Stmt::assign(index_sym, Expr::int_const(1)),
    ]);

    // $t = ($k <= size($i, 2))
    let size_call = Expr::new(ExprKind::Param {
        symbol: Symbol::intern("size"),
        args: vec![Expr::symbol(iter_sym), Expr::int_const(2)],
    });
    let test = StmtSeq::single(Stmt::assign(
        test_sym,
        Expr::binary(BinOp::Le, Expr::symbol(index_sym), size_call),
    ));

    // v = $i(:, $k)
    let column = Expr::new(ExprKind::Param {
        symbol: iter_sym,
        args: vec![
            Expr::new(ExprKind::Range {
                start: None,
                step: None,
                stop: None,
            }),
            Expr::symbol(index_sym),
        ],
    });
    let mut body_stmts = vec![Stmt::assign(var, column)];
    body_stmts.extend(body.stmts);

    let incr = StmtSeq::single(Stmt::assign(
        index_sym,
        Expr::binary(BinOp::Add, Expr::symbol(index_sym), Expr::int_const(1)),
    ));

    StmtKind::Loop {
        init,
        test,
        body: StmtSeq::new(body_stmts),
        incr,
        test_var: test_sym,
    }
}

fn lower_while(cond: &Expr, body: StmtSeq, func: &ProgFunction) -> StmtKind {
    let test_sym = func.new_temp();
    StmtKind::Loop {
        init: StmtSeq::empty(),
        test: StmtSeq::single(Stmt::assign(test_sym, cond.deep_copy())),
        body,
        incr: StmtSeq::empty(),
        test_var: test_sym,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matlang_core::stmt::collect_stmt_kinds;

    fn test_func() -> ProgFunction {
        ProgFunction::new("t", vec![], vec![], StmtSeq::empty())
    }

    #[test]
    fn for_becomes_loop() {
        let f = test_func();
        let body = StmtSeq::single(Stmt::new(StmtKind::For {
            var: Symbol::intern("i"),
            iter: Expr::new(ExprKind::Range {
                start: Some(Box::new(Expr::int_const(1))),
                step: None,
                stop: Some(Box::new(Expr::int_const(10))),
            }),
            body: StmtSeq::empty(),
        }));
        let lowered = unify_loops(&body, &f);
        let kinds = collect_stmt_kinds(&lowered);
        assert!(!kinds.contains("For"));
        assert!(kinds.contains("Loop"));
        // The loop's body starts with the induction-variable extraction.
        match &lowered.stmts[0].kind {
            StmtKind::Loop { body, init, .. } => {
                assert_eq!(init.stmts.len(), 2);
                assert!(matches!(body.stmts[0].kind, StmtKind::Assign { .. }));
            }
            other => panic!("expected Loop, got {:?}", other),
        }
    }

    #[test]
    fn while_becomes_loop_with_empty_init_incr() {
        let f = test_func();
        let body = StmtSeq::single(Stmt::new(StmtKind::While {
            cond: Expr::int_const(1),
            body: StmtSeq::single(Stmt::new(StmtKind::Break)),
        }));
        let lowered = unify_loops(&body, &f);
        match &lowered.stmts[0].kind {
            StmtKind::Loop {
                init, incr, test, ..
            } => {
                assert!(init.is_empty());
                assert!(incr.is_empty());
                assert_eq!(test.stmts.len(), 1);
            }
            other => panic!("expected Loop, got {:?}", other),
        }
    }

    #[test]
    fn nested_loops_unify() {
        let f = test_func();
        let inner = Stmt::new(StmtKind::While {
            cond: Expr::int_const(0),
            body: StmtSeq::empty(),
        });
        let outer = Stmt::new(StmtKind::While {
            cond: Expr::int_const(1),
            body: StmtSeq::single(inner),
        });
        let lowered = unify_loops(&StmtSeq::single(outer), &f);
        let kinds = collect_stmt_kinds(&lowered);
        assert!(!kinds.contains("While"));
    }
}
