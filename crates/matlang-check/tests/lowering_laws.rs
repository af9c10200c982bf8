//! Property tests for the lowering pipeline.
//!
//! Lowering must be idempotent and must land in the canonical statement
//! core regardless of the surface tree it is given. The generator
//! produces small arbitrary surface programs out of arithmetic
//! expressions, branches, and loops.

use proptest::prelude::*;

use matlang_check::lowering;
use matlang_core::expr::{BinOp, Expr, ExprKind};
use matlang_core::function::ProgFunction;
use matlang_core::stmt::{collect_stmt_kinds, Stmt, StmtKind, StmtSeq};
use matlang_core::symbol::Symbol;

const CANONICAL: &[&str] = &[
    "IfElse", "Loop", "Assign", "Expr", "Break", "Continue", "Return",
];

fn var_strategy() -> impl Strategy<Value = Symbol> {
    (0u8..4).prop_map(|i| Symbol::intern(&format!("pl_v{}", i)))
}

fn expr_strategy() -> impl Strategy<Value = Expr> {
    let leaf = prop_oneof![
        (-100i64..100).prop_map(Expr::int_const),
        var_strategy().prop_map(Expr::symbol),
    ];
    leaf.prop_recursive(3, 16, 2, |inner| {
        (
            prop_oneof![
                Just(BinOp::Add),
                Just(BinOp::Sub),
                Just(BinOp::Mult),
                Just(BinOp::ElemMult),
                Just(BinOp::Div),
                Just(BinOp::Lt),
                Just(BinOp::ScAnd),
                Just(BinOp::ScOr),
            ],
            inner.clone(),
            inner,
        )
            .prop_map(|(op, a, b)| Expr::binary(op, a, b))
    })
}

fn stmt_strategy() -> impl Strategy<Value = Stmt> {
    let assign = (var_strategy(), expr_strategy())
        .prop_map(|(v, e)| Stmt::assign(v, e));
    assign.prop_recursive(2, 8, 2, |inner| {
        prop_oneof![
            (expr_strategy(), inner.clone(), inner.clone()).prop_map(|(c, t, e)| {
                Stmt::new(StmtKind::IfElse {
                    cond: c,
                    then_seq: StmtSeq::single(t),
                    else_seq: StmtSeq::single(e),
                })
            }),
            (expr_strategy(), inner.clone()).prop_map(|(c, b)| {
                Stmt::new(StmtKind::While {
                    cond: c,
                    body: StmtSeq::single(b),
                })
            }),
            (var_strategy(), expr_strategy(), inner).prop_map(|(v, it, b)| {
                Stmt::new(StmtKind::For {
                    var: v,
                    iter: it,
                    body: StmtSeq::single(b),
                })
            }),
        ]
    })
}

fn seq_strategy() -> impl Strategy<Value = StmtSeq> {
    prop::collection::vec(stmt_strategy(), 1..4).prop_map(StmtSeq::new)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn lowering_lands_in_canonical_core(seq in seq_strategy()) {
        let func = ProgFunction::new("pl_f", vec![], vec![], StmtSeq::empty());
        let lowered = lowering::lower_body(&seq, &func);
        let kinds = collect_stmt_kinds(&lowered);
        for kind in kinds {
            prop_assert!(CANONICAL.contains(&kind), "non-canonical kind {}", kind);
        }
    }

    #[test]
    fn lowering_is_idempotent(seq in seq_strategy()) {
        let func = ProgFunction::new("pl_g", vec![], vec![], StmtSeq::empty());
        let once = lowering::lower_body(&seq, &func);
        let twice = lowering::lower_body(&once, &func);
        prop_assert_eq!(once.to_string(), twice.to_string());
    }

    #[test]
    fn lowering_does_not_lose_defined_symbols(seq in seq_strategy()) {
        let func = ProgFunction::new("pl_h", vec![], vec![], StmtSeq::empty());
        let before = seq.symbol_defs();
        let lowered = lowering::lower_body(&seq, &func);
        let after = lowered.symbol_defs();
        for s in before {
            prop_assert!(after.contains(&s), "definition of {} lost", s);
        }
    }

    #[test]
    fn split_form_atomizes_compound_children(seq in seq_strategy()) {
        fn check_expr(e: &Expr, root: bool) -> bool {
            if !root && matches!(e.kind, ExprKind::Binary { .. } | ExprKind::Unary { .. }) {
                return false;
            }
            e.sub_exprs().iter().all(|c| check_expr(c, false))
        }
        fn check(seq: &StmtSeq) -> bool {
            seq.stmts.iter().all(|s| match &s.kind {
                StmtKind::Assign { lhs, rhs } => {
                    lhs.iter().all(|t| check_expr(t, true)) && check_expr(rhs, true)
                }
                StmtKind::Expr(e) => check_expr(e, true),
                StmtKind::IfElse { then_seq, else_seq, .. } => {
                    check(then_seq) && check(else_seq)
                }
                StmtKind::Loop { init, test, body, incr, .. } => {
                    check(init) && check(test) && check(body) && check(incr)
                }
                _ => true,
            })
        }
        let func = ProgFunction::new("pl_s", vec![], vec![], StmtSeq::empty());
        let lowered = lowering::lower_body(&seq, &func);
        prop_assert!(check(&lowered), "compound child survived split:\n{}", lowered);
    }
}
