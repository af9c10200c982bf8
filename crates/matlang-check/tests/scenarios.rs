//! End-to-end interpreter scenarios over hand-built IIR.
//!
//! These mirror the canonical behaviors the system promises: arithmetic
//! binding, loop accumulation, scalar indexed reads, recursion, switch
//! lowering, and the indexed-write boundary conditions.

use pretty_assertions::assert_eq;

use matlang_check::interpreter::Interpreter;
use matlang_check::lowering;
use matlang_core::env::Environment;
use matlang_core::expr::{BinOp, Expr, ExprKind};
use matlang_core::function::{FuncRef, Function, ProgFunction};
use matlang_core::heap;
use matlang_core::object::{DataObject, ObjKind};
use matlang_core::stmt::{collect_stmt_kinds, Stmt, StmtKind, StmtSeq};
use matlang_core::symbol::Symbol;
use matlang_core::typeinfo::{type_set_make, type_set_widest, TypeInfo};

fn sym(name: &str) -> Symbol {
    Symbol::intern(name)
}

fn param(head: &str, args: Vec<Expr>) -> Expr {
    Expr::new(ExprKind::Param {
        symbol: sym(head),
        args,
    })
}

fn alloc_prog(prog: ProgFunction) -> FuncRef {
    heap::alloc_func(Function::Prog(prog))
}

fn scalar(v: f64) -> &'static DataObject {
    heap::alloc(DataObject::f64_scalar(v))
}

#[test]
fn script_arithmetic_binds_and_infers() {
    // x = 1 + 2; y = x * 3;
    let (x, y) = (sym("sc1_x"), sym("sc1_y"));
    let body = StmtSeq::new(vec![
        Stmt::assign(
            x,
            Expr::binary(BinOp::Add, Expr::int_const(1), Expr::int_const(2)),
        ),
        Stmt::assign(
            y,
            Expr::binary(BinOp::Mult, Expr::symbol(x), Expr::int_const(3)),
        ),
    ]);
    let func = alloc_prog(ProgFunction::new("sc1", vec![], vec![x, y], body));

    Interpreter::with(|interp| {
        interp.load_functions(&[func]);
        let prog = func.as_prog().unwrap();
        let env = Environment::extend(prog.local_env.borrow().unwrap());
        interp.exec_seq(&prog.current_body(), env).unwrap();
        assert_eq!(env.lookup(x).unwrap().scalar_f64().unwrap(), 3.0);
        assert_eq!(env.lookup(y).unwrap().scalar_f64().unwrap(), 9.0);
    });

    // Type inference sees scalar integers for both.
    let prog = func.as_prog().unwrap();
    let body = prog.current_body();
    let info = matlang_check::analysis::manager::request(
        matlang_check::analysis::type_inference::type_inference,
        func,
        &body,
        &Vec::new(),
    )
    .unwrap();
    for out in &info.out_types {
        let widest = type_set_widest(out);
        assert!(widest.is_scalar);
        assert!(widest.is_integer);
        assert_eq!(widest.kind, ObjKind::MatrixF64);
    }
}

/// `function s = sum_to(n): s = 0; for i = 1:n; s = s + i; end`
fn sum_to_function() -> FuncRef {
    let (n, s, i) = (sym("sum_n"), sym("sum_s"), sym("sum_i"));
    let body = StmtSeq::new(vec![
        Stmt::assign(s, Expr::int_const(0)),
        Stmt::new(StmtKind::For {
            var: i,
            iter: Expr::new(ExprKind::Range {
                start: Some(Box::new(Expr::int_const(1))),
                step: None,
                stop: Some(Box::new(Expr::symbol(n))),
            }),
            body: StmtSeq::single(Stmt::assign(
                s,
                Expr::binary(BinOp::Add, Expr::symbol(s), Expr::symbol(i)),
            )),
        }),
    ]);
    alloc_prog(ProgFunction::new("sum_to", vec![n], vec![s], body))
}

#[test]
fn loop_function_accumulates() {
    let func = sum_to_function();
    Interpreter::with(|interp| {
        interp.load_functions(&[func]);
        let out = interp.call_function(func, &[scalar(5.0)], 1).unwrap();
        assert_eq!(out[0].scalar_f64().unwrap(), 15.0);
    });
    // The lowered body is canonical: no surface loops survive.
    let kinds = collect_stmt_kinds(&func.as_prog().unwrap().current_body());
    for k in ["For", "While", "Switch"] {
        assert!(!kinds.contains(k), "{} survived lowering", k);
    }
}

#[test]
fn scalar_indexed_read() {
    // function y = pick(a, i, j): y = a(i, j)
    let (a, i, j, y) = (sym("pk_a"), sym("pk_i"), sym("pk_j"), sym("pk_y"));
    let body = StmtSeq::single(Stmt::assign(
        y,
        Expr::new(ExprKind::Param {
            symbol: a,
            args: vec![Expr::symbol(i), Expr::symbol(j)],
        }),
    ));
    let func = alloc_prog(ProgFunction::new("pick", vec![a, i, j], vec![y], body));

    // A = [10 20; 30 40] column-major.
    let matrix = heap::alloc(DataObject::MatrixF64(
        matlang_core::matrix::Matrix::from_data(
            [2usize, 2].into_iter().collect(),
            vec![10.0, 30.0, 20.0, 40.0],
        )
        .into(),
    ));
    Interpreter::with(|interp| {
        interp.load_functions(&[func]);
        let out = interp
            .call_function(func, &[matrix, scalar(2.0), scalar(1.0)], 1)
            .unwrap();
        assert_eq!(out[0].scalar_f64().unwrap(), 30.0);
    });
}

#[test]
fn recursive_factorial() {
    // function r = fact(n): if n <= 1; r = 1; else r = n * fact(n - 1)
    let (n, r) = (sym("fact_n"), sym("fact_r"));
    let rec_call = param(
        "fact",
        vec![Expr::binary(
            BinOp::Sub,
            Expr::symbol(n),
            Expr::int_const(1),
        )],
    );
    let body = StmtSeq::single(Stmt::new(StmtKind::IfElse {
        cond: Expr::binary(BinOp::Le, Expr::symbol(n), Expr::int_const(1)),
        then_seq: StmtSeq::single(Stmt::assign(r, Expr::int_const(1))),
        else_seq: StmtSeq::single(Stmt::assign(
            r,
            Expr::binary(BinOp::Mult, Expr::symbol(n), rec_call),
        )),
    }));
    let func = alloc_prog(ProgFunction::new("fact", vec![n], vec![r], body));

    Interpreter::with(|interp| {
        interp.load_functions(&[func]);
        let out = interp.call_function(func, &[scalar(5.0)], 1).unwrap();
        assert_eq!(out[0].scalar_f64().unwrap(), 120.0);
    });
}

#[test]
fn switch_lowers_before_analysis_and_selects() {
    // switch x; case 1; y = 10; case 2; y = 20; otherwise; y = 0; end
    let (x, y) = (sym("sw_x"), sym("sw_y"));
    let body = StmtSeq::new(vec![
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
    let func = alloc_prog(ProgFunction::new("sw", vec![], vec![y], body));

    Interpreter::with(|interp| {
        interp.load_functions(&[func]);
        // Lowered before any analysis runs: only canonical kinds remain.
        let kinds = collect_stmt_kinds(&func.as_prog().unwrap().current_body());
        assert!(!kinds.contains("Switch"));
        assert!(kinds.contains("IfElse"));

        let out = interp.call_function(func, &[], 1).unwrap();
        assert_eq!(out[0].scalar_f64().unwrap(), 20.0);
    });
}

#[test]
fn negative_indexed_write_is_an_error() {
    // a = [1 2 3]; a(-1) = 5
    let a = sym("neg_a");
    let body = StmtSeq::new(vec![
        Stmt::assign(
            a,
            Expr::new(ExprKind::Matrix {
                rows: vec![vec![
                    Expr::int_const(1),
                    Expr::int_const(2),
                    Expr::int_const(3),
                ]],
            }),
        ),
        Stmt::new(StmtKind::Assign {
            lhs: vec![Expr::new(ExprKind::Param {
                symbol: a,
                args: vec![Expr::int_const(-1)],
            })],
            rhs: Expr::int_const(5),
        }),
    ]);
    let func = alloc_prog(ProgFunction::new("neg", vec![], vec![], body));

    Interpreter::with(|interp| {
        interp.load_functions(&[func]);
        let err = interp.call_function(func, &[], 0).unwrap_err();
        // Write-path negatives carry the read-path message.
        assert!(err.to_string().contains("negative index in matrix read"));
    });
}

#[test]
fn write_past_end_expands() {
    // a = [1 2 3]; a(5) = 9; s = numel(a)
    let (a, s) = (sym("exp_a"), sym("exp_s"));
    let body = StmtSeq::new(vec![
        Stmt::assign(
            a,
            Expr::new(ExprKind::Matrix {
                rows: vec![vec![
                    Expr::int_const(1),
                    Expr::int_const(2),
                    Expr::int_const(3),
                ]],
            }),
        ),
        Stmt::new(StmtKind::Assign {
            lhs: vec![Expr::new(ExprKind::Param {
                symbol: a,
                args: vec![Expr::int_const(5)],
            })],
            rhs: Expr::int_const(9),
        }),
        Stmt::assign(s, param("numel", vec![Expr::symbol(a)])),
    ]);
    let func = alloc_prog(ProgFunction::new("expand", vec![], vec![s], body));

    Interpreter::with(|interp| {
        interp.load_functions(&[func]);
        let out = interp.call_function(func, &[], 1).unwrap();
        assert_eq!(out[0].scalar_f64().unwrap(), 5.0);
    });
}

#[test]
fn insufficient_returns_is_reported() {
    // function r = one(): r = 1; then [p, q] = one()
    let r = sym("one_r");
    let callee = alloc_prog(ProgFunction::new(
        "one_out",
        vec![],
        vec![r],
        StmtSeq::single(Stmt::assign(r, Expr::int_const(1))),
    ));
    let (p, q) = (sym("one_p"), sym("one_q"));
    let caller_body = StmtSeq::single(Stmt::new(StmtKind::Assign {
        lhs: vec![Expr::symbol(p), Expr::symbol(q)],
        rhs: param("one_out", vec![]),
    }));
    let caller = alloc_prog(ProgFunction::new("one_caller", vec![], vec![], caller_body));

    Interpreter::with(|interp| {
        interp.load_functions(&[callee, caller]);
        let err = interp.call_function(caller, &[], 0).unwrap_err();
        assert!(err
            .to_string()
            .contains("insufficient number of return values"));
    });
}

#[test]
fn partial_outputs_stop_at_first_unset() {
    // function [a, b, c] = partial(): a = 1; c = 3  (b never set)
    let (a, b, c) = (sym("po_a"), sym("po_b"), sym("po_c"));
    let body = StmtSeq::new(vec![
        Stmt::assign(a, Expr::int_const(1)),
        Stmt::assign(c, Expr::int_const(3)),
    ]);
    let func = alloc_prog(ProgFunction::new("partial", vec![], vec![a, b, c], body));
    Interpreter::with(|interp| {
        interp.load_functions(&[func]);
        let out = interp.call_function(func, &[], 3).unwrap();
        // Collection stops at the unset second output.
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].scalar_f64().unwrap(), 1.0);
    });
}

#[test]
fn lowering_pipeline_is_idempotent() {
    let func = sum_to_function();
    let prog = func.as_prog().unwrap();
    let once = lowering::lower_body(&prog.orig_body, prog);
    let twice = lowering::lower_body(&once, prog);
    assert_eq!(once.to_string(), twice.to_string());
}

#[test]
fn type_inference_is_sound_on_executed_values() {
    // Soundness spot-check: the inferred descriptor for the sum
    // function's output admits the value execution produces.
    let func = sum_to_function();
    Interpreter::with(|interp| {
        interp.load_functions(&[func]);
        let out = interp.call_function(func, &[scalar(4.0)], 1).unwrap();

        let prog = func.as_prog().unwrap();
        let body = prog.current_body();
        let args = vec![type_set_make(TypeInfo::scalar(ObjKind::MatrixF64, true))];
        let info = matlang_check::analysis::manager::request(
            matlang_check::analysis::type_inference::type_inference,
            func,
            &body,
            &args,
        )
        .unwrap();
        assert!(!info.out_types.is_empty());
        assert!(
            info.out_types[0].iter().any(|t| t.admits(out[0])),
            "no inferred descriptor admits the runtime value"
        );
    });
}
