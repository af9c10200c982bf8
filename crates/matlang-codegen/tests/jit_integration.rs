//! JIT integration tests: compiled versions must agree with the
//! interpreter observationally.
//!
//! These run real LLVM compilation through the JIT engine, so they need
//! LLVM available at build time (the same requirement as the crate
//! itself).

use matlang_check::interpreter::Interpreter;
use matlang_core::config;
use matlang_core::expr::{BinOp, Expr, ExprKind};
use matlang_core::function::{FuncRef, Function, ProgFunction};
use matlang_core::heap;
use matlang_core::metrics;
use matlang_core::object::DataObject;
use matlang_core::stmt::{Stmt, StmtKind, StmtSeq};
use matlang_core::symbol::Symbol;

fn sym(name: &str) -> Symbol {
    Symbol::intern(name)
}

fn scalar(v: f64) -> &'static DataObject {
    heap::alloc(DataObject::f64_scalar(v))
}

fn alloc_prog(prog: ProgFunction) -> FuncRef {
    heap::alloc_func(Function::Prog(prog))
}

fn enable_jit() {
    matlang_codegen::initialize();
    config::set_value("jit_enable", "true").unwrap();
}

/// Runs `func` twice -- interpreter-only and with the JIT enabled --
/// and checks the scalar results agree.
fn assert_agreement(func: FuncRef, args: &[&'static DataObject], expected: f64) {
    enable_jit();
    Interpreter::with(|interp| {
        interp.load_functions(&[func]);

        config::set_value("jit_enable", "false").unwrap();
        let interpreted = interp.call_function(func, args, 1).unwrap();
        assert_eq!(interpreted[0].scalar_f64().unwrap(), expected);

        config::set_value("jit_enable", "true").unwrap();
        let jitted = interp.call_function(func, args, 1).unwrap();
        assert_eq!(
            jitted[0].scalar_f64().unwrap(),
            expected,
            "JIT result disagrees with the interpreter"
        );
    });
}

#[test]
fn jit_sum_loop_matches_interpreter() {
    // function s = jsum(n): s = 0; for i = 1:n; s = s + i; end
    let (n, s, i) = (sym("js_n"), sym("js_s"), sym("js_i"));
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
    let func = alloc_prog(ProgFunction::new("jsum", vec![n], vec![s], body));
    assert_agreement(func, &[scalar(5.0)], 15.0);
}

#[test]
fn jit_factorial_compiles_and_recurses() {
    let (n, r) = (sym("jf_n"), sym("jf_r"));
    let rec = Expr::new(ExprKind::Param {
        symbol: sym("jfact"),
        args: vec![Expr::binary(
            BinOp::Sub,
            Expr::symbol(n),
            Expr::int_const(1),
        )],
    });
    let body = StmtSeq::single(Stmt::new(StmtKind::IfElse {
        cond: Expr::binary(BinOp::Le, Expr::symbol(n), Expr::int_const(1)),
        then_seq: StmtSeq::single(Stmt::assign(r, Expr::int_const(1))),
        else_seq: StmtSeq::single(Stmt::assign(
            r,
            Expr::binary(BinOp::Mult, Expr::symbol(n), rec),
        )),
    }));
    let func = alloc_prog(ProgFunction::new("jfact", vec![n], vec![r], body));

    let before = metrics::get_counter(metrics::FUNC_VERS_COUNT);
    assert_agreement(func, &[scalar(5.0)], 120.0);
    let after = metrics::get_counter(metrics::FUNC_VERS_COUNT);
    assert!(after > before, "no version was compiled");
}

#[test]
fn jit_scalar_read_agrees() {
    // function y = jpick(a, i, j): y = a(i, j)
    let (a, i, j, y) = (sym("jp_a"), sym("jp_i"), sym("jp_j"), sym("jp_y"));
    let body = StmtSeq::single(Stmt::assign(
        y,
        Expr::new(ExprKind::Param {
            symbol: a,
            args: vec![Expr::symbol(i), Expr::symbol(j)],
        }),
    ));
    let func = alloc_prog(ProgFunction::new("jpick", vec![a, i, j], vec![y], body));
    let matrix = heap::alloc(DataObject::MatrixF64(
        matlang_core::matrix::Matrix::from_data(
            [2usize, 2].into_iter().collect(),
            vec![10.0, 30.0, 20.0, 40.0],
        )
        .into(),
    ));
    enable_jit();
    Interpreter::with(|interp| {
        interp.load_functions(&[func]);
        let out = interp
            .call_function(func, &[matrix, scalar(2.0), scalar(1.0)], 1)
            .unwrap();
        assert_eq!(out[0].scalar_f64().unwrap(), 30.0);
    });
}

#[test]
fn jit_out_of_bounds_read_errors() {
    // function y = joob(a): y = a(9)
    let (a, y) = (sym("jo_a"), sym("jo_y"));
    let body = StmtSeq::single(Stmt::assign(
        y,
        Expr::new(ExprKind::Param {
            symbol: a,
            args: vec![Expr::int_const(9)],
        }),
    ));
    let func = alloc_prog(ProgFunction::new("joob", vec![a], vec![y], body));
    let vec3 = heap::alloc(DataObject::MatrixF64(
        matlang_core::matrix::Matrix::row(vec![1.0, 2.0, 3.0]).into(),
    ));
    enable_jit();
    Interpreter::with(|interp| {
        interp.load_functions(&[func]);
        let err = interp.call_function(func, &[vec3], 1).unwrap_err();
        assert!(
            err.to_string()
                .contains("index out of bounds in matrix read"),
            "unexpected error: {}",
            err
        );
    });
}

#[test]
fn jit_negative_index_write_errors() {
    // function s = jneg(a): a(-1) = 5; s = a(1)
    // The write-path negative guard reports the read-path message.
    let (a, s) = (sym("jn_a"), sym("jn_s"));
    let body = StmtSeq::new(vec![
        Stmt::new(StmtKind::Assign {
            lhs: vec![Expr::new(ExprKind::Param {
                symbol: a,
                args: vec![Expr::int_const(-1)],
            })],
            rhs: Expr::int_const(5),
        }),
        Stmt::assign(
            s,
            Expr::new(ExprKind::Param {
                symbol: a,
                args: vec![Expr::int_const(1)],
            }),
        ),
    ]);
    let func = alloc_prog(ProgFunction::new("jneg", vec![a], vec![s], body));
    let vec3 = heap::alloc(DataObject::MatrixF64(
        matlang_core::matrix::Matrix::row(vec![1.0, 2.0, 3.0]).into(),
    ));
    enable_jit();
    Interpreter::with(|interp| {
        interp.load_functions(&[func]);
        let err = interp.call_function(func, &[vec3], 1).unwrap_err();
        assert!(
            err.to_string().contains("negative index in matrix read"),
            "unexpected error: {}",
            err
        );
    });
}

#[test]
fn jit_write_past_end_expands() {
    // function s = jgrow(a): a(5) = 9; s = a(5)
    let (a, s) = (sym("jg_a"), sym("jg_s"));
    let body = StmtSeq::new(vec![
        Stmt::new(StmtKind::Assign {
            lhs: vec![Expr::new(ExprKind::Param {
                symbol: a,
                args: vec![Expr::int_const(5)],
            })],
            rhs: Expr::int_const(9),
        }),
        Stmt::assign(
            s,
            Expr::new(ExprKind::Param {
                symbol: a,
                args: vec![Expr::int_const(5)],
            }),
        ),
    ]);
    let func = alloc_prog(ProgFunction::new("jgrow", vec![a], vec![s], body));
    let vec3 = heap::alloc(DataObject::MatrixF64(
        matlang_core::matrix::Matrix::row(vec![1.0, 2.0, 3.0]).into(),
    ));
    assert_agreement(func, &[vec3], 9.0);
}

#[test]
fn jit_branch_merge_produces_value() {
    // function r = jbr(c): if c; r = 1; else r = 2; end
    let (c, r) = (sym("jb_c"), sym("jb_r"));
    let body = StmtSeq::single(Stmt::new(StmtKind::IfElse {
        cond: Expr::symbol(c),
        then_seq: StmtSeq::single(Stmt::assign(r, Expr::int_const(1))),
        else_seq: StmtSeq::single(Stmt::assign(r, Expr::int_const(2))),
    }));
    let func = alloc_prog(ProgFunction::new("jbr", vec![c], vec![r], body));
    assert_agreement(func, &[scalar(0.0)], 2.0);
}

#[test]
fn jit_library_call_optimized_path() {
    // function r = jmath(x): r = sqrt(x) + sin(0)
    let (x, r) = (sym("jm_x"), sym("jm_r"));
    let body = StmtSeq::single(Stmt::assign(
        r,
        Expr::binary(
            BinOp::Add,
            Expr::new(ExprKind::Param {
                symbol: sym("sqrt"),
                args: vec![Expr::symbol(x)],
            }),
            Expr::new(ExprKind::Param {
                symbol: sym("sin"),
                args: vec![Expr::int_const(0)],
            }),
        ),
    ));
    let func = alloc_prog(ProgFunction::new("jmath", vec![x], vec![r], body));
    assert_agreement(func, &[scalar(16.0)], 4.0);
}
