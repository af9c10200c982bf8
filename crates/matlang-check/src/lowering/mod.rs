//! Lowering passes: surface IIR to canonical IIR.
//!
//! All passes are pure tree-to-tree rewrites; the source tree is left
//! intact and a new tree is produced. [`lower_function`] runs the full
//! pipeline in order and replaces the function's current body:
//!
//! 1. loop unification ([`loops`])
//! 2. switch elimination ([`switch`])
//! 3. end-expression binding ([`endexpr`])
//! 4. short-circuit elimination ([`shortcircuit`])
//! 5. split form ([`split`])
//!
//! followed by loop-nest annotation. Lowering is idempotent: re-running
//! the pipeline on an already-lowered body yields a structurally equal
//! tree.

pub mod endexpr;
pub mod loops;
pub mod shortcircuit;
pub mod split;
pub mod switch;

use matlang_core::function::ProgFunction;
use matlang_core::stmt::{Stmt, StmtKind, StmtSeq, ANN_INNERMOST, ANN_IN_LOOP, ANN_OUTERMOST};

/// Runs the full lowering pipeline on `func`'s original body and installs
/// the result as the current body. The original body is retained.
pub fn lower_function(func: &ProgFunction) {
    let lowered = lower_body(&func.orig_body, func);
    func.set_current_body(lowered);
}

/// Runs the pipeline on an arbitrary body (used for re-lowering and by
/// tests that check idempotence).
pub fn lower_body(body: &StmtSeq, func: &ProgFunction) -> StmtSeq {
    let body = loops::unify_loops(body, func);
    let body = switch::eliminate_switches(&body, func);
    let mut body = body;
    endexpr::bind_end_exprs(&mut body);
    let body = shortcircuit::eliminate_short_circuits(&body);
    let mut body = split::split_form(&body, func);
    annotate_loops(&mut body, 0);
    body
}

/// Sets the loop-position annotation bits: every statement inside a loop
/// body is `IN_LOOP`; a loop at nesting depth zero is `OUTERMOST`; a loop
/// whose body contains no further loop is `INNERMOST`.
fn annotate_loops(seq: &mut StmtSeq, depth: usize) {
    for stmt in &mut seq.stmts {
        if depth > 0 {
            stmt.add_annotation(ANN_IN_LOOP);
        }
        match &mut stmt.kind {
            StmtKind::Loop {
                init,
                test,
                body,
                incr,
                ..
            } => {
                let mut bits = 0;
                if depth == 0 {
                    bits |= ANN_OUTERMOST;
                }
                if !contains_loop(body) {
                    bits |= ANN_INNERMOST;
                }
                annotate_loops(init, depth + 1);
                annotate_loops(test, depth + 1);
                annotate_loops(body, depth + 1);
                annotate_loops(incr, depth + 1);
                stmt.add_annotation(bits);
            }
            StmtKind::IfElse {
                then_seq, else_seq, ..
            } => {
                annotate_loops(then_seq, depth);
                annotate_loops(else_seq, depth);
            }
            _ => {}
        }
    }
}

fn contains_loop(seq: &StmtSeq) -> bool {
    seq.stmts.iter().any(|s| match &s.kind {
        StmtKind::Loop { .. } | StmtKind::For { .. } | StmtKind::While { .. } => true,
        StmtKind::IfElse {
            then_seq, else_seq, ..
        } => contains_loop(then_seq) || contains_loop(else_seq),
        _ => false,
    })
}

/// Shared helper for passes that rewrite statement-by-statement: applies
/// `rewrite` to each statement, splicing the returned statements in
/// place.
pub(crate) fn map_seq(seq: &StmtSeq, mut rewrite: impl FnMut(&Stmt) -> Vec<Stmt>) -> StmtSeq {
    let mut out = Vec::with_capacity(seq.stmts.len());
    for stmt in &seq.stmts {
        out.extend(rewrite(stmt));
    }
    StmtSeq::new(out)
}
