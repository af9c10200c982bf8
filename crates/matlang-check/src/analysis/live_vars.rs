//! Live variables (backward).
//!
//! A symbol is live before a statement if the statement uses it, or the
//! statement does not kill it and it is live after. Only whole-symbol
//! assignments kill; an indexed write reads the matrix it updates, so it
//! both uses and preserves the symbol. Loop back-edges feed the live set
//! at the loop header into the end of the body until a fixed point.

use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;

use matlang_core::error::RunError;
use matlang_core::expr::ExprKind;
use matlang_core::function::FuncRef;
use matlang_core::id::StmtId;
use matlang_core::stmt::{Stmt, StmtKind, StmtSeq};
use matlang_core::symbol::Symbol;
use matlang_core::typeinfo::TypeSetString;

/// Symbol set fact.
pub type LiveSet = BTreeSet<Symbol>;

/// Analysis result: live-before/live-after per statement and the live
/// set at function entry.
#[derive(Debug, Default)]
pub struct LiveVarInfo {
    pub before: HashMap<StmtId, LiveSet>,
    pub after: HashMap<StmtId, LiveSet>,
    pub entry: LiveSet,
}

/// The live-variables pass (signature per the analysis manager).
pub fn live_vars(
    func: FuncRef,
    body: &Rc<StmtSeq>,
    _arg_types: &TypeSetString,
    return_bottom: bool,
) -> Result<LiveVarInfo, RunError> {
    if return_bottom {
        return Ok(LiveVarInfo::default());
    }
    let mut info = LiveVarInfo::default();

    // At function exit the output parameters are live (they are read
    // back out of the environment).
    let mut exit_live = LiveSet::new();
    if let Some(prog) = func.as_prog() {
        exit_live.extend(prog.out_params.iter().copied());
    }

    let ctx = Ctx {
        function_exit: &exit_live,
        loop_exit: None,
        loop_head: None,
    };
    info.entry = flow_seq(body, exit_live.clone(), &mut info, &ctx);
    Ok(info)
}

/// Live sets at the applicable non-local jump targets.
struct Ctx<'a> {
    function_exit: &'a LiveSet,
    loop_exit: Option<&'a LiveSet>,
    loop_head: Option<&'a LiveSet>,
}

/// Backward flow through a sequence: `live_out` is the set after the
/// last statement; the return value is the set before the first.
fn flow_seq(seq: &StmtSeq, live_out: LiveSet, info: &mut LiveVarInfo, ctx: &Ctx<'_>) -> LiveSet {
    let mut live = live_out;
    for stmt in seq.stmts.iter().rev() {
        live = flow_stmt(stmt, live, info, ctx);
    }
    live
}

fn flow_stmt(stmt: &Stmt, live_after: LiveSet, info: &mut LiveVarInfo, ctx: &Ctx<'_>) -> LiveSet {
    info.after.insert(stmt.id, live_after.clone());
    let live_before = match &stmt.kind {
        StmtKind::Assign { lhs, .. } => {
            let mut live = live_after;
            for sym in kills(lhs) {
                live.remove(&sym);
            }
            live.extend(stmt.symbol_uses());
            live
        }
        StmtKind::Expr(_) => {
            let mut live = live_after;
            live.extend(stmt.symbol_uses());
            live
        }
        StmtKind::IfElse {
            cond,
            then_seq,
            else_seq,
        } => {
            let then_in = flow_seq(then_seq, live_after.clone(), info, ctx);
            let else_in = flow_seq(else_seq, live_after, info, ctx);
            let mut live: LiveSet = then_in.union(&else_in).copied().collect();
            live.extend(cond.symbol_uses());
            live
        }
        StmtKind::Loop {
            init,
            test,
            body,
            incr,
            test_var,
        } => {
            // Iterate the cycle test -> body -> incr -> test until the
            // head estimate stabilizes.
            let mut head = LiveSet::new();
            loop {
                let incr_in = flow_seq(incr, head.clone(), info, &Ctx {
                    function_exit: ctx.function_exit,
                    loop_exit: Some(&live_after),
                    loop_head: Some(&head),
                });
                let body_ctx = Ctx {
                    function_exit: ctx.function_exit,
                    loop_exit: Some(&live_after),
                    loop_head: Some(&head),
                };
                let body_in = flow_seq(body, incr_in, info, &body_ctx);
                // After the test either the body runs or the loop exits.
                let mut test_out: LiveSet = body_in.union(&live_after).copied().collect();
                test_out.insert(*test_var);
                let new_head = flow_seq(test, test_out, info, ctx);
                if new_head == head {
                    break;
                }
                head = new_head;
            }
            flow_seq(init, head, info, ctx)
        }
        StmtKind::Break => ctx
            .loop_exit
            .cloned()
            .unwrap_or_default(),
        StmtKind::Continue => ctx
            .loop_head
            .cloned()
            .unwrap_or_default(),
        StmtKind::Return => ctx.function_exit.clone(),
        StmtKind::Switch { .. } | StmtKind::For { .. } | StmtKind::While { .. } => {
            let mut live = live_after;
            live.extend(stmt.symbol_uses());
            live
        }
    };
    info.before.insert(stmt.id, live_before.clone());
    live_before
}

/// Symbols a multi-target assignment kills: plain symbol targets only.
fn kills(lhs: &[matlang_core::expr::Expr]) -> Vec<Symbol> {
    lhs.iter()
        .filter_map(|t| match &t.kind {
            ExprKind::Symbol(s) => Some(*s),
            _ => None,
        })
        .collect()
}
