//! Reaching definitions (forward).
//!
//! For each statement, the set of definition sites that may reach it,
//! per symbol. A site is an assignment statement, the synthetic
//! parameter site, or the environment sentinel (the symbol was never
//! defined in the function and resolves through the environment chain).
//!
//! Join is set union; transfer of an assignment replaces the fact for
//! each defined symbol with the singleton containing that assignment.

use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;

use indexmap::IndexMap;

use matlang_core::error::RunError;
use matlang_core::function::FuncRef;
use matlang_core::id::StmtId;
use matlang_core::stmt::{Stmt, StmtKind, StmtSeq};
use matlang_core::symbol::Symbol;
use matlang_core::typeinfo::TypeSetString;

/// One definition site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DefSite {
    /// The symbol is an input parameter.
    Param,
    /// The symbol comes from the environment (never defined locally).
    Env,
    /// The assignment statement with this ID.
    Stmt(StmtId),
}

/// Per-symbol reaching definition sets.
pub type DefMap = IndexMap<Symbol, BTreeSet<DefSite>>;

/// Analysis result: entry/exit fact per statement plus the function exit
/// map.
#[derive(Debug, Default)]
pub struct ReachDefInfo {
    pub before: HashMap<StmtId, DefMap>,
    pub after: HashMap<StmtId, DefMap>,
    pub exit: DefMap,
}

/// The reaching-definitions pass (signature per the analysis manager).
pub fn reaching_defs(
    func: FuncRef,
    body: &Rc<StmtSeq>,
    _arg_types: &TypeSetString,
    return_bottom: bool,
) -> Result<ReachDefInfo, RunError> {
    if return_bottom {
        return Ok(ReachDefInfo::default());
    }
    let mut info = ReachDefInfo::default();

    // Entry facts: every symbol in the body starts as environment-
    // resolved; input parameters get the synthetic parameter site.
    let mut entry = DefMap::new();
    let mut all_syms: BTreeSet<Symbol> = body.symbol_uses();
    all_syms.extend(body.symbol_defs());
    for sym in all_syms {
        entry.insert(sym, BTreeSet::from([DefSite::Env]));
    }
    if let Some(prog) = func.as_prog() {
        for &p in &prog.in_params {
            entry.insert(p, BTreeSet::from([DefSite::Param]));
        }
    }

    let mut exits = Vec::new();
    let fall = flow_seq(body, Some(entry), &mut info, &mut Flow::function(&mut exits));
    if let Some(map) = fall {
        exits.push(map);
    }
    info.exit = join_all(exits);
    Ok(info)
}

/// Collection points for non-local exits during a traversal.
struct Flow<'a> {
    returns: &'a mut Vec<DefMap>,
    breaks: Option<&'a mut Vec<DefMap>>,
    continues: Option<&'a mut Vec<DefMap>>,
}

impl<'a> Flow<'a> {
    fn function(returns: &'a mut Vec<DefMap>) -> Flow<'a> {
        Flow {
            returns,
            breaks: None,
            continues: None,
        }
    }
}

fn join(a: &DefMap, b: &DefMap) -> DefMap {
    let mut out = a.clone();
    for (sym, sites) in b {
        out.entry(*sym)
            .or_default()
            .extend(sites.iter().copied());
    }
    out
}

fn join_opt(a: Option<DefMap>, b: Option<DefMap>) -> Option<DefMap> {
    match (a, b) {
        (Some(x), Some(y)) => Some(join(&x, &y)),
        (Some(x), None) | (None, Some(x)) => Some(x),
        (None, None) => None,
    }
}

fn join_all(maps: Vec<DefMap>) -> DefMap {
    let mut iter = maps.into_iter();
    let Some(first) = iter.next() else {
        return DefMap::new();
    };
    iter.fold(first, |acc, m| join(&acc, &m))
}

/// Flows a map through a sequence. `None` means the point is
/// unreachable (after a break/continue/return).
fn flow_seq(
    seq: &StmtSeq,
    mut map: Option<DefMap>,
    info: &mut ReachDefInfo,
    flow: &mut Flow<'_>,
) -> Option<DefMap> {
    for stmt in &seq.stmts {
        map = flow_stmt(stmt, map, info, flow);
    }
    map
}

fn flow_stmt(
    stmt: &Stmt,
    map: Option<DefMap>,
    info: &mut ReachDefInfo,
    flow: &mut Flow<'_>,
) -> Option<DefMap> {
    let Some(map) = map else {
        return None;
    };
    info.before.insert(stmt.id, map.clone());
    let out = match &stmt.kind {
        StmtKind::Assign { .. } => {
            let mut out = map;
            for sym in stmt.symbol_defs() {
                out.insert(sym, BTreeSet::from([DefSite::Stmt(stmt.id)]));
            }
            Some(out)
        }
        StmtKind::Expr(_) => Some(map),
        StmtKind::IfElse {
            then_seq, else_seq, ..
        } => {
            let then_out = flow_seq(then_seq, Some(map.clone()), info, flow);
            let else_out = flow_seq(else_seq, Some(map), info, flow);
            join_opt(then_out, else_out)
        }
        StmtKind::Loop {
            init,
            test,
            body,
            incr,
            ..
        } => {
            let mut head = flow_seq(init, Some(map), info, flow);
            let exit;
            loop {
                let after_test = flow_seq(test, head.clone(), info, flow);
                let mut breaks = Vec::new();
                let mut continues = Vec::new();
                let mut inner = Flow {
                    returns: &mut *flow.returns,
                    breaks: Some(&mut breaks),
                    continues: Some(&mut continues),
                };
                let body_out = flow_seq(body, after_test.clone(), info, &mut inner);
                let incr_in = continues
                    .into_iter()
                    .fold(body_out, |acc, m| join_opt(acc, Some(m)));
                let incr_out = flow_seq(incr, incr_in, info, flow);
                let next_head = join_opt(head.clone(), incr_out);
                if next_head == head {
                    exit = breaks
                        .into_iter()
                        .fold(after_test, |acc, m| join_opt(acc, Some(m)));
                    break;
                }
                head = next_head;
            }
            exit
        }
        StmtKind::Break => {
            if let Some(breaks) = flow.breaks.as_deref_mut() {
                breaks.push(map);
            }
            None
        }
        StmtKind::Continue => {
            if let Some(continues) = flow.continues.as_deref_mut() {
                continues.push(map);
            }
            None
        }
        StmtKind::Return => {
            flow.returns.push(map);
            None
        }
        // Surface forms do not appear in lowered bodies; treat their
        // defs conservatively if they do.
        StmtKind::Switch { .. } | StmtKind::For { .. } | StmtKind::While { .. } => {
            let mut out = map;
            for sym in stmt.symbol_defs() {
                out.entry(sym)
                    .or_default()
                    .insert(DefSite::Stmt(stmt.id));
            }
            Some(out)
        }
    };
    if let Some(out_map) = &out {
        info.after.insert(stmt.id, out_map.clone());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use matlang_core::expr::Expr;
    use matlang_core::function::{Function, ProgFunction};
    use matlang_core::heap;

    fn sym(name: &str) -> Symbol {
        Symbol::intern(name)
    }

    fn prog(in_params: Vec<Symbol>, body: StmtSeq) -> FuncRef {
        heap::alloc_func(Function::Prog(ProgFunction::new(
            "rd",
            in_params,
            vec![],
            body,
        )))
    }

    #[test]
    fn params_get_param_site() {
        let x = sym("rd_x");
        let body = StmtSeq::single(Stmt::new(StmtKind::Expr(Expr::symbol(x))));
        let f = prog(vec![x], body);
        let body = f.as_prog().unwrap().current_body();
        let info = reaching_defs(f, &body, &TypeSetString::new(), false).unwrap();
        let stmt_id = body.stmts[0].id;
        assert_eq!(
            info.before[&stmt_id][&x],
            BTreeSet::from([DefSite::Param])
        );
    }

    #[test]
    fn undefined_symbol_maps_to_env() {
        let y = sym("rd_y");
        let body = StmtSeq::single(Stmt::new(StmtKind::Expr(Expr::symbol(y))));
        let f = prog(vec![], body);
        let body = f.as_prog().unwrap().current_body();
        let info = reaching_defs(f, &body, &TypeSetString::new(), false).unwrap();
        let stmt_id = body.stmts[0].id;
        assert_eq!(info.before[&stmt_id][&y], BTreeSet::from([DefSite::Env]));
    }

    #[test]
    fn assign_replaces_fact() {
        let z = sym("rd_z");
        let body = StmtSeq::new(vec![
            Stmt::assign(z, Expr::int_const(1)),
            Stmt::new(StmtKind::Expr(Expr::symbol(z))),
        ]);
        let f = prog(vec![], body);
        let body = f.as_prog().unwrap().current_body();
        let info = reaching_defs(f, &body, &TypeSetString::new(), false).unwrap();
        let def_id = body.stmts[0].id;
        let use_id = body.stmts[1].id;
        assert_eq!(
            info.before[&use_id][&z],
            BTreeSet::from([DefSite::Stmt(def_id)])
        );
    }

    #[test]
    fn branch_join_unions_sites() {
        let w = sym("rd_w");
        let then_def = Stmt::assign(w, Expr::int_const(1));
        let else_def = Stmt::assign(w, Expr::int_const(2));
        let (then_id, else_id) = (then_def.id, else_def.id);
        let body = StmtSeq::new(vec![
            Stmt::new(StmtKind::IfElse {
                cond: Expr::int_const(1),
                then_seq: StmtSeq::single(then_def),
                else_seq: StmtSeq::single(else_def),
            }),
            Stmt::new(StmtKind::Expr(Expr::symbol(w))),
        ]);
        let f = prog(vec![], body);
        let body = f.as_prog().unwrap().current_body();
        let info = reaching_defs(f, &body, &TypeSetString::new(), false).unwrap();
        let use_id = body.stmts[1].id;
        assert_eq!(
            info.before[&use_id][&w],
            BTreeSet::from([DefSite::Stmt(then_id), DefSite::Stmt(else_id)])
        );
    }

    #[test]
    fn loop_body_def_reaches_header() {
        let s = sym("rd_s");
        let t = sym("rd_t");
        let body_def = Stmt::assign(s, Expr::int_const(1));
        let body_def_id = body_def.id;
        let test_stmt = Stmt::assign(t, Expr::symbol(s));
        let test_id = test_stmt.id;
        let body = StmtSeq::single(Stmt::new(StmtKind::Loop {
            init: StmtSeq::empty(),
            test: StmtSeq::single(test_stmt),
            body: StmtSeq::single(body_def),
            incr: StmtSeq::empty(),
            test_var: t,
        }));
        let f = prog(vec![], body);
        let body = f.as_prog().unwrap().current_body();
        let info = reaching_defs(f, &body, &TypeSetString::new(), false).unwrap();
        // At the test, s may come from the environment (first iteration)
        // or from the body assignment (later iterations).
        let sites = &info.before[&test_id][&s];
        assert!(sites.contains(&DefSite::Env));
        assert!(sites.contains(&DefSite::Stmt(body_def_id)));
    }

    #[test]
    fn bottom_request_is_empty() {
        let f = prog(vec![], StmtSeq::empty());
        let body = f.as_prog().unwrap().current_body();
        let info = reaching_defs(f, &body, &TypeSetString::new(), true).unwrap();
        assert!(info.before.is_empty() && info.exit.is_empty());
    }
}
