//! Array-copy placement.
//!
//! Decides where a matrix must be cloned before an in-place mutation so
//! value semantics hold without a copy-on-write runtime. The analysis
//! tracks may-alias classes created by whole-symbol assignments
//! (`b = a`); an indexed write to a symbol that shares its class with
//! anything else (or that is an input parameter, which aliases the
//! caller's value) requires a copy at that statement, after which the
//! symbol stands alone again.
//!
//! Copies for writes inside a loop whose alias was created before the
//! loop are attached to the loop header instead, so the JIT can guard
//! them with the loop test and skip them when the body never runs.
//!
//! Calls to functions whose bodies are unavailable invalidate all
//! aliases flowing through their arguments (the conservative reading of
//! aliasing across unknown callees). The analysis is only consulted when
//! `jit_copy_enable` is set; otherwise the runtime's copy-on-write
//! discipline is assumed.

use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;

use matlang_core::error::RunError;
use matlang_core::expr::{Expr, ExprKind};
use matlang_core::function::FuncRef;
use matlang_core::id::StmtId;
use matlang_core::stmt::{Stmt, StmtKind, StmtSeq};
use matlang_core::symbol::Symbol;
use matlang_core::typeinfo::TypeSetString;

/// One required copy: clone `symbol` before mutating it; `masked`
/// records the other members of its alias class at that point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyInfo {
    pub symbol: Symbol,
    pub masked: BTreeSet<Symbol>,
}

/// Analysis result.
#[derive(Debug, Default)]
pub struct CopyPlacementInfo {
    /// Copies to perform immediately before a statement executes.
    pub at_stmt: HashMap<StmtId, Vec<CopyInfo>>,
    /// Copies to perform under the loop's test guard, keyed by the loop
    /// statement.
    pub loop_guarded: HashMap<StmtId, Vec<CopyInfo>>,
    /// Input parameters that must be copied before first use.
    pub param_copies: Vec<Symbol>,
}

/// The copy-placement pass (signature per the analysis manager).
pub fn copy_placement(
    func: FuncRef,
    body: &Rc<StmtSeq>,
    _arg_types: &TypeSetString,
    return_bottom: bool,
) -> Result<CopyPlacementInfo, RunError> {
    if return_bottom {
        return Ok(CopyPlacementInfo::default());
    }
    let mut info = CopyPlacementInfo::default();

    let params: BTreeSet<Symbol> = func
        .as_prog()
        .map(|p| p.in_params.iter().copied().collect())
        .unwrap_or_default();

    // Parameters that are indexed-written before any whole reassignment
    // must be copied at entry.
    let written = indexed_write_targets(body);
    for &p in &params {
        if written.contains(&p) {
            info.param_copies.push(p);
        }
    }

    let mut state = AliasState {
        classes: Vec::new(),
    };
    scan_seq(body, &mut state, &mut info, None);
    Ok(info)
}

/// Union-find-free alias classes: small programs, small classes.
#[derive(Debug, Clone)]
struct AliasState {
    classes: Vec<BTreeSet<Symbol>>,
}

impl AliasState {
    fn class_of(&self, sym: Symbol) -> Option<usize> {
        self.classes.iter().position(|c| c.contains(&sym))
    }

    /// `dst = src`: dst joins src's class.
    fn alias(&mut self, dst: Symbol, src: Symbol) {
        self.remove(dst);
        match self.class_of(src) {
            Some(idx) => {
                self.classes[idx].insert(dst);
            }
            None => {
                self.classes.push(BTreeSet::from([src, dst]));
            }
        }
    }

    /// The symbol now holds a fresh value.
    fn remove(&mut self, sym: Symbol) {
        if let Some(idx) = self.class_of(sym) {
            self.classes[idx].remove(&sym);
            if self.classes[idx].len() <= 1 {
                self.classes.remove(idx);
            }
        }
    }

    /// Other members sharing `sym`'s class.
    fn aliases_of(&self, sym: Symbol) -> BTreeSet<Symbol> {
        match self.class_of(sym) {
            Some(idx) => {
                let mut others = self.classes[idx].clone();
                others.remove(&sym);
                others
            }
            None => BTreeSet::new(),
        }
    }

    /// An unknown callee may capture any argument: alias all argument
    /// symbols together so later writes force copies.
    fn invalidate_all(&mut self, syms: impl IntoIterator<Item = Symbol>) {
        let set: BTreeSet<Symbol> = syms.into_iter().collect();
        if set.len() < 2 {
            // A single escaping symbol still becomes externally visible;
            // pair it with itself is meaningless, so track via a
            // singleton class only when it joins something later.
            for s in set {
                if self.class_of(s).is_none() {
                    self.classes.push(BTreeSet::from([s]));
                }
            }
            return;
        }
        for s in &set {
            self.remove(*s);
        }
        self.classes.push(set);
    }
}

/// Loop context: the innermost enclosing loop and the symbols aliased
/// before it was entered.
struct LoopCtx {
    loop_id: StmtId,
    pre_loop: AliasState,
}

fn scan_seq(
    seq: &StmtSeq,
    state: &mut AliasState,
    info: &mut CopyPlacementInfo,
    loop_ctx: Option<&LoopCtx>,
) {
    for stmt in &seq.stmts {
        scan_stmt(stmt, state, info, loop_ctx);
    }
}

fn scan_stmt(
    stmt: &Stmt,
    state: &mut AliasState,
    info: &mut CopyPlacementInfo,
    loop_ctx: Option<&LoopCtx>,
) {
    match &stmt.kind {
        StmtKind::Assign { lhs, rhs } => {
            // Unknown-callee boundary: arguments escape.
            if let Some(args) = call_args(rhs) {
                state.invalidate_all(args);
            }
            for target in lhs {
                match &target.kind {
                    ExprKind::Symbol(dst) => match &rhs.kind {
                        ExprKind::Symbol(src) => state.alias(*dst, *src),
                        _ => state.remove(*dst),
                    },
                    ExprKind::Param { symbol, .. } | ExprKind::CellIndex { symbol, .. } => {
                        let masked = state.aliases_of(*symbol);
                        if !masked.is_empty() {
                            let copy = CopyInfo {
                                symbol: *symbol,
                                masked,
                            };
                            match loop_ctx {
                                Some(ctx)
                                    if ctx.pre_loop.class_of(*symbol).is_some() =>
                                {
                                    info.loop_guarded
                                        .entry(ctx.loop_id)
                                        .or_default()
                                        .push(copy);
                                }
                                _ => {
                                    info.at_stmt.entry(stmt.id).or_default().push(copy);
                                }
                            }
                            state.remove(*symbol);
                        }
                    }
                    _ => {}
                }
            }
        }
        StmtKind::Expr(e) => {
            if let Some(args) = call_args(e) {
                state.invalidate_all(args);
            }
        }
        StmtKind::IfElse {
            then_seq, else_seq, ..
        } => {
            // Both branches proceed from the same state; afterwards the
            // union of surviving aliases is kept (conservative: more
            // aliases means more copies, never fewer).
            let mut then_state = state.clone();
            scan_seq(then_seq, &mut then_state, info, loop_ctx);
            scan_seq(else_seq, state, info, loop_ctx);
            for class in then_state.classes {
                if !state.classes.contains(&class) {
                    state.classes.push(class);
                }
            }
        }
        StmtKind::Loop {
            init,
            test,
            body,
            incr,
            ..
        } => {
            scan_seq(init, state, info, loop_ctx);
            scan_seq(test, state, info, loop_ctx);
            let ctx = LoopCtx {
                loop_id: stmt.id,
                pre_loop: state.clone(),
            };
            scan_seq(body, state, info, Some(&ctx));
            scan_seq(incr, state, info, Some(&ctx));
        }
        _ => {}
    }
}

/// If the expression is a call-shaped Param, the argument symbols.
fn call_args(e: &Expr) -> Option<Vec<Symbol>> {
    match &e.kind {
        ExprKind::Param { args, .. } => {
            let syms: Vec<Symbol> = args
                .iter()
                .filter_map(|a| match a.kind {
                    ExprKind::Symbol(s) => Some(s),
                    _ => None,
                })
                .collect();
            // Indexing with numeric arguments is indistinguishable from
            // a call here without type information; symbol arguments are
            // the ones that can alias either way.
            if syms.is_empty() {
                None
            } else {
                Some(syms)
            }
        }
        _ => None,
    }
}

/// Symbols that are ever the target of an indexed write.
fn indexed_write_targets(seq: &StmtSeq) -> BTreeSet<Symbol> {
    let mut out = BTreeSet::new();
    collect_writes(seq, &mut out);
    out
}

fn collect_writes(seq: &StmtSeq, out: &mut BTreeSet<Symbol>) {
    for stmt in &seq.stmts {
        match &stmt.kind {
            StmtKind::Assign { lhs, .. } => {
                for target in lhs {
                    if let ExprKind::Param { symbol, .. } | ExprKind::CellIndex { symbol, .. } =
                        &target.kind
                    {
                        out.insert(*symbol);
                    }
                }
            }
            StmtKind::IfElse {
                then_seq, else_seq, ..
            } => {
                collect_writes(then_seq, out);
                collect_writes(else_seq, out);
            }
            StmtKind::Loop {
                init,
                test,
                body,
                incr,
                ..
            } => {
                collect_writes(init, out);
                collect_writes(test, out);
                collect_writes(body, out);
                collect_writes(incr, out);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matlang_core::function::{Function, ProgFunction};
    use matlang_core::heap;

    fn sym(name: &str) -> Symbol {
        Symbol::intern(name)
    }

    fn run(ins: Vec<Symbol>, body: StmtSeq, name: &str) -> CopyPlacementInfo {
        let f = heap::alloc_func(Function::Prog(ProgFunction::new(name, ins, vec![], body)));
        let body = f.as_prog().unwrap().current_body();
        copy_placement(f, &body, &TypeSetString::new(), false).unwrap()
    }

    fn indexed_write(target: Symbol, value: i64) -> Stmt {
        Stmt::new(StmtKind::Assign {
            lhs: vec![Expr::new(ExprKind::Param {
                symbol: target,
                args: vec![Expr::int_const(1)],
            })],
            rhs: Expr::int_const(value),
        })
    }

    #[test]
    fn aliased_write_requires_copy() {
        // b = a; b(1) = 5 -- b must be copied before the write.
        let (a, b) = (sym("cp_a"), sym("cp_b"));
        let write = indexed_write(b, 5);
        let write_id = write.id;
        let body = StmtSeq::new(vec![Stmt::assign(b, Expr::symbol(a)), write]);
        let info = run(vec![a], body, "cp_f1");
        let copies = &info.at_stmt[&write_id];
        assert_eq!(copies.len(), 1);
        assert_eq!(copies[0].symbol, b);
        assert!(copies[0].masked.contains(&a));
    }

    #[test]
    fn unaliased_write_requires_no_copy() {
        // b = [1]; b(1) = 5 -- fresh value, no copy.
        let b = sym("cp2_b");
        let write = indexed_write(b, 5);
        let write_id = write.id;
        let body = StmtSeq::new(vec![
            Stmt::assign(
                b,
                Expr::new(ExprKind::Matrix {
                    rows: vec![vec![Expr::int_const(1)]],
                }),
            ),
            write,
        ]);
        let info = run(vec![], body, "cp_f2");
        assert!(!info.at_stmt.contains_key(&write_id));
    }

    #[test]
    fn written_parameter_is_copied_at_entry() {
        let p = sym("cp3_p");
        let body = StmtSeq::single(indexed_write(p, 1));
        let info = run(vec![p], body, "cp_f3");
        assert_eq!(info.param_copies, vec![p]);
    }

    #[test]
    fn copy_only_once_per_alias() {
        // b = a; b(1) = 5; b(2) = 6 -- only the first write copies.
        let (a, b) = (sym("cp4_a"), sym("cp4_b"));
        let w1 = indexed_write(b, 5);
        let w2 = indexed_write(b, 6);
        let (id1, id2) = (w1.id, w2.id);
        let body = StmtSeq::new(vec![Stmt::assign(b, Expr::symbol(a)), w1, w2]);
        let info = run(vec![a], body, "cp_f4");
        assert!(info.at_stmt.contains_key(&id1));
        assert!(!info.at_stmt.contains_key(&id2));
    }

    #[test]
    fn pre_loop_alias_guards_copy_at_loop() {
        // b = a; loop { b(1) = 5 } -- the copy belongs to the loop
        // header, guarded by the loop test.
        let (a, b, t) = (sym("cp5_a"), sym("cp5_b"), sym("cp5_t"));
        let write = indexed_write(b, 5);
        let loop_stmt = Stmt::new(StmtKind::Loop {
            init: StmtSeq::empty(),
            test: StmtSeq::single(Stmt::assign(t, Expr::int_const(1))),
            body: StmtSeq::single(write),
            incr: StmtSeq::empty(),
            test_var: t,
        });
        let loop_id = loop_stmt.id;
        let body = StmtSeq::new(vec![Stmt::assign(b, Expr::symbol(a)), loop_stmt]);
        let info = run(vec![a], body, "cp_f5");
        let guarded = &info.loop_guarded[&loop_id];
        assert_eq!(guarded.len(), 1);
        assert_eq!(guarded[0].symbol, b);
    }

    #[test]
    fn unknown_call_invalidates_aliases() {
        // c = mystery(a, b); a(1) = 1 -- a escaped into the call, so the
        // write copies.
        let (a, b, c) = (sym("cp6_a"), sym("cp6_b"), sym("cp6_c"));
        let call = Expr::new(ExprKind::Param {
            symbol: sym("cp6_mystery"),
            args: vec![Expr::symbol(a), Expr::symbol(b)],
        });
        let write = indexed_write(a, 1);
        let write_id = write.id;
        let body = StmtSeq::new(vec![Stmt::assign(c, call), write]);
        let info = run(vec![a, b], body, "cp_f6");
        assert!(info.at_stmt.contains_key(&write_id));
    }
}
