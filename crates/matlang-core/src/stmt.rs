//! Statement nodes and statement sequences of the IIR tree.
//!
//! The surface forms `Switch`, `For`, and `While` exist only before
//! lowering; the canonical core a lowered body may contain is
//! `{IfElse, Loop, Assign, Expr, Break, Continue, Return}` (checked by
//! [`collect_stmt_kinds`]).
//!
//! Statements carry annotation bits recording loop-nest position, set by
//! the lowering passes and consumed by the analyses and the JIT.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::expr::{Expr, ExprKind};
use crate::id::{SeqId, StmtId};
use crate::symbol::Symbol;

/// Annotation bit: the statement is inside a loop.
pub const ANN_IN_LOOP: u8 = 1;
/// Annotation bit: the statement is in the outermost loop of a nest.
pub const ANN_OUTERMOST: u8 = 1 << 1;
/// Annotation bit: the statement is in the innermost loop of a nest.
pub const ANN_INNERMOST: u8 = 1 << 2;

/// Statement variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StmtKind {
    IfElse {
        cond: Expr,
        then_seq: StmtSeq,
        else_seq: StmtSeq,
    },
    /// Surface switch; eliminated by lowering.
    Switch {
        value: Expr,
        cases: Vec<(Expr, StmtSeq)>,
        default: Option<StmtSeq>,
    },
    /// Surface for-loop; unified into [`StmtKind::Loop`] by lowering.
    For {
        var: Symbol,
        iter: Expr,
        body: StmtSeq,
    },
    /// Surface while-loop; unified into [`StmtKind::Loop`] by lowering.
    While {
        cond: Expr,
        body: StmtSeq,
    },
    /// The unified loop form. `test_var` names the boolean the test
    /// sequence assigns; execution runs `init` once, then repeats
    /// test -> body -> incr while `test_var` holds.
    Loop {
        init: StmtSeq,
        test: StmtSeq,
        body: StmtSeq,
        incr: StmtSeq,
        test_var: Symbol,
    },
    Assign {
        lhs: Vec<Expr>,
        rhs: Expr,
    },
    Expr(Expr),
    Break,
    Continue,
    Return,
}

/// A statement node: kind, identity, output suppression, annotations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stmt {
    pub id: StmtId,
    pub kind: StmtKind,
    /// `true` when the surface statement ended with `;`.
    pub suppress_output: bool,
    pub annotations: u8,
}

impl Stmt {
    /// Wraps a kind with a fresh ID; output suppressed by default.
    pub fn new(kind: StmtKind) -> Stmt {
        Stmt {
            id: StmtId::fresh(),
            kind,
            suppress_output: true,
            annotations: 0,
        }
    }

    pub fn with_suppress(kind: StmtKind, suppress_output: bool) -> Stmt {
        Stmt {
            suppress_output,
            ..Stmt::new(kind)
        }
    }

    /// Single-target assignment helper.
    pub fn assign(target: Symbol, rhs: Expr) -> Stmt {
        Stmt::new(StmtKind::Assign {
            lhs: vec![Expr::symbol(target)],
            rhs,
        })
    }

    pub fn is_in_loop(&self) -> bool {
        self.annotations & ANN_IN_LOOP != 0
    }

    pub fn add_annotation(&mut self, bits: u8) {
        self.annotations |= bits;
    }

    /// Variant name, used by [`collect_stmt_kinds`] and diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            StmtKind::IfElse { .. } => "IfElse",
            StmtKind::Switch { .. } => "Switch",
            StmtKind::For { .. } => "For",
            StmtKind::While { .. } => "While",
            StmtKind::Loop { .. } => "Loop",
            StmtKind::Assign { .. } => "Assign",
            StmtKind::Expr(_) => "Expr",
            StmtKind::Break => "Break",
            StmtKind::Continue => "Continue",
            StmtKind::Return => "Return",
        }
    }

    /// Structural copy with fresh identity throughout.
    pub fn deep_copy(&self) -> Stmt {
        let kind = match &self.kind {
            StmtKind::IfElse {
                cond,
                then_seq,
                else_seq,
            } => StmtKind::IfElse {
                cond: cond.deep_copy(),
                then_seq: then_seq.deep_copy(),
                else_seq: else_seq.deep_copy(),
            },
            StmtKind::Switch {
                value,
                cases,
                default,
            } => StmtKind::Switch {
                value: value.deep_copy(),
                cases: cases
                    .iter()
                    .map(|(e, s)| (e.deep_copy(), s.deep_copy()))
                    .collect(),
                default: default.as_ref().map(StmtSeq::deep_copy),
            },
            StmtKind::For { var, iter, body } => StmtKind::For {
                var: *var,
                iter: iter.deep_copy(),
                body: body.deep_copy(),
            },
            StmtKind::While { cond, body } => StmtKind::While {
                cond: cond.deep_copy(),
                body: body.deep_copy(),
            },
            StmtKind::Loop {
                init,
                test,
                body,
                incr,
                test_var,
            } => StmtKind::Loop {
                init: init.deep_copy(),
                test: test.deep_copy(),
                body: body.deep_copy(),
                incr: incr.deep_copy(),
                test_var: *test_var,
            },
            StmtKind::Assign { lhs, rhs } => StmtKind::Assign {
                lhs: lhs.iter().map(Expr::deep_copy).collect(),
                rhs: rhs.deep_copy(),
            },
            StmtKind::Expr(e) => StmtKind::Expr(e.deep_copy()),
            StmtKind::Break => StmtKind::Break,
            StmtKind::Continue => StmtKind::Continue,
            StmtKind::Return => StmtKind::Return,
        };
        Stmt {
            id: StmtId::fresh(),
            kind,
            suppress_output: self.suppress_output,
            annotations: self.annotations,
        }
    }

    /// All symbols read by this statement.
    ///
    /// A `Param`/`CellIndex` assignment target contributes its head symbol
    /// as a use (the matrix must be located before it is written) and its
    /// argument expressions as uses.
    pub fn symbol_uses(&self) -> BTreeSet<Symbol> {
        let mut uses = BTreeSet::new();
        match &self.kind {
            StmtKind::IfElse {
                cond,
                then_seq,
                else_seq,
            } => {
                uses.extend(cond.symbol_uses());
                uses.extend(then_seq.symbol_uses());
                uses.extend(else_seq.symbol_uses());
            }
            StmtKind::Switch {
                value,
                cases,
                default,
            } => {
                uses.extend(value.symbol_uses());
                for (e, s) in cases {
                    uses.extend(e.symbol_uses());
                    uses.extend(s.symbol_uses());
                }
                if let Some(s) = default {
                    uses.extend(s.symbol_uses());
                }
            }
            StmtKind::For { iter, body, .. } => {
                uses.extend(iter.symbol_uses());
                uses.extend(body.symbol_uses());
            }
            StmtKind::While { cond, body } => {
                uses.extend(cond.symbol_uses());
                uses.extend(body.symbol_uses());
            }
            StmtKind::Loop {
                init,
                test,
                body,
                incr,
                test_var,
            } => {
                uses.extend(init.symbol_uses());
                uses.extend(test.symbol_uses());
                uses.extend(body.symbol_uses());
                uses.extend(incr.symbol_uses());
                uses.insert(*test_var);
            }
            StmtKind::Assign { lhs, rhs } => {
                uses.extend(rhs.symbol_uses());
                for target in lhs {
                    match &target.kind {
                        ExprKind::Symbol(_) => {}
                        ExprKind::Param { symbol, args }
                        | ExprKind::CellIndex { symbol, args } => {
                            uses.insert(*symbol);
                            for a in args {
                                uses.extend(a.symbol_uses());
                            }
                        }
                        _ => uses.extend(target.symbol_uses()),
                    }
                }
            }
            StmtKind::Expr(e) => uses.extend(e.symbol_uses()),
            StmtKind::Break | StmtKind::Continue | StmtKind::Return => {}
        }
        uses
    }

    /// All symbols written by this statement.
    pub fn symbol_defs(&self) -> BTreeSet<Symbol> {
        let mut defs = BTreeSet::new();
        match &self.kind {
            StmtKind::IfElse {
                then_seq, else_seq, ..
            } => {
                defs.extend(then_seq.symbol_defs());
                defs.extend(else_seq.symbol_defs());
            }
            StmtKind::Switch { cases, default, .. } => {
                for (_, s) in cases {
                    defs.extend(s.symbol_defs());
                }
                if let Some(s) = default {
                    defs.extend(s.symbol_defs());
                }
            }
            StmtKind::For { var, body, .. } => {
                defs.insert(*var);
                defs.extend(body.symbol_defs());
            }
            StmtKind::While { body, .. } => defs.extend(body.symbol_defs()),
            StmtKind::Loop {
                init,
                test,
                body,
                incr,
                ..
            } => {
                defs.extend(init.symbol_defs());
                defs.extend(test.symbol_defs());
                defs.extend(body.symbol_defs());
                defs.extend(incr.symbol_defs());
            }
            StmtKind::Assign { lhs, .. } => {
                for target in lhs {
                    match &target.kind {
                        ExprKind::Symbol(s) => {
                            defs.insert(*s);
                        }
                        ExprKind::Param { symbol, .. }
                        | ExprKind::CellIndex { symbol, .. } => {
                            defs.insert(*symbol);
                        }
                        _ => {}
                    }
                }
            }
            StmtKind::Expr(_) | StmtKind::Break | StmtKind::Continue | StmtKind::Return => {}
        }
        defs
    }
}

/// An ordered list of statements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StmtSeq {
    pub id: SeqId,
    pub stmts: Vec<Stmt>,
}

impl StmtSeq {
    pub fn new(stmts: Vec<Stmt>) -> StmtSeq {
        StmtSeq {
            id: SeqId::fresh(),
            stmts,
        }
    }

    pub fn empty() -> StmtSeq {
        StmtSeq::new(Vec::new())
    }

    pub fn single(stmt: Stmt) -> StmtSeq {
        StmtSeq::new(vec![stmt])
    }

    pub fn is_empty(&self) -> bool {
        self.stmts.is_empty()
    }

    pub fn deep_copy(&self) -> StmtSeq {
        StmtSeq::new(self.stmts.iter().map(Stmt::deep_copy).collect())
    }

    /// Union of the uses of every statement in the sequence.
    pub fn symbol_uses(&self) -> BTreeSet<Symbol> {
        let mut uses = BTreeSet::new();
        for s in &self.stmts {
            uses.extend(s.symbol_uses());
        }
        uses
    }

    /// Union of the defs of every statement in the sequence.
    pub fn symbol_defs(&self) -> BTreeSet<Symbol> {
        let mut defs = BTreeSet::new();
        for s in &self.stmts {
            defs.extend(s.symbol_defs());
        }
        defs
    }
}

/// Collects the variant names of every statement in a body, recursing into
/// nested sequences. Used to check the post-lowering canonical-core
/// invariant.
pub fn collect_stmt_kinds(seq: &StmtSeq) -> BTreeSet<&'static str> {
    let mut kinds = BTreeSet::new();
    collect_kinds_into(seq, &mut kinds);
    kinds
}

fn collect_kinds_into(seq: &StmtSeq, out: &mut BTreeSet<&'static str>) {
    for stmt in &seq.stmts {
        out.insert(stmt.kind_name());
        match &stmt.kind {
            StmtKind::IfElse {
                then_seq, else_seq, ..
            } => {
                collect_kinds_into(then_seq, out);
                collect_kinds_into(else_seq, out);
            }
            StmtKind::Switch { cases, default, .. } => {
                for (_, s) in cases {
                    collect_kinds_into(s, out);
                }
                if let Some(s) = default {
                    collect_kinds_into(s, out);
                }
            }
            StmtKind::For { body, .. } | StmtKind::While { body, .. } => {
                collect_kinds_into(body, out);
            }
            StmtKind::Loop {
                init,
                test,
                body,
                incr,
                ..
            } => {
                collect_kinds_into(init, out);
                collect_kinds_into(test, out);
                collect_kinds_into(body, out);
                collect_kinds_into(incr, out);
            }
            _ => {}
        }
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_indented(f, 0)
    }
}

impl Stmt {
    fn write_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let pad = "  ".repeat(depth);
        let semi = if self.suppress_output { ";" } else { "" };
        match &self.kind {
            StmtKind::IfElse {
                cond,
                then_seq,
                else_seq,
            } => {
                writeln!(f, "{}if {}", pad, cond)?;
                then_seq.write_indented(f, depth + 1)?;
                if !else_seq.is_empty() {
                    writeln!(f, "{}else", pad)?;
                    else_seq.write_indented(f, depth + 1)?;
                }
                writeln!(f, "{}end", pad)
            }
            StmtKind::Switch {
                value,
                cases,
                default,
            } => {
                writeln!(f, "{}switch {}", pad, value)?;
                for (e, s) in cases {
                    writeln!(f, "{}case {}", pad, e)?;
                    s.write_indented(f, depth + 1)?;
                }
                if let Some(s) = default {
                    writeln!(f, "{}otherwise", pad)?;
                    s.write_indented(f, depth + 1)?;
                }
                writeln!(f, "{}end", pad)
            }
            StmtKind::For { var, iter, body } => {
                writeln!(f, "{}for {} = {}", pad, var, iter)?;
                body.write_indented(f, depth + 1)?;
                writeln!(f, "{}end", pad)
            }
            StmtKind::While { cond, body } => {
                writeln!(f, "{}while {}", pad, cond)?;
                body.write_indented(f, depth + 1)?;
                writeln!(f, "{}end", pad)
            }
            StmtKind::Loop {
                init,
                test,
                body,
                incr,
                test_var,
            } => {
                writeln!(f, "{}loop (test var {})", pad, test_var)?;
                writeln!(f, "{}init:", pad)?;
                init.write_indented(f, depth + 1)?;
                writeln!(f, "{}test:", pad)?;
                test.write_indented(f, depth + 1)?;
                writeln!(f, "{}body:", pad)?;
                body.write_indented(f, depth + 1)?;
                writeln!(f, "{}incr:", pad)?;
                incr.write_indented(f, depth + 1)?;
                writeln!(f, "{}end", pad)
            }
            StmtKind::Assign { lhs, rhs } => {
                write!(f, "{}", pad)?;
                if lhs.len() == 1 {
                    write!(f, "{}", lhs[0])?;
                } else {
                    write!(f, "[")?;
                    for (i, e) in lhs.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}", e)?;
                    }
                    write!(f, "]")?;
                }
                writeln!(f, " = {}{}", rhs, semi)
            }
            StmtKind::Expr(e) => writeln!(f, "{}{}{}", pad, e, semi),
            StmtKind::Break => writeln!(f, "{}break{}", pad, semi),
            StmtKind::Continue => writeln!(f, "{}continue{}", pad, semi),
            StmtKind::Return => writeln!(f, "{}return{}", pad, semi),
        }
    }
}

impl StmtSeq {
    fn write_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        for s in &self.stmts {
            s.write_indented(f, depth)?;
        }
        Ok(())
    }
}

impl fmt::Display for StmtSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_indented(f, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::BinOp;

    fn sym(name: &str) -> Symbol {
        Symbol::intern(name)
    }

    #[test]
    fn assign_defs_and_uses() {
        // x = y + 1
        let s = Stmt::assign(
            sym("x"),
            Expr::binary(BinOp::Add, Expr::symbol(sym("y")), Expr::int_const(1)),
        );
        assert!(s.symbol_defs().contains(&sym("x")));
        assert!(s.symbol_uses().contains(&sym("y")));
        assert!(!s.symbol_uses().contains(&sym("x")));
    }

    #[test]
    fn param_lhs_is_both_use_and_def() {
        // m(i) = 5
        let s = Stmt::new(StmtKind::Assign {
            lhs: vec![Expr::new(ExprKind::Param {
                symbol: sym("m"),
                args: vec![Expr::symbol(sym("i"))],
            })],
            rhs: Expr::int_const(5),
        });
        assert!(s.symbol_defs().contains(&sym("m")));
        assert!(s.symbol_uses().contains(&sym("m")));
        assert!(s.symbol_uses().contains(&sym("i")));
    }

    #[test]
    fn loop_test_var_counts_as_use() {
        let s = Stmt::new(StmtKind::Loop {
            init: StmtSeq::empty(),
            test: StmtSeq::single(Stmt::assign(sym("t"), Expr::int_const(1))),
            body: StmtSeq::empty(),
            incr: StmtSeq::empty(),
            test_var: sym("t"),
        });
        assert!(s.symbol_uses().contains(&sym("t")));
        assert!(s.symbol_defs().contains(&sym("t")));
    }

    #[test]
    fn collect_kinds_recurses() {
        let inner = Stmt::new(StmtKind::Break);
        let s = Stmt::new(StmtKind::While {
            cond: Expr::int_const(1),
            body: StmtSeq::single(inner),
        });
        let kinds = collect_stmt_kinds(&StmtSeq::single(s));
        assert!(kinds.contains("While"));
        assert!(kinds.contains("Break"));
    }

    #[test]
    fn deep_copy_preserves_structure_fresh_ids() {
        let s = Stmt::assign(sym("a"), Expr::int_const(2));
        let c = s.deep_copy();
        assert_ne!(s.id, c.id);
        assert_eq!(s.kind_name(), c.kind_name());
        assert_eq!(s.symbol_defs(), c.symbol_defs());
    }
}
