//! Expression nodes of the IIR tree.
//!
//! [`Expr`] wraps an [`ExprKind`] sum type with a minted [`ExprId`] so that
//! analyses (bounds checks, copy placement) can key per-expression facts.
//! Every expression exposes a uniform ordered slot list over its direct
//! sub-expressions ([`Expr::sub_exprs`] / [`Expr::replace_sub_expr`]),
//! which is what the lowering passes and the split pass traverse.
//!
//! `Display` produces a surface-style printout used only for diagnostics.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::ExprId;
use crate::symbol::Symbol;

/// Unary operators. The transpose forms are postfix in the surface syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnOp {
    Plus,
    Minus,
    Not,
    /// `.'` -- plain transpose.
    Transpose,
    /// `'` -- complex conjugate transpose.
    CtransPose,
}

/// Binary operators, covering arithmetic, comparison, and logic.
///
/// `Mult`/`Div`/`LeftDiv`/`Pow` are the matrix forms; the `Elem*` variants
/// are their element-wise counterparts. `ScAnd`/`ScOr` short-circuit and
/// are eliminated from conditional tests by lowering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mult,
    ElemMult,
    Div,
    ElemDiv,
    LeftDiv,
    ElemLeftDiv,
    Pow,
    ElemPow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    ScAnd,
    ScOr,
}

impl BinOp {
    /// Surface spelling of the operator.
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mult => "*",
            BinOp::ElemMult => ".*",
            BinOp::Div => "/",
            BinOp::ElemDiv => "./",
            BinOp::LeftDiv => "\\",
            BinOp::ElemLeftDiv => ".\\",
            BinOp::Pow => "^",
            BinOp::ElemPow => ".^",
            BinOp::Eq => "==",
            BinOp::Ne => "~=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "&",
            BinOp::Or => "|",
            BinOp::ScAnd => "&&",
            BinOp::ScOr => "||",
        }
    }

    /// Returns `true` for the comparison operators (logical-array result).
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
        )
    }

    /// Returns `true` for the short-circuit forms.
    pub fn is_short_circuit(self) -> bool {
        matches!(self, BinOp::ScAnd | BinOp::ScOr)
    }
}

/// One `end` association: which matrix the `end` refers to, the argument
/// position it appears at, and whether it is the last index (in which case
/// it means the product of the remaining dimensions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndAssoc {
    pub symbol: Symbol,
    pub dim_index: usize,
    pub is_last: bool,
}

/// Expression variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    Symbol(Symbol),
    IntConst(i64),
    FpConst(f64),
    StrConst(String),
    Unary {
        op: UnOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// `sym(arg, ...)` -- function call or matrix indexing, resolved at
    /// evaluation time.
    Param {
        symbol: Symbol,
        args: Vec<Expr>,
    },
    /// `sym{arg, ...}` -- cell array content indexing.
    CellIndex {
        symbol: Symbol,
        args: Vec<Expr>,
    },
    /// `start:step:stop`; all components absent means the full-range colon.
    Range {
        start: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
        stop: Option<Box<Expr>>,
    },
    /// `end` inside an indexing argument. Associations are filled in by
    /// the end-binding lowering pass.
    End {
        assocs: Vec<EndAssoc>,
    },
    Matrix {
        rows: Vec<Vec<Expr>>,
    },
    CellArray {
        rows: Vec<Vec<Expr>>,
    },
    FnHandle(Symbol),
    Lambda {
        params: Vec<Symbol>,
        body: Box<Expr>,
    },
}

/// An expression node: a kind plus its identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub id: ExprId,
    pub kind: ExprKind,
}

impl Expr {
    /// Wraps a kind with a fresh ID.
    pub fn new(kind: ExprKind) -> Expr {
        Expr {
            id: ExprId::fresh(),
            kind,
        }
    }

    pub fn symbol(sym: Symbol) -> Expr {
        Expr::new(ExprKind::Symbol(sym))
    }

    pub fn int_const(v: i64) -> Expr {
        Expr::new(ExprKind::IntConst(v))
    }

    pub fn fp_const(v: f64) -> Expr {
        Expr::new(ExprKind::FpConst(v))
    }

    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::new(ExprKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    /// Structural copy with fresh identity on every node.
    pub fn deep_copy(&self) -> Expr {
        let kind = match &self.kind {
            ExprKind::Symbol(s) => ExprKind::Symbol(*s),
            ExprKind::IntConst(v) => ExprKind::IntConst(*v),
            ExprKind::FpConst(v) => ExprKind::FpConst(*v),
            ExprKind::StrConst(s) => ExprKind::StrConst(s.clone()),
            ExprKind::Unary { op, operand } => ExprKind::Unary {
                op: *op,
                operand: Box::new(operand.deep_copy()),
            },
            ExprKind::Binary { op, lhs, rhs } => ExprKind::Binary {
                op: *op,
                lhs: Box::new(lhs.deep_copy()),
                rhs: Box::new(rhs.deep_copy()),
            },
            ExprKind::Param { symbol, args } => ExprKind::Param {
                symbol: *symbol,
                args: args.iter().map(Expr::deep_copy).collect(),
            },
            ExprKind::CellIndex { symbol, args } => ExprKind::CellIndex {
                symbol: *symbol,
                args: args.iter().map(Expr::deep_copy).collect(),
            },
            ExprKind::Range { start, step, stop } => ExprKind::Range {
                start: start.as_ref().map(|e| Box::new(e.deep_copy())),
                step: step.as_ref().map(|e| Box::new(e.deep_copy())),
                stop: stop.as_ref().map(|e| Box::new(e.deep_copy())),
            },
            ExprKind::End { assocs } => ExprKind::End {
                assocs: assocs.clone(),
            },
            ExprKind::Matrix { rows } => ExprKind::Matrix {
                rows: rows
                    .iter()
                    .map(|r| r.iter().map(Expr::deep_copy).collect())
                    .collect(),
            },
            ExprKind::CellArray { rows } => ExprKind::CellArray {
                rows: rows
                    .iter()
                    .map(|r| r.iter().map(Expr::deep_copy).collect())
                    .collect(),
            },
            ExprKind::FnHandle(s) => ExprKind::FnHandle(*s),
            ExprKind::Lambda { params, body } => ExprKind::Lambda {
                params: params.clone(),
                body: Box::new(body.deep_copy()),
            },
        };
        Expr::new(kind)
    }

    /// Returns `true` for constant leaves.
    pub fn is_const(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::IntConst(_) | ExprKind::FpConst(_) | ExprKind::StrConst(_)
        )
    }

    /// Returns `true` for a bare symbol reference.
    pub fn is_symbol(&self) -> bool {
        matches!(self.kind, ExprKind::Symbol(_))
    }

    /// Returns `true` if this is a range with no components (the colon).
    pub fn is_full_range(&self) -> bool {
        matches!(
            &self.kind,
            ExprKind::Range {
                start: None,
                step: None,
                stop: None
            }
        )
    }

    /// Ordered list of direct sub-expression slots.
    pub fn sub_exprs(&self) -> Vec<&Expr> {
        match &self.kind {
            ExprKind::Symbol(_)
            | ExprKind::IntConst(_)
            | ExprKind::FpConst(_)
            | ExprKind::StrConst(_)
            | ExprKind::End { .. }
            | ExprKind::FnHandle(_) => Vec::new(),
            ExprKind::Unary { operand, .. } => vec![operand],
            ExprKind::Binary { lhs, rhs, .. } => vec![lhs, rhs],
            ExprKind::Param { args, .. } | ExprKind::CellIndex { args, .. } => {
                args.iter().collect()
            }
            ExprKind::Range { start, step, stop } => [start, step, stop]
                .into_iter()
                .filter_map(|o| o.as_deref())
                .collect(),
            ExprKind::Matrix { rows } | ExprKind::CellArray { rows } => {
                rows.iter().flatten().collect()
            }
            ExprKind::Lambda { body, .. } => vec![body],
        }
    }

    /// Replaces the sub-expression at `slot` (the index into the
    /// [`Expr::sub_exprs`] ordering) with `new`.
    ///
    /// # Panics
    ///
    /// Panics if `slot` is out of range for this node; callers iterate the
    /// slot list they just read, so a bad index is a pass bug.
    pub fn replace_sub_expr(&mut self, slot: usize, new: Expr) {
        let slots = self.sub_exprs_mut();
        *slots
            .into_iter()
            .nth(slot)
            .expect("sub-expression slot out of range") = new;
    }

    /// Mutable view of the same slots as [`Expr::sub_exprs`], in the same
    /// order. Used by passes that rewrite children in place.
    pub fn sub_exprs_mut(&mut self) -> Vec<&mut Expr> {
        match &mut self.kind {
            ExprKind::Symbol(_)
            | ExprKind::IntConst(_)
            | ExprKind::FpConst(_)
            | ExprKind::StrConst(_)
            | ExprKind::End { .. }
            | ExprKind::FnHandle(_) => Vec::new(),
            ExprKind::Unary { operand, .. } => vec![operand],
            ExprKind::Binary { lhs, rhs, .. } => vec![lhs, rhs],
            ExprKind::Param { args, .. } | ExprKind::CellIndex { args, .. } => {
                args.iter_mut().collect()
            }
            ExprKind::Range { start, step, stop } => [start, step, stop]
                .into_iter()
                .filter_map(|o| o.as_deref_mut())
                .collect(),
            ExprKind::Matrix { rows } | ExprKind::CellArray { rows } => {
                rows.iter_mut().flatten().collect()
            }
            ExprKind::Lambda { body, .. } => vec![body],
        }
    }

    /// Transitive set of symbols read by this expression.
    ///
    /// A lambda body's uses subtract the lambda's bound parameters; an
    /// `end` contributes the matrix symbols of its associations; a
    /// parameterized expression contributes its head symbol.
    pub fn symbol_uses(&self) -> BTreeSet<Symbol> {
        let mut uses = BTreeSet::new();
        self.collect_uses(&mut uses);
        uses
    }

    fn collect_uses(&self, out: &mut BTreeSet<Symbol>) {
        match &self.kind {
            ExprKind::Symbol(s) | ExprKind::FnHandle(s) => {
                out.insert(*s);
            }
            ExprKind::Param { symbol, args } | ExprKind::CellIndex { symbol, args } => {
                out.insert(*symbol);
                for a in args {
                    a.collect_uses(out);
                }
            }
            ExprKind::End { assocs } => {
                for a in assocs {
                    out.insert(a.symbol);
                }
            }
            ExprKind::Lambda { params, body } => {
                let mut body_uses = body.symbol_uses();
                for p in params {
                    body_uses.remove(p);
                }
                out.extend(body_uses);
            }
            _ => {
                for sub in self.sub_exprs() {
                    sub.collect_uses(out);
                }
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::Symbol(s) => write!(f, "{}", s),
            ExprKind::IntConst(v) => write!(f, "{}", v),
            ExprKind::FpConst(v) => write!(f, "{}", v),
            ExprKind::StrConst(s) => write!(f, "'{}'", s),
            ExprKind::Unary { op, operand } => match op {
                UnOp::Plus => write!(f, "+{}", operand),
                UnOp::Minus => write!(f, "-{}", operand),
                UnOp::Not => write!(f, "~{}", operand),
                UnOp::Transpose => write!(f, "{}.'", operand),
                UnOp::CtransPose => write!(f, "{}'", operand),
            },
            ExprKind::Binary { op, lhs, rhs } => {
                write!(f, "({} {} {})", lhs, op.symbol(), rhs)
            }
            ExprKind::Param { symbol, args } => {
                write!(f, "{}(", symbol)?;
                write_comma_list(f, args)?;
                write!(f, ")")
            }
            ExprKind::CellIndex { symbol, args } => {
                write!(f, "{}{{", symbol)?;
                write_comma_list(f, args)?;
                write!(f, "}}")
            }
            ExprKind::Range { start, step, stop } => match (start, step, stop) {
                (None, None, None) => write!(f, ":"),
                (Some(a), None, Some(b)) => write!(f, "{}:{}", a, b),
                (Some(a), Some(s), Some(b)) => write!(f, "{}:{}:{}", a, s, b),
                _ => write!(f, "<malformed range>"),
            },
            ExprKind::End { .. } => write!(f, "end"),
            ExprKind::Matrix { rows } => write_block(f, rows, '[', ']'),
            ExprKind::CellArray { rows } => write_block(f, rows, '{', '}'),
            ExprKind::FnHandle(s) => write!(f, "@{}", s),
            ExprKind::Lambda { params, body } => {
                write!(f, "@(")?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", p)?;
                }
                write!(f, ") {}", body)
            }
        }
    }
}

fn write_comma_list(f: &mut fmt::Formatter<'_>, exprs: &[Expr]) -> fmt::Result {
    for (i, e) in exprs.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", e)?;
    }
    Ok(())
}

fn write_block(f: &mut fmt::Formatter<'_>, rows: &[Vec<Expr>], open: char, close: char) -> fmt::Result {
    write!(f, "{}", open)?;
    for (i, row) in rows.iter().enumerate() {
        if i > 0 {
            write!(f, "; ")?;
        }
        for (j, e) in row.iter().enumerate() {
            if j > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", e)?;
        }
    }
    write!(f, "{}", close)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(name: &str) -> Symbol {
        Symbol::intern(name)
    }

    #[test]
    fn deep_copy_mints_fresh_ids() {
        let e = Expr::binary(BinOp::Add, Expr::symbol(sym("a")), Expr::int_const(1));
        let c = e.deep_copy();
        assert_ne!(e.id, c.id);
        assert_eq!(e.kind, c.kind);
    }

    #[test]
    fn sub_expr_slots_cover_binary() {
        let e = Expr::binary(BinOp::Mult, Expr::symbol(sym("x")), Expr::symbol(sym("y")));
        let subs = e.sub_exprs();
        assert_eq!(subs.len(), 2);
        assert!(subs[0].is_symbol() && subs[1].is_symbol());
    }

    #[test]
    fn replace_sub_expr_swaps_slot() {
        let mut e = Expr::binary(BinOp::Add, Expr::symbol(sym("p")), Expr::int_const(2));
        e.replace_sub_expr(1, Expr::symbol(sym("q")));
        let uses = e.symbol_uses();
        assert!(uses.contains(&sym("p")));
        assert!(uses.contains(&sym("q")));
    }

    #[test]
    fn param_head_symbol_is_a_use() {
        let e = Expr::new(ExprKind::Param {
            symbol: sym("mat"),
            args: vec![Expr::symbol(sym("i"))],
        });
        let uses = e.symbol_uses();
        assert!(uses.contains(&sym("mat")));
        assert!(uses.contains(&sym("i")));
    }

    #[test]
    fn lambda_subtracts_bound_params() {
        let body = Expr::binary(BinOp::Add, Expr::symbol(sym("v")), Expr::symbol(sym("w")));
        let e = Expr::new(ExprKind::Lambda {
            params: vec![sym("v")],
            body: Box::new(body),
        });
        let uses = e.symbol_uses();
        assert!(!uses.contains(&sym("v")));
        assert!(uses.contains(&sym("w")));
    }

    #[test]
    fn end_contributes_association_symbols() {
        let e = Expr::new(ExprKind::End {
            assocs: vec![EndAssoc {
                symbol: sym("arr"),
                dim_index: 0,
                is_last: true,
            }],
        });
        assert!(e.symbol_uses().contains(&sym("arr")));
    }

    #[test]
    fn range_slots_skip_absent_components() {
        let e = Expr::new(ExprKind::Range {
            start: Some(Box::new(Expr::int_const(1))),
            step: None,
            stop: Some(Box::new(Expr::int_const(10)))
        });
        assert_eq!(e.sub_exprs().len(), 2);
        assert!(!e.is_full_range());
        let colon = Expr::new(ExprKind::Range {
            start: None,
            step: None,
            stop: None,
        });
        assert!(colon.is_full_range());
    }

    #[test]
    fn display_is_surface_style() {
        let e = Expr::binary(BinOp::ElemMult, Expr::symbol(sym("a")), Expr::int_const(3));
        assert_eq!(e.to_string(), "(a .* 3)");
    }

    #[test]
    fn serde_round_trip() {
        let e = Expr::new(ExprKind::Param {
            symbol: sym("m"),
            args: vec![Expr::int_const(1), Expr::symbol(sym("k"))],
        });
        let json = serde_json::to_string(&e).unwrap();
        let back: Expr = serde_json::from_str(&json).unwrap();
        assert_eq!(e.kind, back.kind);
    }
}
