//! Array bounds-check elimination.
//!
//! For every indexing expression (read or write) and every dimension of
//! its index list, two booleans: is the lower-bound guard still required,
//! is the upper-bound guard still required. Both start `true`; a guard is
//! proved unnecessary only when the index is a constant positive integer
//! that fits below the dimension extent in every shape the matrix can
//! have according to type inference.
//!
//! The JIT consults this map before emitting guards on the scalar fast
//! paths.

use std::collections::HashMap;
use std::rc::Rc;

use matlang_core::error::RunError;
use matlang_core::expr::{Expr, ExprKind};
use matlang_core::function::FuncRef;
use matlang_core::id::ExprId;
use matlang_core::stmt::{Stmt, StmtKind, StmtSeq};
use matlang_core::symbol::Symbol;
use matlang_core::typeinfo::TypeSetString;

use super::manager;
use super::type_inference::{type_inference, TypeInferInfo, TypeMap};

/// Guard requirements for one index dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DimCheck {
    pub lower_needed: bool,
    pub upper_needed: bool,
}

impl Default for DimCheck {
    fn default() -> Self {
        DimCheck {
            lower_needed: true,
            upper_needed: true,
        }
    }
}

/// Per-indexing-expression guard requirements, one entry per index
/// argument.
#[derive(Debug, Default)]
pub struct BoundsCheckInfo {
    pub checks: HashMap<ExprId, Vec<DimCheck>>,
}

impl BoundsCheckInfo {
    /// Guard requirements for dimension `dim` of expression `id`;
    /// defaults to both-required when the expression was not analyzed.
    pub fn check_for(&self, id: ExprId, dim: usize) -> DimCheck {
        self.checks
            .get(&id)
            .and_then(|dims| dims.get(dim))
            .copied()
            .unwrap_or_default()
    }
}

/// The bounds-check pass (signature per the analysis manager).
pub fn bounds_check(
    func: FuncRef,
    body: &Rc<StmtSeq>,
    arg_types: &TypeSetString,
    return_bottom: bool,
) -> Result<BoundsCheckInfo, RunError> {
    if return_bottom {
        return Ok(BoundsCheckInfo::default());
    }
    let types = manager::request(type_inference, func, body, arg_types)?;
    let mut info = BoundsCheckInfo::default();
    scan_seq(body, &types, &mut info);
    Ok(info)
}

fn scan_seq(seq: &StmtSeq, types: &TypeInferInfo, info: &mut BoundsCheckInfo) {
    for stmt in &seq.stmts {
        scan_stmt(stmt, types, info);
    }
}

fn scan_stmt(stmt: &Stmt, types: &TypeInferInfo, info: &mut BoundsCheckInfo) {
    let map = types.before.get(&stmt.id);
    match &stmt.kind {
        StmtKind::Assign { lhs, rhs } => {
            for target in lhs {
                scan_expr(target, map, info);
            }
            scan_expr(rhs, map, info);
        }
        StmtKind::Expr(e) => scan_expr(e, map, info),
        StmtKind::IfElse {
            cond,
            then_seq,
            else_seq,
        } => {
            scan_expr(cond, map, info);
            scan_seq(then_seq, types, info);
            scan_seq(else_seq, types, info);
        }
        StmtKind::Loop {
            init,
            test,
            body,
            incr,
            ..
        } => {
            scan_seq(init, types, info);
            scan_seq(test, types, info);
            scan_seq(body, types, info);
            scan_seq(incr, types, info);
        }
        StmtKind::Switch { .. }
        | StmtKind::For { .. }
        | StmtKind::While { .. }
        | StmtKind::Break
        | StmtKind::Continue
        | StmtKind::Return => {}
    }
}

fn scan_expr(expr: &Expr, map: Option<&TypeMap>, info: &mut BoundsCheckInfo) {
    if let ExprKind::Param { symbol, args } = &expr.kind {
        let shapes = map.and_then(|m| matrix_shapes(*symbol, m));
        let checks: Vec<DimCheck> = args
            .iter()
            .enumerate()
            .map(|(dim, arg)| analyze_dim(arg, dim, args.len(), shapes.as_deref()))
            .collect();
        info.checks.insert(expr.id, checks);
    }
    for sub in expr.sub_exprs() {
        scan_expr(sub, map, info);
    }
}

/// Shapes the indexed matrix may have at this point. `None` when any
/// candidate descriptor leaves the size unknown.
fn matrix_shapes(symbol: Symbol, map: &TypeMap) -> Option<Vec<Vec<usize>>> {
    let set = map.get(&symbol)?;
    if set.is_empty() {
        return None;
    }
    let mut shapes = Vec::with_capacity(set.len());
    for info in set {
        if !info.size_known || !info.kind.is_matrix() {
            return None;
        }
        shapes.push(info.mat_size.to_vec());
    }
    Some(shapes)
}

/// Decides the guards for one index argument.
fn analyze_dim(
    arg: &Expr,
    dim: usize,
    n_args: usize,
    shapes: Option<&[Vec<usize>]>,
) -> DimCheck {
    let mut check = DimCheck::default();
    if let ExprKind::IntConst(v) = arg.kind {
        if v >= 1 {
            check.lower_needed = false;
        }
        if let Some(shapes) = shapes {
            let fits_all = shapes.iter().all(|dims| {
                let extent: usize = if dim == n_args - 1 {
                    dims.get(dim..).map(|d| d.iter().product()).unwrap_or(0)
                } else {
                    dims.get(dim).copied().unwrap_or(0)
                };
                v >= 1 && (v as usize) <= extent
            });
            if fits_all {
                check.upper_needed = false;
            }
        }
    }
    check
}
