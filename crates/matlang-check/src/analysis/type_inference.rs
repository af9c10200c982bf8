//! Flow-sensitive type inference by abstract interpretation.
//!
//! For every program point the analysis maintains a per-symbol set of
//! candidate type descriptors. Expression evaluation is structural
//! (constants, environment lookups, operator type-mapping rules, library
//! type maps, recursive inference over program callees). Merges reduce
//! the descriptor sets; loop fixpoints widen to the Unknown descriptor
//! after [`LOOP_WIDEN_ITERS`] passes fail to converge.
//!
//! Program-function call inference goes back through the analysis
//! manager, whose pending set breaks recursion by handing back the
//! bottom element (no return-type information).

use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexMap;
use tracing::trace;

use matlang_core::expr::{BinOp, Expr, ExprKind, UnOp};
use matlang_core::function::{FuncRef, Function};
use matlang_core::id::{ExprId, StmtId};
use matlang_core::object::{DataObject, ObjKind};
use matlang_core::stmt::{Stmt, StmtKind, StmtSeq};
use matlang_core::symbol::Symbol;
use matlang_core::typeinfo::{
    self, TypeInfo, TypeSet, TypeSetString, type_set_make, type_set_reduce, type_set_union,
    type_set_widest,
};
use matlang_core::error::RunError;

use super::manager;

/// Loop iterations before non-converged symbols widen to Unknown.
pub const LOOP_WIDEN_ITERS: usize = 8;

/// Per-symbol candidate type sets at one program point.
pub type TypeMap = IndexMap<Symbol, TypeSet>;

/// Analysis result.
#[derive(Debug, Default)]
pub struct TypeInferInfo {
    pub before: HashMap<StmtId, TypeMap>,
    pub after: HashMap<StmtId, TypeMap>,
    /// Join of all return points and the fall-through exit.
    pub exit: TypeMap,
    /// Inferred types of the output parameters at exit, in order, up to
    /// the first one never assigned.
    pub out_types: TypeSetString,
    /// Per-expression inferred type-set-strings (bounds checking and the
    /// JIT read these).
    pub expr_types: HashMap<ExprId, TypeSetString>,
}

/// The type-inference pass (signature per the analysis manager).
pub fn type_inference(
    func: FuncRef,
    body: &Rc<StmtSeq>,
    arg_types: &TypeSetString,
    return_bottom: bool,
) -> Result<TypeInferInfo, RunError> {
    if return_bottom {
        return Ok(TypeInferInfo::default());
    }
    let Some(prog) = func.as_prog() else {
        return Err(RunError::new("type inference requires a program function"));
    };

    let mut walker = Walker {
        func,
        info: TypeInferInfo::default(),
    };

    let mut entry = TypeMap::new();
    for (i, &param) in prog.in_params.iter().enumerate() {
        if let Some(set) = arg_types.get(i) {
            entry.insert(param, set.clone());
        }
    }

    let mut returns = Vec::new();
    let fall = walker.flow_seq(body, Some(entry), &mut Exits::function(&mut returns));
    if let Some(map) = fall {
        returns.push(map);
    }
    walker.info.exit = join_all(returns);

    for &out in &prog.out_params {
        match walker.info.exit.get(&out) {
            Some(set) => walker.info.out_types.push(set.clone()),
            None => break,
        }
    }
    trace!(
        function = %prog.name,
        outputs = walker.info.out_types.len(),
        "type inference complete"
    );
    Ok(walker.info)
}

struct Exits<'a> {
    returns: &'a mut Vec<TypeMap>,
    breaks: Option<&'a mut Vec<TypeMap>>,
    continues: Option<&'a mut Vec<TypeMap>>,
}

impl<'a> Exits<'a> {
    fn function(returns: &'a mut Vec<TypeMap>) -> Exits<'a> {
        Exits {
            returns,
            breaks: None,
            continues: None,
        }
    }
}

fn join_map(a: &TypeMap, b: &TypeMap) -> TypeMap {
    let mut out = a.clone();
    for (sym, set) in b {
        let merged = match out.get(sym) {
            Some(existing) => type_set_reduce(&type_set_union(existing, set)),
            None => set.clone(),
        };
        out.insert(*sym, merged);
    }
    out
}

fn join_opt(a: Option<TypeMap>, b: Option<TypeMap>) -> Option<TypeMap> {
    match (a, b) {
        (Some(x), Some(y)) => Some(join_map(&x, &y)),
        (Some(x), None) | (None, Some(x)) => Some(x),
        (None, None) => None,
    }
}

fn join_all(maps: Vec<TypeMap>) -> TypeMap {
    let mut iter = maps.into_iter();
    let Some(first) = iter.next() else {
        return TypeMap::new();
    };
    iter.fold(first, |acc, m| join_map(&acc, &m))
}

struct Walker {
    func: FuncRef,
    info: TypeInferInfo,
}

impl Walker {
    fn flow_seq(
        &mut self,
        seq: &StmtSeq,
        mut map: Option<TypeMap>,
        exits: &mut Exits<'_>,
    ) -> Option<TypeMap> {
        for stmt in &seq.stmts {
            map = self.flow_stmt(stmt, map, exits);
        }
        map
    }

    fn flow_stmt(
        &mut self,
        stmt: &Stmt,
        map: Option<TypeMap>,
        exits: &mut Exits<'_>,
    ) -> Option<TypeMap> {
        let Some(map) = map else { return None };
        self.info.before.insert(stmt.id, map.clone());
        let out = match &stmt.kind {
            StmtKind::Assign { lhs, rhs } => {
                let rhs_types = self.infer_expr(rhs, &map);
                let mut out = map;
                for (i, target) in lhs.iter().enumerate() {
                    let value_set = rhs_types
                        .get(i)
                        .cloned()
                        .unwrap_or_else(|| type_set_make(TypeInfo::unknown()));
                    self.assign_target(target, value_set, &mut out);
                }
                Some(out)
            }
            StmtKind::Expr(e) => {
                self.infer_expr(e, &map);
                Some(map)
            }
            StmtKind::IfElse {
                cond,
                then_seq,
                else_seq,
            } => {
                self.infer_expr(cond, &map);
                let then_out = self.flow_seq(then_seq, Some(map.clone()), exits);
                let else_out = self.flow_seq(else_seq, Some(map), exits);
                join_opt(then_out, else_out)
            }
            StmtKind::Loop {
                init,
                test,
                body,
                incr,
                ..
            } => self.flow_loop(init, test, body, incr, map, exits),
            StmtKind::Break => {
                if let Some(breaks) = exits.breaks.as_deref_mut() {
                    breaks.push(map);
                }
                None
            }
            StmtKind::Continue => {
                if let Some(continues) = exits.continues.as_deref_mut() {
                    continues.push(map);
                }
                None
            }
            StmtKind::Return => {
                exits.returns.push(map);
                None
            }
            StmtKind::Switch { .. } | StmtKind::For { .. } | StmtKind::While { .. } => {
                // Surface forms: nothing precise to say pre-lowering.
                let mut out = map;
                for sym in stmt.symbol_defs() {
                    out.insert(sym, type_set_make(TypeInfo::unknown()));
                }
                Some(out)
            }
        };
        if let Some(out_map) = &out {
            self.info.after.insert(stmt.id, out_map.clone());
        }
        out
    }

    #[allow(clippy::too_many_arguments)]
    fn flow_loop(
        &mut self,
        init: &StmtSeq,
        test: &StmtSeq,
        body: &StmtSeq,
        incr: &StmtSeq,
        map: TypeMap,
        exits: &mut Exits<'_>,
    ) -> Option<TypeMap> {
        let mut head = self.flow_seq(init, Some(map), exits);
        let mut iters = 0;
        loop {
            let after_test = self.flow_seq(test, head.clone(), exits);
            let mut breaks = Vec::new();
            let mut continues = Vec::new();
            let mut inner = Exits {
                returns: &mut *exits.returns,
                breaks: Some(&mut breaks),
                continues: Some(&mut continues),
            };
            let body_out = self.flow_seq(body, after_test.clone(), &mut inner);
            let incr_in = continues
                .into_iter()
                .fold(body_out, |acc, m| join_opt(acc, Some(m)));
            let incr_out = self.flow_seq(incr, incr_in, exits);
            let next_head = join_opt(head.clone(), incr_out);
            iters += 1;
            if next_head == head || iters > LOOP_WIDEN_ITERS + 2 {
                return breaks
                    .into_iter()
                    .fold(after_test, |acc, m| join_opt(acc, Some(m)));
            }
            head = if iters >= LOOP_WIDEN_ITERS {
                widen_changed(head, next_head)
            } else {
                next_head
            };
        }
    }

    /// Applies one assignment target.
    fn assign_target(&mut self, target: &Expr, value_set: TypeSet, map: &mut TypeMap) {
        match &target.kind {
            ExprKind::Symbol(s) => {
                map.insert(*s, type_set_reduce(&value_set));
            }
            ExprKind::Param { symbol, args } | ExprKind::CellIndex { symbol, args } => {
                for a in args {
                    self.infer_expr(a, map);
                }
                // An indexed write may grow the matrix; the kind is kept
                // when known, the shape is forgotten.
                let old = map.get(symbol).cloned().unwrap_or_default();
                let kind = match type_set_widest(&old).kind {
                    ObjKind::Unknown => {
                        if matches!(target.kind, ExprKind::CellIndex { .. }) {
                            ObjKind::CellArray
                        } else {
                            ObjKind::MatrixF64
                        }
                    }
                    k => k,
                };
                let mut written = TypeInfo::matrix(kind);
                if kind == ObjKind::CellArray {
                    written.cell_types = value_set.clone();
                }
                map.insert(*symbol, type_set_make(written));
            }
            _ => {}
        }
    }

    /// Infers one expression, recording its type-set-string.
    fn infer_expr(&mut self, expr: &Expr, map: &TypeMap) -> TypeSetString {
        let result = self.infer_expr_inner(expr, map);
        self.info.expr_types.insert(expr.id, result.clone());
        result
    }

    fn infer_expr_inner(&mut self, expr: &Expr, map: &TypeMap) -> TypeSetString {
        match &expr.kind {
            ExprKind::IntConst(_) => {
                vec![type_set_make(TypeInfo::scalar(ObjKind::MatrixF64, true))]
            }
            ExprKind::FpConst(v) => {
                vec![type_set_make(TypeInfo::scalar(
                    ObjKind::MatrixF64,
                    v.fract() == 0.0,
                ))]
            }
            ExprKind::StrConst(s) => {
                vec![type_set_make(TypeInfo::sized_matrix(
                    ObjKind::CharArray,
                    [1, s.chars().count()].into_iter().collect(),
                    true,
                ))]
            }
            ExprKind::Symbol(s) => self.infer_symbol(*s, map),
            ExprKind::Unary { op, operand } => {
                let operand_types = self.infer_expr(operand, map);
                let mapping = match op {
                    UnOp::Plus | UnOp::Minus => typeinfo::minus_op_type_mapping,
                    UnOp::Not => typeinfo::not_op_type_mapping,
                    UnOp::Transpose | UnOp::CtransPose => typeinfo::transpose_op_type_mapping,
                };
                non_empty(mapping(&operand_types))
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let lhs_t = self.infer_expr(lhs, map);
                let rhs_t = self.infer_expr(rhs, map);
                let args = vec![
                    lhs_t.into_iter().next().unwrap_or_default(),
                    rhs_t.into_iter().next().unwrap_or_default(),
                ];
                let mapping = match op {
                    BinOp::Add | BinOp::Sub | BinOp::ElemMult => typeinfo::arith_op_type_mapping,
                    BinOp::Div | BinOp::ElemDiv | BinOp::LeftDiv | BinOp::ElemLeftDiv => {
                        typeinfo::div_op_type_mapping
                    }
                    BinOp::Mult => typeinfo::mult_op_type_mapping,
                    BinOp::Pow | BinOp::ElemPow => typeinfo::pow_op_type_mapping,
                    BinOp::Eq
                    | BinOp::Ne
                    | BinOp::Lt
                    | BinOp::Le
                    | BinOp::Gt
                    | BinOp::Ge
                    | BinOp::And
                    | BinOp::Or
                    | BinOp::ScAnd
                    | BinOp::ScOr => typeinfo::comparison_op_type_mapping,
                };
                non_empty(mapping(&args))
            }
            ExprKind::Param { symbol, args } => self.infer_param(*symbol, args, map),
            ExprKind::CellIndex { symbol, args } => {
                for a in args {
                    self.infer_expr(a, map);
                }
                let head = self.symbol_set(*symbol, map);
                let widest = type_set_widest(&head);
                if widest.kind == ObjKind::CellArray && !widest.cell_types.is_empty() {
                    vec![widest.cell_types.clone()]
                } else {
                    vec![type_set_make(TypeInfo::unknown())]
                }
            }
            ExprKind::Range { start, step, stop } => {
                for part in expr.sub_exprs() {
                    self.infer_expr(part, map);
                }
                let consts: Option<Vec<i64>> = [start, stop]
                    .into_iter()
                    .flatten()
                    .map(|e| match e.kind {
                        ExprKind::IntConst(v) => Some(v),
                        _ => None,
                    })
                    .collect();
                let step_const = match step {
                    None => Some(1),
                    Some(e) => match e.kind {
                        ExprKind::IntConst(v) => Some(v),
                        _ => None,
                    },
                };
                match (consts, step_const) {
                    (Some(bounds), Some(st)) if bounds.len() == 2 && st != 0 => {
                        let count = ((bounds[1] - bounds[0]) / st + 1).max(0) as usize;
                        vec![type_set_make(TypeInfo::sized_matrix(
                            ObjKind::MatrixF64,
                            [1, count].into_iter().collect(),
                            true,
                        ))]
                    }
                    _ => vec![type_set_make(TypeInfo::matrix(ObjKind::MatrixF64))],
                }
            }
            ExprKind::End { .. } => {
                vec![type_set_make(TypeInfo::scalar(ObjKind::MatrixF64, true))]
            }
            ExprKind::Matrix { rows } => self.infer_matrix_literal(rows, map),
            ExprKind::CellArray { rows } => {
                let mut elem_types = TypeSet::new();
                let mut count = 0;
                for e in rows.iter().flatten() {
                    let t = self.infer_expr(e, map);
                    if let Some(set) = t.first() {
                        elem_types = type_set_union(&elem_types, set);
                    }
                    count += 1;
                }
                let mut info = if count > 0 {
                    TypeInfo::sized_matrix(
                        ObjKind::CellArray,
                        [rows.len(), rows.first().map(Vec::len).unwrap_or(0)]
                            .into_iter()
                            .collect(),
                        false,
                    )
                } else {
                    TypeInfo::matrix(ObjKind::CellArray)
                };
                info.cell_types = type_set_reduce(&elem_types);
                vec![type_set_make(info)]
            }
            ExprKind::FnHandle(s) => {
                let mut info = TypeInfo::unknown();
                info.kind = ObjKind::FnHandle;
                info.func = self.resolve_function(*s);
                vec![type_set_make(info)]
            }
            ExprKind::Lambda { .. } => {
                let mut info = TypeInfo::unknown();
                info.kind = ObjKind::FnHandle;
                vec![type_set_make(info)]
            }
        }
    }

    fn infer_matrix_literal(&mut self, rows: &[Vec<Expr>], map: &TypeMap) -> TypeSetString {
        let mut all_scalar = true;
        let mut all_int = true;
        let mut kind = ObjKind::MatrixF64;
        let mut any = false;
        for e in rows.iter().flatten() {
            any = true;
            let t = self.infer_expr(e, map);
            let widest = t
                .first()
                .map(type_set_widest)
                .unwrap_or_else(TypeInfo::unknown);
            all_scalar &= widest.is_scalar;
            all_int &= widest.is_integer;
            if widest.kind == ObjKind::MatrixC128 {
                kind = ObjKind::MatrixC128;
            }
        }
        if !any {
            return vec![type_set_make(TypeInfo::sized_matrix(
                ObjKind::MatrixF64,
                [0, 0].into_iter().collect(),
                false,
            ))];
        }
        if all_scalar {
            let ncols = rows.first().map(Vec::len).unwrap_or(0);
            vec![type_set_make(TypeInfo::sized_matrix(
                kind,
                [rows.len(), ncols].into_iter().collect(),
                all_int && kind != ObjKind::MatrixC128,
            ))]
        } else {
            vec![type_set_make(TypeInfo::matrix(kind))]
        }
    }

    fn infer_symbol(&mut self, sym: Symbol, map: &TypeMap) -> TypeSetString {
        if let Some(set) = map.get(&sym) {
            // A bare function-valued symbol in value position auto-calls
            // with no arguments.
            let widest = type_set_widest(set);
            if widest.kind == ObjKind::Function {
                if let Some(f) = widest.func {
                    return self.infer_call(f, &TypeSetString::new());
                }
                return vec![type_set_make(TypeInfo::unknown())];
            }
            return vec![set.clone()];
        }
        // Environment-resolved: a function binding means a no-argument
        // call; anything else contributes its descriptor.
        if let Some(f) = self.resolve_function(sym) {
            return self.infer_call(f, &TypeSetString::new());
        }
        if let Some(obj) = self.env_lookup(sym) {
            return vec![type_set_make(TypeInfo::of_object(obj, true))];
        }
        vec![type_set_make(TypeInfo::unknown())]
    }

    fn infer_param(&mut self, sym: Symbol, args: &[Expr], map: &TypeMap) -> TypeSetString {
        let arg_types: TypeSetString = args
            .iter()
            .map(|a| {
                self.infer_expr(a, map)
                    .into_iter()
                    .next()
                    .unwrap_or_default()
            })
            .collect();

        // Calls: the head is not a local variable and resolves to a
        // function, or the local type says Function.
        let head_set = map.get(&sym).cloned();
        let head_is_local = head_set.is_some();
        if !head_is_local {
            if let Some(f) = self.resolve_function(sym) {
                return self.infer_call(f, &arg_types);
            }
        }
        let head = head_set.unwrap_or_else(|| self.symbol_set(sym, map));
        let widest = type_set_widest(&head);
        match widest.kind {
            ObjKind::Function | ObjKind::FnHandle => match widest.func {
                Some(f) => self.infer_call(f, &arg_types),
                None => vec![type_set_make(TypeInfo::unknown())],
            },
            k if k.is_matrix() => {
                let all_scalar_args = arg_types
                    .iter()
                    .all(|set| type_set_widest(set).is_scalar)
                    && args.iter().all(|a| {
                        !matches!(a.kind, ExprKind::Range { .. })
                    });
                if k == ObjKind::CellArray {
                    // a(i) on a cell yields a cell slice.
                    let mut info = TypeInfo::matrix(ObjKind::CellArray);
                    info.cell_types = widest.cell_types.clone();
                    if all_scalar_args {
                        info.is_scalar = true;
                        info.is_2d = true;
                    }
                    return vec![type_set_make(info)];
                }
                if all_scalar_args {
                    vec![type_set_make(TypeInfo::scalar(k, widest.is_integer))]
                } else {
                    vec![type_set_make(TypeInfo::matrix(k))]
                }
            }
            ObjKind::Range => {
                vec![type_set_make(TypeInfo::scalar(ObjKind::MatrixF64, widest.is_integer))]
            }
            _ => vec![type_set_make(TypeInfo::unknown())],
        }
    }

    /// Infers the result of calling `callee` with `arg_types`.
    fn infer_call(&mut self, callee: FuncRef, arg_types: &TypeSetString) -> TypeSetString {
        match callee {
            Function::Lib(lib) => match lib.type_map {
                Some(mapping) => non_empty(mapping(arg_types)),
                None => vec![type_set_make(TypeInfo::unknown())],
            },
            Function::Prog(prog) => {
                let body = prog.current_body();
                match manager::request(type_inference, callee, &body, arg_types) {
                    Ok(info) if !info.out_types.is_empty() => info.out_types.clone(),
                    // Bottom (recursion) or no outputs: unknown.
                    _ => vec![type_set_make(TypeInfo::unknown())],
                }
            }
        }
    }

    fn symbol_set(&mut self, sym: Symbol, map: &TypeMap) -> TypeSet {
        if let Some(set) = map.get(&sym) {
            return set.clone();
        }
        if let Some(obj) = self.env_lookup(sym) {
            return type_set_make(TypeInfo::of_object(obj, true));
        }
        type_set_make(TypeInfo::unknown())
    }

    /// Resolves a symbol to a function: nested children first, then the
    /// function's environment chain.
    fn resolve_function(&self, sym: Symbol) -> Option<FuncRef> {
        if let Some(prog) = self.func.as_prog() {
            if let Some(nested) = prog.find_nested(&sym.name()) {
                return Some(nested);
            }
        }
        match self.env_lookup(sym) {
            Some(DataObject::Func(f)) => Some(f),
            Some(DataObject::Handle { func, .. }) => Some(func),
            _ => None,
        }
    }

    fn env_lookup(&self, sym: Symbol) -> Option<&'static DataObject> {
        let prog = self.func.as_prog()?;
        let env = (*prog.local_env.borrow())?;
        env.try_lookup(sym)
    }
}

/// An empty mapping result means "no information"; normalize to one
/// unknown slot so callers can index slot zero.
fn non_empty(tss: TypeSetString) -> TypeSetString {
    if tss.is_empty() {
        vec![type_set_make(TypeInfo::unknown())]
    } else {
        tss
    }
}

/// Widens every symbol whose set changed between two head maps.
fn widen_changed(old: Option<TypeMap>, new: Option<TypeMap>) -> Option<TypeMap> {
    if old.is_none() || new.is_none() {
        return new;
    }
    let old = old.unwrap();
    let mut new = new.unwrap();
    let changed: Vec<Symbol> = new
        .iter()
        .filter(|(sym, set)| old.get(*sym) != Some(set))
        .map(|(sym, _)| *sym)
        .collect();
    for sym in changed {
        new.insert(sym, type_set_make(TypeInfo::unknown()));
    }
    Some(new)
}
