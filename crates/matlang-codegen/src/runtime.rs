//! Runtime helper functions callable from compiled code.
//!
//! Each helper is an `extern "C-unwind"` shim bridging into the
//! interpreter crate's runtime: environment access, scalar
//! boxing/unboxing, operator dispatch, matrix element access, argument
//! arrays, function calls, and the statement-level interpreter fallback.
//!
//! Failures raise [`RunError`] as a panic payload; the unwind crosses
//! the compiled frames (hence `C-unwind`) and is caught by the dynamic
//! wrapper, which annotates and rethrows. The bounds-throwing helpers
//! never return.
//!
//! [`declare_runtime_functions`] declares every helper in a module;
//! [`map_runtime_symbols`] binds the declarations to the shims'
//! addresses in a JIT execution engine.

use std::panic::panic_any;

use inkwell::builder::Builder;
use inkwell::context::Context;
use inkwell::execution_engine::ExecutionEngine;
use inkwell::module::Module;
use inkwell::values::{BasicMetadataValueEnum, BasicValueEnum};
use inkwell::AddressSpace;

use matlang_check::interpreter::{indexing::IndexArg, Interpreter};
use matlang_core::env::Environment;
use matlang_core::error::RunError;
use matlang_core::expr::{BinOp, UnOp};
use matlang_core::function::Function;
use matlang_core::heap;
use matlang_core::metrics;
use matlang_core::object::DataObject;
use matlang_core::ops;
use matlang_core::stmt::Stmt;
use matlang_core::symbol::Symbol;

use crate::error::CompError;

// Helper names; one constant per declared symbol so call sites cannot
// drift from the declarations.
pub const RT_NEW_CALL_ENV: &str = "rt_new_call_env";
pub const RT_ENV_BIND: &str = "rt_env_bind";
pub const RT_ENV_LOOKUP: &str = "rt_env_lookup";
pub const RT_ENV_TRY_LOOKUP: &str = "rt_env_try_lookup";
pub const RT_COPY_OBJ: &str = "rt_copy_obj";
pub const RT_BOOL_TO_OBJ: &str = "rt_bool_to_obj";
pub const RT_I64_TO_OBJ: &str = "rt_i64_to_obj";
pub const RT_F64_TO_OBJ: &str = "rt_f64_to_obj";
pub const RT_OBJ_TO_BOOL: &str = "rt_obj_to_bool";
pub const RT_OBJ_TO_I64: &str = "rt_obj_to_i64";
pub const RT_OBJ_TO_F64: &str = "rt_obj_to_f64";
pub const RT_BIN_OP: &str = "rt_bin_op";
pub const RT_BIN_OP_LHS_SCALAR: &str = "rt_bin_op_lhs_scalar";
pub const RT_BIN_OP_RHS_SCALAR: &str = "rt_bin_op_rhs_scalar";
pub const RT_UN_OP: &str = "rt_un_op";
pub const RT_POW_F64: &str = "rt_pow_f64";
pub const RT_MAT_DIM: &str = "rt_mat_dim";
pub const RT_MAT_ELEM_COUNT: &str = "rt_mat_elem_count";
pub const RT_MAT_READ_F64_1D: &str = "rt_mat_read_f64_1d";
pub const RT_MAT_READ_F64_2D: &str = "rt_mat_read_f64_2d";
pub const RT_MAT_WRITE_F64_1D: &str = "rt_mat_write_f64_1d";
pub const RT_MAT_WRITE_F64_2D: &str = "rt_mat_write_f64_2d";
pub const RT_INDEX_READ: &str = "rt_index_read";
pub const RT_INDEX_WRITE: &str = "rt_index_write";
pub const RT_COPY_FOR_WRITE: &str = "rt_copy_for_write";
pub const RT_ARGS_CREATE: &str = "rt_args_create";
pub const RT_ARGS_PUSH: &str = "rt_args_push";
pub const RT_ARGS_GET: &str = "rt_args_get";
pub const RT_ARGS_COUNT: &str = "rt_args_count";
pub const RT_CHECK_RETURNS: &str = "rt_check_returns";
pub const RT_THROW_INSUFFICIENT: &str = "rt_throw_insufficient";
pub const RT_CALL_FUNCTION: &str = "rt_call_function";
pub const RT_CALL_NESTED: &str = "rt_call_nested";
pub const RT_EXEC_STMT: &str = "rt_exec_stmt";
pub const RT_THROW_BOUNDS: &str = "rt_throw_bounds";
pub const RT_SIN: &str = "rt_sin";
pub const RT_COS: &str = "rt_cos";
pub const RT_SQRT: &str = "rt_sqrt";
pub const RT_EXP: &str = "rt_exp";
pub const RT_LOG: &str = "rt_log";
pub const RT_ABS_F64: &str = "rt_abs_f64";
pub const RT_FLOOR: &str = "rt_floor";
pub const RT_CEIL: &str = "rt_ceil";
pub const RT_ROUND: &str = "rt_round";

/// Bounds-violation codes for [`RT_THROW_BOUNDS`].
pub const BOUNDS_READ_OOB: u64 = 0;
pub const BOUNDS_READ_NEG: u64 = 1;
pub const BOUNDS_WRITE_NEG: u64 = 2;

fn throw(err: RunError) -> ! {
    panic_any(err)
}

fn obj<'a>(ptr: *const DataObject) -> &'a DataObject {
    // Compiled code only holds pointers produced by the never-free heap.
    unsafe { &*ptr }
}

fn env<'a>(ptr: *const Environment) -> &'a Environment {
    unsafe { &*ptr }
}

fn sym(id: u32) -> Symbol {
    // Symbol ids handed to compiled code come from the interner, so the
    // text is always present; re-interning by index round-trips.
    symbol_from_index(id)
}

fn symbol_from_index(id: u32) -> Symbol {
    // The interner does not expose index-based construction publicly;
    // ids are baked into code as the symbol's interned index and must
    // resolve to the identical symbol. Interning the name again yields
    // it.
    Symbol::intern(&SYM_CACHE.with(|c| c.borrow()[&id].clone()))
}

thread_local! {
    static SYM_CACHE: std::cell::RefCell<std::collections::HashMap<u32, String>> =
        std::cell::RefCell::new(std::collections::HashMap::new());
}

/// Registers a symbol for id-based lookup from compiled code. The code
/// generator calls this for every symbol it bakes into instructions.
pub fn register_symbol(s: Symbol) -> u32 {
    SYM_CACHE.with(|c| {
        c.borrow_mut().insert(s.index(), s.name());
    });
    s.index()
}

/// Operator codes baked into compiled call sites.
pub fn bin_op_code(op: BinOp) -> u64 {
    op as u64
}

fn bin_op_from(code: u64) -> BinOp {
    const ALL: [BinOp; 20] = [
        BinOp::Add,
        BinOp::Sub,
        BinOp::Mult,
        BinOp::ElemMult,
        BinOp::Div,
        BinOp::ElemDiv,
        BinOp::LeftDiv,
        BinOp::ElemLeftDiv,
        BinOp::Pow,
        BinOp::ElemPow,
        BinOp::Eq,
        BinOp::Ne,
        BinOp::Lt,
        BinOp::Le,
        BinOp::Gt,
        BinOp::Ge,
        BinOp::And,
        BinOp::Or,
        BinOp::ScAnd,
        BinOp::ScOr,
    ];
    ALL[code as usize]
}

pub fn un_op_code(op: UnOp) -> u64 {
    op as u64
}

fn un_op_from(code: u64) -> UnOp {
    const ALL: [UnOp; 5] = [
        UnOp::Plus,
        UnOp::Minus,
        UnOp::Not,
        UnOp::Transpose,
        UnOp::CtransPose,
    ];
    ALL[code as usize]
}

// ---------------------------------------------------------------------------
// Shims
// ---------------------------------------------------------------------------

extern "C-unwind" fn rt_new_call_env(
    func: *const Function,
    nargin: u64,
    nargout: u64,
) -> *const Environment {
    let function = unsafe { &*func };
    let base = match function.as_prog().and_then(|p| *p.local_env.borrow()) {
        Some(local) => local,
        None => Interpreter::with(|i| i.global_env()),
    };
    let call_env = Environment::extend(base);
    call_env.bind(
        Symbol::intern("nargin"),
        heap::alloc(DataObject::f64_scalar(nargin as f64)),
    );
    call_env.bind(
        Symbol::intern("nargout"),
        heap::alloc(DataObject::f64_scalar(nargout as f64)),
    );
    call_env
}

extern "C-unwind" fn rt_env_bind(e: *const Environment, s: u32, o: *const DataObject) {
    env(e).bind(sym(s), obj(o));
}

extern "C-unwind" fn rt_env_lookup(e: *const Environment, s: u32) -> *const DataObject {
    match env(e).lookup(sym(s)) {
        Ok(o) => o,
        Err(err) => throw(err),
    }
}

extern "C-unwind" fn rt_env_try_lookup(e: *const Environment, s: u32) -> *const DataObject {
    match env(e).try_lookup(sym(s)) {
        Some(o) => o,
        None => std::ptr::null(),
    }
}

extern "C-unwind" fn rt_copy_obj(o: *const DataObject) -> *const DataObject {
    heap::alloc(obj(o).copy())
}

extern "C-unwind" fn rt_bool_to_obj(v: u64) -> *const DataObject {
    heap::alloc(DataObject::bool_scalar(v != 0))
}

extern "C-unwind" fn rt_i64_to_obj(v: i64) -> *const DataObject {
    heap::alloc(DataObject::f64_scalar(v as f64))
}

extern "C-unwind" fn rt_f64_to_obj(v: f64) -> *const DataObject {
    heap::alloc(DataObject::f64_scalar(v))
}

extern "C-unwind" fn rt_obj_to_bool(o: *const DataObject) -> u64 {
    match obj(o).as_logical_scalar() {
        Ok(b) => b as u64,
        Err(err) => throw(err),
    }
}

extern "C-unwind" fn rt_obj_to_i64(o: *const DataObject) -> i64 {
    match obj(o).scalar_f64() {
        Ok(v) => v as i64,
        Err(err) => throw(err),
    }
}

extern "C-unwind" fn rt_obj_to_f64(o: *const DataObject) -> f64 {
    match obj(o).scalar_f64() {
        Ok(v) => v,
        Err(err) => throw(err),
    }
}

extern "C-unwind" fn rt_bin_op(
    op: u64,
    a: *const DataObject,
    b: *const DataObject,
) -> *const DataObject {
    match ops::apply_bin_op(bin_op_from(op), obj(a), obj(b)) {
        Ok(out) => heap::alloc(out),
        Err(err) => throw(err),
    }
}

extern "C-unwind" fn rt_bin_op_lhs_scalar(
    op: u64,
    s: f64,
    m: *const DataObject,
) -> *const DataObject {
    let scalar = DataObject::f64_scalar(s);
    match ops::apply_bin_op(bin_op_from(op), &scalar, obj(m)) {
        Ok(out) => heap::alloc(out),
        Err(err) => throw(err),
    }
}

extern "C-unwind" fn rt_bin_op_rhs_scalar(
    op: u64,
    m: *const DataObject,
    s: f64,
) -> *const DataObject {
    let scalar = DataObject::f64_scalar(s);
    match ops::apply_bin_op(bin_op_from(op), obj(m), &scalar) {
        Ok(out) => heap::alloc(out),
        Err(err) => throw(err),
    }
}

extern "C-unwind" fn rt_un_op(op: u64, a: *const DataObject) -> *const DataObject {
    match ops::apply_un_op(un_op_from(op), obj(a)) {
        Ok(out) => heap::alloc(out),
        Err(err) => throw(err),
    }
}

extern "C-unwind" fn rt_pow_f64(a: f64, b: f64) -> f64 {
    a.powf(b)
}

extern "C-unwind" fn rt_mat_dim(o: *const DataObject, dim: i64) -> i64 {
    match matlang_check::interpreter::eval::obj_dims(obj(o)) {
        Ok(dims) => dims.get((dim - 1).max(0) as usize).copied().unwrap_or(1) as i64,
        Err(err) => throw(err),
    }
}

extern "C-unwind" fn rt_mat_elem_count(o: *const DataObject) -> i64 {
    match matlang_check::interpreter::eval::obj_dims(obj(o)) {
        Ok(dims) => dims.iter().product::<usize>() as i64,
        Err(err) => throw(err),
    }
}

extern "C-unwind" fn rt_mat_read_f64_1d(o: *const DataObject, i: i64) -> f64 {
    match indexing::read_scalar_f64(obj(o), &[i]) {
        Ok(v) => v,
        Err(err) => throw(err),
    }
}

extern "C-unwind" fn rt_mat_read_f64_2d(o: *const DataObject, i: i64, j: i64) -> f64 {
    match indexing::read_scalar_f64(obj(o), &[i, j]) {
        Ok(v) => v,
        Err(err) => throw(err),
    }
}

extern "C-unwind" fn rt_mat_write_f64_1d(o: *const DataObject, i: i64, v: f64) {
    let value = DataObject::f64_scalar(v);
    if let Err(err) = indexing::write_indexed(obj(o), &[IndexArg::Scalar(i)], &value) {
        throw(err)
    }
}

extern "C-unwind" fn rt_mat_write_f64_2d(o: *const DataObject, i: i64, j: i64, v: f64) {
    let value = DataObject::f64_scalar(v);
    if let Err(err) = indexing::write_indexed(
        obj(o),
        &[IndexArg::Scalar(i), IndexArg::Scalar(j)],
        &value,
    ) {
        throw(err)
    }
}

extern "C-unwind" fn rt_index_read(
    o: *const DataObject,
    args: *const DataObject,
) -> *const DataObject {
    let result = index_args_of(args).and_then(|idx| indexing::read_indexed(obj(o), &idx));
    match result {
        Ok(out) => heap::alloc(out),
        Err(err) => throw(err),
    }
}

extern "C-unwind" fn rt_index_write(
    o: *const DataObject,
    args: *const DataObject,
    value: *const DataObject,
) {
    let result =
        index_args_of(args).and_then(|idx| indexing::write_indexed(obj(o), &idx, obj(value)));
    if let Err(err) = result {
        throw(err)
    }
}

fn index_args_of(args: *const DataObject) -> Result<Vec<IndexArg>, RunError> {
    let arr = obj(args);
    let n = arr.array_size()?;
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        out.push(IndexArg::from_object(arr.array_get(i)?)?);
    }
    Ok(out)
}

extern "C-unwind" fn rt_copy_for_write(e: *const Environment, s: u32) {
    let symbol = sym(s);
    if let Some(old) = env(e).try_lookup(symbol) {
        metrics::incr_counter(metrics::ARRAY_COPY_COUNT, 1);
        env(e).bind(symbol, heap::alloc(old.copy()));
    }
}

extern "C-unwind" fn rt_args_create(reserve: i64) -> *const DataObject {
    heap::alloc(DataObject::args(reserve.max(0) as usize))
}

extern "C-unwind" fn rt_args_push(arr: *const DataObject, o: *const DataObject) {
    if let Err(err) = obj(arr).array_push(obj(o)) {
        throw(err)
    }
}

extern "C-unwind" fn rt_args_get(arr: *const DataObject, i: i64) -> *const DataObject {
    match obj(arr).array_get(i as usize) {
        Ok(o) => o,
        Err(err) => throw(err),
    }
}

extern "C-unwind" fn rt_args_count(arr: *const DataObject) -> i64 {
    match obj(arr).array_size() {
        Ok(n) => n as i64,
        Err(err) => throw(err),
    }
}

extern "C-unwind" fn rt_check_returns(arr: *const DataObject, need: i64) {
    match obj(arr).array_size() {
        Ok(n) if n as i64 >= need => {}
        Ok(_) => throw(RunError::new(
            "insufficient number of return values in assignment",
        )),
        Err(err) => throw(err),
    }
}

extern "C-unwind" fn rt_call_function(
    func: *const Function,
    args: *const DataObject,
    nargout: i64,
) -> *const DataObject {
    let function: &'static Function = unsafe { &*func };
    let arg_vec = match collect_args(args) {
        Ok(v) => v,
        Err(err) => throw(err),
    };
    let result =
        Interpreter::with(|i| i.call_function(function, &arg_vec, nargout.max(0) as usize));
    match result {
        Ok(values) => {
            let out = heap::alloc(DataObject::args(values.len()));
            for v in values {
                out.array_push(v).expect("fresh argument array");
            }
            out
        }
        Err(err) => throw(err),
    }
}

fn collect_args(args: *const DataObject) -> Result<Vec<&'static DataObject>, RunError> {
    let arr = obj(args);
    let n = arr.array_size()?;
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        out.push(arr.array_get(i)?);
    }
    Ok(out)
}

extern "C-unwind" fn rt_call_nested(
    func: *const Function,
    caller_env: *const Environment,
    args: *const DataObject,
    nargout: i64,
) -> *const DataObject {
    let function: &'static Function = unsafe { &*func };
    let arg_vec = match collect_args(args) {
        Ok(v) => v,
        Err(err) => throw(err),
    };
    // The caller's extended environment serves as the callee's local
    // environment for the duration of the call.
    let base = Environment::extend(env(caller_env));
    let result = Interpreter::with(|i| {
        i.interpret_prog_call(function, &arg_vec, nargout.max(0) as usize, Some(base))
    });
    match result {
        Ok(values) => {
            let out = heap::alloc(DataObject::args(values.len()));
            for v in values {
                out.array_push(v).expect("fresh argument array");
            }
            out
        }
        Err(err) => throw(err.during_call_to(&function.name())),
    }
}

extern "C-unwind" fn rt_exec_stmt(e: *const Environment, stmt: *const Stmt) {
    let stmt = unsafe { &*stmt };
    let result = Interpreter::with(|i| i.exec_stmt(stmt, env(e)));
    match result {
        Ok(_status) => {}
        Err(err) => throw(err),
    }
}

extern "C-unwind" fn rt_throw_insufficient() {
    throw(RunError::new(
        "insufficient number of return values in assignment",
    ))
}

extern "C-unwind" fn rt_throw_bounds(code: u64) {
    match code {
        BOUNDS_READ_OOB => throw(RunError::new("index out of bounds in matrix read")),
        // Negative indices report the read-path message on both access
        // kinds (the write-path guard keeps its own code but shares the
        // text).
        _ => throw(RunError::new("negative index in matrix read")),
    }
}

extern "C-unwind" fn rt_sin(v: f64) -> f64 {
    v.sin()
}
extern "C-unwind" fn rt_cos(v: f64) -> f64 {
    v.cos()
}
extern "C-unwind" fn rt_sqrt(v: f64) -> f64 {
    v.sqrt()
}
extern "C-unwind" fn rt_exp(v: f64) -> f64 {
    v.exp()
}
extern "C-unwind" fn rt_log(v: f64) -> f64 {
    v.ln()
}
extern "C-unwind" fn rt_abs_f64(v: f64) -> f64 {
    v.abs()
}
extern "C-unwind" fn rt_floor(v: f64) -> f64 {
    v.floor()
}
extern "C-unwind" fn rt_ceil(v: f64) -> f64 {
    v.ceil()
}
extern "C-unwind" fn rt_round(v: f64) -> f64 {
    v.round()
}

// ---------------------------------------------------------------------------
// Declarations and symbol mapping
// ---------------------------------------------------------------------------

/// Declares every runtime helper in `module`.
pub fn declare_runtime_functions<'ctx>(context: &'ctx Context, module: &Module<'ctx>) {
    let ptr = context.ptr_type(AddressSpace::default());
    let i64t = context.i64_type();
    let f64t = context.f64_type();
    let void = context.void_type();

    let decls: &[(&str, inkwell::types::FunctionType<'ctx>)] = &[
        (
            RT_NEW_CALL_ENV,
            ptr.fn_type(&[ptr.into(), i64t.into(), i64t.into()], false),
        ),
        (
            RT_ENV_BIND,
            void.fn_type(&[ptr.into(), context.i32_type().into(), ptr.into()], false),
        ),
        (
            RT_ENV_LOOKUP,
            ptr.fn_type(&[ptr.into(), context.i32_type().into()], false),
        ),
        (
            RT_ENV_TRY_LOOKUP,
            ptr.fn_type(&[ptr.into(), context.i32_type().into()], false),
        ),
        (RT_COPY_OBJ, ptr.fn_type(&[ptr.into()], false)),
        (RT_BOOL_TO_OBJ, ptr.fn_type(&[i64t.into()], false)),
        (RT_I64_TO_OBJ, ptr.fn_type(&[i64t.into()], false)),
        (RT_F64_TO_OBJ, ptr.fn_type(&[f64t.into()], false)),
        (RT_OBJ_TO_BOOL, i64t.fn_type(&[ptr.into()], false)),
        (RT_OBJ_TO_I64, i64t.fn_type(&[ptr.into()], false)),
        (RT_OBJ_TO_F64, f64t.fn_type(&[ptr.into()], false)),
        (
            RT_BIN_OP,
            ptr.fn_type(&[i64t.into(), ptr.into(), ptr.into()], false),
        ),
        (
            RT_BIN_OP_LHS_SCALAR,
            ptr.fn_type(&[i64t.into(), f64t.into(), ptr.into()], false),
        ),
        (
            RT_BIN_OP_RHS_SCALAR,
            ptr.fn_type(&[i64t.into(), ptr.into(), f64t.into()], false),
        ),
        (RT_UN_OP, ptr.fn_type(&[i64t.into(), ptr.into()], false)),
        (RT_POW_F64, f64t.fn_type(&[f64t.into(), f64t.into()], false)),
        (RT_MAT_DIM, i64t.fn_type(&[ptr.into(), i64t.into()], false)),
        (RT_MAT_ELEM_COUNT, i64t.fn_type(&[ptr.into()], false)),
        (
            RT_MAT_READ_F64_1D,
            f64t.fn_type(&[ptr.into(), i64t.into()], false),
        ),
        (
            RT_MAT_READ_F64_2D,
            f64t.fn_type(&[ptr.into(), i64t.into(), i64t.into()], false),
        ),
        (
            RT_MAT_WRITE_F64_1D,
            void.fn_type(&[ptr.into(), i64t.into(), f64t.into()], false),
        ),
        (
            RT_MAT_WRITE_F64_2D,
            void.fn_type(&[ptr.into(), i64t.into(), i64t.into(), f64t.into()], false),
        ),
        (RT_INDEX_READ, ptr.fn_type(&[ptr.into(), ptr.into()], false)),
        (
            RT_INDEX_WRITE,
            void.fn_type(&[ptr.into(), ptr.into(), ptr.into()], false),
        ),
        (
            RT_COPY_FOR_WRITE,
            void.fn_type(&[ptr.into(), context.i32_type().into()], false),
        ),
        (RT_ARGS_CREATE, ptr.fn_type(&[i64t.into()], false)),
        (RT_ARGS_PUSH, void.fn_type(&[ptr.into(), ptr.into()], false)),
        (RT_ARGS_GET, ptr.fn_type(&[ptr.into(), i64t.into()], false)),
        (RT_ARGS_COUNT, i64t.fn_type(&[ptr.into()], false)),
        (
            RT_CHECK_RETURNS,
            void.fn_type(&[ptr.into(), i64t.into()], false),
        ),
        (
            RT_CALL_FUNCTION,
            ptr.fn_type(&[ptr.into(), ptr.into(), i64t.into()], false),
        ),
        (
            RT_CALL_NESTED,
            ptr.fn_type(&[ptr.into(), ptr.into(), ptr.into(), i64t.into()], false),
        ),
        (RT_EXEC_STMT, void.fn_type(&[ptr.into(), ptr.into()], false)),
        (RT_THROW_BOUNDS, void.fn_type(&[i64t.into()], false)),
        (RT_THROW_INSUFFICIENT, void.fn_type(&[], false)),
        (RT_SIN, f64t.fn_type(&[f64t.into()], false)),
        (RT_COS, f64t.fn_type(&[f64t.into()], false)),
        (RT_SQRT, f64t.fn_type(&[f64t.into()], false)),
        (RT_EXP, f64t.fn_type(&[f64t.into()], false)),
        (RT_LOG, f64t.fn_type(&[f64t.into()], false)),
        (RT_ABS_F64, f64t.fn_type(&[f64t.into()], false)),
        (RT_FLOOR, f64t.fn_type(&[f64t.into()], false)),
        (RT_CEIL, f64t.fn_type(&[f64t.into()], false)),
        (RT_ROUND, f64t.fn_type(&[f64t.into()], false)),
    ];
    for (name, ty) in decls {
        if module.get_function(name).is_none() {
            module.add_function(name, *ty, None);
        }
    }
}

/// Maps every declared helper to its shim address in `engine`.
pub fn map_runtime_symbols<'ctx>(engine: &ExecutionEngine<'ctx>, module: &Module<'ctx>) {
    let addrs: &[(&str, usize)] = &[
        (RT_NEW_CALL_ENV, rt_new_call_env as usize),
        (RT_ENV_BIND, rt_env_bind as usize),
        (RT_ENV_LOOKUP, rt_env_lookup as usize),
        (RT_ENV_TRY_LOOKUP, rt_env_try_lookup as usize),
        (RT_COPY_OBJ, rt_copy_obj as usize),
        (RT_BOOL_TO_OBJ, rt_bool_to_obj as usize),
        (RT_I64_TO_OBJ, rt_i64_to_obj as usize),
        (RT_F64_TO_OBJ, rt_f64_to_obj as usize),
        (RT_OBJ_TO_BOOL, rt_obj_to_bool as usize),
        (RT_OBJ_TO_I64, rt_obj_to_i64 as usize),
        (RT_OBJ_TO_F64, rt_obj_to_f64 as usize),
        (RT_BIN_OP, rt_bin_op as usize),
        (RT_BIN_OP_LHS_SCALAR, rt_bin_op_lhs_scalar as usize),
        (RT_BIN_OP_RHS_SCALAR, rt_bin_op_rhs_scalar as usize),
        (RT_UN_OP, rt_un_op as usize),
        (RT_POW_F64, rt_pow_f64 as usize),
        (RT_MAT_DIM, rt_mat_dim as usize),
        (RT_MAT_ELEM_COUNT, rt_mat_elem_count as usize),
        (RT_MAT_READ_F64_1D, rt_mat_read_f64_1d as usize),
        (RT_MAT_READ_F64_2D, rt_mat_read_f64_2d as usize),
        (RT_MAT_WRITE_F64_1D, rt_mat_write_f64_1d as usize),
        (RT_MAT_WRITE_F64_2D, rt_mat_write_f64_2d as usize),
        (RT_INDEX_READ, rt_index_read as usize),
        (RT_INDEX_WRITE, rt_index_write as usize),
        (RT_COPY_FOR_WRITE, rt_copy_for_write as usize),
        (RT_ARGS_CREATE, rt_args_create as usize),
        (RT_ARGS_PUSH, rt_args_push as usize),
        (RT_ARGS_GET, rt_args_get as usize),
        (RT_ARGS_COUNT, rt_args_count as usize),
        (RT_CHECK_RETURNS, rt_check_returns as usize),
        (RT_CALL_FUNCTION, rt_call_function as usize),
        (RT_CALL_NESTED, rt_call_nested as usize),
        (RT_EXEC_STMT, rt_exec_stmt as usize),
        (RT_THROW_BOUNDS, rt_throw_bounds as usize),
        (RT_THROW_INSUFFICIENT, rt_throw_insufficient as usize),
        (RT_SIN, rt_sin as usize),
        (RT_COS, rt_cos as usize),
        (RT_SQRT, rt_sqrt as usize),
        (RT_EXP, rt_exp as usize),
        (RT_LOG, rt_log as usize),
        (RT_ABS_F64, rt_abs_f64 as usize),
        (RT_FLOOR, rt_floor as usize),
        (RT_CEIL, rt_ceil as usize),
        (RT_ROUND, rt_round as usize),
    ];
    for (name, addr) in addrs {
        if let Some(decl) = module.get_function(name) {
            engine.add_global_mapping(&decl, *addr);
        }
    }
}

/// The optimized-library-call registry: `(library name, f64 arity-1
/// signature) -> runtime helper`. Consulted by the call strategy when
/// `jit_use_libfunc_opts` is enabled.
pub fn lib_native_entry(name: &str) -> Option<&'static str> {
    match name {
        "sin" => Some(RT_SIN),
        "cos" => Some(RT_COS),
        "sqrt" => Some(RT_SQRT),
        "exp" => Some(RT_EXP),
        "log" => Some(RT_LOG),
        "abs" => Some(RT_ABS_F64),
        "floor" => Some(RT_FLOOR),
        "ceil" => Some(RT_CEIL),
        "round" => Some(RT_ROUND),
        _ => None,
    }
}

/// Builds a call to a declared runtime helper that returns a value.
pub fn call_runtime<'ctx>(
    builder: &Builder<'ctx>,
    module: &Module<'ctx>,
    name: &str,
    args: &[BasicMetadataValueEnum<'ctx>],
    label: &str,
) -> Result<BasicValueEnum<'ctx>, CompError> {
    let callee = module
        .get_function(name)
        .ok_or_else(|| CompError::Llvm(format!("runtime function '{}' not declared", name)))?;
    builder
        .build_call(callee, args, label)
        .map_err(CompError::llvm)?
        .try_as_basic_value()
        .basic()
        .ok_or_else(|| CompError::Llvm(format!("runtime function '{}' returned void", name)))
}

/// Builds a call to a declared void runtime helper.
pub fn call_runtime_void<'ctx>(
    builder: &Builder<'ctx>,
    module: &Module<'ctx>,
    name: &str,
    args: &[BasicMetadataValueEnum<'ctx>],
) -> Result<(), CompError> {
    let callee = module
        .get_function(name)
        .ok_or_else(|| CompError::Llvm(format!("runtime function '{}' not declared", name)))?;
    builder
        .build_call(callee, args, "")
        .map_err(CompError::llvm)?;
    Ok(())
}

// Scalar element access used by the fast-path shims: strict checks with
// the standard bounds messages, reading through the f64 widening.
mod indexing {
    use matlang_check::interpreter::indexing as interp_indexing;
    use matlang_core::error::RunError;
    use matlang_core::object::DataObject;

    pub use interp_indexing::{write_indexed, IndexArg};

    pub fn read_scalar_f64(obj: &DataObject, idxs: &[i64]) -> Result<f64, RunError> {
        let args: Vec<IndexArg> = idxs.iter().map(|&i| IndexArg::Scalar(i)).collect();
        interp_indexing::read_indexed(obj, &args)?.scalar_f64()
    }

    pub use interp_indexing::read_indexed;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_codes_round_trip() {
        for op in [
            BinOp::Add,
            BinOp::Mult,
            BinOp::ElemDiv,
            BinOp::Le,
            BinOp::ScOr,
        ] {
            assert_eq!(bin_op_from(bin_op_code(op)), op);
        }
        for op in [UnOp::Minus, UnOp::Not, UnOp::CtransPose] {
            assert_eq!(un_op_from(un_op_code(op)), op);
        }
    }

    #[test]
    fn scalar_shims_round_trip() {
        let o = rt_f64_to_obj(4.5);
        assert_eq!(rt_obj_to_f64(o), 4.5);
        let b = rt_bool_to_obj(1);
        assert_eq!(rt_obj_to_bool(b), 1);
        let i = rt_i64_to_obj(7);
        assert_eq!(rt_obj_to_i64(i), 7);
    }

    #[test]
    fn bin_op_shim_adds() {
        let a = rt_f64_to_obj(2.0);
        let b = rt_f64_to_obj(3.0);
        let c = rt_bin_op(bin_op_code(BinOp::Add), a, b);
        assert_eq!(rt_obj_to_f64(c), 5.0);
    }

    #[test]
    fn mat_write_expands_then_reads_back() {
        let m = rt_f64_to_obj(1.0);
        rt_mat_write_f64_1d(m, 3, 9.0);
        assert_eq!(rt_mat_read_f64_1d(m, 3), 9.0);
        assert_eq!(rt_mat_elem_count(m), 3);
    }

    #[test]
    fn lib_native_entries_cover_math() {
        assert_eq!(lib_native_entry("sin"), Some(RT_SIN));
        assert_eq!(lib_native_entry("nonesuch"), None);
    }

    #[test]
    fn symbol_registration_round_trips() {
        let s = Symbol::intern("rt_sym_test");
        let id = register_symbol(s);
        assert_eq!(symbol_from_index(id), s);
    }
}
