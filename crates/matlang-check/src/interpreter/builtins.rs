//! Library (built-in) functions.
//!
//! Each entry is a [`LibFunction`]: a native handler over argument
//! objects plus an optional type-mapping function consulted by the type
//! inference. [`bind_library_functions`] installs the whole table into
//! the global environment at interpreter startup.

use matlang_core::env::EnvRef;
use matlang_core::error::RunError;
use matlang_core::function::{Function, LibFunction};
use matlang_core::heap;
use matlang_core::matrix::Matrix;
use matlang_core::object::{DataObject, ObjKind, ObjRef};
use matlang_core::symbol::Symbol;
use matlang_core::typeinfo::{
    self, TypeInfo, TypeSetString, type_set_make, type_set_string_make,
};

use super::eval::obj_dims;

/// Binds every library function into `env`.
pub fn bind_library_functions(env: EnvRef) {
    for lib in LIBRARY {
        let func = heap::alloc_func(Function::Lib(LibFunction {
            name: lib.0,
            handler: lib.1,
            type_map: lib.2,
        }));
        env.bind(Symbol::intern(lib.0), heap::alloc(DataObject::Func(func)));
    }
}

type Handler = fn(&[ObjRef], usize) -> Result<Vec<ObjRef>, RunError>;
type Entry = (
    &'static str,
    Handler,
    Option<fn(&TypeSetString) -> TypeSetString>,
);

static LIBRARY: &[Entry] = &[
    ("disp", lib_disp, Some(typeinfo::null_type_mapping)),
    ("error", lib_error, Some(typeinfo::null_type_mapping)),
    ("size", lib_size, Some(size_type_mapping)),
    ("numel", lib_numel, Some(typeinfo::int_scalar_type_mapping)),
    ("length", lib_length, Some(typeinfo::int_scalar_type_mapping)),
    ("ndims", lib_ndims, Some(typeinfo::int_scalar_type_mapping)),
    ("isempty", lib_isempty, Some(typeinfo::bool_scalar_type_mapping)),
    ("zeros", lib_zeros, Some(fill_type_mapping)),
    ("ones", lib_ones, Some(fill_type_mapping)),
    ("eye", lib_eye, Some(fill_type_mapping)),
    ("abs", lib_abs, Some(real_unary_type_mapping)),
    ("sqrt", lib_sqrt, Some(real_unary_type_mapping)),
    ("sin", lib_sin, Some(real_unary_type_mapping)),
    ("cos", lib_cos, Some(real_unary_type_mapping)),
    ("tan", lib_tan, Some(real_unary_type_mapping)),
    ("exp", lib_exp, Some(real_unary_type_mapping)),
    ("log", lib_log, Some(real_unary_type_mapping)),
    ("floor", lib_floor, Some(int_unary_type_mapping)),
    ("ceil", lib_ceil, Some(int_unary_type_mapping)),
    ("round", lib_round, Some(int_unary_type_mapping)),
    ("mod", lib_mod, Some(typeinfo::arith_op_type_mapping)),
    ("rem", lib_rem, Some(typeinfo::arith_op_type_mapping)),
    ("min", lib_min, Some(reduce_type_mapping)),
    ("max", lib_max, Some(reduce_type_mapping)),
    ("sum", lib_sum, Some(reduce_type_mapping)),
    ("prod", lib_prod, Some(reduce_type_mapping)),
    ("pi", lib_pi, Some(typeinfo::real_scalar_type_mapping)),
    ("num2str", lib_num2str, Some(typeinfo::string_type_mapping)),
    ("strcmp", lib_strcmp, Some(typeinfo::bool_scalar_type_mapping)),
];

// ---------------------------------------------------------------------------
// Type mappings specific to the library
// ---------------------------------------------------------------------------

fn size_type_mapping(args: &TypeSetString) -> TypeSetString {
    if args.len() == 2 {
        // size(m, dim) is a scalar.
        return type_set_string_make(TypeInfo::scalar(ObjKind::MatrixF64, true));
    }
    // size(m) is a 1 x ndims row; 1 x 2 for known-2-D inputs.
    let mut info = TypeInfo::matrix(ObjKind::MatrixF64);
    info.is_integer = true;
    if let Some(set) = args.first() {
        if set.iter().all(|t| t.is_2d) {
            info = TypeInfo::sized_matrix(ObjKind::MatrixF64, [1, 2].into_iter().collect(), true);
        }
    }
    type_set_string_make(info)
}

fn fill_type_mapping(args: &TypeSetString) -> TypeSetString {
    // zeros(n) / zeros(r, c): shape known only for constant arguments,
    // which inference does not track through call boundaries; report a
    // 2-D f64 matrix.
    let _ = args;
    let mut info = TypeInfo::matrix(ObjKind::MatrixF64);
    info.is_integer = true;
    type_set_string_make(info)
}

fn real_unary_type_mapping(args: &TypeSetString) -> TypeSetString {
    // Same shape as the input, real f64 elements.
    let mut out = typeinfo::minus_op_type_mapping(args);
    for set in &mut out {
        let widened: Vec<TypeInfo> = set
            .iter()
            .map(|t| {
                let mut t = t.clone();
                t.kind = ObjKind::MatrixF64;
                t.is_integer = false;
                t
            })
            .collect();
        set.clear();
        set.extend(widened);
    }
    out
}

fn int_unary_type_mapping(args: &TypeSetString) -> TypeSetString {
    let mut out = typeinfo::minus_op_type_mapping(args);
    for set in &mut out {
        let widened: Vec<TypeInfo> = set
            .iter()
            .map(|t| {
                let mut t = t.clone();
                t.kind = ObjKind::MatrixF64;
                t.is_integer = true;
                t
            })
            .collect();
        set.clear();
        set.extend(widened);
    }
    out
}

fn reduce_type_mapping(args: &TypeSetString) -> TypeSetString {
    if args.len() != 1 {
        return TypeSetString::new();
    }
    let mut out = typeinfo::TypeSet::new();
    for t in &args[0] {
        if t.is_scalar {
            out.insert(t.clone());
        } else {
            // Vectors reduce to a scalar; matrices to a row.
            out.insert(TypeInfo::scalar(ObjKind::MatrixF64, t.is_integer));
            out.insert(TypeInfo::matrix(ObjKind::MatrixF64));
        }
    }
    vec![typeinfo::type_set_reduce(&out)]
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

fn expect_args(args: &[ObjRef], n: usize, name: &str) -> Result<(), RunError> {
    if args.len() != n {
        return Err(RunError::new(format!(
            "{} expects {} argument(s), got {}",
            name,
            n,
            args.len()
        )));
    }
    Ok(())
}

fn one_f64(args: &[ObjRef], name: &str) -> Result<Matrix<f64>, RunError> {
    expect_args(args, 1, name)?;
    args[0].to_f64_matrix()
}

fn alloc_f64(m: Matrix<f64>) -> Vec<ObjRef> {
    vec![heap::alloc(DataObject::MatrixF64(m.into()))]
}

fn lib_disp(args: &[ObjRef], _nargout: usize) -> Result<Vec<ObjRef>, RunError> {
    expect_args(args, 1, "disp")?;
    println!("{}", args[0]);
    Ok(Vec::new())
}

fn lib_error(args: &[ObjRef], _nargout: usize) -> Result<Vec<ObjRef>, RunError> {
    let msg = match args.first() {
        Some(obj) => obj
            .string_value()
            .unwrap_or_else(|_| obj.to_string()),
        None => "error".to_string(),
    };
    Err(RunError::new(msg))
}

fn lib_size(args: &[ObjRef], _nargout: usize) -> Result<Vec<ObjRef>, RunError> {
    match args {
        [obj] => {
            let dims = obj_dims(obj)?;
            Ok(alloc_f64(Matrix::row(
                dims.iter().map(|&d| d as f64).collect(),
            )))
        }
        [obj, dim] => {
            let dims = obj_dims(obj)?;
            let d = dim.scalar_f64()? as usize;
            if d == 0 {
                return Err(RunError::new("dimension argument must be positive"));
            }
            Ok(alloc_f64(Matrix::scalar(
                dims.get(d - 1).copied().unwrap_or(1) as f64,
            )))
        }
        _ => Err(RunError::new("size expects 1 or 2 arguments")),
    }
}

fn lib_numel(args: &[ObjRef], _nargout: usize) -> Result<Vec<ObjRef>, RunError> {
    expect_args(args, 1, "numel")?;
    let dims = obj_dims(args[0])?;
    Ok(alloc_f64(Matrix::scalar(
        dims.iter().product::<usize>() as f64,
    )))
}

fn lib_length(args: &[ObjRef], _nargout: usize) -> Result<Vec<ObjRef>, RunError> {
    expect_args(args, 1, "length")?;
    let dims = obj_dims(args[0])?;
    let len = if dims.iter().any(|&d| d == 0) {
        0
    } else {
        dims.iter().copied().max().unwrap_or(0)
    };
    Ok(alloc_f64(Matrix::scalar(len as f64)))
}

fn lib_ndims(args: &[ObjRef], _nargout: usize) -> Result<Vec<ObjRef>, RunError> {
    expect_args(args, 1, "ndims")?;
    Ok(alloc_f64(Matrix::scalar(obj_dims(args[0])?.len() as f64)))
}

fn lib_isempty(args: &[ObjRef], _nargout: usize) -> Result<Vec<ObjRef>, RunError> {
    expect_args(args, 1, "isempty")?;
    let dims = obj_dims(args[0])?;
    Ok(vec![heap::alloc(DataObject::bool_scalar(
        dims.iter().any(|&d| d == 0),
    ))])
}

fn fill_dims(args: &[ObjRef], name: &str) -> Result<(usize, usize), RunError> {
    match args {
        [] => Ok((1, 1)),
        [n] => {
            let n = n.scalar_f64()? as usize;
            Ok((n, n))
        }
        [r, c] => Ok((r.scalar_f64()? as usize, c.scalar_f64()? as usize)),
        _ => Err(RunError::new(format!("{} expects at most 2 arguments", name))),
    }
}

fn lib_zeros(args: &[ObjRef], _nargout: usize) -> Result<Vec<ObjRef>, RunError> {
    let (r, c) = fill_dims(args, "zeros")?;
    Ok(alloc_f64(Matrix::filled([r, c].into_iter().collect(), 0.0)))
}

fn lib_ones(args: &[ObjRef], _nargout: usize) -> Result<Vec<ObjRef>, RunError> {
    let (r, c) = fill_dims(args, "ones")?;
    Ok(alloc_f64(Matrix::filled([r, c].into_iter().collect(), 1.0)))
}

fn lib_eye(args: &[ObjRef], _nargout: usize) -> Result<Vec<ObjRef>, RunError> {
    let (r, c) = fill_dims(args, "eye")?;
    let mut m = Matrix::filled([r, c].into_iter().collect(), 0.0);
    for i in 1..=r.min(c) {
        m.write_2d(i as i64, i as i64, 1.0)?;
    }
    Ok(alloc_f64(m))
}

fn unary_f64(
    args: &[ObjRef],
    name: &str,
    f: impl Fn(f64) -> f64,
) -> Result<Vec<ObjRef>, RunError> {
    Ok(alloc_f64(one_f64(args, name)?.map(|&v| f(v))))
}

fn lib_abs(args: &[ObjRef], _nargout: usize) -> Result<Vec<ObjRef>, RunError> {
    expect_args(args, 1, "abs")?;
    if args[0].kind() == ObjKind::MatrixC128 {
        let m = args[0].to_c128_matrix()?;
        return Ok(alloc_f64(m.map(|v| v.norm())));
    }
    unary_f64(args, "abs", f64::abs)
}

fn lib_sqrt(args: &[ObjRef], _nargout: usize) -> Result<Vec<ObjRef>, RunError> {
    unary_f64(args, "sqrt", f64::sqrt)
}

fn lib_sin(args: &[ObjRef], _nargout: usize) -> Result<Vec<ObjRef>, RunError> {
    unary_f64(args, "sin", f64::sin)
}

fn lib_cos(args: &[ObjRef], _nargout: usize) -> Result<Vec<ObjRef>, RunError> {
    unary_f64(args, "cos", f64::cos)
}

fn lib_tan(args: &[ObjRef], _nargout: usize) -> Result<Vec<ObjRef>, RunError> {
    unary_f64(args, "tan", f64::tan)
}

fn lib_exp(args: &[ObjRef], _nargout: usize) -> Result<Vec<ObjRef>, RunError> {
    unary_f64(args, "exp", f64::exp)
}

fn lib_log(args: &[ObjRef], _nargout: usize) -> Result<Vec<ObjRef>, RunError> {
    unary_f64(args, "log", f64::ln)
}

fn lib_floor(args: &[ObjRef], _nargout: usize) -> Result<Vec<ObjRef>, RunError> {
    unary_f64(args, "floor", f64::floor)
}

fn lib_ceil(args: &[ObjRef], _nargout: usize) -> Result<Vec<ObjRef>, RunError> {
    unary_f64(args, "ceil", f64::ceil)
}

fn lib_round(args: &[ObjRef], _nargout: usize) -> Result<Vec<ObjRef>, RunError> {
    unary_f64(args, "round", f64::round)
}

fn binary_f64(
    args: &[ObjRef],
    name: &str,
    f: impl Fn(f64, f64) -> f64,
) -> Result<Vec<ObjRef>, RunError> {
    expect_args(args, 2, name)?;
    let a = args[0].to_f64_matrix()?;
    let b = args[1].to_f64_matrix()?;
    if a.is_scalar() {
        let s = a.get_scalar()?;
        return Ok(alloc_f64(b.map(|&v| f(s, v))));
    }
    if b.is_scalar() {
        let s = b.get_scalar()?;
        return Ok(alloc_f64(a.map(|&v| f(v, s))));
    }
    if a.dims() != b.dims() {
        return Err(RunError::new("matrix dimensions must agree"));
    }
    let data = a
        .data()
        .iter()
        .zip(b.data())
        .map(|(&x, &y)| f(x, y))
        .collect();
    Ok(alloc_f64(Matrix::from_data(
        a.dims().iter().copied().collect(),
        data,
    )))
}

fn lib_mod(args: &[ObjRef], _nargout: usize) -> Result<Vec<ObjRef>, RunError> {
    binary_f64(args, "mod", f64::rem_euclid)
}

fn lib_rem(args: &[ObjRef], _nargout: usize) -> Result<Vec<ObjRef>, RunError> {
    binary_f64(args, "rem", |a, b| a % b)
}

/// Column-wise reduction, collapsing vectors to scalars.
fn reduce(
    args: &[ObjRef],
    name: &str,
    init: impl Fn() -> f64,
    fold: impl Fn(f64, f64) -> f64,
) -> Result<Vec<ObjRef>, RunError> {
    let m = one_f64(args, name)?;
    if m.is_empty() {
        return Ok(alloc_f64(Matrix::scalar(init())));
    }
    if m.is_vector() || m.is_scalar() {
        let total = m.data().iter().fold(init(), |acc, &v| fold(acc, v));
        return Ok(alloc_f64(Matrix::scalar(total)));
    }
    let (rows, cols) = (m.rows(), m.cols());
    let mut out = Vec::with_capacity(cols);
    for c in 0..cols {
        let col = &m.data()[c * rows..(c + 1) * rows];
        out.push(col.iter().fold(init(), |acc, &v| fold(acc, v)));
    }
    Ok(alloc_f64(Matrix::row(out)))
}

fn lib_sum(args: &[ObjRef], _nargout: usize) -> Result<Vec<ObjRef>, RunError> {
    reduce(args, "sum", || 0.0, |a, b| a + b)
}

fn lib_prod(args: &[ObjRef], _nargout: usize) -> Result<Vec<ObjRef>, RunError> {
    reduce(args, "prod", || 1.0, |a, b| a * b)
}

fn lib_min(args: &[ObjRef], _nargout: usize) -> Result<Vec<ObjRef>, RunError> {
    reduce(args, "min", || f64::INFINITY, f64::min)
}

fn lib_max(args: &[ObjRef], _nargout: usize) -> Result<Vec<ObjRef>, RunError> {
    reduce(args, "max", || f64::NEG_INFINITY, f64::max)
}

fn lib_pi(args: &[ObjRef], _nargout: usize) -> Result<Vec<ObjRef>, RunError> {
    expect_args(args, 0, "pi")?;
    Ok(alloc_f64(Matrix::scalar(std::f64::consts::PI)))
}

fn lib_num2str(args: &[ObjRef], _nargout: usize) -> Result<Vec<ObjRef>, RunError> {
    expect_args(args, 1, "num2str")?;
    let v = args[0].scalar_f64()?;
    let text = if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    };
    Ok(vec![heap::alloc(DataObject::string(&text))])
}

fn lib_strcmp(args: &[ObjRef], _nargout: usize) -> Result<Vec<ObjRef>, RunError> {
    expect_args(args, 2, "strcmp")?;
    let equal = match (args[0].string_value(), args[1].string_value()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    };
    Ok(vec![heap::alloc(DataObject::bool_scalar(equal))])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar(v: f64) -> ObjRef {
        heap::alloc(DataObject::f64_scalar(v))
    }

    #[test]
    fn size_returns_dims_row() {
        let m = heap::alloc(DataObject::MatrixF64(
            Matrix::filled([2, 3].into_iter().collect(), 0.0).into(),
        ));
        let out = lib_size(&[m], 1).unwrap();
        let dims = out[0].to_f64_matrix().unwrap();
        assert_eq!(dims.data(), &[2.0, 3.0]);
        let out = lib_size(&[m, scalar(2.0)], 1).unwrap();
        assert_eq!(out[0].scalar_f64().unwrap(), 3.0);
    }

    #[test]
    fn zeros_and_eye() {
        let z = lib_zeros(&[scalar(2.0)], 1).unwrap();
        let zm = z[0].to_f64_matrix().unwrap();
        assert_eq!(zm.dims(), &[2, 2]);
        assert!(zm.data().iter().all(|&v| v == 0.0));
        let e = lib_eye(&[scalar(2.0)], 1).unwrap();
        let em = e[0].to_f64_matrix().unwrap();
        assert_eq!(em.data(), &[1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn reductions() {
        let v = heap::alloc(DataObject::MatrixF64(
            Matrix::row(vec![1.0, 2.0, 3.0]).into(),
        ));
        assert_eq!(lib_sum(&[v], 1).unwrap()[0].scalar_f64().unwrap(), 6.0);
        assert_eq!(lib_max(&[v], 1).unwrap()[0].scalar_f64().unwrap(), 3.0);
        assert_eq!(lib_min(&[v], 1).unwrap()[0].scalar_f64().unwrap(), 1.0);
        assert_eq!(lib_prod(&[v], 1).unwrap()[0].scalar_f64().unwrap(), 6.0);
    }

    #[test]
    fn error_raises() {
        let msg = heap::alloc(DataObject::string("boom"));
        let err = lib_error(&[msg], 0).unwrap_err();
        assert_eq!(err.message(), "boom");
    }

    #[test]
    fn strcmp_and_num2str() {
        let a = heap::alloc(DataObject::string("abc"));
        let b = heap::alloc(DataObject::string("abc"));
        assert!(lib_strcmp(&[a, b], 1).unwrap()[0]
            .as_logical_scalar()
            .unwrap());
        let s = lib_num2str(&[scalar(42.0)], 1).unwrap();
        assert_eq!(s[0].string_value().unwrap(), "42");
    }

    #[test]
    fn mod_follows_sign_of_divisor() {
        let out = lib_mod(&[scalar(-3.0), scalar(5.0)], 1).unwrap();
        assert_eq!(out[0].scalar_f64().unwrap(), 2.0);
    }
}
