//! Runtime operator evaluation over data objects.
//!
//! [`apply_bin_op`] is the single entry point for binary operations. It
//! first consults a static dispatch table keyed by
//! `(operator, left kind, right kind)`; entries are fast handlers for the
//! hot combinations. Misses fall through to the generic path, which
//! widens operands through the numeric lattice and evaluates
//! element-wise.
//!
//! Shapes follow the source language: element-wise operators require
//! equal dimensions unless one operand is scalar; `*`, `/`, `\` use the
//! linear-algebra rules.

use std::collections::HashMap;
use std::sync::LazyLock;

use num_complex::Complex64;

use crate::error::RunError;
use crate::expr::{BinOp, UnOp};
use crate::matrix::Matrix;
use crate::object::{DataObject, ObjKind, ObjRef};

/// Handler signature for the dispatch table.
pub type BinHandler = fn(&DataObject, &DataObject) -> Result<DataObject, RunError>;

/// Applies a binary operator to two objects, producing a fresh object.
pub fn apply_bin_op(op: BinOp, a: &DataObject, b: &DataObject) -> Result<DataObject, RunError> {
    if let Some(handler) = DISPATCH.get(&(op, a.kind(), b.kind())) {
        return handler(a, b);
    }
    generic_bin_op(op, a, b)
}

/// Applies a unary operator.
pub fn apply_un_op(op: UnOp, a: &DataObject) -> Result<DataObject, RunError> {
    match op {
        UnOp::Plus => Ok(a.copy()),
        UnOp::Minus => match a {
            DataObject::MatrixC128(m) => Ok(DataObject::MatrixC128(
                m.borrow().map(|&v| -v).into(),
            )),
            _ => Ok(DataObject::MatrixF64(a.to_f64_matrix()?.map(|&v| -v).into())),
        },
        UnOp::Not => Ok(DataObject::Logical(
            a.to_f64_matrix()?.map(|&v| v == 0.0).into(),
        )),
        UnOp::Transpose => transpose_obj(a, false),
        UnOp::CtransPose => transpose_obj(a, true),
    }
}

fn transpose_obj(a: &DataObject, conjugate: bool) -> Result<DataObject, RunError> {
    match a {
        DataObject::MatrixC128(m) => {
            let t = m.borrow().transpose()?;
            let t = if conjugate { t.map(|v| v.conj()) } else { t };
            Ok(DataObject::MatrixC128(t.into()))
        }
        DataObject::Chars(m) => Ok(DataObject::Chars(m.borrow().transpose()?.into())),
        DataObject::Logical(m) => Ok(DataObject::Logical(m.borrow().transpose()?.into())),
        DataObject::Cells(m) => Ok(DataObject::Cells(m.borrow().transpose()?.into())),
        _ => Ok(DataObject::MatrixF64(a.to_f64_matrix()?.transpose()?.into())),
    }
}

// ---------------------------------------------------------------------------
// Element-wise helpers
// ---------------------------------------------------------------------------

fn broadcast_zip<T: Copy, U: Clone>(
    a: &Matrix<T>,
    b: &Matrix<T>,
    f: impl Fn(T, T) -> U,
) -> Result<Matrix<U>, RunError> {
    if a.is_scalar() {
        let s = a.data()[0];
        return Ok(b.map(|&v| f(s, v)));
    }
    if b.is_scalar() {
        let s = b.data()[0];
        return Ok(a.map(|&v| f(v, s)));
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
    Ok(Matrix::from_data(a.dims().iter().copied().collect(), data))
}

fn f64_elem(
    a: &DataObject,
    b: &DataObject,
    f: impl Fn(f64, f64) -> f64,
) -> Result<DataObject, RunError> {
    Ok(DataObject::MatrixF64(
        broadcast_zip(&a.to_f64_matrix()?, &b.to_f64_matrix()?, f)?.into(),
    ))
}

fn c128_elem(
    a: &DataObject,
    b: &DataObject,
    f: impl Fn(Complex64, Complex64) -> Complex64,
) -> Result<DataObject, RunError> {
    Ok(DataObject::MatrixC128(
        broadcast_zip(&a.to_c128_matrix()?, &b.to_c128_matrix()?, f)?.into(),
    ))
}

fn f64_compare(
    a: &DataObject,
    b: &DataObject,
    f: impl Fn(f64, f64) -> bool,
) -> Result<DataObject, RunError> {
    Ok(DataObject::Logical(
        broadcast_zip(&a.to_f64_matrix()?, &b.to_f64_matrix()?, f)?.into(),
    ))
}

fn either_complex(a: &DataObject, b: &DataObject) -> bool {
    a.kind() == ObjKind::MatrixC128 || b.kind() == ObjKind::MatrixC128
}

fn obj_is_scalar(a: &DataObject) -> bool {
    match a {
        DataObject::MatrixI32(m) => m.borrow().is_scalar(),
        DataObject::MatrixF32(m) => m.borrow().is_scalar(),
        DataObject::MatrixF64(m) => m.borrow().is_scalar(),
        DataObject::MatrixC128(m) => m.borrow().is_scalar(),
        DataObject::Logical(m) => m.borrow().is_scalar(),
        DataObject::Chars(m) => m.borrow().is_scalar(),
        DataObject::Range(r) => r.count() == 1,
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Linear algebra
// ---------------------------------------------------------------------------

/// Inner-product matrix multiplication.
pub fn matrix_mult(a: &Matrix<f64>, b: &Matrix<f64>) -> Result<Matrix<f64>, RunError> {
    if !a.is_2d() || !b.is_2d() || a.cols() != b.rows() {
        return Err(RunError::new("inner matrix dimensions must agree"));
    }
    let (m, k, n) = (a.rows(), a.cols(), b.cols());
    let mut data = vec![0.0; m * n];
    for j in 0..n {
        for l in 0..k {
            let bv = b.data()[j * k + l];
            if bv == 0.0 {
                continue;
            }
            for i in 0..m {
                data[j * m + i] += a.data()[l * m + i] * bv;
            }
        }
    }
    Ok(Matrix::from_data([m, n].into_iter().collect(), data))
}

fn matrix_mult_c128(
    a: &Matrix<Complex64>,
    b: &Matrix<Complex64>,
) -> Result<Matrix<Complex64>, RunError> {
    if !a.is_2d() || !b.is_2d() || a.cols() != b.rows() {
        return Err(RunError::new("inner matrix dimensions must agree"));
    }
    let (m, k, n) = (a.rows(), a.cols(), b.cols());
    let mut data = vec![Complex64::new(0.0, 0.0); m * n];
    for j in 0..n {
        for l in 0..k {
            let bv = b.data()[j * k + l];
            for i in 0..m {
                data[j * m + i] += a.data()[l * m + i] * bv;
            }
        }
    }
    Ok(Matrix::from_data([m, n].into_iter().collect(), data))
}

/// Solves `A X = B` for square `A` by Gaussian elimination with partial
/// pivoting. Backs the `\` operator; `/` routes through transposes.
pub fn solve_linear(a: &Matrix<f64>, b: &Matrix<f64>) -> Result<Matrix<f64>, RunError> {
    if !a.is_2d() || a.rows() != a.cols() {
        return Err(RunError::new("left division requires a square matrix"));
    }
    if !b.is_2d() || b.rows() != a.rows() {
        return Err(RunError::new("matrix dimensions must agree"));
    }
    let n = a.rows();
    let rhs_cols = b.cols();
    let mut aug: Vec<f64> = a.data().to_vec();
    let mut out: Vec<f64> = b.data().to_vec();

    for col in 0..n {
        // Partial pivot.
        let mut pivot_row = col;
        let mut pivot_val = aug[col * n + col].abs();
        for row in (col + 1)..n {
            let v = aug[col * n + row].abs();
            if v > pivot_val {
                pivot_val = v;
                pivot_row = row;
            }
        }
        if pivot_val == 0.0 {
            return Err(RunError::new("matrix is singular in left division"));
        }
        if pivot_row != col {
            for j in 0..n {
                aug.swap(j * n + col, j * n + pivot_row);
            }
            for j in 0..rhs_cols {
                out.swap(j * n + col, j * n + pivot_row);
            }
        }
        // Eliminate below.
        let diag = aug[col * n + col];
        for row in (col + 1)..n {
            let factor = aug[col * n + row] / diag;
            if factor == 0.0 {
                continue;
            }
            for j in col..n {
                aug[j * n + row] -= factor * aug[j * n + col];
            }
            for j in 0..rhs_cols {
                out[j * n + row] -= factor * out[j * n + col];
            }
        }
    }
    // Back substitution.
    for col in (0..n).rev() {
        let diag = aug[col * n + col];
        for j in 0..rhs_cols {
            let mut v = out[j * n + col];
            for k in (col + 1)..n {
                v -= aug[k * n + col] * out[j * n + k];
            }
            out[j * n + col] = v / diag;
        }
    }
    Ok(Matrix::from_data([n, rhs_cols].into_iter().collect(), out))
}

// ---------------------------------------------------------------------------
// Generic path
// ---------------------------------------------------------------------------

fn generic_bin_op(op: BinOp, a: &DataObject, b: &DataObject) -> Result<DataObject, RunError> {
    match op {
        BinOp::Add => arith(a, b, |x, y| x + y, |x, y| x + y),
        BinOp::Sub => arith(a, b, |x, y| x - y, |x, y| x - y),
        BinOp::ElemMult => arith(a, b, |x, y| x * y, |x, y| x * y),
        BinOp::ElemDiv => arith(a, b, |x, y| x / y, |x, y| x / y),
        BinOp::ElemLeftDiv => arith(a, b, |x, y| y / x, |x, y| y / x),
        BinOp::Mult => {
            if obj_is_scalar(a) || obj_is_scalar(b) {
                return arith(a, b, |x, y| x * y, |x, y| x * y);
            }
            if either_complex(a, b) {
                Ok(DataObject::MatrixC128(
                    matrix_mult_c128(&a.to_c128_matrix()?, &b.to_c128_matrix()?)?.into(),
                ))
            } else {
                Ok(DataObject::MatrixF64(
                    matrix_mult(&a.to_f64_matrix()?, &b.to_f64_matrix()?)?.into(),
                ))
            }
        }
        BinOp::Div => {
            if obj_is_scalar(b) {
                return arith(a, b, |x, y| x / y, |x, y| x / y);
            }
            // A / B solves X * B = A, i.e. B' X' = A'.
            let bt = b.to_f64_matrix()?.transpose()?;
            let at = a.to_f64_matrix()?.transpose()?;
            Ok(DataObject::MatrixF64(
                solve_linear(&bt, &at)?.transpose()?.into(),
            ))
        }
        BinOp::LeftDiv => {
            if obj_is_scalar(a) {
                return arith(a, b, |x, y| y / x, |x, y| y / x);
            }
            Ok(DataObject::MatrixF64(
                solve_linear(&a.to_f64_matrix()?, &b.to_f64_matrix()?)?.into(),
            ))
        }
        BinOp::ElemPow => arith(a, b, f64::powf, |x, y| x.powc(y)),
        BinOp::Pow => {
            if obj_is_scalar(a) && obj_is_scalar(b) {
                return arith(a, b, f64::powf, |x, y| x.powc(y));
            }
            matrix_power(a, b)
        }
        BinOp::Eq => f64_compare(a, b, |x, y| x == y),
        BinOp::Ne => f64_compare(a, b, |x, y| x != y),
        BinOp::Lt => f64_compare(a, b, |x, y| x < y),
        BinOp::Le => f64_compare(a, b, |x, y| x <= y),
        BinOp::Gt => f64_compare(a, b, |x, y| x > y),
        BinOp::Ge => f64_compare(a, b, |x, y| x >= y),
        BinOp::And => f64_compare(a, b, |x, y| x != 0.0 && y != 0.0),
        BinOp::Or => f64_compare(a, b, |x, y| x != 0.0 || y != 0.0),
        // Short-circuit forms reduce their operands to scalars.
        BinOp::ScAnd => Ok(DataObject::bool_scalar(
            a.as_logical_scalar()? && b.as_logical_scalar()?,
        )),
        BinOp::ScOr => Ok(DataObject::bool_scalar(
            a.as_logical_scalar()? || b.as_logical_scalar()?,
        )),
    }
}

fn arith(
    a: &DataObject,
    b: &DataObject,
    f_real: impl Fn(f64, f64) -> f64,
    f_complex: impl Fn(Complex64, Complex64) -> Complex64,
) -> Result<DataObject, RunError> {
    if either_complex(a, b) {
        c128_elem(a, b, f_complex)
    } else {
        f64_elem(a, b, f_real)
    }
}

/// `M ^ s` for integer scalar exponents: repeated multiplication.
fn matrix_power(a: &DataObject, b: &DataObject) -> Result<DataObject, RunError> {
    if !obj_is_scalar(b) {
        return Err(RunError::new("matrix power requires a scalar exponent"));
    }
    let exp = b.scalar_f64()?;
    if exp.fract() != 0.0 || exp < 0.0 {
        return Err(RunError::new(
            "matrix power requires a non-negative integer exponent",
        ));
    }
    let base = a.to_f64_matrix()?;
    if !base.is_2d() || base.rows() != base.cols() {
        return Err(RunError::new("matrix power requires a square matrix"));
    }
    let n = base.rows();
    // Identity.
    let mut result = Matrix::filled([n, n].into_iter().collect(), 0.0);
    for i in 0..n {
        result.write_2d((i + 1) as i64, (i + 1) as i64, 1.0)?;
    }
    for _ in 0..exp as usize {
        result = matrix_mult(&result, &base)?;
    }
    Ok(DataObject::MatrixF64(result.into()))
}

// ---------------------------------------------------------------------------
// Dispatch table
// ---------------------------------------------------------------------------

// Fast handlers for the hot f64 x f64 combinations; these skip the kind
// sniffing and conversion of the generic path.

fn f64_pair<'a>(
    a: &'a DataObject,
    b: &'a DataObject,
) -> (
    std::cell::Ref<'a, Matrix<f64>>,
    std::cell::Ref<'a, Matrix<f64>>,
) {
    match (a, b) {
        (DataObject::MatrixF64(x), DataObject::MatrixF64(y)) => (x.borrow(), y.borrow()),
        _ => unreachable!("dispatch table guarantees f64 operands"),
    }
}

macro_rules! f64_fast_arith {
    ($name:ident, $op:tt) => {
        fn $name(a: &DataObject, b: &DataObject) -> Result<DataObject, RunError> {
            let (x, y) = f64_pair(a, b);
            Ok(DataObject::MatrixF64(
                broadcast_zip(&x, &y, |p, q| p $op q)?.into(),
            ))
        }
    };
}

macro_rules! f64_fast_cmp {
    ($name:ident, $op:tt) => {
        fn $name(a: &DataObject, b: &DataObject) -> Result<DataObject, RunError> {
            let (x, y) = f64_pair(a, b);
            Ok(DataObject::Logical(
                broadcast_zip(&x, &y, |p, q| p $op q)?.into(),
            ))
        }
    };
}

f64_fast_arith!(fast_add_f64, +);
f64_fast_arith!(fast_sub_f64, -);
f64_fast_arith!(fast_emult_f64, *);
f64_fast_arith!(fast_ediv_f64, /);
f64_fast_cmp!(fast_eq_f64, ==);
f64_fast_cmp!(fast_ne_f64, !=);
f64_fast_cmp!(fast_lt_f64, <);
f64_fast_cmp!(fast_le_f64, <=);
f64_fast_cmp!(fast_gt_f64, >);
f64_fast_cmp!(fast_ge_f64, >=);

fn fast_mult_f64(a: &DataObject, b: &DataObject) -> Result<DataObject, RunError> {
    let (x, y) = f64_pair(a, b);
    if x.is_scalar() || y.is_scalar() {
        return Ok(DataObject::MatrixF64(
            broadcast_zip(&x, &y, |p, q| p * q)?.into(),
        ));
    }
    Ok(DataObject::MatrixF64(matrix_mult(&x, &y)?.into()))
}

static DISPATCH: LazyLock<HashMap<(BinOp, ObjKind, ObjKind), BinHandler>> = LazyLock::new(|| {
    let mut table: HashMap<(BinOp, ObjKind, ObjKind), BinHandler> = HashMap::new();
    let f = ObjKind::MatrixF64;
    let entries: [(BinOp, BinHandler); 11] = [
        (BinOp::Add, fast_add_f64),
        (BinOp::Sub, fast_sub_f64),
        (BinOp::ElemMult, fast_emult_f64),
        (BinOp::ElemDiv, fast_ediv_f64),
        (BinOp::Mult, fast_mult_f64),
        (BinOp::Eq, fast_eq_f64),
        (BinOp::Ne, fast_ne_f64),
        (BinOp::Lt, fast_lt_f64),
        (BinOp::Le, fast_le_f64),
        (BinOp::Gt, fast_gt_f64),
        (BinOp::Ge, fast_ge_f64),
    ];
    for (op, handler) in entries {
        table.insert((op, f, f), handler);
    }
    table
});

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    fn f64_mat(dims: [usize; 2], data: Vec<f64>) -> DataObject {
        DataObject::MatrixF64(Matrix::from_data(smallvec![dims[0], dims[1]], data).into())
    }

    #[test]
    fn scalar_addition() {
        let r = apply_bin_op(
            BinOp::Add,
            &DataObject::f64_scalar(1.0),
            &DataObject::f64_scalar(2.0),
        )
        .unwrap();
        assert_eq!(r.scalar_f64().unwrap(), 3.0);
    }

    #[test]
    fn scalar_matrix_broadcast() {
        let m = f64_mat([2, 2], vec![1.0, 2.0, 3.0, 4.0]);
        let r = apply_bin_op(BinOp::ElemMult, &DataObject::f64_scalar(2.0), &m).unwrap();
        let rm = r.to_f64_matrix().unwrap();
        assert_eq!(rm.data(), &[2.0, 4.0, 6.0, 8.0]);
    }

    #[test]
    fn mismatched_dims_rejected() {
        let a = f64_mat([2, 2], vec![1.0; 4]);
        let b = f64_mat([2, 3], vec![1.0; 6]);
        let err = apply_bin_op(BinOp::Add, &a, &b).unwrap_err();
        assert!(err.message().contains("dimensions must agree"));
    }

    #[test]
    fn matrix_multiplication() {
        // [1 2; 3 4] * [5; 6] = [17; 39]
        let a = f64_mat([2, 2], vec![1.0, 3.0, 2.0, 4.0]);
        let b = f64_mat([2, 1], vec![5.0, 6.0]);
        let r = apply_bin_op(BinOp::Mult, &a, &b).unwrap();
        let rm = r.to_f64_matrix().unwrap();
        assert_eq!(rm.dims(), &[2, 1]);
        assert_eq!(rm.data(), &[17.0, 39.0]);
    }

    #[test]
    fn inner_dim_mismatch_rejected() {
        let a = f64_mat([2, 2], vec![1.0; 4]);
        let b = f64_mat([3, 1], vec![1.0; 3]);
        assert!(apply_bin_op(BinOp::Mult, &a, &b).is_err());
    }

    #[test]
    fn comparison_yields_logical() {
        let a = f64_mat([1, 3], vec![1.0, 5.0, 3.0]);
        let b = f64_mat([1, 3], vec![2.0, 2.0, 3.0]);
        let r = apply_bin_op(BinOp::Lt, &a, &b).unwrap();
        assert_eq!(r.kind(), ObjKind::LogicalArray);
        assert!(!r.as_logical_scalar().unwrap());
    }

    #[test]
    fn complex_promotes() {
        let c = DataObject::MatrixC128(Matrix::scalar(Complex64::new(0.0, 1.0)).into());
        let r = apply_bin_op(BinOp::ElemMult, &c, &c).unwrap();
        match r {
            DataObject::MatrixC128(m) => {
                assert_eq!(m.borrow().get_scalar().unwrap(), Complex64::new(-1.0, 0.0));
            }
            other => panic!("expected complex result, got {}", other.kind()),
        }
    }

    #[test]
    fn left_division_solves() {
        // [2 0; 0 4] \ [2; 8] = [1; 2]
        let a = f64_mat([2, 2], vec![2.0, 0.0, 0.0, 4.0]);
        let b = f64_mat([2, 1], vec![2.0, 8.0]);
        let r = apply_bin_op(BinOp::LeftDiv, &a, &b).unwrap();
        let rm = r.to_f64_matrix().unwrap();
        assert!((rm.data()[0] - 1.0).abs() < 1e-12);
        assert!((rm.data()[1] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn right_division_by_scalar_scales() {
        let a = f64_mat([1, 2], vec![4.0, 8.0]);
        let r = apply_bin_op(BinOp::Div, &a, &DataObject::f64_scalar(4.0)).unwrap();
        assert_eq!(r.to_f64_matrix().unwrap().data(), &[1.0, 2.0]);
    }

    #[test]
    fn singular_solve_fails() {
        let a = f64_mat([2, 2], vec![1.0, 2.0, 1.0, 2.0]);
        let b = f64_mat([2, 1], vec![1.0, 1.0]);
        let err = apply_bin_op(BinOp::LeftDiv, &a, &b).unwrap_err();
        assert!(err.message().contains("singular"));
    }

    #[test]
    fn matrix_power_repeated_mult() {
        let a = f64_mat([2, 2], vec![1.0, 1.0, 1.0, 0.0]);
        let r = apply_bin_op(BinOp::Pow, &a, &DataObject::f64_scalar(3.0)).unwrap();
        // Fibonacci matrix cubed: [[3 2],[2 1]] column-major [3 2 2 1].
        assert_eq!(r.to_f64_matrix().unwrap().data(), &[3.0, 2.0, 2.0, 1.0]);
    }

    #[test]
    fn short_circuit_forms_reduce_to_scalar() {
        let r = apply_bin_op(
            BinOp::ScAnd,
            &DataObject::f64_scalar(1.0),
            &DataObject::f64_scalar(0.0),
        )
        .unwrap();
        assert!(!r.as_logical_scalar().unwrap());
    }

    #[test]
    fn unary_minus_and_not() {
        let m = f64_mat([1, 2], vec![1.0, -2.0]);
        let neg = apply_un_op(UnOp::Minus, &m).unwrap();
        assert_eq!(neg.to_f64_matrix().unwrap().data(), &[-1.0, 2.0]);
        let not = apply_un_op(UnOp::Not, &f64_mat([1, 2], vec![0.0, 3.0])).unwrap();
        match not {
            DataObject::Logical(l) => assert_eq!(l.borrow().data(), &[true, false]),
            other => panic!("expected logical, got {}", other.kind()),
        }
    }

    #[test]
    fn transpose_ops() {
        let m = f64_mat([1, 3], vec![1.0, 2.0, 3.0]);
        let t = apply_un_op(UnOp::Transpose, &m).unwrap();
        assert_eq!(t.to_f64_matrix().unwrap().dims(), &[3, 1]);
        let c = DataObject::MatrixC128(Matrix::scalar(Complex64::new(1.0, 2.0)).into());
        let ct = apply_un_op(UnOp::CtransPose, &c).unwrap();
        match ct {
            DataObject::MatrixC128(m) => {
                assert_eq!(m.borrow().get_scalar().unwrap(), Complex64::new(1.0, -2.0));
            }
            other => panic!("expected complex, got {}", other.kind()),
        }
    }
}
