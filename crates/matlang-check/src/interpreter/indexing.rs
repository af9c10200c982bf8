//! Matrix and cell-array indexing.
//!
//! Translates evaluated index arguments (scalars, vectors, ranges,
//! colons, logical masks) into 1-based index vectors, then gathers reads
//! or scatters writes. A single index argument addresses the matrix
//! linearly; the last of several arguments covers the product of the
//! remaining dimensions.

use matlang_core::error::RunError;
use matlang_core::heap;
use matlang_core::matrix::Matrix;
use matlang_core::object::{DataObject, ObjKind, ObjRef};

/// One evaluated index argument.
#[derive(Debug, Clone)]
pub enum IndexArg {
    /// The bare `:`.
    Colon,
    Scalar(i64),
    Vector(Vec<i64>),
}

impl IndexArg {
    /// Builds an index argument from an evaluated object. Logical
    /// arrays select the positions of their true elements; numeric
    /// matrices and ranges supply their values.
    pub fn from_object(obj: &DataObject) -> Result<IndexArg, RunError> {
        match obj {
            DataObject::Logical(m) => {
                let m = m.borrow();
                let hits: Vec<i64> = m
                    .data()
                    .iter()
                    .enumerate()
                    .filter(|(_, &b)| b)
                    .map(|(i, _)| (i + 1) as i64)
                    .collect();
                Ok(IndexArg::Vector(hits))
            }
            _ => {
                let m = obj.to_f64_matrix()?;
                if m.is_scalar() {
                    let v = m.get_scalar()?;
                    if v.fract() != 0.0 {
                        return Err(RunError::new("index must be an integer value"));
                    }
                    Ok(IndexArg::Scalar(v as i64))
                } else {
                    let idxs: Result<Vec<i64>, RunError> = m
                        .data()
                        .iter()
                        .map(|&v| {
                            if v.fract() != 0.0 {
                                Err(RunError::new("index must be an integer value"))
                            } else {
                                Ok(v as i64)
                            }
                        })
                        .collect();
                    Ok(IndexArg::Vector(idxs?))
                }
            }
        }
    }

    fn is_scalar(&self) -> bool {
        matches!(self, IndexArg::Scalar(_))
    }
}

/// Expands index arguments into concrete per-dimension index vectors
/// against a matrix shape. `access` labels the out-of-bounds message
/// ("read" or "write"); writes skip the upper-bound validation (the
/// caller expands the matrix instead).
fn dim_indices(
    dims: &[usize],
    elem_count: usize,
    args: &[IndexArg],
    access: &str,
    check_upper: bool,
) -> Result<Vec<Vec<i64>>, RunError> {
    let n_args = args.len();
    let mut out = Vec::with_capacity(n_args);
    for (k, arg) in args.iter().enumerate() {
        let extent = if n_args == 1 {
            elem_count
        } else if k == n_args - 1 {
            dims.get(k..).map(|d| d.iter().product()).unwrap_or(0)
        } else {
            dims.get(k).copied().unwrap_or(1)
        };
        let idxs = match arg {
            IndexArg::Colon => (1..=extent as i64).collect(),
            IndexArg::Scalar(v) => vec![*v],
            IndexArg::Vector(v) => v.clone(),
        };
        for &idx in &idxs {
            // Negative indices report as read errors on both access
            // kinds; only the out-of-bounds message names the access.
            if idx < 1 {
                return Err(RunError::new("negative index in matrix read"));
            }
            if check_upper && idx as usize > extent {
                return Err(RunError::new(format!(
                    "index out of bounds in matrix {}",
                    access
                )));
            }
        }
        out.push(idxs);
    }
    Ok(out)
}

/// Gathers a read from a typed matrix.
fn gather<T: Clone>(m: &Matrix<T>, args: &[IndexArg]) -> Result<Matrix<T>, RunError> {
    let per_dim = dim_indices(m.dims(), m.elem_count(), args, "read", true)?;
    if per_dim.len() == 1 {
        let idxs = &per_dim[0];
        let mut data = Vec::with_capacity(idxs.len());
        for &i in idxs {
            data.push(m.read_1d(i)?);
        }
        // Linear indexing with a vector yields a row; a scalar index a
        // scalar.
        return Ok(Matrix::from_data(
            [1, data.len()].into_iter().collect(),
            data,
        ));
    }
    let out_dims: Vec<usize> = per_dim.iter().map(Vec::len).collect();
    let count = out_dims.iter().product();
    let mut data = Vec::with_capacity(count);
    let mut cursor = vec![0usize; per_dim.len()];
    for _ in 0..count {
        let idxs: Vec<i64> = cursor.iter().zip(&per_dim).map(|(&c, v)| v[c]).collect();
        data.push(m.read_nd(&idxs)?);
        // Advance column-major.
        for (c, v) in cursor.iter_mut().zip(&per_dim) {
            *c += 1;
            if *c < v.len() {
                break;
            }
            *c = 0;
        }
    }
    Ok(Matrix::from_data(out_dims.into_iter().collect(), data))
}

/// Reads from any matrix-kind object with the given index arguments.
pub fn read_indexed(obj: &DataObject, args: &[IndexArg]) -> Result<DataObject, RunError> {
    match obj {
        DataObject::MatrixI32(m) => Ok(DataObject::MatrixI32(gather(&m.borrow(), args)?.into())),
        DataObject::MatrixF32(m) => Ok(DataObject::MatrixF32(gather(&m.borrow(), args)?.into())),
        DataObject::MatrixF64(m) => Ok(DataObject::MatrixF64(gather(&m.borrow(), args)?.into())),
        DataObject::MatrixC128(m) => {
            Ok(DataObject::MatrixC128(gather(&m.borrow(), args)?.into()))
        }
        DataObject::Logical(m) => Ok(DataObject::Logical(gather(&m.borrow(), args)?.into())),
        DataObject::Chars(m) => Ok(DataObject::Chars(gather(&m.borrow(), args)?.into())),
        DataObject::Cells(m) => Ok(DataObject::Cells(gather(&m.borrow(), args)?.into())),
        DataObject::Range(r) => {
            // Index contexts avoid materializing the range when a single
            // scalar is wanted.
            if let [IndexArg::Scalar(i)] = args {
                let i = *i;
                if i < 1 {
                    return Err(RunError::new("negative index in matrix read"));
                }
                if i as usize > r.count() {
                    return Err(RunError::new("index out of bounds in matrix read"));
                }
                Ok(DataObject::f64_scalar(r.start + r.step * (i - 1) as f64))
            } else {
                Ok(DataObject::MatrixF64(gather(&r.expand(), args)?.into()))
            }
        }
        other => Err(RunError::new(format!(
            "cannot index a {} value",
            other.kind()
        ))),
    }
}

/// The contents of selected cells (cell-index `{}` read): one object per
/// selected cell.
pub fn read_cell_contents(
    obj: &DataObject,
    args: &[IndexArg],
) -> Result<Vec<ObjRef>, RunError> {
    match obj {
        DataObject::Cells(m) => {
            let selected = gather(&m.borrow(), args)?;
            Ok(selected.data().to_vec())
        }
        other => Err(RunError::new(format!(
            "cell-content indexing requires a cell array, got {}",
            other.kind()
        ))),
    }
}

/// Scatter-writes `values` into a typed matrix, expanding it when an
/// index lies past the current shape. A single value broadcasts over
/// every selected position; `zero` fills newly exposed elements.
fn scatter<T: Clone>(
    m: &mut Matrix<T>,
    args: &[IndexArg],
    values: &[T],
    zero: T,
) -> Result<(), RunError> {
    let per_dim = dim_indices(m.dims(), m.elem_count(), args, "write", false)?;
    let count: usize = per_dim.iter().map(Vec::len).product();
    if values.len() != count && values.len() != 1 {
        return Err(RunError::new(
            "assignment size mismatch in indexed matrix write",
        ));
    }
    let single_index = per_dim.len() == 1;
    let mut cursor = vec![0usize; per_dim.len()];
    for n in 0..count {
        let idxs: Vec<i64> = cursor.iter().zip(&per_dim).map(|(&c, v)| v[c]).collect();
        let value = if values.len() == 1 {
            values[0].clone()
        } else {
            values[n].clone()
        };
        let in_bounds = if single_index {
            (idxs[0] as usize) <= m.elem_count()
        } else {
            m.linear_offset(&idxs, "write").is_ok()
        };
        if !in_bounds {
            m.expand(&idxs, zero.clone())?;
        }
        if single_index {
            m.write_1d(idxs[0], value)?;
        } else {
            m.write_nd(&idxs, value)?;
        }
        for (c, v) in cursor.iter_mut().zip(&per_dim) {
            *c += 1;
            if *c < v.len() {
                break;
            }
            *c = 0;
        }
    }
    Ok(())
}

/// Writes into a matrix-kind object. The value is converted to the
/// target's element kind; writing a complex value into a real matrix
/// fails (the caller is expected to have promoted the target first).
pub fn write_indexed(
    target: &DataObject,
    args: &[IndexArg],
    value: &DataObject,
) -> Result<(), RunError> {
    match target {
        DataObject::MatrixF64(m) => {
            let vals = value.to_f64_matrix()?;
            scatter(&mut m.borrow_mut(), args, vals.data(), 0.0)
        }
        DataObject::MatrixF32(m) => {
            let vals = value.to_f64_matrix()?;
            let vals: Vec<f32> = vals.data().iter().map(|&v| v as f32).collect();
            scatter(&mut m.borrow_mut(), args, &vals, 0.0)
        }
        DataObject::MatrixI32(m) => {
            let vals = value.to_f64_matrix()?;
            let vals: Vec<i32> = vals.data().iter().map(|&v| v as i32).collect();
            scatter(&mut m.borrow_mut(), args, &vals, 0)
        }
        DataObject::MatrixC128(m) => {
            let vals = value.to_c128_matrix()?;
            scatter(
                &mut m.borrow_mut(),
                args,
                vals.data(),
                num_complex::Complex64::new(0.0, 0.0),
            )
        }
        DataObject::Logical(m) => {
            let vals = value.to_f64_matrix()?;
            let vals: Vec<bool> = vals.data().iter().map(|&v| v != 0.0).collect();
            scatter(&mut m.borrow_mut(), args, &vals, false)
        }
        DataObject::Chars(m) => {
            let vals = value.to_f64_matrix()?;
            let vals: Vec<char> = vals
                .data()
                .iter()
                .map(|&v| char::from_u32(v as u32).unwrap_or('\0'))
                .collect();
            scatter(&mut m.borrow_mut(), args, &vals, '\0')
        }
        DataObject::Cells(m) => {
            // Parenthesized write into a cell stores whole cells.
            let vals: Vec<ObjRef> = match value {
                DataObject::Cells(src) => src.borrow().data().to_vec(),
                _ => vec![heap::alloc(value.copy())],
            };
            let empty: ObjRef = heap::alloc(DataObject::MatrixF64(Matrix::empty().into()));
            scatter(&mut m.borrow_mut(), args, &vals, empty)
        }
        other => Err(RunError::new(format!(
            "cannot index-assign a {} value",
            other.kind()
        ))),
    }
}

/// Returns `true` when a fresh matrix created for an undefined write
/// target should be complex or cell, based on the written value.
pub fn fresh_target_kind(value: &DataObject) -> ObjKind {
    match value.kind() {
        ObjKind::MatrixC128 => ObjKind::MatrixC128,
        ObjKind::CharArray => ObjKind::CharArray,
        ObjKind::LogicalArray => ObjKind::LogicalArray,
        _ => ObjKind::MatrixF64,
    }
}

/// Whether every index argument is a scalar (the fast-path shape).
pub fn all_scalar(args: &[IndexArg]) -> bool {
    args.iter().all(IndexArg::is_scalar)
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    fn f64_mat(rows: usize, cols: usize, data: Vec<f64>) -> DataObject {
        DataObject::MatrixF64(Matrix::from_data(smallvec![rows, cols], data).into())
    }

    #[test]
    fn scalar_2d_read() {
        // [10 20; 30 40], read (2,1) -> 30.
        let m = f64_mat(2, 2, vec![10.0, 30.0, 20.0, 40.0]);
        let r = read_indexed(&m, &[IndexArg::Scalar(2), IndexArg::Scalar(1)]).unwrap();
        assert_eq!(r.scalar_f64().unwrap(), 30.0);
    }

    #[test]
    fn colon_selects_whole_dimension() {
        let m = f64_mat(2, 2, vec![10.0, 30.0, 20.0, 40.0]);
        let r = read_indexed(&m, &[IndexArg::Colon, IndexArg::Scalar(2)]).unwrap();
        let rm = r.to_f64_matrix().unwrap();
        assert_eq!(rm.dims(), &[2, 1]);
        assert_eq!(rm.data(), &[20.0, 40.0]);
    }

    #[test]
    fn vector_index_gathers() {
        let m = f64_mat(1, 4, vec![1.0, 2.0, 3.0, 4.0]);
        let r = read_indexed(&m, &[IndexArg::Vector(vec![4, 1])]).unwrap();
        assert_eq!(r.to_f64_matrix().unwrap().data(), &[4.0, 1.0]);
    }

    #[test]
    fn logical_mask_selects_true_positions() {
        let mask = DataObject::Logical(
            Matrix::from_data(smallvec![1, 3], vec![true, false, true]).into(),
        );
        let arg = IndexArg::from_object(&mask).unwrap();
        let m = f64_mat(1, 3, vec![7.0, 8.0, 9.0]);
        let r = read_indexed(&m, &[arg]).unwrap();
        assert_eq!(r.to_f64_matrix().unwrap().data(), &[7.0, 9.0]);
    }

    #[test]
    fn read_errors() {
        let m = f64_mat(1, 3, vec![1.0, 2.0, 3.0]);
        let err = read_indexed(&m, &[IndexArg::Scalar(4)]).unwrap_err();
        assert!(err.message().contains("index out of bounds in matrix read"));
        let err = read_indexed(&m, &[IndexArg::Scalar(-1)]).unwrap_err();
        assert!(err.message().contains("negative index"));
    }

    #[test]
    fn write_expands_past_end() {
        let m = f64_mat(1, 3, vec![1.0, 2.0, 3.0]);
        write_indexed(&m, &[IndexArg::Scalar(5)], &DataObject::f64_scalar(9.0)).unwrap();
        let out = m.to_f64_matrix().unwrap();
        assert_eq!(out.dims(), &[1, 5]);
        assert_eq!(out.data(), &[1.0, 2.0, 3.0, 0.0, 9.0]);
    }

    #[test]
    fn negative_write_is_rejected() {
        let m = f64_mat(1, 3, vec![1.0, 2.0, 3.0]);
        let err =
            write_indexed(&m, &[IndexArg::Scalar(-1)], &DataObject::f64_scalar(9.0)).unwrap_err();
        // A negative write reports with the read-path message.
        assert!(err.message().contains("negative index in matrix read"));
    }

    #[test]
    fn vector_write_with_matching_size() {
        let m = f64_mat(1, 4, vec![0.0; 4]);
        let value = f64_mat(1, 2, vec![5.0, 6.0]);
        write_indexed(&m, &[IndexArg::Vector(vec![2, 4])], &value).unwrap();
        assert_eq!(m.to_f64_matrix().unwrap().data(), &[0.0, 5.0, 0.0, 6.0]);
    }

    #[test]
    fn scalar_broadcast_write() {
        let m = f64_mat(1, 3, vec![0.0; 3]);
        write_indexed(&m, &[IndexArg::Colon], &DataObject::f64_scalar(7.0)).unwrap();
        assert_eq!(m.to_f64_matrix().unwrap().data(), &[7.0, 7.0, 7.0]);
    }

    #[test]
    fn range_scalar_read_avoids_expansion() {
        let r = DataObject::Range(matlang_core::object::RangeObj {
            start: 10.0,
            step: 5.0,
            stop: 100.0,
        });
        let v = read_indexed(&r, &[IndexArg::Scalar(3)]).unwrap();
        assert_eq!(v.scalar_f64().unwrap(), 20.0);
    }

    #[test]
    fn size_mismatch_rejected() {
        let m = f64_mat(1, 4, vec![0.0; 4]);
        let value = f64_mat(1, 3, vec![1.0, 2.0, 3.0]);
        let err = write_indexed(&m, &[IndexArg::Vector(vec![1, 2])], &value).unwrap_err();
        assert!(err.message().contains("size mismatch"));
    }
}
