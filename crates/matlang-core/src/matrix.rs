//! Column-major matrix storage.
//!
//! [`Matrix`] is the element container behind every matrix-kind data
//! object (numeric, logical, char, cell). Dimensions follow the source
//! language's conventions: every matrix has at least two dimensions, a
//! scalar is `1 x 1`, indexing is 1-based, and linear indexing walks
//! columns first.
//!
//! The heavier numeric routines (element-wise operators, multiplication)
//! live in [`crate::ops`]; this module is only the container.

use smallvec::{smallvec, SmallVec};

use crate::error::RunError;

/// Dimension vector; two inline slots cover the common 2-D case.
pub type DimVec = SmallVec<[usize; 2]>;

/// A dense column-major matrix of `T`.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix<T> {
    dims: DimVec,
    data: Vec<T>,
}

impl<T: Clone> Matrix<T> {
    /// The empty `0 x 0` matrix.
    pub fn empty() -> Matrix<T> {
        Matrix {
            dims: smallvec![0, 0],
            data: Vec::new(),
        }
    }

    /// A `1 x 1` matrix holding `value`.
    pub fn scalar(value: T) -> Matrix<T> {
        Matrix {
            dims: smallvec![1, 1],
            data: vec![value],
        }
    }

    /// A matrix of the given dimensions filled with `fill`.
    pub fn filled(dims: DimVec, fill: T) -> Matrix<T> {
        let count = dims.iter().product();
        Matrix {
            dims: normalize_dims(dims),
            data: vec![fill; count],
        }
    }

    /// Builds a matrix from column-major data and explicit dimensions.
    ///
    /// # Panics
    ///
    /// Panics if `data.len()` does not match the dimension product; the
    /// callers construct both together.
    pub fn from_data(dims: DimVec, data: Vec<T>) -> Matrix<T> {
        let dims = normalize_dims(dims);
        assert_eq!(
            dims.iter().product::<usize>(),
            data.len(),
            "matrix data length does not match dimensions"
        );
        Matrix { dims, data }
    }

    /// A row vector (`1 x n`).
    pub fn row(data: Vec<T>) -> Matrix<T> {
        Matrix {
            dims: smallvec![1, data.len()],
            data,
        }
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn dim_count(&self) -> usize {
        self.dims.len()
    }

    pub fn rows(&self) -> usize {
        self.dims[0]
    }

    pub fn cols(&self) -> usize {
        self.dims[1]
    }

    pub fn elem_count(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_scalar(&self) -> bool {
        self.data.len() == 1
    }

    pub fn is_2d(&self) -> bool {
        self.dims.len() == 2
    }

    /// Returns `true` for `1 x n` or `n x 1` shapes.
    pub fn is_vector(&self) -> bool {
        self.is_2d() && (self.dims[0] == 1 || self.dims[1] == 1)
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// The scalar value, when this is `1 x 1`.
    pub fn get_scalar(&self) -> Result<T, RunError> {
        if self.is_scalar() {
            Ok(self.data[0].clone())
        } else {
            Err(RunError::new("matrix is not a scalar value"))
        }
    }

    /// 1-based linear read.
    pub fn read_1d(&self, index: i64) -> Result<T, RunError> {
        if index < 1 {
            return Err(RunError::new("negative index in matrix read"));
        }
        let i = index as usize;
        if i > self.data.len() {
            return Err(RunError::new("index out of bounds in matrix read"));
        }
        Ok(self.data[i - 1].clone())
    }

    /// 1-based two-dimensional read.
    pub fn read_2d(&self, row: i64, col: i64) -> Result<T, RunError> {
        if row < 1 || col < 1 {
            return Err(RunError::new("negative index in matrix read"));
        }
        let (r, c) = (row as usize, col as usize);
        if !self.is_2d() || r > self.dims[0] || c > self.dims[1] {
            return Err(RunError::new("index out of bounds in matrix read"));
        }
        Ok(self.data[(c - 1) * self.dims[0] + (r - 1)].clone())
    }

    /// N-dimensional read with a full 1-based index vector.
    pub fn read_nd(&self, idxs: &[i64]) -> Result<T, RunError> {
        let offset = self.linear_offset(idxs, "read")?;
        Ok(self.data[offset].clone())
    }

    /// 1-based linear write; the index must already be in bounds
    /// (writes past the end go through [`Matrix::expand`] first).
    /// Negative indices report the read-path message on every access
    /// kind.
    pub fn write_1d(&mut self, index: i64, value: T) -> Result<(), RunError> {
        if index < 1 {
            return Err(RunError::new("negative index in matrix read"));
        }
        let i = index as usize;
        if i > self.data.len() {
            return Err(RunError::new("index out of bounds in matrix write"));
        }
        self.data[i - 1] = value;
        Ok(())
    }

    /// 1-based two-dimensional write.
    pub fn write_2d(&mut self, row: i64, col: i64, value: T) -> Result<(), RunError> {
        if row < 1 || col < 1 {
            return Err(RunError::new("negative index in matrix read"));
        }
        let (r, c) = (row as usize, col as usize);
        if !self.is_2d() || r > self.dims[0] || c > self.dims[1] {
            return Err(RunError::new("index out of bounds in matrix write"));
        }
        self.data[(c - 1) * self.dims[0] + (r - 1)] = value;
        Ok(())
    }

    /// N-dimensional write with a full 1-based index vector.
    pub fn write_nd(&mut self, idxs: &[i64], value: T) -> Result<(), RunError> {
        let offset = self.linear_offset(idxs, "write")?;
        self.data[offset] = value;
        Ok(())
    }

    /// Computes the column-major linear offset (0-based) of a 1-based
    /// index vector. A single index addresses the matrix linearly.
    pub fn linear_offset(&self, idxs: &[i64], access: &str) -> Result<usize, RunError> {
        // Negative indices always report as read errors, whatever the
        // access kind; only the out-of-bounds message is parameterized.
        if idxs.iter().any(|&i| i < 1) {
            return Err(RunError::new("negative index in matrix read"));
        }
        if idxs.len() == 1 {
            let i = idxs[0] as usize;
            if i > self.data.len() {
                return Err(RunError::new(format!(
                    "index out of bounds in matrix {}",
                    access
                )));
            }
            return Ok(i - 1);
        }
        if idxs.len() > self.dims.len() {
            return Err(RunError::new(format!(
                "too many indices in matrix {}",
                access
            )));
        }
        let mut offset = 0;
        let mut stride = 1;
        for (k, &idx) in idxs.iter().enumerate() {
            let i = idx as usize;
            // The final index addresses the product of remaining dims.
            let extent = if k == idxs.len() - 1 {
                self.dims[k..].iter().product()
            } else {
                self.dims[k]
            };
            if i > extent {
                return Err(RunError::new(format!(
                    "index out of bounds in matrix {}",
                    access
                )));
            }
            offset += (i - 1) * stride;
            stride *= self.dims[k];
        }
        Ok(offset)
    }

    /// Grows the matrix so the 1-based index vector `idxs` is in bounds,
    /// filling new elements with `fill`. Existing elements keep their
    /// positions. A single linear index grows a vector along its free
    /// dimension (or a `1 x n` row when currently empty).
    pub fn expand(&mut self, idxs: &[i64], fill: T) -> Result<(), RunError> {
        if idxs.iter().any(|&i| i < 1) {
            return Err(RunError::new("negative index in matrix read"));
        }
        let mut new_dims: DimVec = self.dims.clone();
        if idxs.len() == 1 {
            let want = idxs[0] as usize;
            if want <= self.data.len() {
                return Ok(());
            }
            if !self.is_vector() && !self.is_empty() {
                return Err(RunError::new(
                    "linear index past the end of a non-vector matrix",
                ));
            }
            if self.is_empty() || self.dims[0] == 1 {
                new_dims = smallvec![1, want];
            } else {
                new_dims = smallvec![want, 1];
            }
        } else {
            while new_dims.len() < idxs.len() {
                new_dims.push(1);
            }
            for (k, &idx) in idxs.iter().enumerate() {
                new_dims[k] = new_dims[k].max(idx as usize);
            }
        }
        if new_dims == self.dims {
            return Ok(());
        }
        let mut grown = Matrix::filled(new_dims, fill);
        // Re-place existing elements at their coordinates in the new shape.
        for linear in 0..self.data.len() {
            let coords = self.coords_of(linear);
            let mut offset = 0;
            let mut stride = 1;
            for (k, &dim) in grown.dims.iter().enumerate() {
                offset += coords.get(k).copied().unwrap_or(0) * stride;
                stride *= dim;
            }
            grown.data[offset] = self.data[linear].clone();
        }
        *self = grown;
        Ok(())
    }

    /// 0-based coordinates of a 0-based linear offset.
    fn coords_of(&self, linear: usize) -> DimVec {
        let mut coords: DimVec = smallvec![];
        let mut rest = linear;
        for &dim in &self.dims {
            if dim == 0 {
                coords.push(0);
                continue;
            }
            coords.push(rest % dim);
            rest /= dim;
        }
        coords
    }

    /// 2-D transpose.
    pub fn transpose(&self) -> Result<Matrix<T>, RunError> {
        if !self.is_2d() {
            return Err(RunError::new("transpose requires a 2-D matrix"));
        }
        let (r, c) = (self.dims[0], self.dims[1]);
        let mut data = Vec::with_capacity(self.data.len());
        for i in 0..r {
            for j in 0..c {
                data.push(self.data[j * r + i].clone());
            }
        }
        Ok(Matrix {
            dims: smallvec![c, r],
            data,
        })
    }

    /// Applies `f` to every element, producing a same-shape matrix.
    pub fn map<U: Clone>(&self, f: impl Fn(&T) -> U) -> Matrix<U> {
        Matrix {
            dims: self.dims.clone(),
            data: self.data.iter().map(f).collect(),
        }
    }

    /// Horizontal concatenation: equal row counts, columns appended.
    pub fn horzcat(blocks: &[Matrix<T>]) -> Result<Matrix<T>, RunError> {
        let non_empty: Vec<&Matrix<T>> = blocks.iter().filter(|m| !m.is_empty()).collect();
        if non_empty.is_empty() {
            return Ok(Matrix::empty());
        }
        let rows = non_empty[0].rows();
        if non_empty.iter().any(|m| !m.is_2d() || m.rows() != rows) {
            return Err(RunError::new(
                "inconsistent row counts in horizontal concatenation",
            ));
        }
        let cols = non_empty.iter().map(|m| m.cols()).sum();
        let mut data = Vec::with_capacity(rows * cols);
        for m in &non_empty {
            data.extend(m.data.iter().cloned());
        }
        Ok(Matrix {
            dims: smallvec![rows, cols],
            data,
        })
    }

    /// Vertical concatenation: equal column counts, rows appended.
    pub fn vertcat(blocks: &[Matrix<T>]) -> Result<Matrix<T>, RunError> {
        let non_empty: Vec<&Matrix<T>> = blocks.iter().filter(|m| !m.is_empty()).collect();
        if non_empty.is_empty() {
            return Ok(Matrix::empty());
        }
        let cols = non_empty[0].cols();
        if non_empty.iter().any(|m| !m.is_2d() || m.cols() != cols) {
            return Err(RunError::new(
                "inconsistent column counts in vertical concatenation",
            ));
        }
        let rows: usize = non_empty.iter().map(|m| m.rows()).sum();
        let mut data = Vec::with_capacity(rows * cols);
        for c in 0..cols {
            for m in &non_empty {
                let r = m.rows();
                data.extend(m.data[c * r..(c + 1) * r].iter().cloned());
            }
        }
        Ok(Matrix {
            dims: smallvec![rows, cols],
            data,
        })
    }
}

/// Trailing singleton dimensions beyond the second are dropped so shapes
/// compare canonically; a dimension vector is always at least 2-D.
fn normalize_dims(mut dims: DimVec) -> DimVec {
    while dims.len() < 2 {
        dims.push(if dims.is_empty() { 0 } else { 1 });
    }
    while dims.len() > 2 && dims.last() == Some(&1) {
        dims.pop();
    }
    dims
}

impl<T: Clone + std::fmt::Display> Matrix<T> {
    /// Surface-style printout, one line per row.
    pub fn display_contents(&self) -> String {
        if self.is_empty() {
            return "  []".to_string();
        }
        if !self.is_2d() {
            return format!("  <{}-dimensional matrix>", self.dims.len());
        }
        let mut out = String::new();
        for i in 0..self.rows() {
            out.push_str("  ");
            for j in 0..self.cols() {
                if j > 0 {
                    out.push(' ');
                }
                out.push_str(&self.data[j * self.rows() + i].to_string());
            }
            out.push('\n');
        }
        out.pop();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn mat_2x2() -> Matrix<f64> {
        // [10 20; 30 40] column-major
        Matrix::from_data(smallvec![2, 2], vec![10.0, 30.0, 20.0, 40.0])
    }

    #[test]
    fn scalar_shape() {
        let m = Matrix::scalar(7.0);
        assert!(m.is_scalar());
        assert_eq!(m.dims(), &[1, 1]);
        assert_eq!(m.get_scalar().unwrap(), 7.0);
    }

    #[test]
    fn read_2d_column_major() {
        let m = mat_2x2();
        assert_eq!(m.read_2d(2, 1).unwrap(), 30.0);
        assert_eq!(m.read_2d(1, 2).unwrap(), 20.0);
    }

    #[test]
    fn linear_read_walks_columns() {
        let m = mat_2x2();
        assert_eq!(m.read_1d(2).unwrap(), 30.0);
        assert_eq!(m.read_1d(3).unwrap(), 20.0);
    }

    #[test]
    fn negative_index_is_reported() {
        let m = mat_2x2();
        let err = m.read_1d(-1).unwrap_err();
        assert!(err.message().contains("negative index"));
    }

    #[test]
    fn negative_write_reports_read_message() {
        let mut m = mat_2x2();
        let err = m.write_1d(-1, 0.0).unwrap_err();
        assert_eq!(err.message(), "negative index in matrix read");
        let err = m.expand(&[-2], 0.0).unwrap_err();
        assert_eq!(err.message(), "negative index in matrix read");
    }

    #[test]
    fn out_of_bounds_read_is_reported() {
        let m = mat_2x2();
        let err = m.read_2d(3, 1).unwrap_err();
        assert!(err.message().contains("index out of bounds in matrix read"));
    }

    #[test]
    fn expand_grows_vector_linearly() {
        let mut m = Matrix::row(vec![1.0, 2.0, 3.0]);
        m.expand(&[5], 0.0).unwrap();
        assert_eq!(m.dims(), &[1, 5]);
        assert_eq!(m.read_1d(3).unwrap(), 3.0);
        assert_eq!(m.read_1d(5).unwrap(), 0.0);
    }

    #[test]
    fn expand_preserves_element_positions() {
        let mut m = mat_2x2();
        m.expand(&[3, 3], 0.0).unwrap();
        assert_eq!(m.dims(), &[3, 3]);
        assert_eq!(m.read_2d(2, 2).unwrap(), 40.0);
        assert_eq!(m.read_2d(3, 3).unwrap(), 0.0);
    }

    #[test]
    fn transpose_swaps_dims() {
        let m = Matrix::from_data(smallvec![1, 3], vec![1.0, 2.0, 3.0]);
        let t = m.transpose().unwrap();
        assert_eq!(t.dims(), &[3, 1]);
        assert_eq!(t.read_2d(2, 1).unwrap(), 2.0);
    }

    #[test]
    fn horzcat_appends_columns() {
        let a = mat_2x2();
        let b = Matrix::from_data(smallvec![2, 1], vec![50.0, 60.0]);
        let c = Matrix::horzcat(&[a, b]).unwrap();
        assert_eq!(c.dims(), &[2, 3]);
        assert_eq!(c.read_2d(1, 3).unwrap(), 50.0);
    }

    #[test]
    fn vertcat_appends_rows() {
        let a = mat_2x2();
        let b = Matrix::from_data(smallvec![1, 2], vec![50.0, 60.0]);
        let c = Matrix::vertcat(&[a, b]).unwrap();
        assert_eq!(c.dims(), &[3, 2]);
        assert_eq!(c.read_2d(3, 1).unwrap(), 50.0);
        assert_eq!(c.read_2d(3, 2).unwrap(), 60.0);
    }

    #[test]
    fn last_index_covers_remaining_dims() {
        // 2x3 matrix addressed as m(2, 5) -> column-major offset of (2,5)
        // within the flattened trailing extent.
        let m = Matrix::from_data(smallvec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(m.read_nd(&[2, 3]).unwrap(), 6.0);
        assert!(m.read_nd(&[2, 4]).is_err());
    }
}
