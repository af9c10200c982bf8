//! Runtime data objects.
//!
//! [`DataObject`] is the dynamic value representation shared by the
//! interpreter and compiled code. Objects live on the never-free heap
//! ([`crate::heap`]) and are passed around as `&'static` references
//! ([`ObjRef`]); matrix payloads sit behind `RefCell` so indexed writes
//! mutate in place while the reference stays shared. Reclaiming dead
//! objects is the job of an external collector.
//!
//! [`ObjKind`] mirrors the object variants as a plain tag; the matrix
//! kinds form a contiguous range so "is this a matrix" is a range check.

use std::cell::RefCell;
use std::fmt;

use indexmap::IndexMap;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::env::EnvRef;
use crate::error::RunError;
use crate::function::FuncRef;
use crate::matrix::Matrix;
use crate::symbol::Symbol;

/// A heap-resident data object reference.
pub type ObjRef = &'static DataObject;

/// Object kind tags. `MatrixI32..=CellArray` is the matrix range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum ObjKind {
    Unknown = 0,
    MatrixI32,
    MatrixF32,
    MatrixF64,
    MatrixC128,
    LogicalArray,
    CharArray,
    CellArray,
    StructInst,
    ClassInst,
    Function,
    Range,
    Array,
    FnHandle,
}

impl ObjKind {
    /// Returns `true` for the matrix kinds (numeric, logical, char, cell).
    pub fn is_matrix(self) -> bool {
        (ObjKind::MatrixI32 as u32..=ObjKind::CellArray as u32).contains(&(self as u32))
    }

    /// Returns `true` for matrix kinds whose elements are real numbers
    /// once widened (numeric, logical, char).
    pub fn is_numeric_matrix(self) -> bool {
        matches!(
            self,
            ObjKind::MatrixI32
                | ObjKind::MatrixF32
                | ObjKind::MatrixF64
                | ObjKind::LogicalArray
                | ObjKind::CharArray
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            ObjKind::Unknown => "unknown",
            ObjKind::MatrixI32 => "i32 matrix",
            ObjKind::MatrixF32 => "f32 matrix",
            ObjKind::MatrixF64 => "f64 matrix",
            ObjKind::MatrixC128 => "c128 matrix",
            ObjKind::LogicalArray => "logical array",
            ObjKind::CharArray => "char array",
            ObjKind::CellArray => "cell array",
            ObjKind::StructInst => "struct instance",
            ObjKind::ClassInst => "class instance",
            ObjKind::Function => "function",
            ObjKind::Range => "range",
            ObjKind::Array => "array",
            ObjKind::FnHandle => "function handle",
        }
    }
}

impl fmt::Display for ObjKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A numeric range `start : step : stop`, kept unexpanded until indexing
/// or arithmetic forces materialization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeObj {
    pub start: f64,
    pub step: f64,
    pub stop: f64,
}

impl RangeObj {
    /// Number of elements the range produces.
    pub fn count(&self) -> usize {
        if self.step == 0.0 {
            return 0;
        }
        let n = ((self.stop - self.start) / self.step).floor();
        if n < 0.0 {
            0
        } else {
            n as usize + 1
        }
    }

    /// Materializes the range as a `1 x n` row vector.
    pub fn expand(&self) -> Matrix<f64> {
        let data: Vec<f64> = (0..self.count())
            .map(|i| self.start + self.step * i as f64)
            .collect();
        Matrix::row(data)
    }
}

/// The runtime value sum type.
#[derive(Debug)]
pub enum DataObject {
    MatrixI32(RefCell<Matrix<i32>>),
    MatrixF32(RefCell<Matrix<f32>>),
    MatrixF64(RefCell<Matrix<f64>>),
    MatrixC128(RefCell<Matrix<Complex64>>),
    Logical(RefCell<Matrix<bool>>),
    Chars(RefCell<Matrix<char>>),
    Cells(RefCell<Matrix<ObjRef>>),
    Struct(RefCell<IndexMap<Symbol, ObjRef>>),
    Class {
        class_name: Symbol,
        fields: RefCell<IndexMap<Symbol, ObjRef>>,
    },
    Func(FuncRef),
    Range(RangeObj),
    /// Heterogeneous object vector: argument lists and multiple-return
    /// containers.
    Args(RefCell<Vec<ObjRef>>),
    Handle {
        func: FuncRef,
        env: Option<EnvRef>,
    },
}

impl DataObject {
    pub fn kind(&self) -> ObjKind {
        match self {
            DataObject::MatrixI32(_) => ObjKind::MatrixI32,
            DataObject::MatrixF32(_) => ObjKind::MatrixF32,
            DataObject::MatrixF64(_) => ObjKind::MatrixF64,
            DataObject::MatrixC128(_) => ObjKind::MatrixC128,
            DataObject::Logical(_) => ObjKind::LogicalArray,
            DataObject::Chars(_) => ObjKind::CharArray,
            DataObject::Cells(_) => ObjKind::CellArray,
            DataObject::Struct(_) => ObjKind::StructInst,
            DataObject::Class { .. } => ObjKind::ClassInst,
            DataObject::Func(_) => ObjKind::Function,
            DataObject::Range(_) => ObjKind::Range,
            DataObject::Args(_) => ObjKind::Array,
            DataObject::Handle { .. } => ObjKind::FnHandle,
        }
    }

    pub fn is_matrix(&self) -> bool {
        self.kind().is_matrix()
    }

    /// An `1 x 1` f64 matrix (the default scalar representation; integer
    /// literals are doubles in the source language).
    pub fn f64_scalar(v: f64) -> DataObject {
        DataObject::MatrixF64(RefCell::new(Matrix::scalar(v)))
    }

    pub fn bool_scalar(v: bool) -> DataObject {
        DataObject::Logical(RefCell::new(Matrix::scalar(v)))
    }

    /// A `1 x n` char array from a string.
    pub fn string(s: &str) -> DataObject {
        DataObject::Chars(RefCell::new(Matrix::row(s.chars().collect())))
    }

    /// An empty argument/return vector.
    pub fn args(reserve: usize) -> DataObject {
        DataObject::Args(RefCell::new(Vec::with_capacity(reserve)))
    }

    /// The scalar f64 value of a numeric scalar object, widening
    /// logical/char/i32/f32 and rejecting everything else.
    pub fn scalar_f64(&self) -> Result<f64, RunError> {
        match self {
            DataObject::MatrixF64(m) => m.borrow().get_scalar(),
            DataObject::MatrixF32(m) => Ok(m.borrow().get_scalar()? as f64),
            DataObject::MatrixI32(m) => Ok(m.borrow().get_scalar()? as f64),
            DataObject::Logical(m) => Ok(if m.borrow().get_scalar()? { 1.0 } else { 0.0 }),
            DataObject::Chars(m) => Ok(m.borrow().get_scalar()? as u32 as f64),
            DataObject::Range(r) if r.count() == 1 => Ok(r.start),
            _ => Err(RunError::new(format!(
                "expected a numeric scalar, got {}",
                self.kind()
            ))),
        }
    }

    /// The universal scalar-boolean rule: a scalar is true when non-zero;
    /// a matrix is true when non-empty and all elements are true; an
    /// empty matrix is false.
    pub fn as_logical_scalar(&self) -> Result<bool, RunError> {
        match self {
            DataObject::Logical(m) => {
                let m = m.borrow();
                Ok(!m.is_empty() && m.data().iter().all(|&b| b))
            }
            DataObject::MatrixF64(m) => {
                let m = m.borrow();
                Ok(!m.is_empty() && m.data().iter().all(|&v| v != 0.0))
            }
            DataObject::MatrixF32(m) => {
                let m = m.borrow();
                Ok(!m.is_empty() && m.data().iter().all(|&v| v != 0.0))
            }
            DataObject::MatrixI32(m) => {
                let m = m.borrow();
                Ok(!m.is_empty() && m.data().iter().all(|&v| v != 0))
            }
            DataObject::Chars(m) => {
                let m = m.borrow();
                Ok(!m.is_empty() && m.data().iter().all(|&c| c != '\0'))
            }
            DataObject::MatrixC128(m) => {
                let m = m.borrow();
                Ok(!m.is_empty() && m.data().iter().all(|&v| v != Complex64::new(0.0, 0.0)))
            }
            DataObject::Range(r) => {
                let m = r.expand();
                Ok(!m.is_empty() && m.data().iter().all(|&v| v != 0.0))
            }
            _ => Err(RunError::new(format!(
                "cannot convert {} to a logical value",
                self.kind()
            ))),
        }
    }

    /// The char-array contents as a Rust string (row-major walk of a
    /// `1 x n` char array; other shapes flatten).
    pub fn string_value(&self) -> Result<String, RunError> {
        match self {
            DataObject::Chars(m) => Ok(m.borrow().data().iter().collect()),
            _ => Err(RunError::new(format!(
                "expected a char array, got {}",
                self.kind()
            ))),
        }
    }

    /// Widens any numeric-matrix kind (or range) to an f64 matrix.
    pub fn to_f64_matrix(&self) -> Result<Matrix<f64>, RunError> {
        match self {
            DataObject::MatrixF64(m) => Ok(m.borrow().clone()),
            DataObject::MatrixF32(m) => Ok(m.borrow().map(|&v| v as f64)),
            DataObject::MatrixI32(m) => Ok(m.borrow().map(|&v| v as f64)),
            DataObject::Logical(m) => Ok(m.borrow().map(|&b| if b { 1.0 } else { 0.0 })),
            DataObject::Chars(m) => Ok(m.borrow().map(|&c| c as u32 as f64)),
            DataObject::Range(r) => Ok(r.expand()),
            _ => Err(RunError::new(format!(
                "cannot convert {} to a numeric matrix",
                self.kind()
            ))),
        }
    }

    /// Widens any numeric-matrix kind to a complex matrix.
    pub fn to_c128_matrix(&self) -> Result<Matrix<Complex64>, RunError> {
        match self {
            DataObject::MatrixC128(m) => Ok(m.borrow().clone()),
            _ => Ok(self.to_f64_matrix()?.map(|&v| Complex64::new(v, 0.0))),
        }
    }

    /// Deep copy. Cell and argument arrays copy their element objects.
    pub fn copy(&self) -> DataObject {
        match self {
            DataObject::MatrixI32(m) => DataObject::MatrixI32(RefCell::new(m.borrow().clone())),
            DataObject::MatrixF32(m) => DataObject::MatrixF32(RefCell::new(m.borrow().clone())),
            DataObject::MatrixF64(m) => DataObject::MatrixF64(RefCell::new(m.borrow().clone())),
            DataObject::MatrixC128(m) => DataObject::MatrixC128(RefCell::new(m.borrow().clone())),
            DataObject::Logical(m) => DataObject::Logical(RefCell::new(m.borrow().clone())),
            DataObject::Chars(m) => DataObject::Chars(RefCell::new(m.borrow().clone())),
            DataObject::Cells(m) => {
                let copied = m.borrow().map(|&obj| crate::heap::alloc(obj.copy()));
                DataObject::Cells(RefCell::new(copied))
            }
            DataObject::Struct(fields) => {
                let copied = fields
                    .borrow()
                    .iter()
                    .map(|(&k, &v)| (k, crate::heap::alloc(v.copy())))
                    .collect();
                DataObject::Struct(RefCell::new(copied))
            }
            DataObject::Class { class_name, fields } => {
                let copied = fields
                    .borrow()
                    .iter()
                    .map(|(&k, &v)| (k, crate::heap::alloc(v.copy())))
                    .collect();
                DataObject::Class {
                    class_name: *class_name,
                    fields: RefCell::new(copied),
                }
            }
            DataObject::Func(f) => DataObject::Func(*f),
            DataObject::Range(r) => DataObject::Range(*r),
            DataObject::Args(v) => {
                let copied = v.borrow().iter().map(|o| crate::heap::alloc(o.copy())).collect();
                DataObject::Args(RefCell::new(copied))
            }
            DataObject::Handle { func, env } => DataObject::Handle {
                func: *func,
                env: *env,
            },
        }
    }

    /// Converts to the requested kind; identity conversions clone, the
    /// numeric/logical/char/range lattice widens, everything else fails.
    pub fn convert(&self, target: ObjKind) -> Result<DataObject, RunError> {
        if self.kind() == target {
            return Ok(self.copy());
        }
        match target {
            ObjKind::MatrixF64 => Ok(DataObject::MatrixF64(RefCell::new(self.to_f64_matrix()?))),
            ObjKind::MatrixC128 => Ok(DataObject::MatrixC128(RefCell::new(self.to_c128_matrix()?))),
            ObjKind::MatrixF32 => {
                Ok(DataObject::MatrixF32(RefCell::new(
                    self.to_f64_matrix()?.map(|&v| v as f32),
                )))
            }
            ObjKind::MatrixI32 => Ok(DataObject::MatrixI32(RefCell::new(
                self.to_f64_matrix()?.map(|&v| v as i32),
            ))),
            ObjKind::LogicalArray => Ok(DataObject::Logical(RefCell::new(
                self.to_f64_matrix()?.map(|&v| v != 0.0),
            ))),
            _ => Err(RunError::new(format!(
                "unsupported conversion from {} to {}",
                self.kind(),
                target
            ))),
        }
    }

    // Argument-array accessors (the `Array` kind doubles as the argument
    // list and the multiple-return container).

    pub fn array_size(&self) -> Result<usize, RunError> {
        match self {
            DataObject::Args(v) => Ok(v.borrow().len()),
            _ => Err(RunError::new("expected an argument array")),
        }
    }

    pub fn array_get(&self, index: usize) -> Result<ObjRef, RunError> {
        match self {
            DataObject::Args(v) => v
                .borrow()
                .get(index)
                .copied()
                .ok_or_else(|| RunError::new("argument array index out of range")),
            _ => Err(RunError::new("expected an argument array")),
        }
    }

    pub fn array_push(&self, obj: ObjRef) -> Result<(), RunError> {
        match self {
            DataObject::Args(v) => {
                v.borrow_mut().push(obj);
                Ok(())
            }
            _ => Err(RunError::new("expected an argument array")),
        }
    }

    pub fn array_append(&self, other: &DataObject) -> Result<(), RunError> {
        match (self, other) {
            (DataObject::Args(dst), DataObject::Args(src)) => {
                dst.borrow_mut().extend(src.borrow().iter().copied());
                Ok(())
            }
            _ => Err(RunError::new("expected an argument array")),
        }
    }
}

impl fmt::Display for DataObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataObject::MatrixI32(m) => write!(f, "{}", m.borrow().display_contents()),
            DataObject::MatrixF32(m) => write!(f, "{}", m.borrow().display_contents()),
            DataObject::MatrixF64(m) => write!(f, "{}", m.borrow().display_contents()),
            DataObject::MatrixC128(m) => write!(f, "{}", m.borrow().display_contents()),
            DataObject::Logical(m) => {
                write!(f, "{}", m.borrow().map(|&b| b as u8).display_contents())
            }
            DataObject::Chars(m) => {
                let s: String = m.borrow().data().iter().collect();
                write!(f, "{}", s)
            }
            DataObject::Cells(m) => {
                let m = m.borrow();
                write!(f, "{{{} x {} cell array}}", m.rows(), m.cols())
            }
            DataObject::Struct(fields) => {
                write!(f, "struct with {} field(s)", fields.borrow().len())
            }
            DataObject::Class { class_name, .. } => write!(f, "<{} instance>", class_name),
            DataObject::Func(func) => write!(f, "<function {}>", func.name()),
            DataObject::Range(r) => write!(f, "{}:{}:{}", r.start, r.step, r.stop),
            DataObject::Args(v) => {
                let v = v.borrow();
                writeln!(f, "array of {} value(s)", v.len())?;
                for obj in v.iter() {
                    writeln!(f, "{}", obj)?;
                }
                Ok(())
            }
            DataObject::Handle { func, .. } => write!(f, "@{}", func.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matrix_kind_range_is_contiguous() {
        assert!(ObjKind::MatrixI32.is_matrix());
        assert!(ObjKind::CellArray.is_matrix());
        assert!(!ObjKind::Function.is_matrix());
        assert!(!ObjKind::Unknown.is_matrix());
        assert!(!ObjKind::FnHandle.is_matrix());
    }

    #[test]
    fn scalar_boolean_rule() {
        assert!(DataObject::f64_scalar(2.5).as_logical_scalar().unwrap());
        assert!(!DataObject::f64_scalar(0.0).as_logical_scalar().unwrap());
        // Empty matrix is false.
        let empty = DataObject::MatrixF64(RefCell::new(Matrix::empty()));
        assert!(!empty.as_logical_scalar().unwrap());
        // All elements must hold.
        let m = DataObject::MatrixF64(RefCell::new(Matrix::row(vec![1.0, 0.0])));
        assert!(!m.as_logical_scalar().unwrap());
    }

    #[test]
    fn range_expansion() {
        let r = RangeObj {
            start: 1.0,
            step: 1.0,
            stop: 5.0,
        };
        assert_eq!(r.count(), 5);
        let m = r.expand();
        assert_eq!(m.dims(), &[1, 5]);
        assert_eq!(m.read_1d(4).unwrap(), 4.0);
    }

    #[test]
    fn range_with_negative_step() {
        let r = RangeObj {
            start: 5.0,
            step: -2.0,
            stop: 0.0,
        };
        assert_eq!(r.expand().data(), &[5.0, 3.0, 1.0]);
    }

    #[test]
    fn conversion_identity_and_widening() {
        let b = DataObject::bool_scalar(true);
        let as_f64 = b.convert(ObjKind::MatrixF64).unwrap();
        assert_eq!(as_f64.scalar_f64().unwrap(), 1.0);
        let err = b.convert(ObjKind::CellArray).unwrap_err();
        assert!(err.message().contains("unsupported conversion"));
    }

    #[test]
    fn string_round_trip() {
        let s = DataObject::string("hello");
        assert_eq!(s.string_value().unwrap(), "hello");
        assert_eq!(s.kind(), ObjKind::CharArray);
    }
}
