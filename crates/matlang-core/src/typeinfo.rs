//! Abstract type descriptors for the type inference.
//!
//! A [`TypeInfo`] describes one possible type of a value at a program
//! point: object kind plus shape and integrality hints. A [`TypeSet`] is
//! a disjunction of descriptors, and a [`TypeSetString`] is one set per
//! return-value slot of an expression.
//!
//! Sets use `BTreeSet` so their ordering is canonical; the analysis
//! manager hashes whole `TypeSetString`s as memo keys and depends on
//! that. Equality and ordering compare function pointers by address.
//!
//! The `*_mapping` functions at the bottom are the library-function
//! return-type rules: each takes the argument type-set-string and
//! produces the return type-set-string.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

use smallvec::{smallvec, SmallVec};

use crate::function::FuncRef;
use crate::matrix::DimVec;
use crate::object::{DataObject, ObjKind, ObjRef};

/// Maximum descriptors a set may hold before it is widened to Unknown.
pub const TYPE_SET_WIDEN_LIMIT: usize = 16;

/// Abstract type of one value at one program point.
#[derive(Debug, Clone)]
pub struct TypeInfo {
    /// Object kind; `ObjKind::Unknown` when nothing is known.
    pub kind: ObjKind,
    /// The value has exactly two dimensions.
    pub is_2d: bool,
    /// The value is `1 x 1`.
    pub is_scalar: bool,
    /// The value is integer-valued (still stored as f64 by default).
    pub is_integer: bool,
    /// `mat_size` is meaningful; otherwise it is empty and unconstrained.
    pub size_known: bool,
    pub mat_size: DimVec,
    /// Known target for handle types.
    pub func: Option<FuncRef>,
    /// Possible element types for cell arrays.
    pub cell_types: BTreeSet<TypeInfo>,
}

impl TypeInfo {
    /// The bottom-information descriptor.
    pub fn unknown() -> TypeInfo {
        TypeInfo {
            kind: ObjKind::Unknown,
            is_2d: false,
            is_scalar: false,
            is_integer: false,
            size_known: false,
            mat_size: smallvec![],
            func: None,
            cell_types: BTreeSet::new(),
        }
    }

    /// A known-scalar descriptor of the given kind.
    pub fn scalar(kind: ObjKind, is_integer: bool) -> TypeInfo {
        TypeInfo {
            kind,
            is_2d: true,
            is_scalar: true,
            is_integer,
            size_known: true,
            mat_size: smallvec![1, 1],
            func: None,
            cell_types: BTreeSet::new(),
        }
    }

    /// A matrix descriptor with nothing known about the shape.
    pub fn matrix(kind: ObjKind) -> TypeInfo {
        TypeInfo {
            kind,
            is_2d: true,
            is_scalar: false,
            is_integer: false,
            size_known: false,
            mat_size: smallvec![],
            func: None,
            cell_types: BTreeSet::new(),
        }
    }

    /// A matrix descriptor with a known shape.
    pub fn sized_matrix(kind: ObjKind, dims: DimVec, is_integer: bool) -> TypeInfo {
        let is_scalar = dims.iter().product::<usize>() == 1;
        TypeInfo {
            kind,
            is_2d: dims.len() == 2,
            is_scalar,
            is_integer,
            size_known: true,
            mat_size: dims,
            func: None,
            cell_types: BTreeSet::new(),
        }
    }

    /// Builds the descriptor of a runtime object; used for argument types
    /// at call sites and for validating inference results.
    pub fn of_object(obj: &DataObject, store_dims: bool) -> TypeInfo {
        fn mat_info<T: Clone>(
            kind: ObjKind,
            m: &crate::matrix::Matrix<T>,
            store_dims: bool,
            is_integer: bool,
        ) -> TypeInfo {
            TypeInfo {
                kind,
                is_2d: m.is_2d(),
                is_scalar: m.is_scalar(),
                is_integer,
                size_known: store_dims,
                mat_size: if store_dims {
                    SmallVec::from_slice(m.dims())
                } else {
                    smallvec![]
                },
                func: None,
                cell_types: BTreeSet::new(),
            }
        }
        match obj {
            DataObject::MatrixI32(m) => mat_info(ObjKind::MatrixI32, &m.borrow(), store_dims, true),
            DataObject::MatrixF32(m) => {
                mat_info(ObjKind::MatrixF32, &m.borrow(), store_dims, false)
            }
            DataObject::MatrixF64(m) => {
                let m = m.borrow();
                let is_integer = m.data().iter().all(|v| v.fract() == 0.0);
                mat_info(ObjKind::MatrixF64, &m, store_dims, is_integer)
            }
            DataObject::MatrixC128(m) => {
                mat_info(ObjKind::MatrixC128, &m.borrow(), store_dims, false)
            }
            DataObject::Logical(m) => mat_info(ObjKind::LogicalArray, &m.borrow(), store_dims, true),
            DataObject::Chars(m) => mat_info(ObjKind::CharArray, &m.borrow(), store_dims, true),
            DataObject::Cells(m) => {
                let m = m.borrow();
                let mut cell_types = BTreeSet::new();
                for &elem in m.data() {
                    cell_types.insert(TypeInfo::of_object(elem, store_dims));
                }
                TypeInfo {
                    kind: ObjKind::CellArray,
                    is_2d: m.is_2d(),
                    is_scalar: m.is_scalar(),
                    is_integer: false,
                    size_known: store_dims,
                    mat_size: if store_dims {
                        SmallVec::from_slice(m.dims())
                    } else {
                        smallvec![]
                    },
                    func: None,
                    cell_types,
                }
            }
            DataObject::Range(r) => TypeInfo {
                kind: ObjKind::MatrixF64,
                is_2d: true,
                is_scalar: r.count() == 1,
                is_integer: r.start.fract() == 0.0 && r.step.fract() == 0.0,
                size_known: store_dims,
                mat_size: if store_dims {
                    smallvec![1, r.count()]
                } else {
                    smallvec![]
                },
                func: None,
                cell_types: BTreeSet::new(),
            },
            DataObject::Func(f) => TypeInfo {
                kind: ObjKind::Function,
                func: Some(*f),
                ..TypeInfo::unknown()
            },
            DataObject::Handle { func, .. } => TypeInfo {
                kind: ObjKind::FnHandle,
                func: Some(*func),
                ..TypeInfo::unknown()
            },
            DataObject::Struct(_) => TypeInfo {
                kind: ObjKind::StructInst,
                ..TypeInfo::unknown()
            },
            DataObject::Class { .. } => TypeInfo {
                kind: ObjKind::ClassInst,
                ..TypeInfo::unknown()
            },
            DataObject::Args(_) => TypeInfo {
                kind: ObjKind::Array,
                ..TypeInfo::unknown()
            },
        }
    }

    /// Returns `true` when a runtime object is described by this
    /// descriptor (the soundness relation).
    pub fn admits(&self, obj: &DataObject) -> bool {
        if self.kind == ObjKind::Unknown {
            return true;
        }
        if self.kind != obj.kind() {
            return false;
        }
        let actual = TypeInfo::of_object(obj, true);
        if self.is_scalar && !actual.is_scalar {
            return false;
        }
        if self.is_2d && !actual.is_2d {
            return false;
        }
        if self.size_known && self.mat_size != actual.mat_size {
            return false;
        }
        true
    }

    fn func_addr(&self) -> usize {
        self.func.map(|f| f as *const _ as usize).unwrap_or(0)
    }
}

impl PartialEq for TypeInfo {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.is_2d == other.is_2d
            && self.is_scalar == other.is_scalar
            && self.is_integer == other.is_integer
            && self.size_known == other.size_known
            && self.mat_size == other.mat_size
            && self.func_addr() == other.func_addr()
            && self.cell_types == other.cell_types
    }
}

impl Eq for TypeInfo {}

impl PartialOrd for TypeInfo {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TypeInfo {
    fn cmp(&self, other: &Self) -> Ordering {
        (
            self.kind,
            self.is_2d,
            self.is_scalar,
            self.is_integer,
            self.size_known,
            &self.mat_size[..],
            self.func_addr(),
        )
            .cmp(&(
                other.kind,
                other.is_2d,
                other.is_scalar,
                other.is_integer,
                other.size_known,
                &other.mat_size[..],
                other.func_addr(),
            ))
            .then_with(|| self.cell_types.cmp(&other.cell_types))
    }
}

impl Hash for TypeInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.is_2d.hash(state);
        self.is_scalar.hash(state);
        self.is_integer.hash(state);
        self.size_known.hash(state);
        self.mat_size.hash(state);
        self.func_addr().hash(state);
        for t in &self.cell_types {
            t.hash(state);
        }
    }
}

impl fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind.name().replace(' ', "_"))?;
        if self.is_scalar {
            write!(f, ":scalar")?;
        } else if self.is_2d {
            write!(f, ":2d")?;
        }
        if self.is_integer {
            write!(f, ":int")?;
        }
        if self.size_known {
            write!(f, ":size[")?;
            for (i, d) in self.mat_size.iter().enumerate() {
                if i > 0 {
                    write!(f, "x")?;
                }
                write!(f, "{}", d)?;
            }
            write!(f, "]")?;
        }
        Ok(())
    }
}

/// A disjunction of possible types.
pub type TypeSet = BTreeSet<TypeInfo>;

/// One type set per return-value slot.
pub type TypeSetString = Vec<TypeSet>;

/// Library type-mapping function pointer.
pub type TypeMapFn = fn(&TypeSetString) -> TypeSetString;

/// A one-descriptor set.
pub fn type_set_make(info: TypeInfo) -> TypeSet {
    let mut set = TypeSet::new();
    set.insert(info);
    set
}

/// Union of two sets.
pub fn type_set_union(a: &TypeSet, b: &TypeSet) -> TypeSet {
    a.union(b).cloned().collect()
}

/// Reduces a set: descriptors of the same kind merge into one descriptor
/// keeping only the properties they agree on; a set grown past
/// [`TYPE_SET_WIDEN_LIMIT`] widens to the single Unknown descriptor.
pub fn type_set_reduce(set: &TypeSet) -> TypeSet {
    if set.len() > TYPE_SET_WIDEN_LIMIT {
        return type_set_make(TypeInfo::unknown());
    }
    let mut by_kind: Vec<(ObjKind, TypeInfo)> = Vec::new();
    for info in set {
        match by_kind.iter_mut().find(|(k, _)| *k == info.kind) {
            None => by_kind.push((info.kind, info.clone())),
            Some((_, merged)) => {
                merged.is_2d &= info.is_2d;
                merged.is_scalar &= info.is_scalar;
                merged.is_integer &= info.is_integer;
                if merged.size_known && (!info.size_known || merged.mat_size != info.mat_size) {
                    merged.size_known = false;
                    merged.mat_size = smallvec![];
                }
                if merged.func_addr() != info.func_addr() {
                    merged.func = None;
                }
                merged.cell_types = merged
                    .cell_types
                    .union(&info.cell_types)
                    .cloned()
                    .collect();
            }
        }
    }
    by_kind.into_iter().map(|(_, info)| info).collect()
}

/// The single widest descriptor covering every member of the set: the
/// JIT's storage-mode selection input. Differing kinds widen to Unknown.
pub fn type_set_widest(set: &TypeSet) -> TypeInfo {
    let mut iter = set.iter();
    let Some(first) = iter.next() else {
        return TypeInfo::unknown();
    };
    let mut widest = first.clone();
    for info in iter {
        if info.kind != widest.kind {
            return TypeInfo::unknown();
        }
        widest.is_2d &= info.is_2d;
        widest.is_scalar &= info.is_scalar;
        widest.is_integer &= info.is_integer;
        if widest.size_known && (!info.size_known || widest.mat_size != info.mat_size) {
            widest.size_known = false;
            widest.mat_size = smallvec![];
        }
        if widest.func_addr() != info.func_addr() {
            widest.func = None;
        }
    }
    widest
}

/// A one-slot type-set-string.
pub fn type_set_string_make(info: TypeInfo) -> TypeSetString {
    vec![type_set_make(info)]
}

/// Builds the argument type-set-string of a call from its runtime values.
pub fn type_set_string_of_args(args: &[ObjRef]) -> TypeSetString {
    args.iter()
        .map(|&obj| type_set_make(TypeInfo::of_object(obj, true)))
        .collect()
}

/// Canonical text form, used to name compiled versions.
pub fn type_set_string_key(tss: &TypeSetString) -> String {
    let mut out = String::new();
    for (i, set) in tss.iter().enumerate() {
        if i > 0 {
            out.push(';');
        }
        for (j, info) in set.iter().enumerate() {
            if j > 0 {
                out.push('|');
            }
            out.push_str(&info.to_string());
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Library type-mapping functions
// ---------------------------------------------------------------------------

/// No information about the return values.
pub fn null_type_mapping(_args: &TypeSetString) -> TypeSetString {
    TypeSetString::new()
}

/// Returns exactly the argument types.
pub fn ident_type_mapping(args: &TypeSetString) -> TypeSetString {
    args.clone()
}

/// One logical scalar out.
pub fn bool_scalar_type_mapping(_args: &TypeSetString) -> TypeSetString {
    type_set_string_make(TypeInfo::scalar(ObjKind::LogicalArray, true))
}

/// One integer-valued f64 scalar out.
pub fn int_scalar_type_mapping(_args: &TypeSetString) -> TypeSetString {
    type_set_string_make(TypeInfo::scalar(ObjKind::MatrixF64, true))
}

/// One real f64 scalar out.
pub fn real_scalar_type_mapping(_args: &TypeSetString) -> TypeSetString {
    type_set_string_make(TypeInfo::scalar(ObjKind::MatrixF64, false))
}

/// One complex scalar out.
pub fn complex_scalar_type_mapping(_args: &TypeSetString) -> TypeSetString {
    type_set_string_make(TypeInfo::scalar(ObjKind::MatrixC128, false))
}

/// One char-array out.
pub fn string_type_mapping(_args: &TypeSetString) -> TypeSetString {
    type_set_string_make(TypeInfo::matrix(ObjKind::CharArray))
}

fn elem_arith_result(a: &TypeInfo, b: &TypeInfo, int_preserve: bool) -> TypeInfo {
    let kind = if a.kind == ObjKind::MatrixC128 || b.kind == ObjKind::MatrixC128 {
        ObjKind::MatrixC128
    } else {
        ObjKind::MatrixF64
    };
    let size_known = a.size_known && b.size_known;
    TypeInfo {
        kind,
        is_2d: a.is_2d && b.is_2d,
        is_scalar: a.is_scalar && b.is_scalar,
        is_integer: a.is_integer && b.is_integer && int_preserve,
        size_known,
        mat_size: if !size_known {
            smallvec![]
        } else if a.is_scalar {
            b.mat_size.clone()
        } else {
            a.mat_size.clone()
        },
        func: None,
        cell_types: BTreeSet::new(),
    }
}

fn array_arith_mapping(args: &TypeSetString, int_preserve: bool) -> TypeSetString {
    if args.len() != 2 {
        return TypeSetString::new();
    }
    let mut out = TypeSet::new();
    for a in &args[0] {
        for b in &args[1] {
            out.insert(elem_arith_result(a, b, int_preserve));
        }
    }
    vec![type_set_reduce(&out)]
}

/// Element-wise arithmetic preserving integrality (add, sub, times).
pub fn arith_op_type_mapping(args: &TypeSetString) -> TypeSetString {
    array_arith_mapping(args, true)
}

/// Element-wise arithmetic producing floats (divisions).
pub fn arith_op_fp_type_mapping(args: &TypeSetString) -> TypeSetString {
    array_arith_mapping(args, false)
}

/// Matrix multiplication: scalar operands distribute, otherwise the shape
/// is `rows(a) x cols(b)`.
pub fn mult_op_type_mapping(args: &TypeSetString) -> TypeSetString {
    if args.len() != 2 {
        return TypeSetString::new();
    }
    let mut out = TypeSet::new();
    for a in &args[0] {
        for b in &args[1] {
            if a.is_scalar || b.is_scalar {
                out.insert(elem_arith_result(a, b, true));
                continue;
            }
            let kind = if a.kind == ObjKind::MatrixC128 || b.kind == ObjKind::MatrixC128 {
                ObjKind::MatrixC128
            } else {
                ObjKind::MatrixF64
            };
            let size_known =
                a.size_known && b.size_known && a.mat_size.len() == 2 && b.mat_size.len() == 2;
            out.insert(TypeInfo {
                kind,
                is_2d: a.is_2d && b.is_2d,
                is_scalar: false,
                is_integer: a.is_integer && b.is_integer,
                size_known,
                mat_size: if size_known {
                    smallvec![a.mat_size[0], b.mat_size[1]]
                } else {
                    smallvec![]
                },
                func: None,
                cell_types: BTreeSet::new(),
            });
        }
    }
    vec![type_set_reduce(&out)]
}

/// Division: float result, shapes as element-wise against the left
/// operand.
pub fn div_op_type_mapping(args: &TypeSetString) -> TypeSetString {
    array_arith_mapping(args, false)
}

/// Power: scalar^scalar stays scalar; anything else is unknown-shaped.
pub fn pow_op_type_mapping(args: &TypeSetString) -> TypeSetString {
    if args.len() != 2 {
        return TypeSetString::new();
    }
    let mut out = TypeSet::new();
    for a in &args[0] {
        for b in &args[1] {
            if a.is_scalar && b.is_scalar {
                out.insert(elem_arith_result(a, b, true));
            } else {
                out.insert(TypeInfo::matrix(ObjKind::MatrixF64));
            }
        }
    }
    vec![type_set_reduce(&out)]
}

/// Comparison: logical result, shaped like the non-scalar operand.
pub fn comparison_op_type_mapping(args: &TypeSetString) -> TypeSetString {
    if args.len() != 2 {
        return TypeSetString::new();
    }
    let mut out = TypeSet::new();
    for a in &args[0] {
        for b in &args[1] {
            let size_known = a.size_known && b.size_known;
            out.insert(TypeInfo {
                kind: ObjKind::LogicalArray,
                is_2d: a.is_2d && b.is_2d,
                is_scalar: a.is_scalar && b.is_scalar,
                is_integer: true,
                size_known,
                mat_size: if !size_known {
                    smallvec![]
                } else if a.is_scalar {
                    b.mat_size.clone()
                } else {
                    a.mat_size.clone()
                },
                func: None,
                cell_types: BTreeSet::new(),
            });
        }
    }
    vec![type_set_reduce(&out)]
}

/// Logical not: logical result, same shape as the operand.
pub fn not_op_type_mapping(args: &TypeSetString) -> TypeSetString {
    if args.len() != 1 {
        return TypeSetString::new();
    }
    let mut out = TypeSet::new();
    for a in &args[0] {
        out.insert(TypeInfo {
            kind: ObjKind::LogicalArray,
            is_2d: a.is_2d,
            is_scalar: a.is_scalar,
            is_integer: true,
            size_known: a.size_known,
            mat_size: a.mat_size.clone(),
            func: None,
            cell_types: BTreeSet::new(),
        });
    }
    vec![type_set_reduce(&out)]
}

/// Arithmetic negation: numeric result, same shape, integer-preserving.
pub fn minus_op_type_mapping(args: &TypeSetString) -> TypeSetString {
    if args.len() != 1 {
        return TypeSetString::new();
    }
    let mut out = TypeSet::new();
    for a in &args[0] {
        let kind = if a.kind == ObjKind::MatrixC128 {
            ObjKind::MatrixC128
        } else {
            ObjKind::MatrixF64
        };
        out.insert(TypeInfo {
            kind,
            is_2d: a.is_2d,
            is_scalar: a.is_scalar,
            is_integer: a.is_integer,
            size_known: a.size_known,
            mat_size: a.mat_size.clone(),
            func: None,
            cell_types: BTreeSet::new(),
        });
    }
    vec![type_set_reduce(&out)]
}

/// Transpose: same kind, dimensions swapped when known.
pub fn transpose_op_type_mapping(args: &TypeSetString) -> TypeSetString {
    if args.len() != 1 {
        return TypeSetString::new();
    }
    let mut out = TypeSet::new();
    for a in &args[0] {
        let size_known = a.size_known && a.mat_size.len() == 2;
        out.insert(TypeInfo {
            kind: a.kind,
            is_2d: a.is_2d,
            is_scalar: a.is_scalar,
            is_integer: a.is_integer,
            size_known,
            mat_size: if size_known {
                smallvec![a.mat_size[1], a.mat_size[0]]
            } else {
                smallvec![]
            },
            func: None,
            cell_types: a.cell_types.clone(),
        });
    }
    vec![type_set_reduce(&out)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_descriptor_shape() {
        let t = TypeInfo::scalar(ObjKind::MatrixF64, true);
        assert!(t.is_scalar && t.is_2d && t.size_known);
        assert_eq!(&t.mat_size[..], &[1, 1]);
    }

    #[test]
    fn size_vector_empty_unless_known() {
        let t = TypeInfo::matrix(ObjKind::MatrixF64);
        assert!(!t.size_known);
        assert!(t.mat_size.is_empty());
    }

    #[test]
    fn reduce_merges_same_kind() {
        let mut set = TypeSet::new();
        set.insert(TypeInfo::scalar(ObjKind::MatrixF64, true));
        set.insert(TypeInfo::matrix(ObjKind::MatrixF64));
        let reduced = type_set_reduce(&set);
        assert_eq!(reduced.len(), 1);
        let only = reduced.iter().next().unwrap();
        assert_eq!(only.kind, ObjKind::MatrixF64);
        assert!(!only.is_scalar);
        assert!(!only.size_known);
    }

    #[test]
    fn reduce_keeps_distinct_kinds() {
        let mut set = TypeSet::new();
        set.insert(TypeInfo::scalar(ObjKind::MatrixF64, true));
        set.insert(TypeInfo::scalar(ObjKind::LogicalArray, true));
        assert_eq!(type_set_reduce(&set).len(), 2);
    }

    #[test]
    fn oversized_set_widens_to_unknown() {
        let mut set = TypeSet::new();
        for n in 0..(TYPE_SET_WIDEN_LIMIT + 1) {
            set.insert(TypeInfo::sized_matrix(
                ObjKind::MatrixF64,
                smallvec![n + 1, 1],
                false,
            ));
        }
        let reduced = type_set_reduce(&set);
        assert_eq!(reduced.len(), 1);
        assert_eq!(reduced.iter().next().unwrap().kind, ObjKind::Unknown);
    }

    #[test]
    fn widest_of_mixed_kinds_is_unknown() {
        let mut set = TypeSet::new();
        set.insert(TypeInfo::scalar(ObjKind::MatrixF64, true));
        set.insert(TypeInfo::scalar(ObjKind::LogicalArray, true));
        assert_eq!(type_set_widest(&set).kind, ObjKind::Unknown);
    }

    #[test]
    fn union_is_commutative() {
        let a = type_set_make(TypeInfo::scalar(ObjKind::MatrixF64, true));
        let b = type_set_make(TypeInfo::matrix(ObjKind::LogicalArray));
        assert_eq!(type_set_union(&a, &b), type_set_union(&b, &a));
    }

    #[test]
    fn arith_mapping_mixes_complex() {
        let args = vec![
            type_set_make(TypeInfo::scalar(ObjKind::MatrixC128, false)),
            type_set_make(TypeInfo::scalar(ObjKind::MatrixF64, true)),
        ];
        let out = arith_op_type_mapping(&args);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].iter().next().unwrap().kind, ObjKind::MatrixC128);
    }

    #[test]
    fn arith_mapping_scalar_times_matrix_takes_matrix_shape() {
        let args = vec![
            type_set_make(TypeInfo::scalar(ObjKind::MatrixF64, true)),
            type_set_make(TypeInfo::sized_matrix(
                ObjKind::MatrixF64,
                smallvec![2, 3],
                true,
            )),
        ];
        let out = arith_op_type_mapping(&args);
        let info = out[0].iter().next().unwrap();
        assert!(info.size_known);
        assert_eq!(&info.mat_size[..], &[2, 3]);
        assert!(info.is_integer);
    }

    #[test]
    fn div_mapping_drops_integrality() {
        let args = vec![
            type_set_make(TypeInfo::scalar(ObjKind::MatrixF64, true)),
            type_set_make(TypeInfo::scalar(ObjKind::MatrixF64, true)),
        ];
        let out = div_op_type_mapping(&args);
        assert!(!out[0].iter().next().unwrap().is_integer);
    }

    #[test]
    fn mult_mapping_takes_outer_shape() {
        let args = vec![
            type_set_make(TypeInfo::sized_matrix(
                ObjKind::MatrixF64,
                smallvec![2, 3],
                false,
            )),
            type_set_make(TypeInfo::sized_matrix(
                ObjKind::MatrixF64,
                smallvec![3, 4],
                false,
            )),
        ];
        let out = mult_op_type_mapping(&args);
        let info = out[0].iter().next().unwrap();
        assert_eq!(&info.mat_size[..], &[2, 4]);
    }

    #[test]
    fn comparison_mapping_is_logical() {
        let args = vec![
            type_set_make(TypeInfo::scalar(ObjKind::MatrixF64, false)),
            type_set_make(TypeInfo::scalar(ObjKind::MatrixF64, false)),
        ];
        let out = comparison_op_type_mapping(&args);
        assert_eq!(out[0].iter().next().unwrap().kind, ObjKind::LogicalArray);
    }

    #[test]
    fn transpose_swaps_known_dims() {
        let args = vec![type_set_make(TypeInfo::sized_matrix(
            ObjKind::MatrixF64,
            smallvec![2, 5],
            false,
        ))];
        let out = transpose_op_type_mapping(&args);
        assert_eq!(&out[0].iter().next().unwrap().mat_size[..], &[5, 2]);
    }

    #[test]
    fn admits_accepts_matching_object() {
        let obj = DataObject::f64_scalar(4.0);
        let t = TypeInfo::scalar(ObjKind::MatrixF64, true);
        assert!(t.admits(&obj));
        assert!(TypeInfo::unknown().admits(&obj));
        let wrong = TypeInfo::scalar(ObjKind::LogicalArray, true);
        assert!(!wrong.admits(&obj));
    }

    #[test]
    fn key_string_is_canonical() {
        let mut set_a = TypeSet::new();
        set_a.insert(TypeInfo::matrix(ObjKind::MatrixF64));
        set_a.insert(TypeInfo::scalar(ObjKind::LogicalArray, true));
        let mut set_b = TypeSet::new();
        set_b.insert(TypeInfo::scalar(ObjKind::LogicalArray, true));
        set_b.insert(TypeInfo::matrix(ObjKind::MatrixF64));
        assert_eq!(
            type_set_string_key(&vec![set_a]),
            type_set_string_key(&vec![set_b])
        );
    }
}
