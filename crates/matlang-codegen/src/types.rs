//! Storage modes: the JIT's physical value representations.
//!
//! Every locally stored variable lives in one of four modes -- native
//! boolean, native integer, native float, or object pointer -- selected
//! from the widest descriptor of its inferred type set. A family of
//! explicit conversion routines covers every source-to-target
//! transition, emitting the minimal native casts and, where needed,
//! runtime calls that box scalars into matrix objects or extract
//! scalars back out.

use inkwell::builder::Builder;
use inkwell::context::Context;
use inkwell::module::Module;
use inkwell::types::BasicTypeEnum;
use inkwell::values::BasicValueEnum;
use inkwell::{AddressSpace, FloatPredicate, IntPredicate};

use matlang_core::object::ObjKind;
use matlang_core::typeinfo::{type_set_widest, TypeSet};

use crate::error::CompError;
use crate::runtime;

/// Physical representation of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StorageMode {
    /// Native boolean (i1).
    I1,
    /// Native integer (i64).
    I64,
    /// Native float (f64).
    F64,
    /// Heap object pointer.
    ObjPtr,
}

impl StorageMode {
    /// Selects the mode for a variable from its inferred type set.
    pub fn for_type_set(set: &TypeSet) -> StorageMode {
        let widest = type_set_widest(set);
        if !widest.is_scalar {
            return StorageMode::ObjPtr;
        }
        match widest.kind {
            ObjKind::LogicalArray => StorageMode::I1,
            ObjKind::MatrixF64 | ObjKind::MatrixI32 | ObjKind::CharArray
                if widest.is_integer =>
            {
                StorageMode::I64
            }
            ObjKind::MatrixF64 | ObjKind::MatrixF32 => StorageMode::F64,
            _ => StorageMode::ObjPtr,
        }
    }

    /// Widens two modes to a common one
    /// (object pointer > f64 > i64 > i1).
    pub fn widen(a: StorageMode, b: StorageMode) -> StorageMode {
        a.max(b)
    }

    /// The LLVM type of this mode.
    pub fn llvm_type<'ctx>(self, context: &'ctx Context) -> BasicTypeEnum<'ctx> {
        match self {
            StorageMode::I1 => context.bool_type().into(),
            StorageMode::I64 => context.i64_type().into(),
            StorageMode::F64 => context.f64_type().into(),
            StorageMode::ObjPtr => context.ptr_type(AddressSpace::default()).into(),
        }
    }
}

/// A compiled value: its LLVM value, mode, and the object kind inference
/// attached to it (Unknown when nothing is known).
#[derive(Debug, Clone, Copy)]
pub struct JitValue<'ctx> {
    pub value: BasicValueEnum<'ctx>,
    pub mode: StorageMode,
    pub kind: ObjKind,
}

impl<'ctx> JitValue<'ctx> {
    pub fn new(value: BasicValueEnum<'ctx>, mode: StorageMode, kind: ObjKind) -> JitValue<'ctx> {
        JitValue { value, mode, kind }
    }
}

/// Emits the conversion of `value` to `target` mode.
///
/// Scalar-to-scalar transitions are pure casts; transitions to and from
/// object pointers call the boxing/unboxing runtime helpers.
pub fn convert_mode<'ctx>(
    context: &'ctx Context,
    builder: &Builder<'ctx>,
    module: &Module<'ctx>,
    value: JitValue<'ctx>,
    target: StorageMode,
) -> Result<JitValue<'ctx>, CompError> {
    if value.mode == target {
        return Ok(value);
    }
    let out = match (value.mode, target) {
        (StorageMode::I1, StorageMode::I64) => builder
            .build_int_z_extend(value.value.into_int_value(), context.i64_type(), "b2i")
            .map_err(CompError::llvm)?
            .into(),
        (StorageMode::I1, StorageMode::F64) => builder
            .build_unsigned_int_to_float(
                value.value.into_int_value(),
                context.f64_type(),
                "b2f",
            )
            .map_err(CompError::llvm)?
            .into(),
        (StorageMode::I64, StorageMode::F64) => builder
            .build_signed_int_to_float(value.value.into_int_value(), context.f64_type(), "i2f")
            .map_err(CompError::llvm)?
            .into(),
        (StorageMode::I64, StorageMode::I1) => builder
            .build_int_compare(
                IntPredicate::NE,
                value.value.into_int_value(),
                context.i64_type().const_zero(),
                "i2b",
            )
            .map_err(CompError::llvm)?
            .into(),
        (StorageMode::F64, StorageMode::I64) => builder
            .build_float_to_signed_int(
                value.value.into_float_value(),
                context.i64_type(),
                "f2i",
            )
            .map_err(CompError::llvm)?
            .into(),
        (StorageMode::F64, StorageMode::I1) => builder
            .build_float_compare(
                FloatPredicate::ONE,
                value.value.into_float_value(),
                context.f64_type().const_zero(),
                "f2b",
            )
            .map_err(CompError::llvm)?
            .into(),
        // Boxing into objects. Booleans cross the runtime boundary as
        // i64 (the C ABI has no i1).
        (StorageMode::I1, StorageMode::ObjPtr) => {
            let wide = builder
                .build_int_z_extend(value.value.into_int_value(), context.i64_type(), "b2i")
                .map_err(CompError::llvm)?;
            runtime::call_runtime(
                builder,
                module,
                runtime::RT_BOOL_TO_OBJ,
                &[wide.into()],
                "boxb",
            )?
        }
        (StorageMode::I64, StorageMode::ObjPtr) => runtime::call_runtime(
            builder,
            module,
            runtime::RT_I64_TO_OBJ,
            &[value.value.into()],
            "boxi",
        )?,
        (StorageMode::F64, StorageMode::ObjPtr) => runtime::call_runtime(
            builder,
            module,
            runtime::RT_F64_TO_OBJ,
            &[value.value.into()],
            "boxf",
        )?,
        // Unboxing from objects.
        (StorageMode::ObjPtr, StorageMode::I1) => {
            let wide = runtime::call_runtime(
                builder,
                module,
                runtime::RT_OBJ_TO_BOOL,
                &[value.value.into()],
                "unboxb",
            )?;
            builder
                .build_int_compare(
                    IntPredicate::NE,
                    wide.into_int_value(),
                    context.i64_type().const_zero(),
                    "i2b",
                )
                .map_err(CompError::llvm)?
                .into()
        }
        (StorageMode::ObjPtr, StorageMode::I64) => runtime::call_runtime(
            builder,
            module,
            runtime::RT_OBJ_TO_I64,
            &[value.value.into()],
            "unboxi",
        )?,
        (StorageMode::ObjPtr, StorageMode::F64) => runtime::call_runtime(
            builder,
            module,
            runtime::RT_OBJ_TO_F64,
            &[value.value.into()],
            "unboxf",
        )?,
        (a, b) => {
            return Err(CompError::Llvm(format!(
                "no conversion from {:?} to {:?}",
                a, b
            )))
        }
    };
    Ok(JitValue::new(out, target, value.kind))
}

#[cfg(test)]
mod tests {
    use super::*;
    use matlang_core::typeinfo::{type_set_make, TypeInfo};

    #[test]
    fn scalar_logical_selects_i1() {
        let set = type_set_make(TypeInfo::scalar(ObjKind::LogicalArray, true));
        assert_eq!(StorageMode::for_type_set(&set), StorageMode::I1);
    }

    #[test]
    fn scalar_integer_selects_i64() {
        let set = type_set_make(TypeInfo::scalar(ObjKind::MatrixF64, true));
        assert_eq!(StorageMode::for_type_set(&set), StorageMode::I64);
    }

    #[test]
    fn scalar_real_selects_f64() {
        let set = type_set_make(TypeInfo::scalar(ObjKind::MatrixF64, false));
        assert_eq!(StorageMode::for_type_set(&set), StorageMode::F64);
    }

    #[test]
    fn everything_else_selects_obj_ptr() {
        let matrix = type_set_make(TypeInfo::matrix(ObjKind::MatrixF64));
        assert_eq!(StorageMode::for_type_set(&matrix), StorageMode::ObjPtr);
        let complex = type_set_make(TypeInfo::scalar(ObjKind::MatrixC128, false));
        assert_eq!(StorageMode::for_type_set(&complex), StorageMode::ObjPtr);
        let unknown = type_set_make(TypeInfo::unknown());
        assert_eq!(StorageMode::for_type_set(&unknown), StorageMode::ObjPtr);
    }

    #[test]
    fn widen_order() {
        use StorageMode::*;
        assert_eq!(StorageMode::widen(I1, I64), I64);
        assert_eq!(StorageMode::widen(I64, F64), F64);
        assert_eq!(StorageMode::widen(F64, ObjPtr), ObjPtr);
        assert_eq!(StorageMode::widen(F64, F64), F64);
    }
}
