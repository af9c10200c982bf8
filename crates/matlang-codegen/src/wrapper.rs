//! The dynamic wrapper: array-of-objects calling convention on the
//! outside, storage-slot structs on the inside.
//!
//! [`call_version`] packs the argument objects into the input slots,
//! invokes the compiled entry under `catch_unwind` (the cross-call
//! shim: a `RunError` raised by a runtime helper unwinds through the
//! compiled frames, gets the callee's name attached here, and
//! continues as an ordinary error), then unpacks the produced outputs.

use std::panic::{catch_unwind, AssertUnwindSafe};

use matlang_core::error::RunError;
use matlang_core::heap;
use matlang_core::object::{DataObject, ObjRef};

use crate::compiler::CompiledVersion;
use crate::types::StorageMode;

type EntryFn = unsafe extern "C-unwind" fn(*const u64, *mut u64);

/// Calls a compiled version with dynamic arguments.
pub fn call_version(
    version: &CompiledVersion,
    callee_name: &str,
    args: &[ObjRef],
    nargout: usize,
) -> Result<Vec<ObjRef>, RunError> {
    // Pack inputs.
    let mut ins = vec![0u64; version.in_modes.len().max(1)];
    for (i, (&mode, &arg)) in version.in_modes.iter().zip(args).enumerate() {
        ins[i] = pack_slot(mode, arg)?;
    }

    let mut outs = vec![0u64; version.n_outs + 1];
    let entry: EntryFn = unsafe { std::mem::transmute::<usize, EntryFn>(version.address) };

    let outcome = catch_unwind(AssertUnwindSafe(|| unsafe {
        entry(ins.as_ptr(), outs.as_mut_ptr())
    }));
    if let Err(payload) = outcome {
        let err = match payload.downcast::<RunError>() {
            Ok(e) => *e,
            Err(_) => RunError::new("internal error in compiled code"),
        };
        return Err(err.during_call_to(callee_name));
    }

    // Unpack outputs: the produced count, capped by the caller's
    // request.
    let produced = (outs[version.n_outs] as usize).min(version.n_outs);
    let wanted = produced.min(nargout.max(1));
    let mut results = Vec::with_capacity(wanted);
    for i in 0..wanted {
        results.push(unpack_slot(version.out_modes[i], outs[i]));
    }
    Ok(results)
}

fn pack_slot(mode: StorageMode, arg: ObjRef) -> Result<u64, RunError> {
    Ok(match mode {
        StorageMode::I1 => arg.as_logical_scalar()? as u64,
        StorageMode::I64 => (arg.scalar_f64()? as i64) as u64,
        StorageMode::F64 => arg.scalar_f64()?.to_bits(),
        StorageMode::ObjPtr => {
            // Value semantics at the boundary: the callee may mutate a
            // matrix in place through its fast paths.
            let passed = if arg.is_matrix() {
                heap::alloc(arg.copy())
            } else {
                arg
            };
            passed as *const DataObject as u64
        }
    })
}

fn unpack_slot(mode: StorageMode, slot: u64) -> ObjRef {
    match mode {
        StorageMode::I1 => heap::alloc(DataObject::bool_scalar(slot != 0)),
        StorageMode::I64 => heap::alloc(DataObject::f64_scalar(slot as i64 as f64)),
        StorageMode::F64 => heap::alloc(DataObject::f64_scalar(f64::from_bits(slot))),
        StorageMode::ObjPtr => unsafe { &*(slot as *const DataObject) },
    }
}
