//! The never-free object heap.
//!
//! Data objects, environments, and functions are allocated once and live
//! for the rest of the process; the `&'static` references this module
//! hands out are what the interpreter passes around and what compiled
//! code carries in object-pointer storage slots. Reclamation belongs to
//! an external garbage collector, which this crate treats as a
//! collaborator rather than something it implements.

use crate::env::{EnvRef, Environment};
use crate::function::{FuncRef, Function};
use crate::metrics;
use crate::object::{DataObject, ObjRef};

/// Allocates a data object.
pub fn alloc(obj: DataObject) -> ObjRef {
    metrics::incr_counter(metrics::HEAP_OBJ_COUNT, 1);
    Box::leak(Box::new(obj))
}

/// Allocates an environment frame.
pub fn alloc_env(env: Environment) -> EnvRef {
    Box::leak(Box::new(env))
}

/// Allocates a function.
pub fn alloc_func(func: Function) -> FuncRef {
    Box::leak(Box::new(func))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_yields_stable_references() {
        let a = alloc(DataObject::f64_scalar(1.0));
        let b = alloc(DataObject::f64_scalar(1.0));
        // Distinct allocations, equal contents.
        assert!(!std::ptr::eq(a, b));
        assert_eq!(a.scalar_f64().unwrap(), b.scalar_f64().unwrap());
    }
}
