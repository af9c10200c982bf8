//! Chained execution environments.
//!
//! An [`Environment`] maps symbols to data objects, with an optional
//! parent environment. Lookup walks the chain; binding always writes the
//! frame it is called on. Each program function owns a persistent local
//! environment; every call extends it with a fresh child frame that is
//! abandoned when the call returns.
//!
//! Bindings use `IndexMap` so iteration order is insertion order, which
//! keeps environment snapshots deterministic for tests and diagnostics.

use std::cell::RefCell;
use std::fmt;

use indexmap::IndexMap;

use crate::error::RunError;
use crate::object::ObjRef;
use crate::symbol::Symbol;

/// A heap-resident environment reference.
pub type EnvRef = &'static Environment;

/// One environment frame.
pub struct Environment {
    bindings: RefCell<IndexMap<Symbol, ObjRef>>,
    parent: Option<EnvRef>,
}

impl Environment {
    /// A root environment with no parent.
    pub fn new() -> Environment {
        Environment {
            bindings: RefCell::new(IndexMap::new()),
            parent: None,
        }
    }

    /// Allocates a child frame extending `parent`.
    pub fn extend(parent: EnvRef) -> EnvRef {
        crate::heap::alloc_env(Environment {
            bindings: RefCell::new(IndexMap::new()),
            parent: Some(parent),
        })
    }

    /// Creates or replaces a binding in this frame.
    pub fn bind(&self, symbol: Symbol, object: ObjRef) {
        self.bindings.borrow_mut().insert(symbol, object);
    }

    /// Removes a binding from this frame; `true` if one existed.
    pub fn unbind(&self, symbol: Symbol) -> bool {
        self.bindings.borrow_mut().shift_remove(&symbol).is_some()
    }

    /// Looks `symbol` up, walking the parent chain.
    pub fn lookup(&self, symbol: Symbol) -> Result<ObjRef, RunError> {
        let mut env = Some(self);
        while let Some(e) = env {
            if let Some(&obj) = e.bindings.borrow().get(&symbol) {
                return Ok(obj);
            }
            env = e.parent.map(|p| &*p);
        }
        Err(RunError::unknown_symbol(symbol))
    }

    /// Like [`Environment::lookup`] but without the error allocation.
    pub fn try_lookup(&self, symbol: Symbol) -> Option<ObjRef> {
        let mut env = Some(self);
        while let Some(e) = env {
            if let Some(&obj) = e.bindings.borrow().get(&symbol) {
                return Some(obj);
            }
            env = e.parent.map(|p| &*p);
        }
        None
    }

    /// Returns `true` if `symbol` is bound in this frame (not parents).
    pub fn is_bound_locally(&self, symbol: Symbol) -> bool {
        self.bindings.borrow().contains_key(&symbol)
    }

    /// Snapshot of the symbols bound in this frame.
    pub fn symbols(&self) -> Vec<Symbol> {
        self.bindings.borrow().keys().copied().collect()
    }

    pub fn parent(&self) -> Option<EnvRef> {
        self.parent
    }
}

impl Default for Environment {
    fn default() -> Self {
        Environment::new()
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("bindings", &self.symbols())
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap;
    use crate::object::DataObject;

    #[test]
    fn bind_and_lookup() {
        let env = heap::alloc_env(Environment::new());
        let x = Symbol::intern("env_x");
        env.bind(x, heap::alloc(DataObject::f64_scalar(3.0)));
        assert_eq!(env.lookup(x).unwrap().scalar_f64().unwrap(), 3.0);
    }

    #[test]
    fn lookup_walks_parent_chain() {
        let parent = heap::alloc_env(Environment::new());
        let x = Symbol::intern("env_chain_x");
        parent.bind(x, heap::alloc(DataObject::f64_scalar(1.0)));
        let child = Environment::extend(parent);
        assert!(child.lookup(x).is_ok());
    }

    #[test]
    fn child_binding_shadows_parent() {
        let parent = heap::alloc_env(Environment::new());
        let x = Symbol::intern("env_shadow_x");
        parent.bind(x, heap::alloc(DataObject::f64_scalar(1.0)));
        let child = Environment::extend(parent);
        child.bind(x, heap::alloc(DataObject::f64_scalar(2.0)));
        assert_eq!(child.lookup(x).unwrap().scalar_f64().unwrap(), 2.0);
        assert_eq!(parent.lookup(x).unwrap().scalar_f64().unwrap(), 1.0);
    }

    #[test]
    fn missing_symbol_fails() {
        let env = Environment::new();
        let err = env.lookup(Symbol::intern("env_missing")).unwrap_err();
        assert!(err.message().contains("evaluates to nothing"));
    }

    #[test]
    fn unbind_only_touches_this_frame() {
        let parent = heap::alloc_env(Environment::new());
        let x = Symbol::intern("env_unbind_x");
        parent.bind(x, heap::alloc(DataObject::f64_scalar(1.0)));
        let child = Environment::extend(parent);
        assert!(!child.unbind(x));
        assert!(child.lookup(x).is_ok());
    }
}
