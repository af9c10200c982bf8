//! The analysis manager: memoization and recursion breaking.
//!
//! Results are cached by `(pass, function, body, argument types)`. The
//! pass is identified by its function pointer; the function by its heap
//! address; the body by its sequence ID (replacing a function's current
//! body therefore changes the key, which is the only cache invalidation
//! the system needs beyond the explicit [`invalidate`]).
//!
//! Recursive analyses are broken with a pending set: re-entering a key
//! that is already being computed calls the pass with
//! `return_bottom = true`, which must produce the lattice's identity
//! element. A failed pass evicts nothing but its own pending mark and
//! propagates the error; analyses never retry automatically.

use std::any::Any;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use matlang_core::error::RunError;
use matlang_core::function::FuncRef;
use matlang_core::id::SeqId;
use matlang_core::stmt::StmtSeq;
use matlang_core::typeinfo::TypeSetString;

/// An analysis pass: `(function, body, argument types, return_bottom)`.
pub type PassFn<T> =
    fn(FuncRef, &Rc<StmtSeq>, &TypeSetString, bool) -> Result<T, RunError>;

#[derive(Clone, PartialEq, Eq, Hash)]
struct Key {
    pass: usize,
    func: usize,
    body: SeqId,
    args: TypeSetString,
}

#[derive(Default)]
struct Manager {
    cache: HashMap<Key, Rc<dyn Any>>,
    pending: HashSet<Key>,
}

thread_local! {
    static MANAGER: RefCell<Manager> = RefCell::new(Manager::default());
}

/// Requests an analysis result, computing and caching it if needed.
pub fn request<T: 'static>(
    pass: PassFn<T>,
    func: FuncRef,
    body: &Rc<StmtSeq>,
    args: &TypeSetString,
) -> Result<Rc<T>, RunError> {
    let key = Key {
        pass: pass as usize,
        func: func as *const _ as usize,
        body: body.id,
        args: args.clone(),
    };

    // Fast path: cached.
    if let Some(hit) = MANAGER.with(|m| m.borrow().cache.get(&key).cloned()) {
        return hit
            .downcast::<T>()
            .map_err(|_| RunError::new("analysis cache type confusion"));
    }

    // Re-entry on the same key: the pass supplies its bottom element.
    let already_pending = MANAGER.with(|m| !m.borrow_mut().pending.insert(key.clone()));
    if already_pending {
        return pass(func, body, args, true).map(Rc::new);
    }

    let result = pass(func, body, args, false);
    MANAGER.with(|m| {
        m.borrow_mut().pending.remove(&key);
    });

    match result {
        Ok(info) => {
            let rc = Rc::new(info);
            MANAGER.with(|m| {
                m.borrow_mut().cache.insert(key, rc.clone() as Rc<dyn Any>);
            });
            Ok(rc)
        }
        Err(err) => Err(err),
    }
}

/// Drops every cached result for `func` (used when the JIT replaces a
/// function's current body).
pub fn invalidate(func: FuncRef) {
    let func_addr = func as *const _ as usize;
    MANAGER.with(|m| {
        m.borrow_mut().cache.retain(|k, _| k.func != func_addr);
    });
}

/// Clears the whole cache (tests).
pub fn clear() {
    MANAGER.with(|m| {
        let mut m = m.borrow_mut();
        m.cache.clear();
        m.pending.clear();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use matlang_core::function::{Function, ProgFunction};
    use matlang_core::heap;

    fn pass_counting(
        _f: FuncRef,
        _b: &Rc<StmtSeq>,
        _a: &TypeSetString,
        bottom: bool,
    ) -> Result<u64, RunError> {
        if bottom {
            return Ok(0);
        }
        // Count invocations through a thread local.
        thread_local! {
            static CALLS: RefCell<u64> = const { RefCell::new(0) };
        }
        CALLS.with(|c| {
            *c.borrow_mut() += 1;
            Ok(*c.borrow())
        })
    }

    fn pass_failing(
        _f: FuncRef,
        _b: &Rc<StmtSeq>,
        _a: &TypeSetString,
        _bottom: bool,
    ) -> Result<u64, RunError> {
        Err(RunError::new("pass failure"))
    }

    fn make_func() -> FuncRef {
        heap::alloc_func(Function::Prog(ProgFunction::new(
            "m",
            vec![],
            vec![],
            StmtSeq::empty(),
        )))
    }

    #[test]
    fn result_is_memoized() {
        clear();
        let f = make_func();
        let body = f.as_prog().unwrap().current_body();
        let args = TypeSetString::new();
        let first = request(pass_counting, f, &body, &args).unwrap();
        let second = request(pass_counting, f, &body, &args).unwrap();
        assert_eq!(*first, *second);
    }

    #[test]
    fn distinct_bodies_are_distinct_keys() {
        clear();
        let f = make_func();
        let body_a = f.as_prog().unwrap().current_body();
        let body_b = Rc::new(StmtSeq::empty());
        let args = TypeSetString::new();
        let a = request(pass_counting, f, &body_a, &args).unwrap();
        let b = request(pass_counting, f, &body_b, &args).unwrap();
        assert_ne!(*a, *b);
    }

    #[test]
    fn failure_propagates_and_is_not_cached() {
        clear();
        let f = make_func();
        let body = f.as_prog().unwrap().current_body();
        let args = TypeSetString::new();
        assert!(request(pass_failing, f, &body, &args).is_err());
        // Still fails on retry -- no stale cache entry pretends success.
        assert!(request(pass_failing, f, &body, &args).is_err());
    }

    #[test]
    fn invalidate_drops_function_entries() {
        clear();
        let f = make_func();
        let body = f.as_prog().unwrap().current_body();
        let args = TypeSetString::new();
        let first = request(pass_counting, f, &body, &args).unwrap();
        invalidate(f);
        let second = request(pass_counting, f, &body, &args).unwrap();
        assert_ne!(*first, *second);
    }
}
