//! Function definitions: program functions and library functions.
//!
//! [`ProgFunction`] is a user function parsed from source: parameter
//! lists, nested children, the original body, and the current (possibly
//! lowered) body. The original body is retained so diagnostics can point
//! at source-shaped trees and so a function can be re-lowered with
//! different options.
//!
//! [`LibFunction`] is a built-in: a native handler plus an optional
//! type-mapping function the type inference consults for return types.
//!
//! Functions are heap-resident ([`FuncRef`]) and referenced from data
//! objects, environments, and compiled code alike.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::env::EnvRef;
use crate::error::RunError;
use crate::object::ObjRef;
use crate::stmt::StmtSeq;
use crate::symbol::Symbol;
use crate::typeinfo::TypeMapFn;

/// Prefix for compiler-minted temporary variable names.
pub const TEMP_VAR_PREFIX: &str = "$t";

/// A heap-resident function reference.
pub type FuncRef = &'static Function;

/// Native entry signature for library functions: argument objects in,
/// result objects out, with the caller's requested output count.
pub type LibHandler = fn(&[ObjRef], usize) -> Result<Vec<ObjRef>, RunError>;

/// A function: program-defined or library built-in.
#[derive(Debug)]
pub enum Function {
    Prog(ProgFunction),
    Lib(LibFunction),
}

impl Function {
    pub fn name(&self) -> String {
        match self {
            Function::Prog(p) => p.name.clone(),
            Function::Lib(l) => l.name.to_string(),
        }
    }

    pub fn as_prog(&self) -> Option<&ProgFunction> {
        match self {
            Function::Prog(p) => Some(p),
            Function::Lib(_) => None,
        }
    }

    pub fn as_lib(&self) -> Option<&LibFunction> {
        match self {
            Function::Lib(l) => Some(l),
            Function::Prog(_) => None,
        }
    }

    pub fn is_prog(&self) -> bool {
        matches!(self, Function::Prog(_))
    }
}

/// A program function.
#[derive(Debug)]
pub struct ProgFunction {
    pub name: String,
    /// Ordered input parameter symbols.
    pub in_params: Vec<Symbol>,
    /// Ordered output parameter symbols.
    pub out_params: Vec<Symbol>,
    /// Nested child functions, attached after construction.
    pub nested: RefCell<Vec<FuncRef>>,
    /// The body as parsed.
    pub orig_body: Rc<StmtSeq>,
    /// The body analyses and the JIT operate on; replaced by lowering.
    pub cur_body: RefCell<Rc<StmtSeq>>,
    /// `true` when this is a script wrapped as a function.
    pub is_script: bool,
    /// `true` for anonymous (lambda) functions closing over an
    /// environment.
    pub is_closure: bool,
    /// Enclosing function for nested functions.
    pub parent: Cell<Option<FuncRef>>,
    /// Counter for minting unique temporary names within this function.
    next_temp_id: Cell<u32>,
    /// The function's persistent local environment, attached when the
    /// function is first bound.
    pub local_env: RefCell<Option<EnvRef>>,
}

impl ProgFunction {
    pub fn new(
        name: impl Into<String>,
        in_params: Vec<Symbol>,
        out_params: Vec<Symbol>,
        body: StmtSeq,
    ) -> ProgFunction {
        let body = Rc::new(body);
        ProgFunction {
            name: name.into(),
            in_params,
            out_params,
            nested: RefCell::new(Vec::new()),
            orig_body: Rc::clone(&body),
            cur_body: RefCell::new(body),
            is_script: false,
            is_closure: false,
            parent: Cell::new(None),
            next_temp_id: Cell::new(0),
            local_env: RefCell::new(None),
        }
    }

    /// The body analyses should run on.
    pub fn current_body(&self) -> Rc<StmtSeq> {
        Rc::clone(&self.cur_body.borrow())
    }

    /// Replaces the current body (the lowering step). Cached analysis
    /// results keyed by the old body become unreachable.
    pub fn set_current_body(&self, body: StmtSeq) {
        *self.cur_body.borrow_mut() = Rc::new(body);
    }

    /// Mints a function-unique temporary symbol (`$t<k>`).
    pub fn new_temp(&self) -> Symbol {
        let k = self.next_temp_id.get();
        self.next_temp_id.set(k + 1);
        Symbol::intern(&format!("{}{}", TEMP_VAR_PREFIX, k))
    }

    /// Looks up a nested child function by name.
    pub fn find_nested(&self, name: &str) -> Option<FuncRef> {
        self.nested
            .borrow()
            .iter()
            .copied()
            .find(|f| f.name() == name)
    }
}

/// A library (built-in) function.
pub struct LibFunction {
    pub name: &'static str,
    pub handler: LibHandler,
    /// Return-type rule for the type inference; `None` infers Unknown.
    pub type_map: Option<TypeMapFn>,
}

impl fmt::Debug for LibFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LibFunction")
            .field("name", &self.name)
            .field("type_map", &self.type_map.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stmt::StmtSeq;

    #[test]
    fn temp_names_are_unique_per_function() {
        let f = ProgFunction::new("f", vec![], vec![], StmtSeq::empty());
        let a = f.new_temp();
        let b = f.new_temp();
        assert_ne!(a, b);
        assert!(a.name().starts_with(TEMP_VAR_PREFIX));
    }

    #[test]
    fn body_replacement_keeps_original() {
        let f = ProgFunction::new("f", vec![], vec![], StmtSeq::empty());
        let orig_id = f.orig_body.id;
        f.set_current_body(StmtSeq::empty());
        assert_eq!(f.orig_body.id, orig_id);
        assert_ne!(f.current_body().id, orig_id);
    }

    #[test]
    fn function_accessors() {
        let f = Function::Prog(ProgFunction::new(
            "g",
            vec![Symbol::intern("a")],
            vec![Symbol::intern("r")],
            StmtSeq::empty(),
        ));
        assert!(f.is_prog());
        assert_eq!(f.name(), "g");
        assert_eq!(f.as_prog().unwrap().in_params.len(), 1);
    }
}
