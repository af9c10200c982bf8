//! Interned identifier symbols.
//!
//! A [`Symbol`] is an index into a process-wide intern table: two symbols
//! created from equal text compare equal, so symbols can be used as cheap
//! map keys throughout the analyses and the JIT without string hashing.
//!
//! The table only ever grows; symbols stay valid for the life of the
//! process.

use std::collections::HashMap;
use std::fmt;
use std::sync::{LazyLock, Mutex};

use serde::{Deserialize, Serialize};

/// Index into the symbol intern table.
///
/// Uses `u32` to save space; ~4 billion unique identifiers is far more
/// than any program tree produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Symbol(u32);

struct SymbolTable {
    names: Vec<String>,
    by_name: HashMap<String, u32>,
}

static TABLE: LazyLock<Mutex<SymbolTable>> = LazyLock::new(|| {
    Mutex::new(SymbolTable {
        names: Vec::new(),
        by_name: HashMap::new(),
    })
});

impl Symbol {
    /// Interns `name`, returning the canonical symbol for that text.
    pub fn intern(name: &str) -> Symbol {
        let mut table = TABLE.lock().expect("symbol table poisoned");
        if let Some(&idx) = table.by_name.get(name) {
            return Symbol(idx);
        }
        let idx = table.names.len() as u32;
        table.names.push(name.to_string());
        table.by_name.insert(name.to_string(), idx);
        Symbol(idx)
    }

    /// Returns the interned text of this symbol.
    pub fn name(self) -> String {
        let table = TABLE.lock().expect("symbol table poisoned");
        table.names[self.0 as usize].clone()
    }

    /// Raw table index, used by the JIT variable map.
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_text_shares_identity() {
        let a = Symbol::intern("alpha");
        let b = Symbol::intern("alpha");
        assert_eq!(a, b);
        assert_eq!(a.index(), b.index());
    }

    #[test]
    fn distinct_text_distinct_symbols() {
        assert_ne!(Symbol::intern("x"), Symbol::intern("y"));
    }

    #[test]
    fn name_round_trips() {
        let s = Symbol::intern("some_function_name");
        assert_eq!(s.name(), "some_function_name");
    }

    #[test]
    fn usable_as_map_key() {
        let mut m = HashMap::new();
        m.insert(Symbol::intern("k"), 1);
        assert_eq!(m.get(&Symbol::intern("k")), Some(&1));
    }
}
