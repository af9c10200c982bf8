//! Stable ID newtypes for IIR entities.
//!
//! All IDs are distinct newtype wrappers over `u32`, providing type safety
//! so that a `StmtId` cannot be accidentally used where an `ExprId` is
//! expected. IDs are minted from process-wide counters; a fresh ID is
//! assigned to every node created, including deep copies, so ID equality
//! is node identity.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

/// Expression identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExprId(pub u32);

/// Statement identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StmtId(pub u32);

/// Statement sequence identity. Analysis results are memoized per body,
/// keyed by the root sequence's `SeqId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeqId(pub u32);

static NEXT_EXPR_ID: AtomicU32 = AtomicU32::new(0);
static NEXT_STMT_ID: AtomicU32 = AtomicU32::new(0);
static NEXT_SEQ_ID: AtomicU32 = AtomicU32::new(0);

impl ExprId {
    /// Mints a fresh expression ID.
    pub fn fresh() -> ExprId {
        ExprId(NEXT_EXPR_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl StmtId {
    /// Mints a fresh statement ID.
    pub fn fresh() -> StmtId {
        StmtId(NEXT_STMT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl SeqId {
    /// Mints a fresh sequence ID.
    pub fn fresh() -> SeqId {
        SeqId(NEXT_SEQ_ID.fetch_add(1, Ordering::Relaxed))
    }
}

// Display implementations -- just print the inner value.

impl fmt::Display for ExprId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for StmtId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for SeqId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_ids_are_distinct() {
        let a = ExprId::fresh();
        let b = ExprId::fresh();
        assert_ne!(a, b);
    }

    #[test]
    fn stmt_and_seq_counters_are_independent() {
        let s = StmtId::fresh();
        let q = SeqId::fresh();
        // Different counters; only identity within a kind is meaningful.
        let s2 = StmtId::fresh();
        assert_ne!(s, s2);
        assert_ne!(q, SeqId::fresh());
    }
}
