//! Core error types for matlang-core.
//!
//! [`RunError`] is the runtime failure type shared by the interpreter, the
//! runtime primitives, and compiled code (which raises it through the
//! unwinding shims). It carries a stack of context frames: each call
//! boundary crossed while propagating prepends `error during call to
//! <name>`, so the surfaced message reads like a call trace.
//!
//! [`CoreError`] covers structural failures in the core data model and
//! uses `thiserror` for matchable variants.

use std::fmt;

use thiserror::Error;

use crate::symbol::Symbol;

/// Core errors produced by the matlang-core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A config variable name was not registered.
    #[error("unknown config variable: '{name}'")]
    UnknownConfigVar { name: String },

    /// A config value string failed to parse for the variable's kind.
    #[error("invalid value '{value}' for config variable '{name}'")]
    InvalidConfigValue { name: String, value: String },

    /// A config value fell outside the variable's declared range.
    #[error("value {value} out of range for config variable '{name}'")]
    ConfigValueOutOfRange { name: String, value: f64 },

    /// Command-line arguments were malformed.
    #[error("invalid command line: {reason}")]
    InvalidCommandLine { reason: String },
}

/// A runtime error with a message stack.
///
/// The first frame is the original condition; frames added while the error
/// propagates give calling context. `Display` renders all frames, outermost
/// context first.
#[derive(Debug, Clone, Error)]
pub struct RunError {
    frames: Vec<String>,
}

impl RunError {
    /// Creates an error with a single message frame.
    pub fn new(msg: impl Into<String>) -> RunError {
        RunError {
            frames: vec![msg.into()],
        }
    }

    /// Creates an error pointing at an offending IIR node; the node's
    /// surface printout is appended to the message for diagnostics.
    pub fn with_node(msg: impl Into<String>, node: &dyn fmt::Display) -> RunError {
        RunError {
            frames: vec![format!("{}:\n  {}", msg.into(), node)],
        }
    }

    /// The unknown-symbol lookup failure.
    pub fn unknown_symbol(symbol: Symbol) -> RunError {
        RunError::new(format!("symbol \"{}\" evaluates to nothing", symbol))
    }

    /// Pushes a context frame onto the stack (most recent context first).
    pub fn in_context(mut self, msg: impl Into<String>) -> RunError {
        self.frames.insert(0, msg.into());
        self
    }

    /// Wraps with the standard call-boundary context frame.
    pub fn during_call_to(self, name: &str) -> RunError {
        self.in_context(format!("error during call to {}", name))
    }

    /// The original (innermost) message frame.
    pub fn message(&self) -> &str {
        self.frames.last().map(String::as_str).unwrap_or("")
    }

    /// All frames, outermost context first.
    pub fn frames(&self) -> &[String] {
        &self.frames
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, frame) in self.frames.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", frame)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_is_innermost_frame() {
        let err = RunError::new("index out of bounds").during_call_to("f");
        assert_eq!(err.message(), "index out of bounds");
        assert_eq!(err.frames().len(), 2);
    }

    #[test]
    fn display_renders_context_first() {
        let err = RunError::new("bad conversion")
            .during_call_to("inner")
            .during_call_to("outer");
        let text = err.to_string();
        let outer = text.find("outer").unwrap();
        let inner = text.find("inner").unwrap();
        let cause = text.find("bad conversion").unwrap();
        assert!(outer < inner && inner < cause);
    }

    #[test]
    fn unknown_symbol_names_the_symbol() {
        let err = RunError::unknown_symbol(Symbol::intern("undefined_thing"));
        assert!(err.message().contains("undefined_thing"));
    }
}
