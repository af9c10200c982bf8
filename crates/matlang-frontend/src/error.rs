//! Frontend error types.

use thiserror::Error;

/// Errors from the parser client and the XML decoding layers.
#[derive(Debug, Error)]
pub enum FrontendError {
    /// Could not reach the parser subprocess.
    #[error("failed to connect to parser front-end at {address}: {reason}")]
    ConnectFailed { address: String, reason: String },

    /// The connection dropped mid-exchange.
    #[error("parser connection error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed XML in a parser reply.
    #[error("XML parse error at offset {offset}: {message}")]
    Xml { offset: usize, message: String },

    /// Well-formed XML that does not match the expected IR schema.
    #[error("invalid parse tree: {0}")]
    Schema(String),

    /// The front end reported source errors.
    #[error("parse error reported by front-end:\n{0}")]
    SourceErrors(String),
}

impl FrontendError {
    pub fn xml(offset: usize, message: impl Into<String>) -> FrontendError {
        FrontendError::Xml {
            offset,
            message: message.into(),
        }
    }
}
