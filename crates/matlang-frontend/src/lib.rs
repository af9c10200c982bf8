//! The front-end collaborator: parser subprocess client and XML-to-IIR
//! decoding.
//!
//! The surface-syntax parser runs out of process. [`client`] speaks its
//! line protocol over a long-lived TCP connection (with a heartbeat
//! worker keeping the link warm); [`xml`] is the minimal XML tree reader
//! the replies are parsed with; [`reader`] decodes the parsed XML schema
//! into IIR functions ready for loading into the interpreter.

pub mod client;
pub mod error;
pub mod reader;
pub mod xml;

pub use client::ParserClient;
pub use error::FrontendError;
pub use reader::read_compilation_units;
pub use xml::XmlNode;
