//! Error types for the coqtop protocol driver
//!
//! Protocol rejections and subprocess death are not errors here: they come
//! back as [`Response::Err`](crate::messages::Response) values so callers can
//! recover by rewinding. The variants below cover malformed wire data, caller
//! mistakes and local I/O failures.

use thiserror::Error;

/// Structural problems found while decoding a coqtop XML element.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("<{tag}> is missing its `{attr}` attribute")]
    MissingAttribute { tag: String, attr: &'static str },

    #[error("<{tag}> has unexpected {attr}=\"{value}\"")]
    UnexpectedAttribute {
        tag: String,
        attr: &'static str,
        value: String,
    },

    #[error("<{tag}> expects {expected} children, found {found}")]
    Arity {
        tag: String,
        expected: usize,
        found: usize,
    },

    #[error("<{tag}> has no <{child}> child")]
    MissingChild { tag: String, child: &'static str },

    #[error("unrecognized tag <{0}>")]
    UnknownTag(String),

    #[error("<{tag}> holds an invalid integer: {text:?}")]
    InvalidInt { tag: String, text: String },

    #[error("expected {expected}, found {found}")]
    UnexpectedShape {
        expected: &'static str,
        found: String,
    },
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Failed to launch {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Cannot rewind {steps} step(s) with only {active} active command(s); the root stays")]
    InvalidRewind { steps: usize, active: usize },

    #[error("coqtop is not running")]
    NotRunning,

    #[error("Project file error: {0}")]
    Project(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

pub type Result<T> = std::result::Result<T, Error>;
