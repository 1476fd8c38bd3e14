//! Error types for graph construction, serialization and execution.
//!
//! Two kinds of failure exist in the engine and they travel on different
//! paths:
//!
//! * [`GraphError`] is returned from fallible *host* operations — building,
//!   serializing or deserializing a graph. These never flow between nodes.
//! * [`RunError`] is the payload of an Error message. It is produced while a
//!   graph is running (a type mismatch, a failed fetch, a protocol
//!   violation) and travels node-to-node until it reaches the result
//!   channel. It is cheap to clone because broadcast duplicates it per
//!   parent.

use thiserror::Error;

/// Convenience result type using [`GraphError`].
pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors raised while building, writing or reading a graph.
#[derive(Error, Debug)]
pub enum GraphError {
    /// Underlying I/O failure while reading or writing a graph file.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A node tag byte that does not name any node variant.
    #[error("invalid node tag: {0}")]
    InvalidNodeTag(u8),

    /// A value type tag outside the scalar encoding set.
    #[error("invalid value tag: {0}")]
    InvalidValueTag(i32),

    /// An operator code that does not map back to a token.
    #[error("invalid operator code: {0}")]
    InvalidOperator(i32),

    /// Only scalar values appear in graph files; anything else is a bug in
    /// the caller.
    #[error("value of kind '{0}' cannot be encoded")]
    UnencodableValue(&'static str),

    /// A length-prefixed string that is not valid UTF-8.
    #[error("invalid string encoding: {0}")]
    InvalidString(#[from] std::string::FromUtf8Error),

    /// A negative length prefix in a graph file.
    #[error("negative length prefix: {0}")]
    NegativeLength(i32),

    /// The registry has no result node recorded.
    #[error("graph has no result node")]
    MissingResultNode,
}

/// The payload of an Error message.
///
/// Every variant is a user-visible runtime failure; nodes forward these
/// unchanged (rewriting only the sender id) so the description printed at
/// the driver is the one produced at the point of failure.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RunError {
    /// An operator applied to operands of the wrong type.
    #[error("type mismatch: {0}")]
    Type(String),

    /// A node carrying an operator it does not implement.
    #[error("unsupported operator: {0}")]
    UnknownOperator(&'static str),

    #[error("division by zero")]
    DivisionByZero,

    /// Goto received a URL that is not a string value.
    #[error("goto expects a string url, got {0}")]
    NonStringUrl(&'static str),

    /// DNS, connect, status or other HTTP-level failure.
    #[error("http request failed: {0}")]
    Http(String),

    /// HTML could not be parsed or a CSS selector is malformed.
    #[error("html selection failed: {0}")]
    Html(String),

    /// A node received a message variant it cannot consume.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// A stream element addressed a slot outside the data tree.
    #[error("stream index out of bounds: index {index}, length {len}")]
    OutOfRange { index: usize, len: usize },

    /// A stream producer finished before delivering every element.
    #[error("incomplete stream: received {received} of {expected} elements")]
    IncompleteStream { received: usize, expected: usize },

    /// A late-bound variable never received a value.
    #[error("variable '{0}' timed out waiting for a value")]
    VarTimeout(String),
}
