//! Errors raised while encoding or decoding store values.

use thiserror::Error;

/// A stored value did not match the format its key implies.
///
/// This is always a protocol bug or a store written to by something other
/// than a well-behaved coordinator; it is never expected in normal
/// operation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("malformed {field} value: {value:?}")]
    Malformed { field: &'static str, value: String },
}
