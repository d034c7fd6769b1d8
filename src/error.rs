use std::io;

use thiserror::Error;

/// Errors produced while building label matrices, fitting and applying models
#[derive(Debug, Error)]
pub enum Error {
    /// A training or model parameter is out of its valid range
    #[error("{0}")]
    InvalidParam(String),
    /// A string-keyed parameter name is not recognized
    #[error("unknown parameter: {0}")]
    UnknownParam(String),
    /// The label matrix has no rows or no votes
    #[error("empty label matrix: {0}")]
    EmptyMatrix(&'static str),
    /// Cardinality could not be inferred or contradicts the caller's expectation
    #[error("cardinality error: {0}")]
    Cardinality(String),
    /// A worker voted twice on the same item with different labels
    #[error("conflicting votes from worker {worker:?} on item {item:?}: {first} vs {second}")]
    ConflictingVote {
        item: String,
        worker: String,
        first: u32,
        second: u32,
    },
    /// A class name is not part of the label set
    #[error("unknown label: {0:?}")]
    UnknownLabel(String),
    /// Parallel sequences differ in length
    #[error("length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    /// A tab-separated record could not be parsed
    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },
    /// The numerical optimizer diverged or reported a failure
    #[error("optimizer error: {0}")]
    Optimizer(String),
    /// A serialized model is malformed
    #[error("invalid model: {0}")]
    InvalidModel(&'static str),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn param(message: impl Into<String>) -> Self {
        Error::InvalidParam(message.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
