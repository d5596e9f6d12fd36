use thiserror::Error;

/// Fatal conditions raised by the sampler. None of them is retried.
#[derive(Debug, Error)]
pub enum SamplerError {
    /// Illegal count mutation, e.g. decrementing below zero
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Structural mismatch found by the validator
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Regression solver could not produce a finite solution
    #[error("regression failure: {0}")]
    RegressionFailure(String),

    /// Malformed or mismatched snapshot
    #[error("state codec: {0}")]
    StateCodec(String),

    /// Inconsistent configuration or corpus
    #[error("configuration: {0}")]
    Config(String),

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for SamplerError {
    fn from(e: serde_json::Error) -> Self {
        SamplerError::StateCodec(e.to_string())
    }
}

impl From<tempfile::PersistError> for SamplerError {
    fn from(e: tempfile::PersistError) -> Self {
        SamplerError::Io(e.error)
    }
}

pub type Result<T> = std::result::Result<T, SamplerError>;
