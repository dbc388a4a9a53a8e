//! Error types for Trellis Core.

use thiserror::Error;

/// Result type alias for Trellis operations.
pub type Result<T> = std::result::Result<T, TrellisError>;

/// Errors that can occur while setting up or running a constrained generation.
#[derive(Error, Debug)]
pub enum TrellisError {
    /// The grammar could not be bound to the vocabulary.
    #[error("construction error: {0}")]
    Construction(String),

    /// The sampler picked a token outside the permitted mask.
    #[error("contract violation: token {token} is not permitted by the grammar")]
    ContractViolation {
        /// Offending token id.
        token: u32,
    },

    /// The grammar permits no token in the current state.
    #[error("contract violation: grammar permits no token in the current state")]
    NoPermittedTokens,

    /// Model forward pass failed.
    #[error("model error: {0}")]
    Model(String),

    /// Sampling failed.
    #[error("sampling error: {0}")]
    Sampling(String),

    /// Generated text does not conform to the requested shape.
    #[error("parse error: {0}")]
    Parse(#[source] serde_json::Error),

    /// Invalid generation input.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// I/O error.
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    /// Candle tensor error.
    #[error("tensor error: {0}")]
    TensorError(#[from] candle_core::Error),
}

impl TrellisError {
    /// Whether this error aborted a generation session.
    pub fn is_generation_error(&self) -> bool {
        matches!(
            self,
            TrellisError::ContractViolation { .. }
                | TrellisError::NoPermittedTokens
                | TrellisError::Model(_)
                | TrellisError::Sampling(_)
                | TrellisError::TensorError(_)
        )
    }

    /// Whether this error comes from parsing the finished output.
    pub fn is_parse_error(&self) -> bool {
        matches!(self, TrellisError::Parse(_))
    }
}
