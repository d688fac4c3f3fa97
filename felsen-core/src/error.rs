//! Structured error types for the felsen workspace.

use thiserror::Error;

/// Unified error type for all likelihood operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FelsenError {
    /// Structural tree violation (cycle, zero or multiple roots, unreachable node)
    #[error("malformed tree: {0}")]
    MalformedTree(String),

    /// Rate matrix breaks the generator invariants (row sums, non-negativity)
    #[error("invalid rate matrix: {0}")]
    InvalidRateMatrix(String),

    /// Negative or non-finite branch length
    #[error("invalid branch length: {0}")]
    InvalidBranchLength(String),

    /// Root prior with negative entries or a non-unit sum
    #[error("invalid root prior: {0}")]
    InvalidPrior(String),

    /// Tip evidence row that is negative, non-finite, or all zero
    #[error("invalid tip evidence: {0}")]
    InvalidEvidence(String),

    /// An accumulator became NaN or +inf during an evaluation
    #[error("non-finite likelihood: {0}")]
    NonFiniteLikelihood(String),

    /// Invalid input (dimension mismatches, out-of-range arguments)
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, FelsenError>;
