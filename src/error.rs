//! Error types for nabor.

use thiserror::Error;

/// Errors that can occur during index construction, search or tuning.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NaborError {
    /// Invalid argument (shape, weight, fraction, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Dimension mismatch between a query and the indexed dataset.
    #[error("dimension mismatch: query has {query_len} values, dataset rows have {row_len}")]
    DimensionMismatch { query_len: usize, row_len: usize },

    /// Empty dataset or index.
    #[error("index is empty")]
    EmptyIndex,

    /// `build()` called on an index that is already built.
    #[error("index already built")]
    AlreadyBuilt,

    /// Search issued before `build()`.
    #[error("index must be built before searching")]
    NotBuilt,

    /// Algorithm present in the enumeration but not provided by this crate.
    #[error("unsupported algorithm: {0}")]
    Unsupported(String),
}

/// Result type alias for nabor operations.
pub type Result<T> = std::result::Result<T, NaborError>;
