//! Error types for tree construction and clustering.

use thiserror::Error;

/// Errors that abort a clustering run.
///
/// None of these are recoverable mid-run: the tree is left in whatever state
/// the failing thread reached and should be dropped.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// A node index outside the preallocated arena was requested.
    #[error("node arena exhausted (capacity {capacity})")]
    ArenaExhausted { capacity: usize },

    /// A worker consumed every index in its share of the free pool.
    #[error("ran out of insertion points (arena capacity {capacity}); increase the capacity")]
    FreeListExhausted { capacity: usize },

    /// A split was asked to seed representatives from an empty entry set.
    ///
    /// Splits always see `order + 1` entries, so this only guards direct
    /// misuse of the bisection with empty input.
    #[error("cannot seed a split from {entries} entries")]
    SeedInvariant { entries: usize },

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, Error>;
