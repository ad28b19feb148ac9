//! Core error types.

use thiserror::Error;

/// Core store errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Record not found.
    #[error("record not found: {0}")]
    NotFound(String),

    /// A version-checked write lost against a concurrent writer.
    #[error("concurrent modification of {key}: expected revision {expected}, found {found}")]
    Conflict {
        /// Key of the contended record.
        key: String,
        /// Revision the writer based its update on.
        expected: u64,
        /// Revision currently stored.
        found: u64,
    },

    /// Invalid data format.
    #[error("invalid data: {0}")]
    InvalidData(String),
}
