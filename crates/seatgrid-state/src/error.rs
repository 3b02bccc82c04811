//! Error types for the SeatGrid directory.

use thiserror::Error;

/// Result type alias for directory operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during directory operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("version conflict on {key}: expected {expected}, found {actual}")]
    Conflict {
        key: String,
        expected: u64,
        actual: u64,
    },

    #[error("invalid: {0}")]
    Invalid(String),
}

impl StateError {
    /// Whether a retry with a fresh read may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transaction(_) | Self::Read(_) | Self::Write(_) | Self::Conflict { .. }
        )
    }
}
