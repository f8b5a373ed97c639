//! Error types for the store layer

use thiserror::Error;

/// Result type alias for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors that can occur when talking to the document store or queue
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database call failed
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored document could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Document not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// The message was redelivered since this receipt was issued
    #[error("Stale receipt for message {0}")]
    StaleReceipt(String),

    /// Store temporarily unavailable
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether retrying the same call later may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unavailable(_) => true,
            Self::Database(err) => matches!(
                err,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            ),
            _ => false,
        }
    }

    /// Check if this error is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
            || matches!(self, Self::Database(sqlx::Error::RowNotFound))
    }
}
