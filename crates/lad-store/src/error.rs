use lad_types::TypeError;

/// Errors from container operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The record failed validation and was not stored.
    #[error("invalid record: {0}")]
    InvalidRecord(#[from] TypeError),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
