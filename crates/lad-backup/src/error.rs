use std::path::PathBuf;

/// Errors from backup file handling.
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    /// The file does not start with the backup magic.
    #[error("{path} is not a LAD backup file")]
    BadHeader { path: PathBuf },
}

/// Result alias for backup operations.
pub type BackupResult<T> = Result<T, BackupError>;
