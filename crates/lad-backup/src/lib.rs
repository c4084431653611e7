//! Backup files for the Global LAD.
//!
//! A backup is a header followed by CRC-framed, bincode-encoded records in
//! sequence order. Backups are a warm-start aid: reading tolerates
//! corruption by skipping bad frames and stopping at a truncated tail.

pub mod error;
pub mod format;
pub mod reader;
pub mod rotation;
pub mod snapshot;
pub mod writer;

pub use error::{BackupError, BackupResult};
pub use format::{BackupRecord, MAGIC};
pub use reader::{read_backup, summarize, BackupSummary, RestoreStream};
pub use rotation::BackupRotation;
pub use snapshot::{write_snapshot, SnapshotInfo};
pub use writer::BackupWriter;
