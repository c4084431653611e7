use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use lad_types::wall_clock_ms;

use crate::error::BackupResult;

/// File extension of rotated backups.
pub const BACKUP_EXTENSION: &str = "glad";

/// Timestamped backup files in one directory, oldest pruned first.
///
/// Files are named `{basename}_{millis}.glad` with the millisecond
/// timestamp zero-padded, so name order is creation order.
#[derive(Clone, Debug)]
pub struct BackupRotation {
    pub directory: PathBuf,
    pub basename: String,
    /// Backups kept by [`prune`](Self::prune); `0` keeps all.
    pub max_backups: usize,
}

impl BackupRotation {
    /// Backups named `<basename>_<millis>` in `directory`.
    pub fn new(directory: impl Into<PathBuf>, basename: impl Into<String>, max_backups: usize) -> Self {
        Self {
            directory: directory.into(),
            basename: basename.into(),
            max_backups,
        }
    }

    /// A fresh path for a new backup, never colliding with an existing one.
    pub fn next_path(&self) -> BackupResult<PathBuf> {
        fs::create_dir_all(&self.directory)?;
        let mut stamp = wall_clock_ms();
        loop {
            let path = self.path_for(stamp);
            if !path.exists() {
                return Ok(path);
            }
            stamp += 1;
        }
    }

    fn path_for(&self, stamp: u64) -> PathBuf {
        self.directory
            .join(format!("{}_{:013}.{}", self.basename, stamp, BACKUP_EXTENSION))
    }

    fn is_backup(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        let Some(rest) = name.strip_prefix(&self.basename).and_then(|r| r.strip_prefix('_')) else {
            return false;
        };
        let Some(stamp) = rest.strip_suffix(&format!(".{BACKUP_EXTENSION}")) else {
            return false;
        };
        !stamp.is_empty() && stamp.bytes().all(|b| b.is_ascii_digit())
    }

    /// Existing backups, oldest first.
    pub fn list(&self) -> BackupResult<Vec<PathBuf>> {
        if !self.directory.exists() {
            return Ok(Vec::new());
        }
        let mut backups = Vec::new();
        for entry in fs::read_dir(&self.directory)? {
            let path = entry?.path();
            if path.is_file() && self.is_backup(&path) {
                backups.push(path);
            }
        }
        backups.sort();
        Ok(backups)
    }

    /// The newest backup, if any.
    pub fn latest(&self) -> BackupResult<Option<PathBuf>> {
        Ok(self.list()?.pop())
    }

    /// Delete the oldest backups beyond `max_backups`. Returns how many
    /// were deleted.
    pub fn prune(&self) -> BackupResult<usize> {
        if self.max_backups == 0 {
            return Ok(0);
        }
        let backups = self.list()?;
        let excess = backups.len().saturating_sub(self.max_backups);
        let mut removed = 0;
        for path in backups.into_iter().take(excess) {
            match fs::remove_file(&path) {
                Ok(()) => {
                    debug!(path = %path.display(), "pruned backup");
                    removed += 1;
                }
                Err(e) => warn!(path = %path.display(), error = %e, "failed to prune backup"),
            }
        }
        Ok(removed)
    }
}
