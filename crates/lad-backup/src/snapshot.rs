use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use lad_types::LadEntry;

use crate::error::BackupResult;
use crate::writer::BackupWriter;

/// Result of writing a snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SnapshotInfo {
    pub path: PathBuf,
    pub frames: u64,
    pub bytes: u64,
}

/// Write `entries` to `path` in sequence order.
///
/// The file is written next to its destination under a `.tmp` suffix and
/// renamed into place once synced, so readers never see a partial snapshot.
pub fn write_snapshot(path: &Path, entries: &[LadEntry]) -> BackupResult<SnapshotInfo> {
    let tmp = tmp_path(path);
    let mut ordered: Vec<&LadEntry> = entries.iter().collect();
    ordered.sort_by_key(|e| e.sequence);

    let mut writer = BackupWriter::create(&tmp)?;
    for entry in ordered {
        writer.append(entry)?;
    }
    let (frames, bytes) = writer.finish()?;
    fs::rename(&tmp, path)?;

    info!(path = %path.display(), frames, bytes, "snapshot written");
    Ok(SnapshotInfo {
        path: path.to_path_buf(),
        frames,
        bytes,
    })
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}
