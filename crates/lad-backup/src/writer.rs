use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use lad_types::{LadEntry, TelemetryRecord};

use crate::error::{BackupError, BackupResult};
use crate::format::{encode_frame, MAGIC};

/// Appends records to a backup file.
///
/// Frames are buffered; call [`flush`](Self::flush) to push them to the OS
/// and [`sync`](Self::sync) to make them durable.
pub struct BackupWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    frames: u64,
    bytes: u64,
}

impl BackupWriter {
    /// Create (or truncate) a backup file and write the header.
    pub fn create(path: &Path) -> BackupResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&MAGIC)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer,
            frames: 0,
            bytes: MAGIC.len() as u64,
        })
    }

    /// Open an existing backup for appending, or create it when missing
    /// or empty.
    pub fn open_append(path: &Path) -> BackupResult<Self> {
        let len = match fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };
        if len == 0 {
            return Self::create(path);
        }

        let mut header = [0u8; MAGIC.len()];
        let mut file = File::open(path)?;
        if file.read_exact(&mut header).is_err() || header != MAGIC {
            return Err(BackupError::BadHeader {
                path: path.to_path_buf(),
            });
        }
        drop(file);

        let file = OpenOptions::new().append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            frames: 0,
            bytes: len,
        })
    }

    /// Append one record with the sequence number it carries.
    pub fn append_record(&mut self, sequence: u64, record: &TelemetryRecord) -> BackupResult<()> {
        let frame = encode_frame(sequence, record)?;
        self.writer.write_all(&frame)?;
        self.frames += 1;
        self.bytes += frame.len() as u64;
        Ok(())
    }

    /// Append one sequenced container entry.
    pub fn append(&mut self, entry: &LadEntry) -> BackupResult<()> {
        self.append_record(entry.sequence, &entry.record)
    }

    /// Push buffered frames to the OS without syncing.
    pub fn flush(&mut self) -> BackupResult<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Flush and `fsync`.
    pub fn sync(&mut self) -> BackupResult<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Sync and close. Returns `(frames written, file size)`.
    pub fn finish(mut self) -> BackupResult<(u64, u64)> {
        self.sync()?;
        debug!(path = %self.path.display(), frames = self.frames, bytes = self.bytes, "backup written");
        Ok((self.frames, self.bytes))
    }

    /// Frames appended through this writer.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
