use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{BackupError, BackupResult};
use crate::format::{decode_header, decode_payload, BackupRecord, FRAME_HEADER_SIZE, MAGIC, MAX_FRAME_LEN};

/// Open a backup file for sequential reading.
///
/// Fails only when the file cannot be opened or lacks the backup header.
/// Problems past the header are handled while iterating: frames failing
/// the CRC check or deserialization are skipped and counted, and a
/// truncated tail ends the stream.
pub fn read_backup(path: &Path) -> BackupResult<RestoreStream> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut header = [0u8; MAGIC.len()];
    let read = read_full(&mut reader, &mut header)?;
    if read != MAGIC.len() || header != MAGIC {
        return Err(BackupError::BadHeader {
            path: path.to_path_buf(),
        });
    }
    Ok(RestoreStream {
        reader,
        offset: MAGIC.len() as u64,
        frames: 0,
        skipped: 0,
        truncated: false,
        done: false,
    })
}

/// Iterator over the records of a backup file.
pub struct RestoreStream {
    reader: BufReader<File>,
    offset: u64,
    frames: u64,
    skipped: u64,
    truncated: bool,
    done: bool,
}

impl RestoreStream {
    /// Frames successfully decoded so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Frames dropped for CRC or decode failures so far.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Did the stream end on a partial frame?
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    fn stop_truncated(&mut self, reason: &str) {
        warn!(offset = self.offset, reason, "backup ends mid-frame; stopping");
        self.truncated = true;
        self.done = true;
    }

    fn read_frame(&mut self) -> io::Result<Option<BackupRecord>> {
        loop {
            let mut header = [0u8; FRAME_HEADER_SIZE];
            match read_full(&mut self.reader, &mut header)? {
                0 => {
                    self.done = true;
                    return Ok(None);
                }
                n if n < FRAME_HEADER_SIZE => {
                    self.stop_truncated("short frame header");
                    return Ok(None);
                }
                _ => {}
            }

            let (length, expected_crc) = decode_header(&header);
            if length == 0 || length > MAX_FRAME_LEN {
                warn!(offset = self.offset, length, "invalid frame length; stopping");
                self.done = true;
                return Ok(None);
            }

            let mut payload = vec![0u8; length as usize];
            if read_full(&mut self.reader, &mut payload)? < payload.len() {
                self.stop_truncated("short payload");
                return Ok(None);
            }
            let frame_offset = self.offset;
            self.offset += FRAME_HEADER_SIZE as u64 + u64::from(length);

            let actual_crc = crc32fast::hash(&payload);
            if actual_crc != expected_crc {
                warn!(
                    offset = frame_offset,
                    expected = expected_crc,
                    actual = actual_crc,
                    "CRC mismatch; skipping frame"
                );
                self.skipped += 1;
                continue;
            }

            match decode_payload(&payload) {
                Ok(record) => {
                    self.frames += 1;
                    return Ok(Some(record));
                }
                Err(e) => {
                    warn!(offset = frame_offset, error = %e, "undecodable frame; skipping");
                    self.skipped += 1;
                }
            }
        }
    }
}

impl Iterator for RestoreStream {
    type Item = BackupRecord;

    fn next(&mut self) -> Option<BackupRecord> {
        if self.done {
            return None;
        }
        match self.read_frame() {
            Ok(record) => record,
            Err(e) => {
                warn!(offset = self.offset, error = %e, "read error; stopping");
                self.done = true;
                None
            }
        }
    }
}

/// Read until `buf` is full or the reader is exhausted. Returns bytes read.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Content overview of a backup file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSummary {
    pub frames: u64,
    pub skipped: u64,
    pub truncated: bool,
    pub first_sequence: Option<u64>,
    pub last_sequence: Option<u64>,
    /// Record counts by key.
    pub per_key: BTreeMap<String, u64>,
}

/// Read a whole backup and count its records.
pub fn summarize(path: &Path) -> BackupResult<BackupSummary> {
    let mut stream = read_backup(path)?;
    let mut summary = BackupSummary::default();
    for frame in stream.by_ref() {
        summary.first_sequence = Some(summary.first_sequence.map_or(frame.sequence, |s| s.min(frame.sequence)));
        summary.last_sequence = Some(summary.last_sequence.map_or(frame.sequence, |s| s.max(frame.sequence)));
        *summary.per_key.entry(frame.record.key.to_string()).or_default() += 1;
    }
    summary.frames = stream.frames();
    summary.skipped = stream.skipped();
    summary.truncated = stream.truncated();
    debug!(path = %path.display(), frames = summary.frames, skipped = summary.skipped, "backup summarized");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::BackupWriter;
    use lad_types::{ChannelSample, ChannelValue, EventRecord, Origin, TelemetryRecord, TimeFields, Timestamp};
    use std::fs::{self, OpenOptions};
    use std::io::{Seek, SeekFrom, Write};

    fn channel(id: &str, value: u64) -> TelemetryRecord {
        TelemetryRecord::channel(
            &Origin::new(76, "FLIGHT", "gds-01", 1),
            TimeFields::at_ert(Timestamp::from_millis(value as i64)),
            ChannelSample::new(id, ChannelValue::Unsigned(value)),
        )
    }

    fn write_backup(path: &Path, count: u64) {
        let mut writer = BackupWriter::create(path).unwrap();
        for seq in 1..=count {
            writer.append_record(seq, &channel("A-0001", seq)).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("b.glad");
        let mut writer = BackupWriter::create(&path).unwrap();
        let event = TelemetryRecord::event(
            &Origin::new(76, "FLIGHT", "gds-01", 1),
            TimeFields::at_ert(Timestamp::from_millis(9)),
            EventRecord {
                event_id: 12,
                name: "EVR_HELLO".into(),
                level: "INFO".into(),
                message: "hello".into(),
            },
        );
        writer.append_record(1, &channel("A-0001", 1)).unwrap();
        writer.append_record(2, &event).unwrap();
        assert_eq!(writer.finish().unwrap().0, 2);

        let mut stream = read_backup(&path).unwrap();
        let frames: Vec<BackupRecord> = stream.by_ref().collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].record, channel("A-0001", 1));
        assert_eq!(frames[1].record, event);
        assert_eq!(stream.frames(), 2);
        assert_eq!(stream.skipped(), 0);
        assert!(!stream.truncated());
    }

    #[test]
    fn append_continues_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("b.glad");
        write_backup(&path, 2);

        let mut writer = BackupWriter::open_append(&path).unwrap();
        writer.append_record(3, &channel("A-0002", 3)).unwrap();
        writer.finish().unwrap();

        let sequences: Vec<u64> = read_backup(&path).unwrap().map(|f| f.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
    }

    #[test]
    fn append_refuses_foreign_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        fs::write(&path, b"just some text").unwrap();
        assert!(matches!(
            BackupWriter::open_append(&path),
            Err(BackupError::BadHeader { .. })
        ));
    }

    #[test]
    fn corrupted_frame_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("b.glad");
        write_backup(&path, 3);

        // Flip a byte inside the first payload.
        let mut file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
        let offset = (MAGIC.len() + FRAME_HEADER_SIZE) as u64;
        file.seek(SeekFrom::Start(offset)).unwrap();
        let mut byte = [0u8; 1];
        file.read_exact(&mut byte).unwrap();
        file.seek(SeekFrom::Start(offset)).unwrap();
        file.write_all(&[byte[0] ^ 0xFF]).unwrap();
        drop(file);

        let mut stream = read_backup(&path).unwrap();
        let sequences: Vec<u64> = stream.by_ref().map(|f| f.sequence).collect();
        assert_eq!(sequences, vec![2, 3]);
        assert_eq!(stream.skipped(), 1);
    }

    #[test]
    fn truncated_tail_stops_reading() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("b.glad");
        write_backup(&path, 3);

        let len = fs::metadata(&path).unwrap().len();
        OpenOptions::new().write(true).open(&path).unwrap().set_len(len - 4).unwrap();

        let mut stream = read_backup(&path).unwrap();
        assert_eq!(stream.by_ref().count(), 2);
        assert!(stream.truncated());
    }

    #[test]
    fn missing_or_wrong_header_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let short = dir.path().join("short.glad");
        fs::write(&short, b"GLAD").unwrap();
        assert!(matches!(read_backup(&short), Err(BackupError::BadHeader { .. })));

        let wrong = dir.path().join("wrong.glad");
        fs::write(&wrong, b"NOTABACKUPFILE").unwrap();
        assert!(matches!(read_backup(&wrong), Err(BackupError::BadHeader { .. })));

        assert!(matches!(
            read_backup(&dir.path().join("absent.glad")),
            Err(BackupError::Io(_))
        ));
    }

    #[test]
    fn summary_counts_per_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("b.glad");
        let mut writer = BackupWriter::create(&path).unwrap();
        for seq in 1..=5u64 {
            let id = if seq % 2 == 0 { "A-0002" } else { "A-0001" };
            writer.append_record(seq + 10, &channel(id, seq)).unwrap();
        }
        writer.finish().unwrap();

        let summary = summarize(&path).unwrap();
        assert_eq!(summary.frames, 5);
        assert_eq!(summary.first_sequence, Some(11));
        assert_eq!(summary.last_sequence, Some(15));
        assert_eq!(summary.per_key.len(), 2);
        assert_eq!(summary.per_key.values().sum::<u64>(), 5);
        assert!(summary.per_key.values().any(|&n| n == 3));
    }
}
