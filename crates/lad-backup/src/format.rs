//! On-disk layout of a backup file.
//!
//! ```text
//! [8 bytes: magic "GLADBK\0\x01"]
//! repeated:
//!   [4 bytes: payload length (little-endian u32)]
//!   [4 bytes: CRC32 of payload (little-endian u32)]
//!   [N bytes: payload (bincode-serialized BackupRecord)]
//! ```

use serde::{Deserialize, Serialize};

use lad_types::TelemetryRecord;

use crate::error::{BackupError, BackupResult};

/// File magic: format name plus a one-byte version.
pub const MAGIC: [u8; 8] = *b"GLADBK\x00\x01";

/// Frame header size: 4 bytes length + 4 bytes CRC.
pub const FRAME_HEADER_SIZE: usize = 8;

/// Frames claiming more than this are treated as corruption.
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

/// One record as stored in a backup, with the sequence number it had when
/// the snapshot was taken.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub sequence: u64,
    pub record: TelemetryRecord,
}

/// Borrowed twin of [`BackupRecord`]; serializes to the same bytes.
#[derive(Serialize)]
struct BackupRecordRef<'a> {
    sequence: u64,
    record: &'a TelemetryRecord,
}

/// Encode one frame, header included.
pub fn encode_frame(sequence: u64, record: &TelemetryRecord) -> BackupResult<Vec<u8>> {
    let payload = bincode::serialize(&BackupRecordRef { sequence, record })
        .map_err(|e| BackupError::Serialization(e.to_string()))?;
    let length = payload.len() as u32;
    let crc = crc32fast::hash(&payload);

    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    frame.extend_from_slice(&length.to_le_bytes());
    frame.extend_from_slice(&crc.to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Split a frame header into `(length, crc)`.
pub fn decode_header(header: &[u8; FRAME_HEADER_SIZE]) -> (u32, u32) {
    let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    (length, crc)
}

pub fn decode_payload(payload: &[u8]) -> BackupResult<BackupRecord> {
    bincode::deserialize(payload).map_err(|e| BackupError::Serialization(e.to_string()))
}
