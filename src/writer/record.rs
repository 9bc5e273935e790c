//! Redo log frames
//!
//! Segment files are a plain concatenation of frames:
//!
//! ```text
//! +-------------+----------+----------------+-------------+
//! | length u32  | kind u8  | payload (JSON) | crc32 u32   |
//! +-------------+----------+----------------+-------------+
//! ```
//!
//! `length` counts the whole frame including itself and the checksum. The
//! checksum covers everything before it. Integers are little endian.

use crate::model::{DdlEvent, RowChangedEvent, Ts};

use super::checksum::compute_checksum;
use super::errors::{WriterError, WriterResult};

/// length + kind + checksum
const FRAME_OVERHEAD: usize = 4 + 1 + 4;

/// Discriminates the payload of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordKind {
    Row = 1,
    Ddl = 2,
}

impl RecordKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(RecordKind::Row),
            2 => Some(RecordKind::Ddl),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// One entry of the redo log
#[derive(Debug, Clone, PartialEq)]
pub enum RedoRecord {
    Row(RowChangedEvent),
    Ddl(DdlEvent),
}

impl RedoRecord {
    pub fn kind(&self) -> RecordKind {
        match self {
            RedoRecord::Row(_) => RecordKind::Row,
            RedoRecord::Ddl(_) => RecordKind::Ddl,
        }
    }

    pub fn commit_ts(&self) -> Ts {
        match self {
            RedoRecord::Row(row) => row.commit_ts,
            RedoRecord::Ddl(ddl) => ddl.commit_ts,
        }
    }

    fn payload(&self) -> WriterResult<Vec<u8>> {
        let encoded = match self {
            RedoRecord::Row(row) => serde_json::to_vec(row),
            RedoRecord::Ddl(ddl) => serde_json::to_vec(ddl),
        };
        encoded.map_err(|e| WriterError::Codec(e.to_string()))
    }

    /// Encode into a checksummed frame
    pub fn encode(&self) -> WriterResult<Vec<u8>> {
        let payload = self.payload()?;
        let frame_len = FRAME_OVERHEAD + payload.len();
        let length = u32::try_from(frame_len)
            .map_err(|_| WriterError::Codec(format!("frame of {} bytes too large", frame_len)))?;

        let mut frame = Vec::with_capacity(frame_len);
        frame.extend_from_slice(&length.to_le_bytes());
        frame.push(self.kind().as_u8());
        frame.extend_from_slice(&payload);
        let checksum = compute_checksum(&frame);
        frame.extend_from_slice(&checksum.to_le_bytes());

        Ok(frame)
    }

    /// Decode the frame at the start of `data`.
    ///
    /// Returns the record and the number of bytes consumed. Truncation,
    /// checksum mismatch and unknown kinds are reported as `Corruption`
    /// against `location`.
    pub fn decode(data: &[u8], location: &str) -> WriterResult<(Self, usize)> {
        if data.len() < FRAME_OVERHEAD {
            return Err(WriterError::corruption(location, "frame header truncated"));
        }

        let length = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if length < FRAME_OVERHEAD {
            return Err(WriterError::corruption(
                location,
                format!("invalid frame length {}", length),
            ));
        }
        if data.len() < length {
            return Err(WriterError::corruption(
                location,
                format!("frame truncated: expected {} bytes, got {}", length, data.len()),
            ));
        }

        let checksum_offset = length - 4;
        let stored = u32::from_le_bytes([
            data[checksum_offset],
            data[checksum_offset + 1],
            data[checksum_offset + 2],
            data[checksum_offset + 3],
        ]);
        let computed = compute_checksum(&data[..checksum_offset]);
        if computed != stored {
            return Err(WriterError::corruption(
                location,
                format!(
                    "checksum mismatch: computed {:08x}, stored {:08x}",
                    computed, stored
                ),
            ));
        }

        let kind = RecordKind::from_u8(data[4]).ok_or_else(|| {
            WriterError::corruption(location, format!("unknown record kind {}", data[4]))
        })?;
        let payload = &data[5..checksum_offset];
        let record = match kind {
            RecordKind::Row => RedoRecord::Row(
                serde_json::from_slice(payload).map_err(|e| WriterError::Codec(e.to_string()))?,
            ),
            RecordKind::Ddl => RedoRecord::Ddl(
                serde_json::from_slice(payload).map_err(|e| WriterError::Codec(e.to_string()))?,
            ),
        };

        Ok((record, length))
    }

    /// Decode every frame in a segment body
    pub fn decode_all(mut data: &[u8], location: &str) -> WriterResult<Vec<Self>> {
        let mut records = Vec::new();
        while !data.is_empty() {
            let (record, consumed) = Self::decode(data, location)?;
            records.push(record);
            data = &data[consumed..];
        }
        Ok(records)
    }
}
