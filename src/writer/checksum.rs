//! CRC32 checksums for redo log frames
//!
//! Every frame carries a checksum over its length prefix, kind byte and
//! payload. A mismatch on read is corruption.

use crc32fast::Hasher;

/// CRC32 (IEEE) over `data`
pub fn compute_checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

pub fn verify_checksum(data: &[u8], expected: u32) -> bool {
    compute_checksum(data) == expected
}
