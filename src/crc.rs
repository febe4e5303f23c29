//! CRC32 helpers, used to derive a stable file-id from a file's name.

use crc::{Crc, CRC_32_ISO_HDLC};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// A stable, deterministic identifier for a file, derived from its name.
pub type FileId = u32;

/// Derives a [`FileId`] from a file name the way the on-disk `FileDescriptor`
/// table keys its entries.
pub fn file_id(name: &str) -> FileId {
    CRC32.checksum(name.as_bytes())
}

/// Checksums an arbitrary byte buffer (used by superblock/tree payloads that
/// carry their own checksum field).
pub fn checksum(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_id_is_deterministic() {
        assert_eq!(file_id("startup.log"), file_id("startup.log"));
        assert_ne!(file_id("startup.log"), file_id("emergency.log"));
    }
}
