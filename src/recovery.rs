//! Best-effort recovery: read back every file the file table still lists,
//! tolerating individual failures rather than letting one corrupt file take
//! down the whole scan. Stands in for the extraction tooling a desktop
//! build would normally expose as a separate binary — this crate is
//! `no_std` and ships no CLI, so the same walk is exposed as a library
//! call instead.

use alloc::vec;
use alloc::vec::Vec;

use crate::crc::FileId;
use crate::error::PhylumResult;
use crate::file::File;
use crate::layout::{open_descriptor, FileTable};
use crate::storage::StorageBackend;

/// One file's recovered bytes, truncated to however much could actually be
/// read back before its chain ran out or its descriptor turned out to be
/// corrupt.
pub struct RecoveredFile {
    pub file_id: FileId,
    pub declared_length: u32,
    pub data: Vec<u8>,
}

/// Walks the file table and reads every live file's full content, logging
/// and skipping any entry that can't be opened or whose chain breaks
/// before reaching its declared length.
pub fn extract_all(storage: &mut dyn StorageBackend) -> PhylumResult<Vec<RecoveredFile>> {
    let table = FileTable::open(storage)?;
    let mut recovered = Vec::new();

    for descriptor in table.list(storage)? {
        match recover_one(storage, &descriptor) {
            Ok(data) => recovered.push(RecoveredFile {
                file_id: descriptor.file_id,
                declared_length: descriptor.length,
                data,
            }),
            Err(e) => log::warn!("skipping file {:#010x}, could not recover it: {}", descriptor.file_id, e),
        }
    }

    Ok(recovered)
}

fn recover_one(storage: &mut dyn StorageBackend, descriptor: &crate::layout::FileDescriptor) -> PhylumResult<Vec<u8>> {
    let mut file: alloc::boxed::Box<dyn File> = open_descriptor(descriptor)?;

    let mut data = vec![0u8; descriptor.length as usize];
    let mut read_total = 0usize;
    while read_total < data.len() {
        let n = file.read(storage, &mut data[read_total..])?;
        if n == 0 {
            break;
        }
        read_total += n;
    }
    data.truncate(read_total);
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::SequentialBlockAllocator;
    use crate::crc::file_id;
    use crate::file::SimpleFile;
    use crate::geometry::{Geometry, SECTOR_SIZE};
    use crate::layout::{FileDescriptor, WriteStrategy};
    use crate::storage::MemoryStorage;

    fn geometry() -> Geometry {
        Geometry::new(0, 32, 2, 2, SECTOR_SIZE).unwrap()
    }

    #[test]
    fn extract_all_recovers_a_simple_file() {
        let g = geometry();
        let mut storage = MemoryStorage::new(g);
        let mut allocator = SequentialBlockAllocator::new(8);
        let mut table = FileTable::format(&mut storage).unwrap();

        let mut writer = SimpleFile::create(&mut storage, 8, 1).unwrap();
        writer.write(&mut storage, &mut allocator, b"recovered contents", true, true).unwrap();
        writer.flush(&mut storage, &mut allocator).unwrap();

        let entry = FileDescriptor {
            file_id: file_id("notes.txt"),
            strategy: WriteStrategy::Simple.to_byte(),
            deleted: 0,
            reserved: [0; 2],
            head_block: 8,
            head_position: core::mem::size_of::<crate::block::BlockHead>() as u32,
            length: 19,
            version: 1,
            index_extent_start: u32::MAX,
            index_extent_blocks: 0,
            data_extent_start: u32::MAX,
            data_extent_blocks: 0,
        };
        table.append(&mut storage, &mut allocator, entry).unwrap();

        let recovered = extract_all(&mut storage).unwrap();
        assert_eq!(recovered.len(), 1);
        assert_eq!(&recovered[0].data, b"recovered contents");
    }
}
