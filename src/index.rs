//! Sparse file index: a fixed, contiguous extent of blocks holding
//! `(logical position, physical address)` records in increasing order, so a
//! seek can binary-search straight to the block containing a given byte
//! rather than walking the file's data chain from the start.
//!
//! Each index block's head carries the logical position of its first
//! record, which is what the outer binary search keys on; records within a
//! block are then scanned linearly since a block holds at most a few dozen
//! of them.

use alloc::vec;

use bytemuck::{Pod, Zeroable};

use crate::block::{BlockHead, BlockTail, BlockType, BLOCK_MAGIC};
use crate::error::{PhylumError, PhylumResult};
use crate::geometry::{BlockAddress, Geometry, BLOCK_INDEX_INVALID};
use crate::storage::StorageBackend;

/// Per-block header for an index extent block: the common [`BlockHead`]
/// plus the logical position of the first record this block holds.
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct IndexBlockHead {
    pub head: BlockHead,
    pub position: u32,
}

impl IndexBlockHead {
    fn fill(position: u32) -> Self {
        Self {
            head: BlockHead::fill(BlockType::Index, 0, 0, BLOCK_INDEX_INVALID),
            position,
        }
    }

    fn valid(&self) -> bool {
        self.head.valid()
    }
}

/// One entry: the byte at which a contiguous run of data starts, and where
/// that run lives on the device.
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct IndexRecord {
    pub position: u32,
    pub block: u32,
    pub byte_position: u32,
}

impl IndexRecord {
    const INVALID: IndexRecord = IndexRecord {
        position: u32::MAX,
        block: BLOCK_INDEX_INVALID,
        byte_position: 0,
    };

    fn is_valid(&self) -> bool {
        self.position != u32::MAX
    }
}

fn head_size() -> u32 {
    core::mem::size_of::<IndexBlockHead>() as u32
}

fn record_size() -> u32 {
    core::mem::size_of::<IndexRecord>() as u32
}

fn tail_size() -> u32 {
    core::mem::size_of::<BlockTail>() as u32
}

/// A file's sparse index: a fixed span of `extent_blocks` blocks starting at
/// `extent_start`, carved out at file-creation time by [`crate::layout`].
pub struct FileIndex {
    pub extent_start: u32,
    pub extent_blocks: u32,
    cursor: BlockAddress,
}

impl FileIndex {
    pub fn new(extent_start: u32, extent_blocks: u32) -> Self {
        Self {
            extent_start,
            extent_blocks,
            cursor: BlockAddress::INVALID,
        }
    }

    /// How many records fit in one index block, net of its head and tail.
    /// Exposed so [`crate::layout`] can size an index extent for a file's
    /// declared maximum size without duplicating this arithmetic.
    pub fn records_per_block(g: &Geometry) -> u32 {
        (g.block_size() - head_size() - tail_size()) / record_size()
    }

    /// Formats every block in the extent as empty, freshly-headed index
    /// blocks. Called once, when a file is created.
    pub fn format(&mut self, storage: &mut dyn StorageBackend) -> PhylumResult<()> {
        for offset in 0..self.extent_blocks {
            let block = self.extent_start + offset;
            storage.erase(block)?;
            let head = IndexBlockHead::fill(0);
            storage.write(BlockAddress::beginning_of_block(block), bytemuck::bytes_of(&head))?;
        }
        self.cursor = BlockAddress::new(self.extent_start, head_size());
        Ok(())
    }

    /// Reads the `position` field out of the head of extent block `offset`,
    /// or `u32::MAX` if that block has no records yet.
    fn block_starting_position(storage: &mut dyn StorageBackend, block: u32) -> PhylumResult<u32> {
        let mut buf = vec![0u8; head_size() as usize];
        storage.read(BlockAddress::beginning_of_block(block), &mut buf)?;
        let head: &IndexBlockHead = bytemuck::from_bytes(&buf);
        if !head.valid() {
            return Ok(u32::MAX);
        }
        Ok(head.position)
    }

    /// Binary-searches the extent for the block whose range of positions
    /// covers `target`, then scans that block's records for the entry with
    /// the greatest position not exceeding `target`.
    pub fn find(&self, storage: &mut dyn StorageBackend, target: u32) -> PhylumResult<IndexRecord> {
        let mut low = 0u32;
        let mut high = self.extent_blocks;
        let mut candidate_offset = None;

        while low < high {
            let mid = low + (high - low) / 2;
            let start = Self::block_starting_position(storage, self.extent_start + mid)?;
            if start == u32::MAX || start > target {
                high = mid;
            } else {
                candidate_offset = Some(mid);
                low = mid + 1;
            }
        }

        let offset = candidate_offset.ok_or(PhylumError::EndOfFile)?;
        let block = self.extent_start + offset;
        self.scan_block(storage, block, target)
    }

    fn scan_block(&self, storage: &mut dyn StorageBackend, block: u32, target: u32) -> PhylumResult<IndexRecord> {
        let g = storage.geometry();
        let mut addr = BlockAddress::new(block, head_size());
        let mut best = IndexRecord::INVALID;

        loop {
            if addr.remaining_in_block(&g).saturating_sub(tail_size()) < record_size() {
                break;
            }
            let mut buf = vec![0u8; record_size() as usize];
            storage.read(addr, &mut buf)?;
            let record: &IndexRecord = bytemuck::from_bytes(&buf);
            if !record.is_valid() || record.position > target {
                break;
            }
            best = *record;
            addr = addr.add(record_size());
        }

        if best.is_valid() {
            Ok(best)
        } else {
            Err(PhylumError::EndOfFile)
        }
    }

    /// Appends a new `(position, address)` record to the extent, updating
    /// the owning block's head if it's the first record that block has
    /// seen. Returns [`PhylumError::OutOfSpace`] once the whole extent is
    /// full — the caller must then grow the file into a larger extent.
    pub fn append(&mut self, storage: &mut dyn StorageBackend, position: u32, target: BlockAddress) -> PhylumResult<()> {
        let g = storage.geometry();
        if self.cursor == BlockAddress::INVALID {
            self.cursor = BlockAddress::new(self.extent_start, head_size());
        }

        if self.cursor.remaining_in_block(&g).saturating_sub(tail_size()) < record_size() {
            let next_block = self.cursor.block + 1;
            if next_block >= self.extent_start + self.extent_blocks {
                return Err(PhylumError::OutOfSpace);
            }
            self.cursor = BlockAddress::new(next_block, head_size());
        }

        if self.cursor.position == head_size() {
            let head = IndexBlockHead::fill(position);
            storage.write(BlockAddress::beginning_of_block(self.cursor.block), bytemuck::bytes_of(&head))?;
        }

        let record = IndexRecord {
            position,
            block: target.block,
            byte_position: target.position,
        };
        storage.write(self.cursor, bytemuck::bytes_of(&record))?;
        self.cursor = self.cursor.add(record_size());
        Ok(())
    }

    /// Rebuilds the extent from scratch given an ordered set of
    /// `(position, address)` pairs — used by garbage collection when a
    /// file's data blocks are compacted and every index entry needs new
    /// targets.
    pub fn reindex(&mut self, storage: &mut dyn StorageBackend, entries: &[(u32, BlockAddress)]) -> PhylumResult<()> {
        self.format(storage)?;
        for &(position, target) in entries {
            self.append(storage, position, target)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::SECTOR_SIZE;
    use crate::storage::MemoryStorage;

    fn geometry() -> Geometry {
        Geometry::new(0, 16, 2, 2, SECTOR_SIZE).unwrap()
    }

    #[test]
    fn find_returns_the_record_covering_a_position() {
        let g = geometry();
        let mut storage = MemoryStorage::new(g);
        let mut index = FileIndex::new(4, 2);
        index.format(&mut storage).unwrap();

        index.append(&mut storage, 0, BlockAddress::new(8, 0)).unwrap();
        index.append(&mut storage, 4096, BlockAddress::new(9, 0)).unwrap();
        index.append(&mut storage, 8192, BlockAddress::new(10, 0)).unwrap();

        let found = index.find(&mut storage, 5000).unwrap();
        assert_eq!(found.position, 4096);
        assert_eq!(found.block, 9);
    }

    #[test]
    fn find_before_any_record_fails() {
        let g = geometry();
        let mut storage = MemoryStorage::new(g);
        let mut index = FileIndex::new(4, 2);
        index.format(&mut storage).unwrap();
        index.append(&mut storage, 100, BlockAddress::new(8, 0)).unwrap();

        assert!(index.find(&mut storage, 50).is_err());
    }

    #[test]
    fn reindex_rebuilds_from_scratch() {
        let g = geometry();
        let mut storage = MemoryStorage::new(g);
        let mut index = FileIndex::new(4, 2);
        index.format(&mut storage).unwrap();
        index.append(&mut storage, 0, BlockAddress::new(8, 0)).unwrap();

        index
            .reindex(&mut storage, &[(0, BlockAddress::new(11, 0)), (512, BlockAddress::new(12, 0))])
            .unwrap();

        let found = index.find(&mut storage, 600).unwrap();
        assert_eq!(found.block, 12);
    }
}
