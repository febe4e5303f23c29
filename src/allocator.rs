//! Block allocation: a sequential cursor for formatting, and an age-aware
//! reusable allocator that levels wear by always handing out the least-aged
//! free block.

use alloc::vec;
use alloc::vec::Vec;

use crate::block::{BlockHead, BlockType};
use crate::error::{PhylumError, PhylumResult};
use crate::geometry::{BlockAddress, Geometry, BLOCK_INDEX_INVALID};
use crate::storage::StorageBackend;

/// First three blocks are permanently reserved: 0 is the file table, 1 and 2
/// are the wandering superblock's anchors.
pub const RESERVED_BLOCKS: u32 = 3;

/// Result of a successful allocation.
#[derive(Clone, Copy, Debug)]
pub struct AllocatedBlock {
    pub block: u32,
    pub age: u32,
    pub erased: bool,
}

/// Common interface both allocator variants share. Takes the storage
/// backend explicitly (rather than holding a reference internally) so a
/// single allocator can be shared by code that also holds the storage
/// reference momentarily — calls never overlap, since the whole crate is
/// single-threaded and non-reentrant by design.
pub trait BlockAllocator {
    fn allocate(
        &mut self,
        storage: &mut dyn StorageBackend,
        block_type: BlockType,
    ) -> PhylumResult<AllocatedBlock>;

    fn free(&mut self, storage: &mut dyn StorageBackend, block: u32, age: u32) -> PhylumResult<()>;
}

/// Hands out blocks in linear order from a cursor. Used at format time,
/// where every block is known to be fresh, and in tests.
pub struct SequentialBlockAllocator {
    next: u32,
}

impl SequentialBlockAllocator {
    pub fn new(starting_block: u32) -> Self {
        Self { next: starting_block }
    }
}

impl BlockAllocator for SequentialBlockAllocator {
    fn allocate(
        &mut self,
        _storage: &mut dyn StorageBackend,
        _block_type: BlockType,
    ) -> PhylumResult<AllocatedBlock> {
        let block = self.next;
        self.next += 1;
        Ok(AllocatedBlock {
            block,
            age: 0,
            erased: false,
        })
    }

    fn free(&mut self, _storage: &mut dyn StorageBackend, _block: u32, _age: u32) -> PhylumResult<()> {
        Ok(())
    }
}

/// Bitmap of blocks known to be reachable from live filesystem structures.
/// The reclaimer uses this to decide which "taken" blocks are actually
/// garbage: any block the bitmap marks taken, but that isn't in this
/// tracker, gets erased and returned to the free pool.
pub struct TakenBlockTracker {
    taken: Vec<bool>,
}

impl TakenBlockTracker {
    pub fn new(number_of_blocks: u32) -> Self {
        let mut taken = vec![false; number_of_blocks as usize];
        for reserved in 0..RESERVED_BLOCKS.min(number_of_blocks) {
            taken[reserved as usize] = true;
        }
        Self { taken }
    }

    pub fn mark(&mut self, block: u32) {
        if let Some(slot) = self.taken.get_mut(block as usize) {
            *slot = true;
        }
    }

    pub fn is_free(&self, block: u32) -> bool {
        self.taken.get(block as usize).map(|&t| !t).unwrap_or(false)
    }
}

/// Age-aware, bitmap-backed allocator that reconstructs its free/taken map
/// by scanning the device once at `initialize`.
pub struct ReusableBlockAllocator {
    geometry: Geometry,
    taken: Vec<bool>,
}

impl ReusableBlockAllocator {
    pub fn new(geometry: Geometry) -> Self {
        let taken = vec![false; geometry.number_of_blocks as usize];
        Self { geometry, taken }
    }

    fn is_block_free(&self, block: u32) -> bool {
        self.taken.get(block as usize).map(|&t| !t).unwrap_or(false)
    }

    fn set_taken(&mut self, block: u32, taken: bool) {
        if let Some(slot) = self.taken.get_mut(block as usize) {
            *slot = taken;
        }
    }

    fn read_head(storage: &mut dyn StorageBackend, block: u32) -> PhylumResult<BlockHead> {
        let mut buf = vec![0u8; core::mem::size_of::<BlockHead>()];
        storage.read(BlockAddress::beginning_of_block(block), &mut buf)?;
        Ok(*bytemuck::from_bytes(&buf))
    }

    /// Scans every block (except the reserved anchors/file-table) once,
    /// classifying it taken or free from its head, and tracking the
    /// lowest age seen among free blocks, first-seen wins on ties.
    pub fn initialize(&mut self, storage: &mut dyn StorageBackend) -> PhylumResult<()> {
        for block in RESERVED_BLOCKS..self.geometry.number_of_blocks {
            let head = Self::read_head(storage, block)?;
            let taken = head.valid() && head.block_type.kind() != Some(BlockType::Unallocated);
            self.set_taken(block, taken);
        }
        for reserved in 0..RESERVED_BLOCKS.min(self.geometry.number_of_blocks) {
            self.set_taken(reserved, true);
        }
        Ok(())
    }

    fn scan_for_lowest_age(&self, storage: &mut dyn StorageBackend) -> PhylumResult<Option<(u32, u32)>> {
        let mut best: Option<(u32, u32)> = None;
        for block in RESERVED_BLOCKS..self.geometry.number_of_blocks {
            if !self.is_block_free(block) {
                continue;
            }
            let head = Self::read_head(storage, block)?;
            let age = if head.valid() { head.age } else { 0 };
            match best {
                Some((_, best_age)) if age >= best_age => {}
                _ => best = Some((block, age)),
            }
        }
        Ok(best)
    }
}

impl BlockAllocator for ReusableBlockAllocator {
    fn allocate(
        &mut self,
        storage: &mut dyn StorageBackend,
        _block_type: BlockType,
    ) -> PhylumResult<AllocatedBlock> {
        let (block, age) = self
            .scan_for_lowest_age(storage)?
            .ok_or(PhylumError::OutOfSpace)?;
        self.set_taken(block, true);
        Ok(AllocatedBlock {
            block,
            age,
            erased: false,
        })
    }

    fn free(&mut self, storage: &mut dyn StorageBackend, block: u32, _age: u32) -> PhylumResult<()> {
        let old = Self::read_head(storage, block)?;
        let next_age = if old.valid() { old.age + 1 } else { 0 };
        storage.erase(block)?;
        let fresh = BlockHead::fill(BlockType::Unallocated, next_age, 0, BLOCK_INDEX_INVALID);
        storage.write(BlockAddress::beginning_of_block(block), bytemuck::bytes_of(&fresh))?;
        self.set_taken(block, false);
        Ok(())
    }
}

/// Hands out blocks from a fixed circular range rather than the free pool,
/// used by rolling files whose data extent is carved once at format time and
/// never grows. Wrapping back to `start` is the signal a rolling file reads
/// to start a fresh index generation.
pub struct ExtentCursorAllocator {
    start: u32,
    blocks: u32,
    next_offset: u32,
    last_offset: Option<u32>,
}

impl ExtentCursorAllocator {
    /// `from_offset` is the extent-relative offset of the next block this
    /// allocator should hand out.
    pub fn new(start: u32, blocks: u32, from_offset: u32) -> Self {
        let blocks = blocks.max(1);
        Self {
            start,
            blocks,
            next_offset: from_offset % blocks,
            last_offset: None,
        }
    }

    /// True if the most recent `allocate()` handed out the extent's first
    /// block, i.e. the chain just wrapped and a fresh index generation
    /// should start.
    pub fn at_extent_start(&self) -> bool {
        self.last_offset == Some(0)
    }

    /// The extent's first block, i.e. the address a wrap lands back on.
    pub fn start(&self) -> u32 {
        self.start
    }
}

impl BlockAllocator for ExtentCursorAllocator {
    fn allocate(&mut self, _storage: &mut dyn StorageBackend, _block_type: BlockType) -> PhylumResult<AllocatedBlock> {
        let offset = self.next_offset;
        let block = self.start + offset;
        self.next_offset = (offset + 1) % self.blocks;
        self.last_offset = Some(offset);
        Ok(AllocatedBlock {
            block,
            age: 0,
            erased: false,
        })
    }

    fn free(&mut self, _storage: &mut dyn StorageBackend, _block: u32, _age: u32) -> PhylumResult<()> {
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
    fn allocate_picks_lowest_age_free_block() {
        let g = geometry();
        let mut storage = MemoryStorage::new(g);
        let mut allocator = ReusableBlockAllocator::new(g);
        allocator.initialize(&mut storage).unwrap();

        let first = allocator.allocate(&mut storage, BlockType::File).unwrap();
        assert_eq!(first.block, RESERVED_BLOCKS);

        allocator.free(&mut storage, first.block, first.age).unwrap();
        let second = allocator.allocate(&mut storage, BlockType::File).unwrap();
        assert_eq!(second.block, RESERVED_BLOCKS, "freed block should be reused");
        assert_eq!(second.age, first.age + 1, "age must monotonically increase");
    }

    #[test]
    fn reserved_blocks_are_never_allocated() {
        let g = geometry();
        let mut storage = MemoryStorage::new(g);
        let mut allocator = ReusableBlockAllocator::new(g);
        allocator.initialize(&mut storage).unwrap();
        for _ in 0..(g.number_of_blocks - RESERVED_BLOCKS) {
            let allocated = allocator.allocate(&mut storage, BlockType::File).unwrap();
            assert!(allocated.block >= RESERVED_BLOCKS);
        }
        assert!(allocator.allocate(&mut storage, BlockType::File).is_err());
    }

    #[test]
    fn extent_cursor_wraps_and_reports_it() {
        let g = geometry();
        let mut storage = MemoryStorage::new(g);
        let mut cursor = ExtentCursorAllocator::new(8, 3, 1);

        let a = cursor.allocate(&mut storage, BlockType::File).unwrap();
        assert_eq!(a.block, 9);
        assert!(!cursor.at_extent_start());

        let b = cursor.allocate(&mut storage, BlockType::File).unwrap();
        assert_eq!(b.block, 10);
        assert!(!cursor.at_extent_start());

        let c = cursor.allocate(&mut storage, BlockType::File).unwrap();
        assert_eq!(c.block, 8, "should wrap back to the extent start");
        assert!(cursor.at_extent_start());
    }
}
