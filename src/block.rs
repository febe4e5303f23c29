//! Block layout: sector heads, block tails, and the machinery that chains
//! blocks together as a typed entry log fills them up.
//!
//! A block carries a [`BlockHead`] at its first bytes and a type-specific
//! tail in its last sector. [`BlockLayout`] is the generic "append a
//! sequence of same-typed entries, chaining to a fresh block when the
//! current one fills" engine that every higher-level log (file index, tree
//! node storage, file table) is built on. Callers plug in their own head/tail
//! byte encoding via [`BlockFormat`], since each block type carries different
//! extra fields alongside the common ones.

use alloc::vec;
use alloc::vec::Vec;

use bytemuck::{Pod, Zeroable};

use crate::allocator::BlockAllocator;
use crate::error::{PhylumError, PhylumResult};
use crate::geometry::{BlockAddress, Geometry, BLOCK_INDEX_INVALID};
use crate::storage::StorageBackend;

/// The closed set of block types. Represented on disk as a single byte
/// wrapped in [`BlockTypeTag`] rather than a bare Rust `enum`, since every
/// bit pattern must round-trip through `bytemuck::Pod`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockType {
    Anchor,
    SuperBlockLink,
    SuperBlock,
    Journal,
    File,
    Leaf,
    Index,
    Free,
    Error,
    Unallocated,
}

/// On-disk encoding of [`BlockType`]. Any byte value not matching a known
/// type decodes as `None`, which is what makes an erased block's header
/// (`0xFF` bytes) fail [`BlockHead::valid`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
#[repr(transparent)]
pub struct BlockTypeTag(pub u8);

impl BlockTypeTag {
    pub fn of(block_type: BlockType) -> Self {
        Self(match block_type {
            BlockType::Anchor => 1,
            BlockType::SuperBlockLink => 2,
            BlockType::SuperBlock => 3,
            BlockType::Journal => 4,
            BlockType::File => 5,
            BlockType::Leaf => 6,
            BlockType::Index => 7,
            BlockType::Free => 8,
            BlockType::Error => 9,
            BlockType::Unallocated => 10,
        })
    }

    pub fn kind(&self) -> Option<BlockType> {
        Some(match self.0 {
            1 => BlockType::Anchor,
            2 => BlockType::SuperBlockLink,
            3 => BlockType::SuperBlock,
            4 => BlockType::Journal,
            5 => BlockType::File,
            6 => BlockType::Leaf,
            7 => BlockType::Index,
            8 => BlockType::Free,
            9 => BlockType::Error,
            10 => BlockType::Unallocated,
            _ => return None,
        })
    }
}

/// `"phylum00"` followed by a NUL, 9 bytes, present at the start of every
/// written block.
pub const BLOCK_MAGIC: [u8; 9] = *b"phylum00\0";

/// Common head carried by every block, regardless of type. Type-specific
/// fields (file-id, version, indexed position...) are appended after this
/// by composition, matching the per-type suffix the external format
/// describes.
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct BlockHead {
    pub magic: [u8; 9],
    pub block_type: BlockTypeTag,
    pub reserved: [u8; 2],
    pub age: u32,
    pub timestamp: u32,
    pub linked_block: u32,
}

impl BlockHead {
    pub fn fill(block_type: BlockType, age: u32, timestamp: u32, linked_block: u32) -> Self {
        Self {
            magic: BLOCK_MAGIC,
            block_type: BlockTypeTag::of(block_type),
            reserved: [0; 2],
            age,
            timestamp,
            linked_block,
        }
    }

    pub fn valid(&self) -> bool {
        self.magic == BLOCK_MAGIC && self.block_type.kind().is_some()
    }
}

/// Common tail carried by every chained block: just the forward link.
/// Type-specific tails wrap this the same way type-specific heads wrap
/// [`BlockHead`].
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct BlockTail {
    pub linked_block: u32,
}

/// Describes how a particular block-typed log encodes its head and tail, so
/// [`BlockLayout`] can stay generic over the entry type it's chaining.
pub trait BlockFormat {
    fn block_type(&self) -> BlockType;
    fn head_size(&self) -> u32;
    fn tail_size(&self) -> u32;
    fn make_head(&self, age: u32, timestamp: u32, linked_block: u32) -> Vec<u8>;
    fn make_tail(&self, linked_block: u32) -> Vec<u8>;
}

/// Appends same-typed entries through a chain of blocks, allocating and
/// linking fresh blocks as the current one fills.
pub struct BlockLayout<F: BlockFormat> {
    pub format: F,
    pub address: BlockAddress,
    pub timestamp: u32,
}

impl<F: BlockFormat> BlockLayout<F> {
    /// `address` must already point past a written, valid head (the first
    /// block of a chain is the caller's responsibility to format, exactly
    /// as `FileLayout::format` formats the first block of each file).
    pub fn new(format: F, address: BlockAddress, timestamp: u32) -> Self {
        Self {
            format,
            address,
            timestamp,
        }
    }

    /// Erases `block` and writes a fresh head there, returning the address
    /// just past the head where the first entry belongs.
    pub fn write_head(
        &self,
        storage: &mut dyn StorageBackend,
        age: u32,
        block: u32,
        linked_block: u32,
    ) -> PhylumResult<BlockAddress> {
        storage.erase(block)?;
        let bytes = self.format.make_head(age, self.timestamp, linked_block);
        storage.write(BlockAddress::beginning_of_block(block), &bytes)?;
        Ok(BlockAddress::new(block, self.format.head_size()))
    }

    fn write_tail(
        &self,
        storage: &mut dyn StorageBackend,
        block: u32,
        linked_block: u32,
    ) -> PhylumResult<()> {
        let bytes = self.format.make_tail(linked_block);
        let addr = BlockAddress::tail_data_of(&storage.geometry(), block, bytes.len() as u32);
        storage.write(addr, &bytes)
    }

    /// Computes the address at which `required` bytes can be written,
    /// allocating and linking a fresh block first if the current one
    /// cannot hold them ahead of its reserved tail slot.
    pub fn find_available(
        &mut self,
        storage: &mut dyn StorageBackend,
        allocator: &mut dyn BlockAllocator,
        required: u32,
    ) -> PhylumResult<BlockAddress> {
        let g = storage.geometry();
        let tail_size = self.format.tail_size();
        let remaining_before_tail = self
            .address
            .remaining_in_block(&g)
            .saturating_sub(tail_size);

        if remaining_before_tail < required {
            let allocated = allocator.allocate(storage, self.format.block_type())?;
            let previous = self.address.block;
            self.write_tail(storage, previous, allocated.block)?;
            self.address = self.write_head(storage, allocated.age, allocated.block, previous)?;
        }

        let room = self.address.find_room(&g, required)?;
        self.address = room;
        Ok(room)
    }

    /// Writes `entry` at the next available position, chaining blocks as
    /// needed, and advances the append cursor.
    pub fn append(
        &mut self,
        storage: &mut dyn StorageBackend,
        allocator: &mut dyn BlockAllocator,
        entry: &[u8],
    ) -> PhylumResult<BlockAddress> {
        let addr = self.find_available(storage, allocator, entry.len() as u32)?;
        storage.write(addr, entry)?;
        self.address = addr.add(entry.len() as u32);
        Ok(addr)
    }

    /// Terminates the chain by writing a tail with `linked_block = INVALID`
    /// at the current block, so readers always know where the log ends.
    pub fn terminate(&self, storage: &mut dyn StorageBackend) -> PhylumResult<()> {
        self.write_tail(storage, self.address.block, BLOCK_INDEX_INVALID)
    }
}

/// Walks a chain of blocks starting at `start_block`, scanning forward from
/// each block's head for entries matching `valid`, and returns the address
/// of the first invalid (or out-of-room) entry — the chain's logical end.
/// The tail's `linked_block` is read from its last four bytes, which every
/// tail format in this crate reserves for that purpose.
pub fn find_end<E: Pod + Zeroable>(
    storage: &mut dyn StorageBackend,
    head_size: u32,
    tail_size: u32,
    start_block: u32,
    valid: impl Fn(&E) -> bool,
) -> PhylumResult<BlockAddress> {
    let entry_size = core::mem::size_of::<E>() as u32;
    let mut block = start_block;

    loop {
        let g = storage.geometry();
        let mut addr = BlockAddress::new(block, head_size);
        let mut end_of_valid = addr;

        loop {
            if addr.remaining_in_block(&g).saturating_sub(tail_size) < entry_size {
                break;
            }
            let mut buf = vec![0u8; entry_size as usize];
            storage.read(addr, &mut buf)?;
            let entry: &E = bytemuck::from_bytes(&buf);
            if !valid(entry) {
                return Ok(addr);
            }
            addr = addr.add(entry_size);
            end_of_valid = addr;
        }

        let tail_addr = BlockAddress::tail_data_of(&g, block, tail_size);
        let mut tail_buf = vec![0u8; tail_size as usize];
        storage.read(tail_addr, &mut tail_buf)?;
        let linked = u32::from_le_bytes(
            tail_buf[tail_buf.len() - 4..]
                .try_into()
                .map_err(|_| PhylumError::Corruption)?,
        );

        if linked == BLOCK_INDEX_INVALID {
            return Ok(end_of_valid);
        }
        block = linked;
    }
}

/// The simplest [`BlockFormat`]: a generic head/tail with no per-type
/// suffix, used by index blocks and other plain record logs.
pub struct PlainBlockFormat {
    pub block_type: BlockType,
}

impl BlockFormat for PlainBlockFormat {
    fn block_type(&self) -> BlockType {
        self.block_type
    }

    fn head_size(&self) -> u32 {
        core::mem::size_of::<BlockHead>() as u32
    }

    fn tail_size(&self) -> u32 {
        core::mem::size_of::<BlockTail>() as u32
    }

    fn make_head(&self, age: u32, timestamp: u32, linked_block: u32) -> Vec<u8> {
        bytemuck::bytes_of(&BlockHead::fill(self.block_type, age, timestamp, linked_block)).to_vec()
    }

    fn make_tail(&self, linked_block: u32) -> Vec<u8> {
        bytemuck::bytes_of(&BlockTail { linked_block }).to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::SequentialBlockAllocator;
    use crate::geometry::SECTOR_SIZE;
    use crate::storage::MemoryStorage;

    fn geometry() -> Geometry {
        Geometry::new(0, 8, 2, 2, SECTOR_SIZE).unwrap()
    }

    #[derive(Clone, Copy, Pod, Zeroable)]
    #[repr(C)]
    struct Entry {
        value: u32,
    }

    #[test]
    fn head_round_trips_through_bytes() {
        let head = BlockHead::fill(BlockType::Index, 3, 7, 42);
        assert!(head.valid());
        let bytes = bytemuck::bytes_of(&head);
        let decoded: &BlockHead = bytemuck::from_bytes(bytes);
        assert_eq!(decoded.age, 3);
        assert_eq!(decoded.linked_block, 42);
    }

    #[test]
    fn erased_block_head_is_invalid() {
        let erased = [0xFFu8; core::mem::size_of::<BlockHead>()];
        let decoded: &BlockHead = bytemuck::from_bytes(&erased);
        assert!(!decoded.valid());
    }

    #[test]
    fn append_chains_to_a_fresh_block_when_full() {
        let g = geometry();
        let mut storage = MemoryStorage::new(g);
        let mut allocator = SequentialBlockAllocator::new(3);

        let format = PlainBlockFormat {
            block_type: BlockType::Index,
        };
        let head_size = format.head_size();
        let mut layout = BlockLayout::new(format, BlockAddress::default(), 0);
        let first_head = layout.write_head(&mut storage, 0, 3, BLOCK_INDEX_INVALID).unwrap();
        layout.address = first_head;
        assert_eq!(layout.address.position, head_size);

        let block_size = g.block_size();
        let entry_size = core::mem::size_of::<Entry>() as u32;
        let tail_size = core::mem::size_of::<BlockTail>() as u32;
        let capacity_in_first_block =
            (block_size - head_size - tail_size) / entry_size;

        let mut last_block = 3;
        for i in 0..capacity_in_first_block + 1 {
            let addr = layout.append(&mut storage, &mut allocator, bytemuck::bytes_of(&Entry { value: i })).unwrap();
            last_block = addr.block;
        }
        assert_eq!(last_block, 4, "should have chained into the second allocated block");
    }
}
