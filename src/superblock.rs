//! Wandering superblock: anchor blocks 1 and 2 alternate as the fixed,
//! always-at-a-known-address root of the filesystem, each pointing through a
//! short chain of [`BlockType::SuperBlockLink`] blocks at the live
//! [`SuperBlock`] payload. Every write moves one step further along its
//! chain rather than overwriting in place, so a power failure mid-write
//! never destroys the previous, still-valid generation.
//!
//! Mounting means walking: read whichever anchor carries the newer
//! timestamp, follow `chained_block` for `chain_length` hops, and land on
//! the payload. Saving means the reverse: try to advance one sector within
//! the payload's own block; if that block is full, allocate a fresh one and
//! push the update up to the link one level closer to the anchor; if an
//! anchor block itself fills, alternate to the other anchor.

use alloc::vec;
use alloc::vec::Vec;

use bytemuck::{Pod, Zeroable};

use crate::allocator::BlockAllocator;
use crate::block::{BlockHead, BlockType, BlockTypeTag, BLOCK_MAGIC};
use crate::error::{PhylumError, PhylumResult};
use crate::geometry::{BlockAddress, SectorAddress, BLOCK_INDEX_INVALID};
use crate::storage::StorageBackend;

/// The two fixed blocks every mount starts from. Never reallocated, never
/// chosen by the general-purpose allocator (see `RESERVED_BLOCKS`).
pub const ANCHOR_BLOCKS: [u32; 2] = [1, 2];

/// Number of hops a reader must follow from the newest anchor to reach the
/// live [`SuperBlock`] payload, absent any contrary configuration.
pub const DEFAULT_CHAIN_LENGTH: u32 = 2;

/// An intermediate hop in the wandering chain: carries a timestamp (so a
/// reader comparing several candidate sectors within a block can tell which
/// is newest) and a forward pointer to the next block in the chain.
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct SuperBlockLink {
    pub magic: [u8; 9],
    pub block_type: BlockTypeTag,
    pub reserved: [u8; 2],
    pub timestamp: u32,
    pub chained_block: u32,
}

impl SuperBlockLink {
    fn fill(block_type: BlockType, timestamp: u32, chained_block: u32) -> Self {
        Self {
            magic: BLOCK_MAGIC,
            block_type: BlockTypeTag::of(block_type),
            reserved: [0; 2],
            timestamp,
            chained_block,
        }
    }

    fn valid(&self) -> bool {
        self.magic == BLOCK_MAGIC && self.block_type.kind().is_some()
    }
}

/// The filesystem-wide state that survives a remount: the allocator's wear
/// bookkeeping, the garbage collector's progress, and the roots of the
/// tree, journal, and free list. Mirrors the field list carried by every
/// wandering superblock payload.
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct SuperBlock {
    pub last_gc: u32,
    pub tree_block: u32,
    pub tree_position: u32,
    pub journal_block: u32,
    pub free_block: u32,
    pub leaf_block: u32,
    pub leaf_position: u32,
    pub index_block: u32,
    pub index_position: u32,
}

impl SuperBlock {
    pub fn tree_root(&self) -> BlockAddress {
        BlockAddress::new(self.tree_block, self.tree_position)
    }

    pub fn leaf(&self) -> BlockAddress {
        BlockAddress::new(self.leaf_block, self.leaf_position)
    }

    pub fn index(&self) -> BlockAddress {
        BlockAddress::new(self.index_block, self.index_position)
    }
}

/// One block in the path from an anchor down to the live payload. The
/// first entry is always an anchor, the last is always the payload block;
/// entries in between, if any, are [`SuperBlockLink`] blocks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Level {
    Anchor,
    Link,
    Payload,
}

struct Hop {
    block: u32,
    sector: u16,
    level: Level,
}

/// Finds the live superblock by walking from the anchors, and moves it
/// forward one step at a time as new generations are saved.
pub struct WanderingBlockManager {
    chain_length: u32,
    anchor_index: usize,
    path: Vec<Hop>,
    timestamp: u32,
}

impl WanderingBlockManager {
    pub fn new(chain_length: u32) -> Self {
        Self {
            chain_length: chain_length.max(1),
            anchor_index: 0,
            path: Vec::new(),
            timestamp: 0,
        }
    }

    fn head_size() -> usize {
        core::mem::size_of::<BlockHead>()
    }

    fn payload_entry_size() -> usize {
        Self::head_size() + core::mem::size_of::<SuperBlock>()
    }

    /// Scans every sector of `block` for the newest valid [`SuperBlockLink`],
    /// stopping as soon as it hits an unwritten (erased) sector — links are
    /// always written in order, so the first invalid sector marks the end.
    fn find_link(storage: &mut dyn StorageBackend, block: u32) -> PhylumResult<Option<(u16, SuperBlockLink)>> {
        let g = storage.geometry();
        let size = core::mem::size_of::<SuperBlockLink>();
        let mut best: Option<(u16, SuperBlockLink)> = None;
        for sector in 0..g.sectors_per_block() as u16 {
            let addr = BlockAddress::new(block, sector as u32 * g.sector_size);
            let mut buf = vec![0u8; size];
            storage.read(addr, &mut buf)?;
            let link: &SuperBlockLink = bytemuck::from_bytes(&buf);
            if !link.valid() {
                break;
            }
            if best.map(|(_, b)| link.timestamp > b.timestamp).unwrap_or(true) {
                best = Some((sector, *link));
            }
        }
        Ok(best)
    }

    /// Scans every sector of `block` for the newest valid superblock payload.
    fn find_super(storage: &mut dyn StorageBackend, block: u32) -> PhylumResult<Option<(u16, SuperBlock)>> {
        let g = storage.geometry();
        let entry = Self::payload_entry_size();
        let head_size = Self::head_size();
        let mut best: Option<(u16, u32, SuperBlock)> = None;
        for sector in 0..g.sectors_per_block() as u16 {
            let addr = BlockAddress::new(block, sector as u32 * g.sector_size);
            let mut buf = vec![0u8; entry];
            storage.read(addr, &mut buf)?;
            let head: &BlockHead = bytemuck::from_bytes(&buf[..head_size]);
            if !head.valid() || head.block_type.kind() != Some(BlockType::SuperBlock) {
                break;
            }
            let payload: &SuperBlock = bytemuck::from_bytes(&buf[head_size..]);
            if best.map(|(_, t, _)| head.timestamp > t).unwrap_or(true) {
                best = Some((sector, head.timestamp, *payload));
            }
        }
        Ok(best.map(|(sector, _, payload)| (sector, payload)))
    }

    /// Walks from the newest anchor down to the live payload, recording the
    /// path taken so [`Self::save`] knows where to resume.
    fn walk(&mut self, storage: &mut dyn StorageBackend) -> PhylumResult<SuperBlock> {
        let mut best: Option<(usize, u32, u16, SuperBlockLink)> = None;
        for (index, &anchor) in ANCHOR_BLOCKS.iter().enumerate() {
            if let Some((sector, link)) = Self::find_link(storage, anchor)? {
                if best.map(|(_, _, _, b)| link.timestamp > b.timestamp).unwrap_or(true) {
                    best = Some((index, anchor, sector, link));
                }
            }
        }
        let (anchor_index, anchor_block, anchor_sector, mut link) = best.ok_or(PhylumError::Corruption)?;

        let mut path = vec![Hop {
            block: anchor_block,
            sector: anchor_sector,
            level: Level::Anchor,
        }];

        for _ in 0..self.chain_length.saturating_sub(1) {
            let next = link.chained_block;
            if next == BLOCK_INDEX_INVALID {
                return Err(PhylumError::Corruption);
            }
            let (sector, next_link) = Self::find_link(storage, next)?.ok_or(PhylumError::Corruption)?;
            path.push(Hop {
                block: next,
                sector,
                level: Level::Link,
            });
            link = next_link;
        }

        let payload_block = link.chained_block;
        if payload_block == BLOCK_INDEX_INVALID {
            return Err(PhylumError::Corruption);
        }
        let (sector, payload) = Self::find_super(storage, payload_block)?.ok_or(PhylumError::Corruption)?;
        path.push(Hop {
            block: payload_block,
            sector,
            level: Level::Payload,
        });

        self.anchor_index = anchor_index;
        self.path = path;
        self.timestamp = link.timestamp.max(self.timestamp);
        Ok(payload)
    }

    /// Mounts an existing filesystem: walks the chain and returns the live
    /// payload.
    pub fn locate(&mut self, storage: &mut dyn StorageBackend) -> PhylumResult<SuperBlock> {
        self.walk(storage)
    }

    /// Address the live superblock currently occupies, valid only after
    /// [`Self::locate`], [`Self::create`] or [`Self::save`] has run.
    pub fn location(&self) -> SectorAddress {
        self.path
            .last()
            .map(|hop| SectorAddress {
                block: hop.block,
                sector: hop.sector,
            })
            .unwrap_or(SectorAddress::INVALID)
    }

    /// Formats a fresh chain: one payload block, `chain_length - 1`
    /// intermediate link blocks, and both anchors pointing at the new chain.
    pub fn create(
        &mut self,
        storage: &mut dyn StorageBackend,
        allocator: &mut dyn BlockAllocator,
        payload: SuperBlock,
    ) -> PhylumResult<SectorAddress> {
        let payload_block = allocator.allocate(storage, BlockType::SuperBlock)?.block;
        storage.erase(payload_block)?;
        let head = BlockHead::fill(BlockType::SuperBlock, 0, 0, BLOCK_INDEX_INVALID);
        let mut bytes = bytemuck::bytes_of(&head).to_vec();
        bytes.extend_from_slice(bytemuck::bytes_of(&payload));
        storage.write(BlockAddress::beginning_of_block(payload_block), &bytes)?;

        let mut chained = payload_block;
        for _ in 0..self.chain_length.saturating_sub(1) {
            let block = allocator.allocate(storage, BlockType::SuperBlockLink)?.block;
            storage.erase(block)?;
            let link = SuperBlockLink::fill(BlockType::SuperBlockLink, 0, chained);
            storage.write(BlockAddress::beginning_of_block(block), bytemuck::bytes_of(&link))?;
            chained = block;
        }

        for &anchor in &ANCHOR_BLOCKS {
            storage.erase(anchor)?;
            let link = SuperBlockLink::fill(BlockType::Anchor, 0, chained);
            storage.write(BlockAddress::beginning_of_block(anchor), bytemuck::bytes_of(&link))?;
        }

        self.timestamp = 0;
        self.walk(storage)?;
        Ok(self.location())
    }

    /// Persists a new generation of `payload`, advancing one sector within
    /// the current payload block, cascading a fresh block (and a link
    /// update one level up) when it's full, and alternating anchors when
    /// even the anchor level is full.
    pub fn save(
        &mut self,
        storage: &mut dyn StorageBackend,
        allocator: &mut dyn BlockAllocator,
        payload: SuperBlock,
    ) -> PhylumResult<SectorAddress> {
        if self.path.is_empty() {
            return Err(PhylumError::Invariant);
        }
        self.timestamp += 1;

        let head = BlockHead::fill(BlockType::SuperBlock, 0, self.timestamp, BLOCK_INDEX_INVALID);
        let mut value = bytemuck::bytes_of(&head).to_vec();
        value.extend_from_slice(bytemuck::bytes_of(&payload));

        let g = storage.geometry();
        let mut level = self.path.len() - 1;

        loop {
            let hop = &self.path[level];
            let next_sector = hop.sector + 1;

            if (next_sector as u32) < g.sectors_per_block() {
                let addr = BlockAddress::new(hop.block, next_sector as u32 * g.sector_size);
                storage.write(addr, &value)?;
                self.path[level].sector = next_sector;
                break;
            }

            if level == 0 {
                let other = ANCHOR_BLOCKS[1 - self.anchor_index];
                storage.erase(other)?;
                storage.write(BlockAddress::beginning_of_block(other), &value)?;
                self.anchor_index = 1 - self.anchor_index;
                self.path[0] = Hop {
                    block: other,
                    sector: 0,
                    level: Level::Anchor,
                };
                break;
            }

            let block_type = if self.path[level].level == Level::Payload {
                BlockType::SuperBlock
            } else {
                BlockType::SuperBlockLink
            };
            let allocated = allocator.allocate(storage, block_type)?;
            storage.erase(allocated.block)?;
            storage.write(BlockAddress::beginning_of_block(allocated.block), &value)?;
            let stale = self.path[level].block;
            self.path[level] = Hop {
                block: allocated.block,
                sector: 0,
                level: self.path[level].level,
            };
            allocator.free(storage, stale, allocated.age)?;

            let link = SuperBlockLink::fill(BlockType::SuperBlockLink, self.timestamp, allocated.block);
            value = bytemuck::bytes_of(&link).to_vec();
            level -= 1;
        }

        Ok(self.location())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::ReusableBlockAllocator;
    use crate::geometry::{Geometry, SECTOR_SIZE};
    use crate::storage::MemoryStorage;

    fn geometry() -> Geometry {
        Geometry::new(0, 16, 2, 2, SECTOR_SIZE).unwrap()
    }

    fn fresh_payload(tag: u32) -> SuperBlock {
        SuperBlock {
            last_gc: tag,
            tree_block: BLOCK_INDEX_INVALID,
            tree_position: 0,
            journal_block: BLOCK_INDEX_INVALID,
            free_block: BLOCK_INDEX_INVALID,
            leaf_block: BLOCK_INDEX_INVALID,
            leaf_position: 0,
            index_block: BLOCK_INDEX_INVALID,
            index_position: 0,
        }
    }

    #[test]
    fn create_then_locate_round_trips() {
        let g = geometry();
        let mut storage = MemoryStorage::new(g);
        let mut allocator = ReusableBlockAllocator::new(g);
        allocator.initialize(&mut storage).unwrap();

        let mut manager = WanderingBlockManager::new(DEFAULT_CHAIN_LENGTH);
        manager.create(&mut storage, &mut allocator, fresh_payload(1)).unwrap();

        let mut fresh = WanderingBlockManager::new(DEFAULT_CHAIN_LENGTH);
        let found = fresh.locate(&mut storage).unwrap();
        assert_eq!(found.last_gc, 1);
    }

    #[test]
    fn save_advances_without_reallocating_until_block_fills() {
        let g = geometry();
        let mut storage = MemoryStorage::new(g);
        let mut allocator = ReusableBlockAllocator::new(g);
        allocator.initialize(&mut storage).unwrap();

        let mut manager = WanderingBlockManager::new(DEFAULT_CHAIN_LENGTH);
        manager.create(&mut storage, &mut allocator, fresh_payload(1)).unwrap();
        manager.save(&mut storage, &mut allocator, fresh_payload(2)).unwrap();
        manager.save(&mut storage, &mut allocator, fresh_payload(3)).unwrap();

        let mut fresh = WanderingBlockManager::new(DEFAULT_CHAIN_LENGTH);
        let found = fresh.locate(&mut storage).unwrap();
        assert_eq!(found.last_gc, 3);
    }

    #[test]
    fn save_survives_filling_the_payload_block() {
        let g = geometry();
        let mut storage = MemoryStorage::new(g);
        let mut allocator = ReusableBlockAllocator::new(g);
        allocator.initialize(&mut storage).unwrap();

        let mut manager = WanderingBlockManager::new(DEFAULT_CHAIN_LENGTH);
        manager.create(&mut storage, &mut allocator, fresh_payload(0)).unwrap();

        let sectors = g.sectors_per_block();
        for i in 1..sectors + 3 {
            manager.save(&mut storage, &mut allocator, fresh_payload(i)).unwrap();
        }

        let mut fresh = WanderingBlockManager::new(DEFAULT_CHAIN_LENGTH);
        let found = fresh.locate(&mut storage).unwrap();
        assert_eq!(found.last_gc, sectors + 2);
    }
}
