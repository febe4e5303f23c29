//! Logical address arithmetic over `(block, sector, byte-in-block)`.
//!
//! Everything here is pure arithmetic over a [`Geometry`]; nothing touches
//! storage. [`BlockAddress::find_room`] and friends decide where the *next*
//! write should land, but never perform it.

use crate::error::{PhylumError, PhylumResult};

/// Bytes per sector, fixed across the whole crate.
pub const SECTOR_SIZE: u32 = 512;

/// Sentinel for an invalid block index.
pub const BLOCK_INDEX_INVALID: u32 = u32::MAX;

/// Sentinel for an invalid sector index within a block.
pub const SECTOR_INDEX_INVALID: u16 = u16::MAX;

/// Sentinel for an invalid byte position within a block.
pub const POSITION_INDEX_INVALID: u32 = u32::MAX;

/// Device geometry, fixed for the lifetime of a formatted filesystem.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Geometry {
    pub first: u32,
    pub number_of_blocks: u32,
    pub pages_per_block: u32,
    pub sectors_per_page: u32,
    pub sector_size: u32,
}

impl Geometry {
    /// Builds a geometry, rejecting configurations whose derived block size
    /// would be zero or whose sector size doesn't match [`SECTOR_SIZE`].
    pub fn new(
        first: u32,
        number_of_blocks: u32,
        pages_per_block: u32,
        sectors_per_page: u32,
        sector_size: u32,
    ) -> PhylumResult<Self> {
        if sector_size != SECTOR_SIZE || pages_per_block == 0 || sectors_per_page == 0 || number_of_blocks == 0 {
            return Err(PhylumError::InvalidArgument);
        }
        Ok(Self {
            first,
            number_of_blocks,
            pages_per_block,
            sectors_per_page,
            sector_size,
        })
    }

    pub fn sectors_per_block(&self) -> u32 {
        self.pages_per_block * self.sectors_per_page
    }

    pub fn block_size(&self) -> u32 {
        self.sectors_per_block() * self.sector_size
    }

    /// Total addressable size of the device, in bytes.
    pub fn size(&self) -> u64 {
        self.block_size() as u64 * self.number_of_blocks as u64
    }

    pub fn contains_block(&self, block: u32) -> bool {
        block >= self.first && block < self.first + self.number_of_blocks
    }
}

/// `(block, sector)` — coarser than [`BlockAddress`], used where only
/// sector-granularity matters (e.g. index block scans).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SectorAddress {
    pub block: u32,
    pub sector: u16,
}

impl SectorAddress {
    pub const INVALID: SectorAddress = SectorAddress {
        block: BLOCK_INDEX_INVALID,
        sector: SECTOR_INDEX_INVALID,
    };

    pub fn valid(&self) -> bool {
        self.block != BLOCK_INDEX_INVALID && self.sector != SECTOR_INDEX_INVALID
    }
}

impl Default for SectorAddress {
    fn default() -> Self {
        Self::INVALID
    }
}

/// `(block, byte-position-within-block)`. The position is not truncated to
/// the device size; callers check validity against a [`Geometry`]
/// explicitly via [`Geometry::contains_block`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockAddress {
    pub block: u32,
    pub position: u32,
}

impl BlockAddress {
    pub const INVALID: BlockAddress = BlockAddress {
        block: BLOCK_INDEX_INVALID,
        position: POSITION_INDEX_INVALID,
    };

    pub fn new(block: u32, position: u32) -> Self {
        Self { block, position }
    }

    pub fn beginning_of_block(block: u32) -> Self {
        Self { block, position: 0 }
    }

    pub fn valid(&self) -> bool {
        self.block != BLOCK_INDEX_INVALID && self.position != POSITION_INDEX_INVALID
    }

    /// Packs the address into a single `u64` (`block << 32 | position`), the
    /// wire representation used by `linked_block`-adjacent fields that store
    /// a full address rather than just a block index.
    pub fn value(&self) -> u64 {
        ((self.block as u64) << 32) | self.position as u64
    }

    pub fn from_value(value: u64) -> Self {
        Self {
            block: (value >> 32) as u32,
            position: value as u32,
        }
    }

    pub fn remaining_in_sector(&self, g: &Geometry) -> u32 {
        g.sector_size - (self.position % g.sector_size)
    }

    pub fn remaining_in_block(&self, g: &Geometry) -> u32 {
        g.block_size().saturating_sub(self.position)
    }

    pub fn sector_offset(&self, g: &Geometry) -> u32 {
        self.position % g.sector_size
    }

    pub fn sector_number(&self, g: &Geometry) -> u32 {
        self.position / g.sector_size
    }

    pub fn sector(&self, g: &Geometry) -> SectorAddress {
        SectorAddress {
            block: self.block,
            sector: self.sector_number(g) as u16,
        }
    }

    /// True iff this address lies within the block's last sector.
    pub fn tail_sector(&self, g: &Geometry) -> bool {
        self.position >= g.block_size() - g.sector_size
    }

    /// Address of the first byte of `block`'s tail sector.
    pub fn tail_sector_of(g: &Geometry, block: u32) -> BlockAddress {
        BlockAddress {
            block,
            position: g.block_size() - g.sector_size,
        }
    }

    /// Address at which a tail structure of size `sz` must begin so that it
    /// ends exactly at the block boundary.
    pub fn tail_data_of(g: &Geometry, block: u32, sz: u32) -> BlockAddress {
        BlockAddress {
            block,
            position: g.block_size() - sz,
        }
    }

    /// Advances by `n` bytes with no boundary awareness; callers that care
    /// about sector/block edges use [`Self::find_room`] instead.
    pub fn add(&self, n: u32) -> Self {
        Self {
            block: self.block,
            position: self.position + n,
        }
    }

    /// If the current sector cannot hold `n` more bytes, advances to the
    /// start of the next sector first.
    pub fn add_or_move_to_following_sector(&self, g: &Geometry, n: u32) -> Self {
        if self.remaining_in_sector(g) < n {
            let next_sector_start = (self.sector_number(g) + 1) * g.sector_size;
            Self {
                block: self.block,
                position: next_sector_start,
            }
        } else {
            self.add(n)
        }
    }

    /// Finds the address at which `n` bytes can be written without crossing
    /// a sector's tail slot, advancing past the current sector if necessary.
    /// Fails if the block cannot hold `n` bytes at all.
    pub fn find_room(&self, g: &Geometry, n: u32) -> PhylumResult<Self> {
        debug_assert!(n <= g.sector_size, "entries never span more than one sector");
        if n > g.sector_size {
            return Err(PhylumError::Invariant);
        }

        let candidate = self.add_or_move_to_following_sector(g, n);
        if candidate.remaining_in_block(g) < n {
            return Err(PhylumError::OutOfSpace);
        }
        Ok(candidate)
    }

    /// True iff `n` bytes can be written at the current position without
    /// encroaching on the block's reserved tail sector.
    pub fn can_write_entry_before_tail(&self, g: &Geometry, n: u32) -> bool {
        self.position + n <= g.block_size() - g.sector_size
    }
}

impl Default for BlockAddress {
    fn default() -> Self {
        Self::INVALID
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> Geometry {
        Geometry::new(0, 4, 4, 4, SECTOR_SIZE).unwrap()
    }

    #[test]
    fn derives_sizes() {
        let g = geometry();
        assert_eq!(g.sectors_per_block(), 16);
        assert_eq!(g.block_size(), 16 * SECTOR_SIZE);
        assert_eq!(g.size(), 4 * 16 * SECTOR_SIZE as u64);
    }

    #[test]
    fn tail_sector_detection() {
        let g = geometry();
        let last_sector_start = BlockAddress::tail_sector_of(&g, 0);
        assert!(last_sector_start.tail_sector(&g));
        assert!(!BlockAddress::new(0, 0).tail_sector(&g));
    }

    #[test]
    fn find_room_advances_past_sector_boundary() {
        let g = geometry();
        let almost_full_sector = BlockAddress::new(0, SECTOR_SIZE - 4);
        let room = almost_full_sector.find_room(&g, 8).unwrap();
        assert_eq!(room.position, SECTOR_SIZE);
    }

    #[test]
    fn find_room_fails_past_block_end() {
        let g = geometry();
        let last = BlockAddress::tail_sector_of(&g, 0);
        assert!(last.find_room(&g, SECTOR_SIZE + 1).is_err());
    }

    #[test]
    fn value_roundtrips() {
        let addr = BlockAddress::new(7, 1234);
        assert_eq!(BlockAddress::from_value(addr.value()), addr);
    }
}
