//! Uniform erase/read/write over raw media.
//!
//! The trait is deliberately narrow: `open`/`close`/`erase`/`read`/`write`/
//! `geometry`. Nothing above this layer knows whether it's talking to NOR
//! flash, NAND, or an SD card — that's the embedder's driver's job. This
//! crate ships only [`MemoryStorage`], a host-side reference backend used by
//! its own test suite, and [`SectorCachingStorage`], a transparent
//! write-through cache any backend can be wrapped in.

use alloc::vec;
use alloc::vec::Vec;

use crate::error::{PhylumError, PhylumResult};
use crate::geometry::{BlockAddress, Geometry, SECTOR_SIZE};

/// A storage driver: erase/read/write over raw media, plus its geometry.
///
/// Implementations must fail `write` if the destination isn't fully erased
/// (all `erase_byte`) — flash cannot narrow a bit back to 1 without an
/// erase, and a silent partial-program would corrupt data invisibly.
pub trait StorageBackend {
    fn open(&mut self) -> PhylumResult<()>;
    fn close(&mut self) -> PhylumResult<()>;
    fn geometry(&self) -> Geometry;
    fn set_geometry(&mut self, geometry: Geometry);
    fn erase(&mut self, block: u32) -> PhylumResult<()>;
    fn read(&mut self, addr: BlockAddress, buf: &mut [u8]) -> PhylumResult<()>;
    fn write(&mut self, addr: BlockAddress, buf: &[u8]) -> PhylumResult<()>;
}

/// A host-side reference backend over a `Vec<u8>`. Enforces the
/// erase-before-write rule and tracks primitive call counts for tests that
/// assert on access patterns (e.g. "seek-to-end costs ~11 primitive reads").
pub struct MemoryStorage {
    geometry: Geometry,
    erase_byte: u8,
    data: Vec<u8>,
    pub reads: usize,
    pub writes: usize,
    pub erases: usize,
}

impl MemoryStorage {
    pub fn new(geometry: Geometry) -> Self {
        let size = geometry.size() as usize;
        Self {
            geometry,
            erase_byte: 0xFF,
            data: vec![0xFFu8; size],
            reads: 0,
            writes: 0,
            erases: 0,
        }
    }

    fn offset(&self, addr: BlockAddress) -> usize {
        addr.block as usize * self.geometry.block_size() as usize + addr.position as usize
    }

    /// Wipes every block back to the erased state, as a fresh device would
    /// report after manufacturing.
    pub fn erase_all(&mut self) -> PhylumResult<()> {
        for block in 0..self.geometry.number_of_blocks {
            self.erase(block)?;
        }
        Ok(())
    }
}

impl StorageBackend for MemoryStorage {
    fn open(&mut self) -> PhylumResult<()> {
        Ok(())
    }

    fn close(&mut self) -> PhylumResult<()> {
        Ok(())
    }

    fn geometry(&self) -> Geometry {
        self.geometry
    }

    fn set_geometry(&mut self, geometry: Geometry) {
        self.geometry = geometry;
        self.data.resize(geometry.size() as usize, self.erase_byte);
    }

    fn erase(&mut self, block: u32) -> PhylumResult<()> {
        if !self.geometry.contains_block(block) {
            return Err(PhylumError::InvalidArgument);
        }
        self.erases += 1;
        let block_size = self.geometry.block_size() as usize;
        let start = block as usize * block_size;
        self.data[start..start + block_size].fill(self.erase_byte);
        Ok(())
    }

    fn read(&mut self, addr: BlockAddress, buf: &mut [u8]) -> PhylumResult<()> {
        let offset = self.offset(addr);
        if offset + buf.len() > self.data.len() {
            return Err(PhylumError::InvalidArgument);
        }
        self.reads += 1;
        buf.copy_from_slice(&self.data[offset..offset + buf.len()]);
        Ok(())
    }

    fn write(&mut self, addr: BlockAddress, buf: &[u8]) -> PhylumResult<()> {
        let offset = self.offset(addr);
        if offset + buf.len() > self.data.len() {
            return Err(PhylumError::InvalidArgument);
        }
        if self.data[offset..offset + buf.len()]
            .iter()
            .any(|&b| b != self.erase_byte)
        {
            log::error!("write to un-erased location at block {} position {}", addr.block, addr.position);
            return Err(PhylumError::StorageFailure);
        }
        self.writes += 1;
        self.data[offset..offset + buf.len()].copy_from_slice(buf);
        Ok(())
    }
}

/// A transparent one-sector write-through cache in front of any backend,
/// coalescing repeated read-modify-writes of the same sector.
pub struct SectorCachingStorage<T: StorageBackend> {
    target: T,
    cached_block: Option<u32>,
    cached_sector: u16,
    buffer: [u8; SECTOR_SIZE as usize],
}

impl<T: StorageBackend> SectorCachingStorage<T> {
    pub fn new(target: T) -> Self {
        Self {
            target,
            cached_block: None,
            cached_sector: 0,
            buffer: [0u8; SECTOR_SIZE as usize],
        }
    }

    pub fn into_inner(self) -> T {
        self.target
    }

    fn invalidate(&mut self) {
        self.cached_block = None;
    }
}

impl<T: StorageBackend> StorageBackend for SectorCachingStorage<T> {
    fn open(&mut self) -> PhylumResult<()> {
        self.target.open()
    }

    fn close(&mut self) -> PhylumResult<()> {
        self.target.close()
    }

    fn geometry(&self) -> Geometry {
        self.target.geometry()
    }

    fn set_geometry(&mut self, geometry: Geometry) {
        self.target.set_geometry(geometry)
    }

    fn erase(&mut self, block: u32) -> PhylumResult<()> {
        self.invalidate();
        self.target.erase(block)
    }

    fn read(&mut self, addr: BlockAddress, buf: &mut [u8]) -> PhylumResult<()> {
        let g = self.geometry();
        let sector = addr.sector(&g);
        let offset = addr.sector_offset(&g) as usize;

        if self.cached_block != Some(sector.block) || self.cached_sector != sector.sector {
            if offset + buf.len() > self.buffer.len() {
                return self.target.read(addr, buf);
            }
            let sector_start = BlockAddress::new(addr.block, addr.position - offset as u32);
            self.target.read(sector_start, &mut self.buffer)?;
            self.cached_block = Some(sector.block);
            self.cached_sector = sector.sector;
        }

        buf.copy_from_slice(&self.buffer[offset..offset + buf.len()]);
        Ok(())
    }

    fn write(&mut self, addr: BlockAddress, buf: &[u8]) -> PhylumResult<()> {
        self.target.write(addr, buf)?;

        let g = self.geometry();
        let sector = addr.sector(&g);
        let offset = addr.sector_offset(&g) as usize;
        if self.cached_block == Some(sector.block) && self.cached_sector == sector.sector && offset + buf.len() <= self.buffer.len() {
            self.buffer[offset..offset + buf.len()].copy_from_slice(buf);
        } else {
            self.invalidate();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> Geometry {
        Geometry::new(0, 4, 4, 4, SECTOR_SIZE).unwrap()
    }

    #[test]
    fn write_requires_erased_destination() {
        let mut storage = MemoryStorage::new(geometry());
        let addr = BlockAddress::new(0, 0);
        let payload = [1u8; 16];
        storage.write(addr, &payload).unwrap();
        assert!(storage.write(addr, &payload).is_err());
        storage.erase(0).unwrap();
        storage.write(addr, &payload).unwrap();
    }

    #[test]
    fn read_after_write_roundtrips() {
        let mut storage = MemoryStorage::new(geometry());
        let addr = BlockAddress::new(1, 512);
        let payload = [7u8; 16];
        storage.write(addr, &payload).unwrap();
        let mut out = [0u8; 16];
        storage.read(addr, &mut out).unwrap();
        assert_eq!(out, payload);
    }

    #[test]
    fn caching_storage_serves_repeat_reads_of_a_sector_without_hitting_the_target() {
        let mut storage = SectorCachingStorage::new(MemoryStorage::new(geometry()));
        let addr = BlockAddress::new(1, 0);
        storage.write(addr, &[9u8; 16]).unwrap();

        let mut out = [0u8; 16];
        storage.read(addr, &mut out).unwrap();
        let reads_after_miss = storage.target.reads;
        storage.read(addr, &mut out).unwrap();

        assert_eq!(storage.target.reads, reads_after_miss, "second read of the same sector should be served from the cache");
    }

    #[test]
    fn caching_storage_patches_its_cache_on_a_write_to_the_cached_sector() {
        let mut storage = SectorCachingStorage::new(MemoryStorage::new(geometry()));
        let addr = BlockAddress::new(2, 0);
        storage.write(addr, &[1u8; 4]).unwrap();
        let mut warm = [0u8; 4];
        storage.read(addr, &mut warm).unwrap();

        let second = BlockAddress::new(2, 4);
        storage.write(second, &[2u8; 4]).unwrap();

        let mut out = [0u8; 4];
        storage.read(second, &mut out).unwrap();
        assert_eq!(out, [2u8; 4], "a write to an already-cached sector must update the cached bytes, not just the target");
    }
}
