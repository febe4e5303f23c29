//! File preallocation and the file table.
//!
//! Every file gets a fixed (index extent, data extent) pair sized from its
//! declared maximum size and carved out of the device up front, rather than
//! growing wherever the general allocator happens to have room — keeping a
//! file's index blocks contiguous is what makes [`crate::index::FileIndex`]'s
//! binary search possible. [`FileLayout`] carves those extents at format
//! time and reopens them at mount time; [`FileTable`] is the append-only log
//! of `(file id -> descriptor)` entries living in the reserved block 0, the
//! filesystem's directory.

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;

use bytemuck::{Pod, Zeroable};

use crate::allocator::{BlockAllocator, RESERVED_BLOCKS};
use crate::block::{BlockLayout, BlockType, PlainBlockFormat, find_end};
use crate::crc::FileId;
use crate::error::{PhylumError, PhylumResult};
use crate::file::{BlockedFile, File, RollingFile, SimpleFile, INDEX_FREQUENCY};
use crate::geometry::{BlockAddress, Geometry, BLOCK_INDEX_INVALID};
use crate::index::FileIndex;
use crate::storage::StorageBackend;

/// Which engine a file was opened with. Persisted alongside its descriptor
/// so a remount can reopen it the same way without guessing from size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteStrategy {
    /// Plain append-only chain, no index. Grows from the shared free pool
    /// and simply stops (`OutOfSpace`) once the device fills.
    Simple,
    /// Append-only chain plus a [`FileIndex`], for files large enough that
    /// a linear reseek from the head would be too slow.
    Blocked,
    /// Bounded circular buffer over the fixed data extent [`FileLayout`]
    /// carved for it: wraps back to the extent's first block and starts a
    /// fresh index generation instead of running out of space.
    Rolling,
}

impl WriteStrategy {
    pub fn to_byte(self) -> u8 {
        match self {
            WriteStrategy::Simple => 0,
            WriteStrategy::Blocked => 1,
            WriteStrategy::Rolling => 2,
        }
    }

    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(WriteStrategy::Simple),
            1 => Some(WriteStrategy::Blocked),
            2 => Some(WriteStrategy::Rolling),
            _ => None,
        }
    }
}

/// A file's format-time declaration: what a caller hands `FileLayout::format`
/// or `::mount` to say which files should exist. Distinct from
/// [`FileDescriptor`], the persisted directory entry that results from
/// carving a declaration — a declaration is the request, a descriptor is the
/// outcome.
#[derive(Clone, Copy, Debug)]
pub struct FileDeclaration {
    pub file_id: FileId,
    /// Upper bound on the file's size, in KiB on devices under 1 GiB and in
    /// MiB at or above that — the scale jumps rather than staying constant,
    /// a quirk carried over unchanged since smoothing it would change
    /// on-device sizing in a way existing declarations don't expect. Zero
    /// means "take whatever space is left after every earlier declaration
    /// has been carved" and is only meaningful on the last declaration in a
    /// layout.
    pub maximum_size: u64,
    pub strategy: WriteStrategy,
}

/// A directory entry: a file's identity, its engine, and everything needed
/// to reopen it after a remount.
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct FileDescriptor {
    pub file_id: FileId,
    pub strategy: u8,
    pub deleted: u8,
    pub reserved: [u8; 2],
    pub head_block: u32,
    pub head_position: u32,
    pub length: u32,
    pub version: u32,
    pub index_extent_start: u32,
    pub index_extent_blocks: u32,
    /// First block of the fixed data extent. Only meaningful for
    /// [`WriteStrategy::Rolling`], which needs its bounds to know when to
    /// wrap; `Simple`/`Blocked` files grow from the shared free pool and
    /// leave this at [`BLOCK_INDEX_INVALID`].
    pub data_extent_start: u32,
    pub data_extent_blocks: u32,
}

impl FileDescriptor {
    const INVALID: FileDescriptor = FileDescriptor {
        file_id: 0,
        strategy: 0xFF,
        deleted: 0,
        reserved: [0; 2],
        head_block: BLOCK_INDEX_INVALID,
        head_position: 0,
        length: 0,
        version: 0,
        index_extent_start: BLOCK_INDEX_INVALID,
        index_extent_blocks: 0,
        data_extent_start: BLOCK_INDEX_INVALID,
        data_extent_blocks: 0,
    };

    fn present(&self) -> bool {
        self.strategy != 0xFF
    }

    pub fn strategy(&self) -> Option<WriteStrategy> {
        WriteStrategy::from_byte(self.strategy)
    }

    pub fn head(&self) -> BlockAddress {
        BlockAddress::new(self.head_block, self.head_position)
    }
}

/// A file's fixed `(index extent, data extent)` position on the device.
#[derive(Clone, Copy, Debug)]
pub struct FileAllocation {
    pub index_start: u32,
    pub index_blocks: u32,
    pub data_start: u32,
    pub data_blocks: u32,
}

/// How many blocks of data a file declaring `maximum_size` needs, in the
/// scale that size is declared in (KiB under a 1 GiB device, MiB at or
/// above it). Ported from the preallocator this crate's sizing is grounded
/// on, adapted to this crate's flat [`crate::block::BlockTail`] overhead
/// model rather than a separate per-sector tail structure.
pub fn blocks_required_for_data(g: &Geometry, maximum_size: u64) -> u32 {
    const KIBIBYTE: u64 = 1024;
    const MEBIBYTE: u64 = 1024 * 1024;
    const GIBIBYTE: u64 = 1024 * 1024 * 1024;

    let scale = if g.size() < GIBIBYTE { KIBIBYTE } else { MEBIBYTE };
    let size = maximum_size * scale;
    let effective_block_size = (g.block_size() - head_size() - tail_size()) as u64;
    ((size / effective_block_size) + 1) as u32
}

/// How many blocks of index a file whose data spans `data_blocks` needs,
/// doubled to leave room for a rolling file's fresh-generation reindex.
pub fn blocks_required_for_index(g: &Geometry, data_blocks: u32) -> u32 {
    let indices_per_block = FileIndex::records_per_block(g).max(1);
    let index_entries = (data_blocks / INDEX_FREQUENCY) + 1;
    (index_entries / indices_per_block).max(1) * 2
}

fn head_size() -> u32 {
    core::mem::size_of::<crate::block::BlockHead>() as u32
}

fn tail_size() -> u32 {
    core::mem::size_of::<crate::block::BlockTail>() as u32
}

/// Carves one declaration's `(index extent, data extent)` pair starting at
/// `*cursor`, advancing `*cursor` past both. A `maximum_size` of zero takes
/// whatever is left of the device at this point in the cursor sequence —
/// meaningful only when `declaration` is the last one carved.
fn carve_one(geometry: &Geometry, cursor: &mut u32, declaration: &FileDeclaration) -> FileAllocation {
    let data_blocks = if declaration.maximum_size > 0 {
        blocks_required_for_data(geometry, declaration.maximum_size)
    } else {
        let remaining = geometry.number_of_blocks.saturating_sub(*cursor).saturating_sub(1);
        let estimated_index = blocks_required_for_index(geometry, remaining);
        remaining.saturating_sub(estimated_index)
    };
    let index_blocks = blocks_required_for_index(geometry, data_blocks);

    let index_start = *cursor;
    *cursor += index_blocks;
    let data_start = *cursor;
    *cursor += data_blocks;

    FileAllocation {
        index_start,
        index_blocks,
        data_start,
        data_blocks,
    }
}

/// Dispatches to the engine a descriptor names and reopens it exactly where
/// it left off — the read-back side of [`FileLayout::format`]'s creation,
/// shared with [`crate::recovery::extract_all`] so the per-strategy match
/// isn't duplicated between mounting a file for normal use and recovering
/// it after loss of the directory.
pub fn open_descriptor(descriptor: &FileDescriptor) -> PhylumResult<Box<dyn File>> {
    Ok(match descriptor.strategy() {
        Some(WriteStrategy::Simple) => Box::new(SimpleFile::open(descriptor.head(), descriptor.length, descriptor.version)),
        Some(WriteStrategy::Blocked) => {
            let index = FileIndex::new(descriptor.index_extent_start, descriptor.index_extent_blocks);
            Box::new(BlockedFile::open(descriptor.head(), index, descriptor.length, descriptor.version))
        }
        Some(WriteStrategy::Rolling) => {
            let index = FileIndex::new(descriptor.index_extent_start, descriptor.index_extent_blocks);
            Box::new(RollingFile::open(
                descriptor.head(),
                descriptor.data_extent_start,
                descriptor.data_extent_blocks,
                index,
                descriptor.length,
                descriptor.version,
            ))
        }
        None => return Err(PhylumError::Corruption),
    })
}

/// Formats a file fresh at the extents named by `descriptor`, with `version`
/// stamped into its head — used both the first time a declaration is carved
/// and whenever a file is erased back to empty.
fn format_allocation(
    storage: &mut dyn StorageBackend,
    descriptor: &FileDescriptor,
    strategy: WriteStrategy,
    version: u32,
) -> PhylumResult<Box<dyn File>> {
    Ok(match strategy {
        WriteStrategy::Simple => Box::new(SimpleFile::create(storage, descriptor.head_block, version)?),
        WriteStrategy::Blocked => {
            let index = FileIndex::new(descriptor.index_extent_start, descriptor.index_extent_blocks);
            Box::new(BlockedFile::create(storage, descriptor.head_block, index, version)?)
        }
        WriteStrategy::Rolling => {
            let index = FileIndex::new(descriptor.index_extent_start, descriptor.index_extent_blocks);
            Box::new(RollingFile::create(
                storage,
                descriptor.data_extent_start,
                descriptor.data_extent_blocks,
                index,
                version,
            )?)
        }
    })
}

/// How a file was opened, matching what the caller intends to do with it.
/// Not enforced at the type level — reopening never reformats regardless of
/// mode — but callers should still respect it, since a `Write` handle that
/// only ever reads is a sign something upstream is misconfigured.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
}

/// The result of [`FileLayout::stat`].
#[derive(Clone, Copy, Debug)]
pub struct FileStat {
    pub size: u64,
    pub version: u32,
}

/// The fixed set of files a device is formatted with: `N` declarations, each
/// carved into its own `(index extent, data extent)` pair and tracked in the
/// file table. Exposes the four operations an embedder drives a filesystem
/// through: `format` a blank device, `mount` an already-formatted one, then
/// `open`/`erase`/`stat` individual files by id.
pub struct FileLayout<const N: usize> {
    declarations: [FileDeclaration; N],
    descriptors: [Option<FileDescriptor>; N],
    table: Option<FileTable>,
}

impl<const N: usize> FileLayout<N> {
    pub fn new(declarations: [FileDeclaration; N]) -> Self {
        Self {
            declarations,
            descriptors: [None; N],
            table: None,
        }
    }

    fn slot_for(&self, file_id: FileId) -> PhylumResult<usize> {
        self.declarations
            .iter()
            .position(|d| d.file_id == file_id)
            .ok_or(PhylumError::InvalidArgument)
    }

    fn descriptor_for(&self, file_id: FileId) -> PhylumResult<FileDescriptor> {
        let slot = self.slot_for(file_id)?;
        self.descriptors[slot].ok_or(PhylumError::InvalidArgument)
    }

    /// Wipes the device's directory and carves a fresh `(index, data)` pair
    /// for every declaration, sized off its `maximum_size`. Formats each
    /// file's first block and records its descriptor in a new file table.
    pub fn format(&mut self, storage: &mut dyn StorageBackend, allocator: &mut dyn BlockAllocator) -> PhylumResult<()> {
        let geometry = storage.geometry();
        let mut cursor = RESERVED_BLOCKS;
        let mut table = FileTable::format(storage)?;

        for i in 0..N {
            let declaration = self.declarations[i];
            let allocation = carve_one(&geometry, &mut cursor, &declaration);

            let mut descriptor = FileDescriptor::INVALID;
            descriptor.file_id = declaration.file_id;
            descriptor.strategy = declaration.strategy.to_byte();
            descriptor.head_block = allocation.data_start;
            descriptor.head_position = head_size();
            descriptor.version = 1;
            descriptor.index_extent_start = allocation.index_start;
            descriptor.index_extent_blocks = allocation.index_blocks;
            descriptor.data_extent_start = allocation.data_start;
            descriptor.data_extent_blocks = allocation.data_blocks;

            let mut file = format_allocation(storage, &descriptor, declaration.strategy, 1)?;
            file.flush(storage, allocator)?;

            table.append(storage, allocator, descriptor)?;
            self.descriptors[i] = Some(descriptor);
        }

        self.table = Some(table);
        Ok(())
    }

    /// Reads every declaration's descriptor back out of the existing file
    /// table, validating that what's on disk still matches the engine each
    /// declaration asks for.
    pub fn mount(&mut self, storage: &mut dyn StorageBackend) -> PhylumResult<()> {
        let table = FileTable::open(storage)?;

        for i in 0..N {
            let declaration = self.declarations[i];
            let descriptor = table.lookup(storage, declaration.file_id)?;
            if descriptor.strategy() != Some(declaration.strategy) {
                return Err(PhylumError::Corruption);
            }
            self.descriptors[i] = Some(descriptor);
        }

        self.table = Some(table);
        Ok(())
    }

    /// Reopens `file_id` in the engine it was declared with, resuming
    /// exactly where its descriptor left off.
    pub fn open(&self, file_id: FileId, mode: OpenMode) -> PhylumResult<Box<dyn File>> {
        let _ = mode;
        open_descriptor(&self.descriptor_for(file_id)?)
    }

    /// Reports `file_id`'s current size and version without opening it.
    pub fn stat(&self, file_id: FileId) -> PhylumResult<FileStat> {
        let descriptor = self.descriptor_for(file_id)?;
        Ok(FileStat {
            size: descriptor.length as u64,
            version: descriptor.version,
        })
    }

    /// Reformats `file_id` back to empty in place, bumping its version, and
    /// persists the refreshed descriptor as a new table entry.
    pub fn erase(&mut self, storage: &mut dyn StorageBackend, allocator: &mut dyn BlockAllocator, file_id: FileId) -> PhylumResult<()> {
        let slot = self.slot_for(file_id)?;
        let mut descriptor = self.descriptors[slot].ok_or(PhylumError::InvalidArgument)?;
        let strategy = descriptor.strategy().ok_or(PhylumError::Corruption)?;
        let next_version = descriptor.version + 1;

        let mut file = format_allocation(storage, &descriptor, strategy, next_version)?;
        file.flush(storage, allocator)?;

        descriptor.version = next_version;
        descriptor.length = 0;
        descriptor.head_position = head_size();

        let table = self.table.as_mut().ok_or(PhylumError::Invariant)?;
        table.append(storage, allocator, descriptor)?;
        self.descriptors[slot] = Some(descriptor);
        Ok(())
    }
}

/// The filesystem's directory: an append-only chain of [`FileDescriptor`]
/// entries rooted at the reserved block 0. Renames and metadata updates are
/// new appends — the newest entry for a given `file_id` is authoritative,
/// and a `deleted` entry shadows every earlier one.
pub struct FileTable {
    layout: BlockLayout<PlainBlockFormat>,
}

const FILE_TABLE_BLOCK: u32 = 0;

impl FileTable {
    /// Formats a fresh, empty table at the reserved block.
    pub fn format(storage: &mut dyn StorageBackend) -> PhylumResult<Self> {
        let format = PlainBlockFormat { block_type: BlockType::File };
        let layout = BlockLayout::new(format, BlockAddress::default(), 0);
        let head = layout.write_head(storage, 0, FILE_TABLE_BLOCK, BLOCK_INDEX_INVALID)?;
        let mut layout = layout;
        layout.address = head;
        Ok(Self { layout })
    }

    /// Reopens the table by scanning forward from block 0 to its logical
    /// end, the same way any other entry-chained log is remounted.
    pub fn open(storage: &mut dyn StorageBackend) -> PhylumResult<Self> {
        let end = find_end::<FileDescriptor>(storage, head_size(), tail_size(), FILE_TABLE_BLOCK, FileDescriptor::present)?;
        let format = PlainBlockFormat { block_type: BlockType::File };
        Ok(Self {
            layout: BlockLayout::new(format, end, 0),
        })
    }

    /// Scans every entry, keeping only the latest surviving descriptor per
    /// `file_id`.
    fn live_entries(&self, storage: &mut dyn StorageBackend) -> PhylumResult<Vec<FileDescriptor>> {
        let entry_size = core::mem::size_of::<FileDescriptor>() as u32;
        let head_size = head_size();
        let tail_size = tail_size();

        let mut latest: Vec<FileDescriptor> = Vec::new();
        let mut block = FILE_TABLE_BLOCK;
        loop {
            let g = storage.geometry();
            let mut addr = BlockAddress::new(block, head_size);
            loop {
                if addr.remaining_in_block(&g).saturating_sub(tail_size) < entry_size {
                    break;
                }
                let mut buf = vec![0u8; entry_size as usize];
                storage.read(addr, &mut buf)?;
                let entry: &FileDescriptor = bytemuck::from_bytes(&buf);
                if !entry.present() {
                    break;
                }
                if let Some(slot) = latest.iter_mut().find(|e: &&mut FileDescriptor| e.file_id == entry.file_id) {
                    *slot = *entry;
                } else {
                    latest.push(*entry);
                }
                addr = addr.add(entry_size);
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
                break;
            }
            block = linked;
        }

        Ok(latest.into_iter().filter(|e| e.deleted == 0).collect())
    }

    pub fn lookup(&self, storage: &mut dyn StorageBackend, file_id: FileId) -> PhylumResult<FileDescriptor> {
        self.live_entries(storage)?
            .into_iter()
            .find(|e| e.file_id == file_id)
            .ok_or(PhylumError::EndOfFile)
    }

    pub fn list(&self, storage: &mut dyn StorageBackend) -> PhylumResult<Vec<FileDescriptor>> {
        self.live_entries(storage)
    }

    pub fn append(
        &mut self,
        storage: &mut dyn StorageBackend,
        allocator: &mut dyn BlockAllocator,
        descriptor: FileDescriptor,
    ) -> PhylumResult<()> {
        self.layout.append(storage, allocator, bytemuck::bytes_of(&descriptor))?;
        Ok(())
    }

    pub fn remove(
        &mut self,
        storage: &mut dyn StorageBackend,
        allocator: &mut dyn BlockAllocator,
        file_id: FileId,
    ) -> PhylumResult<()> {
        let mut tombstone = FileDescriptor::INVALID;
        tombstone.file_id = file_id;
        tombstone.strategy = WriteStrategy::Simple.to_byte();
        tombstone.deleted = 1;
        self.append(storage, allocator, tombstone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::SequentialBlockAllocator;
    use crate::crc::file_id;
    use crate::geometry::SECTOR_SIZE;
    use crate::storage::MemoryStorage;

    fn geometry() -> Geometry {
        Geometry::new(0, 64, 2, 2, SECTOR_SIZE).unwrap()
    }

    #[test]
    fn format_then_mount_round_trips_descriptors() {
        let g = geometry();
        let mut storage = MemoryStorage::new(g);
        let mut allocator = SequentialBlockAllocator::new(RESERVED_BLOCKS);

        let declarations = [
            FileDeclaration {
                file_id: file_id("boot.log"),
                maximum_size: 4,
                strategy: WriteStrategy::Simple,
            },
            FileDeclaration {
                file_id: file_id("events.log"),
                maximum_size: 0,
                strategy: WriteStrategy::Blocked,
            },
        ];

        let mut layout: FileLayout<2> = FileLayout::new(declarations);
        layout.format(&mut storage, &mut allocator).unwrap();

        let boot = layout.stat(file_id("boot.log")).unwrap();
        assert_eq!(boot.version, 1);
        assert_eq!(boot.size, 0);

        let mut remounted: FileLayout<2> = FileLayout::new(declarations);
        remounted.mount(&mut storage).unwrap();
        let boot_after_mount = remounted.stat(file_id("boot.log")).unwrap();
        assert_eq!(boot_after_mount.version, 1);
    }

    #[test]
    fn carve_sizes_data_extent_from_declared_maximum() {
        let g = geometry();
        let mut cursor = RESERVED_BLOCKS;
        let small = FileDeclaration {
            file_id: file_id("small"),
            maximum_size: 1,
            strategy: WriteStrategy::Simple,
        };
        let large = FileDeclaration {
            file_id: file_id("large"),
            maximum_size: 64,
            strategy: WriteStrategy::Simple,
        };

        let small_alloc = carve_one(&g, &mut cursor, &small);
        let mut cursor2 = RESERVED_BLOCKS;
        let large_alloc = carve_one(&g, &mut cursor2, &large);

        assert!(
            large_alloc.data_blocks > small_alloc.data_blocks,
            "a larger declared maximum_size must carve a larger data extent"
        );
    }

    #[test]
    fn last_declaration_with_zero_maximum_size_takes_the_rest() {
        let g = geometry();
        let mut cursor = RESERVED_BLOCKS;
        let first = FileDeclaration {
            file_id: file_id("first"),
            maximum_size: 1,
            strategy: WriteStrategy::Simple,
        };
        let first_alloc = carve_one(&g, &mut cursor, &first);

        let rest = FileDeclaration {
            file_id: file_id("rest"),
            maximum_size: 0,
            strategy: WriteStrategy::Simple,
        };
        let rest_alloc = carve_one(&g, &mut cursor, &rest);

        let after_first = first_alloc.index_start + first_alloc.index_blocks + first_alloc.data_blocks;
        assert_eq!(rest_alloc.index_start, after_first);
        assert!(rest_alloc.data_blocks > 0);
        assert!(rest_alloc.index_start + rest_alloc.index_blocks + rest_alloc.data_blocks <= g.number_of_blocks);
    }

    #[test]
    fn erase_resets_length_and_bumps_version() {
        let g = geometry();
        let mut storage = MemoryStorage::new(g);
        let mut allocator = SequentialBlockAllocator::new(RESERVED_BLOCKS);

        let declarations = [FileDeclaration {
            file_id: file_id("scratch.tmp"),
            maximum_size: 4,
            strategy: WriteStrategy::Simple,
        }];
        let mut layout: FileLayout<1> = FileLayout::new(declarations);
        layout.format(&mut storage, &mut allocator).unwrap();

        let id = file_id("scratch.tmp");
        {
            let mut file = layout.open(id, OpenMode::Write).unwrap();
            file.write(&mut storage, &mut allocator, b"hello", true, true).unwrap();
            file.flush(&mut storage, &mut allocator).unwrap();
        }

        layout.erase(&mut storage, &mut allocator, id).unwrap();
        let stat = layout.stat(id).unwrap();
        assert_eq!(stat.size, 0);
        assert_eq!(stat.version, 2);
    }

    #[test]
    fn file_table_tracks_newest_entry_per_id() {
        let g = geometry();
        let mut storage = MemoryStorage::new(g);
        let mut allocator = SequentialBlockAllocator::new(8);
        let mut table = FileTable::format(&mut storage).unwrap();

        let id = file_id("boot.log");
        let mut entry = FileDescriptor::INVALID;
        entry.file_id = id;
        entry.strategy = WriteStrategy::Simple.to_byte();
        entry.length = 10;

        table.append(&mut storage, &mut allocator, entry).unwrap();
        entry.length = 20;
        table.append(&mut storage, &mut allocator, entry).unwrap();

        let found = table.lookup(&mut storage, id).unwrap();
        assert_eq!(found.length, 20);
    }

    #[test]
    fn removing_a_file_hides_it_from_lookup() {
        let g = geometry();
        let mut storage = MemoryStorage::new(g);
        let mut allocator = SequentialBlockAllocator::new(8);
        let mut table = FileTable::format(&mut storage).unwrap();

        let id = file_id("scratch.tmp");
        let mut entry = FileDescriptor::INVALID;
        entry.file_id = id;
        entry.strategy = WriteStrategy::Simple.to_byte();
        table.append(&mut storage, &mut allocator, entry).unwrap();
        table.remove(&mut storage, &mut allocator, id).unwrap();

        assert!(table.lookup(&mut storage, id).is_err());
    }
}
