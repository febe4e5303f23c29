//! Open file handles.
//!
//! Every file is a chain of blocks written through [`crate::block::BlockLayout`],
//! with writes buffered a sector at a time before they're committed (flash
//! can't usefully be programmed a byte at a time). Two shapes share that
//! engine: [`SimpleFile`] is a plain append-only byte chain, cheap enough
//! that seeking just means re-reading from the start; [`BlockedFile`] adds a
//! [`crate::index::FileIndex`] alongside it so seeking into a large file
//! doesn't mean walking every block that precedes the target.

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;

use crate::allocator::{BlockAllocator, ExtentCursorAllocator};
use crate::block::{BlockLayout, BlockTail, BlockType, PlainBlockFormat};
use crate::error::{PhylumError, PhylumResult};
use crate::geometry::{BlockAddress, Geometry, SECTOR_SIZE, BLOCK_INDEX_INVALID};
use crate::index::FileIndex;
use crate::storage::StorageBackend;

/// How many block transitions pass between index records, steady state.
/// Also what [`crate::layout`] sizes an index extent against, so the two
/// must move together.
pub const INDEX_FREQUENCY: u32 = 8;

fn head_size() -> u32 {
    core::mem::size_of::<crate::block::BlockHead>() as u32
}

fn tail_size() -> u32 {
    core::mem::size_of::<BlockTail>() as u32
}

/// Reads `buf.len()` bytes starting at `*cursor`, following tail links into
/// the next block whenever the current one runs out, and advances `*cursor`
/// past what it read.
fn read_bytes(storage: &mut dyn StorageBackend, cursor: &mut BlockAddress, buf: &mut [u8]) -> PhylumResult<()> {
    let mut offset = 0;
    while offset < buf.len() {
        let g = storage.geometry();
        let remaining = cursor.remaining_in_block(&g).saturating_sub(tail_size());
        if remaining == 0 {
            let tail_addr = BlockAddress::tail_data_of(&g, cursor.block, tail_size());
            let mut tail_buf = vec![0u8; tail_size() as usize];
            storage.read(tail_addr, &mut tail_buf)?;
            let linked = u32::from_le_bytes(
                tail_buf[tail_buf.len() - 4..]
                    .try_into()
                    .map_err(|_| PhylumError::Corruption)?,
            );
            if linked == BLOCK_INDEX_INVALID {
                return Err(PhylumError::EndOfFile);
            }
            *cursor = BlockAddress::new(linked, head_size());
            continue;
        }
        let take = (buf.len() - offset).min(remaining as usize);
        storage.read(*cursor, &mut buf[offset..offset + take])?;
        *cursor = cursor.add(take as u32);
        offset += take;
    }
    Ok(())
}

/// The canonical "seek to end" sentinel. The distilled notion of this is
/// `U64_MAX` over a 64-bit file length; every position/length field in this
/// crate is `u32`, so the sentinel is adapted to `u32::MAX` here instead.
pub const SEEK_TO_END: u32 = u32::MAX;

/// Buffers or immediately commits `data` into `layout` depending on the
/// spanning flags, calling `on_chunk` after every actual
/// [`BlockLayout::append`] so callers that maintain a side index can react
/// to block transitions.
///
/// `span_sectors = false` requires the whole entry to survive a crash
/// atomically or not at all, so any bytes already buffered from an earlier
/// spanning write are flushed first and `data` goes through its own
/// dedicated `append` call rather than being coalesced with a neighboring
/// write — `append` never splits one `storage.write` across a sector, so a
/// dedicated call is what makes the guarantee hold. `span_blocks = false`
/// is folded into the same path: nothing in this crate's `append` can write
/// more than one sector in a single call anyway, so an entry small enough
/// to respect `span_sectors = false` automatically respects `span_blocks =
/// false` too (one sector always fits in one block). A multi-sector entry
/// that must still avoid straddling a block boundary (`span_sectors = true,
/// span_blocks = false`) isn't representable by the underlying one-sector-
/// per-append primitive and is rejected.
///
/// Spanning writes (`span_sectors = true, span_blocks = true`) keep the
/// previous behaviour: bytes accumulate in `buffer` and flush in fixed
/// `SECTOR_SIZE` chunks regardless of call boundaries, since nothing
/// requires those chunks to line up with logical entries.
fn write_through(
    layout: &mut BlockLayout<PlainBlockFormat>,
    buffer: &mut Vec<u8>,
    storage: &mut dyn StorageBackend,
    allocator: &mut dyn BlockAllocator,
    data: &[u8],
    span_sectors: bool,
    span_blocks: bool,
    mut on_chunk: impl FnMut(&mut dyn StorageBackend, BlockAddress, &[u8]) -> PhylumResult<()>,
) -> PhylumResult<()> {
    if span_sectors && !span_blocks {
        // A multi-sector entry bounded to one block isn't representable:
        // `append` never writes more than one sector in a single call.
        return Err(PhylumError::InvalidArgument);
    }

    if !span_sectors {
        if data.len() as u32 > SECTOR_SIZE - tail_size() {
            return Err(PhylumError::InvalidArgument);
        }
        if !buffer.is_empty() {
            let chunk = core::mem::take(buffer);
            let addr = layout.append(storage, allocator, &chunk)?;
            on_chunk(storage, addr, &chunk)?;
        }
        let addr = layout.append(storage, allocator, data)?;
        on_chunk(storage, addr, data)?;
        return Ok(());
    }

    buffer.extend_from_slice(data);
    while buffer.len() >= SECTOR_SIZE as usize {
        let chunk: Vec<u8> = buffer.drain(..SECTOR_SIZE as usize).collect();
        let addr = layout.append(storage, allocator, &chunk)?;
        on_chunk(storage, addr, &chunk)?;
    }
    Ok(())
}

/// Common surface both file shapes present to whatever mounts them — the
/// directory/file-table layer only ever holds a `Box<dyn File>`.
pub trait File {
    fn read(&mut self, storage: &mut dyn StorageBackend, buf: &mut [u8]) -> PhylumResult<usize>;

    /// `span_sectors = false` promises the caller's whole `buf` either
    /// lands on the device or doesn't survive a crash, never half of it;
    /// `span_blocks = false` extends the same promise to the block. Pass
    /// `true`/`true` for ordinary throughput-oriented appends that are fine
    /// being torn at a sector boundary.
    fn write(
        &mut self,
        storage: &mut dyn StorageBackend,
        allocator: &mut dyn BlockAllocator,
        buf: &[u8],
        span_sectors: bool,
        span_blocks: bool,
    ) -> PhylumResult<usize>;

    /// Seeking to [`SEEK_TO_END`] is the canonical way to ask for the
    /// file's current length without knowing it up front.
    fn seek(&mut self, storage: &mut dyn StorageBackend, position: u32) -> PhylumResult<()>;
    fn flush(&mut self, storage: &mut dyn StorageBackend, allocator: &mut dyn BlockAllocator) -> PhylumResult<()>;
    fn length(&self) -> u32;
    fn position(&self) -> u32;
    fn version(&self) -> u32;
}

/// A small file: one chain of blocks, no index. Good enough as long as
/// reseeking means re-reading from the head is cheap, which it is for
/// anything that fits in a handful of blocks.
pub struct SimpleFile {
    layout: BlockLayout<PlainBlockFormat>,
    buffer: Vec<u8>,
    head: BlockAddress,
    read_cursor: BlockAddress,
    length: u32,
    read_position: u32,
    version: u32,
}

impl SimpleFile {
    /// Formats a fresh block at `head_block` and returns a handle ready to
    /// be written to.
    pub fn create(storage: &mut dyn StorageBackend, head_block: u32, version: u32) -> PhylumResult<Self> {
        let format = PlainBlockFormat { block_type: BlockType::File };
        let layout = BlockLayout::new(format, BlockAddress::default(), version);
        let head = layout.write_head(storage, 0, head_block, BLOCK_INDEX_INVALID)?;
        let mut layout = layout;
        layout.address = head;
        Ok(Self {
            layout,
            buffer: Vec::new(),
            head,
            read_cursor: head,
            length: 0,
            read_position: 0,
            version,
        })
    }

    /// Reopens a file whose head block and logical length are already
    /// known (read back from its file-table entry).
    pub fn open(head: BlockAddress, length: u32, version: u32) -> Self {
        let format = PlainBlockFormat { block_type: BlockType::File };
        Self {
            layout: BlockLayout::new(format, head, version),
            buffer: Vec::new(),
            head,
            read_cursor: head,
            length,
            read_position: 0,
            version,
        }
    }
}

impl File for SimpleFile {
    fn read(&mut self, storage: &mut dyn StorageBackend, buf: &mut [u8]) -> PhylumResult<usize> {
        let available = self.length.saturating_sub(self.read_position) as usize;
        let take = buf.len().min(available);
        if take == 0 {
            return Ok(0);
        }
        read_bytes(storage, &mut self.read_cursor, &mut buf[..take])?;
        self.read_position += take as u32;
        Ok(take)
    }

    fn write(
        &mut self,
        storage: &mut dyn StorageBackend,
        allocator: &mut dyn BlockAllocator,
        data: &[u8],
        span_sectors: bool,
        span_blocks: bool,
    ) -> PhylumResult<usize> {
        write_through(&mut self.layout, &mut self.buffer, storage, allocator, data, span_sectors, span_blocks, |_, _, _| Ok(()))?;
        self.length += data.len() as u32;
        Ok(data.len())
    }

    fn seek(&mut self, storage: &mut dyn StorageBackend, target: u32) -> PhylumResult<()> {
        let target = if target == SEEK_TO_END { self.length } else { target };
        if target > self.length {
            return Err(PhylumError::InvalidArgument);
        }
        if target < self.read_position {
            self.read_cursor = self.head;
            self.read_position = 0;
        }
        let mut remaining = target - self.read_position;
        let mut scratch = [0u8; 64];
        while remaining > 0 {
            let take = remaining.min(64);
            read_bytes(storage, &mut self.read_cursor, &mut scratch[..take as usize])?;
            remaining -= take;
            self.read_position += take;
        }
        Ok(())
    }

    fn flush(&mut self, storage: &mut dyn StorageBackend, allocator: &mut dyn BlockAllocator) -> PhylumResult<()> {
        if !self.buffer.is_empty() {
            let chunk = core::mem::take(&mut self.buffer);
            self.layout.append(storage, allocator, &chunk)?;
        }
        self.layout.terminate(storage)
    }

    fn length(&self) -> u32 {
        self.length
    }

    fn position(&self) -> u32 {
        self.read_position
    }

    fn version(&self) -> u32 {
        self.version
    }
}

/// A large file: the same append-only data chain as [`SimpleFile`], plus a
/// sparse index recording where each data block starts so a seek lands
/// close to its target in `O(log extent blocks)` rather than reading
/// through everything before it.
pub struct BlockedFile {
    layout: BlockLayout<PlainBlockFormat>,
    index: FileIndex,
    buffer: Vec<u8>,
    head: BlockAddress,
    read_cursor: BlockAddress,
    length: u32,
    read_position: u32,
    current_block: u32,
    block_start_position: u32,
    blocks_since_index: u32,
    version: u32,
}

impl BlockedFile {
    pub fn create(storage: &mut dyn StorageBackend, head_block: u32, mut index: FileIndex, version: u32) -> PhylumResult<Self> {
        let format = PlainBlockFormat { block_type: BlockType::File };
        let layout = BlockLayout::new(format, BlockAddress::default(), version);
        let head = layout.write_head(storage, 0, head_block, BLOCK_INDEX_INVALID)?;
        let mut layout = layout;
        layout.address = head;
        index.format(storage)?;
        index.append(storage, 0, head)?;
        Ok(Self {
            layout,
            index,
            buffer: Vec::new(),
            head,
            read_cursor: head,
            length: 0,
            read_position: 0,
            current_block: head_block,
            block_start_position: 0,
            blocks_since_index: 0,
            version,
        })
    }

    pub fn open(head: BlockAddress, index: FileIndex, length: u32, version: u32) -> Self {
        let format = PlainBlockFormat { block_type: BlockType::File };
        Self {
            layout: BlockLayout::new(format, head, version),
            index,
            buffer: Vec::new(),
            head,
            read_cursor: head,
            length,
            read_position: 0,
            current_block: head.block,
            block_start_position: 0,
            blocks_since_index: 0,
            version,
        }
    }
}

impl File for BlockedFile {
    fn read(&mut self, storage: &mut dyn StorageBackend, buf: &mut [u8]) -> PhylumResult<usize> {
        let available = self.length.saturating_sub(self.read_position) as usize;
        let take = buf.len().min(available);
        if take == 0 {
            return Ok(0);
        }
        read_bytes(storage, &mut self.read_cursor, &mut buf[..take])?;
        self.read_position += take as u32;
        Ok(take)
    }

    fn write(
        &mut self,
        storage: &mut dyn StorageBackend,
        allocator: &mut dyn BlockAllocator,
        data: &[u8],
        span_sectors: bool,
        span_blocks: bool,
    ) -> PhylumResult<usize> {
        let mut running_position = self.length;
        let index = &mut self.index;
        let current_block = &mut self.current_block;
        let block_start_position = &mut self.block_start_position;
        let blocks_since_index = &mut self.blocks_since_index;

        write_through(&mut self.layout, &mut self.buffer, storage, allocator, data, span_sectors, span_blocks, |storage, addr, chunk| {
            if addr.block != *current_block {
                *current_block = addr.block;
                *block_start_position = running_position;
                *blocks_since_index += 1;
                if *blocks_since_index >= INDEX_FREQUENCY {
                    *blocks_since_index = 0;
                    index.append(storage, running_position, BlockAddress::new(addr.block, head_size()))?;
                }
            }
            running_position += chunk.len() as u32;
            Ok(())
        })?;

        self.length += data.len() as u32;
        Ok(data.len())
    }

    fn seek(&mut self, storage: &mut dyn StorageBackend, target: u32) -> PhylumResult<()> {
        let target = if target == SEEK_TO_END { self.length } else { target };
        if target > self.length {
            return Err(PhylumError::InvalidArgument);
        }
        let record = self.index.find(storage, target)?;
        self.read_cursor = BlockAddress::new(record.block, record.byte_position);
        self.read_position = record.position;
        let mut remaining = target - self.read_position;
        let mut scratch = [0u8; 64];
        while remaining > 0 {
            let take = remaining.min(64);
            read_bytes(storage, &mut self.read_cursor, &mut scratch[..take as usize])?;
            remaining -= take;
            self.read_position += take;
        }
        Ok(())
    }

    fn flush(&mut self, storage: &mut dyn StorageBackend, allocator: &mut dyn BlockAllocator) -> PhylumResult<()> {
        if !self.buffer.is_empty() {
            let chunk = core::mem::take(&mut self.buffer);
            self.layout.append(storage, allocator, &chunk)?;
        }
        self.layout.terminate(storage)
    }

    fn length(&self) -> u32 {
        self.length
    }

    fn position(&self) -> u32 {
        self.read_position
    }

    fn version(&self) -> u32 {
        self.version
    }
}

/// A bounded circular buffer over a fixed data extent: once the chain would
/// need a block past the extent's last one, it wraps back to the extent's
/// first block and starts a fresh index generation instead of failing with
/// `OutOfSpace`. Reads only ever see the current generation — the most
/// recently written up-to-`extent` bytes, not the file's full write history.
pub struct RollingFile {
    layout: BlockLayout<PlainBlockFormat>,
    cursor: ExtentCursorAllocator,
    index: FileIndex,
    buffer: Vec<u8>,
    head: BlockAddress,
    read_cursor: BlockAddress,
    length: u32,
    read_position: u32,
    version: u32,
}

impl RollingFile {
    pub fn create(
        storage: &mut dyn StorageBackend,
        data_start: u32,
        data_blocks: u32,
        mut index: FileIndex,
        version: u32,
    ) -> PhylumResult<Self> {
        let format = PlainBlockFormat { block_type: BlockType::File };
        let layout = BlockLayout::new(format, BlockAddress::default(), version);
        let head = layout.write_head(storage, 0, data_start, BLOCK_INDEX_INVALID)?;
        let mut layout = layout;
        layout.address = head;
        index.format(storage)?;
        index.append(storage, 0, head)?;
        Ok(Self {
            layout,
            cursor: ExtentCursorAllocator::new(data_start, data_blocks, 1),
            index,
            buffer: Vec::new(),
            head,
            read_cursor: head,
            length: 0,
            read_position: 0,
            version,
        })
    }

    /// Reopens a rolling file after a remount. The next-block offset is
    /// derived from `head`'s position in the extent rather than persisted
    /// separately — `head` always names the current generation's first
    /// block, so `head + 1` (mod extent) is always where the chain resumes.
    pub fn open(
        head: BlockAddress,
        data_start: u32,
        data_blocks: u32,
        index: FileIndex,
        length: u32,
        version: u32,
    ) -> Self {
        let blocks = data_blocks.max(1);
        let current_offset = head.block.saturating_sub(data_start) % blocks;
        let format = PlainBlockFormat { block_type: BlockType::File };
        Self {
            layout: BlockLayout::new(format, head, version),
            cursor: ExtentCursorAllocator::new(data_start, blocks, current_offset + 1),
            index,
            buffer: Vec::new(),
            head,
            read_cursor: head,
            length,
            read_position: 0,
            version,
        }
    }
}

/// Shared block-transition bookkeeping for [`RollingFile`], called from both
/// `write` and `flush` so the wrap-detection logic lives in one place.
fn note_rolling_chunk(
    storage: &mut dyn StorageBackend,
    index: &mut FileIndex,
    head: &mut BlockAddress,
    read_cursor: &mut BlockAddress,
    read_position: &mut u32,
    length: &mut u32,
    before: &mut u32,
    data_start: u32,
    addr: BlockAddress,
    chunk: &[u8],
) -> PhylumResult<()> {
    if addr.block != *before {
        *before = addr.block;
        if addr.block == data_start {
            index.reindex(storage, &[(0, BlockAddress::new(addr.block, head_size()))])?;
            *head = BlockAddress::new(addr.block, head_size());
            *read_cursor = *head;
            *read_position = 0;
            *length = 0;
        } else {
            index.append(storage, *length, BlockAddress::new(addr.block, head_size()))?;
        }
    }
    *length += chunk.len() as u32;
    Ok(())
}

impl File for RollingFile {
    fn read(&mut self, storage: &mut dyn StorageBackend, buf: &mut [u8]) -> PhylumResult<usize> {
        let available = self.length.saturating_sub(self.read_position) as usize;
        let take = buf.len().min(available);
        if take == 0 {
            return Ok(0);
        }
        read_bytes(storage, &mut self.read_cursor, &mut buf[..take])?;
        self.read_position += take as u32;
        Ok(take)
    }

    fn write(
        &mut self,
        storage: &mut dyn StorageBackend,
        _allocator: &mut dyn BlockAllocator,
        data: &[u8],
        span_sectors: bool,
        span_blocks: bool,
    ) -> PhylumResult<usize> {
        let data_start = self.cursor.start();
        let mut before = self.layout.address.block;
        let index = &mut self.index;
        let head = &mut self.head;
        let read_cursor = &mut self.read_cursor;
        let read_position = &mut self.read_position;
        let length = &mut self.length;

        write_through(&mut self.layout, &mut self.buffer, storage, &mut self.cursor, data, span_sectors, span_blocks, |storage, addr, chunk| {
            note_rolling_chunk(storage, index, head, read_cursor, read_position, length, &mut before, data_start, addr, chunk)
        })?;

        Ok(data.len())
    }

    fn seek(&mut self, storage: &mut dyn StorageBackend, target: u32) -> PhylumResult<()> {
        let target = if target == SEEK_TO_END { self.length } else { target };
        if target > self.length {
            return Err(PhylumError::InvalidArgument);
        }
        let record = self.index.find(storage, target)?;
        self.read_cursor = BlockAddress::new(record.block, record.byte_position);
        self.read_position = record.position;
        let mut remaining = target - self.read_position;
        let mut scratch = [0u8; 64];
        while remaining > 0 {
            let take = remaining.min(64);
            read_bytes(storage, &mut self.read_cursor, &mut scratch[..take as usize])?;
            remaining -= take;
            self.read_position += take;
        }
        Ok(())
    }

    fn flush(&mut self, storage: &mut dyn StorageBackend, _allocator: &mut dyn BlockAllocator) -> PhylumResult<()> {
        if !self.buffer.is_empty() {
            let chunk = core::mem::take(&mut self.buffer);
            let data_start = self.cursor.start();
            let mut before = self.layout.address.block;
            let addr = self.layout.append(storage, &mut self.cursor, &chunk)?;
            note_rolling_chunk(
                storage,
                &mut self.index,
                &mut self.head,
                &mut self.read_cursor,
                &mut self.read_position,
                &mut self.length,
                &mut before,
                data_start,
                addr,
                &chunk,
            )?;
        }
        self.layout.terminate(storage)
    }

    fn length(&self) -> u32 {
        self.length
    }

    fn position(&self) -> u32 {
        self.read_position
    }

    fn version(&self) -> u32 {
        self.version
    }
}

/// Boxes a freshly created file as a trait object, the shape every caller
/// above this layer actually holds.
pub fn boxed(file: impl File + 'static) -> Box<dyn File> {
    Box::new(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::SequentialBlockAllocator;
    use crate::geometry::Geometry;
    use crate::storage::MemoryStorage;

    fn geometry() -> Geometry {
        Geometry::new(0, 32, 2, 2, SECTOR_SIZE).unwrap()
    }

    #[test]
    fn simple_file_round_trips_small_writes() {
        let g = geometry();
        let mut storage = MemoryStorage::new(g);
        let mut allocator = SequentialBlockAllocator::new(4);

        let mut file = SimpleFile::create(&mut storage, 4, 1).unwrap();
        file.write(&mut storage, &mut allocator, b"hello world", true, true).unwrap();
        file.flush(&mut storage, &mut allocator).unwrap();

        let mut reader = SimpleFile::open(file.head, file.length(), file.version());
        let mut out = [0u8; 11];
        let n = reader.read(&mut storage, &mut out).unwrap();
        assert_eq!(n, 11);
        assert_eq!(&out, b"hello world");
    }

    #[test]
    fn seek_to_end_lands_on_the_current_length() {
        let g = geometry();
        let mut storage = MemoryStorage::new(g);
        let mut allocator = SequentialBlockAllocator::new(4);

        let mut file = SimpleFile::create(&mut storage, 4, 1).unwrap();
        file.write(&mut storage, &mut allocator, b"hello world", true, true).unwrap();
        file.flush(&mut storage, &mut allocator).unwrap();

        let mut reader = SimpleFile::open(file.head, file.length(), file.version());
        reader.seek(&mut storage, SEEK_TO_END).unwrap();
        assert_eq!(reader.position(), 11);
    }

    #[test]
    fn atomic_write_rejects_entries_too_large_for_one_sector() {
        let g = geometry();
        let mut storage = MemoryStorage::new(g);
        let mut allocator = SequentialBlockAllocator::new(4);
        let mut file = SimpleFile::create(&mut storage, 4, 1).unwrap();

        let oversized = vec![0u8; SECTOR_SIZE as usize];
        assert!(file.write(&mut storage, &mut allocator, &oversized, false, true).is_err());
    }

    #[test]
    fn atomic_write_does_not_coalesce_with_a_neighboring_spanning_write() {
        let g = geometry();
        let mut storage = MemoryStorage::new(g);
        let mut allocator = SequentialBlockAllocator::new(4);
        let mut file = SimpleFile::create(&mut storage, 4, 1).unwrap();

        // A spanning write that doesn't fill a sector leaves bytes buffered.
        file.write(&mut storage, &mut allocator, b"partial", true, true).unwrap();
        // An atomic entry must not be merged into that same buffered chunk.
        file.write(&mut storage, &mut allocator, b"atomic-entry", false, true).unwrap();
        file.flush(&mut storage, &mut allocator).unwrap();

        let mut reader = SimpleFile::open(file.head, file.length(), file.version());
        let mut out = vec![0u8; file.length() as usize];
        reader.read(&mut storage, &mut out).unwrap();
        assert_eq!(&out, b"partialatomic-entry");
    }

    #[test]
    fn rolling_file_wraps_and_keeps_only_the_latest_generation() {
        let g = geometry();
        let mut storage = MemoryStorage::new(g);
        let mut allocator = SequentialBlockAllocator::new(20);

        let data_start = 4;
        let data_blocks = 2;
        let index = FileIndex::new(10, 2);
        let mut file = RollingFile::create(&mut storage, data_start, data_blocks, index, 1).unwrap();

        // Write enough chunks that the extent, which can only hold a few
        // blocks' worth, must wrap at least once.
        let mut input = Vec::new();
        for pattern in 1u8..=12 {
            let chunk = [pattern; SECTOR_SIZE as usize];
            file.write(&mut storage, &mut allocator, &chunk, true, true).unwrap();
            input.extend_from_slice(&chunk);
        }
        file.flush(&mut storage, &mut allocator).unwrap();

        let length = file.length() as usize;
        assert!(length < input.len(), "a bounded extent must wrap rather than keep growing");
        assert!(length > 0);

        let index = FileIndex::new(10, 2);
        let mut reader = RollingFile::open(file.head, data_start, data_blocks, index, file.length(), file.version());
        let mut out = vec![0u8; length];
        let n = reader.read(&mut storage, &mut out).unwrap();
        assert_eq!(n, length);
        assert_eq!(&out[..], &input[input.len() - length..], "should read back only the most recently written cycle");
    }

    #[test]
    fn blocked_file_seek_uses_the_index() {
        let g = geometry();
        let mut storage = MemoryStorage::new(g);
        let mut allocator = SequentialBlockAllocator::new(10);

        let index = FileIndex::new(6, 2);
        let mut file = BlockedFile::create(&mut storage, 4, index, 1).unwrap();

        let chunk = [b'a'; SECTOR_SIZE as usize];
        for _ in 0..3 {
            file.write(&mut storage, &mut allocator, &chunk, true, true).unwrap();
        }
        file.flush(&mut storage, &mut allocator).unwrap();

        file.seek(&mut storage, SECTOR_SIZE * 2).unwrap();
        assert_eq!(file.position(), SECTOR_SIZE * 2);
    }

    #[test]
    fn blocked_file_only_indexes_every_nth_block_transition() {
        let g = geometry();
        let mut storage = MemoryStorage::new(g);
        let mut allocator = SequentialBlockAllocator::new(10);

        let index = FileIndex::new(6, 2);
        let mut file = BlockedFile::create(&mut storage, 4, index, 1).unwrap();

        // Fewer than INDEX_FREQUENCY transitions: seeking into the middle
        // should still work by reading forward from the position-0 record,
        // since no new record was due yet.
        let chunk = [b'a'; SECTOR_SIZE as usize];
        for _ in 0..(INDEX_FREQUENCY - 1) {
            file.write(&mut storage, &mut allocator, &chunk, true, true).unwrap();
        }
        file.flush(&mut storage, &mut allocator).unwrap();
        assert_eq!(file.blocks_since_index, INDEX_FREQUENCY - 2);
    }
}
