//! # Record Index
//!
//! Maps record IDs to block offsets. The file itself has no directory, so the
//! index is a cache built lazily from sequential scans and thrown away
//! whenever the store version moves under it.
//!
//! ## Lookup Path
//!
//! ```text
//! get_record_header(id)
//!   │
//!   ├─ cached offset? ──> read block header there ──> id matches? ──> hit
//!   │
//!   ├─ scan [last_seen_offset, end)   (blocks past the furthest seen so far)
//!   │
//!   └─ scan [DB_HEADER_SIZE, end)     (full rescan)
//! ```
//!
//! Every block visited by a scan is cached and advances `last_seen_offset`,
//! so successive lookups of new records resume where the last scan stopped.
//!
//! ## Version Gating
//!
//! The index remembers the store version it last wrote or observed, along
//! with the data and free sizes of that header. If the header shows anything
//! else at the start of a locked operation, the cache is dropped: another
//! opener may have moved or freed any block. Compaction on close does not
//! bump the version, which is why the sizes take part in the check.
//!
//! ## Free Blocks
//!
//! `free_block` is a first-fit scan from the first block. It never consults
//! the cache. Free blocks are not cached either; compaction resets the
//! high-water mark when it passes one because everything after it moves.

use eyre::{bail, Result};
use hashbrown::HashMap;

use crate::config::{BLOCK_HEADER_SIZE, DB_HEADER_SIZE, INITIAL_OFFSET_CACHE_CAPACITY};
use crate::error::RmsError;
use crate::storage::{BlockHeader, DbHeader, StoreFile};

#[derive(Debug)]
pub struct OffsetCache {
    offsets: HashMap<i32, u32>,
    last_seen_offset: Option<u32>,
}

impl OffsetCache {
    fn new() -> Self {
        Self {
            offsets: HashMap::with_capacity(INITIAL_OFFSET_CACHE_CAPACITY),
            last_seen_offset: None,
        }
    }

    fn clear(&mut self) {
        self.offsets.clear();
        self.last_seen_offset = None;
    }

    fn visit(&mut self, offset: u32, header: &BlockHeader) {
        if !header.is_free() {
            self.offsets.insert(header.record_id, offset);
        }
        self.last_seen_offset = Some(offset);
    }
}

#[derive(Debug)]
pub struct RecordIndex {
    cache: OffsetCache,
    version: u32,
    layout: Option<(u32, u32)>,
}

/// Reads the block header at `offset`, or `None` on a short read.
pub(crate) fn read_block_header<F: StoreFile + ?Sized>(
    file: &mut F,
    offset: u64,
) -> Result<Option<BlockHeader>> {
    let mut buf = [0u8; BLOCK_HEADER_SIZE];
    file.seek(offset)?;
    if file.read(&mut buf)? != BLOCK_HEADER_SIZE {
        return Ok(None);
    }
    BlockHeader::decode(&buf).map(Some)
}

impl RecordIndex {
    pub fn new(version: u32) -> Self {
        Self {
            cache: OffsetCache::new(),
            version,
            layout: None,
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn cached_offset(&self, record_id: i32) -> Option<u32> {
        self.cache.offsets.get(&record_id).copied()
    }

    pub fn last_seen_offset(&self) -> Option<u32> {
        self.cache.last_seen_offset
    }

    /// Drops the cache if the store moved to another version or layout.
    ///
    /// Returns `true` when the cache was invalidated.
    pub fn ensure_validity(&mut self, header: &DbHeader) -> bool {
        let layout = (header.data_size(), header.free_size());
        let moved = self.layout.is_some_and(|seen| seen != layout);
        if self.version == header.version() && !moved {
            return false;
        }
        tracing::debug!(
            index_version = self.version,
            store_version = header.version(),
            moved,
            "record index invalidated"
        );
        self.cache.clear();
        self.observe(header);
        true
    }

    pub fn record_store_version_updated(&mut self, new_version: u32) {
        self.version = new_version;
    }

    /// Records the header this index is consistent with.
    pub fn observe(&mut self, header: &DbHeader) {
        self.version = header.version();
        self.layout = Some((header.data_size(), header.free_size()));
    }

    /// Locates the block of `record_id`.
    ///
    /// `end` is the offset one past the last block.
    pub fn get_record_header<F: StoreFile + ?Sized>(
        &mut self,
        file: &mut F,
        end: u32,
        record_id: i32,
    ) -> Result<(u32, BlockHeader)> {
        if record_id <= 0 {
            bail!(RmsError::InvalidRecordId(record_id));
        }

        if let Some(offset) = self.cached_offset(record_id) {
            match read_block_header(file, offset as u64)? {
                Some(header) if header.record_id == record_id => return Ok((offset, header)),
                Some(_) => {}
                None => self.cache.clear(),
            }
        }

        if let Some(from) = self.cache.last_seen_offset {
            if let Some(found) = self.search(file, record_id, from, end)? {
                return Ok(found);
            }
        }

        match self.search(file, record_id, DB_HEADER_SIZE as u32, end)? {
            Some(found) => Ok(found),
            None => bail!(RmsError::InvalidRecordId(record_id)),
        }
    }

    fn search<F: StoreFile + ?Sized>(
        &mut self,
        file: &mut F,
        record_id: i32,
        from: u32,
        end: u32,
    ) -> Result<Option<(u32, BlockHeader)>> {
        let mut offset = from as u64;
        while offset < end as u64 {
            let header = match read_block_header(file, offset)? {
                Some(header) => header,
                None => return Ok(None),
            };
            let block_offset = offset as u32;
            self.cache.visit(block_offset, &header);
            if header.record_id == record_id {
                return Ok(Some((block_offset, header)));
            }
            offset += header.block_size() as u64;
        }
        Ok(None)
    }

    /// IDs of live records in file order, at most `num_live` of them.
    pub fn record_ids<F: StoreFile + ?Sized>(
        &self,
        file: &mut F,
        end: u32,
        num_live: u32,
    ) -> Result<Vec<i32>> {
        let mut ids = Vec::with_capacity(num_live as usize);
        let mut offset = DB_HEADER_SIZE as u64;
        while offset < end as u64 && ids.len() < num_live as usize {
            let header = match read_block_header(file, offset)? {
                Some(header) => header,
                None => break,
            };
            if header.record_id > 0 {
                ids.push(header.record_id);
            }
            offset += header.block_size() as u64;
        }
        Ok(ids)
    }

    /// First free block whose total size is at least `target_size`.
    pub fn free_block<F: StoreFile + ?Sized>(
        &self,
        file: &mut F,
        end: u32,
        target_size: u32,
    ) -> Result<Option<(u32, BlockHeader)>> {
        let mut offset = DB_HEADER_SIZE as u64;
        while offset < end as u64 {
            let header = match read_block_header(file, offset)? {
                Some(header) => header,
                None => bail!(RmsError::StoreCorrupt(format!(
                    "block header at offset {} is truncated",
                    offset
                ))),
            };
            if header.is_free() && header.block_size() >= target_size {
                tracing::trace!(offset, size = header.block_size(), "found free block");
                return Ok(Some((offset as u32, header)));
            }
            offset += header.block_size() as u64;
        }
        Ok(None)
    }

    pub fn update_block(&mut self, offset: u32, header: &BlockHeader) {
        if !header.is_free() {
            self.cache.offsets.insert(header.record_id, offset);
        }
    }

    /// Forgets where the last scan stopped. Compaction calls this for every
    /// free block it passes.
    pub fn forget_scan_position(&mut self) {
        self.cache.last_seen_offset = None;
    }

    pub fn delete_record_index(&mut self, record_id: i32) {
        self.cache.offsets.remove(&record_id);
    }
}
