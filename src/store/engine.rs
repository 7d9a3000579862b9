//! # Record Store Engine
//!
//! `RecordStoreImpl` is one open of one store: it owns the store file and a
//! private record index, and shares the header mirror and lock with every
//! other open of the same store in the environment.
//!
//! ## Locked Sessions
//!
//! Every operation that reads or writes the file runs as a locked session:
//!
//! ```text
//! shared header mutex ──> file lock ──> reload header ──> validate index
//!        │                                                      │
//!        │                   operation on LockedStore <─────────┘
//!        │                                                      │
//!        └──── released in reverse order on every exit path <───┘
//! ```
//!
//! ## Block Allocation
//!
//! ```text
//! add_block(id, data)
//!   │
//!   ├─ free_size >= block_size? ──> first-fit free block ──> split in place
//!   │
//!   ├─ space_available < block_size?
//!   │     ├─ space_available + free_size < block_size ──> StoreFull
//!   │     └─ otherwise compact first
//!   │
//!   └─ append at end of file, grow data_size
//! ```
//!
//! Splitting writes the new block over the old one and turns any remainder
//! of at least one block header into a free block right behind it.
//!
//! ## Header Writes
//!
//! Each mutation edits a copy of the header, writes only the changed range,
//! then adopts the copy:
//!
//! | Operation  | Range    | Fields                                   |
//! |------------|----------|------------------------------------------|
//! | add        | 12..32   | next_id, num_live, version, last_modified|
//! | append     | 32..36   | data_size                                |
//! | delete     | 16..32   | num_live, version, last_modified         |
//! | set        | 20..32   | version, last_modified                   |
//! | set_mode   | 8..12    | auth_mode                                |
//! | compaction | 32..40   | data_size, free_size                     |
//! | free/reuse | 36..40   | free_size                                |
//!
//! ## Compaction
//!
//! One forward scan. Free blocks add to `move_up`; live blocks behind them
//! are shifted back by `move_up` through a fixed `COMPACT_BUFFER_SIZE`
//! buffer and re-indexed. The file is truncated to the new size at the end.
//! Compaction runs when an append would not fit otherwise and on final close.
//!
//! ## Failure Behavior
//!
//! An open that created a brand-new file removes it again on failure. A
//! failure in the middle of a mutation can leave file and header out of
//! step; the next open only detects signature-level corruption.

use eyre::{bail, ensure, Result, WrapErr};
use std::ops::Range;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use zerocopy::IntoBytes;

use super::index::{read_block_header, RecordIndex};
use super::shared::{SharedRegistry, SharedStore};
use crate::config::{
    BLOCK_HEADER_SIZE, COMPACT_BUFFER_SIZE, DB_HEADER_SIZE, MAX_RECORD_SIZE, RS1_AUTHMODE,
    RS2_NEXT_ID, RS3_NUM_LIVE, RS4_VERSION, RS6_DATA_SIZE, RS7_FREE_SIZE,
};
use crate::error::{IntoRmsResult, RmsError};
use crate::storage::{
    codec, AnyFile, AuthMode, BlockHeader, DbHeader, FileManager, StoreFile, SuiteId,
};

/// Everything an engine instance needs from its environment.
#[derive(Debug, Clone)]
pub struct StoreContext {
    pub files: FileManager,
    pub registry: Arc<SharedRegistry>,
    pub suite_storage_limit: u32,
}

pub(crate) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn record_len(data: &[u8]) -> Result<u32> {
    if data.len() > MAX_RECORD_SIZE {
        bail!(RmsError::InvalidArgument(format!(
            "record of {} bytes exceeds the maximum of {}",
            data.len(),
            MAX_RECORD_SIZE
        )));
    }
    Ok(data.len() as u32)
}

#[derive(Debug)]
pub struct RecordStoreImpl {
    suite: SuiteId,
    name: String,
    created: bool,
    suite_storage_limit: u32,
    state: Option<OpenState>,
}

#[derive(Debug)]
struct OpenState {
    file: AnyFile,
    index: RecordIndex,
    shared: Arc<SharedStore>,
    registry: Arc<SharedRegistry>,
    compact_buffer: Box<[u8]>,
}

impl OpenState {
    fn locked<T>(
        &mut self,
        suite_storage_limit: u32,
        op: impl FnOnce(&mut LockedStore<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut header = self.shared.lock();
        let _file_lock = self.file.lock()?;

        let mut store = LockedStore {
            file: &mut self.file,
            index: &mut self.index,
            header: &mut *header,
            compact_buffer: &mut self.compact_buffer[..],
            suite_storage_limit,
        };
        store.reload_header()?;
        let value = op(&mut store)?;
        store.index.observe(&*store.header);
        Ok(value)
    }
}

impl RecordStoreImpl {
    /// Opens `name` of `suite`, creating it when `create` is set.
    pub fn open(
        ctx: &StoreContext,
        suite: SuiteId,
        name: &str,
        create: bool,
    ) -> crate::error::Result<Self> {
        let (mut file, created) = ctx.files.open_store(suite, name, create).into_rms()?;
        let shared = ctx.registry.acquire(suite, name);

        match Self::load_header(&mut file, &shared, created) {
            Ok(header) => {
                tracing::debug!(
                    suite = %suite,
                    store = name,
                    created,
                    version = header.version(),
                    records = header.num_live(),
                    "record store opened"
                );
                let mut index = RecordIndex::new(header.version());
                index.observe(&header);
                Ok(Self {
                    suite,
                    name: name.to_string(),
                    created,
                    suite_storage_limit: ctx.suite_storage_limit,
                    state: Some(OpenState {
                        file,
                        index,
                        shared,
                        registry: Arc::clone(&ctx.registry),
                        compact_buffer: vec![0u8; COMPACT_BUFFER_SIZE].into_boxed_slice(),
                    }),
                })
            }
            Err(e) => {
                ctx.registry.release(shared.key());
                drop(file);
                if created {
                    if let Err(cleanup) = ctx.files.delete_store(suite, name) {
                        tracing::warn!(
                            store = name,
                            error = %cleanup,
                            "failed to remove store after failed open"
                        );
                    }
                }
                Err(RmsError::from_report(
                    e.wrap_err(format!("error opening record store '{}'", name)),
                ))
            }
        }
    }

    fn load_header(file: &mut AnyFile, shared: &SharedStore, created: bool) -> Result<DbHeader> {
        let mut mirror = shared.lock();
        let _file_lock = file.lock()?;

        let mut len = file.len()?;
        if len == 0 {
            let fresh = DbHeader::new(now_ms());
            file.write_at(0, fresh.as_bytes())
                .wrap_err("failed to write initial store header")?;
            file.commit_write()?;
            len = DB_HEADER_SIZE as u64;
            tracing::debug!(created, "initialized empty store file");
        }

        if len < DB_HEADER_SIZE as u64 {
            bail!(RmsError::StoreCorrupt(format!(
                "file of {} bytes is shorter than the store header",
                len
            )));
        }

        let mut buf = [0u8; DB_HEADER_SIZE];
        file.read_at(0, &mut buf)?;
        let header = DbHeader::from_bytes(&buf)?;
        if len != header.file_size() as u64 {
            tracing::warn!(
                file_len = len,
                expected = header.file_size(),
                "store file length disagrees with header"
            );
        }
        *mirror = header;
        Ok(header)
    }

    pub fn suite(&self) -> SuiteId {
        self.suite
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this open created the store file.
    pub fn was_created(&self) -> bool {
        self.created
    }

    pub fn is_open(&self) -> bool {
        self.state.is_some()
    }

    fn locked<T>(&mut self, op: impl FnOnce(&mut LockedStore<'_>) -> Result<T>) -> Result<T> {
        let limit = self.suite_storage_limit;
        match self.state.as_mut() {
            Some(state) => state.locked(limit, op),
            None => bail!(RmsError::NotOpen),
        }
    }

    /// Compacts, closes the file, and releases the shared header.
    pub fn close(&mut self) -> crate::error::Result<()> {
        let mut state = self.state.take().ok_or(RmsError::NotOpen)?;

        let result = state
            .locked(self.suite_storage_limit, |s| s.compact_records())
            .and_then(|_| state.file.close())
            .wrap_err_with(|| format!("error closing record store '{}'", self.name));
        let remaining = state.registry.release(state.shared.key());

        tracing::debug!(store = %self.name, remaining, "record store closed");
        result.into_rms()
    }

    pub fn add_record(&mut self, data: &[u8]) -> crate::error::Result<i32> {
        self.locked(|s| {
            let record_id = s.header.next_id();
            let next_id = record_id
                .checked_add(1)
                .ok_or_else(|| eyre::eyre!("record id space exhausted"))?;

            s.add_block(record_id, data)?;

            let mut updated = *s.header;
            updated.set_next_id(next_id);
            updated.set_num_live(updated.num_live() + 1);
            let version = updated.touch(now_ms());
            s.write_header(updated, RS2_NEXT_ID..RS6_DATA_SIZE)?;
            s.index.record_store_version_updated(version);
            Ok(record_id)
        })
        .wrap_err("error writing new record data")
        .into_rms()
    }

    pub fn delete_record(&mut self, record_id: i32) -> crate::error::Result<()> {
        self.locked(|s| {
            let (offset, header) = s.find(record_id)?;
            s.free_block(offset, header)?;
            s.index.delete_record_index(record_id);

            let mut updated = *s.header;
            updated.set_num_live(updated.num_live().saturating_sub(1));
            let version = updated.touch(now_ms());
            s.write_header(updated, RS3_NUM_LIVE..RS6_DATA_SIZE)?;
            s.index.record_store_version_updated(version);
            Ok(())
        })
        .into_rms()
    }

    pub fn get_record(&mut self, record_id: i32) -> crate::error::Result<Vec<u8>> {
        self.locked(|s| {
            let (offset, header) = s.find(record_id)?;
            let mut data = vec![0u8; header.data_len as usize];
            s.file
                .read_at(offset as u64 + BLOCK_HEADER_SIZE as u64, &mut data)
                .wrap_err("error reading record data")?;
            Ok(data)
        })
        .into_rms()
    }

    /// Copies the record into `buf`, returning its length.
    pub fn get_record_into(&mut self, record_id: i32, buf: &mut [u8]) -> crate::error::Result<usize> {
        self.locked(|s| {
            let (offset, header) = s.find(record_id)?;
            let len = header.data_len as usize;
            if buf.len() < len {
                bail!(RmsError::InvalidArgument(format!(
                    "buffer of {} bytes cannot hold record {} of {} bytes",
                    buf.len(),
                    record_id,
                    len
                )));
            }
            s.file
                .read_at(offset as u64 + BLOCK_HEADER_SIZE as u64, &mut buf[..len])
                .wrap_err("error reading record data")?;
            Ok(len)
        })
        .into_rms()
    }

    pub fn set_record(&mut self, record_id: i32, data: &[u8]) -> crate::error::Result<()> {
        self.locked(|s| {
            let (offset, old) = s.find(record_id)?;
            let new_size = codec::block_size(record_len(data)?);
            let old_size = old.block_size();

            if new_size <= old_size {
                s.split_block(offset, old, data)?;
            } else {
                let available = s.size_available()? as u64;
                let reclaimable = s.header.free_size() as u64 + old_size as u64;
                if available < new_size as u64 && (available + reclaimable) < new_size as u64 {
                    bail!(RmsError::StoreFull {
                        requested: new_size,
                        available: available as u32,
                    });
                }
                s.free_block(offset, old)?;
                s.add_block(record_id, data)?;
            }

            let mut updated = *s.header;
            let version = updated.touch(now_ms());
            s.write_header(updated, RS4_VERSION..RS6_DATA_SIZE)?;
            s.index.record_store_version_updated(version);
            Ok(())
        })
        .wrap_err("error setting record data")
        .into_rms()
    }

    pub fn get_record_size(&mut self, record_id: i32) -> crate::error::Result<u32> {
        self.locked(|s| Ok(s.find(record_id)?.1.data_len)).into_rms()
    }

    /// IDs of all live records in file order.
    pub fn get_record_ids(&mut self) -> crate::error::Result<Vec<i32>> {
        self.locked(|s| {
            let end = s.end();
            let num_live = s.header.num_live();
            s.index.record_ids(&mut *s.file, end, num_live)
        })
        .into_rms()
    }

    pub fn get_num_records(&mut self) -> crate::error::Result<u32> {
        self.read_header(|h| h.num_live())
    }

    /// Total file size including the header.
    pub fn get_size(&mut self) -> crate::error::Result<u32> {
        self.read_header(|h| h.file_size())
    }

    pub fn get_size_available(&mut self) -> crate::error::Result<u32> {
        self.locked(|s| s.size_available()).into_rms()
    }

    pub fn get_version(&mut self) -> crate::error::Result<u32> {
        self.read_header(|h| h.version())
    }

    pub fn get_last_modified(&mut self) -> crate::error::Result<i64> {
        self.read_header(|h| h.last_modified())
    }

    pub fn get_next_record_id(&mut self) -> crate::error::Result<i32> {
        self.read_header(|h| h.next_id())
    }

    pub fn get_auth_mode(&mut self) -> crate::error::Result<AuthMode> {
        self.read_header(|h| h.mode())
    }

    fn read_header<T>(&mut self, read: impl FnOnce(&DbHeader) -> T) -> crate::error::Result<T> {
        self.locked(|s| Ok(read(&*s.header))).into_rms()
    }

    pub fn set_mode(&mut self, mode: AuthMode, writable: bool) -> crate::error::Result<()> {
        self.locked(|s| {
            let mut updated = *s.header;
            updated.set_auth_mode(mode.with_writable(writable).to_raw());
            s.write_header(updated, RS1_AUTHMODE..RS2_NEXT_ID)
        })
        .wrap_err("error writing record store attributes")
        .into_rms()
    }

    /// Removes all free blocks now instead of waiting for close.
    pub fn compact(&mut self) -> crate::error::Result<()> {
        self.locked(|s| s.compact_records()).into_rms()
    }

    /// Every block in file order with its offset.
    pub fn blocks(&mut self) -> crate::error::Result<Vec<(u32, BlockHeader)>> {
        self.locked(|s| {
            let end = s.end() as u64;
            let mut blocks = Vec::new();
            let mut offset = DB_HEADER_SIZE as u64;
            while offset < end {
                let header = s.block_header_at(offset)?;
                blocks.push((offset as u32, header));
                offset += header.block_size() as u64;
            }
            Ok(blocks)
        })
        .into_rms()
    }
}

impl Drop for RecordStoreImpl {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            state.registry.release(state.shared.key());
        }
    }
}

/// A store while its lock is held.
struct LockedStore<'a> {
    file: &'a mut AnyFile,
    index: &'a mut RecordIndex,
    header: &'a mut DbHeader,
    compact_buffer: &'a mut [u8],
    suite_storage_limit: u32,
}

impl LockedStore<'_> {
    fn end(&self) -> u32 {
        self.header.file_size()
    }

    fn reload_header(&mut self) -> Result<()> {
        let mut buf = [0u8; DB_HEADER_SIZE];
        self.file
            .read_at(0, &mut buf)
            .wrap_err("failed to read store header")?;
        let on_disk = DbHeader::from_bytes(&buf)?;
        if on_disk != *self.header {
            tracing::debug!(
                version = on_disk.version(),
                cached_version = self.header.version(),
                "store header reloaded from file"
            );
            *self.header = on_disk;
        }
        self.index.ensure_validity(&*self.header);
        Ok(())
    }

    fn write_header(&mut self, updated: DbHeader, range: Range<usize>) -> Result<()> {
        self.file
            .write_at(range.start as u64, &updated.as_bytes()[range.clone()])
            .wrap_err_with(|| format!("failed to write store header bytes {:?}", range))?;
        *self.header = updated;
        Ok(())
    }

    fn block_header_at(&mut self, offset: u64) -> Result<BlockHeader> {
        match read_block_header(&mut *self.file, offset)? {
            Some(header) => Ok(header),
            None => bail!(RmsError::StoreCorrupt(format!(
                "block header at offset {} is truncated",
                offset
            ))),
        }
    }

    fn find(&mut self, record_id: i32) -> Result<(u32, BlockHeader)> {
        let end = self.end();
        self.index.get_record_header(&mut *self.file, end, record_id)
    }

    fn size_available(&self) -> Result<u32> {
        let overhead = (BLOCK_HEADER_SIZE + DB_HEADER_SIZE) as i64;
        let file_space = self.file.space_available()?.min(i64::MAX as u64) as i64 - overhead;
        let limit_space =
            self.suite_storage_limit as i64 - self.header.data_size() as i64 - overhead;
        Ok(file_space.min(limit_space).clamp(0, u32::MAX as i64) as u32)
    }

    fn write_block(&mut self, offset: u32, header: BlockHeader, data: &[u8]) -> Result<()> {
        self.file
            .write_at(offset as u64, &header.encode()?)
            .wrap_err_with(|| format!("failed to write block header at offset {}", offset))?;
        if !data.is_empty() {
            self.file.write(data)?;
            let padding = codec::padding(data.len() as u32) as usize;
            if padding > 0 {
                self.file.write(&[0u8; BLOCK_HEADER_SIZE][..padding])?;
            }
        }
        self.index.update_block(offset, &header);
        Ok(())
    }

    fn free_block(&mut self, offset: u32, header: BlockHeader) -> Result<()> {
        let size = header.block_size();
        tracing::trace!(offset, size, record_id = header.record_id, "freeing block");

        self.write_block(offset, BlockHeader::free(size - BLOCK_HEADER_SIZE as u32), &[])?;

        let mut updated = *self.header;
        updated.set_free_size(updated.free_size() + size);
        self.write_header(updated, RS7_FREE_SIZE..DB_HEADER_SIZE)
    }

    /// Overwrites the block at `offset` with `data` for `old.record_id`.
    ///
    /// The new block must not be larger than `old`.
    fn split_block(&mut self, offset: u32, old: BlockHeader, data: &[u8]) -> Result<()> {
        let new_header = BlockHeader::new(old.record_id, record_len(data)?);
        let old_size = old.block_size();
        let new_size = new_header.block_size();
        ensure!(
            new_size <= old_size,
            "block of {} bytes cannot be split for {} bytes",
            old_size,
            new_size
        );

        self.write_block(offset, new_header, data)?;

        if old_size - new_size >= BLOCK_HEADER_SIZE as u32 {
            let rest = BlockHeader::new(
                old.record_id,
                old_size - new_size - BLOCK_HEADER_SIZE as u32,
            );
            self.free_block(offset + new_size, rest)?;
        }
        Ok(())
    }

    fn add_block(&mut self, record_id: i32, data: &[u8]) -> Result<u32> {
        let len = record_len(data)?;
        let block_size = codec::block_size(len);
        let free_size = self.header.free_size();

        if free_size >= block_size {
            let end = self.end();
            if let Some((offset, free)) = self.index.free_block(&mut *self.file, end, block_size)? {
                tracing::debug!(record_id, offset, block_size, "reusing free block");

                let mut updated = *self.header;
                updated.set_free_size(free_size - free.block_size());
                self.write_header(updated, RS7_FREE_SIZE..DB_HEADER_SIZE)?;

                self.split_block(offset, BlockHeader::new(record_id, free.data_len), data)?;
                return Ok(offset);
            }
        }

        let available = self.size_available()?;
        if available < block_size {
            if (available as u64 + free_size as u64) < block_size as u64 {
                bail!(RmsError::StoreFull {
                    requested: block_size,
                    available,
                });
            }
            tracing::debug!(record_id, block_size, available, "compacting before append");
            self.compact_records()?;
        }

        let offset = self.end();
        self.write_block(offset, BlockHeader::new(record_id, len), data)?;

        let mut updated = *self.header;
        updated.set_data_size(updated.data_size() + block_size);
        self.write_header(updated, RS6_DATA_SIZE..RS7_FREE_SIZE)?;

        tracing::debug!(record_id, offset, block_size, "appended block");
        Ok(offset)
    }

    fn compact_records(&mut self) -> Result<()> {
        if self.header.free_size() == 0 {
            return Ok(());
        }

        let end = self.end();
        let mut offset = DB_HEADER_SIZE as u32;
        let mut move_up = 0u32;

        while offset < end {
            let header = self.block_header_at(offset as u64)?;
            let size = header.block_size();

            if header.is_free() {
                move_up += size;
                self.index.forget_scan_position();
            } else if move_up > 0 {
                let mut moved = 0u32;
                while moved < size {
                    let chunk = (size - moved).min(COMPACT_BUFFER_SIZE as u32) as usize;
                    let from = (offset + moved) as u64;
                    self.file.read_at(from, &mut self.compact_buffer[..chunk])?;
                    self.file
                        .write_at(from - move_up as u64, &self.compact_buffer[..chunk])?;
                    moved += chunk as u32;
                }
                self.index.update_block(offset - move_up, &header);
                tracing::trace!(
                    record_id = header.record_id,
                    from = offset,
                    to = offset - move_up,
                    "moved block"
                );
            }
            offset += size;
        }

        let mut updated = *self.header;
        updated.set_data_size(updated.data_size().saturating_sub(move_up));
        updated.set_free_size(0);
        self.write_header(updated, RS6_DATA_SIZE..DB_HEADER_SIZE)?;
        self.file
            .truncate(self.header.file_size() as u64)
            .wrap_err("failed to truncate store after compaction")?;

        tracing::debug!(reclaimed = move_up, size = self.header.file_size(), "compacted records");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_SUITE_STORAGE_LIMIT;
    use crate::storage::{MemoryVolume, StorageKind};
    use tempfile::tempdir;

    fn memory_context() -> StoreContext {
        StoreContext {
            files: FileManager::new(StorageKind::memory()).unwrap(),
            registry: Arc::new(SharedRegistry::new()),
            suite_storage_limit: DEFAULT_SUITE_STORAGE_LIMIT,
        }
    }

    fn open(ctx: &StoreContext) -> RecordStoreImpl {
        RecordStoreImpl::open(ctx, SuiteId(1), "test", true).unwrap()
    }

    fn assert_accounting(store: &mut RecordStoreImpl) {
        let blocks = store.blocks().unwrap();
        let total: u32 = blocks.iter().map(|(_, h)| h.block_size()).sum();
        let free: u32 = blocks
            .iter()
            .filter(|(_, h)| h.is_free())
            .map(|(_, h)| h.block_size())
            .sum();
        let size = store.get_size().unwrap();
        assert_eq!(total + DB_HEADER_SIZE as u32, size);
        let header = store.state.as_ref().unwrap().shared.header();
        assert_eq!(free, header.free_size());
    }

    #[test]
    fn new_store_is_empty() {
        let ctx = memory_context();
        let mut store = open(&ctx);

        assert!(store.was_created());
        assert_eq!(store.get_num_records().unwrap(), 0);
        assert_eq!(store.get_size().unwrap(), 40);
        assert_eq!(store.get_next_record_id().unwrap(), 1);
        assert_eq!(store.get_version().unwrap(), 0);
        assert!(store.get_record_ids().unwrap().is_empty());
    }

    #[test]
    fn add_then_get_returns_data() {
        let ctx = memory_context();
        let mut store = open(&ctx);

        let id = store.add_record(&[1, 2, 3]).unwrap();

        assert_eq!(id, 1);
        assert_eq!(store.get_record(id).unwrap(), vec![1, 2, 3]);
        assert_eq!(store.get_record_size(id).unwrap(), 3);
        assert_eq!(store.get_size().unwrap(), 40 + 16);
    }

    #[test]
    fn deleted_ids_are_never_reused() {
        let ctx = memory_context();
        let mut store = open(&ctx);

        let id = store.add_record(&[1, 2, 3]).unwrap();
        store.delete_record(id).unwrap();

        assert_eq!(store.get_num_records().unwrap(), 0);
        assert!(store.get_record_ids().unwrap().is_empty());
        assert_eq!(store.add_record(&[4]).unwrap(), 2);
    }

    #[test]
    fn get_of_deleted_record_is_invalid_id() {
        let ctx = memory_context();
        let mut store = open(&ctx);
        let id = store.add_record(b"gone").unwrap();
        store.delete_record(id).unwrap();

        let err = store.get_record(id).unwrap_err();

        assert!(err.is_invalid_record_id());
        assert!(store.delete_record(id).unwrap_err().is_invalid_record_id());
        assert!(store.get_record(0).unwrap_err().is_invalid_record_id());
    }

    #[test]
    fn freed_block_is_reused_first_fit() {
        let ctx = memory_context();
        let mut store = open(&ctx);
        store.add_record(&[0u8; 10]).unwrap();
        let middle = store.add_record(&[0u8; 4000]).unwrap();
        store.add_record(&[0u8; 10]).unwrap();
        let freed_offset = store.state.as_mut().unwrap().index.cached_offset(middle).unwrap();
        let size_before = store.get_size().unwrap();

        store.delete_record(middle).unwrap();
        let id = store.add_record(&[7u8; 20]).unwrap();

        let offset = store.state.as_mut().unwrap().index.cached_offset(id).unwrap();
        assert_eq!(offset, freed_offset);
        assert_eq!(store.get_size().unwrap(), size_before);
        assert_eq!(store.get_record(id).unwrap(), vec![7u8; 20]);
        assert_accounting(&mut store);
    }

    #[test]
    fn set_record_in_place_splits_remainder() {
        let ctx = memory_context();
        let mut store = open(&ctx);
        let id = store.add_record(&[1u8; 100]).unwrap();
        let version = store.get_version().unwrap();

        store.set_record(id, &[2u8; 10]).unwrap();

        assert_eq!(store.get_record(id).unwrap(), vec![2u8; 10]);
        assert_eq!(store.get_num_records().unwrap(), 1);
        assert!(store.get_version().unwrap() > version);
        let blocks = store.blocks().unwrap();
        assert_eq!(blocks.len(), 2);
        assert!(blocks[1].1.is_free());
        assert_accounting(&mut store);
    }

    #[test]
    fn set_record_larger_moves_block() {
        let ctx = memory_context();
        let mut store = open(&ctx);
        let a = store.add_record(&[1u8; 8]).unwrap();
        let b = store.add_record(&[2u8; 8]).unwrap();

        store.set_record(a, &[3u8; 64]).unwrap();

        assert_eq!(store.get_record(a).unwrap(), vec![3u8; 64]);
        assert_eq!(store.get_record(b).unwrap(), vec![2u8; 8]);
        assert_eq!(store.get_record_ids().unwrap(), vec![b, a]);
        assert_accounting(&mut store);
    }

    #[test]
    fn compaction_removes_free_blocks_and_keeps_data() {
        let ctx = memory_context();
        let mut store = open(&ctx);
        let ids: Vec<i32> = (0..6u8).map(|i| store.add_record(&[i; 30]).unwrap()).collect();
        store.delete_record(ids[1]).unwrap();
        store.delete_record(ids[3]).unwrap();

        store.compact().unwrap();

        assert_eq!(store.get_size().unwrap(), 40 + 4 * 40);
        assert!(store.blocks().unwrap().iter().all(|(_, h)| !h.is_free()));
        for (i, id) in ids.iter().enumerate() {
            if i == 1 || i == 3 {
                continue;
            }
            assert_eq!(store.get_record(*id).unwrap(), vec![i as u8; 30]);
        }

        let size = store.get_size().unwrap();
        store.compact().unwrap();
        assert_eq!(store.get_size().unwrap(), size);
    }

    #[test]
    fn reads_do_not_bump_version() {
        let ctx = memory_context();
        let mut store = open(&ctx);
        let id = store.add_record(b"x").unwrap();
        let version = store.get_version().unwrap();

        store.get_record(id).unwrap();
        store.get_record_ids().unwrap();
        store.get_record_size(id).unwrap();

        assert_eq!(store.get_version().unwrap(), version);
    }

    #[test]
    fn get_record_into_rejects_small_buffer() {
        let ctx = memory_context();
        let mut store = open(&ctx);
        let id = store.add_record(b"hello").unwrap();

        let mut small = [0u8; 3];
        let err = store.get_record_into(id, &mut small).unwrap_err();
        assert!(matches!(err, RmsError::InvalidArgument(_)));

        let mut buf = [0u8; 8];
        assert_eq!(store.get_record_into(id, &mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"hello");
    }

    #[test]
    fn empty_record_round_trips_as_empty() {
        let ctx = memory_context();
        let mut store = open(&ctx);

        let id = store.add_record(&[]).unwrap();

        assert!(store.get_record(id).unwrap().is_empty());
        assert_eq!(store.get_size().unwrap(), 48);
    }

    #[test]
    fn store_full_when_quota_exhausted() {
        let ctx = StoreContext {
            suite_storage_limit: 200,
            ..memory_context()
        };
        let mut store = open(&ctx);
        store.add_record(&[0u8; 100]).unwrap();

        let err = store.add_record(&[0u8; 100]).unwrap_err();

        assert!(err.is_store_full());
        assert_eq!(store.get_num_records().unwrap(), 1);
    }

    #[test]
    fn append_compacts_when_free_space_covers_shortfall() {
        let ctx = StoreContext {
            suite_storage_limit: 300,
            ..memory_context()
        };
        let mut store = open(&ctx);
        let a = store.add_record(&[1u8; 64]).unwrap();
        let b = store.add_record(&[2u8; 64]).unwrap();
        store.delete_record(a).unwrap();

        let c = store.add_record(&[3u8; 100]).unwrap();

        assert_eq!(store.get_record(b).unwrap(), vec![2u8; 64]);
        assert_eq!(store.get_record(c).unwrap(), vec![3u8; 100]);
        assert!(store.blocks().unwrap().iter().all(|(_, h)| !h.is_free()));
    }

    #[test]
    fn set_mode_writes_auth_mode() {
        let ctx = memory_context();
        let mut store = open(&ctx);

        store.set_mode(AuthMode::Any, false).unwrap();

        assert_eq!(store.get_auth_mode().unwrap(), AuthMode::AnyReadOnly);
    }

    #[test]
    fn closed_store_reports_not_open() {
        let ctx = memory_context();
        let mut store = open(&ctx);

        store.close().unwrap();

        assert!(matches!(store.get_num_records(), Err(RmsError::NotOpen)));
        assert!(matches!(store.close(), Err(RmsError::NotOpen)));
        assert_eq!(ctx.registry.open_count(SuiteId(1), "test"), 0);
    }

    #[test]
    fn close_compacts_and_reopen_sees_records() {
        let dir = tempdir().unwrap();
        let ctx = StoreContext {
            files: FileManager::new(StorageKind::disk(dir.path())).unwrap(),
            registry: Arc::new(SharedRegistry::new()),
            suite_storage_limit: DEFAULT_SUITE_STORAGE_LIMIT,
        };
        let mut store = open(&ctx);
        let a = store.add_record(b"first").unwrap();
        let b = store.add_record(b"second").unwrap();
        store.delete_record(a).unwrap();
        store.close().unwrap();

        let mut store = RecordStoreImpl::open(&ctx, SuiteId(1), "test", false).unwrap();

        assert!(!store.was_created());
        assert_eq!(store.get_record_ids().unwrap(), vec![b]);
        assert_eq!(store.get_record(b).unwrap(), b"second");
        assert_eq!(store.get_size().unwrap(), 40 + 16);
        assert_eq!(store.get_next_record_id().unwrap(), 3);
    }

    #[test]
    fn second_open_sees_version_bump_and_drops_index() {
        let ctx = memory_context();
        let mut first = open(&ctx);
        let mut second = open(&ctx);
        let a = first.add_record(&[1u8; 16]).unwrap();
        let b = first.add_record(&[2u8; 16]).unwrap();
        assert_eq!(second.get_record(b).unwrap(), vec![2u8; 16]);

        first.delete_record(a).unwrap();
        first.compact().unwrap();

        assert_eq!(second.get_record(b).unwrap(), vec![2u8; 16]);
        assert_eq!(second.state.as_ref().unwrap().index.cached_offset(b), Some(40));
    }

    #[test]
    fn external_header_rewrite_invalidates_index() {
        let volume = MemoryVolume::default();
        let ctx = StoreContext {
            files: FileManager::new(StorageKind::Memory { volume: volume.clone() }).unwrap(),
            ..memory_context()
        };
        let mut store = open(&ctx);
        let a = store.add_record(&[1u8; 8]).unwrap();
        let b = store.add_record(&[2u8; 8]).unwrap();
        store.get_record(b).unwrap();

        let buffer = volume.get("suite_1/test.db").unwrap();
        let mut raw = buffer.to_vec();
        let block_a = raw[40..56].to_vec();
        let block_b = raw[56..72].to_vec();
        raw[40..56].copy_from_slice(&block_b);
        raw[56..72].copy_from_slice(&block_a);
        let mut header = DbHeader::from_bytes(&raw).unwrap();
        header.set_version(header.version() + 1);
        raw[..40].copy_from_slice(header.as_bytes());
        buffer.overwrite(&raw);

        assert_eq!(store.get_record(b).unwrap(), vec![2u8; 8]);
        assert_eq!(store.get_record(a).unwrap(), vec![1u8; 8]);
        assert_eq!(store.state.as_ref().unwrap().index.cached_offset(b), Some(40));
    }

    #[test]
    fn corrupt_signature_fails_open() {
        let volume = MemoryVolume::default();
        let (buffer, _) = volume.get_or_create("suite_1/test.db");
        buffer.overwrite(&[0x55; 40]);
        let ctx = StoreContext {
            files: FileManager::new(StorageKind::Memory { volume }).unwrap(),
            ..memory_context()
        };

        let err = RecordStoreImpl::open(&ctx, SuiteId(1), "test", false).unwrap_err();

        assert!(matches!(err, RmsError::StoreCorrupt(_)));
        assert_eq!(ctx.registry.open_count(SuiteId(1), "test"), 0);
    }

    fn volume_context(volume: &MemoryVolume) -> StoreContext {
        StoreContext {
            files: FileManager::new(StorageKind::Memory {
                volume: volume.clone(),
            })
            .unwrap(),
            ..memory_context()
        }
    }

    #[test]
    fn file_space_bounds_append_until_compaction_frees_room() {
        let volume = MemoryVolume::with_capacity(300);
        let ctx = volume_context(&volume);
        let mut store = open(&ctx);
        let first = store.add_record(&[1u8; 100]).unwrap();
        assert_eq!(store.get_size_available().unwrap(), 100);

        let err = store.add_record(&[2u8; 200]).unwrap_err();
        assert!(
            matches!(err, RmsError::StoreFull { requested: 208, available: 100 }),
            "{:?}",
            err
        );
        assert_eq!(store.get_num_records().unwrap(), 1);

        store.delete_record(first).unwrap();
        let second = store.add_record(&[2u8; 200]).unwrap();

        assert_eq!(store.get_record(second).unwrap(), vec![2u8; 200]);
        assert_eq!(store.get_size().unwrap(), 40 + 208);
        assert!(store.blocks().unwrap().iter().all(|(_, h)| !h.is_free()));
        assert_accounting(&mut store);
    }

    #[test]
    fn failed_open_removes_newly_created_file() {
        let volume = MemoryVolume::with_capacity(16);
        let ctx = volume_context(&volume);

        let err = RecordStoreImpl::open(&ctx, SuiteId(1), "test", true).unwrap_err();

        assert!(matches!(err, RmsError::Generic(_)), "{:?}", err);
        assert!(!volume.contains("suite_1/test.db"));
        assert_eq!(ctx.registry.open_count(SuiteId(1), "test"), 0);
    }

    #[test]
    fn failed_open_of_existing_file_leaves_it_in_place() {
        let volume = MemoryVolume::default();
        let (buffer, _) = volume.get_or_create("suite_1/test.db");
        buffer.overwrite(&[0u8; 12]);
        let ctx = volume_context(&volume);

        let err = RecordStoreImpl::open(&ctx, SuiteId(1), "test", true).unwrap_err();

        assert!(matches!(err, RmsError::StoreCorrupt(_)), "{:?}", err);
        assert!(volume.contains("suite_1/test.db"));
    }

    #[test]
    fn open_missing_store_without_create_is_not_found() {
        let ctx = memory_context();

        let err = RecordStoreImpl::open(&ctx, SuiteId(1), "nope", false).unwrap_err();

        assert!(matches!(err, RmsError::NotFound(_)));
    }
}
