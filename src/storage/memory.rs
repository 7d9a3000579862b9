//! # In-Memory Storage Backend
//!
//! This module provides `MemoryFile`, a store file backed by a growable byte
//! buffer, and `MemoryVolume`, the named collection those buffers live in.
//!
//! ## Sharing
//!
//! A buffer is reference counted. Every `MemoryFile` opened on the same name
//! of the same volume sees the same bytes, so two environments built on one
//! cloned `MemoryVolume` behave like two processes sharing a directory:
//!
//! ```text
//! MemoryVolume ──> "suite_7/scores.db" ──> MemoryBuffer { bytes, lock }
//!                                             ^               ^
//!                        MemoryFile (env A) ──┘               │
//!                        MemoryFile (env B) ──────────────────┘
//! ```
//!
//! ## Locking
//!
//! Each buffer carries its own mutex. `lock()` takes it through an owned
//! guard, mirroring the advisory file lock of the disk backend.
//!
//! ## Capacity
//!
//! `space_available()` reports `capacity - len`, and a write that would grow
//! a buffer past the capacity fails the way a full disk does.

use eyre::{bail, Result};
use hashbrown::HashMap;
use parking_lot::Mutex;
use std::sync::Arc;

use super::driver::{FileLock, StoreFile};
use crate::config::DEFAULT_MEMORY_CAPACITY;

#[derive(Debug, Clone, Default)]
pub struct MemoryBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
    lock: Arc<Mutex<()>>,
}

impl MemoryBuffer {
    pub fn len(&self) -> usize {
        self.bytes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }

    /// Replaces the whole content, bypassing the store engine.
    pub fn overwrite(&self, data: &[u8]) {
        let mut bytes = self.bytes.lock();
        bytes.clear();
        bytes.extend_from_slice(data);
    }
}

/// A set of named in-memory buffers.
#[derive(Debug, Clone)]
pub struct MemoryVolume {
    files: Arc<Mutex<HashMap<String, MemoryBuffer>>>,
    capacity: u64,
}

impl Default for MemoryVolume {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_MEMORY_CAPACITY as u64)
    }
}

impl MemoryVolume {
    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            files: Arc::new(Mutex::new(HashMap::new())),
            capacity,
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn get(&self, name: &str) -> Option<MemoryBuffer> {
        self.files.lock().get(name).cloned()
    }

    pub fn get_or_create(&self, name: &str) -> (MemoryBuffer, bool) {
        let mut files = self.files.lock();
        if let Some(buffer) = files.get(name) {
            return (buffer.clone(), false);
        }
        let buffer = MemoryBuffer::default();
        files.insert(name.to_string(), buffer.clone());
        (buffer, true)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.files.lock().contains_key(name)
    }

    pub fn remove(&self, name: &str) -> bool {
        self.files.lock().remove(name).is_some()
    }

    /// Names starting with `prefix`, with the prefix stripped.
    pub fn names_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.files
            .lock()
            .keys()
            .filter_map(|k| k.strip_prefix(prefix).map(str::to_string))
            .collect()
    }
}

#[derive(Debug)]
pub struct MemoryFile {
    buffer: MemoryBuffer,
    pos: usize,
    capacity: u64,
}

impl MemoryFile {
    pub fn new(buffer: MemoryBuffer, capacity: u64) -> Self {
        Self {
            buffer,
            pos: 0,
            capacity,
        }
    }

    pub fn buffer(&self) -> &MemoryBuffer {
        &self.buffer
    }
}

impl StoreFile for MemoryFile {
    fn seek(&mut self, pos: u64) -> Result<()> {
        self.pos = usize::try_from(pos)?;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let bytes = self.buffer.bytes.lock();
        if self.pos >= bytes.len() {
            return Ok(0);
        }
        let n = buf.len().min(bytes.len() - self.pos);
        buf[..n].copy_from_slice(&bytes[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<()> {
        let mut bytes = self.buffer.bytes.lock();
        let end = self.pos + buf.len();
        if end as u64 > self.capacity {
            bail!(
                "no space left on memory volume: write ending at {} exceeds capacity {}",
                end,
                self.capacity
            );
        }
        if end > bytes.len() {
            bytes.resize(end, 0);
        }
        bytes[self.pos..end].copy_from_slice(buf);
        self.pos = end;
        Ok(())
    }

    fn commit_write(&mut self) -> Result<()> {
        Ok(())
    }

    fn truncate(&mut self, len: u64) -> Result<()> {
        let len = usize::try_from(len)?;
        self.buffer.bytes.lock().truncate(len);
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        Ok(self.buffer.len() as u64)
    }

    fn space_available(&self) -> Result<u64> {
        Ok(self.capacity.saturating_sub(self.buffer.len() as u64))
    }

    fn lock(&self) -> Result<FileLock> {
        Ok(FileLock::memory(self.buffer.lock.lock_arc()))
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_shares_buffer_between_files() {
        let volume = MemoryVolume::default();
        let (buffer, created) = volume.get_or_create("suite_1/a.db");
        assert!(created);

        let mut writer = MemoryFile::new(buffer, volume.capacity());
        writer.write(b"hello").unwrap();

        let (again, created) = volume.get_or_create("suite_1/a.db");
        assert!(!created);
        let mut reader = MemoryFile::new(again, volume.capacity());
        let mut buf = [0u8; 5];
        reader.read_at(0, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn read_past_end_returns_zero() {
        let mut file = MemoryFile::new(MemoryBuffer::default(), 64);
        file.write(&[1, 2]).unwrap();

        file.seek(10).unwrap();
        let mut buf = [0u8; 4];

        assert_eq!(file.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn truncate_shrinks_buffer() {
        let mut file = MemoryFile::new(MemoryBuffer::default(), 64);
        file.write(&[0u8; 32]).unwrap();

        file.truncate(8).unwrap();

        assert_eq!(file.len().unwrap(), 8);
    }

    #[test]
    fn space_available_tracks_capacity() {
        let mut file = MemoryFile::new(MemoryBuffer::default(), 100);
        file.write(&[0u8; 40]).unwrap();

        assert_eq!(file.space_available().unwrap(), 60);
    }

    #[test]
    fn write_past_capacity_fails_and_leaves_buffer() {
        let mut file = MemoryFile::new(MemoryBuffer::default(), 16);
        file.write(&[1u8; 10]).unwrap();

        let err = file.write(&[2u8; 10]).unwrap_err();

        assert!(err.to_string().contains("no space left"));
        assert_eq!(file.len().unwrap(), 10);
        file.write_at(6, &[3u8; 10]).unwrap();
        assert_eq!(file.len().unwrap(), 16);
    }

    #[test]
    fn names_with_prefix_strips_suite_dir() {
        let volume = MemoryVolume::default();
        volume.get_or_create("suite_1/a.db");
        volume.get_or_create("suite_1/b.db");
        volume.get_or_create("suite_2/c.db");

        let mut names = volume.names_with_prefix("suite_1/");
        names.sort();

        assert_eq!(names, vec!["a.db".to_string(), "b.db".to_string()]);
        assert!(volume.remove("suite_2/c.db"));
        assert!(!volume.contains("suite_2/c.db"));
    }

    #[test]
    fn lock_is_exclusive_per_buffer() {
        let buffer = MemoryBuffer::default();
        let file = MemoryFile::new(buffer.clone(), 64);

        let guard = file.lock().unwrap();
        assert!(buffer.lock.try_lock().is_none());
        drop(guard);
        assert!(buffer.lock.try_lock().is_some());
    }
}
