//! # Store File Abstraction Layer
//!
//! This module provides the `StoreFile` trait, a cursor-based abstraction over
//! the random-access byte file that backs one record store. The engine only
//! ever seeks, reads, writes, truncates, and commits; everything else about the
//! underlying medium stays behind this trait.
//!
//! ## Cursor Interface
//!
//! ```text
//! fn seek(&mut self, pos: u64) -> Result<()>;
//! fn read(&mut self, buf: &mut [u8]) -> Result<usize>;   // short read at EOF
//! fn write(&mut self, buf: &[u8]) -> Result<()>;         // extends the file
//! fn commit_write(&mut self) -> Result<()>;              // durability point
//! ```
//!
//! `read_at` and `write_at` are provided on top of the cursor calls. `read_at`
//! fails on a short read, which is how a truncated store file surfaces.
//!
//! ## Backends
//!
//! | Backend    | Medium                   | Cross-process lock |
//! |------------|--------------------------|--------------------|
//! | DiskFile   | `std::fs::File`          | fs2 `flock`        |
//! | MemoryFile | shared `Vec<u8>` buffer  | per-buffer mutex   |
//!
//! ## StorageKind Enum
//!
//! `StorageKind` selects the backend when an environment is opened:
//!
//! ```ignore
//! let rms = Rms::builder()
//!     .storage_kind(StorageKind::disk("./rms"))
//!     .suite(SuiteId(7))
//!     .open()?;
//! ```
//!
//! ## AnyFile Enum
//!
//! `AnyFile` is a type-erased wrapper that implements `StoreFile`, so the
//! engine holds one concrete type regardless of backend.
//!
//! ## File Locks
//!
//! `lock()` returns a `FileLock` guard that serializes access to the same file
//! from other environments. It is acquired after the in-process store mutex
//! and released when the guard is dropped.

use eyre::{ensure, Result};
use parking_lot::{lock_api::ArcMutexGuard, RawMutex};
use std::fs::File;
use std::path::PathBuf;

use super::disk::DiskFile;
use super::memory::{MemoryFile, MemoryVolume};

/// Random-access byte file backing a single record store.
pub trait StoreFile: Send {
    fn seek(&mut self, pos: u64) -> Result<()>;

    /// Reads up to `buf.len()` bytes from the cursor, returning the count read.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Writes all of `buf` at the cursor, extending the file if needed.
    fn write(&mut self, buf: &[u8]) -> Result<()>;

    /// Makes preceding writes durable.
    fn commit_write(&mut self) -> Result<()>;

    fn truncate(&mut self, len: u64) -> Result<()>;

    fn len(&self) -> Result<u64>;

    /// Bytes the medium can still accept.
    fn space_available(&self) -> Result<u64>;

    fn lock(&self) -> Result<FileLock>;

    fn close(&mut self) -> Result<()>;

    fn read_at(&mut self, pos: u64, buf: &mut [u8]) -> Result<()> {
        self.seek(pos)?;
        let n = self.read(buf)?;
        ensure!(
            n == buf.len(),
            "short read at offset {}: expected {} bytes, got {}",
            pos,
            buf.len(),
            n
        );
        Ok(())
    }

    fn write_at(&mut self, pos: u64, buf: &[u8]) -> Result<()> {
        self.seek(pos)?;
        self.write(buf)
    }
}

/// Exclusive access to a store file, released on drop.
pub struct FileLock {
    inner: LockInner,
}

enum LockInner {
    Os(File),
    Memory(#[allow(dead_code)] ArcMutexGuard<RawMutex, ()>),
}

impl FileLock {
    pub(crate) fn os(file: File) -> Self {
        Self {
            inner: LockInner::Os(file),
        }
    }

    pub(crate) fn memory(guard: ArcMutexGuard<RawMutex, ()>) -> Self {
        Self {
            inner: LockInner::Memory(guard),
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let LockInner::Os(file) = &self.inner {
            if let Err(e) = fs2::FileExt::unlock(file) {
                tracing::warn!(error = %e, "failed to release store file lock");
            }
        }
    }
}

impl std::fmt::Debug for FileLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.inner {
            LockInner::Os(_) => "os",
            LockInner::Memory(_) => "memory",
        };
        f.debug_struct("FileLock").field("kind", &kind).finish()
    }
}

/// Configuration for storage backend selection.
#[derive(Debug, Clone)]
pub enum StorageKind {
    /// One directory per suite under `path`, one file per store.
    Disk { path: PathBuf },

    /// Buffers held in a volume that can be shared between environments.
    Memory { volume: MemoryVolume },
}

impl StorageKind {
    pub fn disk<P: Into<PathBuf>>(path: P) -> Self {
        StorageKind::Disk { path: path.into() }
    }

    pub fn memory() -> Self {
        StorageKind::Memory {
            volume: MemoryVolume::default(),
        }
    }

    pub fn is_disk(&self) -> bool {
        matches!(self, StorageKind::Disk { .. })
    }

    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            StorageKind::Disk { path } => Some(path),
            StorageKind::Memory { .. } => None,
        }
    }
}

/// Type-erased store file that implements `StoreFile`.
#[derive(Debug)]
pub enum AnyFile {
    Disk(DiskFile),
    Memory(MemoryFile),
}

impl StoreFile for AnyFile {
    fn seek(&mut self, pos: u64) -> Result<()> {
        match self {
            AnyFile::Disk(f) => f.seek(pos),
            AnyFile::Memory(f) => f.seek(pos),
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self {
            AnyFile::Disk(f) => f.read(buf),
            AnyFile::Memory(f) => f.read(buf),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<()> {
        match self {
            AnyFile::Disk(f) => f.write(buf),
            AnyFile::Memory(f) => f.write(buf),
        }
    }

    fn commit_write(&mut self) -> Result<()> {
        match self {
            AnyFile::Disk(f) => f.commit_write(),
            AnyFile::Memory(f) => f.commit_write(),
        }
    }

    fn truncate(&mut self, len: u64) -> Result<()> {
        match self {
            AnyFile::Disk(f) => f.truncate(len),
            AnyFile::Memory(f) => f.truncate(len),
        }
    }

    fn len(&self) -> Result<u64> {
        match self {
            AnyFile::Disk(f) => f.len(),
            AnyFile::Memory(f) => f.len(),
        }
    }

    fn space_available(&self) -> Result<u64> {
        match self {
            AnyFile::Disk(f) => f.space_available(),
            AnyFile::Memory(f) => f.space_available(),
        }
    }

    fn lock(&self) -> Result<FileLock> {
        match self {
            AnyFile::Disk(f) => f.lock(),
            AnyFile::Memory(f) => f.lock(),
        }
    }

    fn close(&mut self) -> Result<()> {
        match self {
            AnyFile::Disk(f) => f.close(),
            AnyFile::Memory(f) => f.close(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_kind_disk_returns_path() {
        let kind = StorageKind::disk("/var/lib/rms");

        assert!(kind.is_disk());
        assert_eq!(kind.path(), Some(&PathBuf::from("/var/lib/rms")));
    }

    #[test]
    fn storage_kind_memory_has_no_path() {
        let kind = StorageKind::memory();

        assert!(!kind.is_disk());
        assert_eq!(kind.path(), None);
    }

    #[test]
    fn read_at_reports_short_read() {
        let mut file = AnyFile::Memory(MemoryFile::new(Default::default(), 1024));
        file.write_at(0, &[1, 2, 3]).unwrap();

        let mut buf = [0u8; 8];
        let err = file.read_at(0, &mut buf).unwrap_err();

        assert!(err.to_string().contains("short read"));
    }

    #[test]
    fn write_at_past_end_extends_file() {
        let mut file = AnyFile::Memory(MemoryFile::new(Default::default(), 1024));

        file.write_at(4, &[9, 9]).unwrap();

        assert_eq!(file.len().unwrap(), 6);
        let mut buf = [0u8; 6];
        file.read_at(0, &mut buf).unwrap();
        assert_eq!(buf, [0, 0, 0, 0, 9, 9]);
    }
}
