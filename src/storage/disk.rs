//! # Disk Storage Backend
//!
//! `DiskFile` implements `StoreFile` over a plain `std::fs::File`. Reads and
//! writes go through the file cursor; `commit_write` calls `sync_data`.
//!
//! ## Locking
//!
//! `lock()` clones the handle and takes an exclusive advisory lock on the
//! clone with `fs2`. The clone shares the open file description, so the lock
//! lives exactly as long as the returned `FileLock`.
//!
//! ## Available Space
//!
//! `space_available()` asks the filesystem holding the store for its free
//! bytes. Per-suite quotas are applied by the engine on top of this figure.

use eyre::{Result, WrapErr};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::driver::{FileLock, StoreFile};

#[derive(Debug)]
pub struct DiskFile {
    file: File,
    path: PathBuf,
}

impl DiskFile {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .wrap_err_with(|| format!("failed to open store file '{}'", path.display()))?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Creates a new empty file. Fails if one already exists.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .wrap_err_with(|| format!("failed to create store file '{}'", path.display()))?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StoreFile for DiskFile {
    fn seek(&mut self, pos: u64) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(pos))
            .wrap_err_with(|| format!("failed to seek to offset {}", pos))?;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut total = 0;
        while total < buf.len() {
            match self.file.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(e).wrap_err_with(|| {
                        format!("failed to read from '{}'", self.path.display())
                    })
                }
            }
        }
        Ok(total)
    }

    fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.file
            .write_all(buf)
            .wrap_err_with(|| format!("failed to write {} bytes", buf.len()))
    }

    fn commit_write(&mut self) -> Result<()> {
        self.file
            .sync_data()
            .wrap_err_with(|| format!("failed to sync '{}'", self.path.display()))
    }

    fn truncate(&mut self, len: u64) -> Result<()> {
        self.file
            .set_len(len)
            .wrap_err_with(|| format!("failed to truncate store file to {} bytes", len))
    }

    fn len(&self) -> Result<u64> {
        let meta = self
            .file
            .metadata()
            .wrap_err_with(|| format!("failed to get metadata for '{}'", self.path.display()))?;
        Ok(meta.len())
    }

    fn space_available(&self) -> Result<u64> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        fs2::available_space(dir)
            .wrap_err_with(|| format!("failed to query free space of '{}'", dir.display()))
    }

    fn lock(&self) -> Result<FileLock> {
        let handle = self
            .file
            .try_clone()
            .wrap_err("failed to clone store file handle for locking")?;
        handle
            .lock_exclusive()
            .wrap_err_with(|| format!("failed to lock '{}'", self.path.display()))?;
        Ok(FileLock::os(handle))
    }

    fn close(&mut self) -> Result<()> {
        self.file
            .sync_all()
            .wrap_err_with(|| format!("failed to flush '{}' on close", self.path.display()))
    }
}
