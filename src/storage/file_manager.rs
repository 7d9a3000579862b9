//! # Suite File Manager
//!
//! This module maps `(suite, store name)` pairs to store files. Every suite
//! owns one directory; every store is one file in it.
//!
//! ## Directory Structure
//!
//! ```text
//! rms_root/
//! ├── suite_7/
//! │   ├── scores.db
//! │   └── high%20scores.db     # escaped store name
//! └── suite_12/
//!     └── settings.db
//! ```
//!
//! In-memory volumes use the same relative names as buffer keys, so listing
//! and deletion behave identically for both backends.
//!
//! ## Store Names
//!
//! A store name is 1 to 32 characters of arbitrary Unicode. On disk it is
//! escaped byte-wise: ASCII letters, digits, `_` and `-` pass through, every
//! other UTF-8 byte becomes `%XX`. The escaping is reversible, so
//! `list_stores` returns the original names.
//!
//! ## Lifecycle
//!
//! `FileManager` holds no open files. The engine owns the `AnyFile` returned
//! by `open_store` and closes it on final close. Deleting a store that is
//! still open is refused one level up, in the environment.

use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use eyre::{Result, WrapErr};

use super::disk::DiskFile;
use super::driver::{AnyFile, StorageKind};
use super::memory::MemoryFile;
use crate::config::{DB_EXTENSION, MAX_STORE_NAME_LEN};
use crate::error::RmsError;

pub const SUITE_DIR_PREFIX: &str = "suite_";

/// Identifier of an application suite: the unit of ownership and quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SuiteId(pub i32);

impl fmt::Display for SuiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Rejects names outside 1..=32 characters.
pub fn validate_store_name(name: &str) -> Result<()> {
    let len = name.chars().count();
    if len == 0 || len > MAX_STORE_NAME_LEN {
        return Err(RmsError::InvalidArgument(format!(
            "store name must be 1 to {} characters, got {}",
            MAX_STORE_NAME_LEN, len
        ))
        .into());
    }
    Ok(())
}

pub fn encode_store_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for b in name.bytes() {
        if b.is_ascii_alphanumeric() || b == b'_' || b == b'-' {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

pub fn decode_store_name(encoded: &str) -> Option<String> {
    let raw = encoded.as_bytes();
    let mut bytes = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'%' {
            let hex = encoded.get(i + 1..i + 3)?;
            bytes.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            bytes.push(raw[i]);
            i += 1;
        }
    }
    String::from_utf8(bytes).ok()
}

#[derive(Debug, Clone)]
pub struct FileManager {
    storage_kind: StorageKind,
}

impl FileManager {
    pub fn new(storage_kind: StorageKind) -> Result<Self> {
        if let StorageKind::Disk { path } = &storage_kind {
            fs::create_dir_all(path).wrap_err_with(|| {
                format!("failed to create rms directory '{}'", path.display())
            })?;
        }
        Ok(Self { storage_kind })
    }

    pub fn storage_kind(&self) -> &StorageKind {
        &self.storage_kind
    }

    /// Opens a store file, creating it when allowed.
    ///
    /// Returns the file and whether it was created by this call.
    pub fn open_store(&self, suite: SuiteId, name: &str, create: bool) -> Result<(AnyFile, bool)> {
        validate_store_name(name)?;

        match &self.storage_kind {
            StorageKind::Disk { .. } => {
                let path = self.disk_path(suite, name);
                if path.exists() {
                    return Ok((AnyFile::Disk(DiskFile::open(&path)?), false));
                }
                if !create {
                    return Err(RmsError::NotFound(name.to_string()).into());
                }

                let dir = self.suite_dir(suite);
                fs::create_dir_all(&dir).wrap_err_with(|| {
                    format!("failed to create suite directory '{}'", dir.display())
                })?;

                match DiskFile::create(&path) {
                    Ok(file) => Ok((AnyFile::Disk(file), true)),
                    Err(e) if path.exists() => {
                        tracing::debug!(error = %e, store = name, "store created concurrently, opening");
                        Ok((AnyFile::Disk(DiskFile::open(&path)?), false))
                    }
                    Err(e) => Err(e),
                }
            }
            StorageKind::Memory { volume } => {
                let key = self.relative_name(suite, name);
                if !create {
                    let buffer = volume
                        .get(&key)
                        .ok_or_else(|| RmsError::NotFound(name.to_string()))?;
                    return Ok((AnyFile::Memory(MemoryFile::new(buffer, volume.capacity())), false));
                }
                let (buffer, created) = volume.get_or_create(&key);
                Ok((
                    AnyFile::Memory(MemoryFile::new(buffer, volume.capacity())),
                    created,
                ))
            }
        }
    }

    pub fn store_exists(&self, suite: SuiteId, name: &str) -> bool {
        match &self.storage_kind {
            StorageKind::Disk { .. } => self.disk_path(suite, name).is_file(),
            StorageKind::Memory { volume } => volume.contains(&self.relative_name(suite, name)),
        }
    }

    pub fn delete_store(&self, suite: SuiteId, name: &str) -> Result<()> {
        match &self.storage_kind {
            StorageKind::Disk { .. } => {
                let path = self.disk_path(suite, name);
                match fs::remove_file(&path) {
                    Ok(()) => Ok(()),
                    Err(e) if e.kind() == ErrorKind::NotFound => {
                        Err(RmsError::NotFound(name.to_string()).into())
                    }
                    Err(e) => Err(e).wrap_err_with(|| {
                        format!("failed to remove store file '{}'", path.display())
                    }),
                }
            }
            StorageKind::Memory { volume } => {
                if volume.remove(&self.relative_name(suite, name)) {
                    Ok(())
                } else {
                    Err(RmsError::NotFound(name.to_string()).into())
                }
            }
        }
    }

    /// Names of all stores owned by `suite`, sorted.
    pub fn list_stores(&self, suite: SuiteId) -> Result<Vec<String>> {
        let suffix = format!(".{}", DB_EXTENSION);

        let files: Vec<String> = match &self.storage_kind {
            StorageKind::Disk { .. } => {
                let dir = self.suite_dir(suite);
                let entries = match fs::read_dir(&dir) {
                    Ok(entries) => entries,
                    Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
                    Err(e) => {
                        return Err(e).wrap_err_with(|| {
                            format!("failed to list suite directory '{}'", dir.display())
                        })
                    }
                };

                let mut files = Vec::new();
                for entry in entries {
                    let entry = entry.wrap_err("failed to read suite directory entry")?;
                    if let Some(name) = entry.file_name().to_str() {
                        files.push(name.to_string());
                    }
                }
                files
            }
            StorageKind::Memory { volume } => {
                volume.names_with_prefix(&format!("{}/", Self::suite_dir_name(suite)))
            }
        };

        let mut names: Vec<String> = files
            .iter()
            .filter_map(|f| f.strip_suffix(&suffix))
            .filter_map(decode_store_name)
            .collect();
        names.sort();
        Ok(names)
    }

    /// Suites that own at least one store directory or buffer.
    pub fn list_suites(&self) -> Result<Vec<SuiteId>> {
        let ids: Vec<String> = match &self.storage_kind {
            StorageKind::Disk { path } => {
                let mut ids = Vec::new();
                for entry in fs::read_dir(path)
                    .wrap_err_with(|| format!("failed to list '{}'", path.display()))?
                {
                    let entry = entry.wrap_err("failed to read rms directory entry")?;
                    if let Some(id) = entry
                        .file_name()
                        .to_str()
                        .and_then(|name| name.strip_prefix(SUITE_DIR_PREFIX))
                    {
                        ids.push(id.to_string());
                    }
                }
                ids
            }
            StorageKind::Memory { volume } => volume
                .names_with_prefix(SUITE_DIR_PREFIX)
                .into_iter()
                .filter_map(|k| k.split('/').next().map(str::to_string))
                .collect(),
        };

        let mut suites: Vec<SuiteId> = ids
            .iter()
            .filter_map(|id| id.parse().ok())
            .map(SuiteId)
            .collect();
        suites.sort();
        suites.dedup();
        Ok(suites)
    }

    /// Path of the store file for disk-backed managers.
    pub fn store_path(&self, suite: SuiteId, name: &str) -> Option<PathBuf> {
        match &self.storage_kind {
            StorageKind::Disk { .. } => Some(self.disk_path(suite, name)),
            StorageKind::Memory { .. } => None,
        }
    }

    fn suite_dir_name(suite: SuiteId) -> String {
        format!("{}{}", SUITE_DIR_PREFIX, suite.0)
    }

    fn relative_name(&self, suite: SuiteId, name: &str) -> String {
        format!(
            "{}/{}.{}",
            Self::suite_dir_name(suite),
            encode_store_name(name),
            DB_EXTENSION
        )
    }

    fn suite_dir(&self, suite: SuiteId) -> PathBuf {
        match &self.storage_kind {
            StorageKind::Disk { path } => path.join(Self::suite_dir_name(suite)),
            StorageKind::Memory { .. } => PathBuf::from(Self::suite_dir_name(suite)),
        }
    }

    fn disk_path(&self, suite: SuiteId, name: &str) -> PathBuf {
        self.suite_dir(suite)
            .join(format!("{}.{}", encode_store_name(name), DB_EXTENSION))
    }
}
