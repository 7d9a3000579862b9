//! # Storage Module
//!
//! This module provides the storage layer underneath the record store engine:
//! the byte-file abstraction, its two backends, the on-disk header layouts, and
//! the mapping from suites and store names to files.
//!
//! ## Store File Format
//!
//! A store file is a 40-byte header followed by a sequence of blocks with no
//! trailing structure:
//!
//! ```text
//! +------------------+---------+---------+-----+---------+
//! | DbHeader (40 B)  | Block 0 | Block 1 | ... | Block N |
//! +------------------+---------+---------+-----+---------+
//!
//! Block = [record_id: i32][data_len: i32][payload][zero padding to 8]
//! ```
//!
//! Blocks are walked sequentially; there is no directory. The engine keeps an
//! offset cache above this layer to avoid rescanning.
//!
//! ## Module Organization
//!
//! - `driver`: `StoreFile` trait, `AnyFile`, `StorageKind`, `FileLock`
//! - `disk`: `DiskFile`, std file I/O with fs2 advisory locks
//! - `memory`: `MemoryFile` and the shareable `MemoryVolume`
//! - `codec`: big-endian integer helpers and block sizing
//! - `headers`: `DbHeader`, `BlockHeader`, `AuthMode`
//! - `file_manager`: suite directories, store name escaping, listing
//!
//! ## Thread Safety
//!
//! `AnyFile` is `Send` and owned by exactly one engine instance. Access from
//! several threads is serialized by the per-store lock in `store::shared`.

pub mod codec;
pub mod disk;
pub mod driver;
pub mod file_manager;
pub mod headers;
pub mod memory;

pub use disk::DiskFile;
pub use driver::{AnyFile, FileLock, StorageKind, StoreFile};
pub use file_manager::{FileManager, SuiteId};
pub use headers::{AuthMode, BlockHeader, DbHeader};
pub use memory::{MemoryBuffer, MemoryFile, MemoryVolume};
