//! # Store Module
//!
//! The record store engine proper: the shared header and lock, the record
//! index with its offset cache, and the block allocator.
//!
//! ## Module Organization
//!
//! - `shared`: `SharedStore` header mirror and the `SharedRegistry` of opens
//! - `index`: `RecordIndex`, record ID to offset, version gated
//! - `engine`: `RecordStoreImpl`, allocation, splitting, compaction

pub mod engine;
pub mod index;
pub mod shared;

pub use engine::{RecordStoreImpl, StoreContext};
pub use index::RecordIndex;
pub use shared::{SharedRegistry, SharedStore, StoreKey};
