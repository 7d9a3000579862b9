//! # rmstore - Persistent Record Stores
//!
//! rmstore keeps small binary records for sandboxed application suites. Each
//! suite owns a private set of named stores; a store is one flat file of
//! variable-length records addressed by stable integer IDs.
//!
//! ## Quick Start
//!
//! ```ignore
//! use rmstore::{Rms, SuiteId};
//!
//! let rms = Rms::builder()
//!     .path("./rms")
//!     .suite(SuiteId(7))
//!     .open()?;
//!
//! let scores = rms.open_record_store("scores", true)?;
//! let id = scores.add_record(b"alice:42")?;
//! assert_eq!(scores.get_record(id)?, b"alice:42");
//! scores.close()?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │   Public API (Rms, RecordStore)          │
//! ├──────────────────────┬───────────────────┤
//! │ Engine (allocator,   │ Notifier          │
//! │ compaction)          │ (LocalHub)        │
//! ├──────────────────────┤                   │
//! │ Record Index │ Shared│                   │
//! │ (offsets)    │ Header│                   │
//! ├──────────────────────┴───────────────────┤
//! │ Storage (StoreFile: disk / memory,       │
//! │ headers, codec, file manager)            │
//! └──────────────────────────────────────────┘
//! ```
//!
//! ## File Layout
//!
//! ```text
//! rms_dir/
//! ├── suite_7/
//! │   ├── scores.db        # [DbHeader 40 B][Block]*
//! │   └── high%20score.db  # names are escaped on disk
//! └── suite_12/
//!     └── config.db
//! ```
//!
//! ## Consistency
//!
//! Every operation runs under the per-store lock: one mutex per store in the
//! environment plus an advisory file lock for other processes. The header is
//! reloaded from the file on each lock, so changes made elsewhere are seen
//! before they matter. There is no journal; a crash mid-write can leave a
//! store inconsistent.
//!
//! ## Module Overview
//!
//! - [`storage`]: file primitive, headers, codec, suite/file mapping
//! - [`store`]: engine, record index, shared header registry
//! - [`notify`]: cross-context change notification
//! - [`rms`]: environment, builder, record store handles, listeners
//! - [`config`]: layout and tuning constants
//! - [`error`]: `RmsError`

#[macro_use]
mod macros;

pub mod config;
pub mod error;
pub mod notify;
pub mod rms;
pub mod storage;
pub mod store;

pub use error::{Result, RmsError};
pub use notify::{ChangeType, LocalHub, NotifierConfig};
pub use rms::{RecordEnumeration, RecordListener, RecordStore, Rms, RmsBuilder};
pub use storage::{AuthMode, MemoryVolume, StorageKind, SuiteId};
