//! # Environment Builder
//!
//! `RmsBuilder` configures and opens an [`Rms`] environment: where stores
//! live, which suite the environment acts for, the suite quota, and how
//! change notifications are exchanged with other environments.
//!
//! ## Storage Backend Selection
//!
//! - **Disk**: `path(dir)` keeps one directory per suite under `dir` and one
//!   file per store. Environments in other processes see the same files.
//!
//! - **Memory**: `in_memory()` uses a private volume; `memory_volume(v)`
//!   shares a volume between environments in one process.
//!
//! ## Configuration Options
//!
//! | Option              | Default                       | Description                        |
//! |---------------------|-------------------------------|------------------------------------|
//! | suite               | required                      | Suite the environment acts for     |
//! | suite_storage_limit | `DEFAULT_SUITE_STORAGE_LIMIT` | Bytes a single store may grow to   |
//! | notifier            | `NotifierConfig::default()`   | Notification backpressure          |
//! | hub                 | private `LocalHub`            | Transport shared with other envs   |
//!
//! ## Usage Examples
//!
//! ```ignore
//! let rms = Rms::builder()
//!     .path("./rms")
//!     .suite(SuiteId(7))
//!     .open()?;
//! ```
//!
//! Two environments that see each other's changes:
//!
//! ```ignore
//! let hub = LocalHub::new();
//! let volume = MemoryVolume::default();
//! let a = Rms::builder().memory_volume(volume.clone()).suite(SuiteId(1)).hub(hub.clone()).open()?;
//! let b = Rms::builder().memory_volume(volume).suite(SuiteId(1)).hub(hub).open()?;
//! ```

use std::path::Path;
use std::sync::Arc;

use super::Rms;
use crate::config::DEFAULT_SUITE_STORAGE_LIMIT;
use crate::error::{IntoRmsResult, Result, RmsError};
use crate::notify::{LocalHub, Notifier, NotifierConfig};
use crate::storage::{FileManager, MemoryVolume, StorageKind, SuiteId};
use crate::store::{SharedRegistry, StoreContext};

/// Builder for configuring and opening an RMS environment.
#[derive(Debug, Default)]
pub struct RmsBuilder {
    storage_kind: Option<StorageKind>,
    suite: Option<SuiteId>,
    suite_storage_limit: Option<u32>,
    notifier: Option<NotifierConfig>,
    hub: Option<LocalHub>,
}

impl RmsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps stores under `path`, created if missing.
    pub fn path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.storage_kind = Some(StorageKind::disk(path.as_ref()));
        self
    }

    /// Keeps stores in a fresh in-memory volume.
    pub fn in_memory(mut self) -> Self {
        self.storage_kind = Some(StorageKind::memory());
        self
    }

    pub fn memory_volume(mut self, volume: MemoryVolume) -> Self {
        self.storage_kind = Some(StorageKind::Memory { volume });
        self
    }

    pub fn storage_kind(mut self, kind: StorageKind) -> Self {
        self.storage_kind = Some(kind);
        self
    }

    /// Suite the environment acts for. Stores it creates belong to this
    /// suite and only this suite may write them unless shared.
    pub fn suite(mut self, suite: SuiteId) -> Self {
        self.suite = Some(suite);
        self
    }

    /// Storage quota for each store of the suite. A store's available space
    /// is this limit minus its data size, less one store header and one
    /// block header.
    pub fn suite_storage_limit(mut self, bytes: u32) -> Self {
        self.suite_storage_limit = Some(bytes);
        self
    }

    pub fn notifier(mut self, config: NotifierConfig) -> Self {
        self.notifier = Some(config);
        self
    }

    /// Joins an existing hub so this environment exchanges change events
    /// with every other environment on it.
    pub fn hub(mut self, hub: LocalHub) -> Self {
        self.hub = Some(hub);
        self
    }

    /// Opens the environment.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if no storage or no suite was configured
    /// - `Generic` if the storage directory cannot be created
    pub fn open(self) -> Result<Rms> {
        let storage_kind = self.storage_kind.ok_or_else(|| {
            RmsError::InvalidArgument(
                "storage kind not specified: call .path() or .in_memory() first".to_string(),
            )
        })?;
        let suite = self.suite.ok_or_else(|| {
            RmsError::InvalidArgument("suite not specified: call .suite() first".to_string())
        })?;

        let files = FileManager::new(storage_kind).into_rms()?;
        let config = self.notifier.unwrap_or_default();
        let hub = self
            .hub
            .unwrap_or_else(|| LocalHub::with_queue_size(config.queue_size));
        if hub.queue_size() != config.queue_size {
            tracing::warn!(
                hub = hub.queue_size(),
                notifier = config.queue_size,
                "hub and notifier disagree on queue size"
            );
        }

        let events = hub.register_context();
        let notifier = Notifier::new(Arc::new(hub), config, events.id());
        let ctx = StoreContext {
            files,
            registry: Arc::new(SharedRegistry::new()),
            suite_storage_limit: self
                .suite_storage_limit
                .unwrap_or(DEFAULT_SUITE_STORAGE_LIMIT),
        };

        tracing::debug!(
            suite = %suite,
            context = %events.id(),
            limit = ctx.suite_storage_limit,
            "rms environment opened"
        );
        Ok(Rms::from_parts(ctx, suite, notifier, events))
    }

    pub fn get_storage_kind(&self) -> Option<&StorageKind> {
        self.storage_kind.as_ref()
    }

    pub fn get_suite(&self) -> Option<SuiteId> {
        self.suite
    }
}
