//! # RMS Environment
//!
//! `Rms` is the entry point for applications. It acts for one suite, keeps
//! the table of open `RecordStore` handles, and exchanges change events with
//! other environments through its notification context.
//!
//! ## Open Handles
//!
//! ```text
//! Rms ──> open_stores: (suite, name) ──> RecordStore (opens = n)
//!     ──> StoreContext { FileManager, SharedRegistry, quota }
//!     ──> Notifier + ContextHandle on a LocalHub
//! ```
//!
//! Opening a store that is already open returns the existing handle with its
//! open count bumped. The final `close` removes it from the table.
//!
//! ## Suites and Sharing
//!
//! An environment creates, lists and deletes only its own suite's stores.
//! `open_shared_record_store` opens another suite's store, which succeeds
//! only if that store's mode is not `AuthMode::Private`.
//!
//! ## Remote Changes
//!
//! Events sent by other environments queue up on this environment's
//! context. `dispatch_events` delivers them to the listeners of matching
//! open stores and acknowledges when the sender asked for it.
//!
//! ## Lock Order
//!
//! `open_stores` table, then a handle's state, then the store's shared
//! header and file lock. Notification and listener callbacks run with none
//! of them held.

mod builder;
mod enumeration;
mod listener;
mod record_store;

pub use builder::RmsBuilder;
pub use enumeration::RecordEnumeration;
pub use listener::RecordListener;
pub use record_store::RecordStore;

use hashbrown::HashMap;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

use crate::error::{IntoRmsResult, Result, RmsError};
use crate::notify::{ContextHandle, ContextId, LocalHub, Notifier};
use crate::storage::file_manager::validate_store_name;
use crate::storage::{AuthMode, StorageKind, SuiteId};
use crate::store::{RecordStoreImpl, StoreContext, StoreKey};

pub(crate) struct RmsInner {
    ctx: StoreContext,
    suite: SuiteId,
    notifier: Arc<Notifier>,
    events: ContextHandle,
    open_stores: Mutex<HashMap<StoreKey, RecordStore>>,
}

impl Drop for RmsInner {
    fn drop(&mut self) {
        self.notifier.stop_all();
        tracing::debug!(suite = %self.suite, context = %self.events.id(), "rms environment closed");
    }
}

/// An RMS environment acting for one suite. Cloning shares the environment.
#[derive(Clone)]
pub struct Rms {
    inner: Arc<RmsInner>,
}

impl fmt::Debug for Rms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rms")
            .field("suite", &self.inner.suite)
            .field("context", &self.inner.events.id())
            .field("open_stores", &self.inner.open_stores.lock().len())
            .finish()
    }
}

impl Rms {
    pub fn builder() -> RmsBuilder {
        RmsBuilder::new()
    }

    pub(crate) fn from_parts(
        ctx: StoreContext,
        suite: SuiteId,
        notifier: Notifier,
        events: ContextHandle,
    ) -> Self {
        Self {
            inner: Arc::new(RmsInner {
                ctx,
                suite,
                notifier: Arc::new(notifier),
                events,
                open_stores: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn suite(&self) -> SuiteId {
        self.inner.suite
    }

    /// Notification context of this environment.
    pub fn context(&self) -> ContextId {
        self.inner.events.id()
    }

    pub fn hub(&self) -> &LocalHub {
        self.inner.events.hub()
    }

    pub fn storage_kind(&self) -> &StorageKind {
        self.inner.ctx.files.storage_kind()
    }

    /// Opens one of this suite's stores, creating it if `create` is set.
    pub fn open_record_store(&self, name: &str, create: bool) -> Result<RecordStore> {
        self.open_store(self.inner.suite, name, create)
    }

    /// Like `open_record_store`, but a store created by this call gets the
    /// given mode. An existing store keeps its mode. If the mode cannot be
    /// applied the new store is closed and deleted again.
    pub fn open_record_store_with_mode(
        &self,
        name: &str,
        create: bool,
        mode: AuthMode,
        writable: bool,
    ) -> Result<RecordStore> {
        let (store, existing) = match self.open_store(self.inner.suite, name, false) {
            Ok(store) => (store, true),
            Err(RmsError::NotFound(_)) => (self.open_store(self.inner.suite, name, create)?, false),
            Err(e) => return Err(e),
        };
        if existing {
            return Ok(store);
        }

        if let Err(e) = store.set_mode(mode, writable) {
            if let Err(close) = store.close() {
                tracing::warn!(store = name, error = %close, "failed to close store after set_mode error");
            }
            if let Err(delete) = self.inner.ctx.files.delete_store(self.inner.suite, name) {
                tracing::warn!(store = name, error = %delete, "failed to delete store after set_mode error");
            }
            return Err(e);
        }
        Ok(store)
    }

    /// Opens a store owned by `owner`. Never creates it.
    ///
    /// # Errors
    ///
    /// `Security` if the store belongs to another suite and is private.
    pub fn open_shared_record_store(&self, name: &str, owner: SuiteId) -> Result<RecordStore> {
        let store = self.open_store(owner, name, false)?;
        if owner == self.inner.suite {
            return Ok(store);
        }

        match store.get_auth_mode() {
            Ok(mode) if mode.is_shared() => Ok(store),
            Ok(_) => {
                store.close()?;
                Err(RmsError::Security(format!(
                    "record store '{}' of suite {} is private",
                    name, owner
                )))
            }
            Err(e) => {
                let _ = store.close();
                Err(e)
            }
        }
    }

    fn open_store(&self, suite: SuiteId, name: &str, create: bool) -> Result<RecordStore> {
        validate_store_name(name).into_rms()?;
        let key = StoreKey::new(suite, name);

        let mut open_stores = self.inner.open_stores.lock();
        if let Some(store) = open_stores.get(&key) {
            if store.reopen() {
                return Ok(store.clone());
            }
        }

        let engine = RecordStoreImpl::open(&self.inner.ctx, suite, name, create)?;
        let store = RecordStore::new(
            engine,
            self.inner.suite,
            Arc::clone(&self.inner.notifier),
            Arc::downgrade(&self.inner),
        );
        open_stores.insert(key, store.clone());
        Ok(store)
    }

    /// Deletes one of this suite's stores. Fails while it is open here.
    pub fn delete_record_store(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(RmsError::NotFound(String::new()));
        }
        let open_stores = self.inner.open_stores.lock();
        if open_stores.contains_key(&StoreKey::new(self.inner.suite, name)) {
            return Err(RmsError::Generic(
                format!("record store '{}' is still open", name).into(),
            ));
        }
        self.inner
            .ctx
            .files
            .delete_store(self.inner.suite, name)
            .into_rms()
    }

    /// Names of this suite's stores, sorted.
    pub fn list_record_stores(&self) -> Result<Vec<String>> {
        self.inner.ctx.files.list_stores(self.inner.suite).into_rms()
    }

    /// Handles that are open in this environment.
    pub fn open_stores(&self) -> Vec<RecordStore> {
        self.inner.open_stores.lock().values().cloned().collect()
    }

    /// Delivers queued remote change events to local listeners.
    ///
    /// Returns the number of events consumed. Events for stores that are not
    /// open here are dropped.
    pub fn dispatch_events(&self) -> usize {
        let events = self.inner.events.drain();
        let mut needs_ack = false;

        for event in &events {
            let key = StoreKey::new(event.suite, &event.store);
            let store = self.inner.open_stores.lock().get(&key).cloned();
            match store {
                Some(store) => store.notify_listeners(event.change, event.record_id),
                None => tracing::trace!(store = %event.store, "event for store not open here"),
            }
            needs_ack |= event.needs_ack;
        }

        if needs_ack {
            self.inner.events.acknowledge();
        }
        events.len()
    }
}
