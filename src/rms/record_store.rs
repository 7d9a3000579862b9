//! # Record Store Handle
//!
//! `RecordStore` is what applications hold. An environment hands out one
//! handle per `(suite, name)`; opening the same store again returns a clone
//! of the same handle and bumps its open count.
//!
//! ```text
//! open("scores") ──┐
//! open("scores") ──┼──> RecordStore ──> Mutex<HandleState> ──> RecordStoreImpl
//!                  │      opens = 2
//! close()        ──┘      opens = 1      final close compacts and releases
//! ```
//!
//! ## Write Access
//!
//! The owning suite may always write. Another suite may write only while the
//! store's mode is `AuthMode::Any`; otherwise the write fails with
//! `RmsError::Security` before touching the file.
//!
//! ## Notifications
//!
//! After a mutation commits, local listeners run first, then the change is
//! sent to the other contexts through the environment's `Notifier`. Neither
//! happens while the store is locked.

use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};

use super::enumeration::RecordEnumeration;
use super::listener::{dispatch, same_listener, RecordListener};
use super::RmsInner;
use crate::error::{Result, RmsError};
use crate::notify::{ChangeType, Notifier};
use crate::storage::{AuthMode, SuiteId};
use crate::store::{RecordStoreImpl, StoreKey};

struct HandleState {
    engine: RecordStoreImpl,
    opens: usize,
}

struct StoreShared {
    key: StoreKey,
    current_suite: SuiteId,
    state: Mutex<HandleState>,
    listeners: Mutex<Vec<Arc<dyn RecordListener>>>,
    notifier: Arc<Notifier>,
    env: Weak<RmsInner>,
}

/// Handle to an open record store. Clones share the handle and its open
/// count; `close` must be called once per open.
#[derive(Clone)]
pub struct RecordStore {
    shared: Arc<StoreShared>,
}

impl fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordStore")
            .field("suite", &self.shared.key.suite)
            .field("name", &self.shared.key.name)
            .field("opens", &self.open_count())
            .finish()
    }
}

impl RecordStore {
    pub(crate) fn new(
        engine: RecordStoreImpl,
        current_suite: SuiteId,
        notifier: Arc<Notifier>,
        env: Weak<RmsInner>,
    ) -> Self {
        Self {
            shared: Arc::new(StoreShared {
                key: StoreKey::new(engine.suite(), engine.name()),
                current_suite,
                state: Mutex::new(HandleState { engine, opens: 1 }),
                listeners: Mutex::new(Vec::new()),
                notifier,
                env,
            }),
        }
    }

    /// Bumps the open count. Fails if the handle was finally closed.
    pub(crate) fn reopen(&self) -> bool {
        let mut state = self.shared.state.lock();
        if !state.engine.is_open() {
            return false;
        }
        state.opens += 1;
        true
    }

    pub fn name(&self) -> &str {
        &self.shared.key.name
    }

    /// Suite that owns the store.
    pub fn suite(&self) -> SuiteId {
        self.shared.key.suite
    }

    pub fn is_open(&self) -> bool {
        self.shared.state.lock().engine.is_open()
    }

    pub fn open_count(&self) -> usize {
        let state = self.shared.state.lock();
        if state.engine.is_open() {
            state.opens
        } else {
            0
        }
    }

    fn is_owner(&self) -> bool {
        self.shared.current_suite == self.shared.key.suite
    }

    fn with_engine<T>(&self, op: impl FnOnce(&mut RecordStoreImpl) -> Result<T>) -> Result<T> {
        let mut state = self.shared.state.lock();
        op(&mut state.engine)
    }

    fn with_writable_engine<T>(
        &self,
        op: impl FnOnce(&mut RecordStoreImpl) -> Result<T>,
    ) -> Result<T> {
        let owner = self.is_owner();
        self.with_engine(|engine| {
            if !owner && !engine.get_auth_mode()?.allows_foreign_writes() {
                return Err(RmsError::Security("no write access".to_string()));
            }
            op(engine)
        })
    }

    /// Closes one open. The last close compacts the store, stops listening
    /// for remote changes, and detaches the handle from its environment.
    pub fn close(&self) -> Result<()> {
        let env = self.shared.env.upgrade();
        let mut open_stores = env.as_ref().map(|env| env.open_stores.lock());
        let mut state = self.shared.state.lock();

        if !state.engine.is_open() {
            return Err(RmsError::NotOpen);
        }
        state.opens = state.opens.saturating_sub(1);
        if state.opens > 0 {
            return Ok(());
        }

        self.shared
            .notifier
            .stop_listening(self.suite(), self.name());
        if let Some(open_stores) = open_stores.as_mut() {
            open_stores.remove(&self.shared.key);
        }
        state.engine.close()
    }

    pub fn add_record(&self, data: &[u8]) -> Result<i32> {
        let record_id = self.with_writable_engine(|e| e.add_record(data))?;
        self.notify_all(ChangeType::Added, record_id);
        Ok(record_id)
    }

    pub fn delete_record(&self, record_id: i32) -> Result<()> {
        self.with_writable_engine(|e| e.delete_record(record_id))?;
        self.notify_all(ChangeType::Deleted, record_id);
        Ok(())
    }

    pub fn set_record(&self, record_id: i32, data: &[u8]) -> Result<()> {
        self.with_writable_engine(|e| e.set_record(record_id, data))?;
        self.notify_all(ChangeType::Changed, record_id);
        Ok(())
    }

    /// Record contents. An empty record yields an empty vector.
    pub fn get_record(&self, record_id: i32) -> Result<Vec<u8>> {
        self.with_engine(|e| e.get_record(record_id))
    }

    /// Copies the record into `buf` and returns its length.
    pub fn get_record_into(&self, record_id: i32, buf: &mut [u8]) -> Result<usize> {
        self.with_engine(|e| e.get_record_into(record_id, buf))
    }

    pub fn get_record_size(&self, record_id: i32) -> Result<u32> {
        self.with_engine(|e| e.get_record_size(record_id))
    }

    pub fn get_record_ids(&self) -> Result<Vec<i32>> {
        self.with_engine(|e| e.get_record_ids())
    }

    pub fn get_num_records(&self) -> Result<u32> {
        self.with_engine(|e| e.get_num_records())
    }

    pub fn get_size(&self) -> Result<u32> {
        self.with_engine(|e| e.get_size())
    }

    pub fn get_size_available(&self) -> Result<u32> {
        self.with_engine(|e| e.get_size_available())
    }

    pub fn get_version(&self) -> Result<u32> {
        self.with_engine(|e| e.get_version())
    }

    pub fn get_last_modified(&self) -> Result<i64> {
        self.with_engine(|e| e.get_last_modified())
    }

    pub fn get_next_record_id(&self) -> Result<i32> {
        self.with_engine(|e| e.get_next_record_id())
    }

    pub fn get_auth_mode(&self) -> Result<AuthMode> {
        self.with_engine(|e| e.get_auth_mode())
    }

    /// Changes who may access the store. Only the owning suite may call it.
    pub fn set_mode(&self, mode: AuthMode, writable: bool) -> Result<()> {
        let owner = self.is_owner();
        self.with_engine(|engine| {
            if !engine.is_open() {
                return Err(RmsError::NotOpen);
            }
            if !owner {
                return Err(RmsError::Security("not the owner".to_string()));
            }
            engine.set_mode(mode, writable)
        })
    }

    /// Cursor over the IDs of the live records. With `keep_updated` the
    /// cursor follows later changes to this store.
    pub fn enumerate_records(&self, keep_updated: bool) -> Result<RecordEnumeration> {
        RecordEnumeration::new(self.clone(), keep_updated)
    }

    /// Registers `listener`. Adding the same listener twice has no effect.
    pub fn add_record_listener(&self, listener: Arc<dyn RecordListener>) {
        let mut listeners = self.shared.listeners.lock();
        if listeners.is_empty() {
            self.shared
                .notifier
                .start_listening(self.suite(), self.name());
        }
        if !listeners.iter().any(|l| same_listener(l, &listener)) {
            listeners.push(listener);
        }
    }

    pub fn remove_record_listener(&self, listener: &Arc<dyn RecordListener>) {
        let mut listeners = self.shared.listeners.lock();
        listeners.retain(|l| !same_listener(l, listener));
        if listeners.is_empty() {
            self.shared
                .notifier
                .stop_listening(self.suite(), self.name());
        }
    }

    pub fn listener_count(&self) -> usize {
        self.shared.listeners.lock().len()
    }

    /// Runs every local listener for one change.
    pub(crate) fn notify_listeners(&self, change: ChangeType, record_id: i32) {
        let listeners = self.shared.listeners.lock().clone();
        tracing::trace!(
            store = %self.name(),
            listeners = listeners.len(),
            ?change,
            record_id,
            "notifying record listeners"
        );
        for listener in &listeners {
            dispatch(listener.as_ref(), self, change, record_id);
        }
    }

    fn notify_all(&self, change: ChangeType, record_id: i32) {
        self.notify_listeners(change, record_id);
        self.shared
            .notifier
            .notify(self.suite(), self.name(), change, record_id);
    }
}
