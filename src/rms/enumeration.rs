//! # Record Enumeration
//!
//! A bidirectional cursor over the IDs of a store's live records, in the
//! order `get_record_ids` returns them.
//!
//! ```text
//!            reset()
//!               │
//!               v
//!   before ── [ 3, 7, 9 ] ── next_record_id() -> 3, 7, 9, None
//!                           previous_record_id() from before -> 9, 7, 3, None
//! ```
//!
//! ## Keeping Updated
//!
//! A kept-updated enumeration registers a `RecordListener` on its store, so
//! local and dispatched remote changes reach it:
//!
//! - added records are inserted at the front and the cursor moves with the
//!   record it was on;
//! - changed records are moved to the front the same way;
//! - deleted records are removed and the cursor steps back over them.
//!
//! Otherwise the ID list is a snapshot until `rebuild()`. Dropping the
//! enumeration unregisters its listener.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

use super::listener::RecordListener;
use super::RecordStore;
use crate::error::Result;

#[derive(Debug, Default)]
struct Cursor {
    records: Vec<i32>,
    /// Position of the last returned ID; `None` is before the first.
    index: Option<usize>,
}

impl Cursor {
    fn replace(&mut self, records: Vec<i32>) {
        self.records = records;
        self.index = None;
    }

    fn next(&mut self) -> Option<i32> {
        let next = self.index.map_or(0, |i| i + 1);
        let id = *self.records.get(next)?;
        self.index = Some(next);
        Some(id)
    }

    fn previous(&mut self) -> Option<i32> {
        let previous = match self.index {
            Some(0) => return None,
            Some(i) => i - 1,
            None => self.records.len().checked_sub(1)?,
        };
        self.index = Some(previous);
        Some(self.records[previous])
    }

    fn has_next(&self) -> bool {
        !self.records.is_empty() && self.index != Some(self.records.len() - 1)
    }

    fn has_previous(&self) -> bool {
        !self.records.is_empty() && self.index != Some(0)
    }

    fn insert_front(&mut self, record_id: i32) {
        self.records.insert(0, record_id);
        if let Some(i) = self.index.as_mut() {
            *i += 1;
        }
    }

    fn remove(&mut self, record_id: i32) -> bool {
        let Some(pos) = self.records.iter().rposition(|&id| id == record_id) else {
            return false;
        };
        self.records.remove(pos);
        if let Some(i) = self.index {
            if pos <= i {
                self.index = i.checked_sub(1);
            }
        }
        true
    }
}

struct CursorUpdater {
    cursor: Arc<Mutex<Cursor>>,
}

impl RecordListener for CursorUpdater {
    fn record_added(&self, _store: &RecordStore, record_id: i32) {
        self.cursor.lock().insert_front(record_id);
    }

    fn record_changed(&self, _store: &RecordStore, record_id: i32) {
        let mut cursor = self.cursor.lock();
        cursor.remove(record_id);
        cursor.insert_front(record_id);
    }

    fn record_deleted(&self, _store: &RecordStore, record_id: i32) {
        self.cursor.lock().remove(record_id);
    }
}

/// Cursor over the record IDs of one store.
pub struct RecordEnumeration {
    store: RecordStore,
    cursor: Arc<Mutex<Cursor>>,
    updater: Option<Arc<dyn RecordListener>>,
}

impl fmt::Debug for RecordEnumeration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cursor = self.cursor.lock();
        f.debug_struct("RecordEnumeration")
            .field("store", &self.store.name())
            .field("records", &cursor.records.len())
            .field("index", &cursor.index)
            .field("kept_updated", &self.updater.is_some())
            .finish()
    }
}

impl RecordEnumeration {
    pub(crate) fn new(store: RecordStore, keep_updated: bool) -> Result<Self> {
        let mut enumeration = Self {
            store,
            cursor: Arc::new(Mutex::new(Cursor::default())),
            updater: None,
        };
        if keep_updated {
            enumeration.start_updating();
        }
        enumeration.rebuild()?;
        Ok(enumeration)
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn num_records(&self) -> usize {
        self.cursor.lock().records.len()
    }

    /// Advances and returns the next ID, or `None` past the last one.
    pub fn next_record_id(&self) -> Option<i32> {
        self.cursor.lock().next()
    }

    /// Steps back and returns the previous ID. From the reset position this
    /// is the last ID.
    pub fn previous_record_id(&self) -> Option<i32> {
        self.cursor.lock().previous()
    }

    /// Contents of the next record.
    ///
    /// Fails with `InvalidRecordId` if a snapshot enumeration reaches a
    /// record that has since been deleted.
    pub fn next_record(&self) -> Result<Option<Vec<u8>>> {
        self.next_record_id()
            .map(|id| self.store.get_record(id))
            .transpose()
    }

    pub fn previous_record(&self) -> Result<Option<Vec<u8>>> {
        self.previous_record_id()
            .map(|id| self.store.get_record(id))
            .transpose()
    }

    /// False once the store is closed.
    pub fn has_next_element(&self) -> bool {
        self.store.is_open() && self.cursor.lock().has_next()
    }

    pub fn has_previous_element(&self) -> bool {
        self.store.is_open() && self.cursor.lock().has_previous()
    }

    /// Moves back before the first ID.
    pub fn reset(&self) {
        self.cursor.lock().index = None;
    }

    /// Re-reads the store's IDs and resets.
    pub fn rebuild(&self) -> Result<()> {
        let records = self.store.get_record_ids()?;
        self.cursor.lock().replace(records);
        Ok(())
    }

    /// Turns updating from store changes on or off. Turning it on rebuilds.
    pub fn keep_updated(&mut self, keep_updated: bool) -> Result<()> {
        match (keep_updated, self.updater.is_some()) {
            (true, false) => {
                self.start_updating();
                self.rebuild()
            }
            (false, true) => {
                self.stop_updating();
                Ok(())
            }
            _ => Ok(()),
        }
    }

    pub fn is_kept_updated(&self) -> bool {
        self.updater.is_some()
    }

    /// Releases the enumeration. Same as dropping it.
    pub fn destroy(self) {}

    fn start_updating(&mut self) {
        let updater: Arc<dyn RecordListener> = Arc::new(CursorUpdater {
            cursor: Arc::clone(&self.cursor),
        });
        self.store.add_record_listener(Arc::clone(&updater));
        self.updater = Some(updater);
    }

    fn stop_updating(&mut self) {
        if let Some(updater) = self.updater.take() {
            self.store.remove_record_listener(&updater);
        }
    }
}

impl Drop for RecordEnumeration {
    fn drop(&mut self) {
        self.stop_updating();
    }
}
