//! # Shared Store Header
//!
//! Every open of a store inside one environment goes through a single
//! `SharedStore`: the in-memory mirror of the 40-byte header, guarded by the
//! mutex that doubles as the per-store lock.
//!
//! ## Registry
//!
//! ```text
//! SharedRegistry
//!   (suite 7, "scores")  ──> SharedStore { Mutex<DbHeader> }   opens = 2
//!   (suite 7, "config")  ──> SharedStore { Mutex<DbHeader> }   opens = 1
//! ```
//!
//! `acquire` creates the entry on first open and bumps the count afterwards;
//! `release` drops it when the count reaches zero.
//!
//! ## Lock Order
//!
//! The header mutex is always taken before the store file lock. Opening a
//! store follows the same order, so an open racing with a mutation on the
//! same store cannot deadlock.
//!
//! ## Coherence
//!
//! The mirror is only an optimization for same-process readers. The engine
//! reloads the header from the file after taking the lock, so changes made
//! through another environment replace the mirror before they are used.

use hashbrown::HashMap;
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

use crate::storage::{DbHeader, SuiteId};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreKey {
    pub suite: SuiteId,
    pub name: String,
}

impl StoreKey {
    pub fn new(suite: SuiteId, name: &str) -> Self {
        Self {
            suite,
            name: name.to_string(),
        }
    }
}

#[derive(Debug)]
pub struct SharedStore {
    key: StoreKey,
    header: Mutex<DbHeader>,
}

impl SharedStore {
    fn new(key: StoreKey) -> Self {
        Self {
            key,
            header: Mutex::new(DbHeader::new(0)),
        }
    }

    pub fn key(&self) -> &StoreKey {
        &self.key
    }

    /// Takes the store lock. The guard exposes the header for edits.
    pub fn lock(&self) -> MutexGuard<'_, DbHeader> {
        self.header.lock()
    }

    /// Copy of the current header.
    pub fn header(&self) -> DbHeader {
        *self.header.lock()
    }
}

#[derive(Debug)]
struct RegistryEntry {
    store: Arc<SharedStore>,
    opens: usize,
}

#[derive(Debug, Default)]
pub struct SharedRegistry {
    stores: Mutex<HashMap<StoreKey, RegistryEntry>>,
}

impl SharedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, suite: SuiteId, name: &str) -> Arc<SharedStore> {
        let key = StoreKey::new(suite, name);
        let mut stores = self.stores.lock();
        let entry = stores.entry(key.clone()).or_insert_with(|| RegistryEntry {
            store: Arc::new(SharedStore::new(key)),
            opens: 0,
        });
        entry.opens += 1;
        Arc::clone(&entry.store)
    }

    /// Returns the number of opens left after this release.
    pub fn release(&self, key: &StoreKey) -> usize {
        let mut stores = self.stores.lock();
        let remaining = match stores.get_mut(key) {
            Some(entry) => {
                entry.opens = entry.opens.saturating_sub(1);
                entry.opens
            }
            None => return 0,
        };
        if remaining == 0 {
            stores.remove(key);
        }
        remaining
    }

    pub fn open_count(&self, suite: SuiteId, name: &str) -> usize {
        self.stores
            .lock()
            .get(&StoreKey::new(suite, name))
            .map_or(0, |e| e.opens)
    }
}
