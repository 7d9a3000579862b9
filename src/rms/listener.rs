//! Record listeners receive a callback for every committed change to a
//! store, whether it was made through this environment or announced by
//! another one.

use std::sync::Arc;

use super::RecordStore;
use crate::notify::ChangeType;

/// Callbacks run after the change is committed and the store lock is
/// released, so a listener may read the store it is told about.
pub trait RecordListener: Send + Sync {
    fn record_added(&self, store: &RecordStore, record_id: i32);

    fn record_changed(&self, store: &RecordStore, record_id: i32);

    fn record_deleted(&self, store: &RecordStore, record_id: i32);
}

pub(crate) fn dispatch(
    listener: &dyn RecordListener,
    store: &RecordStore,
    change: ChangeType,
    record_id: i32,
) {
    match change {
        ChangeType::Added => listener.record_added(store, record_id),
        ChangeType::Changed => listener.record_changed(store, record_id),
        ChangeType::Deleted => listener.record_deleted(store, record_id),
    }
}

/// Listener identity is the allocation, not the value.
pub(crate) fn same_listener(a: &Arc<dyn RecordListener>, b: &Arc<dyn RecordListener>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}
