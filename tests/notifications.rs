//! # Change Notification Test Suite
//!
//! Several environments on one directory and one `LocalHub`, checking that
//! record listeners hear about remote changes and that a receiver which
//! never acknowledges slows senders down only for a bounded time.
//!
//! ## Usage
//!
//! ```sh
//! cargo test --test notifications
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rmstore::{ChangeType, LocalHub, NotifierConfig, RecordListener, RecordStore, Rms, SuiteId};
use tempfile::tempdir;

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<(String, ChangeType, i32)>>,
}

impl Recorder {
    fn events(&self) -> Vec<(String, ChangeType, i32)> {
        self.seen.lock().clone()
    }

    fn push(&self, store: &RecordStore, change: ChangeType, record_id: i32) {
        self.seen
            .lock()
            .push((store.name().to_string(), change, record_id));
    }
}

impl RecordListener for Recorder {
    fn record_added(&self, store: &RecordStore, record_id: i32) {
        self.push(store, ChangeType::Added, record_id);
    }

    fn record_changed(&self, store: &RecordStore, record_id: i32) {
        self.push(store, ChangeType::Changed, record_id);
    }

    fn record_deleted(&self, store: &RecordStore, record_id: i32) {
        self.push(store, ChangeType::Deleted, record_id);
    }
}

fn config(queue_size: u32, timeout_ms: u64) -> NotifierConfig {
    NotifierConfig {
        queue_size,
        timeout: Duration::from_millis(timeout_ms),
        max_attempts: 5,
    }
}

fn join(root: &Path, hub: &LocalHub, config: NotifierConfig) -> Rms {
    Rms::builder()
        .path(root)
        .suite(SuiteId(1))
        .hub(hub.clone())
        .notifier(config)
        .open()
        .expect("failed to open rms environment")
}

// ============================================================================
// DELIVERY
// ============================================================================

#[test]
fn remote_changes_reach_listeners_in_order() {
    let dir = tempdir().unwrap();
    let hub = LocalHub::new();
    let writer = join(dir.path(), &hub, config(10, 1));
    let reader = join(dir.path(), &hub, config(10, 1));

    let theirs = reader.open_record_store("scores", true).unwrap();
    let recorder = Arc::new(Recorder::default());
    theirs.add_record_listener(recorder.clone());

    let ours = writer.open_record_store("scores", false).unwrap();
    let id = ours.add_record(b"1").unwrap();
    ours.set_record(id, b"2").unwrap();
    ours.delete_record(id).unwrap();

    assert_eq!(reader.dispatch_events(), 3);
    assert_eq!(
        recorder.events(),
        vec![
            ("scores".to_string(), ChangeType::Added, id),
            ("scores".to_string(), ChangeType::Changed, id),
            ("scores".to_string(), ChangeType::Deleted, id),
        ]
    );
}

#[test]
fn own_changes_are_not_echoed_back() {
    let dir = tempdir().unwrap();
    let hub = LocalHub::new();
    let rms = join(dir.path(), &hub, config(10, 1));
    let store = rms.open_record_store("scores", true).unwrap();
    let recorder = Arc::new(Recorder::default());
    store.add_record_listener(recorder.clone());

    store.add_record(b"x").unwrap();

    assert_eq!(recorder.events().len(), 1);
    assert_eq!(rms.dispatch_events(), 0);
    assert_eq!(recorder.events().len(), 1);
}

#[test]
fn events_only_reach_listeners_of_that_store() {
    let dir = tempdir().unwrap();
    let hub = LocalHub::new();
    let writer = join(dir.path(), &hub, config(10, 1));
    let reader = join(dir.path(), &hub, config(10, 1));

    let scores = reader.open_record_store("scores", true).unwrap();
    let settings = reader.open_record_store("settings", true).unwrap();
    let recorder = Arc::new(Recorder::default());
    settings.add_record_listener(recorder.clone());

    writer
        .open_record_store("scores", false)
        .unwrap()
        .add_record(b"s")
        .unwrap();
    let id = writer
        .open_record_store("settings", false)
        .unwrap()
        .add_record(b"t")
        .unwrap();

    assert_eq!(reader.dispatch_events(), 1);
    assert_eq!(
        recorder.events(),
        vec![("settings".to_string(), ChangeType::Added, id)]
    );
    assert_eq!(scores.listener_count(), 0);
}

#[test]
fn removing_last_listener_stops_remote_delivery() {
    let dir = tempdir().unwrap();
    let hub = LocalHub::new();
    let writer = join(dir.path(), &hub, config(10, 1));
    let reader = join(dir.path(), &hub, config(10, 1));

    let theirs = reader.open_record_store("scores", true).unwrap();
    let recorder: Arc<dyn RecordListener> = Arc::new(Recorder::default());
    theirs.add_record_listener(recorder.clone());
    theirs.remove_record_listener(&recorder);

    writer
        .open_record_store("scores", false)
        .unwrap()
        .add_record(b"quiet")
        .unwrap();

    assert_eq!(reader.dispatch_events(), 0);
}

#[test]
fn kept_updated_enumeration_sees_remote_changes() {
    let dir = tempdir().unwrap();
    let hub = LocalHub::new();
    let writer = join(dir.path(), &hub, config(10, 1));
    let reader = join(dir.path(), &hub, config(10, 1));

    let ours = writer.open_record_store("scores", true).unwrap();
    let first = ours.add_record(b"1").unwrap();
    let theirs = reader.open_record_store("scores", false).unwrap();
    let records = theirs.enumerate_records(true).unwrap();
    assert_eq!(records.num_records(), 1);

    let second = ours.add_record(b"2").unwrap();
    ours.delete_record(first).unwrap();
    assert_eq!(records.num_records(), 1);

    assert_eq!(reader.dispatch_events(), 2);
    assert_eq!(records.next_record_id(), Some(second));
    assert_eq!(records.next_record().unwrap(), None);
}

// ============================================================================
// BACKPRESSURE
// ============================================================================

#[test]
fn silent_receiver_is_reported_and_still_served() {
    let dir = tempdir().unwrap();
    let hub = LocalHub::with_queue_size(3);
    let stalls = hub.stall_reports();
    let writer = join(dir.path(), &hub, config(3, 5));
    let reader = join(dir.path(), &hub, config(3, 5));

    let theirs = reader.open_record_store("scores", true).unwrap();
    theirs.add_record_listener(Arc::new(Recorder::default()));
    let ours = writer.open_record_store("scores", false).unwrap();

    let started = Instant::now();
    for i in 0..6u8 {
        ours.add_record(&[i]).unwrap();
    }
    let elapsed = started.elapsed();

    let report = stalls.try_recv().expect("expected a stall report");
    assert_eq!(report.sender, writer.context());
    assert_eq!(report.blocker, Some(reader.context()));
    assert!(elapsed < Duration::from_secs(5));

    assert_eq!(reader.dispatch_events(), 6);
}

#[test]
fn acknowledging_receiver_never_stalls_sender() {
    let dir = tempdir().unwrap();
    let hub = LocalHub::with_queue_size(2);
    let stalls = hub.stall_reports();
    let writer = join(dir.path(), &hub, config(2, 5));
    let reader = join(dir.path(), &hub, config(2, 5));

    let theirs = reader.open_record_store("scores", true).unwrap();
    let recorder = Arc::new(Recorder::default());
    theirs.add_record_listener(recorder.clone());
    let ours = writer.open_record_store("scores", false).unwrap();

    for i in 0..10u8 {
        ours.add_record(&[i]).unwrap();
        reader.dispatch_events();
    }

    assert!(stalls.try_recv().is_err());
    assert_eq!(recorder.events().len(), 10);
    assert_eq!(hub.pending(reader.context()), Some(0));
}
