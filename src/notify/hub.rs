//! # Local Hub
//!
//! `LocalHub` is an in-process `NotificationTransport`. Each registered
//! context gets an unbounded crossbeam channel for events; subscriptions and
//! pending counters live in one mutex-guarded table.
//!
//! ```text
//!             ┌──────────── LocalHub ─────────────┐
//! Notifier ──>│ ctx#1  pending 0  {(7, "scores")} │──> ContextHandle ctx#1
//!             │ ctx#2  pending 4  {(7, "scores")} │──> ContextHandle ctx#2
//!             │ stall reports ──> supervisor rx   │
//!             └───────────────────────────────────┘
//! ```
//!
//! Dropping a `ContextHandle` unregisters the context and all of its
//! subscriptions. Stall reports are queued on a separate channel that any
//! number of supervisors can read through `stall_reports()`.

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use hashbrown::{HashMap, HashSet};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use super::{ChangeEvent, ContextId, ListenerStatus, Listeners, NotificationTransport, StallReport};
use crate::config::NOTIFICATION_QUEUE_SIZE;
use crate::storage::SuiteId;
use crate::store::StoreKey;

#[derive(Debug)]
struct ContextEntry {
    events: Sender<ChangeEvent>,
    pending: u32,
    subscriptions: HashSet<StoreKey>,
}

#[derive(Debug, Default)]
struct HubState {
    next_id: u64,
    contexts: HashMap<ContextId, ContextEntry>,
}

#[derive(Debug)]
struct HubInner {
    state: Mutex<HubState>,
    queue_size: u32,
    stalls_tx: Sender<StallReport>,
    stalls_rx: Receiver<StallReport>,
}

/// In-process transport shared by every environment that should see each
/// other's changes. Cloning shares the hub.
#[derive(Debug, Clone)]
pub struct LocalHub {
    inner: Arc<HubInner>,
}

impl Default for LocalHub {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalHub {
    pub fn new() -> Self {
        Self::with_queue_size(NOTIFICATION_QUEUE_SIZE)
    }

    /// `queue_size` decides which deliveries ask for an acknowledgement and
    /// should match the notifiers using this hub.
    pub fn with_queue_size(queue_size: u32) -> Self {
        let (stalls_tx, stalls_rx) = channel::unbounded();
        Self {
            inner: Arc::new(HubInner {
                state: Mutex::new(HubState::default()),
                queue_size: queue_size.max(1),
                stalls_tx,
                stalls_rx,
            }),
        }
    }

    pub fn queue_size(&self) -> u32 {
        self.inner.queue_size
    }

    pub fn register_context(&self) -> ContextHandle {
        let (tx, rx) = channel::unbounded();
        let mut state = self.inner.state.lock();
        state.next_id += 1;
        let id = ContextId(state.next_id);
        state.contexts.insert(
            id,
            ContextEntry {
                events: tx,
                pending: 0,
                subscriptions: HashSet::new(),
            },
        );
        tracing::debug!(context = %id, "notification context registered");
        ContextHandle {
            id,
            hub: self.clone(),
            events: rx,
        }
    }

    fn unregister(&self, context: ContextId) {
        if self.inner.state.lock().contexts.remove(&context).is_some() {
            tracing::debug!(context = %context, "notification context unregistered");
        }
    }

    /// Receiver for stall reports raised by any notifier on this hub.
    pub fn stall_reports(&self) -> Receiver<StallReport> {
        self.inner.stalls_rx.clone()
    }

    /// Pending counter of `context`, or `None` if it is not registered.
    pub fn pending(&self, context: ContextId) -> Option<u32> {
        self.inner
            .state
            .lock()
            .contexts
            .get(&context)
            .map(|e| e.pending)
    }

    pub fn is_listening(&self, context: ContextId, suite: SuiteId, store: &str) -> bool {
        self.inner
            .state
            .lock()
            .contexts
            .get(&context)
            .is_some_and(|e| e.subscriptions.contains(&StoreKey::new(suite, store)))
    }
}

impl NotificationTransport for LocalHub {
    fn start_listening(&self, context: ContextId, suite: SuiteId, store: &str) {
        if let Some(entry) = self.inner.state.lock().contexts.get_mut(&context) {
            entry.subscriptions.insert(StoreKey::new(suite, store));
        }
    }

    fn stop_listening(&self, context: ContextId, suite: SuiteId, store: &str) {
        if let Some(entry) = self.inner.state.lock().contexts.get_mut(&context) {
            entry.subscriptions.remove(&StoreKey::new(suite, store));
        }
    }

    fn stop_all(&self, context: ContextId) {
        if let Some(entry) = self.inner.state.lock().contexts.get_mut(&context) {
            entry.subscriptions.clear();
        }
    }

    fn listeners(&self, sender: ContextId, suite: SuiteId, store: &str) -> Listeners {
        let key = StoreKey::new(suite, store);
        let state = self.inner.state.lock();
        let mut listeners: Listeners = state
            .contexts
            .iter()
            .filter(|(id, e)| **id != sender && e.subscriptions.contains(&key))
            .map(|(id, e)| ListenerStatus {
                context: *id,
                pending: e.pending,
            })
            .collect();
        listeners.sort_unstable_by_key(|l| l.context);
        listeners
    }

    fn broadcast(&self, sender: ContextId, event: &ChangeEvent) {
        let key = StoreKey::new(event.suite, &event.store);
        let queue_size = self.inner.queue_size;
        let mut state = self.inner.state.lock();
        for (id, entry) in state.contexts.iter_mut() {
            if *id == sender || !entry.subscriptions.contains(&key) {
                continue;
            }
            entry.pending += 1;
            let delivered = ChangeEvent {
                needs_ack: entry.pending % queue_size == 0,
                ..event.clone()
            };
            if entry.events.send(delivered).is_err() {
                tracing::trace!(context = %id, "dropped event for closed context");
            }
        }
    }

    fn reset_counter(&self, context: ContextId) {
        if let Some(entry) = self.inner.state.lock().contexts.get_mut(&context) {
            entry.pending = 0;
        }
    }

    fn acknowledge(&self, context: ContextId) {
        self.reset_counter(context);
    }

    fn report_stall(&self, report: StallReport) {
        // The hub holds a receiver itself, so the channel never disconnects.
        let _ = self.inner.stalls_tx.send(report);
    }
}

/// Registration of one context on a `LocalHub`. Receives the events
/// addressed to it and unregisters on drop.
#[derive(Debug)]
pub struct ContextHandle {
    id: ContextId,
    hub: LocalHub,
    events: Receiver<ChangeEvent>,
}

impl ContextHandle {
    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn hub(&self) -> &LocalHub {
        &self.hub
    }

    pub fn try_recv(&self) -> Option<ChangeEvent> {
        match self.events.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<ChangeEvent> {
        match self.events.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Everything queued right now.
    pub fn drain(&self) -> Vec<ChangeEvent> {
        self.events.try_iter().collect()
    }

    pub fn acknowledge(&self) {
        self.hub.acknowledge(self.id);
    }
}

impl Drop for ContextHandle {
    fn drop(&mut self) {
        self.hub.unregister(self.id);
    }
}
