//! # Change Notification
//!
//! Every committed mutation is announced to the other execution contexts that
//! listen on the same store. The announcement is a bounded-effort broadcast:
//! a sender waits a little for slow receivers, but never indefinitely.
//!
//! ## Contexts and Counters
//!
//! A context is one consumer of events, typically one `Rms` environment. The
//! transport keeps a pending counter per context:
//!
//! ```text
//! deliver event ──> pending += 1 ──> needs_ack = pending % queue_size == 0
//! acknowledge   ──> pending = 0
//! ```
//!
//! A receiver that keeps up acknowledges every `queue_size`-th event. A
//! receiver whose counter exceeds `queue_size` is a blocker.
//!
//! ## Send Protocol
//!
//! ```text
//! attempt = 0, prev = none
//! loop
//!   listeners (sender excluded) empty?      ──> return, nothing sent
//!   no blocker?                             ──> break
//!   attempt > max_attempts?                 ──> stall(sender, none), break
//!   blocker == prev?                        ──> stall(sender, blocker),
//!                                               reset blocker's counter
//!   otherwise                               ──> prev = blocker, sleep(timeout)
//!   attempt += 1
//! broadcast
//! ```
//!
//! The event is always broadcast once the loop ends. Stall reports go to the
//! transport's supervisor; they are advisory.
//!
//! ## Module Organization
//!
//! - `NotificationTransport`: the seam between the protocol and delivery
//! - `Notifier`: the send protocol for one context
//! - `hub`: `LocalHub`, an in-process transport over crossbeam channels

pub mod hub;

pub use hub::{ContextHandle, LocalHub};

use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::{NOTIFICATION_ATTEMPTS, NOTIFICATION_QUEUE_SIZE, NOTIFICATION_TIMEOUT_MS};
use crate::storage::SuiteId;

/// Identifies one consumer of change events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(pub u64);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

/// Kind of change applied to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ChangeType {
    Changed = 1,
    Added = 2,
    Deleted = 3,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub suite: SuiteId,
    pub store: String,
    pub change: ChangeType,
    pub record_id: i32,
    /// Set by the transport on delivery; the receiver must acknowledge.
    pub needs_ack: bool,
}

impl ChangeEvent {
    pub fn new(suite: SuiteId, store: &str, change: ChangeType, record_id: i32) -> Self {
        Self {
            suite,
            store: store.to_string(),
            change,
            record_id,
            needs_ack: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerStatus {
    pub context: ContextId,
    pub pending: u32,
}

/// Raised when a sender gave up waiting. `blocker` is `None` when the sender
/// ran out of attempts rather than catching one receiver twice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StallReport {
    pub sender: ContextId,
    pub blocker: Option<ContextId>,
}

pub type Listeners = SmallVec<[ListenerStatus; 4]>;

/// Delivery of change events between contexts.
pub trait NotificationTransport: Send + Sync + fmt::Debug {
    fn start_listening(&self, context: ContextId, suite: SuiteId, store: &str);

    fn stop_listening(&self, context: ContextId, suite: SuiteId, store: &str);

    /// Drops every subscription of `context`.
    fn stop_all(&self, context: ContextId);

    /// Contexts listening on the store, `sender` excluded.
    fn listeners(&self, sender: ContextId, suite: SuiteId, store: &str) -> Listeners;

    /// Delivers `event` to every listener except `sender`, bumping counters.
    fn broadcast(&self, sender: ContextId, event: &ChangeEvent);

    fn reset_counter(&self, context: ContextId);

    fn acknowledge(&self, context: ContextId);

    fn report_stall(&self, report: StallReport);
}

/// Backpressure settings for the send protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotifierConfig {
    pub queue_size: u32,
    pub timeout: Duration,
    pub max_attempts: u32,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            queue_size: NOTIFICATION_QUEUE_SIZE,
            timeout: Duration::from_millis(NOTIFICATION_TIMEOUT_MS),
            max_attempts: NOTIFICATION_ATTEMPTS,
        }
    }
}

/// Sends change events on behalf of one context.
#[derive(Debug, Clone)]
pub struct Notifier {
    transport: Arc<dyn NotificationTransport>,
    config: NotifierConfig,
    context: ContextId,
}

impl Notifier {
    pub fn new(
        transport: Arc<dyn NotificationTransport>,
        config: NotifierConfig,
        context: ContextId,
    ) -> Self {
        Self {
            transport,
            config,
            context,
        }
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn config(&self) -> &NotifierConfig {
        &self.config
    }

    pub fn start_listening(&self, suite: SuiteId, store: &str) {
        self.transport.start_listening(self.context, suite, store);
    }

    pub fn stop_listening(&self, suite: SuiteId, store: &str) {
        self.transport.stop_listening(self.context, suite, store);
    }

    pub fn stop_all(&self) {
        self.transport.stop_all(self.context);
    }

    pub fn acknowledge(&self) {
        self.transport.acknowledge(self.context);
    }

    /// Announces a committed change to every other listening context.
    ///
    /// Returns `false` when nobody listens and nothing was sent. May sleep up
    /// to `max_attempts` times `timeout` while a receiver is behind.
    pub fn notify(&self, suite: SuiteId, store: &str, change: ChangeType, record_id: i32) -> bool {
        let mut attempt = 0u32;
        let mut prev_blocker: Option<ContextId> = None;

        loop {
            let listeners = self.transport.listeners(self.context, suite, store);
            if listeners.is_empty() {
                return false;
            }

            let blocker = listeners
                .iter()
                .find(|l| l.pending > self.config.queue_size)
                .map(|l| l.context);
            let Some(blocker) = blocker else {
                break;
            };

            if attempt > self.config.max_attempts {
                tracing::warn!(
                    sender = %self.context,
                    store,
                    attempts = attempt,
                    "notification attempts exhausted"
                );
                self.transport.report_stall(StallReport {
                    sender: self.context,
                    blocker: None,
                });
                break;
            }

            if prev_blocker == Some(blocker) {
                tracing::warn!(
                    sender = %self.context,
                    blocker = %blocker,
                    store,
                    "notification receiver stalled"
                );
                self.transport.report_stall(StallReport {
                    sender: self.context,
                    blocker: Some(blocker),
                });
                self.transport.reset_counter(blocker);
            } else {
                prev_blocker = Some(blocker);
                thread::sleep(self.config.timeout);
            }
            attempt += 1;
        }

        let event = ChangeEvent::new(suite, store, change, record_id);
        self.transport.broadcast(self.context, &event);
        true
    }
}
