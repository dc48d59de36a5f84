//! # Sync State Publisher
//!
//! Holds the current [`SyncState`], the countdown to the next cycle and a
//! bounded log of recent [`SyncMessage`]s, and notifies subscribers on every
//! transition.
//!
//! Two ways to listen:
//! - [`SyncPublisher::subscribe`] registers a callback and returns a
//!   [`Subscription`]; dropping it (or calling `unsubscribe`) detaches.
//! - [`SyncPublisher::watch`] hands out a `tokio::sync::watch` receiver for
//!   async consumers.
//!
//! Only the orchestrator mutates state; the mutators are crate-private.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use gigsync::sync::publisher::SyncPublisher;
//!
//! let publisher = SyncPublisher::new(50);
//! let subscription = publisher.subscribe(|state| {
//!     println!("{:?}: {}", state.status, state.message);
//! });
//! subscription.unsubscribe();
//! ```

use crate::sync::sync_state::{MessageKind, OperationPhase, SyncMessage, SyncOperation, SyncState, SyncStatus};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::watch;

type Callback = Arc<dyn Fn(&SyncState) + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct Inner {
    state: Mutex<SyncState>,
    subscribers: Mutex<BTreeMap<u64, Callback>>,
    next_subscriber: AtomicU64,
    messages: Mutex<VecDeque<SyncMessage>>,
    capacity: usize,
    last_success: Mutex<Option<DateTime<Utc>>>,
    watch_tx: watch::Sender<SyncState>,
}

/// Broadcasts sync state transitions
#[derive(Clone)]
pub struct SyncPublisher {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SyncPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncPublisher")
            .field("state", &*lock(&self.inner.state))
            .field("subscribers", &lock(&self.inner.subscribers).len())
            .field("capacity", &self.inner.capacity)
            .finish()
    }
}

/// Handle returned by [`SyncPublisher::subscribe`]
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    inner: Weak<Inner>,
}

impl Subscription {
    /// Stop receiving notifications
    pub fn unsubscribe(self) {
        // Drop does the work
    }

    fn detach(&self) {
        if let Some(inner) = self.inner.upgrade() {
            lock(&inner.subscribers).remove(&self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl SyncPublisher {
    /// Create a publisher keeping at most `capacity` messages
    pub fn new(capacity: usize) -> Self {
        let (watch_tx, _) = watch::channel(SyncState::default());
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(SyncState::default()),
                subscribers: Mutex::new(BTreeMap::new()),
                next_subscriber: AtomicU64::new(1),
                messages: Mutex::new(VecDeque::with_capacity(capacity)),
                capacity: capacity.max(1),
                last_success: Mutex::new(None),
                watch_tx,
            }),
        }
    }

    /// Register a callback; it is invoked right away with the current state
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SyncState) + Send + Sync + 'static,
    {
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let callback: Callback = Arc::new(callback);
        lock(&self.inner.subscribers).insert(id, callback.clone());
        let current = self.current();
        callback(&current);
        Subscription {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Async view of the state
    pub fn watch(&self) -> watch::Receiver<SyncState> {
        self.inner.watch_tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.subscribers).len()
    }

    pub fn current(&self) -> SyncState {
        lock(&self.inner.state).clone()
    }

    pub fn is_syncing(&self) -> bool {
        lock(&self.inner.state).is_syncing()
    }

    /// Recent messages, oldest first
    pub fn messages(&self) -> Vec<SyncMessage> {
        lock(&self.inner.messages).iter().cloned().collect()
    }

    pub fn last_successful_sync(&self) -> Option<DateTime<Utc>> {
        *lock(&self.inner.last_success)
    }

    /// "Never", "Just now", "5m ago", "2h ago" or "3d ago"
    pub fn time_since_last_sync(&self) -> String {
        self.time_since_last_sync_at(Utc::now())
    }

    pub fn time_since_last_sync_at(&self, now: DateTime<Utc>) -> String {
        let Some(last) = self.last_successful_sync() else {
            return "Never".to_string();
        };
        let minutes = (now - last).num_minutes().max(0);
        let hours = minutes / 60;
        let days = hours / 24;
        if days > 0 {
            format!("{}d ago", days)
        } else if hours > 0 {
            format!("{}h ago", hours)
        } else if minutes > 0 {
            format!("{}m ago", minutes)
        } else {
            "Just now".to_string()
        }
    }

    fn update<F>(&self, mutate: F)
    where
        F: FnOnce(&mut SyncState),
    {
        let snapshot = {
            let mut state = lock(&self.inner.state);
            mutate(&mut state);
            state.timestamp = Utc::now();
            state.clone()
        };
        self.notify(&snapshot);
    }

    fn notify(&self, state: &SyncState) {
        self.inner.watch_tx.send_replace(state.clone());
        // callbacks run without the lock so they may subscribe or unsubscribe
        let callbacks: Vec<Callback> = lock(&self.inner.subscribers).values().cloned().collect();
        for callback in callbacks {
            callback(state);
        }
    }

    /// Enter `syncing` for `operation`; clears the message log
    pub(crate) fn start(&self, operation: SyncOperation, total_items: usize) {
        lock(&self.inner.messages).clear();
        self.update(|state| {
            state.status = SyncStatus::Syncing;
            state.operation = Some(operation);
            state.message = operation.message(OperationPhase::Start).to_string();
            state.progress = 0;
            state.items_synced = 0;
            state.total_items = total_items;
            state.error = None;
            state.next_sync_in = None;
        });
    }

    /// Total known only after gathering dirty records
    pub(crate) fn set_total(&self, total_items: usize) {
        self.update(|state| {
            state.total_items = total_items;
            state.progress = SyncState::compute_progress(state.items_synced, total_items);
        });
    }

    pub(crate) fn progress(&self, items_synced: usize, message: Option<String>) {
        self.update(|state| {
            state.items_synced = items_synced;
            state.progress = SyncState::compute_progress(items_synced, state.total_items);
            if let Some(message) = message {
                state.message = message;
            }
        });
    }

    /// Record a per-record failure without ending the cycle
    pub(crate) fn note_error(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.add_message(reason.clone(), MessageKind::Warning);
        self.update(|state| state.error = Some(reason));
    }

    pub(crate) fn complete(&self, message: Option<String>) {
        *lock(&self.inner.last_success) = Some(Utc::now());
        self.update(|state| {
            let operation = state.operation;
            state.status = SyncStatus::Success;
            state.message = message.unwrap_or_else(|| {
                operation
                    .map(|op| op.message(OperationPhase::Success).to_string())
                    .unwrap_or_default()
            });
            state.progress = 100;
        });
    }

    pub(crate) fn fail(&self, error: impl Into<String>) {
        let error = error.into();
        self.add_message(error.clone(), MessageKind::Error);
        self.update(|state| {
            state.status = SyncStatus::Error;
            state.message = state
                .operation
                .map(|op| op.message(OperationPhase::Error).to_string())
                .unwrap_or_default();
            state.error = Some(error);
        });
    }

    pub(crate) fn set_countdown(&self, next_sync_in: Option<Duration>) {
        self.update(|state| state.next_sync_in = next_sync_in);
    }

    pub(crate) fn add_message(&self, text: impl Into<String>, kind: MessageKind) {
        let mut messages = lock(&self.inner.messages);
        if messages.len() == self.inner.capacity {
            messages.pop_front();
        }
        messages.push_back(SyncMessage {
            text: text.into(),
            kind,
            timestamp: Utc::now(),
        });
    }
}

impl Default for SyncPublisher {
    fn default() -> Self {
        Self::new(50)
    }
}
