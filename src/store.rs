//! Notification state store: the reconciliation core
//!
//! Holds the most-recent-first notification list, the unread counter and the
//! mirrored connectivity flag. Two sources feed it: a REST snapshot (`seed`)
//! and live channel events (`on_live_notification`, `on_unread_count_update`).
//! The only mechanism reconciling the snapshot/live race is dedup by id.
//!
//! # Invariants
//!
//! - No two entries share an id.
//! - The unread counter never goes below zero.
//! - A server-pushed count overwrites the local counter; local single-item
//!   transitions adjust it by one.
//!
//! Every mutation runs under one lock and publishes a fresh
//! [`NotificationState`] to `watch` receivers before the lock is released.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::schema::{Notification, NotificationId};

/// Outbound read-state signals, fire-and-forget from the store's perspective
pub trait ReadReceiptSink: Send + Sync {
    fn mark_read(&self, id: &NotificationId);
    fn mark_all_read(&self);
}

/// Sink for stores that never talk to a server
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedReceipts;

impl ReadReceiptSink for DetachedReceipts {
    fn mark_read(&self, id: &NotificationId) {
        tracing::debug!(%id, "read receipt not sent (detached store)");
    }

    fn mark_all_read(&self) {
        tracing::debug!("bulk read receipt not sent (detached store)");
    }
}

/// Snapshot of the store handed to consumers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotificationState {
    notifications: Vec<Notification>,
    unread_count: u64,
    connected: bool,
}

impl NotificationState {
    /// Most-recent-first
    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    pub fn unread_count(&self) -> u64 {
        self.unread_count
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn get(&self, id: &NotificationId) -> Option<&Notification> {
        self.notifications.iter().find(|n| &n.id == id)
    }

    pub fn unread_only(&self) -> Vec<Notification> {
        self.notifications.iter().filter(|n| !n.is_read).cloned().collect()
    }

    pub fn high_priority_only(&self) -> Vec<Notification> {
        self.notifications
            .iter()
            .filter(|n| n.is_high_priority())
            .cloned()
            .collect()
    }

    fn position(&self, id: &NotificationId) -> Option<usize> {
        self.notifications.iter().position(|n| &n.id == id)
    }

    fn local_unread(&self) -> u64 {
        self.notifications.iter().filter(|n| !n.is_read).count() as u64
    }
}

struct Inner {
    state: NotificationState,
    /// Ids removed locally; never reintroduced by a later seed or live echo
    removed: HashSet<NotificationId>,
}

/// In-memory notification store
pub struct NotificationStore {
    inner: Mutex<Inner>,
    publisher: watch::Sender<NotificationState>,
    receipts: Arc<dyn ReadReceiptSink>,
}

impl Default for NotificationStore {
    fn default() -> Self {
        Self::new(Arc::new(DetachedReceipts))
    }
}

impl NotificationStore {
    pub fn new(receipts: Arc<dyn ReadReceiptSink>) -> Self {
        let (publisher, _) = watch::channel(NotificationState::default());
        Self {
            inner: Mutex::new(Inner {
                state: NotificationState::default(),
                removed: HashSet::new(),
            }),
            publisher,
            receipts,
        }
    }

    /// Receiver that observes every published change
    pub fn watch(&self) -> watch::Receiver<NotificationState> {
        self.publisher.subscribe()
    }

    /// Current state snapshot
    pub fn state(&self) -> NotificationState {
        self.inner.lock().state.clone()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.inner.lock().state.notifications.clone()
    }

    pub fn unread_count(&self) -> u64 {
        self.inner.lock().state.unread_count
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock().state.connected
    }

    pub fn get(&self, id: &NotificationId) -> Option<Notification> {
        self.inner.lock().state.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().state.notifications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn unread_only(&self) -> Vec<Notification> {
        self.inner.lock().state.unread_only()
    }

    pub fn high_priority_only(&self) -> Vec<Notification> {
        self.inner.lock().state.high_priority_only()
    }

    /// Run `f` under the lock; publish if it reports a change
    fn apply<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut Inner) -> bool,
    {
        let mut inner = self.inner.lock();
        let changed = f(&mut inner);
        if changed {
            self.publisher.send_replace(inner.state.clone());
        }
        changed
    }

    /// Merge a REST snapshot into the store.
    ///
    /// Entries already present keep their place at the front; snapshot
    /// entries follow in snapshot order, minus ids already present or removed
    /// locally. A snapshot that reports an existing entry as read marks it
    /// read. The unread counter is recomputed from the merged list.
    pub fn seed(&self, snapshot: Vec<Notification>) {
        let total = snapshot.len();
        let mut merged = 0usize;
        self.apply(|inner| {
            for incoming in snapshot {
                if inner.removed.contains(&incoming.id) {
                    continue;
                }
                match inner.state.position(&incoming.id) {
                    Some(idx) => {
                        if incoming.is_read {
                            inner.state.notifications[idx].is_read = true;
                        }
                    }
                    None => {
                        inner.state.notifications.push(incoming);
                        merged += 1;
                    }
                }
            }
            inner.state.unread_count = inner.state.local_unread();
            true
        });
        tracing::debug!("seeded {}/{} snapshot entries", merged, total);
    }

    /// Apply a live `new_notification` event. Returns false for duplicates.
    pub fn on_live_notification(&self, notification: Notification) -> bool {
        let id = notification.id.clone();
        let applied = self.apply(|inner| {
            if inner.removed.contains(&notification.id)
                || inner.state.position(&notification.id).is_some()
            {
                return false;
            }
            if !notification.is_read {
                inner.state.unread_count = inner.state.unread_count.saturating_add(1);
            }
            inner.state.notifications.insert(0, notification);
            true
        });
        if !applied {
            tracing::debug!(%id, "duplicate live notification discarded");
        }
        applied
    }

    /// Authoritative unread count from the server
    pub fn on_unread_count_update(&self, count: u64) {
        self.apply(|inner| {
            if inner.state.unread_count == count {
                return false;
            }
            inner.state.unread_count = count;
            true
        });
    }

    /// Mark one entry read and send the read signal.
    ///
    /// No-op (and no signal) if the entry is absent or already read. The
    /// local flag stays set even if the server never acknowledges it.
    pub fn mark_as_read(&self, id: &NotificationId) -> bool {
        let changed = self.apply(|inner| {
            let Some(idx) = inner.state.position(id) else {
                return false;
            };
            let entry = &mut inner.state.notifications[idx];
            if entry.is_read {
                return false;
            }
            entry.is_read = true;
            inner.state.unread_count = inner.state.unread_count.saturating_sub(1);
            true
        });
        if changed {
            self.receipts.mark_read(id);
        }
        changed
    }

    /// Mark every entry read, zero the counter and send the bulk signal
    pub fn mark_all_as_read(&self) {
        self.mark_all_as_read_local();
        // The server may hold unread items this client never loaded.
        self.receipts.mark_all_read();
    }

    /// The local half of [`mark_all_as_read`](Self::mark_all_as_read): no signal is sent.
    /// Returns true if anything changed.
    pub fn mark_all_as_read_local(&self) -> bool {
        self.apply(|inner| {
            let mut changed = inner.state.unread_count != 0;
            for entry in inner.state.notifications.iter_mut().filter(|n| !n.is_read) {
                entry.is_read = true;
                changed = true;
            }
            inner.state.unread_count = 0;
            changed
        })
    }

    /// Optimistic local insert. Returns false if the id is already present.
    pub fn add(&self, notification: Notification) -> bool {
        self.apply(|inner| {
            if inner.state.position(&notification.id).is_some() {
                return false;
            }
            inner.removed.remove(&notification.id);
            if !notification.is_read {
                inner.state.unread_count = inner.state.unread_count.saturating_add(1);
            }
            inner.state.notifications.insert(0, notification);
            true
        })
    }

    /// Local removal. Decrements the counter when the entry was unread.
    pub fn remove(&self, id: &NotificationId) -> Option<Notification> {
        let mut removed = None;
        self.apply(|inner| {
            let Some(idx) = inner.state.position(id) else {
                return false;
            };
            let entry = inner.state.notifications.remove(idx);
            if !entry.is_read {
                inner.state.unread_count = inner.state.unread_count.saturating_sub(1);
            }
            inner.removed.insert(entry.id.clone());
            removed = Some(entry);
            true
        });
        removed
    }

    /// Local removal of every entry
    pub fn clear(&self) {
        self.apply(|inner| {
            let ids: Vec<NotificationId> = inner
                .state
                .notifications
                .drain(..)
                .map(|n| n.id)
                .collect();
            inner.removed.extend(ids);
            inner.state.unread_count = 0;
            true
        });
    }

    /// Mirror the connection manager's state
    pub fn set_connected(&self, connected: bool) {
        self.apply(|inner| {
            if inner.state.connected == connected {
                return false;
            }
            inner.state.connected = connected;
            true
        });
    }

    /// Forget everything, including local removals (session end)
    pub fn reset(&self) {
        self.apply(|inner| {
            inner.removed.clear();
            let changed = inner.state != NotificationState::default();
            inner.state = NotificationState::default();
            changed
        });
    }
}
