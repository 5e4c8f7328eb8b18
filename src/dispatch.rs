//! Event dispatcher: per-event-kind listener registry
//!
//! Decouples the connection manager from consumers. Every listener
//! registered for an event kind at the moment `dispatch` starts receives the
//! event exactly once; listeners added later never see it (no replay) and
//! listeners removed earlier never see it.
//!
//! A listener that returns `Err` or panics is logged and skipped; delivery to
//! the remaining listeners continues.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;

/// Callback invoked with the raw event payload
pub type Listener = Arc<dyn Fn(&Value) -> anyhow::Result<()> + Send + Sync>;

/// Identifier of one registered listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct Registry {
    listeners: Mutex<HashMap<String, Vec<(ListenerId, Listener)>>>,
    next_id: AtomicU64,
}

impl Registry {
    fn remove(&self, event: &str, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let Some(entries) = listeners.get_mut(event) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            listeners.remove(event);
        }
        removed
    }
}

/// Outcome of one dispatch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Listeners that returned `Ok`
    pub delivered: usize,
    /// Listeners that returned `Err` or panicked
    pub failed: usize,
}

/// Listener registry keyed by event name
#[derive(Clone, Default)]
pub struct EventDispatcher {
    registry: Arc<Registry>,
}

/// Handle returned by [`EventDispatcher::subscribe`]; removes exactly that listener.
///
/// Dropping the handle keeps the listener registered.
#[must_use = "keep the subscription to be able to unsubscribe"]
pub struct Subscription {
    event: String,
    id: ListenerId,
    registry: Weak<Registry>,
}

impl Subscription {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    /// Deregister the listener. Returns false if it was already released.
    pub fn unsubscribe(self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry.remove(&self.event, self.id),
            None => false,
        }
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for one event kind
    pub fn subscribe<F>(&self, event: &str, listener: F) -> Subscription
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = ListenerId(self.registry.next_id.fetch_add(1, Ordering::Relaxed));
        self.registry
            .listeners
            .lock()
            .entry(event.to_string())
            .or_default()
            .push((id, Arc::new(listener)));
        tracing::debug!(event, ?id, "listener registered");

        Subscription {
            event: event.to_string(),
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Deliver `payload` to every listener currently registered for `event`
    pub fn dispatch(&self, event: &str, payload: &Value) -> DispatchReport {
        // Snapshot under the lock, call outside it: listeners may (un)subscribe.
        let targets: Vec<(ListenerId, Listener)> = match self.registry.listeners.lock().get(event) {
            Some(entries) => entries.clone(),
            None => Vec::new(),
        };

        if targets.is_empty() {
            tracing::debug!(event, "no listeners, event dropped");
            return DispatchReport::default();
        }

        let mut report = DispatchReport::default();
        for (id, listener) in targets {
            match panic::catch_unwind(AssertUnwindSafe(|| listener(payload))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    tracing::warn!(event, ?id, "listener failed: {:#}", e);
                }
                Err(panic) => {
                    report.failed += 1;
                    tracing::error!(event, ?id, "listener panicked: {}", panic_message(&*panic));
                }
            }
        }
        report
    }

    /// Release every listener
    pub fn clear(&self) {
        let mut listeners = self.registry.listeners.lock();
        let count: usize = listeners.values().map(Vec::len).sum();
        listeners.clear();
        if count > 0 {
            tracing::debug!("released {} listeners", count);
        }
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.registry
            .listeners
            .lock()
            .get(event)
            .map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.registry.listeners.lock().is_empty()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
