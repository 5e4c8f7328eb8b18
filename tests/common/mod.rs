//! Shared test infrastructure: a scriptable REST collaborator and a harness
//! wiring a `SessionBinding` to an in-memory channel.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::Notify;

use biblio_notify::config::SessionConfig;
use biblio_notify::{
    AuthState, ConnectionManager, Credential, EventDispatcher, MemoryTransport, Notification, NotificationApi,
    NotificationId, NotificationStore, NotifyError, ReconnectPolicy, ServerEnd, SessionBinding,
};

/// REST collaborator double
#[derive(Default)]
pub struct FakeApi {
    snapshot: Mutex<Vec<Notification>>,
    fail_fetch: AtomicBool,
    gate: Mutex<Option<Arc<Notify>>>,
    unread_after_mark_all: AtomicU64,
    pub fetches: AtomicUsize,
    pub marked_one: Mutex<Vec<NotificationId>>,
    pub marked_all: AtomicUsize,
}

impl FakeApi {
    pub fn with_snapshot(snapshot: Vec<Notification>) -> Self {
        let api = Self::default();
        *api.snapshot.lock() = snapshot;
        api
    }

    pub fn failing() -> Self {
        let api = Self::default();
        api.fail_fetch.store(true, Ordering::SeqCst);
        api
    }

    pub fn set_snapshot(&self, snapshot: Vec<Notification>) {
        *self.snapshot.lock() = snapshot;
    }

    /// Hold every fetch until the returned gate is notified
    pub fn gate_fetches(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock() = Some(Arc::clone(&gate));
        gate
    }

    pub fn set_unread_after_mark_all(&self, count: u64) {
        self.unread_after_mark_all.store(count, Ordering::SeqCst);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl NotificationApi for FakeApi {
    fn fetch_for_user<'a>(
        &'a self,
        _user_id: &'a str,
        _credential: &'a Credential,
    ) -> BoxFuture<'a, biblio_notify::Result<Vec<Notification>>> {
        Box::pin(async move {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let gate = self.gate.lock().clone();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            if self.fail_fetch.load(Ordering::SeqCst) {
                return Err(NotifyError::ApiStatus {
                    status: 503,
                    url: "http://fake/notifications".to_string(),
                });
            }
            Ok(self.snapshot.lock().clone())
        })
    }

    fn mark_all_read<'a>(
        &'a self,
        _user_id: &'a str,
        _credential: &'a Credential,
    ) -> BoxFuture<'a, biblio_notify::Result<u64>> {
        Box::pin(async move {
            self.marked_all.fetch_add(1, Ordering::SeqCst);
            Ok(self.unread_after_mark_all.load(Ordering::SeqCst))
        })
    }

    fn mark_one_read<'a>(
        &'a self,
        _user_id: &'a str,
        id: &'a NotificationId,
        _credential: &'a Credential,
    ) -> BoxFuture<'a, biblio_notify::Result<()>> {
        Box::pin(async move {
            self.marked_one.lock().push(id.clone());
            Ok(())
        })
    }
}

/// Binding plus its in-memory channel and fake API
pub struct Harness {
    pub transport: MemoryTransport,
    pub api: Arc<FakeApi>,
    pub binding: SessionBinding,
}

impl Harness {
    pub fn new(api: FakeApi) -> Self {
        Self::with_options(api, 3, 0)
    }

    pub fn with_options(api: FakeApi, max_attempts: u32, fallback_refresh_secs: u64) -> Self {
        let transport = MemoryTransport::new();
        let manager = ConnectionManager::new(
            Arc::new(transport.clone()),
            EventDispatcher::new(),
            ReconnectPolicy {
                max_attempts,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
            },
        );
        let api = Arc::new(api);
        let binding = SessionBinding::new(manager, api.clone(), &SessionConfig { fallback_refresh_secs });
        Self {
            transport,
            api,
            binding,
        }
    }

    pub fn store(&self) -> Arc<NotificationStore> {
        self.binding.store()
    }

    pub async fn login(&self, user_id: &str) {
        self.binding.on_auth_change(authenticated(user_id)).await;
    }

    /// Server end of the most recent channel
    pub fn server(&self) -> ServerEnd {
        self.transport
            .take_server_end()
            .expect("no channel was opened")
    }
}

pub fn authenticated(user_id: &str) -> AuthState {
    AuthState::Authenticated {
        user_id: user_id.to_string(),
        credential: Credential::bearer(format!("token-{}", user_id)),
    }
}

pub fn note(id: u64, is_read: bool) -> Notification {
    Notification::new(id, format!("Notification {}", id)).with_read(is_read)
}

pub fn ids(store: &NotificationStore) -> Vec<String> {
    store.notifications().iter().map(|n| n.id.to_string()).collect()
}

/// Poll `condition` until it holds, failing the test after two seconds
pub async fn eventually<F>(what: &str, condition: F)
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for: {}", what);
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

/// Run `fut` with a two-second timeout
pub async fn within<T>(what: &str, fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(2), fut)
        .await
        .unwrap_or_else(|_| panic!("timed out: {}", what))
}
