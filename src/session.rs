//! Session binding
//!
//! Ties the channel and the notification store to the authenticated-user
//! lifecycle:
//!
//! - login: wire store listeners, fetch the snapshot and seed the store, then
//!   connect the channel (at most once per session)
//! - logout: disconnect, release listeners and wipe the store
//!
//! Snapshot and channel are independent sources: a failed fetch leaves the
//! store empty but the connection attempt still happens, and a failed
//! connection leaves the store usable with periodic snapshot refreshes.
//! Every session carries an epoch; results that resolve after their session
//! ended are discarded.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::api::NotificationApi;
use crate::channel::protocol::{decode_payload, events};
use crate::channel::{ConnectionManager, ConnectionState};
use crate::config::SessionConfig;
use crate::dispatch::Subscription;
use crate::error::{NotifyError, Result};
use crate::schema::{Credential, Notification, NotificationId, UnreadCount};
use crate::store::{NotificationStore, ReadReceiptSink};

/// Authentication state as published by the auth provider
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AuthState {
    #[default]
    Anonymous,
    Authenticated {
        user_id: String,
        credential: Credential,
    },
}

/// Soft failures and lifecycle changes surfaced to the UI
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Started { user_id: String },
    Ended { user_id: String },
    SnapshotLoaded { count: usize },
    SnapshotFailed { message: String },
    LiveUpdatesUnavailable { message: String },
    Connection(ConnectionState),
}

#[derive(Debug, Clone)]
struct SessionInfo {
    epoch: u64,
    id: Uuid,
    user_id: String,
    credential: Credential,
    /// One-shot latch: set once `connect` has been issued for this session
    connect_issued: Arc<AtomicBool>,
    /// Set once `LiveUpdatesUnavailable` went out; cleared on reconnect
    offline_reported: Arc<AtomicBool>,
}

struct ActiveSession {
    info: SessionInfo,
    subscriptions: Vec<Subscription>,
    tasks: Vec<JoinHandle<()>>,
}

struct BindingInner {
    manager: ConnectionManager,
    store: Arc<NotificationStore>,
    api: Arc<dyn NotificationApi>,
    fallback_refresh: Option<Duration>,
    session: Mutex<Option<ActiveSession>>,
    next_epoch: AtomicU64,
    events: broadcast::Sender<SessionEvent>,
}

/// Binds notification delivery to the authenticated session
#[derive(Clone)]
pub struct SessionBinding {
    inner: Arc<BindingInner>,
}

impl SessionBinding {
    pub fn new(manager: ConnectionManager, api: Arc<dyn NotificationApi>, config: &SessionConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        let inner = Arc::new_cyclic(|binding: &Weak<BindingInner>| {
            let receipts = SessionReceipts {
                binding: binding.clone(),
            };
            BindingInner {
                manager,
                store: Arc::new(NotificationStore::new(Arc::new(receipts))),
                api,
                fallback_refresh: config.fallback_refresh(),
                session: Mutex::new(None),
                next_epoch: AtomicU64::new(1),
                events,
            }
        });
        Self { inner }
    }

    /// Store fed by this binding
    pub fn store(&self) -> Arc<NotificationStore> {
        Arc::clone(&self.inner.store)
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.inner.manager
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn user_id(&self) -> Option<String> {
        self.inner
            .session
            .lock()
            .as_ref()
            .map(|s| s.info.user_id.clone())
    }

    pub fn is_active(&self) -> bool {
        self.inner.session.lock().is_some()
    }

    /// Apply one auth transition
    pub async fn on_auth_change(&self, auth: AuthState) {
        match auth {
            AuthState::Authenticated { user_id, credential } => self.login(user_id, credential).await,
            AuthState::Anonymous => self.logout(),
        }
    }

    /// Follow the auth provider until its sender is dropped, then log out.
    ///
    /// A login still in progress when the auth state changes is abandoned and
    /// its partial session torn down before the new state is applied.
    pub async fn run(&self, mut auth: watch::Receiver<AuthState>) {
        let mut state = auth.borrow_and_update().clone();
        loop {
            let mut superseded = false;
            match &state {
                AuthState::Anonymous => self.logout(),
                AuthState::Authenticated { user_id, credential } => {
                    let login = self.login(user_id.clone(), credential.clone());
                    tokio::pin!(login);
                    loop {
                        tokio::select! {
                            _ = &mut login => break,
                            changed = auth.changed() => {
                                if changed.is_err() {
                                    break;
                                }
                                if *auth.borrow_and_update() != state {
                                    superseded = true;
                                    break;
                                }
                            }
                        }
                    }
                }
            }

            if superseded {
                tracing::debug!("Auth state changed during login, restarting binding");
                self.logout();
            } else if auth.changed().await.is_err() {
                break;
            }
            state = auth.borrow_and_update().clone();
        }
        self.logout();
    }

    /// Start a session for `user_id`. No-op if that user is already bound with
    /// the same credential; a different user or credential replaces the session.
    pub async fn login(&self, user_id: String, credential: Credential) {
        let replace = match self.inner.session.lock().as_ref() {
            Some(active) if active.info.user_id == user_id && active.info.credential == credential => {
                tracing::debug!(session = %active.info.id, "Session already bound, login ignored");
                return;
            }
            Some(_) => true,
            None => false,
        };
        if replace {
            self.logout();
        }

        let info = SessionInfo {
            epoch: self.inner.next_epoch.fetch_add(1, Ordering::SeqCst),
            id: Uuid::new_v4(),
            user_id,
            credential,
            connect_issued: Arc::new(AtomicBool::new(false)),
            offline_reported: Arc::new(AtomicBool::new(false)),
        };
        tracing::info!(session = %info.id, user = %info.user_id, "Notification session started");

        let subscriptions = self.inner.wire_listeners();
        let mut tasks = vec![tokio::spawn(mirror_connectivity(
            Arc::downgrade(&self.inner),
            info.clone(),
            self.inner.manager.watch_state(),
        ))];
        if let Some(period) = self.inner.fallback_refresh {
            tasks.push(tokio::spawn(fallback_refresh(
                Arc::downgrade(&self.inner),
                info.epoch,
                period,
            )));
        }
        *self.inner.session.lock() = Some(ActiveSession {
            info: info.clone(),
            subscriptions,
            tasks,
        });
        self.inner.emit(SessionEvent::Started {
            user_id: info.user_id.clone(),
        });

        match self.inner.load_snapshot(&info).await {
            Ok(count) => tracing::debug!(session = %info.id, "Snapshot seeded with {} entries", count),
            Err(NotifyError::NoSession) => return,
            Err(e) => {
                tracing::warn!(session = %info.id, "Snapshot fetch failed: {}", e);
                self.inner.emit(SessionEvent::SnapshotFailed { message: e.to_string() });
            }
        }

        self.inner.connect_once(&info).await;
    }

    /// End the current session, if any
    pub fn logout(&self) {
        let Some(active) = self.inner.session.lock().take() else {
            return;
        };
        for task in &active.tasks {
            task.abort();
        }
        for subscription in active.subscriptions {
            subscription.unsubscribe();
        }
        self.inner.manager.disconnect();
        self.inner.store.reset();
        tracing::info!(session = %active.info.id, "Notification session ended");
        self.inner.emit(SessionEvent::Ended {
            user_id: active.info.user_id,
        });
    }

    /// Re-fetch the snapshot for the current session and merge it into the store
    pub async fn refresh(&self) -> Result<usize> {
        let info = self.inner.current_info().ok_or(NotifyError::NoSession)?;
        self.inner.load_snapshot(&info).await
    }

    /// Mark everything read locally and on the server.
    ///
    /// The bulk signal also goes over the channel when it is up. The count
    /// returned by the REST call becomes the unread counter, unless the
    /// session ended in the meantime.
    pub async fn mark_all_as_read(&self) -> Result<u64> {
        let info = self.inner.current_info().ok_or(NotifyError::NoSession)?;
        self.inner.store.mark_all_as_read_local();
        if self.inner.manager.is_connected() {
            self.inner.manager.mark_all_read();
        }

        let count = self.inner.api.mark_all_read(&info.user_id, &info.credential).await?;
        if self.inner.is_current(info.epoch) {
            self.inner.store.on_unread_count_update(count);
        } else {
            tracing::debug!(session = %info.id, "Discarding unread count for ended session");
        }
        Ok(count)
    }
}

impl BindingInner {
    fn emit(&self, event: SessionEvent) {
        // No receivers is fine: nobody is showing toasts.
        let _ = self.events.send(event);
    }

    fn current_info(&self) -> Option<SessionInfo> {
        self.session.lock().as_ref().map(|s| s.info.clone())
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.session
            .lock()
            .as_ref()
            .is_some_and(|s| s.info.epoch == epoch)
    }

    /// Route channel events into the store
    fn wire_listeners(&self) -> Vec<Subscription> {
        let dispatcher = self.manager.dispatcher();

        let store = Arc::clone(&self.store);
        let on_notification = dispatcher.subscribe(events::NEW_NOTIFICATION, move |payload| {
            let notification: Notification = decode_payload(events::NEW_NOTIFICATION, payload)?;
            store.on_live_notification(notification);
            Ok(())
        });

        let store = Arc::clone(&self.store);
        let on_count = dispatcher.subscribe(events::UNREAD_COUNT_UPDATE, move |payload| {
            let update: UnreadCount = decode_payload(events::UNREAD_COUNT_UPDATE, payload)?;
            store.on_unread_count_update(update.count);
            Ok(())
        });

        vec![on_notification, on_count]
    }

    /// Fetch and seed; a result for a session that has since ended is dropped
    async fn load_snapshot(&self, info: &SessionInfo) -> Result<usize> {
        let snapshot = self.api.fetch_for_user(&info.user_id, &info.credential).await?;
        if !self.is_current(info.epoch) {
            tracing::debug!(session = %info.id, "Discarding snapshot for ended session");
            return Err(NotifyError::NoSession);
        }
        let count = snapshot.len();
        self.store.seed(snapshot);
        self.emit(SessionEvent::SnapshotLoaded { count });
        Ok(count)
    }

    async fn connect_once(&self, info: &SessionInfo) {
        if !self.is_current(info.epoch) || info.connect_issued.swap(true, Ordering::SeqCst) {
            return;
        }

        match self.manager.connect(info.credential.clone()).await {
            Ok(()) if !self.is_current(info.epoch) => {
                tracing::debug!(session = %info.id, "Session ended while connecting");
                // A successor session owns the channel; only close an orphan.
                if self.session.lock().is_none() {
                    self.manager.disconnect();
                }
            }
            Ok(()) => {}
            Err(NotifyError::ConnectCancelled) => {
                tracing::debug!(session = %info.id, "Connect cancelled");
            }
            Err(e) => self.report_unavailable(info, e.to_string()),
        }
    }

    /// Emit `LiveUpdatesUnavailable` once per outage
    fn report_unavailable(&self, info: &SessionInfo, message: String) {
        if info.offline_reported.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::warn!(session = %info.id, "Continuing without live updates: {}", message);
        self.emit(SessionEvent::LiveUpdatesUnavailable { message });
    }
}

/// Keep the store's connectivity flag in step with the channel and report
/// a channel that went down for good while the session is still active
async fn mirror_connectivity(
    binding: Weak<BindingInner>,
    info: SessionInfo,
    mut states: watch::Receiver<ConnectionState>,
) {
    let mut previous = ConnectionState::Disconnected;
    loop {
        let state = *states.borrow_and_update();
        let Some(inner) = binding.upgrade() else {
            return;
        };
        inner.store.set_connected(state == ConnectionState::Connected);
        inner.emit(SessionEvent::Connection(state));
        match state {
            ConnectionState::Connected => info.offline_reported.store(false, Ordering::SeqCst),
            ConnectionState::Disconnected
                if previous != ConnectionState::Disconnected && inner.is_current(info.epoch) =>
            {
                inner.report_unavailable(&info, "channel lost and reconnect attempts exhausted".to_string());
            }
            _ => {}
        }
        previous = state;
        drop(inner);

        if states.changed().await.is_err() {
            return;
        }
    }
}

/// Refresh the snapshot periodically while the channel is down
async fn fallback_refresh(binding: Weak<BindingInner>, epoch: u64, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(inner) = binding.upgrade() else {
            return;
        };
        let Some(info) = inner.current_info().filter(|info| info.epoch == epoch) else {
            return;
        };
        if inner.manager.is_connected() {
            continue;
        }
        tracing::debug!(session = %info.id, "Channel down, refreshing snapshot");
        if let Err(e) = inner.load_snapshot(&info).await {
            tracing::warn!(session = %info.id, "Fallback refresh failed: {}", e);
        }
    }
}

/// Read receipts for the bound session: over the channel when it is up,
/// otherwise through the REST collaborator.
struct SessionReceipts {
    binding: Weak<BindingInner>,
}

impl SessionReceipts {
    fn spawn_rest<F>(&self, what: &'static str, job: F)
    where
        F: FnOnce(Arc<BindingInner>, SessionInfo) -> futures_util::future::BoxFuture<'static, ()>,
    {
        let Some(inner) = self.binding.upgrade() else {
            return;
        };
        let Some(info) = inner.current_info() else {
            tracing::debug!("{} not sent: no active session", what);
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(job(inner, info));
            }
            Err(_) => tracing::warn!("{} not sent: no async runtime", what),
        }
    }
}

impl ReadReceiptSink for SessionReceipts {
    fn mark_read(&self, id: &NotificationId) {
        let Some(inner) = self.binding.upgrade() else {
            return;
        };
        if inner.manager.is_connected() {
            inner.manager.mark_read(id);
            return;
        }
        drop(inner);

        let id = id.clone();
        self.spawn_rest("read receipt", move |inner, info| {
            Box::pin(async move {
                if let Err(e) = inner.api.mark_one_read(&info.user_id, &id, &info.credential).await {
                    tracing::warn!(%id, "Read receipt failed: {}", e);
                }
            })
        });
    }

    fn mark_all_read(&self) {
        let Some(inner) = self.binding.upgrade() else {
            return;
        };
        if inner.manager.is_connected() {
            inner.manager.mark_all_read();
            return;
        }
        drop(inner);

        self.spawn_rest("bulk read receipt", |inner, info| {
            Box::pin(async move {
                match inner.api.mark_all_read(&info.user_id, &info.credential).await {
                    Ok(count) if inner.is_current(info.epoch) => inner.store.on_unread_count_update(count),
                    Ok(_) => {}
                    Err(e) => tracing::warn!("Bulk read receipt failed: {}", e),
                }
            })
        });
    }
}
