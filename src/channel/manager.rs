//! Connection manager
//!
//! Owns the single live channel of the process. `connect` is idempotent while
//! a channel is connecting or connected; a dropped channel is re-established
//! with bounded exponential backoff using the credential given to `connect`.
//! When retries run out the manager settles in `Disconnected` and stays there
//! until the next explicit `connect`.
//!
//! # Generations
//!
//! Each `connect` opens a new generation; `disconnect` ends it. Frames read
//! by a link of a past generation are never dispatched: the supervisor holds
//! the generation read lock for the duration of a dispatch and `disconnect`
//! takes the write lock. Listeners must therefore not call `connect` or
//! `disconnect` synchronously from inside a dispatch.

use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::channel::protocol::{ChannelFrame, ClientCommand};
use crate::channel::transport::{Link, Transport};
use crate::config::ReconnectPolicy;
use crate::dispatch::EventDispatcher;
use crate::error::{NotifyError, Result};
use crate::schema::{Credential, NotificationId};
use crate::store::ReadReceiptSink;

/// Channel lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        };
        f.write_str(s)
    }
}

#[derive(Default)]
struct LinkSlot {
    outbound: Option<mpsc::UnboundedSender<ChannelFrame>>,
    supervisor: Option<JoinHandle<()>>,
}

struct Shared {
    transport: Arc<dyn Transport>,
    dispatcher: EventDispatcher,
    policy: ReconnectPolicy,
    state: watch::Sender<ConnectionState>,
    /// LOCKING ORDER: acquire before `link`.
    generation: RwLock<u64>,
    link: Mutex<LinkSlot>,
}

/// Handle to the process-wide channel; clones share the same channel
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn Transport>, dispatcher: EventDispatcher, policy: ReconnectPolicy) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                transport,
                dispatcher,
                policy,
                state,
                generation: RwLock::new(0),
                link: Mutex::new(LinkSlot::default()),
            }),
        }
    }

    /// Dispatcher that receives every inbound frame
    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.shared.dispatcher
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Lifecycle signal: observes every state transition
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Open the channel with `credential`.
    ///
    /// Returns immediately if a channel is already connecting or connected.
    /// Fails once the retry policy is exhausted, or with
    /// [`NotifyError::ConnectCancelled`] if `disconnect` ran meanwhile; callers
    /// should carry on without live updates in both cases.
    pub async fn connect(&self, credential: Credential) -> Result<()> {
        let generation = {
            let mut generation = self.shared.generation.write();
            let mut claimed = false;
            self.shared.state.send_if_modified(|state| {
                if *state == ConnectionState::Disconnected {
                    *state = ConnectionState::Connecting;
                    claimed = true;
                }
                claimed
            });
            if !claimed {
                tracing::debug!("connect ignored: channel already {}", self.state());
                return Ok(());
            }
            *generation += 1;
            *generation
        };
        tracing::info!(generation, "Opening notification channel");

        // Settles the claim on every exit but success, including the future being dropped.
        let mut attempt = PendingConnect {
            shared: &self.shared,
            generation,
            armed: true,
        };
        let Link { inbound, outbound } = self.shared.establish(&credential, generation, false).await?;

        {
            let current = self.shared.generation.read();
            if *current != generation {
                return Err(NotifyError::ConnectCancelled);
            }
            let mut slot = self.shared.link.lock();
            slot.outbound = Some(outbound);
            let shared = Arc::clone(&self.shared);
            slot.supervisor = Some(tokio::spawn(shared.supervise(inbound, generation, credential)));
            self.shared.set_state(ConnectionState::Connected);
        }
        attempt.armed = false;
        tracing::info!(generation, "Notification channel connected");
        Ok(())
    }

    /// Tear the channel down, release every listener and reset to `Disconnected`.
    ///
    /// No-op when already disconnected.
    pub fn disconnect(&self) {
        let mut generation = self.shared.generation.write();
        *generation += 1;
        {
            let mut slot = self.shared.link.lock();
            slot.outbound = None;
            if let Some(task) = slot.supervisor.take() {
                task.abort();
            }
        }
        self.shared.dispatcher.clear();
        let previous = self.shared.state.send_replace(ConnectionState::Disconnected);
        drop(generation);

        if previous != ConnectionState::Disconnected {
            tracing::info!("Notification channel closed (was {})", previous);
        }
    }

    /// Send a command over the live channel
    pub fn send(&self, command: ClientCommand) -> Result<()> {
        if !self.is_connected() {
            return Err(NotifyError::NotConnected);
        }
        let slot = self.shared.link.lock();
        let tx = slot.outbound.as_ref().ok_or(NotifyError::NotConnected)?;
        tx.send(command.into_frame()).map_err(|_| NotifyError::NotConnected)
    }
}

impl ReadReceiptSink for ConnectionManager {
    fn mark_read(&self, id: &NotificationId) {
        if let Err(e) = self.send(ClientCommand::MarkNotificationAsRead(id.clone())) {
            tracing::warn!(%id, "read receipt dropped: {}", e);
        }
    }

    fn mark_all_read(&self) {
        if let Err(e) = self.send(ClientCommand::MarkAllNotificationsAsRead) {
            tracing::warn!("bulk read receipt dropped: {}", e);
        }
    }
}

/// Claim on the `Connecting` slot held by an in-flight `connect`
struct PendingConnect<'a> {
    shared: &'a Shared,
    generation: u64,
    armed: bool,
}

impl Drop for PendingConnect<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.shared.settle_disconnected(self.generation);
        }
    }
}

impl Shared {
    fn is_current(&self, generation: u64) -> bool {
        *self.generation.read() == generation
    }

    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            tracing::debug!("channel state {} -> {}", state, next);
            *state = next;
            true
        });
    }

    fn settle_disconnected(&self, generation: u64) {
        let current = self.generation.read();
        if *current != generation {
            return;
        }
        self.link.lock().outbound = None;
        self.set_state(ConnectionState::Disconnected);
    }

    /// Open a link, retrying with backoff until the policy is exhausted
    async fn establish(&self, credential: &Credential, generation: u64, reconnecting: bool) -> Result<Link> {
        let attempts = self.policy.max_attempts;
        for attempt in 1..=attempts {
            let retry = if reconnecting { attempt } else { attempt - 1 };
            if retry > 0 {
                let delay = self.policy.delay_for(retry);
                tracing::debug!("Retrying channel in {:?} (attempt {}/{})", delay, attempt, attempts);
                tokio::time::sleep(delay).await;
            }
            if !self.is_current(generation) {
                return Err(NotifyError::ConnectCancelled);
            }

            match self.transport.open(credential).await {
                Ok(link) => return Ok(link),
                Err(e) => tracing::warn!(attempt, "Channel attempt failed: {}", e),
            }
        }
        Err(NotifyError::ReconnectExhausted { attempts })
    }

    /// Dispatch one frame if its generation is still current
    fn deliver(&self, generation: u64, frame: &ChannelFrame) -> bool {
        let current = self.generation.read();
        if *current != generation {
            return false;
        }
        self.dispatcher.dispatch(&frame.event, &frame.payload);
        true
    }

    /// Forward inbound frames; re-establish the link when it drops
    async fn supervise(
        self: Arc<Self>,
        mut inbound: mpsc::UnboundedReceiver<ChannelFrame>,
        generation: u64,
        credential: Credential,
    ) {
        loop {
            while let Some(frame) = inbound.recv().await {
                if !self.deliver(generation, &frame) {
                    return;
                }
            }

            {
                let current = self.generation.read();
                if *current != generation {
                    return;
                }
                self.link.lock().outbound = None;
                self.set_state(ConnectionState::Connecting);
            }
            tracing::warn!("Notification channel dropped, reconnecting");

            match self.establish(&credential, generation, true).await {
                Ok(Link { inbound: next, outbound }) => {
                    let current = self.generation.read();
                    if *current != generation {
                        return;
                    }
                    self.link.lock().outbound = Some(outbound);
                    self.set_state(ConnectionState::Connected);
                    tracing::info!("Notification channel re-established");
                    inbound = next;
                }
                Err(NotifyError::ConnectCancelled) => return,
                Err(e) => {
                    tracing::error!("Giving up on notification channel: {}", e);
                    self.settle_disconnected(generation);
                    return;
                }
            }
        }
    }
}
