//! In-process transport
//!
//! Each `open` creates a [`Link`] whose far end is kept as a [`ServerEnd`],
//! letting a test play the server. Not part of the documented API.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::channel::protocol::ChannelFrame;
use crate::channel::transport::{Link, Transport};
use crate::error::{NotifyError, Result};
use crate::schema::Credential;

/// Server side of an in-memory link
pub struct ServerEnd {
    to_client: mpsc::UnboundedSender<ChannelFrame>,
    from_client: mpsc::UnboundedReceiver<ChannelFrame>,
}

impl ServerEnd {
    /// Push an event to the client. False once the client side is gone.
    pub fn push(&self, event: &str, payload: Value) -> bool {
        self.to_client.send(ChannelFrame::new(event, payload)).is_ok()
    }

    /// Next frame sent by the client
    pub async fn recv(&mut self) -> Option<ChannelFrame> {
        self.from_client.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ChannelFrame> {
        self.from_client.try_recv().ok()
    }

    pub fn is_client_connected(&self) -> bool {
        !self.to_client.is_closed()
    }
}

impl Link {
    /// A connected link and its server end
    pub fn in_memory() -> (Link, ServerEnd) {
        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();
        (
            Link { inbound, outbound },
            ServerEnd {
                to_client,
                from_client,
            },
        )
    }
}

#[derive(Default)]
struct MemoryInner {
    peers: Mutex<Vec<ServerEnd>>,
    credentials: Mutex<Vec<Credential>>,
    pending_failures: AtomicU32,
    opens: AtomicU32,
}

/// Transport that hands out in-memory links
#[derive(Clone, Default)]
pub struct MemoryTransport {
    inner: Arc<MemoryInner>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` open attempts fail
    pub fn fail_next(&self, n: u32) {
        self.inner.pending_failures.store(n, Ordering::SeqCst);
    }

    /// Number of open attempts, failed ones included
    pub fn open_count(&self) -> u32 {
        self.inner.opens.load(Ordering::SeqCst)
    }

    /// Server end of the most recently opened link
    pub fn take_server_end(&self) -> Option<ServerEnd> {
        self.inner.peers.lock().pop()
    }

    /// Credentials presented on each successful open
    pub fn credentials(&self) -> Vec<Credential> {
        self.inner.credentials.lock().clone()
    }
}

impl Transport for MemoryTransport {
    fn open<'a>(&'a self, credential: &'a Credential) -> BoxFuture<'a, Result<Link>> {
        Box::pin(async move {
            self.inner.opens.fetch_add(1, Ordering::SeqCst);
            let failing = self
                .inner
                .pending_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(NotifyError::Transport {
                    message: "connection refused".to_string(),
                });
            }

            let (link, server) = Link::in_memory();
            self.inner.peers.lock().push(server);
            self.inner.credentials.lock().push(credential.clone());
            Ok(link)
        })
    }
}
