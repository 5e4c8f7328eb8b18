//! Live notification channel
//!
//! One long-lived bidirectional channel per process, carrying server events
//! to the client and read receipts back to the server.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                      ConnectionManager (Clone)                        │
//! │                                                                       │
//! │  connect(credential) ──► Transport::open ──► Link { inbound, outbound }│
//! │                                │                                      │
//! │                     supervisor task (per generation)                  │
//! │                      - inbound frame ──► EventDispatcher::dispatch     │
//! │                      - link dropped  ──► backoff + reopen             │
//! │                      - retries exhausted ──► Disconnected             │
//! │                                                                       │
//! │  watch_state() ──► Disconnected | Connecting | Connected              │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `protocol` - JSON frame format and well-known event names
//! - `transport` - `Transport` seam and the WebSocket implementation
//! - `manager` - connection lifecycle and reconnection

pub mod manager;
#[doc(hidden)]
pub mod memory;
pub mod protocol;
pub mod transport;

pub use manager::{ConnectionManager, ConnectionState};
#[doc(hidden)]
pub use memory::{MemoryTransport, ServerEnd};
pub use protocol::{events, ChannelFrame, ClientCommand};
pub use transport::{Link, Transport, WsTransport};
