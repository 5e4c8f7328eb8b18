//! biblio-notify: real-time notification delivery for the library client
//!
//! Keeps a client-side notification list consistent across two sources: a
//! REST snapshot fetched at login and live events pushed over a persistent
//! channel. The pieces, leaves first:
//!
//! - [`channel::ConnectionManager`] - one live channel per process, bounded
//!   exponential reconnect, explicit teardown
//! - [`dispatch::EventDispatcher`] - per-event-kind listener registry with
//!   per-listener failure isolation
//! - [`store::NotificationStore`] - snapshot/live merge, dedup by id,
//!   read-state transitions, unread counter
//! - [`session::SessionBinding`] - starts and stops all of the above with the
//!   authenticated session
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use biblio_notify::{
//!     AuthState, ConnectionManager, Credential, EventDispatcher, NotifyConfig,
//!     RestNotificationApi, SessionBinding, WsTransport,
//! };
//!
//! let config = NotifyConfig::load()?;
//! let manager = ConnectionManager::new(
//!     Arc::new(WsTransport::new(&config.server.channel_url)),
//!     EventDispatcher::new(),
//!     config.reconnect.policy(),
//! );
//! let api = Arc::new(RestNotificationApi::new(&config.server.api_url));
//! let binding = SessionBinding::new(manager, api, &config.session);
//!
//! binding
//!     .on_auth_change(AuthState::Authenticated {
//!         user_id: "42".into(),
//!         credential: Credential::bearer(token),
//!     })
//!     .await;
//! println!("{} unread", binding.store().unread_count());
//! ```

pub mod api;
pub mod channel;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod schema;
pub mod session;
pub mod store;

// Re-export commonly used types
pub use api::{NotificationApi, RestNotificationApi};
pub use channel::{events, ChannelFrame, ClientCommand, ConnectionManager, ConnectionState, Link, Transport, WsTransport};
// In-process channel used by the integration tests
#[doc(hidden)]
pub use channel::{MemoryTransport, ServerEnd};
pub use cli::{Cli, OutputFormat};
pub use config::{NotifyConfig, ReconnectPolicy};
pub use dispatch::{DispatchReport, EventDispatcher, Subscription};
pub use error::{NotifyError, Result};
pub use schema::{Credential, Notification, NotificationId, Priority, UnreadCount};
pub use session::{AuthState, SessionBinding, SessionEvent};
pub use store::{NotificationState, NotificationStore, ReadReceiptSink};
