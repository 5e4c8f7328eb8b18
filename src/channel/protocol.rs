//! Channel wire format
//!
//! Every message is one JSON text frame carrying an event name and a payload.
//! The set of event names is open; unknown names are routed like any other and
//! simply find no listener.
//!
//! ```json
//! // Server -> Client
//! {"event": "new_notification", "payload": {"id": 3, "title": "...", "isRead": false}}
//! {"event": "unread_count_update", "payload": {"count": 7}}
//!
//! // Client -> Server
//! {"event": "mark_notification_as_read", "payload": "3"}
//! {"event": "mark_all_notifications_as_read", "payload": null}
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{NotifyError, Result};
use crate::schema::NotificationId;

/// Well-known event names
pub mod events {
    pub const NEW_NOTIFICATION: &str = "new_notification";
    pub const UNREAD_COUNT_UPDATE: &str = "unread_count_update";
    pub const MARK_NOTIFICATION_AS_READ: &str = "mark_notification_as_read";
    pub const MARK_ALL_NOTIFICATIONS_AS_READ: &str = "mark_all_notifications_as_read";
}

/// One frame on the channel, in either direction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelFrame {
    pub event: String,
    #[serde(default)]
    pub payload: Value,
}

impl ChannelFrame {
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }

    /// Parse a text frame received from the server
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode the payload into the type expected for this event
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        decode_payload(&self.event, &self.payload)
    }
}

/// Decode an event payload, reporting failures as [`NotifyError::MalformedPayload`]
pub fn decode_payload<T: DeserializeOwned>(event: &str, payload: &Value) -> Result<T> {
    T::deserialize(payload).map_err(|e| NotifyError::MalformedPayload {
        event: event.to_string(),
        message: e.to_string(),
    })
}

/// Commands the client sends over the channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    MarkNotificationAsRead(NotificationId),
    MarkAllNotificationsAsRead,
}

impl ClientCommand {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::MarkNotificationAsRead(_) => events::MARK_NOTIFICATION_AS_READ,
            Self::MarkAllNotificationsAsRead => events::MARK_ALL_NOTIFICATIONS_AS_READ,
        }
    }

    pub fn into_frame(self) -> ChannelFrame {
        let payload = match &self {
            Self::MarkNotificationAsRead(id) => Value::String(id.to_string()),
            Self::MarkAllNotificationsAsRead => Value::Null,
        };
        ChannelFrame::new(self.event_name(), payload)
    }
}
