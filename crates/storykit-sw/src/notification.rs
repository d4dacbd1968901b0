//! Push message payloads and shown notifications.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use storykit_core::PushConfig;
use tracing::debug;

/// Unique identifier for a shown notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotificationId(u64);

impl NotificationId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Inbound push message. `data` is the decrypted payload, if any.
#[derive(Debug, Clone, Default)]
pub struct PushEvent {
    pub data: Option<Vec<u8>>,
}

impl PushEvent {
    pub fn with_text(text: &str) -> Self {
        Self {
            data: Some(text.as_bytes().to_vec()),
        }
    }
}

/// Fields a push payload may carry. Everything is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushPayload {
    pub title: Option<String>,
    pub body: Option<String>,
    pub message: Option<String>,
    pub url: Option<String>,
}

impl PushPayload {
    /// Parse a payload field by field.
    ///
    /// Only non-empty strings are kept; a field of any other type is
    /// dropped without affecting its siblings. Malformed or non-object
    /// JSON yields an empty payload.
    pub fn parse(data: Option<&[u8]>) -> Self {
        let Some(data) = data else {
            return Self::default();
        };
        let value = match serde_json::from_slice::<Value>(data) {
            Ok(value) => value,
            Err(e) => {
                debug!(error = %e, "Ignoring malformed push payload");
                return Self::default();
            }
        };
        let Some(fields) = value.as_object() else {
            debug!("Ignoring non-object push payload");
            return Self::default();
        };

        let text = |key: &str| {
            fields
                .get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        Self {
            title: text("title"),
            body: text("body"),
            message: text("message"),
            url: text("url"),
        }
    }
}

/// A notification as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub id: NotificationId,
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub tag: String,
    /// Where a click should take the user.
    pub url: String,
}

impl Notification {
    /// Build a notification from a push message, falling back to defaults
    /// for every missing or empty field.
    pub fn from_push(event: &PushEvent, defaults: &PushConfig) -> Self {
        let payload = PushPayload::parse(event.data.as_deref());

        Self {
            id: NotificationId::new(),
            title: payload
                .title
                .unwrap_or_else(|| defaults.default_title.clone()),
            body: payload
                .body
                .or(payload.message)
                .unwrap_or_else(|| defaults.default_body.clone()),
            icon: defaults.icon.clone(),
            badge: defaults.badge.clone(),
            tag: defaults.tag.clone(),
            url: payload.url.unwrap_or_else(|| "/".to_string()),
        }
    }
}

/// A click on a shown notification.
#[derive(Debug, Clone, Copy)]
pub struct NotificationClickEvent {
    pub notification: NotificationId,
}

/// Notifications currently on screen.
#[derive(Debug, Default)]
pub struct NotificationCenter {
    shown: Vec<Notification>,
}

impl NotificationCenter {
    pub fn show(&mut self, notification: Notification) {
        // Same tag replaces the previous notification.
        self.shown.retain(|n| n.tag != notification.tag);
        self.shown.push(notification);
    }

    pub fn close(&mut self, id: NotificationId) -> Option<Notification> {
        let index = self.shown.iter().position(|n| n.id == id)?;
        Some(self.shown.remove(index))
    }

    pub fn shown(&self) -> &[Notification] {
        &self.shown
    }
}
