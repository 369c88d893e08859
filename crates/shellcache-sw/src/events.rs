//! Events delivered to workers, and events the container reports outward.

use bytes::Bytes;
use serde_json::Value as JsonValue;
use shellcache_net::Request;

use crate::lifecycle::{ServiceWorkerId, ServiceWorkerState};
use crate::notification::{Notification, NotificationId};

/// A fetch event.
#[derive(Debug, Clone)]
pub struct FetchEvent {
    /// The intercepted request.
    pub request: Request,

    /// Client that issued the request, if any.
    pub client_id: Option<String>,
}

/// Payload of a push message.
#[derive(Debug, Clone)]
pub struct PushMessageData(Bytes);

impl PushMessageData {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self(data.into())
    }

    /// Payload as UTF-8 text, lossy.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }

    /// Payload parsed as JSON.
    pub fn json(&self) -> Result<JsonValue, serde_json::Error> {
        serde_json::from_slice(&self.0)
    }

    pub fn bytes(&self) -> &Bytes {
        &self.0
    }
}

/// A push event.
#[derive(Debug, Clone, Default)]
pub struct PushEvent {
    pub data: Option<PushMessageData>,
}

/// A notification click.
#[derive(Debug, Clone)]
pub struct NotificationClickEvent {
    pub notification: Notification,
    /// Action button that was clicked, if any.
    pub action: Option<String>,
}

/// A message posted to a worker.
#[derive(Debug, Clone)]
pub struct ExtendableMessageEvent {
    pub data: JsonValue,
    /// Sending client ID.
    pub source: Option<String>,
}

impl ExtendableMessageEvent {
    /// The `type` field of an object message.
    pub fn message_type(&self) -> Option<&str> {
        self.data.get("type").and_then(JsonValue::as_str)
    }
}

/// Service worker events, reported to the embedder.
#[derive(Debug, Clone)]
pub enum ServiceWorkerEvent {
    /// State changed.
    StateChange {
        registration_scope: String,
        worker_id: ServiceWorkerId,
        new_state: ServiceWorkerState,
    },
    /// Update found.
    UpdateFound { registration_scope: String },
    /// Controller changed.
    ControllerChange {
        client_id: String,
        worker_id: ServiceWorkerId,
    },
    /// A notification should be displayed.
    NotificationShown { notification: Notification },
    /// A notification should be dismissed.
    NotificationClosed { id: NotificationId },
    /// A window should be brought to the front.
    ClientFocused { client_id: String },
    /// A new window should be opened.
    WindowOpened { client_id: String, url: String },
}
