//! Notifications shown through the registration.
//!
//! Delivery to the OS is the embedder's job: showing and closing only update
//! the registry and emit a [`ServiceWorkerEvent`].

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use crate::events::ServiceWorkerEvent;

/// Unique identifier for a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotificationId(u64);

impl NotificationId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Options for `showNotification()`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationOptions {
    pub body: Option<String>,
    pub icon: Option<String>,
    pub badge: Option<String>,
    pub tag: Option<String>,
    /// Vibration pattern in milliseconds (on, off, on, ...).
    pub vibrate: Vec<u32>,
    /// Arbitrary data handed back on click.
    pub data: JsonValue,
}

/// A shown notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub title: String,
    pub options: NotificationOptions,
}

impl Notification {
    /// String field of `data`, e.g. `data.url`.
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.options.data.get(key).and_then(JsonValue::as_str)
    }
}

/// Registry of open notifications.
#[derive(Debug, Clone)]
pub struct Notifications {
    shown: Arc<RwLock<HashMap<NotificationId, Notification>>>,
    event_tx: mpsc::UnboundedSender<ServiceWorkerEvent>,
}

impl Notifications {
    pub(crate) fn new(event_tx: mpsc::UnboundedSender<ServiceWorkerEvent>) -> Self {
        Self {
            shown: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
        }
    }

    /// Show a notification.
    pub async fn show(&self, title: &str, options: NotificationOptions) -> Notification {
        let notification = Notification {
            id: NotificationId::new(),
            title: title.to_string(),
            options,
        };
        self.shown
            .write()
            .await
            .insert(notification.id, notification.clone());

        debug!(id = ?notification.id, title, "Notification shown");
        let _ = self.event_tx.send(ServiceWorkerEvent::NotificationShown {
            notification: notification.clone(),
        });
        notification
    }

    /// Close a notification. Returns false if it was not open.
    pub async fn close(&self, id: NotificationId) -> bool {
        let closed = self.shown.write().await.remove(&id).is_some();
        if closed {
            debug!(id = ?id, "Notification closed");
            let _ = self
                .event_tx
                .send(ServiceWorkerEvent::NotificationClosed { id });
        }
        closed
    }

    /// Get an open notification.
    pub async fn get(&self, id: NotificationId) -> Option<Notification> {
        self.shown.read().await.get(&id).cloned()
    }

    /// All open notifications.
    pub async fn list(&self) -> Vec<Notification> {
        self.shown.read().await.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_show_and_close() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let notifications = Notifications::new(tx);

        let shown = notifications
            .show(
                "Title",
                NotificationOptions {
                    body: Some("hello".to_string()),
                    vibrate: vec![200, 100, 200],
                    data: json!({ "url": "/index.html" }),
                    ..Default::default()
                },
            )
            .await;

        assert_eq!(shown.data_str("url"), Some("/index.html"));
        assert_eq!(notifications.list().await.len(), 1);
        assert!(matches!(
            rx.try_recv(),
            Ok(ServiceWorkerEvent::NotificationShown { .. })
        ));

        assert!(notifications.close(shown.id).await);
        assert!(!notifications.close(shown.id).await);
        assert!(notifications.get(shown.id).await.is_none());
        assert!(matches!(
            rx.try_recv(),
            Ok(ServiceWorkerEvent::NotificationClosed { .. })
        ));
    }

    #[test]
    fn test_data_str_missing() {
        let notification = Notification {
            id: NotificationId::new(),
            title: "t".to_string(),
            options: NotificationOptions::default(),
        };
        assert_eq!(notification.data_str("url"), None);
    }
}
