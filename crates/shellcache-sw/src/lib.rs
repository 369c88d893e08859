//! # shellcache Service Workers
//!
//! The service worker platform a worker runs against, without a browser
//! around it.
//!
//! ## Features
//!
//! - **Registration**: installing / waiting / active slots, `skipWaiting()`
//! - **Lifecycle**: install, activate, fetch, push, notificationclick, message
//! - **Cache API**: `caches.open()`, `cache.addAll()`, `cache.match()`
//! - **Clients API**: `matchAll()`, `openWindow()`, `focus()`, `claim()`
//! - **Notifications**: `registration.showNotification()`
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerContainer
//!     │
//!     ├── ServiceWorkerRegistration
//!     │       ├── installing (ServiceWorker)
//!     │       ├── waiting (ServiceWorker)
//!     │       └── active (ServiceWorker) ──→ ServiceWorkerHandler
//!     │                                          └── WorkerGlobalScope
//!     ├── CacheStorage (caches)
//!     │       └── Cache: Request → Response
//!     ├── ClientRegistry
//!     └── Notifications
//! ```

use thiserror::Error;

pub mod cache;
pub mod clients;
pub mod container;
pub mod events;
pub mod handler;
pub mod lifecycle;
pub mod notification;
pub mod scope;

pub use cache::{Cache, CacheEntry, CacheHandle, CacheStorage, StoredHeader};
pub use clients::{
    Client, ClientMatchOptions, ClientRegistry, ClientType, FrameType, VisibilityState,
    WorkerClients,
};
pub use container::{MessageTarget, ServiceWorkerContainer};
pub use events::{
    ExtendableMessageEvent, FetchEvent, NotificationClickEvent, PushEvent, PushMessageData,
    ServiceWorkerEvent,
};
pub use handler::ServiceWorkerHandler;
pub use lifecycle::{ServiceWorker, ServiceWorkerId, ServiceWorkerRegistration, ServiceWorkerState};
pub use notification::{Notification, NotificationId, NotificationOptions, Notifications};
pub use scope::WorkerGlobalScope;

// ==================== Errors ====================

/// Errors that can occur in service worker operations.
#[derive(Error, Debug, Clone)]
pub enum ServiceWorkerError {
    #[error("Registration failed: {0}")]
    RegistrationFailed(String),

    #[error("Install failed: {0}")]
    InstallFailed(String),

    #[error("Security error: {0}")]
    SecurityError(String),

    #[error("Type error: {0}")]
    TypeError(String),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("addAll failed for {} of {total} requests", .failed.len())]
    AddAllFailed { failed: Vec<String>, total: usize },

    #[error("Not found: {0}")]
    NotFound(String),
}
