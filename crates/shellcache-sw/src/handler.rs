//! The worker-side event interface.

use async_trait::async_trait;
use shellcache_net::Response;

use crate::events::{ExtendableMessageEvent, FetchEvent, NotificationClickEvent, PushEvent};
use crate::scope::WorkerGlobalScope;
use crate::ServiceWorkerError;

/// One method per service worker event. Every method has a no-op default.
#[async_trait]
pub trait ServiceWorkerHandler: Send + Sync {
    /// Install event. An error makes the worker redundant.
    async fn on_install(&self, _scope: &WorkerGlobalScope) -> Result<(), ServiceWorkerError> {
        Ok(())
    }

    /// Activate event. Errors are logged; activation proceeds.
    async fn on_activate(&self, _scope: &WorkerGlobalScope) -> Result<(), ServiceWorkerError> {
        Ok(())
    }

    /// Fetch event. `None` lets the request go to the network untouched.
    async fn on_fetch(&self, _scope: &WorkerGlobalScope, _event: &FetchEvent) -> Option<Response> {
        None
    }

    /// Push event.
    async fn on_push(
        &self,
        _scope: &WorkerGlobalScope,
        _event: &PushEvent,
    ) -> Result<(), ServiceWorkerError> {
        Ok(())
    }

    /// Notification click.
    async fn on_notification_click(
        &self,
        _scope: &WorkerGlobalScope,
        _event: &NotificationClickEvent,
    ) -> Result<(), ServiceWorkerError> {
        Ok(())
    }

    /// Message from a client.
    async fn on_message(
        &self,
        _scope: &WorkerGlobalScope,
        _event: &ExtendableMessageEvent,
    ) -> Result<(), ServiceWorkerError> {
        Ok(())
    }
}
