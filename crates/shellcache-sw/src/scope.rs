//! The worker's global scope, passed to every handler.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use shellcache_net::{NetError, Network, Request, Response};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, warn};
use url::Url;

use crate::cache::CacheStorage;
use crate::clients::WorkerClients;
use crate::lifecycle::ServiceWorkerId;
use crate::notification::{Notification, NotificationOptions, Notifications};
use crate::ServiceWorkerError;

/// Background work started by handlers, awaited by
/// [`ServiceWorkerContainer::settle`](crate::ServiceWorkerContainer::settle).
pub(crate) type TaskSet = Arc<Mutex<JoinSet<()>>>;

/// What a worker can reach: caches, clients, notifications, the network and
/// its own lifecycle.
pub struct WorkerGlobalScope {
    worker_id: ServiceWorkerId,
    scope_url: Url,
    caches: CacheStorage,
    clients: WorkerClients,
    notifications: Notifications,
    network: Arc<dyn Network>,
    skip_waiting: AtomicBool,
    tasks: TaskSet,
}

impl WorkerGlobalScope {
    pub(crate) fn new(
        worker_id: ServiceWorkerId,
        scope_url: Url,
        caches: CacheStorage,
        clients: WorkerClients,
        notifications: Notifications,
        network: Arc<dyn Network>,
        tasks: TaskSet,
    ) -> Self {
        Self {
            worker_id,
            scope_url,
            caches,
            clients,
            notifications,
            network,
            skip_waiting: AtomicBool::new(false),
            tasks,
        }
    }

    pub fn worker_id(&self) -> ServiceWorkerId {
        self.worker_id
    }

    pub fn scope_url(&self) -> &Url {
        &self.scope_url
    }

    /// Resolve a path or URL against the scope.
    pub fn resolve(&self, url: &str) -> Result<Url, ServiceWorkerError> {
        self.scope_url
            .join(url)
            .map_err(|e| ServiceWorkerError::TypeError(format!("{url}: {e}")))
    }

    pub fn caches(&self) -> &CacheStorage {
        &self.caches
    }

    pub fn clients(&self) -> &WorkerClients {
        &self.clients
    }

    pub fn notifications(&self) -> &Notifications {
        &self.notifications
    }

    pub fn network(&self) -> &dyn Network {
        self.network.as_ref()
    }

    /// `registration.showNotification()`.
    pub async fn show_notification(&self, title: &str, options: NotificationOptions) -> Notification {
        self.notifications.show(title, options).await
    }

    /// `fetch()`.
    pub async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        self.network.fetch(request).await
    }

    /// Ask to be activated without waiting for the current worker's clients.
    pub fn skip_waiting(&self) {
        debug!(worker = self.worker_id.raw(), "skipWaiting called");
        self.skip_waiting.store(true, Ordering::SeqCst);
    }

    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting.load(Ordering::SeqCst)
    }

    /// Keep `work` running after the handler returns.
    ///
    /// Finished work is reaped here, so the set only holds tasks still running.
    pub async fn wait_until<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock().await;
        while let Some(result) = tasks.try_join_next() {
            if let Err(e) = result {
                warn!(worker = self.worker_id.raw(), error = %e, "Background task failed");
            }
        }
        tasks.spawn(work);
    }
}
