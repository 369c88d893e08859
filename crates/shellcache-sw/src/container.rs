//! Service worker container: owns the registration and routes events to
//! worker handlers.

use bytes::Bytes;
use hashbrown::{HashMap, HashSet};
use serde_json::Value as JsonValue;
use shellcache_net::{same_origin, NetError, Network, Request, Response};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::CacheStorage;
use crate::clients::ClientRegistry;
use crate::events::{
    ExtendableMessageEvent, FetchEvent, NotificationClickEvent, PushEvent, PushMessageData,
    ServiceWorkerEvent,
};
use crate::handler::ServiceWorkerHandler;
use crate::lifecycle::{ServiceWorker, ServiceWorkerId, ServiceWorkerRegistration, ServiceWorkerState};
use crate::notification::{NotificationId, Notifications};
use crate::scope::{TaskSet, WorkerGlobalScope};
use crate::ServiceWorkerError;

/// Which registration slot a message is posted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageTarget {
    Installing,
    Waiting,
    Active,
}

#[derive(Clone)]
struct WorkerInstance {
    handler: Arc<dyn ServiceWorkerHandler>,
    scope: Arc<WorkerGlobalScope>,
}

/// Service worker container (`navigator.serviceWorker`) for a single scope.
pub struct ServiceWorkerContainer {
    scope: Url,

    registration: Arc<RwLock<ServiceWorkerRegistration>>,

    /// Handlers of live (non-redundant) workers.
    instances: Arc<RwLock<HashMap<ServiceWorkerId, WorkerInstance>>>,

    /// Workers that became redundant.
    retired: Arc<RwLock<HashSet<ServiceWorkerId>>>,

    caches: CacheStorage,

    clients: ClientRegistry,

    notifications: Notifications,

    network: Arc<dyn Network>,

    tasks: TaskSet,

    /// Event sender for state changes.
    event_tx: mpsc::UnboundedSender<ServiceWorkerEvent>,
}

impl ServiceWorkerContainer {
    /// Create a new container with empty cache storage.
    pub fn new(
        scope: Url,
        network: Arc<dyn Network>,
    ) -> (Self, mpsc::UnboundedReceiver<ServiceWorkerEvent>) {
        Self::with_caches(scope, network, CacheStorage::new())
    }

    /// Create a new container over existing cache storage.
    pub fn with_caches(
        scope: Url,
        network: Arc<dyn Network>,
        caches: CacheStorage,
    ) -> (Self, mpsc::UnboundedReceiver<ServiceWorkerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        (
            Self {
                registration: Arc::new(RwLock::new(ServiceWorkerRegistration::new(scope.clone()))),
                instances: Arc::new(RwLock::new(HashMap::new())),
                retired: Arc::new(RwLock::new(HashSet::new())),
                caches,
                clients: ClientRegistry::new(event_tx.clone()),
                notifications: Notifications::new(event_tx.clone()),
                network,
                tasks: Arc::new(Mutex::new(JoinSet::new())),
                scope,
                event_tx,
            },
            event_rx,
        )
    }

    pub fn scope(&self) -> &Url {
        &self.scope
    }

    pub fn caches(&self) -> &CacheStorage {
        &self.caches
    }

    pub fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    pub fn notifications(&self) -> &Notifications {
        &self.notifications
    }

    // ==================== Lifecycle ====================

    /// Register and install a worker version.
    ///
    /// The worker activates right away when nothing is active yet or when it
    /// called `skip_waiting` during install; otherwise it stays waiting.
    pub async fn register(
        &self,
        script_url: &str,
        handler: Arc<dyn ServiceWorkerHandler>,
    ) -> Result<ServiceWorkerId, ServiceWorkerError> {
        let script_url = self
            .scope
            .join(script_url)
            .map_err(|e| ServiceWorkerError::RegistrationFailed(e.to_string()))?;
        if !same_origin(&script_url, &self.scope) {
            return Err(ServiceWorkerError::SecurityError(format!(
                "Script {script_url} is not same-origin with scope {}",
                self.scope
            )));
        }

        let worker = ServiceWorker::new(script_url.clone());
        let id = worker.id;
        let scope = Arc::new(WorkerGlobalScope::new(
            id,
            self.scope.clone(),
            self.caches.clone(),
            self.clients.for_worker(id, self.scope.clone()),
            self.notifications.clone(),
            Arc::clone(&self.network),
            Arc::clone(&self.tasks),
        ));
        self.instances.write().await.insert(
            id,
            WorkerInstance {
                handler: Arc::clone(&handler),
                scope: Arc::clone(&scope),
            },
        );

        let displaced = self.registration.write().await.begin_install(worker);
        self.release(displaced).await;

        info!(worker = id.raw(), script = %script_url, "Installing service worker");
        self.emit(ServiceWorkerEvent::UpdateFound {
            registration_scope: self.scope.to_string(),
        });
        self.emit_state(id, ServiceWorkerState::Installing);

        if let Err(e) = handler.on_install(&scope).await {
            warn!(worker = id.raw(), error = %e, "Install failed");
            let failed = self.registration.write().await.fail_install();
            self.release(failed).await;
            return Err(ServiceWorkerError::InstallFailed(e.to_string()));
        }

        let (displaced, has_active) = {
            let mut registration = self.registration.write().await;
            let displaced = registration.install_complete();
            (displaced, registration.active.is_some())
        };
        self.release(displaced).await;
        self.emit_state(id, ServiceWorkerState::Installed);

        if scope.skip_waiting_requested() || !has_active {
            self.activate_waiting().await?;
        } else {
            info!(worker = id.raw(), "Installed, waiting for activation");
        }

        Ok(id)
    }

    /// Activate the waiting worker, if any.
    pub async fn activate_waiting(&self) -> Result<(), ServiceWorkerError> {
        let Some((id, displaced)) = self.registration.write().await.begin_activate() else {
            debug!("No waiting worker to activate");
            return Ok(());
        };
        self.release(displaced).await;
        self.emit_state(id, ServiceWorkerState::Activating);

        let instance = self.instance(id).await?;
        if let Err(e) = instance.handler.on_activate(&instance.scope).await {
            warn!(worker = id.raw(), error = %e, "Activate handler failed");
        }

        if self.registration.write().await.finish_activate(id) {
            self.clients.transfer_control(id).await;
            info!(worker = id.raw(), "Service worker activated");
            self.emit_state(id, ServiceWorkerState::Activated);
        }
        Ok(())
    }

    /// Unregister every worker version.
    pub async fn unregister(&self) -> bool {
        let retired = self.registration.write().await.unregister();
        let any = !retired.is_empty();
        for worker in retired {
            self.release(Some(worker)).await;
        }
        self.clients.release_all().await;
        any
    }

    /// State of a worker this container has seen.
    pub async fn state_of(&self, id: ServiceWorkerId) -> Option<ServiceWorkerState> {
        if let Some(worker) = self.registration.read().await.find(id) {
            return Some(worker.state);
        }
        self.retired
            .read()
            .await
            .contains(&id)
            .then_some(ServiceWorkerState::Redundant)
    }

    pub async fn active(&self) -> Option<ServiceWorker> {
        self.registration.read().await.active.clone()
    }

    pub async fn waiting(&self) -> Option<ServiceWorker> {
        self.registration.read().await.waiting.clone()
    }

    pub async fn installing(&self) -> Option<ServiceWorker> {
        self.registration.read().await.installing.clone()
    }

    // ==================== Events ====================

    /// Handle a request issued by `client_id` (or by no client, e.g. a
    /// navigation).
    ///
    /// The active worker sees requests from controlled clients and client-less
    /// requests inside the scope. Everything else, and every request the
    /// worker declines, goes straight to the network.
    pub async fn handle_fetch(
        &self,
        request: Request,
        client_id: Option<&str>,
    ) -> Result<Response, NetError> {
        let intercept = match client_id {
            Some(id) => self
                .clients
                .get(id)
                .await
                .is_some_and(|c| c.is_controlled()),
            None => request.url.as_str().starts_with(self.scope.as_str()),
        };

        let active = match self.active().await {
            Some(worker) if intercept && worker.is_active() => self.instance(worker.id).await.ok(),
            _ => None,
        };

        let Some(instance) = active else {
            debug!(url = %request.url, "Not intercepted");
            return self.network.fetch(&request).await;
        };

        let event = FetchEvent {
            request,
            client_id: client_id.map(str::to_string),
        };
        match instance.handler.on_fetch(&instance.scope, &event).await {
            Some(response) => Ok(response),
            None => self.network.fetch(&event.request).await,
        }
    }

    /// Convenience for a top-level navigation from no client.
    pub async fn navigate(&self, url: &str) -> Result<Response, NetError> {
        let url = self
            .scope
            .join(url)
            .map_err(|e| NetError::InvalidUrl(e.to_string()))?;
        self.handle_fetch(Request::navigate(url), None).await
    }

    /// Post a message to the worker in `target`.
    ///
    /// A waiting worker that calls `skip_waiting` while handling the message
    /// is activated before this returns.
    pub async fn post_message(
        &self,
        target: MessageTarget,
        data: JsonValue,
        source: Option<&str>,
    ) -> Result<(), ServiceWorkerError> {
        let worker = {
            let registration = self.registration.read().await;
            match target {
                MessageTarget::Installing => registration.installing.clone(),
                MessageTarget::Waiting => registration.waiting.clone(),
                MessageTarget::Active => registration.active.clone(),
            }
        }
        .ok_or_else(|| ServiceWorkerError::NotFound(format!("{target:?} worker")))?;
        worker.ensure_receiving()?;

        let instance = self.instance(worker.id).await?;
        let event = ExtendableMessageEvent {
            data,
            source: source.map(str::to_string),
        };
        instance.handler.on_message(&instance.scope, &event).await?;

        if target == MessageTarget::Waiting && instance.scope.skip_waiting_requested() {
            self.activate_waiting().await?;
        }
        Ok(())
    }

    /// Deliver a push message to the active worker.
    pub async fn dispatch_push(&self, data: Option<Bytes>) -> Result<(), ServiceWorkerError> {
        let instance = self.active_instance().await?;
        let event = PushEvent {
            data: data.map(PushMessageData::new),
        };
        instance.handler.on_push(&instance.scope, &event).await
    }

    /// Deliver a click on an open notification to the active worker.
    pub async fn dispatch_notification_click(
        &self,
        id: NotificationId,
        action: Option<&str>,
    ) -> Result<(), ServiceWorkerError> {
        let notification = self
            .notifications
            .get(id)
            .await
            .ok_or_else(|| ServiceWorkerError::NotFound(format!("notification {id:?}")))?;
        let instance = self.active_instance().await?;
        let event = NotificationClickEvent {
            notification,
            action: action.map(str::to_string),
        };
        instance
            .handler
            .on_notification_click(&instance.scope, &event)
            .await
    }

    /// Wait for all background work started through `wait_until`.
    pub async fn settle(&self) {
        loop {
            let mut pending = std::mem::take(&mut *self.tasks.lock().await);
            if pending.is_empty() {
                return;
            }
            while let Some(result) = pending.join_next().await {
                if let Err(e) = result {
                    warn!(error = %e, "Background task failed");
                }
            }
        }
    }

    // ==================== Helpers ====================

    async fn instance(&self, id: ServiceWorkerId) -> Result<WorkerInstance, ServiceWorkerError> {
        self.instances
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| ServiceWorkerError::NotFound(format!("worker {}", id.raw())))
    }

    async fn active_instance(&self) -> Result<WorkerInstance, ServiceWorkerError> {
        let worker = self
            .active()
            .await
            .ok_or_else(|| ServiceWorkerError::StateError("No active worker".to_string()))?;
        self.instance(worker.id).await
    }

    /// Forget a redundant worker.
    async fn release(&self, worker: Option<ServiceWorker>) {
        if let Some(worker) = worker {
            self.instances.write().await.remove(&worker.id);
            self.retired.write().await.insert(worker.id);
            debug!(worker = worker.id.raw(), "Worker is redundant");
            self.emit_state(worker.id, ServiceWorkerState::Redundant);
        }
    }

    fn emit_state(&self, worker_id: ServiceWorkerId, new_state: ServiceWorkerState) {
        self.emit(ServiceWorkerEvent::StateChange {
            registration_scope: self.scope.to_string(),
            worker_id,
            new_state,
        });
    }

    fn emit(&self, event: ServiceWorkerEvent) {
        let _ = self.event_tx.send(event);
    }
}

impl Drop for ServiceWorkerContainer {
    /// Background work outlives the container instead of being aborted.
    fn drop(&mut self) {
        if let Ok(mut tasks) = self.tasks.try_lock() {
            tasks.detach_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::Client;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingNetwork {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Network for CountingNetwork {
        async fn fetch(&self, _request: &Request) -> Result<Response, NetError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Response::new(200, "network"))
        }
    }

    /// Answers every fetch with "worker" and skips waiting on any message.
    struct EchoWorker;

    #[async_trait]
    impl ServiceWorkerHandler for EchoWorker {
        async fn on_fetch(&self, _scope: &WorkerGlobalScope, _event: &FetchEvent) -> Option<Response> {
            Some(Response::new(200, "worker"))
        }

        async fn on_message(
            &self,
            scope: &WorkerGlobalScope,
            _event: &ExtendableMessageEvent,
        ) -> Result<(), ServiceWorkerError> {
            scope.skip_waiting();
            Ok(())
        }
    }

    /// Answers every fetch itself and records it in the background.
    struct BackgroundWorker {
        recorded: Arc<AtomicUsize>,
        delay: std::time::Duration,
    }

    #[async_trait]
    impl ServiceWorkerHandler for BackgroundWorker {
        async fn on_fetch(&self, scope: &WorkerGlobalScope, _event: &FetchEvent) -> Option<Response> {
            let recorded = Arc::clone(&self.recorded);
            let delay = self.delay;
            scope
                .wait_until(async move {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    recorded.fetch_add(1, Ordering::SeqCst);
                })
                .await;
            Some(Response::new(200, "worker"))
        }
    }

    struct BrokenInstall;

    #[async_trait]
    impl ServiceWorkerHandler for BrokenInstall {
        async fn on_install(&self, _scope: &WorkerGlobalScope) -> Result<(), ServiceWorkerError> {
            Err(ServiceWorkerError::CacheError("disk full".to_string()))
        }
    }

    fn container() -> (
        ServiceWorkerContainer,
        Arc<CountingNetwork>,
        mpsc::UnboundedReceiver<ServiceWorkerEvent>,
    ) {
        let network = Arc::new(CountingNetwork {
            calls: AtomicUsize::new(0),
        });
        let scope = Url::parse("https://example.com/").unwrap();
        let (container, rx) = ServiceWorkerContainer::new(scope, network.clone());
        (container, network, rx)
    }

    #[tokio::test]
    async fn test_first_install_activates() {
        let (container, _network, mut rx) = container();

        let id = container.register("/sw.js", Arc::new(EchoWorker)).await.unwrap();
        assert_eq!(container.state_of(id).await, Some(ServiceWorkerState::Activated));
        assert!(container.waiting().await.is_none());

        assert!(matches!(
            rx.try_recv(),
            Ok(ServiceWorkerEvent::UpdateFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_second_install_waits_until_message() {
        let (container, _network, _rx) = container();

        let first = container.register("/sw.js", Arc::new(EchoWorker)).await.unwrap();
        let second = container.register("/sw.js", Arc::new(EchoWorker)).await.unwrap();
        assert_eq!(container.state_of(second).await, Some(ServiceWorkerState::Installed));
        assert_eq!(container.active().await.map(|w| w.id), Some(first));

        container
            .post_message(MessageTarget::Waiting, json!({ "type": "anything" }), None)
            .await
            .unwrap();

        assert_eq!(container.state_of(second).await, Some(ServiceWorkerState::Activated));
        assert_eq!(container.state_of(first).await, Some(ServiceWorkerState::Redundant));
    }

    #[tokio::test]
    async fn test_install_failure_makes_worker_redundant() {
        let (container, _network, _rx) = container();

        let err = container
            .register("/sw.js", Arc::new(BrokenInstall))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceWorkerError::InstallFailed(_)));
        assert!(container.active().await.is_none());
        assert!(container.installing().await.is_none());
    }

    #[tokio::test]
    async fn test_cross_origin_script_rejected() {
        let (container, _network, _rx) = container();
        let err = container
            .register("https://evil.example.org/sw.js", Arc::new(EchoWorker))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceWorkerError::SecurityError(_)));
    }

    #[tokio::test]
    async fn test_fetch_routing() {
        let (container, network, _rx) = container();

        // No worker yet.
        let response = container.navigate("/index.html").await.unwrap();
        assert_eq!(response.text().unwrap(), "network");

        container.register("/sw.js", Arc::new(EchoWorker)).await.unwrap();

        let response = container.navigate("/index.html").await.unwrap();
        assert_eq!(response.text().unwrap(), "worker");

        // Uncontrolled clients bypass the worker.
        let client = Client::window(Url::parse("https://example.com/index.html").unwrap());
        let client_id = client.id.clone();
        container.clients().add(client).await;
        let request = Request::get(Url::parse("https://example.com/a.png").unwrap());
        let response = container
            .handle_fetch(request, Some(&client_id))
            .await
            .unwrap();
        assert_eq!(response.text().unwrap(), "network");

        // Out-of-scope, client-less requests bypass it too.
        let request = Request::get(Url::parse("https://cdn.example.net/x.js").unwrap());
        container.handle_fetch(request, None).await.unwrap();
        assert_eq!(network.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_finished_background_work_is_reaped() {
        let (container, _network, _rx) = container();
        let recorded = Arc::new(AtomicUsize::new(0));
        container
            .register(
                "/sw.js",
                Arc::new(BackgroundWorker {
                    recorded: Arc::clone(&recorded),
                    delay: std::time::Duration::ZERO,
                }),
            )
            .await
            .unwrap();

        for _ in 0..1000 {
            container.navigate("/index.html").await.unwrap();
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        container.navigate("/index.html").await.unwrap();

        assert!(container.tasks.lock().await.len() <= 2);
        container.settle().await;
        assert_eq!(recorded.load(Ordering::SeqCst), 1001);
    }

    #[tokio::test]
    async fn test_drop_keeps_background_work_running() {
        let (container, _network, _rx) = container();
        let recorded = Arc::new(AtomicUsize::new(0));
        container
            .register(
                "/sw.js",
                Arc::new(BackgroundWorker {
                    recorded: Arc::clone(&recorded),
                    delay: std::time::Duration::from_millis(10),
                }),
            )
            .await
            .unwrap();

        container.navigate("/index.html").await.unwrap();
        drop(container);

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(recorded.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_message_without_waiting_worker() {
        let (container, _network, _rx) = container();
        let err = container
            .post_message(MessageTarget::Waiting, json!({}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceWorkerError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_push_requires_active_worker() {
        let (container, _network, _rx) = container();
        let err = container.dispatch_push(None).await.unwrap_err();
        assert!(matches!(err, ServiceWorkerError::StateError(_)));
    }

    #[tokio::test]
    async fn test_unregister() {
        let (container, _network, _rx) = container();
        let id = container.register("/sw.js", Arc::new(EchoWorker)).await.unwrap();

        assert!(container.unregister().await);
        assert_eq!(container.state_of(id).await, Some(ServiceWorkerState::Redundant));
        assert!(!container.unregister().await);
    }
}
