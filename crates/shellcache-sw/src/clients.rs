//! Clients API: the pages a worker can see, focus, open and control.

use hashbrown::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};
use url::Url;

use crate::events::ServiceWorkerEvent;
use crate::lifecycle::ServiceWorkerId;
use crate::ServiceWorkerError;

/// A client (page or worker).
#[derive(Debug, Clone)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Client URL.
    pub url: Url,

    /// Client type.
    pub client_type: ClientType,

    /// Frame type.
    pub frame_type: FrameType,

    /// Visibility state.
    pub visibility_state: VisibilityState,

    /// Whether focused.
    pub focused: bool,

    /// Worker controlling this client, if any.
    pub controller: Option<ServiceWorkerId>,
}

impl Client {
    /// A visible, uncontrolled top-level window.
    pub fn window(url: Url) -> Self {
        Self {
            id: format!("client-{}", uuid_simple()),
            url,
            client_type: ClientType::Window,
            frame_type: FrameType::TopLevel,
            visibility_state: VisibilityState::Visible,
            focused: false,
            controller: None,
        }
    }

    pub fn is_controlled(&self) -> bool {
        self.controller.is_some()
    }
}

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    SharedWorker,
    All,
}

/// Frame type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Auxiliary,
    TopLevel,
    Nested,
    None,
}

/// Visibility state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisibilityState {
    Hidden,
    Visible,
}

/// Options for `clients.matchAll()`.
#[derive(Debug, Clone, Default)]
pub struct ClientMatchOptions {
    pub include_uncontrolled: bool,
    pub client_type: ClientType,
}

/// All known clients. Owned by the container; workers see it through
/// [`WorkerClients`].
#[derive(Debug, Clone)]
pub struct ClientRegistry {
    clients: Arc<RwLock<HashMap<String, Client>>>,
    event_tx: mpsc::UnboundedSender<ServiceWorkerEvent>,
}

impl ClientRegistry {
    pub(crate) fn new(event_tx: mpsc::UnboundedSender<ServiceWorkerEvent>) -> Self {
        Self {
            clients: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
        }
    }

    /// Add a client.
    pub async fn add(&self, client: Client) {
        debug!(client_id = %client.id, url = %client.url, "Client added");
        self.clients.write().await.insert(client.id.clone(), client);
    }

    /// Remove a client.
    pub async fn remove(&self, id: &str) -> Option<Client> {
        self.clients.write().await.remove(id)
    }

    /// Get a client by ID.
    pub async fn get(&self, id: &str) -> Option<Client> {
        self.clients.read().await.get(id).cloned()
    }

    /// All clients, in no particular order.
    pub async fn all(&self) -> Vec<Client> {
        self.clients.read().await.values().cloned().collect()
    }

    /// Hand every controlled client over to `worker`.
    pub(crate) async fn transfer_control(&self, worker: ServiceWorkerId) {
        let mut clients = self.clients.write().await;
        for client in clients.values_mut().filter(|c| c.is_controlled()) {
            client.controller = Some(worker);
        }
    }

    /// Release every client.
    pub(crate) async fn release_all(&self) {
        for client in self.clients.write().await.values_mut() {
            client.controller = None;
        }
    }

    pub(crate) fn for_worker(&self, worker: ServiceWorkerId, scope: Url) -> WorkerClients {
        WorkerClients {
            registry: self.clone(),
            worker,
            scope,
        }
    }

    fn emit(&self, event: ServiceWorkerEvent) {
        let _ = self.event_tx.send(event);
    }
}

/// The `clients` global of one worker.
#[derive(Debug, Clone)]
pub struct WorkerClients {
    registry: ClientRegistry,
    worker: ServiceWorkerId,
    scope: Url,
}

impl WorkerClients {
    /// Get a client by ID.
    pub async fn get(&self, id: &str) -> Option<Client> {
        self.registry.get(id).await
    }

    /// Match all clients.
    pub async fn match_all(&self, options: ClientMatchOptions) -> Vec<Client> {
        let clients = self.registry.clients.read().await;
        let mut matched: Vec<Client> = clients
            .values()
            .filter(|c| options.include_uncontrolled || c.controller == Some(self.worker))
            .filter(|c| match options.client_type {
                ClientType::All => true,
                t => c.client_type == t,
            })
            .cloned()
            .collect();
        // Focused clients first, then stable by ID.
        matched.sort_by(|a, b| b.focused.cmp(&a.focused).then_with(|| a.id.cmp(&b.id)));
        matched
    }

    /// Open a window. Relative URLs resolve against the worker scope.
    pub async fn open_window(&self, url: &str) -> Result<Client, ServiceWorkerError> {
        let url = self
            .scope
            .join(url)
            .map_err(|e| ServiceWorkerError::TypeError(e.to_string()))?;

        let mut client = Client::window(url);
        client.focused = true;
        if self.in_scope(&client.url) {
            client.controller = Some(self.worker);
        }

        {
            let mut clients = self.registry.clients.write().await;
            for other in clients.values_mut() {
                other.focused = false;
            }
            clients.insert(client.id.clone(), client.clone());
        }

        info!(client_id = %client.id, url = %client.url, "Window opened");
        self.registry.emit(ServiceWorkerEvent::WindowOpened {
            client_id: client.id.clone(),
            url: client.url.to_string(),
        });
        Ok(client)
    }

    /// Focus the client.
    pub async fn focus(&self, id: &str) -> Result<Client, ServiceWorkerError> {
        let focused = {
            let mut clients = self.registry.clients.write().await;
            let client = clients
                .get(id)
                .ok_or_else(|| ServiceWorkerError::NotFound(id.to_string()))?;
            if client.client_type != ClientType::Window {
                return Err(ServiceWorkerError::StateError(
                    "Can only focus window clients".to_string(),
                ));
            }
            for client in clients.values_mut() {
                client.focused = client.id == id;
            }
            clients.get(id).cloned()
        }
        .ok_or_else(|| ServiceWorkerError::NotFound(id.to_string()))?;

        debug!(client_id = id, "Client focused");
        self.registry.emit(ServiceWorkerEvent::ClientFocused {
            client_id: id.to_string(),
        });
        Ok(focused)
    }

    /// Claim all clients in scope.
    pub async fn claim(&self) -> Result<usize, ServiceWorkerError> {
        let mut claimed = Vec::new();
        {
            let mut clients = self.registry.clients.write().await;
            for client in clients.values_mut() {
                if client.client_type == ClientType::Window
                    && self.in_scope(&client.url)
                    && client.controller != Some(self.worker)
                {
                    client.controller = Some(self.worker);
                    claimed.push(client.id.clone());
                }
            }
        }

        for client_id in &claimed {
            self.registry.emit(ServiceWorkerEvent::ControllerChange {
                client_id: client_id.clone(),
                worker_id: self.worker,
            });
        }
        debug!(worker = self.worker.raw(), claimed = claimed.len(), "Clients claimed");
        Ok(claimed.len())
    }

    fn in_scope(&self, url: &Url) -> bool {
        url.as_str().starts_with(self.scope.as_str())
    }
}

/// Generate a simple UUID-like string.
fn uuid_simple() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!(
        "{:016x}-{:04x}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}
