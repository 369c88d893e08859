//! Worker states and the registration's installing/waiting/active slots.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use url::Url;

use crate::ServiceWorkerError;

/// Unique identifier for a service worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceWorkerState {
    /// Created, nothing dispatched yet.
    #[default]
    Parsed,
    /// Installing (install event).
    Installing,
    /// Installed but waiting for activation.
    Installed,
    /// Activating (activate event).
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Redundant (replaced or install failed).
    Redundant,
}

/// A service worker version.
#[derive(Debug, Clone)]
pub struct ServiceWorker {
    /// Unique ID.
    pub id: ServiceWorkerId,

    /// Script URL.
    pub script_url: Url,

    /// Current state.
    pub state: ServiceWorkerState,

    /// Time of last state change.
    pub state_changed_at: Instant,
}

impl ServiceWorker {
    /// Create a new service worker.
    pub fn new(script_url: Url) -> Self {
        Self {
            id: ServiceWorkerId::new(),
            script_url,
            state: ServiceWorkerState::Parsed,
            state_changed_at: Instant::now(),
        }
    }

    /// Set state.
    pub fn set_state(&mut self, state: ServiceWorkerState) {
        self.state = state;
        self.state_changed_at = Instant::now();
    }

    /// Check if active.
    pub fn is_active(&self) -> bool {
        self.state == ServiceWorkerState::Activated
    }

    /// Check if redundant.
    pub fn is_redundant(&self) -> bool {
        self.state == ServiceWorkerState::Redundant
    }

    /// Fails for redundant workers, which can no longer receive events.
    pub fn ensure_receiving(&self) -> Result<(), ServiceWorkerError> {
        if self.is_redundant() {
            return Err(ServiceWorkerError::StateError(
                "Cannot post message to redundant worker".to_string(),
            ));
        }
        Ok(())
    }
}

/// A service worker registration.
///
/// Methods that push a worker out of its slot return the displaced worker,
/// already marked redundant, so the caller can release it.
#[derive(Debug)]
pub struct ServiceWorkerRegistration {
    /// Scope URL.
    pub scope: Url,

    /// Installing worker.
    pub installing: Option<ServiceWorker>,

    /// Waiting worker (installed but not active).
    pub waiting: Option<ServiceWorker>,

    /// Active worker.
    pub active: Option<ServiceWorker>,

    /// Last update time.
    pub last_update_check: Option<Instant>,
}

impl ServiceWorkerRegistration {
    /// Create a new registration.
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            installing: None,
            waiting: None,
            active: None,
            last_update_check: None,
        }
    }

    /// Get the active worker.
    pub fn get_active(&self) -> Option<&ServiceWorker> {
        self.active.as_ref()
    }

    /// Find a worker by ID in any slot.
    pub fn find(&self, id: ServiceWorkerId) -> Option<&ServiceWorker> {
        [&self.installing, &self.waiting, &self.active]
            .into_iter()
            .flatten()
            .find(|w| w.id == id)
    }

    /// Put a new worker in the installing slot.
    pub fn begin_install(&mut self, mut worker: ServiceWorker) -> Option<ServiceWorker> {
        worker.set_state(ServiceWorkerState::Installing);
        self.last_update_check = Some(Instant::now());
        let displaced = self.installing.replace(worker);
        retire(displaced)
    }

    /// Drop the installing worker after its install handler failed.
    pub fn fail_install(&mut self) -> Option<ServiceWorker> {
        retire(self.installing.take())
    }

    /// Transition installing to waiting.
    pub fn install_complete(&mut self) -> Option<ServiceWorker> {
        let mut worker = self.installing.take()?;
        worker.set_state(ServiceWorkerState::Installed);
        retire(self.waiting.replace(worker))
    }

    /// Move the waiting worker into the active slot as `Activating`.
    ///
    /// Returns the activating worker's ID and the previous active worker.
    /// `None` if nothing is waiting.
    pub fn begin_activate(&mut self) -> Option<(ServiceWorkerId, Option<ServiceWorker>)> {
        let mut worker = self.waiting.take()?;
        worker.set_state(ServiceWorkerState::Activating);
        let id = worker.id;
        let displaced = retire(self.active.replace(worker));
        Some((id, displaced))
    }

    /// Mark the activating worker as activated.
    pub fn finish_activate(&mut self, id: ServiceWorkerId) -> bool {
        match self.active {
            Some(ref mut worker) if worker.id == id => {
                worker.set_state(ServiceWorkerState::Activated);
                true
            }
            _ => false,
        }
    }

    /// Unregister (mark every worker redundant).
    pub fn unregister(&mut self) -> Vec<ServiceWorker> {
        [
            self.active.take(),
            self.waiting.take(),
            self.installing.take(),
        ]
        .into_iter()
        .filter_map(retire)
        .collect()
    }
}

fn retire(worker: Option<ServiceWorker>) -> Option<ServiceWorker> {
    worker.map(|mut w| {
        w.set_state(ServiceWorkerState::Redundant);
        w
    })
}
