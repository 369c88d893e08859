//! # shellcache worker
//!
//! Offline cache worker for a static web app.
//!
//! - **install**: precache a fixed asset list into the current cache version
//! - **activate**: delete every other cache version, claim open windows
//! - **fetch**: cache-first for GET requests, network fallback, opportunistic
//!   caching of same-origin 200s, shell page or 408 placeholder when offline
//! - **push / notificationclick**: show a notification, focus or open the app
//! - **message**: `{"type": "SKIP_WAITING"}` activates a waiting version
//!
//! ```no_run
//! use std::sync::Arc;
//! use shellcache_net::{HttpNetwork, LoaderConfig};
//! use shellcache_sw::ServiceWorkerContainer;
//! use shellcache_worker::{CacheManager, WorkerConfig};
//! use url::Url;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let scope = Url::parse("https://charts.example.com/")?;
//! let network = Arc::new(HttpNetwork::new(LoaderConfig::default(), Some(scope.clone()))?);
//! let (container, _events) = ServiceWorkerContainer::new(scope, network);
//!
//! container
//!     .register("/sw.js", Arc::new(CacheManager::new(WorkerConfig::default())))
//!     .await?;
//! let _shell = container.navigate("/index.html").await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod manager;

pub use config::{NotificationConfig, WorkerConfig};
pub use manager::{CacheManager, SKIP_WAITING_MESSAGE};
