//! Smoke harness for the offline cache worker.
//!
//! Registers the cache worker against a live origin, precaches the asset
//! list, loads the shell page through the worker and prints a JSON summary.
//! With `--store`, cache contents are restored before and persisted after the
//! run, so a second run exercises an upgrade over existing caches.

use bytes::Bytes;
use clap::Parser;
use serde::Serialize;
use shellcache_common::{init_logging, LogConfig, Result, ResultExt, ShellCacheError};
use shellcache_net::{HttpNetwork, LoaderConfig};
use shellcache_sw::{CacheStorage, ServiceWorkerContainer, ServiceWorkerState};
use shellcache_worker::{CacheManager, WorkerConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "shellcache-smoke")]
#[command(about = "Install the offline cache worker against an origin and report")]
struct Args {
    /// Origin the worker is registered for
    #[arg(long)]
    origin: String,

    /// Worker config (JSON); defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory holding the persisted cache storage
    #[arg(long)]
    store: Option<PathBuf>,

    /// Deliver a push message with this payload after activation
    #[arg(long)]
    push: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Enable verbose output
    #[arg(long, short)]
    verbose: bool,
}

#[derive(Serialize)]
struct SmokeResult {
    status: String,
    origin: String,
    cache_name: Option<String>,
    worker_state: Option<ServiceWorkerState>,
    caches: Vec<String>,
    cached_entries: usize,
    shell_status: Option<u16>,
    notifications: usize,
    elapsed_ms: u128,
    error: Option<String>,
}

impl SmokeResult {
    fn failed(origin: &str, err: &ShellCacheError, elapsed_ms: u128) -> Self {
        Self {
            status: "error".to_string(),
            origin: origin.to_string(),
            cache_name: None,
            worker_state: None,
            caches: Vec::new(),
            cached_entries: 0,
            shell_status: None,
            notifications: 0,
            elapsed_ms,
            error: Some(format!("[{}] {}", err.category(), err)),
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_logging(LogConfig::cli(args.verbose, args.json_logs));

    let started = Instant::now();
    let result = match run(&args, started).await {
        Ok(result) => result,
        Err(e) => {
            error!(error = %e, "Smoke run failed");
            SmokeResult::failed(&args.origin, &e, started.elapsed().as_millis())
        }
    };

    match serde_json::to_string(&result) {
        Ok(json) => println!("{json}"),
        Err(e) => error!(error = %e, "Failed to serialize result"),
    }

    if result.status != "ok" {
        std::process::exit(1);
    }
}

async fn run(args: &Args, started: Instant) -> Result<SmokeResult> {
    let config = match &args.config {
        Some(path) => WorkerConfig::load(path)?,
        None => WorkerConfig::default(),
    };

    let origin = Url::parse(&args.origin)
        .map_err(|e| ShellCacheError::InvalidArgument(format!("--origin: {e}")))?;

    let network = HttpNetwork::new(LoaderConfig::default(), Some(origin.clone()))
        .map_err(|e| ShellCacheError::network_with_source("Failed to build HTTP client", e))?;

    let caches = match &args.store {
        Some(dir) => CacheStorage::restore(dir)
            .await
            .storage_context(format!("Failed to restore caches from {}", dir.display()))?,
        None => CacheStorage::new(),
    };
    info!(caches = ?caches.keys().await, "Cache storage ready");

    let (container, _events) =
        ServiceWorkerContainer::with_caches(origin.clone(), Arc::new(network), caches);

    let worker = container
        .register("/sw.js", Arc::new(CacheManager::new(config.clone())))
        .await
        .map_err(|e| ShellCacheError::worker_with_source("Worker registration failed", e))?;

    let shell = container
        .navigate(&config.shell_page)
        .await
        .map_err(|e| ShellCacheError::network_with_source("Shell page request failed", e))?;
    info!(status = shell.status, "Shell page loaded");

    if let Some(payload) = &args.push {
        container
            .dispatch_push(Some(Bytes::from(payload.clone())))
            .await
            .map_err(|e| ShellCacheError::worker_with_source("Push delivery failed", e))?;
    }

    container.settle().await;

    if let Some(dir) = &args.store {
        container
            .caches()
            .persist(dir)
            .await
            .storage_context(format!("Failed to persist caches to {}", dir.display()))?;
    }

    let cached_entries = container
        .caches()
        .entry_count(&config.cache_name)
        .await
        .unwrap_or(0);

    Ok(SmokeResult {
        status: "ok".to_string(),
        origin: origin.to_string(),
        cache_name: Some(config.cache_name),
        worker_state: container.state_of(worker).await,
        caches: container.caches().keys().await,
        cached_entries,
        shell_status: Some(shell.status),
        notifications: container.notifications().list().await.len(),
        elapsed_ms: started.elapsed().as_millis(),
        error: None,
    })
}
