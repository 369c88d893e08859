//! Cache API: named stores of request → response pairs.
//!
//! [`CacheStorage`] and [`CacheHandle`] are cheap to clone and share their
//! state, so concurrent handlers can read and write the same store. Writes to
//! one key are last-write-wins.

use bytes::Bytes;
use futures::future::join_all;
use hashbrown::HashMap;
use http::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use shellcache_net::{Network, Request, Response, ResponseType};
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

use crate::ServiceWorkerError;

/// File written by [`CacheStorage::persist`].
pub const SNAPSHOT_FILE: &str = "caches.json";

// ==================== Entry ====================

/// A cached request/response pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL (cache key).
    pub url: String,

    /// Request method.
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response status text.
    pub status_text: String,

    /// Final response URL.
    pub response_url: Option<String>,

    /// Response type.
    pub response_type: ResponseType,

    /// Response headers, in order.
    pub headers: Vec<StoredHeader>,

    /// Response body.
    #[serde(with = "bytes_base64")]
    pub body: Bytes,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

/// A header as received. Values are raw bytes: they need not be ASCII.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredHeader {
    pub name: String,
    #[serde(with = "bytes_base64")]
    pub value: Bytes,
}

impl CacheEntry {
    /// Capture `response` under the key of `request`.
    pub fn capture(request: &Request, response: &Response) -> Self {
        let headers = response
            .headers
            .iter()
            .map(|(name, value)| StoredHeader {
                name: name.as_str().to_string(),
                value: Bytes::copy_from_slice(value.as_bytes()),
            })
            .collect();

        Self {
            url: request.cache_key(),
            method: request.method.to_string(),
            status: response.status,
            status_text: response.status_text.clone(),
            response_url: response.url.as_ref().map(|u| u.to_string()),
            response_type: response.response_type,
            headers,
            body: response.body.clone(),
            cached_at: now_millis(),
        }
    }

    /// Rebuild the stored response.
    pub fn to_response(&self) -> Response {
        let mut headers = HeaderMap::new();
        for header in &self.headers {
            match (
                HeaderName::from_bytes(header.name.as_bytes()),
                HeaderValue::from_bytes(&header.value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.append(name, value);
                }
                _ => warn!(url = %self.url, header = %header.name, "Dropping malformed stored header"),
            }
        }

        Response {
            url: self.response_url.as_deref().and_then(|u| Url::parse(u).ok()),
            status: self.status,
            status_text: self.status_text.clone(),
            headers,
            response_type: self.response_type,
            body: self.body.clone(),
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

mod bytes_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

// ==================== Cache ====================

/// A cache instance.
#[derive(Debug, Default)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    /// Cached entries.
    entries: HashMap<String, CacheEntry>,
}

impl Cache {
    /// Create a new cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Match a request. Only GET requests can match.
    pub fn match_request(&self, request: &Request) -> Option<&CacheEntry> {
        if !request.is_get() {
            return None;
        }
        self.entries.get(&request.cache_key())
    }

    /// Store `response` for `request`.
    pub fn put(&mut self, request: &Request, response: &Response) -> Result<(), ServiceWorkerError> {
        if !request.is_get() {
            return Err(ServiceWorkerError::TypeError(format!(
                "Cannot cache {} request",
                request.method
            )));
        }
        if response.status == 206 {
            return Err(ServiceWorkerError::TypeError(
                "Cannot cache partial response".to_string(),
            ));
        }
        let entry = CacheEntry::capture(request, response);
        self.entries.insert(entry.url.clone(), entry);
        Ok(())
    }

    /// Delete entry.
    pub fn delete(&mut self, request: &Request) -> bool {
        self.entries.remove(&request.cache_key()).is_some()
    }

    /// Get all keys (URLs).
    pub fn keys(&self) -> Vec<&str> {
        self.entries.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entries(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.values()
    }
}

// ==================== Cache Handle ====================

/// Shared handle to one cache, as returned by [`CacheStorage::open`].
///
/// A handle stays usable after its cache is deleted from storage; writes then
/// go to the detached cache only.
#[derive(Debug, Clone)]
pub struct CacheHandle {
    name: String,
    inner: Arc<RwLock<Cache>>,
}

impl CacheHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Match a request.
    pub async fn match_request(&self, request: &Request) -> Option<Response> {
        self.inner
            .read()
            .await
            .match_request(request)
            .map(CacheEntry::to_response)
    }

    /// Store `response` for `request`.
    pub async fn put(&self, request: &Request, response: &Response) -> Result<(), ServiceWorkerError> {
        self.inner.write().await.put(request, response)
    }

    /// Fetch every request and store the successful responses.
    ///
    /// Requests are fetched concurrently. A network error, a non-2xx status or
    /// a response the cache refuses (such as a 206) counts as a failure;
    /// failed requests are reported together in
    /// [`ServiceWorkerError::AddAllFailed`] while the others stay stored.
    pub async fn add_all(
        &self,
        network: &dyn Network,
        requests: Vec<Request>,
    ) -> Result<(), ServiceWorkerError> {
        let total = requests.len();
        let results = join_all(requests.iter().map(|r| network.fetch(r))).await;

        let mut failed = Vec::new();
        let mut cache = self.inner.write().await;
        for (request, result) in requests.iter().zip(results) {
            match result {
                Ok(response) if response.ok() => {
                    if let Err(e) = cache.put(request, &response) {
                        warn!(url = %request.url, error = %e, "Response refused while adding to cache");
                        failed.push(request.cache_key());
                    }
                }
                Ok(response) => {
                    warn!(url = %request.url, status = response.status, "Bad status while adding to cache");
                    failed.push(request.cache_key());
                }
                Err(e) => {
                    warn!(url = %request.url, error = %e, "Fetch failed while adding to cache");
                    failed.push(request.cache_key());
                }
            }
        }

        debug!(cache = %self.name, total, failed = failed.len(), "add_all finished");

        if failed.is_empty() {
            Ok(())
        } else {
            Err(ServiceWorkerError::AddAllFailed { failed, total })
        }
    }

    /// Delete entry.
    pub async fn delete(&self, request: &Request) -> bool {
        self.inner.write().await.delete(request)
    }

    /// Get all keys (URLs).
    pub async fn keys(&self) -> Vec<String> {
        self.inner
            .read()
            .await
            .keys()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}

// ==================== Cache Storage ====================

#[derive(Debug, Default)]
struct StorageInner {
    caches: HashMap<String, Arc<RwLock<Cache>>>,
    /// Cache names in creation order.
    order: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct CacheSnapshot {
    name: String,
    entries: Vec<CacheEntry>,
}

/// Cache storage (the `caches` global).
#[derive(Debug, Clone, Default)]
pub struct CacheStorage {
    inner: Arc<RwLock<StorageInner>>,
}

impl CacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a cache (creates if doesn't exist).
    pub async fn open(&self, name: &str) -> CacheHandle {
        let mut inner = self.inner.write().await;
        let cache = match inner.caches.get(name) {
            Some(cache) => Arc::clone(cache),
            None => {
                debug!(cache = name, "Creating cache");
                let cache = Arc::new(RwLock::new(Cache::new(name)));
                inner.caches.insert(name.to_string(), Arc::clone(&cache));
                inner.order.push(name.to_string());
                cache
            }
        };

        CacheHandle {
            name: name.to_string(),
            inner: cache,
        }
    }

    /// Check if cache exists.
    pub async fn has(&self, name: &str) -> bool {
        self.inner.read().await.caches.contains_key(name)
    }

    /// Delete a cache.
    pub async fn delete(&self, name: &str) -> bool {
        let mut inner = self.inner.write().await;
        inner.order.retain(|n| n != name);
        inner.caches.remove(name).is_some()
    }

    /// Number of entries in cache `name`, without creating it.
    pub async fn entry_count(&self, name: &str) -> Option<usize> {
        let cache = self.inner.read().await.caches.get(name).cloned()?;
        let len = cache.read().await.len();
        Some(len)
    }

    /// Get all cache names, in creation order.
    pub async fn keys(&self) -> Vec<String> {
        self.inner.read().await.order.clone()
    }

    /// Match across all caches, oldest cache first.
    pub async fn match_request(&self, request: &Request) -> Option<Response> {
        let caches: Vec<_> = {
            let inner = self.inner.read().await;
            inner
                .order
                .iter()
                .filter_map(|name| inner.caches.get(name).cloned())
                .collect()
        };

        for cache in caches {
            if let Some(entry) = cache.read().await.match_request(request) {
                return Some(entry.to_response());
            }
        }
        None
    }

    /// Write every cache to `dir/caches.json`.
    pub async fn persist(&self, dir: &Path) -> Result<(), ServiceWorkerError> {
        let mut snapshots = Vec::new();
        {
            let inner = self.inner.read().await;
            for name in &inner.order {
                if let Some(cache) = inner.caches.get(name) {
                    let cache = cache.read().await;
                    snapshots.push(CacheSnapshot {
                        name: name.clone(),
                        entries: cache.entries().cloned().collect(),
                    });
                }
            }
        }

        let json = serde_json::to_vec_pretty(&snapshots)
            .map_err(|e| ServiceWorkerError::CacheError(e.to_string()))?;

        tokio::fs::create_dir_all(dir).await.map_err(io_error)?;
        let path = dir.join(SNAPSHOT_FILE);
        let tmp = dir.join(format!("{SNAPSHOT_FILE}.tmp"));
        tokio::fs::write(&tmp, json).await.map_err(io_error)?;
        tokio::fs::rename(&tmp, &path).await.map_err(io_error)?;

        info!(path = %path.display(), caches = snapshots.len(), "Cache storage persisted");
        Ok(())
    }

    /// Load storage written by [`CacheStorage::persist`].
    ///
    /// A missing snapshot yields empty storage.
    pub async fn restore(dir: &Path) -> Result<Self, ServiceWorkerError> {
        let path = dir.join(SNAPSHOT_FILE);
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No cache snapshot");
                return Ok(Self::new());
            }
            Err(e) => return Err(io_error(e)),
        };

        let snapshots: Vec<CacheSnapshot> = serde_json::from_slice(&data)
            .map_err(|e| ServiceWorkerError::CacheError(e.to_string()))?;

        let mut inner = StorageInner::default();
        for snapshot in snapshots {
            let mut cache = Cache::new(&snapshot.name);
            for entry in snapshot.entries {
                cache.entries.insert(entry.url.clone(), entry);
            }
            inner.order.push(snapshot.name.clone());
            inner
                .caches
                .insert(snapshot.name, Arc::new(RwLock::new(cache)));
        }

        info!(path = %path.display(), caches = inner.order.len(), "Cache storage restored");
        Ok(Self {
            inner: Arc::new(RwLock::new(inner)),
        })
    }
}

fn io_error(e: std::io::Error) -> ServiceWorkerError {
    ServiceWorkerError::CacheError(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
    use shellcache_net::NetError;

    fn get(url: &str) -> Request {
        Request::get(Url::parse(url).unwrap())
    }

    fn html(body: &str) -> Response {
        Response::new(200, body.to_string())
            .with_type(ResponseType::Basic)
            .with_header(CONTENT_TYPE, HeaderValue::from_static("text/html"))
    }

    /// Serves 200 for every URL except those containing "missing" (404),
    /// "partial" (206) and "down" (network error).
    struct StaticNetwork;

    #[async_trait]
    impl Network for StaticNetwork {
        async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
            let url = request.url.as_str();
            if url.contains("down") {
                Err(NetError::Offline)
            } else if url.contains("missing") {
                Ok(Response::new(404, ""))
            } else if url.contains("partial") {
                Ok(Response::new(206, "part"))
            } else {
                Ok(Response::new(200, url.to_string()).with_type(ResponseType::Basic))
            }
        }
    }

    #[test]
    fn test_cache() {
        let mut cache = Cache::new("v1");
        cache
            .put(&get("https://example.com/style.css"), &html("body"))
            .unwrap();

        assert!(cache.match_request(&get("https://example.com/style.css")).is_some());
        assert!(cache.match_request(&get("https://example.com/style.css#x")).is_some());
        assert!(cache.match_request(&get("https://example.com/other.css")).is_none());
    }

    #[test]
    fn test_cache_rejects_non_get_and_partial() {
        let mut cache = Cache::new("v1");
        let post = Request::post(
            Url::parse("https://example.com/form").unwrap(),
            Bytes::from_static(b"x"),
        );

        assert!(matches!(
            cache.put(&post, &html("ok")),
            Err(ServiceWorkerError::TypeError(_))
        ));
        assert!(matches!(
            cache.put(&get("https://example.com/video"), &Response::new(206, "")),
            Err(ServiceWorkerError::TypeError(_))
        ));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_post_never_matches() {
        let mut cache = Cache::new("v1");
        cache.put(&get("https://example.com/a"), &html("a")).unwrap();

        let post = Request::post(Url::parse("https://example.com/a").unwrap(), Bytes::new());
        assert!(cache.match_request(&post).is_none());
    }

    #[test]
    fn test_cache_delete() {
        let mut cache = Cache::new("v1");
        let request = get("https://example.com/style.css");

        cache.put(&request, &html("body")).unwrap();
        assert!(cache.delete(&request));
        assert!(cache.match_request(&request).is_none());
        assert!(!cache.delete(&request));
    }

    #[test]
    fn test_entry_round_trips_response() {
        let request = get("https://example.com/index.html");
        let response = html("<p>hi</p>").with_url(request.url.clone());

        let restored = CacheEntry::capture(&request, &response).to_response();
        assert_eq!(restored.status, 200);
        assert_eq!(restored.response_type, ResponseType::Basic);
        assert_eq!(restored.body, response.body);
        assert_eq!(restored.url, response.url);
        assert_eq!(restored.content_type(), Some(mime::TEXT_HTML));
    }

    #[test]
    fn test_entry_keeps_non_ascii_header_values() {
        let request = get("https://example.com/report.pdf");
        let disposition = HeaderValue::from_bytes(b"attachment; filename=\"caf\xe9.pdf\"").unwrap();
        let response = html("%PDF").with_header(CONTENT_DISPOSITION, disposition.clone());

        let restored = CacheEntry::capture(&request, &response).to_response();
        assert_eq!(restored.headers.get(CONTENT_DISPOSITION), Some(&disposition));
        assert_eq!(restored.headers.len(), response.headers.len());
    }

    #[tokio::test]
    async fn test_cache_storage() {
        let storage = CacheStorage::new();
        assert!(!storage.has("v1").await);

        storage.open("v1").await;
        storage.open("v2").await;
        storage.open("v1").await;
        assert!(storage.has("v1").await);
        assert_eq!(storage.keys().await, vec!["v1", "v2"]);

        assert!(storage.delete("v1").await);
        assert!(!storage.has("v1").await);
        assert!(!storage.delete("v1").await);
        assert_eq!(storage.keys().await, vec!["v2"]);
    }

    #[tokio::test]
    async fn test_open_shares_state() {
        let storage = CacheStorage::new();
        let request = get("https://example.com/a.js");

        storage.open("v1").await.put(&request, &html("a")).await.unwrap();
        let again = storage.open("v1").await;

        assert_eq!(again.len().await, 1);
        assert!(storage.match_request(&request).await.is_some());
    }

    #[tokio::test]
    async fn test_storage_match_prefers_oldest_cache() {
        let storage = CacheStorage::new();
        let request = get("https://example.com/a.js");

        storage.open("old").await.put(&request, &html("old")).await.unwrap();
        storage.open("new").await.put(&request, &html("new")).await.unwrap();

        let hit = storage.match_request(&request).await.unwrap();
        assert_eq!(hit.text().unwrap(), "old");
    }

    #[tokio::test]
    async fn test_add_all() {
        let storage = CacheStorage::new();
        let cache = storage.open("v1").await;

        cache
            .add_all(
                &StaticNetwork,
                vec![get("https://example.com/a.js"), get("https://example.com/b.js")],
            )
            .await
            .unwrap();

        let mut keys = cache.keys().await;
        keys.sort();
        assert_eq!(keys, vec!["https://example.com/a.js", "https://example.com/b.js"]);
    }

    #[tokio::test]
    async fn test_add_all_reports_failures_and_keeps_successes() {
        let cache = CacheStorage::new().open("v1").await;

        let err = cache
            .add_all(
                &StaticNetwork,
                vec![
                    get("https://example.com/a.js"),
                    get("https://example.com/missing.png"),
                    get("https://down.example.com/lib.js"),
                ],
            )
            .await
            .unwrap_err();

        match err {
            ServiceWorkerError::AddAllFailed { failed, total } => {
                assert_eq!(total, 3);
                assert_eq!(failed.len(), 2);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(cache.keys().await, vec!["https://example.com/a.js"]);
    }

    #[tokio::test]
    async fn test_add_all_partial_response_does_not_abort() {
        let cache = CacheStorage::new().open("v1").await;

        let err = cache
            .add_all(
                &StaticNetwork,
                vec![
                    get("https://example.com/partial.mp4"),
                    get("https://example.com/b.js"),
                    get("https://example.com/c.js"),
                ],
            )
            .await
            .unwrap_err();

        match err {
            ServiceWorkerError::AddAllFailed { failed, total } => {
                assert_eq!(total, 3);
                assert_eq!(failed, vec!["https://example.com/partial.mp4".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
        let mut keys = cache.keys().await;
        keys.sort();
        assert_eq!(keys, vec!["https://example.com/b.js", "https://example.com/c.js"]);
    }

    #[tokio::test]
    async fn test_entry_count_does_not_create() {
        let storage = CacheStorage::new();
        assert_eq!(storage.entry_count("v1").await, None);
        assert!(!storage.has("v1").await);

        storage
            .open("v1")
            .await
            .put(&get("https://example.com/a"), &html("a"))
            .await
            .unwrap();
        assert_eq!(storage.entry_count("v1").await, Some(1));
    }

    #[tokio::test]
    async fn test_deleted_cache_handle_is_detached() {
        let storage = CacheStorage::new();
        let cache = storage.open("v1").await;
        storage.delete("v1").await;

        cache.put(&get("https://example.com/a"), &html("a")).await.unwrap();
        assert!(!storage.has("v1").await);
        assert!(storage.match_request(&get("https://example.com/a")).await.is_none());
    }

    #[tokio::test]
    async fn test_persist_and_restore() {
        let dir = tempfile::tempdir().unwrap();
        let storage = CacheStorage::new();
        let request = get("https://example.com/index.html");

        let label = HeaderValue::from_bytes(b"gr\xfc\xdfe").unwrap();
        let response = html("<p>shell</p>").with_header(HeaderName::from_static("x-label"), label.clone());
        storage.open("v1").await.put(&request, &response).await.unwrap();
        storage.open("v2").await;
        storage.persist(dir.path()).await.unwrap();

        let restored = CacheStorage::restore(dir.path()).await.unwrap();
        assert_eq!(restored.keys().await, vec!["v1", "v2"]);
        let hit = restored.match_request(&request).await.unwrap();
        assert_eq!(hit.text().unwrap(), "<p>shell</p>");
        assert_eq!(hit.content_type(), Some(mime::TEXT_HTML));
        assert_eq!(hit.headers.get("x-label"), Some(&label));
    }

    #[tokio::test]
    async fn test_restore_missing_snapshot_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let restored = CacheStorage::restore(dir.path()).await.unwrap();
        assert!(restored.keys().await.is_empty());
    }
}
