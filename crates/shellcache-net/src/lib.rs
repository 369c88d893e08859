//! # shellcache net
//!
//! Request/response model and network access for the shellcache worker.
//!
//! ## Design Goals
//!
//! 1. **Fetch-shaped types**: requests carry a mode, responses carry a type
//!    (basic, cors, opaque, error) so callers can tell what is cacheable
//! 2. **Pluggable network**: the worker only sees the [`Network`] trait
//! 3. **URL patterns**: substring matching for request routing

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{ACCEPT, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use mime::Mime;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub mod loader;
pub mod pattern;

pub use loader::{HttpNetwork, LoaderConfig};
pub use pattern::UrlPattern;

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Request blocked: {0}")]
    Blocked(String),

    #[error("Network unavailable")]
    Offline,

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Unique identifier for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// Request mode, as seen by a fetch handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Top-level document navigation.
    Navigate,
    /// Cross-origin requests are rejected.
    SameOrigin,
    /// Cross-origin responses come back opaque.
    NoCors,
    /// Cross-origin responses are readable.
    #[default]
    Cors,
}

/// HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub mode: RequestMode,
    pub timeout: Option<Duration>,
}

impl Request {
    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self {
            id: RequestId::new(),
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            body: None,
            mode: RequestMode::Cors,
            timeout: None,
        }
    }

    /// Create a navigation request for an HTML document.
    pub fn navigate(url: Url) -> Self {
        Self::get(url)
            .mode(RequestMode::Navigate)
            .header(ACCEPT, HeaderValue::from_static("text/html,application/xhtml+xml"))
    }

    /// Create a POST request.
    pub fn post(url: Url, body: Bytes) -> Self {
        Self {
            method: Method::POST,
            body: Some(body),
            ..Self::get(url)
        }
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set the request mode.
    pub fn mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set timeout.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    pub fn is_get(&self) -> bool {
        self.method == Method::GET
    }

    /// Whether the `Accept` header asks for an HTML document.
    ///
    /// A missing header counts as "no".
    pub fn accepts_html(&self) -> bool {
        self.headers
            .get(ACCEPT)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|accept| accept.contains("text/html"))
    }

    /// Key under which this request is stored in a cache: the URL without
    /// its fragment.
    pub fn cache_key(&self) -> String {
        cache_key_for(&self.url)
    }
}

/// Cache key for a URL (fragment stripped).
pub fn cache_key_for(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.into()
}

/// Whether two URLs share scheme, host and port.
pub fn same_origin(a: &Url, b: &Url) -> bool {
    a.origin() == b.origin()
}

/// Response type, mirroring what a fetch caller is allowed to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// Same-origin response.
    Basic,
    /// Readable cross-origin response.
    Cors,
    /// Synthesized locally.
    #[default]
    Default,
    /// Network error.
    Error,
    /// Cross-origin response from a no-cors request; status and body hidden.
    Opaque,
}

/// HTTP response.
///
/// Cloning is cheap: the body is reference counted.
#[derive(Debug, Clone)]
pub struct Response {
    pub url: Option<Url>,
    pub status: u16,
    pub status_text: String,
    pub headers: HeaderMap,
    pub response_type: ResponseType,
    pub body: Bytes,
}

impl Response {
    /// Create a locally synthesized response.
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            url: None,
            status,
            status_text: reason_phrase(status),
            headers: HeaderMap::new(),
            response_type: ResponseType::Default,
            body: body.into(),
        }
    }

    /// Create a network error response.
    pub fn network_error() -> Self {
        Self {
            status_text: String::new(),
            response_type: ResponseType::Error,
            ..Self::new(0, Bytes::new())
        }
    }

    /// Create an opaque response for a cross-origin no-cors request.
    pub fn opaque(url: Url) -> Self {
        Self {
            url: Some(url),
            status_text: String::new(),
            response_type: ResponseType::Opaque,
            ..Self::new(0, Bytes::new())
        }
    }

    /// Add a header.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set the response type.
    pub fn with_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    /// Set the final response URL.
    pub fn with_url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    /// Check if request was successful (2xx).
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_network_error(&self) -> bool {
        self.response_type == ResponseType::Error
    }

    /// Parsed `Content-Type`, if any.
    pub fn content_type(&self) -> Option<Mime> {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<Mime>().ok())
    }

    /// Get the body as text.
    pub fn text(&self) -> Result<String, NetError> {
        String::from_utf8(self.body.to_vec()).map_err(|e| NetError::RequestFailed(e.to_string()))
    }
}

fn reason_phrase(status: u16) -> String {
    StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or_default()
        .to_string()
}

/// Something that can perform network requests.
#[async_trait]
pub trait Network: Send + Sync {
    /// Perform `request`. Errors mean no response arrived at all
    /// (offline, DNS, connection reset); HTTP error statuses are `Ok`.
    async fn fetch(&self, request: &Request) -> Result<Response, NetError>;
}
