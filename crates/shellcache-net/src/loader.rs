//! reqwest-backed [`Network`] implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::{same_origin, NetError, Network, Request, RequestMode, Response, ResponseType};

/// Loader configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// User agent string.
    pub user_agent: String,
    /// Default timeout.
    pub default_timeout: Duration,
    /// Maximum redirects.
    pub max_redirects: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("shellcache/{}", env!("CARGO_PKG_VERSION")),
            default_timeout: Duration::from_secs(30),
            max_redirects: 10,
        }
    }
}

/// Network access over HTTP.
///
/// `origin` is the origin of the page the worker serves; it decides whether a
/// response is `basic` (same-origin), `cors` or `opaque`.
pub struct HttpNetwork {
    client: Client,
    origin: Option<Url>,
    /// Client-wide timeout, reported when a request has none of its own.
    default_timeout: Duration,
}

impl HttpNetwork {
    /// Create a new loader.
    pub fn new(config: LoaderConfig, origin: Option<Url>) -> Result<Self, NetError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.default_timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| NetError::RequestFailed(e.to_string()))?;

        info!(origin = ?origin.as_ref().map(Url::as_str), "HttpNetwork initialized");

        Ok(Self {
            client,
            origin,
            default_timeout: config.default_timeout,
        })
    }

    fn is_same_origin(&self, url: &Url) -> bool {
        self.origin.as_ref().is_some_and(|o| same_origin(o, url))
    }

    fn classify(&self, request: &Request, final_url: &Url) -> ResponseType {
        if self.is_same_origin(final_url) {
            ResponseType::Basic
        } else if request.mode == RequestMode::NoCors {
            ResponseType::Opaque
        } else {
            ResponseType::Cors
        }
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        debug!(url = %request.url, method = %request.method, "Fetching resource");

        if request.mode == RequestMode::SameOrigin && !self.is_same_origin(&request.url) {
            warn!(url = %request.url, "Cross-origin request in same-origin mode");
            return Err(NetError::Blocked(request.url.to_string()));
        }

        let mut req_builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());

        if let Some(ref body) = request.body {
            req_builder = req_builder.body(body.clone());
        }

        if let Some(timeout) = request.timeout {
            req_builder = req_builder.timeout(timeout);
        }

        let response = req_builder.send().await.map_err(|e| {
            if e.is_timeout() {
                NetError::Timeout(request.timeout.unwrap_or(self.default_timeout))
            } else {
                NetError::HttpError(e)
            }
        })?;

        let url = response.url().clone();
        let response_type = self.classify(request, &url);
        if response_type == ResponseType::Opaque {
            trace!(url = %url, "Opaque response");
            return Ok(Response::opaque(url));
        }

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        trace!(
            url = %url,
            status = %status,
            response_type = ?response_type,
            body_len = body.len(),
            "Response received"
        );

        let mut out = Response::new(status.as_u16(), body)
            .with_type(response_type)
            .with_url(url);
        out.headers = headers;
        Ok(out)
    }
}
