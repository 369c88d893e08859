//! The cache manager: precache on install, prune old versions on activate,
//! cache-first fetch with an offline fallback, push notifications.

use async_trait::async_trait;
use futures::future::join_all;
use http::header::CONTENT_TYPE;
use http::HeaderValue;
use serde_json::json;
use shellcache_net::{Request, Response, ResponseType, UrlPattern};
use shellcache_sw::{
    CacheHandle, ClientMatchOptions, ClientType, ExtendableMessageEvent, FetchEvent,
    NotificationClickEvent, NotificationOptions, PushEvent, PushMessageData, ServiceWorkerError,
    ServiceWorkerHandler, WorkerGlobalScope,
};
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;

/// Message `type` that makes a waiting worker activate immediately.
pub const SKIP_WAITING_MESSAGE: &str = "SKIP_WAITING";

/// Offline cache worker for the app shell.
pub struct CacheManager {
    config: WorkerConfig,
    backend: Vec<UrlPattern>,
}

impl CacheManager {
    pub fn new(config: WorkerConfig) -> Self {
        let backend = config.backend_patterns();
        Self { config, backend }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Only GET requests that are not backend calls are handled.
    pub fn should_handle(&self, request: &Request) -> bool {
        request.is_get() && !UrlPattern::any_matches(&self.backend, &request.url)
    }

    fn precache_requests(&self, scope: &WorkerGlobalScope) -> Vec<Request> {
        self.config
            .precache
            .iter()
            .filter_map(|asset| match scope.resolve(asset) {
                Ok(url) => Some(Request::get(url)),
                Err(e) => {
                    warn!(asset = %asset, error = %e, "Skipping unresolvable asset");
                    None
                }
            })
            .collect()
    }

    async fn respond(&self, scope: &WorkerGlobalScope, request: &Request) -> Response {
        let cache = scope.caches().open(&self.config.cache_name).await;

        if let Some(cached) = cache.match_request(request).await {
            debug!(url = %request.url, "Serving from cache");
            return cached;
        }

        match scope.fetch(request).await {
            Ok(response) => {
                if response.status != 200 || response.response_type != ResponseType::Basic {
                    debug!(
                        url = %request.url,
                        status = response.status,
                        response_type = ?response.response_type,
                        "Not caching response"
                    );
                    return response;
                }

                self.store_in_background(scope, cache, request.clone(), response.clone())
                    .await;
                response
            }
            Err(e) => {
                error!(url = %request.url, error = %e, "Network request failed");
                self.offline_fallback(scope, &cache, request).await
            }
        }
    }

    async fn store_in_background(
        &self,
        scope: &WorkerGlobalScope,
        cache: CacheHandle,
        request: Request,
        response: Response,
    ) {
        scope
            .wait_until(async move {
                match cache.put(&request, &response).await {
                    Ok(()) => debug!(url = %request.url, "Cached new resource"),
                    Err(e) => warn!(url = %request.url, error = %e, "Failed to cache resource"),
                }
            })
            .await;
    }

    async fn offline_fallback(
        &self,
        scope: &WorkerGlobalScope,
        cache: &CacheHandle,
        request: &Request,
    ) -> Response {
        if request.accepts_html() {
            let shell = match scope.resolve(&self.config.shell_page) {
                Ok(url) => cache.match_request(&Request::get(url)).await,
                Err(e) => {
                    warn!(error = %e, "Shell page does not resolve");
                    None
                }
            };
            return match shell {
                Some(shell) => {
                    info!(url = %request.url, "Offline, serving shell page");
                    shell
                }
                None => {
                    warn!(url = %request.url, "Offline and shell page is not cached");
                    Response::network_error()
                }
            };
        }

        info!(url = %request.url, "Offline, serving placeholder");
        self.offline_response()
    }

    /// The 408 placeholder returned for non-HTML requests while offline.
    pub fn offline_response(&self) -> Response {
        Response::new(408, self.config.offline_message.clone()).with_header(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        )
    }
}

#[async_trait]
impl ServiceWorkerHandler for CacheManager {
    async fn on_install(&self, scope: &WorkerGlobalScope) -> Result<(), ServiceWorkerError> {
        info!(cache = %self.config.cache_name, "Installing");

        if self.config.skip_waiting_on_install {
            scope.skip_waiting();
        }

        let cache = scope.caches().open(&self.config.cache_name).await;
        let requests = self.precache_requests(scope);
        let count = requests.len();

        match cache.add_all(scope.network(), requests).await {
            Ok(()) => info!(assets = count, "Precache complete"),
            Err(e) => error!(error = %e, "Precache failed"),
        }
        Ok(())
    }

    async fn on_activate(&self, scope: &WorkerGlobalScope) -> Result<(), ServiceWorkerError> {
        info!(cache = %self.config.cache_name, "Activating");

        let stale: Vec<String> = scope
            .caches()
            .keys()
            .await
            .into_iter()
            .filter(|name| *name != self.config.cache_name)
            .collect();

        let deletions = stale.iter().map(|name| async move {
            let deleted = scope.caches().delete(name).await;
            (name, deleted)
        });
        for (name, deleted) in join_all(deletions).await {
            if deleted {
                info!(cache = %name, "Deleted stale cache");
            } else {
                warn!(cache = %name, "Stale cache was already gone");
            }
        }

        match scope.clients().claim().await {
            Ok(claimed) => info!(claimed, "Activated, clients claimed"),
            Err(e) => warn!(error = %e, "Claiming clients failed"),
        }
        Ok(())
    }

    async fn on_fetch(&self, scope: &WorkerGlobalScope, event: &FetchEvent) -> Option<Response> {
        if !self.should_handle(&event.request) {
            return None;
        }
        Some(self.respond(scope, &event.request).await)
    }

    async fn on_push(
        &self,
        scope: &WorkerGlobalScope,
        event: &PushEvent,
    ) -> Result<(), ServiceWorkerError> {
        info!(has_payload = event.data.is_some(), "Push received");

        let settings = &self.config.notifications;
        let body = event
            .data
            .as_ref()
            .map(PushMessageData::text)
            .unwrap_or_else(|| settings.default_body.clone());

        let options = NotificationOptions {
            body: Some(body),
            icon: Some(settings.icon.clone()),
            badge: Some(settings.badge.clone()),
            tag: None,
            vibrate: settings.vibrate.clone(),
            data: json!({ "url": settings.target_url }),
        };
        scope.show_notification(&settings.title, options).await;
        Ok(())
    }

    async fn on_notification_click(
        &self,
        scope: &WorkerGlobalScope,
        event: &NotificationClickEvent,
    ) -> Result<(), ServiceWorkerError> {
        info!(id = ?event.notification.id, "Notification clicked");

        scope.notifications().close(event.notification.id).await;

        let target = event
            .notification
            .data_str("url")
            .unwrap_or(self.config.notifications.target_url.as_str());

        let windows = scope
            .clients()
            .match_all(ClientMatchOptions {
                include_uncontrolled: true,
                client_type: ClientType::Window,
            })
            .await;

        if let Some(client) = windows.iter().find(|c| c.url.as_str().contains(target)) {
            debug!(client_id = %client.id, "Focusing existing window");
            scope.clients().focus(&client.id).await?;
            return Ok(());
        }

        debug!(url = target, "Opening new window");
        scope.clients().open_window(target).await?;
        Ok(())
    }

    async fn on_message(
        &self,
        scope: &WorkerGlobalScope,
        event: &ExtendableMessageEvent,
    ) -> Result<(), ServiceWorkerError> {
        debug!(data = %event.data, "Message received");

        if event.message_type() == Some(SKIP_WAITING_MESSAGE) {
            scope.skip_waiting();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn get(url: &str) -> Request {
        Request::get(Url::parse(url).unwrap())
    }

    #[test]
    fn test_should_handle() {
        let manager = CacheManager::new(WorkerConfig::default());

        assert!(manager.should_handle(&get("https://chart.example.com/index.html")));
        assert!(manager.should_handle(&get("https://cdn.jsdelivr.net/npm/chart.js")));
        assert!(!manager.should_handle(&get("https://abc.supabase.co/rest/v1/scores")));
        assert!(!manager.should_handle(&get("https://chart.example.com/api/scores")));

        let post = Request::post(
            Url::parse("https://chart.example.com/index.html").unwrap(),
            Default::default(),
        );
        assert!(!manager.should_handle(&post));
    }

    #[test]
    fn test_offline_response() {
        let manager = CacheManager::new(WorkerConfig::default());
        let response = manager.offline_response();

        assert_eq!(response.status, 408);
        assert_eq!(response.text().unwrap(), "网络不可用，请检查连接后重试");
        assert_eq!(
            response.headers.get(CONTENT_TYPE).unwrap(),
            "text/plain; charset=utf-8"
        );
    }
}
