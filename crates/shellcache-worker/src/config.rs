//! Worker configuration

use serde::{Deserialize, Serialize};
use shellcache_common::{Result, ResultExt, ShellCacheError};
use shellcache_net::UrlPattern;
use std::path::Path;

/// Cache manager configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Name of the current cache version. Bumping it invalidates every
    /// older cache on the next activation.
    pub cache_name: String,

    /// Assets added to the cache at install time, relative to the scope
    pub precache: Vec<String>,

    /// Page served to HTML requests while offline
    pub shell_page: String,

    /// URL substrings that mark backend calls; matching requests are
    /// never touched by the worker
    pub backend_markers: Vec<String>,

    /// Body of the 408 response for non-HTML requests while offline
    pub offline_message: String,

    /// Call skip-waiting at the start of install
    pub skip_waiting_on_install: bool,

    /// Push notification settings
    pub notifications: NotificationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Notification title
    pub title: String,

    /// Body used when a push carries no payload
    pub default_body: String,

    pub icon: String,

    pub badge: String,

    /// Vibration pattern in milliseconds
    pub vibrate: Vec<u32>,

    /// Page focused or opened on click
    pub target_url: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let mut precache = vec![
            "/".to_string(),
            "/index.html".to_string(),
            "https://cdnjs.cloudflare.com/ajax/libs/font-awesome/6.0.0/css/all.min.css".to_string(),
            "https://cdn.jsdelivr.net/npm/@supabase/supabase-js@2".to_string(),
            "柱形.png".to_string(),
            "折线.png".to_string(),
            "饼图.png".to_string(),
        ];
        precache.extend(
            [72, 96, 128, 144, 152, 192, 384, 512]
                .iter()
                .map(|size| format!("icons/icon-{size}x{size}.png")),
        );

        Self {
            cache_name: "chart-master-v1.0.0".to_string(),
            precache,
            shell_page: "/index.html".to_string(),
            backend_markers: vec!["supabase".to_string(), "api".to_string()],
            offline_message: "网络不可用，请检查连接后重试".to_string(),
            skip_waiting_on_install: true,
            notifications: NotificationConfig::default(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            title: "图表大师认证".to_string(),
            default_body: "图表大师认证挑战有新消息".to_string(),
            icon: "icons/icon-192x192.png".to_string(),
            badge: "icons/icon-72x72.png".to_string(),
            vibrate: vec![200, 100, 200],
            target_url: "/index.html".to_string(),
        }
    }
}

impl WorkerConfig {
    /// Load config from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .config_context(format!("Failed to read {}", path.display()))?;
        let config: Self = serde_json::from_str(&contents)
            .config_context(format!("Failed to parse {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to disk
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .config_context("Failed to serialize worker config")?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache_name.trim().is_empty() {
            return Err(ShellCacheError::config("cache_name must not be empty"));
        }
        if self.shell_page.trim().is_empty() {
            return Err(ShellCacheError::config("shell_page must not be empty"));
        }
        Ok(())
    }

    /// Backend markers as substring patterns.
    pub fn backend_patterns(&self) -> Vec<UrlPattern> {
        self.backend_markers
            .iter()
            .map(|marker| UrlPattern::contains(marker))
            .collect()
    }
}
