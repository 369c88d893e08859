//! # shellcache common
//!
//! Error types and logging configuration shared by the shellcache crates.
//!
//! ## Features
//!
//! - Unified error type for configuration, storage and worker failures
//! - Logging configuration and setup
//! - Result extension trait

use thiserror::Error;

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat};

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Unified error type for shellcache.
#[derive(Error, Debug)]
pub enum ShellCacheError {
    /// Configuration errors.
    #[error("Config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// Network-related errors.
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// Cache storage errors.
    #[error("Storage error: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// Worker lifecycle or handler errors.
    #[error("Worker error: {message}")]
    Worker {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// I/O errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl ShellCacheError {
    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Create a config error with source.
    pub fn config_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a network error with source.
    pub fn network_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Network {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a storage error with source.
    pub fn storage_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a worker error with source.
    pub fn worker_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Worker {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Get the error category for reporting.
    pub fn category(&self) -> &'static str {
        match self {
            ShellCacheError::Config { .. } => "config",
            ShellCacheError::Network { .. } => "network",
            ShellCacheError::Storage { .. } => "storage",
            ShellCacheError::Worker { .. } => "worker",
            ShellCacheError::Io(_) => "io",
            ShellCacheError::InvalidArgument(_) => "invalid_argument",
        }
    }
}

/// Result type alias for shellcache operations.
pub type Result<T> = std::result::Result<T, ShellCacheError>;

/// Extension trait for Result.
pub trait ResultExt<T> {
    /// Wrap the error as a config error carrying `message`.
    fn config_context(self, message: impl Into<String>) -> Result<T>;

    /// Wrap the error as a storage error carrying `message`.
    fn storage_context(self, message: impl Into<String>) -> Result<T>;
}

impl<T, E: std::error::Error + Send + Sync + 'static> ResultExt<T> for std::result::Result<T, E> {
    fn config_context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| ShellCacheError::config_with_source(message, e))
    }

    fn storage_context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| ShellCacheError::storage_with_source(message, e))
    }
}
