//! Subscriber setup for the shellcache binaries.
//!
//! Library crates only emit `tracing` events. The binary hosting the worker
//! calls [`init_logging`] once at startup. Output goes to stderr so stdout
//! stays free for machine-readable reports.

use tracing::Level;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, registry::Registry, util::SubscriberInitExt, EnvFilter, Layer,
};

/// Targets that follow [`LogConfig::level`]. Everything else (reqwest, hyper,
/// rustls) is held at `warn`.
const WORKSPACE_TARGETS: &[&str] = &[
    "shellcache_common",
    "shellcache_net",
    "shellcache_sw",
    "shellcache_worker",
    "shellcache_smoke",
];

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, for a developer terminal.
    #[default]
    Pretty,
    /// One line per event.
    Compact,
    /// One JSON object per event, for log shippers.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Level for the workspace crates.
    pub level: Level,
    pub format: LogFormat,
    /// Print file and line with each event (pretty format only).
    pub include_location: bool,
    /// `EnvFilter` directives, e.g. "shellcache_sw=trace,reqwest=debug".
    /// Replaces both `level` and `RUST_LOG` when it parses.
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            include_location: false,
            filter: None,
        }
    }
}

impl LogConfig {
    /// Settings for a command-line tool: quiet unless `verbose`, JSON
    /// when `json`.
    pub fn cli(verbose: bool, json: bool) -> Self {
        Self {
            level: if verbose { Level::DEBUG } else { Level::WARN },
            format: if json {
                LogFormat::Json
            } else {
                LogFormat::Compact
            },
            ..Default::default()
        }
    }

    /// Directives used when neither `filter` nor `RUST_LOG` applies.
    fn default_directives(&self) -> String {
        let level = self.level.to_string().to_ascii_lowercase();
        std::iter::once("warn".to_string())
            .chain(WORKSPACE_TARGETS.iter().map(|target| format!("{target}={level}")))
            .collect::<Vec<_>>()
            .join(",")
    }

    fn env_filter(&self) -> EnvFilter {
        if let Some(filter) = self
            .filter
            .as_deref()
            .and_then(|directives| EnvFilter::try_new(directives).ok())
        {
            return filter;
        }
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.default_directives()))
    }
}

/// Install the global subscriber. Call once per process.
pub fn init_logging(config: LogConfig) {
    let layer: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Pretty => fmt::layer()
            .with_writer(std::io::stderr)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Json => fmt::layer().json().with_writer(std::io::stderr).boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(config.env_filter())
        .init();
}
