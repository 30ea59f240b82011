//! Logging setup for transit-core.
//!
//! All output goes to stderr, optionally mirrored to a rolling log file.
//!
//! # Environment Variables
//!
//! - `TRANSIT_LOG` - Log filter (overrides RUST_LOG)
//! - `TRANSIT_LOG_LEVEL` - Log level: error, warn, info, debug, trace
//! - `TRANSIT_LOG_FORMAT` - Output format: pretty, compact, json
//! - `TRANSIT_LOG_FILE` - Path to log file (in addition to stderr)
//! - `RUST_LOG` - Standard Rust log filter (fallback)
//!
//! # Example
//!
//! ```no_run
//! use transit_core::logging::{LogConfig, init};
//!
//! init(LogConfig::for_server().with_env_overrides());
//! ```

use std::path::{Path, PathBuf};

use clap::ValueEnum;
use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Multi-line, human-readable
    #[default]
    #[value(alias = "full")]
    Pretty,
    /// One line per event
    Compact,
    /// JSON lines for log shippers
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Base log level (default: INFO)
    pub level: Level,
    pub format: LogFormat,
    /// Mirror output to this file, rotated daily
    pub file_path: Option<PathBuf>,
    /// Log span durations on close
    pub span_events: bool,
    /// Filter directive; wins over `level` when set
    pub filter: Option<String>,
    pub show_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            file_path: None,
            span_events: false,
            filter: None,
            show_target: true,
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preset for the HTTP server.
    pub fn for_server() -> Self {
        Self::default()
    }

    /// Preset for reference worker processes.
    ///
    /// Workers share stderr with the readiness marker, so they stay quiet
    /// unless asked otherwise.
    pub fn for_worker() -> Self {
        Self {
            level: Level::WARN,
            format: LogFormat::Compact,
            show_target: false,
            ..Self::default()
        }
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_file(mut self, path: PathBuf) -> Self {
        self.file_path = Some(path);
        self
    }

    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.span_events = enabled;
        self
    }

    pub fn with_filter(mut self, filter: String) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Apply `TRANSIT_LOG*` and `RUST_LOG` from the process environment.
    ///
    /// A filter already set from the command line is kept.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if self.filter.is_none() {
            self.filter = var("TRANSIT_LOG").or_else(|| var("RUST_LOG"));
        }

        if self.filter.is_none()
            && let Some(Ok(level)) = var("TRANSIT_LOG_LEVEL").map(|l| l.parse::<Level>())
        {
            self.level = level;
        }

        if let Some(format) = var("TRANSIT_LOG_FORMAT")
            && let Ok(format) = LogFormat::from_str(&format, true)
        {
            self.format = format;
        }

        if let Some(path) = var("TRANSIT_LOG_FILE") {
            self.file_path = Some(PathBuf::from(path));
        }

        self
    }

    fn build_filter(&self) -> EnvFilter {
        let fallback = || EnvFilter::new(self.level.to_string().to_lowercase());
        match &self.filter {
            Some(filter) => EnvFilter::try_new(filter).unwrap_or_else(|_| {
                eprintln!("Warning: Invalid log filter '{}', using default", filter);
                fallback()
            }),
            None => fallback(),
        }
    }

    fn span_events(&self) -> FmtSpan {
        if self.span_events {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn fmt_layer<W>(config: &LogConfig, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_span_events(config.span_events())
        .with_target(config.show_target)
        .with_ansi(ansi)
        .with_writer(writer);

    match config.format {
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
        LogFormat::Pretty => layer.boxed(),
    }
}

fn file_appender(path: &Path) -> RollingFileAppender {
    let parent = path.parent().unwrap_or(Path::new("."));
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("transit-core.log");
    RollingFileAppender::new(Rotation::DAILY, parent, file_name)
}

/// Install the global subscriber.
///
/// Call once at startup; later calls are ignored.
pub fn init(config: LogConfig) {
    let mut layers = vec![fmt_layer(&config, std::io::stderr, true)];
    if let Some(path) = &config.file_path {
        layers.push(fmt_layer(&config, file_appender(path), false));
    }

    // Already initialized is fine.
    let _ = tracing_subscriber::registry()
        .with(layers)
        .with(config.build_filter())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_log_format_names() {
        assert_eq!(LogFormat::from_str("full", true), Ok(LogFormat::Pretty));
        assert_eq!(LogFormat::from_str("JSON", true), Ok(LogFormat::Json));
        assert!(LogFormat::from_str("xml", true).is_err());
    }

    #[test]
    fn test_unknown_env_values_ignored() {
        let config = LogConfig::for_worker().with_overrides_from(env(&[
            ("TRANSIT_LOG_LEVEL", "loud"),
            ("TRANSIT_LOG_FORMAT", "xml"),
        ]));
        assert_eq!(config.level, Level::WARN);
        assert_eq!(config.format, LogFormat::Compact);
    }

    #[test]
    fn test_transit_log_beats_rust_log() {
        let config = LogConfig::new().with_overrides_from(env(&[
            ("TRANSIT_LOG", "transit_core=trace"),
            ("RUST_LOG", "warn"),
        ]));
        assert_eq!(config.filter.as_deref(), Some("transit_core=trace"));
    }

    #[test]
    fn test_cli_filter_is_kept() {
        let config = LogConfig::new()
            .with_filter("debug".to_string())
            .with_overrides_from(env(&[("RUST_LOG", "error"), ("TRANSIT_LOG_LEVEL", "trace")]));
        assert_eq!(config.filter.as_deref(), Some("debug"));
        assert_eq!(config.level, Level::INFO);
    }

    #[test]
    fn test_level_format_and_file_overrides() {
        let config = LogConfig::new().with_overrides_from(env(&[
            ("TRANSIT_LOG_LEVEL", "debug"),
            ("TRANSIT_LOG_FORMAT", "json"),
            ("TRANSIT_LOG_FILE", "/var/log/transit-core.log"),
        ]));
        assert_eq!(config.level, Level::DEBUG);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.file_path, Some(PathBuf::from("/var/log/transit-core.log")));
    }

    #[test]
    fn test_worker_preset_is_quiet() {
        let config = LogConfig::for_worker();
        assert_eq!(config.level, Level::WARN);
        assert_eq!(config.format, LogFormat::Compact);
    }
}
