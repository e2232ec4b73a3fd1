//! Structured logging setup.
//!
//! This module provides:
//! - Pretty or compact formatting for terminals
//! - JSON formatting for log shippers
//! - An optional JSONL sink under `<output_root>/.ggen-logs`, written through
//!   a non-blocking appender that drops events rather than block or fail a run
//! - Contextual fields (service, version)

use anyhow::{Context, Result};
use std::env;
use std::io;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Directory (under the output root) for the JSONL sink
pub const LOG_DIR: &str = ".ggen-logs";
const SINK_FILE: &str = "sync.jsonl";

/// Configuration for logging setup.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Console format: "json", "pretty" or "compact"
    pub format: LogFormat,
    /// Console output: "stdout", "stderr", or "file"
    pub output: LogOutput,
    /// Directory for log files (when output is "file")
    pub log_dir: PathBuf,
    /// Log file name prefix
    pub log_file_prefix: String,
    /// Service name for structured logs
    pub service_name: String,
    /// Service version for structured logs
    pub service_version: String,
    /// Extra JSONL sink directory, in addition to the console output
    pub json_sink_dir: Option<PathBuf>,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Multi-line human-readable output with span events
    Pretty,
    /// Single-line human-readable output
    Compact,
}

/// Log output destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    Stdout,
    Stderr,
    /// Daily-rotated file in `log_dir`
    File,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Compact,
            output: LogOutput::Stderr,
            log_dir: PathBuf::from("logs"),
            log_file_prefix: "ggen-sync".to_string(),
            service_name: env!("CARGO_PKG_NAME").to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            json_sink_dir: None,
        }
    }
}

impl LoggingConfig {
    /// Create a new logging configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(format) = env::var("LOG_FORMAT") {
            config.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                "compact" => LogFormat::Compact,
                _ => config.format,
            };
        }

        if let Ok(output) = env::var("LOG_OUTPUT") {
            config.output = match output.to_lowercase().as_str() {
                "stdout" => LogOutput::Stdout,
                "stderr" => LogOutput::Stderr,
                "file" => LogOutput::File,
                _ => config.output,
            };
        }

        if let Ok(log_dir) = env::var("LOG_DIR") {
            config.log_dir = PathBuf::from(log_dir);
        }

        config
    }

    /// Also write JSON lines to `<output_root>/.ggen-logs/sync.jsonl`
    pub fn with_json_sink(mut self, output_root: &Path) -> Self {
        self.json_sink_dir = Some(output_root.join(LOG_DIR));
        self
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Initialize structured logging with the given configuration.
///
/// Returns the appender guards; hold them until exit so buffered events are
/// flushed.
pub fn init_logging(config: LoggingConfig) -> Result<Vec<WorkerGuard>> {
    let mut guards = Vec::new();

    let (writer, guard) = match config.output {
        LogOutput::Stdout => tracing_appender::non_blocking(io::stdout()),
        LogOutput::Stderr => tracing_appender::non_blocking(io::stderr()),
        LogOutput::File => {
            std::fs::create_dir_all(&config.log_dir).context("Failed to create log directory")?;
            let file_appender =
                tracing_appender::rolling::daily(&config.log_dir, &config.log_file_prefix);
            tracing_appender::non_blocking(file_appender)
        }
    };
    guards.push(guard);

    let console: BoxedLayer = match config.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(writer)
            .with_target(true)
            .with_level(true)
            .with_current_span(true)
            .with_filter(env_filter())
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_writer(writer)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
            .with_filter(env_filter())
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(writer)
            .with_target(false)
            .with_filter(env_filter())
            .boxed(),
    };

    let mut layers = vec![console];
    let mut sink_error = None;
    if let Some(dir) = config.json_sink_dir.as_deref() {
        match std::fs::create_dir_all(dir) {
            Ok(()) => {
                let (sink_writer, sink_guard) =
                    tracing_appender::non_blocking(tracing_appender::rolling::never(dir, SINK_FILE));
                guards.push(sink_guard);
                layers.push(
                    fmt::layer()
                        .json()
                        .with_writer(sink_writer)
                        .with_ansi(false)
                        .with_current_span(true)
                        .with_span_list(false)
                        .with_filter(env_filter())
                        .boxed(),
                );
            }
            Err(e) => sink_error = Some(e),
        }
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .context("a global tracing subscriber is already installed")?;

    if let (Some(dir), Some(e)) = (config.json_sink_dir.as_deref(), sink_error) {
        tracing::warn!(dir = %dir.display(), error = %e, "JSON log sink disabled");
    }

    tracing::debug!(
        service = %config.service_name,
        version = %config.service_version,
        format = ?config.format,
        output = ?config.output,
        "logging initialized"
    );

    Ok(guards)
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Log a slow operation warning.
///
/// Operations over the threshold are logged at WARN, the rest at DEBUG.
#[macro_export]
macro_rules! log_slow_operation {
    ($duration:expr, $threshold_ms:expr, $($arg:tt)*) => {
        {
            let duration_ms = $duration.as_millis() as u64;
            if duration_ms > $threshold_ms {
                tracing::warn!(
                    duration_ms = duration_ms,
                    threshold_ms = $threshold_ms,
                    $($arg)*
                );
            } else {
                tracing::debug!(
                    duration_ms = duration_ms,
                    $($arg)*
                );
            }
        }
    };
}
