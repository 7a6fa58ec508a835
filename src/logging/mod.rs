//! Logging infrastructure - structured tracing for pools and managers
//!
//! Design: Uses `tracing` for structured, contextual logging with:
//! - Configurable log levels, env filter override
//! - Zero-cost when disabled
//! - Optional span events
//! - Console or file output, human-readable or JSON
//!
//! The runtime never installs a subscriber on its own. Embedders call
//! [`init`] or [`init_with_config`] once; events emitted before that are
//! simply dropped. Failures are always returned to callers, the events here
//! are diagnostics only.

use once_cell::sync::OnceCell;
use std::io;
use std::path::Path;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

pub use tracing::{debug, error, info, trace, warn};

/// Event target for pool internals
pub const COLONY_TARGET: &str = "colony";
/// Event target for type registration and instance lifecycle
pub const OBJECTS_TARGET: &str = "objects";

/// Global logging state; holds the file writer guard when file output is on
static LOGGER_INITIALIZED: OnceCell<Option<WorkerGuard>> = OnceCell::new();

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default log level
    pub level: Level,
    /// Enable file logging
    pub file_output: bool,
    /// Log file path (if file_output enabled)
    pub log_path: Option<String>,
    /// Enable JSON format (vs human-readable)
    pub json_format: bool,
    /// Show span events (enter/exit)
    pub show_spans: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            file_output: false,
            log_path: None,
            json_format: false,
            show_spans: false,
        }
    }
}

impl LogConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // COLONY_LOG_LEVEL: trace, debug, info, warn, error
        if let Ok(level_str) = std::env::var("COLONY_LOG_LEVEL") {
            config.level = parse_level(&level_str);
        }

        // COLONY_LOG_FILE: path to log file
        if let Ok(path) = std::env::var("COLONY_LOG_FILE") {
            config.file_output = true;
            config.log_path = Some(path);
        }

        // COLONY_LOG_JSON: enable JSON format
        config.json_format = std::env::var("COLONY_LOG_JSON").is_ok();

        // COLONY_LOG_SPANS: show span events
        config.show_spans = std::env::var("COLONY_LOG_SPANS").is_ok();

        config
    }

    /// Create high-performance config (minimal logging)
    pub fn performance() -> Self {
        Self {
            level: Level::ERROR,
            ..Self::default()
        }
    }

    /// Create debug config (verbose logging)
    pub fn debug() -> Self {
        Self {
            level: Level::TRACE,
            file_output: true,
            log_path: Some("colony_runtime.log".to_string()),
            json_format: false,
            show_spans: true,
        }
    }
}

fn parse_level(value: &str) -> Level {
    match value.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Initialize logging with default configuration
pub fn init() {
    init_with_config(LogConfig::from_env());
}

/// Initialize logging with custom configuration
///
/// Only the first call has any effect. If another subscriber is already
/// installed globally, that one is kept.
pub fn init_with_config(config: LogConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            let level = config.level.as_str().to_lowercase();
            EnvFilter::new(format!(
                "colony_runtime={level},{COLONY_TARGET}={level},{OBJECTS_TARGET}={level}"
            ))
        });

        let span_events = if config.show_spans {
            FmtSpan::ENTER | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };

        let (writer, guard) = match config.log_path.as_deref().filter(|_| config.file_output) {
            Some(path) => {
                let path = Path::new(path);
                let directory = path
                    .parent()
                    .filter(|dir| !dir.as_os_str().is_empty())
                    .unwrap_or_else(|| Path::new("."));
                let file_name = path
                    .file_name()
                    .map(|name| name.to_os_string())
                    .unwrap_or_else(|| "colony_runtime.log".into());
                let appender = tracing_appender::rolling::never(directory, file_name);
                let (writer, guard) = tracing_appender::non_blocking(appender);
                (fmt::writer::BoxMakeWriter::new(writer), Some(guard))
            }
            None => (fmt::writer::BoxMakeWriter::new(io::stderr), None),
        };

        let layer = if config.json_format {
            fmt::layer()
                .json()
                .with_writer(writer)
                .with_span_events(span_events)
                .with_target(true)
                .boxed()
        } else {
            fmt::layer()
                .with_writer(writer)
                .with_span_events(span_events)
                .with_target(true)
                .with_thread_ids(cfg!(debug_assertions))
                .with_line_number(cfg!(debug_assertions))
                .boxed()
        };

        // Ignore error if a global subscriber was installed elsewhere
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer)
            .try_init()
            .ok();

        guard
    });
}

/// Check if logging is initialized
pub fn is_initialized() -> bool {
    LOGGER_INITIALIZED.get().is_some()
}

// ============================================================================
// Runtime-specific logging functions
// ============================================================================

/// Log a newly mapped bucket
#[inline]
pub fn log_bucket_mapped(index: usize, bytes: usize, slots: usize) {
    debug!(
        target: "colony",
        event = "bucket_mapped",
        index,
        bytes,
        slots,
        "Bucket mapped"
    );
}

/// Log a bucket released by compaction or pool teardown
#[inline]
pub fn log_bucket_released(index: usize, bytes: usize) {
    debug!(
        target: "colony",
        event = "bucket_released",
        index,
        bytes,
        "Bucket released"
    );
}

/// Log a failed slot reservation
#[inline]
pub fn log_pool_exhausted(buckets: usize, slot_size: usize) {
    warn!(
        target: "colony",
        event = "pool_exhausted",
        buckets,
        slot_size,
        "No slot available"
    );
}

/// Log a pool dropped while slots were still registered
#[inline]
pub fn log_pool_dropped_live(live: usize) {
    warn!(
        target: "colony",
        event = "pool_dropped_live",
        live,
        "Colony released with unfinalized slots"
    );
}

/// Log a type registration
#[inline]
pub fn log_manager_created(type_name: &str, depth: usize, slot_size: usize) {
    debug!(
        target: "objects",
        event = "manager_created",
        type_name,
        depth,
        slot_size,
        "Object manager created"
    );
}

/// Log manager teardown
#[inline]
pub fn log_manager_destroyed(type_name: &str, finalized: usize) {
    debug!(
        target: "objects",
        event = "manager_destroyed",
        type_name,
        finalized,
        "Object manager destroyed"
    );
}

/// Log a rolled back instance creation
#[inline]
pub fn log_instance_rollback(type_name: &str, reason: &str) {
    trace!(
        target: "objects",
        event = "instance_rollback",
        type_name,
        reason,
        "Instance creation rolled back"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_creation() {
        let config = LogConfig::default();
        assert_eq!(config.level, Level::INFO);
        assert!(!config.file_output);

        let perf_config = LogConfig::performance();
        assert_eq!(perf_config.level, Level::ERROR);

        let debug_config = LogConfig::debug();
        assert_eq!(debug_config.level, Level::TRACE);
        assert!(debug_config.show_spans);
    }

    #[test]
    fn test_parse_level_falls_back_to_info() {
        assert_eq!(parse_level("TRACE"), Level::TRACE);
        assert_eq!(parse_level("warn"), Level::WARN);
        assert_eq!(parse_level("loud"), Level::INFO);
    }

    #[test]
    fn test_init_idempotent() {
        init_with_config(LogConfig::performance());
        init_with_config(LogConfig::default()); // Should not panic
        assert!(is_initialized());

        // These should not panic once a subscriber may be installed
        log_bucket_mapped(0, 4096, 170);
        log_bucket_released(1, 8192);
        log_manager_created("Probe", 0, 24);
        log_manager_destroyed("Probe", 3);
        log_instance_rollback("Probe", "init");
    }
}
