//! Logging initialization built on tracing
//!
//! Console output is always enabled and filtered through `RUST_LOG` (or the
//! configured default level). File output is optional: when a directory is
//! given, a daily-rolling file appender is layered in with a non-blocking
//! writer whose guard must be held for the lifetime of the process.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Logging configuration, normally taken from CLI args / service config
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Default level directive when `RUST_LOG` is not set (e.g. "info")
    pub level: String,
    /// Optional directory for rolling file output; console-only when `None`
    pub dir: Option<PathBuf>,
    /// File name prefix for the rolling appender
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
            file_prefix: "collsrv".to_string(),
        }
    }
}

/// Keeps the non-blocking writer alive; dropping it flushes and stops the
/// background worker.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Initialize the global tracing subscriber.
///
/// Returns a guard that must be kept alive in `main` for file logging to
/// flush. Calling this twice returns an error from `try_init`.
pub fn init_logging(config: &LoggingConfig) -> Result<LoggingGuard> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .context("invalid log filter directive")?;

    let console_layer = fmt::layer().with_target(true);

    match &config.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, &config.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file_layer = fmt::layer().with_ansi(false).with_writer(writer);

            tracing_subscriber::registry()
                .with(filter)
                .with(console_layer)
                .with(file_layer)
                .try_init()
                .context("failed to install tracing subscriber")?;

            Ok(LoggingGuard {
                _file_guard: Some(guard),
            })
        },
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(console_layer)
                .try_init()
                .context("failed to install tracing subscriber")?;

            Ok(LoggingGuard { _file_guard: None })
        },
    }
}
