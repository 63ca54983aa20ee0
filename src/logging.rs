//! Logging
//!
//! Console and file logging built on tracing. Debug mode adds a daily-rotated
//! log file under the data directory; the console always stays on. `RUST_LOG`
//! overrides the default level filter in either mode.

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Logging configuration built in `main` before anything else runs.
pub struct LogConfig {
    debug: bool,
    log_dir: PathBuf,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self {
            debug: false,
            log_dir: default_log_dir(),
        }
    }

    /// Enable debug mode: lowers the default filter and writes log files.
    pub fn with_debug_mode(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Override the log file directory.
    pub fn with_log_dir(mut self, dir: PathBuf) -> Self {
        self.log_dir = dir;
        self
    }
}

/// Keeps the non-blocking file writer alive. Hold this for the process
/// lifetime; dropping it flushes and stops the background writer thread.
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Initialize the global tracing subscriber. Call exactly once.
pub fn init_logging(config: LogConfig) -> Result<LogGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if config.debug { "debug" } else { "info" }));

    if config.debug {
        fs::create_dir_all(&config.log_dir)
            .with_context(|| format!("failed to create log directory {:?}", config.log_dir))?;
        let appender = tracing_appender::rolling::daily(&config.log_dir, "wagate.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false))
            .with(fmt::layer().with_ansi(false).with_writer(writer))
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to set tracing subscriber: {e}"))?;

        Ok(LogGuard {
            _file_guard: Some(guard),
        })
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false))
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to set tracing subscriber: {e}"))?;

        Ok(LogGuard { _file_guard: None })
    }
}

/// Remove log files older than `days` from the default log directory.
/// Returns the number of files removed.
pub fn cleanup_old_logs(days: u64) -> Result<usize> {
    let dir = default_log_dir();
    if !dir.exists() {
        return Ok(0);
    }

    let cutoff = Duration::from_secs(days * 24 * 60 * 60);
    let now = SystemTime::now();
    let mut removed = 0;

    for entry in fs::read_dir(&dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
            continue;
        };
        if let Ok(age) = now.duration_since(modified)
            && age > cutoff
            && fs::remove_file(&path).is_ok()
        {
            removed += 1;
        }
    }

    Ok(removed)
}

fn default_log_dir() -> PathBuf {
    crate::config::wagate_home().join("logs")
}
