//! Tracing setup.
//!
//! Events go to a daily-rotated file under the logs directory; stdout stays
//! reserved for the chat transcript. The filter comes from `CARDIOCHAT_LOG`
//! (e.g. `cardiochat_core=debug`), defaulting to [`DEFAULT_FILTER`].

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Environment variable holding the filter directives.
pub const LOG_ENV: &str = "CARDIOCHAT_LOG";

/// Filter used when `CARDIOCHAT_LOG` is unset or invalid.
pub const DEFAULT_FILTER: &str = "cardiochat=info,cardiochat_core=info";

/// Log file name prefix inside the logs directory.
pub const LOG_FILE_NAME: &str = "cardiochat.log";

/// Builds the filter from `CARDIOCHAT_LOG`, falling back to the default.
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Installs the global subscriber writing to `log_dir`.
///
/// The returned guard flushes buffered events on drop; keep it alive for the
/// lifetime of the process.
///
/// # Errors
/// Returns an error if the directory cannot be created or a global
/// subscriber is already installed.
pub fn init(log_dir: &Path) -> Result<WorkerGuard> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_NAME)
        .build(log_dir)
        .with_context(|| format!("Failed to open log file in {}", log_dir.display()))?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_level(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    tracing::debug!(dir = %log_dir.display(), "logging initialized");
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_parses() {
        let filter = EnvFilter::try_new(DEFAULT_FILTER);
        assert!(filter.is_ok());
    }

    #[test]
    fn test_init_creates_log_directory() {
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path().join("nested").join("logs");
        // A subscriber may already be installed by another test in this
        // process; the directory must exist either way.
        let _guard = init(&logs);
        assert!(logs.is_dir());
    }
}
