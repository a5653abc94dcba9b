//! Process-wide tracing setup.
//!
//! `--stderr` runs print human-readable lines to the terminal. Everything
//! else goes to the systemd journal when one is reachable, and to a
//! daily-rolling file under the log directory when it is not.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_ENV: &str = "SHOEBOX_LOG";
const LOG_FILE: &str = "shoebox.log";

/// Keeps the background file writer alive until exit.
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    Stderr,
    /// Journal on Linux, rolling file otherwise.
    System,
}

/// Install the global subscriber. Verbosity comes from `SHOEBOX_LOG`
/// (any `EnvFilter` directive, `info` when unset).
pub fn init(target: LogTarget, log_dir: Option<PathBuf>) -> Result<()> {
    let registry = tracing_subscriber::registry().with(env_filter());

    if target == LogTarget::Stderr {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init()?;
        return Ok(());
    }

    #[cfg(target_os = "linux")]
    {
        if let Ok(journald) = tracing_journald::layer() {
            registry.with(journald).try_init()?;
            tracing::info!("logging to the systemd journal");
            return Ok(());
        }
    }

    let dir = log_dir.unwrap_or_else(default_log_dir);
    let writer = file_writer(&dir)?;
    registry
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .try_init()?;

    tracing::info!(dir = %dir.display(), "logging to rolling file");
    Ok(())
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"))
}

fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("shoebox")
        .join("logs")
}

fn file_writer(dir: &Path) -> Result<NonBlocking> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, LOG_FILE));
    // A second init keeps the first guard; its writer is never installed.
    let _ = FILE_GUARD.set(guard);
    Ok(writer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_log_dir_is_per_app() {
        assert!(default_log_dir().ends_with("shoebox/logs"));
    }

    #[test]
    fn test_file_writer_creates_missing_directory() {
        let dir = tempdir().unwrap();
        let logs = dir.path().join("nested").join("logs");
        file_writer(&logs).unwrap();
        assert!(logs.is_dir());
    }
}
