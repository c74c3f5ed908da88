//! Logging setup for applications embedding apiflow.
//!
//! The library itself only emits `tracing` events. Binaries call one of the
//! initializers here once at startup:
//! - [`init_logging`] prints to stdout
//! - [`init_file_logging`] also writes to a file (cleared on session start)
//!
//! Both honour the `RUST_LOG` environment variable and default to `info`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "info";

/// Errors raised while installing the global subscriber.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to prepare log file: {0}")]
    Io(#[from] io::Error),

    #[error("global subscriber already installed")]
    AlreadyInitialized,
}

/// Guard that must be kept alive for the duration of logging.
///
/// Dropping this guard flushes and closes the log file writer, if any.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Initialize stdout logging.
///
/// # Errors
///
/// Returns `AlreadyInitialized` if a global subscriber is already set.
pub fn init_logging() -> Result<LoggingGuard, LoggingError> {
    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_target(true);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(stdout_layer)
        .try_init()
        .map_err(|_| LoggingError::AlreadyInitialized)?;

    Ok(LoggingGuard { _file_guard: None })
}

/// Initialize logging to stdout and to `log_dir/log_file`.
///
/// Creates the directory if needed and clears any previous log file.
///
/// # Errors
///
/// Returns `Io` if the directory or file cannot be prepared, and
/// `AlreadyInitialized` if a global subscriber is already set.
pub fn init_file_logging(
    log_dir: impl AsRef<Path>,
    log_file: &str,
) -> Result<LoggingGuard, LoggingError> {
    let log_dir = log_dir.as_ref();
    prepare_log_file(log_dir, log_file)?;

    let file_appender = tracing_appender::rolling::never(log_dir, log_file);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .with_span_events(FmtSpan::CLOSE);

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_ansi(true);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(file_layer)
        .with(stdout_layer)
        .try_init()
        .map_err(|_| LoggingError::AlreadyInitialized)?;

    Ok(LoggingGuard {
        _file_guard: Some(file_guard),
    })
}

/// Creates `log_dir` and truncates `log_file` inside it.
pub fn prepare_log_file(log_dir: &Path, log_file: &str) -> io::Result<PathBuf> {
    fs::create_dir_all(log_dir)?;
    let log_path = log_dir.join(log_file);
    fs::write(&log_path, "")?;
    Ok(log_path)
}

/// Get default log directory path.
pub fn default_log_dir() -> &'static str {
    "logs"
}

/// Get default log file name.
pub fn default_log_file() -> &'static str {
    "apiflow.log"
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_paths() {
        assert_eq!(default_log_dir(), "logs");
        assert_eq!(default_log_file(), "apiflow.log");
    }

    #[test]
    fn test_creates_directory_and_file() {
        let temp = TempDir::new().expect("temp dir");
        let log_dir = temp.path().join("nested").join("logs");

        let path = prepare_log_file(&log_dir, "test.log").expect("prepare");

        assert!(log_dir.exists());
        assert_eq!(path, log_dir.join("test.log"));
        assert_eq!(fs::read_to_string(&path).expect("read"), "");
    }

    #[test]
    fn test_clears_existing_file() {
        let temp = TempDir::new().expect("temp dir");
        let log_path = temp.path().join("test.log");
        fs::write(&log_path, "old log data").expect("write");

        prepare_log_file(temp.path(), "test.log").expect("prepare");

        assert_eq!(fs::read_to_string(&log_path).expect("read"), "");
    }

    #[test]
    fn test_file_logging_writes_events() {
        let temp = TempDir::new().expect("temp dir");

        // Only one global subscriber per process; another test binary may
        // have installed one already.
        match init_file_logging(temp.path(), "events.log") {
            Ok(guard) => {
                tracing::warn!(target: "apiflow::logging", "logging initialized");
                drop(guard);
                let contents =
                    fs::read_to_string(temp.path().join("events.log")).expect("read log");
                assert!(contents.contains("logging initialized"));
            }
            Err(LoggingError::AlreadyInitialized) => {}
            Err(other) => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_second_init_reports_already_initialized() {
        let first = init_logging();
        let second = init_logging();
        assert!(matches!(second, Err(LoggingError::AlreadyInitialized)));
        drop(first);
    }
}
