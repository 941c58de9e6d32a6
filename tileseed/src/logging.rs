//! Logging setup.
//!
//! Structured logging to two sinks:
//! - `logs/tileseed.log`, cleared at the start of every session
//! - stderr, so stdout stays free for tile lists
//!
//! Filtering follows `RUST_LOG` and defaults to `info`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Default log directory, relative to the working directory.
pub const DEFAULT_LOG_DIR: &str = "logs";

/// Default log file name.
pub const DEFAULT_LOG_FILE: &str = "tileseed.log";

/// Keeps the background log writer alive.
///
/// Dropping the guard flushes and closes the log file.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
}

/// Creates `log_dir` if needed and truncates `log_file` inside it.
fn prepare_log_file(log_dir: &Path, log_file: &str) -> io::Result<PathBuf> {
    fs::create_dir_all(log_dir)?;
    let path = log_dir.join(log_file);
    fs::write(&path, "")?;
    Ok(path)
}

/// Installs the global subscriber.
///
/// # Errors
///
/// Fails if the log directory cannot be created or the log file cannot be
/// truncated.
pub fn init_logging(log_dir: &Path, log_file: &str) -> io::Result<LoggingGuard> {
    prepare_log_file(log_dir, log_file)?;

    let file_appender = tracing_appender::rolling::never(log_dir, log_file);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .with_target(true);

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .compact();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stderr_layer)
        .init();

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // init_logging installs a global subscriber and can only run once per
    // process, so the file handling is tested on its own.

    #[test]
    fn test_prepare_creates_nested_directory() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("a/b/logs");

        let path = prepare_log_file(&log_dir, DEFAULT_LOG_FILE).unwrap();
        assert!(path.exists());
        assert_eq!(path, log_dir.join("tileseed.log"));
    }

    #[test]
    fn test_prepare_clears_previous_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.log");
        fs::write(&path, "old session").unwrap();

        prepare_log_file(dir.path(), "run.log").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn test_prepare_fails_when_dir_is_a_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(prepare_log_file(file.path(), "x.log").is_err());
    }

    #[test]
    fn test_guard_holds_worker() {
        let (_writer, guard) = tracing_appender::non_blocking(io::sink());
        let _guard = LoggingGuard { _file_guard: guard };
    }
}
