//! Subscriber setup for the replay binary.

use std::io;
use std::path::Path;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;

const LOG_FILE_PREFIX: &str = "attention-adm.log";

/// Keeps the background file writer alive. Dropping it flushes pending lines.
pub struct FileLogGuard {
    _guard: WorkerGuard,
}

pub fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Daily-rolling non-blocking writer under `dir`, which is created if missing.
pub fn file_writer(dir: &Path) -> io::Result<(NonBlocking, WorkerGuard)> {
    std::fs::create_dir_all(dir)?;
    let appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE_PREFIX);
    Ok(tracing_appender::non_blocking(appender))
}

/// Installs the global subscriber. Console output goes to stderr so stdout
/// stays free for round outcomes; `config.log_dir` adds a plain-text file copy.
pub fn init_tracing(config: &Config) -> Option<FileLogGuard> {
    let (writer, file_error) = match config.log_dir.as_deref().map(file_writer) {
        Some(Ok(writer)) => (Some(writer), None),
        Some(Err(err)) => (None, Some(err)),
        None => (None, None),
    };
    let (file_layer, guard) = match writer {
        Some((writer, guard)) => (
            Some(fmt::layer().with_writer(writer).with_ansi(false).with_target(true)),
            Some(FileLogGuard { _guard: guard }),
        ),
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter(&config.log_level))
        .with(fmt::layer().with_target(true).with_writer(io::stderr))
        .with(file_layer)
        .init();

    if let (Some(err), Some(dir)) = (file_error, &config.log_dir) {
        tracing::warn!(dir = %dir.display(), error = %err, "file logging disabled");
    }
    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_writer_creates_nested_dir() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("logs").join("replay");
        let (_writer, _guard) = file_writer(&dir).unwrap();
        assert!(dir.is_dir());
    }

    #[test]
    fn test_file_writer_rejects_file_path() {
        let root = tempfile::tempdir().unwrap();
        let blocker = root.path().join("taken");
        std::fs::write(&blocker, "x").unwrap();
        assert!(file_writer(&blocker.join("logs")).is_err());
    }
}
