//! # Loggers Module
//!
//! Installs the process-wide `tracing` subscriber used by the binaries:
//!
//! - an `EnvFilter` taken from `RUST_LOG`, falling back to the level passed in;
//! - a console layer with targets and ANSI colours;
//! - optionally a JSON layer writing to a daily-rolling file through a
//!   non-blocking appender.
//!
//! The library itself only emits events; embedding applications that already
//! have a subscriber simply skip this module.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// # Logging Error
#[derive(Debug, Error)]
pub enum LoggingError {
    /// The log directory could not be created.
    #[error("cannot create log directory {path}: {source}")]
    LogDir {
        /// Requested directory.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Neither `RUST_LOG` nor the fallback level is a valid filter.
    #[error("invalid log filter: {0}")]
    Filter(String),
    /// A global subscriber is already installed.
    #[error("tracing subscriber already installed: {0}")]
    AlreadyInstalled(String),
}

/// Where and how verbosely to log.
#[derive(Debug, Clone)]
pub struct LoggingOptions {
    /// Filter used when `RUST_LOG` is unset, e.g. `"info"` or `"lib_bifrost=debug"`.
    pub level: String,
    /// Directory of the JSON log files; `None` logs to the console only.
    pub log_dir: Option<PathBuf>,
    /// File name prefix of the rolling log files.
    pub file_prefix: String,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: None,
            file_prefix: "bifrost".to_string(),
        }
    }
}

impl LoggingOptions {
    /// Console logging at `level`.
    pub fn console(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            ..Default::default()
        }
    }

    /// Adds JSON file logging under `dir`.
    pub fn with_log_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.log_dir = Some(dir.as_ref().to_path_buf());
        self
    }
}

fn build_filter(level: &str) -> Result<EnvFilter, LoggingError> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| LoggingError::Filter(e.to_string()))
}

/// Installs the global subscriber.
///
/// Keep the returned guard alive for the life of the process: dropping it
/// flushes and stops the file writer.
pub fn setup_logging(options: &LoggingOptions) -> Result<Option<WorkerGuard>, LoggingError> {
    let env_filter = build_filter(&options.level)?;
    let console_layer = fmt::layer().with_target(true).with_ansi(true);

    let (file_layer, guard) = match &options.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|source| LoggingError::LogDir {
                path: dir.clone(),
                source,
            })?;
            let appender = rolling::daily(dir, &options.file_prefix);
            let (writer, guard) = non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .json()
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| LoggingError::AlreadyInstalled(e.to_string()))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_fallback_filter_is_reported() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        assert!(matches!(
            build_filter("lib_bifrost=notalevel"),
            Err(LoggingError::Filter(_))
        ));
        assert!(build_filter("lib_bifrost=debug,info").is_ok());
    }

    #[test]
    fn test_unwritable_log_dir_is_an_error() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let options = LoggingOptions::console("info").with_log_dir(file.path().join("logs"));
        assert!(matches!(
            setup_logging(&options),
            Err(LoggingError::LogDir { .. })
        ));
    }
}
