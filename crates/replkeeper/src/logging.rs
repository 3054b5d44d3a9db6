//! Logging initialization
//!
//! Installs a `tracing` subscriber for processes embedding the engine. Every engine operation
//! opens an `info` span carrying its operation id, so one reconciliation can be followed across
//! retries and readiness probes.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use replkeeper::LoggingConfig;
//!
//! // Stderr-only (no guard needed)
//! LoggingConfig::stderr_minimal().init()?;
//!
//! // File logging (guard must be held)
//! let _guard = LoggingConfig::file("/var/log/replkeeper").init()?;
//! # Ok::<(), std::io::Error>(())
//! ```
//!
//! | Output Target | Guard Required |
//! |---------------|----------------|
//! | `Stderr` | No |
//! | `FileOnly` | **Yes** |
//! | `Both` | **Yes** |
//! | `None` | No |
//!
//! `RUST_LOG` takes precedence over the configured level.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Where log lines go
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogOutput {
    /// Logging disabled
    None,
    /// Standard error
    #[default]
    Stderr,
    /// Rolling file only
    FileOnly,
    /// Standard error and rolling file
    Both,
}

/// Log file rotation period
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogRotation {
    /// Every minute
    Minute,
    /// Every hour
    Hourly,
    /// Every day
    Daily,
    /// Single file
    #[default]
    Never,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset, e.g. `info` or `replkeeper=debug`
    pub level: String,
    /// Emit JSON lines instead of human-readable text
    pub structured: bool,
    /// Output target
    pub output: LogOutput,
    /// Directory for log files
    pub directory: Option<PathBuf>,
    /// Log file name prefix
    pub file_prefix: String,
    /// Rotation period
    pub rotation: LogRotation,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            structured: false,
            output: LogOutput::Stderr,
            directory: None,
            file_prefix: "replkeeper".to_string(),
            rotation: LogRotation::Never,
        }
    }
}

/// Guard that ensures file logs are flushed on drop
///
/// This guard **must be held** for the duration of the program when using file-based logging.
#[derive(Debug)]
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
    _stderr_guard: Option<WorkerGuard>,
}

impl LoggingConfig {
    /// Errors only, to stderr
    pub fn stderr_minimal() -> Self {
        Self {
            level: "error".to_string(),
            ..Self::default()
        }
    }

    /// Everything from debug up, to stderr
    pub fn stderr_debug() -> Self {
        Self {
            level: "debug".to_string(),
            ..Self::default()
        }
    }

    /// Info and up, to a single file in `directory`
    pub fn file(directory: impl Into<PathBuf>) -> Self {
        Self {
            output: LogOutput::FileOnly,
            directory: Some(directory.into()),
            ..Self::default()
        }
    }

    /// JSON lines to stderr and an hourly rotated file in `directory`
    pub fn production(directory: impl Into<PathBuf>) -> Self {
        Self {
            structured: true,
            output: LogOutput::Both,
            directory: Some(directory.into()),
            rotation: LogRotation::Hourly,
            ..Self::default()
        }
    }

    /// Initialize logging based on this configuration
    ///
    /// Returns `Some(LoggingGuard)` for file-based logging (must be held), or `None` otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if file logging is configured without a directory, if the directory
    /// cannot be created, or if a global subscriber is already installed.
    pub fn init(&self) -> io::Result<Option<LoggingGuard>> {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));

        match self.output {
            LogOutput::None => Ok(None),
            LogOutput::Stderr => {
                init_stderr(self, filter)?;
                Ok(None)
            }
            LogOutput::FileOnly => {
                let guard = init_file(self, self.require_directory()?, filter, false)?;
                Ok(Some(guard))
            }
            LogOutput::Both => {
                let guard = init_file(self, self.require_directory()?, filter, true)?;
                Ok(Some(guard))
            }
        }
    }

    fn require_directory(&self) -> io::Result<&Path> {
        self.directory.as_deref().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "File logging requires a directory (set `directory` or use file())",
            )
        })
    }

    fn appender(&self, dir: &Path) -> RollingFileAppender {
        match self.rotation {
            LogRotation::Minute => tracing_appender::rolling::minutely(dir, &self.file_prefix),
            LogRotation::Hourly => tracing_appender::rolling::hourly(dir, &self.file_prefix),
            LogRotation::Daily => tracing_appender::rolling::daily(dir, &self.file_prefix),
            LogRotation::Never => tracing_appender::rolling::never(dir, &self.file_prefix),
        }
    }
}

fn init_stderr(config: &LoggingConfig, filter: EnvFilter) -> io::Result<()> {
    let subscriber = tracing_subscriber::registry().with(filter);

    if config.structured {
        subscriber
            .with(fmt::layer().json().with_writer(io::stderr))
            .try_init()
            .map_err(|e| io::Error::other(e.to_string()))
    } else {
        subscriber
            .with(fmt::layer().with_writer(io::stderr))
            .try_init()
            .map_err(|e| io::Error::other(e.to_string()))
    }
}

fn init_file(
    config: &LoggingConfig,
    dir: &Path,
    filter: EnvFilter,
    with_stderr: bool,
) -> io::Result<LoggingGuard> {
    std::fs::create_dir_all(dir)?;

    let (file_writer, file_guard) = tracing_appender::non_blocking(config.appender(dir));
    let subscriber = tracing_subscriber::registry().with(filter);

    let stderr_guard = if with_stderr {
        let (stderr_writer, stderr_guard) = tracing_appender::non_blocking(io::stderr());
        let writer = file_writer.and(stderr_writer);
        let installed = if config.structured {
            subscriber
                .with(fmt::layer().json().with_writer(writer))
                .try_init()
        } else {
            subscriber.with(fmt::layer().with_writer(writer)).try_init()
        };
        installed.map_err(|e| io::Error::other(e.to_string()))?;
        Some(stderr_guard)
    } else {
        let installed = if config.structured {
            subscriber
                .with(fmt::layer().json().with_writer(file_writer))
                .try_init()
        } else {
            subscriber
                .with(fmt::layer().with_writer(file_writer))
                .try_init()
        };
        installed.map_err(|e| io::Error::other(e.to_string()))?;
        None
    };

    Ok(LoggingGuard {
        _file_guard: file_guard,
        _stderr_guard: stderr_guard,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_config_presets() {
        let config = LoggingConfig::stderr_minimal();
        assert_eq!(config.level, "error");
        assert_eq!(config.output, LogOutput::Stderr);
        assert!(config.directory.is_none());

        let config = LoggingConfig::file("/var/log/test");
        assert_eq!(config.level, "info");
        assert_eq!(config.output, LogOutput::FileOnly);
        assert!(config.directory.is_some());

        let config = LoggingConfig::stderr_debug();
        assert_eq!(config.level, "debug");

        let config = LoggingConfig::production("/var/log/prod");
        assert_eq!(config.output, LogOutput::Both);
        assert_eq!(config.rotation, LogRotation::Hourly);
        assert!(config.structured);
    }

    #[test]
    fn test_file_only_requires_directory() {
        let config = LoggingConfig {
            output: LogOutput::FileOnly,
            directory: None,
            ..LoggingConfig::default()
        };
        assert!(config.init().is_err());
    }

    #[test]
    fn test_deserialize_snake_case() {
        let config: LoggingConfig = serde_json::from_value(serde_json::json!({
            "output": "file_only",
            "rotation": "daily",
            "directory": "/tmp/logs"
        }))
        .unwrap();
        assert_eq!(config.output, LogOutput::FileOnly);
        assert_eq!(config.rotation, LogRotation::Daily);
        assert_eq!(config.level, "info");
    }
}
