//! Logging initialisation for applications embedding connectors.
//!
//! The engine only emits `tracing` events; installing a subscriber is left to
//! the application. [`LoggingConfig::init`] installs one with an `EnvFilter`
//! (`RUST_LOG` wins over the configured level) and stderr, file or combined
//! output.
//!
//! | Output | Guard returned |
//! |--------|----------------|
//! | `Stderr` | No |
//! | `FileOnly` | **Yes** |
//! | `Both` | **Yes** |
//! | `None` | No |
//!
//! File output is written through a non-blocking appender; hold the returned
//! [`LoggingGuard`] until shutdown or buffered lines are lost.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Where log lines go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogOutput {
    /// Standard error
    #[default]
    Stderr,
    /// Rolling file only
    FileOnly,
    /// Standard error and rolling file
    Both,
    /// Nothing
    None,
}

/// File rotation period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogRotation {
    /// Every minute
    Minute,
    /// Every hour
    Hourly,
    /// Every day
    Daily,
    /// Never
    #[default]
    Never,
}

/// Subscriber settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is not set
    pub level: String,
    /// Emit JSON lines
    pub structured: bool,
    /// Output target
    pub output: LogOutput,
    /// Directory of the log files
    pub directory: Option<PathBuf>,
    /// File name prefix
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
            file_prefix: "turbobus".to_string(),
            rotation: LogRotation::Never,
        }
    }
}

/// Keeps the non-blocking writers alive; flushes them on drop.
#[derive(Debug)]
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
    _stderr_guard: Option<WorkerGuard>,
}

impl LoggingConfig {
    /// Human-readable stderr output at the given level.
    #[must_use]
    pub fn stderr(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            ..Self::default()
        }
    }

    /// JSON lines to stderr and to hourly rotated files in `directory`.
    #[must_use]
    pub fn production(directory: impl Into<PathBuf>) -> Self {
        Self {
            structured: true,
            output: LogOutput::Both,
            directory: Some(directory.into()),
            rotation: LogRotation::Hourly,
            ..Self::default()
        }
    }

    /// Installs the global subscriber.
    ///
    /// Returns a guard for file output, which must be held.
    ///
    /// # Errors
    ///
    /// Fails when file output has no directory, the directory cannot be
    /// created, or a global subscriber is already installed.
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
                let guard = init_file(self, self.log_directory()?, filter, false)?;
                Ok(Some(guard))
            }
            LogOutput::Both => {
                let guard = init_file(self, self.log_directory()?, filter, true)?;
                Ok(Some(guard))
            }
        }
    }

    fn log_directory(&self) -> io::Result<&Path> {
        self.directory.as_deref().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "file logging requires a directory",
            )
        })
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

    let file_appender = match config.rotation {
        LogRotation::Minute => tracing_appender::rolling::minutely(dir, &config.file_prefix),
        LogRotation::Hourly => tracing_appender::rolling::hourly(dir, &config.file_prefix),
        LogRotation::Daily => tracing_appender::rolling::daily(dir, &config.file_prefix),
        LogRotation::Never => tracing_appender::rolling::never(dir, &config.file_prefix),
    };
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
    let subscriber = tracing_subscriber::registry().with(filter);

    if !with_stderr {
        let installed = if config.structured {
            subscriber
                .with(fmt::layer().json().with_writer(file_writer))
                .try_init()
        } else {
            subscriber.with(fmt::layer().with_writer(file_writer)).try_init()
        };
        installed.map_err(|e| io::Error::other(e.to_string()))?;
        return Ok(LoggingGuard {
            _file_guard: file_guard,
            _stderr_guard: None,
        });
    }

    let (stderr_writer, stderr_guard) = tracing_appender::non_blocking(io::stderr());
    let combined = file_writer.and(stderr_writer);
    let installed = if config.structured {
        subscriber
            .with(fmt::layer().json().with_writer(combined))
            .try_init()
    } else {
        subscriber.with(fmt::layer().with_writer(combined)).try_init()
    };
    installed.map_err(|e| io::Error::other(e.to_string()))?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
        _stderr_guard: Some(stderr_guard),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        let config = LoggingConfig::stderr("debug");
        assert_eq!(config.level, "debug");
        assert_eq!(config.output, LogOutput::Stderr);
        assert!(config.directory.is_none());

        let config = LoggingConfig::production("/var/log/turbobus");
        assert_eq!(config.output, LogOutput::Both);
        assert_eq!(config.rotation, LogRotation::Hourly);
        assert!(config.structured);
    }

    #[test]
    fn test_file_output_requires_directory() {
        let config = LoggingConfig {
            output: LogOutput::FileOnly,
            ..LoggingConfig::default()
        };
        assert!(config.init().is_err());
    }

    #[test]
    fn test_none_installs_nothing() {
        let config = LoggingConfig {
            output: LogOutput::None,
            ..LoggingConfig::default()
        };
        assert!(config.init().unwrap().is_none());
    }
}
