//! Logging Setup
//!
//! tracing-based logging for the engine: console output plus an optional
//! rolling log file.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

/// Log configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Directory for log files
    pub log_dir: PathBuf,
    /// File rotation policy
    pub rotation: LogRotation,
    /// Console output enabled
    pub console_enabled: bool,
    /// File output enabled
    pub file_enabled: bool,
}

#[derive(Debug, Clone)]
pub enum LogRotation {
    Daily,
    Hourly,
    Never,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: PathBuf::from("logs"),
            rotation: LogRotation::Daily,
            console_enabled: true,
            file_enabled: false,
        }
    }
}

impl LogConfig {
    pub fn with_log_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.log_dir = dir.into();
        self
    }

    pub fn with_level(mut self, level: &str) -> Self {
        self.level = level.to_string();
        self
    }

    pub fn with_file(mut self, enabled: bool) -> Self {
        self.file_enabled = enabled;
        self
    }

    pub fn with_console(mut self, enabled: bool) -> Self {
        self.console_enabled = enabled;
        self
    }
}

/// Initialize the global tracing subscriber.
///
/// Returns the worker guard for the file appender when file output is
/// enabled; dropping it flushes buffered log lines.
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.file_enabled {
        ensure_log_dir(&config.log_dir)?;
        let file_appender = match config.rotation {
            LogRotation::Daily => rolling::daily(&config.log_dir, "mongobridge.log"),
            LogRotation::Hourly => rolling::hourly(&config.log_dir, "mongobridge.log"),
            LogRotation::Never => rolling::never(&config.log_dir, "mongobridge.log"),
        };
        let (file_writer, guard) = non_blocking(file_appender);

        if config.console_enabled {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr.and(file_writer))
                .with_target(true)
                .init();
        } else {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(file_writer)
                .with_ansi(false)
                .with_target(true)
                .init();
        }
        Ok(Some(guard))
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
        Ok(None)
    }
}

fn ensure_log_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;
    }
    Ok(())
}
