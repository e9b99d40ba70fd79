//! Builder pattern for initializing logging configuration.
//!
//! This module provides a convenient builder API for configuring and initializing
//! logging in a single chain of method calls.
//!
//! # Example
//!
//! ```rust,no_run
//! // Console logging in the production preset
//! let _logger = xlog::builder()
//!     .with_console(true)
//!     .with_format(xlog::LogFormat::Json)
//!     .init()
//!     .expect("Failed to initialize logging");
//! ```
//!
//! ```rust,no_run
//! // Rolling file logging, 10 MB per file, three backups kept for a week
//! let _logger = xlog::builder()
//!     .with_level("debug")
//!     .with_file("/var/log/app", "app.log")
//!     .with_max_size_mb(10)
//!     .with_max_backups(3)
//!     .with_max_age_days(7)
//!     .init()
//!     .expect("Failed to initialize logging");
//! ```

use std::path::PathBuf;

use crate::{
    FileLogConfig, LogConfig, LogFormat, Logger, Result, RotationPeriod, RotationPolicy,
    init_logging,
};

/// A builder for configuring and initializing logging.
///
/// File rotation settings apply to the configured file; setting one before
/// [`with_file`](Self::with_file) creates a file config at `./app.log`.
#[derive(Debug, Clone)]
pub struct LogBuilder {
    config: LogConfig,
    verbosity: Option<u8>,
}

impl LogBuilder {
    /// Create a new LogBuilder with default configuration.
    pub fn new() -> Self {
        Self::from_config(LogConfig::new())
    }

    /// Create a LogBuilder from an existing configuration.
    pub fn from_config(config: LogConfig) -> Self {
        Self {
            config,
            verbosity: None,
        }
    }

    /// Enable or disable console logging.
    pub fn with_console(mut self, enabled: bool) -> Self {
        self.config = self.config.with_console(enabled);
        self
    }

    /// Set the log level (e.g., "trace", "debug", "info", "warn", "error").
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config = self.config.with_level(level.into());
        self
    }

    /// Set the log output format.
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.config = self.config.with_format(format);
        self
    }

    /// Raise the level by a CLI verbosity count (`-v` = debug, `-vv` = trace).
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = Some(verbosity);
        self
    }

    /// Configure file logging to `{directory}/{filename}` with default rotation.
    pub fn with_file(mut self, directory: impl Into<PathBuf>, filename: impl Into<String>) -> Self {
        let rotation = self.rotation();
        self.config = self
            .config
            .with_file(FileLogConfig::new(directory, filename).with_rotation(rotation));
        self
    }

    /// Configure file logging with a custom FileLogConfig.
    pub fn with_file_config(mut self, file_config: FileLogConfig) -> Self {
        self.config = self.config.with_file(file_config);
        self
    }

    /// Set the whole rotation policy of the log file.
    pub fn with_rotation(self, rotation: RotationPolicy) -> Self {
        self.map_file(|file| file.with_rotation(rotation))
    }

    /// Rotate the log file once it would grow past `mb` megabytes.
    pub fn with_max_size_mb(self, mb: u64) -> Self {
        self.map_file(|file| file.with_max_size_mb(mb))
    }

    /// Keep at most `count` backups.
    pub fn with_max_backups(self, count: u32) -> Self {
        self.map_file(|file| file.with_max_backups(count))
    }

    /// Delete backups older than `days`.
    pub fn with_max_age_days(self, days: u32) -> Self {
        self.map_file(|file| file.with_max_age_days(days))
    }

    /// Also rotate the log file every `period`.
    pub fn with_period(self, period: RotationPeriod) -> Self {
        self.map_file(|file| file.with_period(period))
    }

    /// Record source file and line
    pub fn with_caller(mut self, caller: bool) -> Self {
        self.config = self.config.with_caller(caller);
        self
    }

    /// Show target/module in logs
    pub fn with_target(mut self, target: bool) -> Self {
        self.config = self.config.with_target(target);
        self
    }

    /// Show thread IDs in logs
    pub fn with_thread_ids(mut self, thread_ids: bool) -> Self {
        self.config = self.config.with_thread_ids(thread_ids);
        self
    }

    /// Show thread names in logs
    pub fn with_thread_names(mut self, thread_names: bool) -> Self {
        self.config = self.config.with_thread_names(thread_names);
        self
    }

    fn rotation(&self) -> RotationPolicy {
        self.config
            .file
            .as_ref()
            .map(|file| file.rotation)
            .unwrap_or_default()
    }

    fn map_file(mut self, f: impl FnOnce(FileLogConfig) -> FileLogConfig) -> Self {
        let file = self
            .config
            .file
            .take()
            .unwrap_or_else(|| FileLogConfig::new(".", "app.log"));
        self.config.file = Some(f(file));
        self
    }

    /// Get the current configuration without initializing.
    pub fn build(self) -> LogConfig {
        self.config
    }

    /// Build a logger without installing it globally.
    pub fn logger(self) -> Result<Logger> {
        Logger::with_verbosity(&self.config, self.verbosity)
    }

    /// Initialize logging with the configured settings.
    ///
    /// This consumes the builder and installs the logger as the process-wide
    /// default. Keep the returned [`Logger`] alive while logging.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The tracing subscriber is already initialized
    /// - File operations fail
    /// - Invalid configuration is provided
    pub fn init(self) -> Result<Logger> {
        init_logging(&self.config, self.verbosity)
    }
}

impl Default for LogBuilder {
    fn default() -> Self {
        Self::new()
    }
}
