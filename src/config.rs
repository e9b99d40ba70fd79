use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result, RotatingWriter, RotationPeriod, RotationPolicy};

/// Encoding of log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "console" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(Error::Config(format!(
                "unknown log format: {}, supported: text/json",
                other
            ))),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => f.write_str("text"),
            Self::Json => f.write_str("json"),
        }
    }
}

/// Configuration for logging
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Enable console logging
    #[serde(default)]
    pub console: bool,
    /// Log level or filter directive (e.g., "info", "debug,hyper=warn")
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format
    #[serde(default)]
    pub format: LogFormat,
    /// Record the source file and line of each event
    #[serde(default)]
    pub caller: bool,
    /// Show target/module in logs
    #[serde(default)]
    pub target: bool,
    /// Show thread IDs in logs
    #[serde(default)]
    pub thread_ids: bool,
    /// Show thread names in logs
    #[serde(default)]
    pub thread_names: bool,
    /// File logging configuration
    #[serde(default)]
    pub file: Option<FileLogConfig>,
}

impl LogConfig {
    /// Create a new LogConfig with defaults
    pub fn new() -> Self {
        Self {
            console: false,
            level: default_log_level(),
            format: LogFormat::Text,
            caller: false,
            target: false,
            thread_ids: false,
            thread_names: false,
            file: None,
        }
    }

    /// JSON to the console at info level, with caller locations.
    pub fn production() -> Self {
        Self::new()
            .with_console(true)
            .with_format(LogFormat::Json)
            .with_caller(true)
    }

    /// Human readable console output at debug level, with caller locations.
    pub fn development() -> Self {
        Self::new()
            .with_console(true)
            .with_level("debug".to_string())
            .with_caller(true)
    }

    /// Enable console logging
    pub fn with_console(mut self, console: bool) -> Self {
        self.console = console;
        self
    }

    /// Set log level
    pub fn with_level(mut self, level: String) -> Self {
        self.level = level;
        self
    }

    /// Set log format
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Record source file and line
    pub fn with_caller(mut self, caller: bool) -> Self {
        self.caller = caller;
        self
    }

    /// Show target/module in logs
    pub fn with_target(mut self, target: bool) -> Self {
        self.target = target;
        self
    }

    /// Show thread IDs in logs
    pub fn with_thread_ids(mut self, thread_ids: bool) -> Self {
        self.thread_ids = thread_ids;
        self
    }

    /// Show thread names in logs
    pub fn with_thread_names(mut self, thread_names: bool) -> Self {
        self.thread_names = thread_names;
        self
    }

    /// Set file logging configuration
    pub fn with_file(mut self, file: FileLogConfig) -> Self {
        self.file = Some(file);
        self
    }

    /// Check the configuration without touching the filesystem.
    pub fn validate(&self) -> Result<()> {
        if !self.level.trim().is_empty() {
            tracing_subscriber::EnvFilter::try_new(&self.level)
                .map_err(|e| Error::Config(format!("invalid log level {:?}: {}", self.level, e)))?;
        }
        if let Some(file) = &self.file {
            file.validate()?;
        }
        Ok(())
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_non_blocking() -> bool {
    true
}

/// Configuration for file logging
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileLogConfig {
    /// Directory holding the active file and its backups
    pub directory: PathBuf,
    /// Name of the active file
    pub filename: String,
    /// Rotation and retention settings
    #[serde(flatten)]
    pub rotation: RotationPolicy,
    /// Hand records to a background thread instead of writing in place.
    /// The queue applies backpressure when full; records are never dropped.
    #[serde(default = "default_non_blocking")]
    pub non_blocking: bool,
}

impl FileLogConfig {
    /// Create a new FileLogConfig
    pub fn new(directory: impl Into<PathBuf>, filename: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            filename: filename.into(),
            rotation: RotationPolicy::default(),
            non_blocking: default_non_blocking(),
        }
    }

    /// Create a FileLogConfig from the full path of the active file.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let directory = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::new(directory, filename)
    }

    /// Path of the active file.
    pub fn path(&self) -> PathBuf {
        self.directory.join(&self.filename)
    }

    /// Replace the whole rotation policy
    pub fn with_rotation(mut self, rotation: RotationPolicy) -> Self {
        self.rotation = rotation;
        self
    }

    /// Set the size limit in bytes; 0 disables size rotation
    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.rotation.max_size = max_size;
        self
    }

    /// Set the size limit in megabytes
    pub fn with_max_size_mb(self, max_size_mb: u64) -> Self {
        self.with_max_size(max_size_mb.saturating_mul(1024 * 1024))
    }

    /// Set how many backups to keep; 0 keeps all
    pub fn with_max_backups(mut self, max_backups: u32) -> Self {
        self.rotation.max_backups = max_backups;
        self
    }

    /// Set how many days to keep backups; 0 keeps them forever
    pub fn with_max_age_days(mut self, max_age_days: u32) -> Self {
        self.rotation.max_age_days = max_age_days;
        self
    }

    /// Set time based rotation
    pub fn with_period(mut self, period: RotationPeriod) -> Self {
        self.rotation.period = period;
        self
    }

    /// Stamp backups with local time. Without a known local offset the
    /// writer stamps in UTC and records a warning.
    pub fn with_local_time(mut self, local_time: bool) -> Self {
        self.rotation.local_time = local_time;
        self
    }

    /// Write through a background thread
    pub fn with_non_blocking(mut self, non_blocking: bool) -> Self {
        self.non_blocking = non_blocking;
        self
    }

    /// Check the file settings.
    pub fn validate(&self) -> Result<()> {
        let name = self.filename.trim();
        if name.is_empty() {
            return Err(Error::Config("file logging needs a filename".to_string()));
        }
        if name.contains(['/', '\\']) {
            return Err(Error::Config(format!(
                "filename must not contain a path separator: {}",
                self.filename
            )));
        }
        Ok(())
    }

    /// Build the rotating writer for this configuration. Nothing is opened yet.
    pub fn writer(&self) -> Result<RotatingWriter> {
        self.validate()?;
        RotatingWriter::new(&self.directory, &self.filename, self.rotation)
    }
}
