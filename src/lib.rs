//! # xlog
//!
//! Structured console and rolling file logging on top of `tracing`.
//!
//! ## Features
//!
//! - Console and/or file output, human readable or JSON
//! - A [`RotatingWriter`] that rolls the log file over on size or period and
//!   prunes backups by count and age
//! - Production and development presets, serde-loadable configuration
//! - An explicitly passed [`LoggerHandle`] for reconfiguration at runtime
//!
//! ## Example
//!
//! ```rust
//! use xlog::{FileLogConfig, LogConfig, Logger};
//!
//! let dir = tempfile::tempdir()?;
//! let config = LogConfig::production().with_file(
//!     FileLogConfig::new(dir.path(), "app.log")
//!         .with_max_size_mb(100)
//!         .with_max_backups(3)
//!         .with_max_age_days(28),
//! );
//! let logger = Logger::new(&config)?;
//!
//! logger.in_scope(|| tracing::info!(url = "http://example.com", "failed to fetch"));
//! logger.shutdown()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod builder;
pub mod clock;
pub mod config;
pub mod error;
pub mod rotation;
pub mod tracing_init;
pub mod writer;

pub use builder::LogBuilder;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{FileLogConfig, LogConfig, LogFormat};
pub use error::{Error, Result};
pub use rotation::{BackupFile, RotationPeriod, RotationPolicy, SweepReport};
pub use tracing_init::{Logger, LoggerHandle, init_logging};
pub use writer::RotatingWriter;

/// Start building a logging configuration.
pub fn builder() -> LogBuilder {
    LogBuilder::new()
}
