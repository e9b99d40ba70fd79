use std::sync::{Arc, PoisonError, RwLock};

use tracing::Dispatch;
use tracing::Subscriber;
use tracing_appender::non_blocking::{NonBlockingBuilder, WorkerGuard};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt};

use crate::{Error, LogConfig, LogFormat, Result, RotatingWriter};

/// A configured logging pipeline.
///
/// Owns the dispatcher, the rotating file writer and, in non-blocking mode,
/// the guard of the background writer thread. Dropping the logger flushes
/// pending records and closes the file.
pub struct Logger {
    dispatch: Dispatch,
    guard: Option<WorkerGuard>,
    file: Option<RotatingWriter>,
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger")
            .field("file", &self.file.as_ref().map(|w| w.active_path()))
            .field("non_blocking", &self.guard.is_some())
            .finish()
    }
}

impl Logger {
    /// Build a logger from `config` without installing it anywhere.
    pub fn new(config: &LogConfig) -> Result<Self> {
        Self::with_verbosity(config, None)
    }

    /// Build a logger, letting a CLI verbosity count raise the level.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an invalid configuration and the
    /// writer's error if the log directory or file cannot be created.
    pub fn with_verbosity(config: &LogConfig, cli_verbose: Option<u8>) -> Result<Self> {
        config.validate()?;

        let rust_log = std::env::var("RUST_LOG").ok();
        let log_spec = effective_log_spec(config, cli_verbose, rust_log.as_deref());
        let env_filter = EnvFilter::try_new(&log_spec).map_err(|e| Error::Init(e.to_string()))?;

        let console = config
            .console
            .then(|| fmt_layer(config, std::io::stdout, cfg!(feature = "ansi")));

        let mut guard = None;
        let mut file = None;
        let file_layer = match &config.file {
            Some(file_config) => {
                let writer = file_config.writer()?;
                // Surface directory and open failures now rather than on the
                // first event.
                writer.open()?;
                let layer = if file_config.non_blocking {
                    let (non_blocking, worker) = NonBlockingBuilder::default()
                        .lossy(false)
                        .thread_name("xlog-file-writer")
                        .finish(writer.clone());
                    guard = Some(worker);
                    fmt_layer(config, non_blocking, false)
                } else {
                    fmt_layer(config, writer.clone(), false)
                };
                file = Some(writer);
                Some(layer)
            }
            None => None,
        };

        let subscriber = tracing_subscriber::registry()
            .with(env_filter)
            .with(console)
            .with(file_layer);

        Ok(Self {
            dispatch: Dispatch::new(subscriber),
            guard,
            file,
        })
    }

    /// The dispatcher events should be sent to.
    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    /// Run `f` with this logger as the thread's default.
    pub fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        tracing::dispatcher::with_default(&self.dispatch, f)
    }

    /// The rotating file writer, if file output is enabled.
    pub fn file_writer(&self) -> Option<&RotatingWriter> {
        self.file.as_ref()
    }

    /// Log the non-fatal failures the file writer collected (backups that
    /// could not be deleted, an unknown local offset) through this logger.
    /// Returns how many there were.
    pub fn report_retention_warnings(&self) -> usize {
        let Some(writer) = &self.file else {
            return 0;
        };
        let warnings = writer.take_warnings();
        self.in_scope(|| {
            for warning in &warnings {
                tracing::warn!(error = %warning, "log file writer warning");
            }
        });
        warnings.len()
    }

    /// Flush pending records and close the log file.
    pub fn shutdown(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        // Dropping the guard drains the background worker into the file.
        drop(self.guard.take());
        match self.file.take() {
            Some(writer) => writer.close(),
            None => Ok(()),
        }
    }
}

impl Drop for Logger {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

/// Build a formatting layer writing to `writer`.
fn fmt_layer<S, W>(config: &LogConfig, writer: W, ansi: bool) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a> + 'static,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi)
        .with_target(config.target)
        .with_thread_ids(config.thread_ids)
        .with_thread_names(config.thread_names)
        .with_file(config.caller)
        .with_line_number(config.caller);

    match config.format {
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Text => layer.boxed(),
    }
}

/// Initialize logging with the given configuration and optional CLI
/// verbosity override, installing it as the process-wide default.
///
/// Records emitted through the `log` crate are forwarded as well. The
/// returned [`Logger`] must be kept alive for as long as logging is needed.
///
/// # Errors
///
/// Returns [`Error::Init`] if a global subscriber is already installed.
pub fn init_logging(config: &LogConfig, cli_verbose: Option<u8>) -> Result<Logger> {
    let logger = Logger::with_verbosity(config, cli_verbose)?;
    logger
        .dispatch
        .clone()
        .try_init()
        .map_err(|e| Error::Init(e.to_string()))?;
    tracing::debug!(
        console = config.console,
        format = %config.format,
        file = ?config.file.as_ref().map(|f| f.path()),
        "logging initialized"
    );
    Ok(logger)
}

/// Shared, reconfigurable access to the current logger.
///
/// Pass a clone to each component that logs. [`initialize`](Self::initialize)
/// swaps in a new logger; holders of the previous one keep it until they drop
/// their `Arc`, at which point its file is flushed and closed.
#[derive(Debug, Clone, Default)]
pub struct LoggerHandle {
    current: Arc<RwLock<Option<Arc<Logger>>>>,
}

impl LoggerHandle {
    /// A handle with no logger configured yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a logger from `config` and make it current.
    ///
    /// On error the previous logger stays in place.
    pub fn initialize(&self, config: &LogConfig) -> Result<Arc<Logger>> {
        let logger = Arc::new(Logger::new(config)?);
        let previous = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(Arc::clone(&logger));
        drop(previous);
        Ok(logger)
    }

    /// The current logger, if one was initialized.
    pub fn current(&self) -> Option<Arc<Logger>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Run `f` with the current logger as the thread's default. Without a
    /// logger, `f` runs against whatever default is already in effect.
    pub fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        match self.current() {
            Some(logger) => logger.in_scope(f),
            None => f(),
        }
    }
}

/// Determine the effective log specification, considering config and CLI overrides.
fn effective_log_spec(config: &LogConfig, cli_verbose: Option<u8>, rust_log: Option<&str>) -> String {
    // RUST_LOG takes precedence over everything
    if let Some(rust_log) = rust_log
        && !rust_log.is_empty()
    {
        return rust_log.to_string();
    }

    let level = if config.level.trim().is_empty() {
        "info"
    } else {
        config.level.as_str()
    };

    match cli_verbose {
        None | Some(0) => level.to_string(),
        Some(1) => "debug".to_string(),
        Some(_) => "trace".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FileLogConfig;

    #[test]
    fn rust_log_overrides_config_level() {
        let cfg = LogConfig {
            level: "info".to_string(),
            ..Default::default()
        };

        assert_eq!(effective_log_spec(&cfg, None, Some("trace")), "trace");
        assert_eq!(effective_log_spec(&cfg, Some(2), Some("warn")), "warn");
    }

    #[test]
    fn cfg_level_used_when_no_rust_log() {
        let cfg = LogConfig {
            level: "warn".to_string(),
            ..Default::default()
        };

        assert_eq!(effective_log_spec(&cfg, None, None), "warn");
        assert_eq!(effective_log_spec(&cfg, None, Some("")), "warn");
        assert_eq!(effective_log_spec(&cfg, Some(0), None), "warn");
        assert_eq!(effective_log_spec(&cfg, Some(1), None), "debug");
        assert_eq!(effective_log_spec(&cfg, Some(2), None), "trace");
        assert_eq!(effective_log_spec(&cfg, Some(5), None), "trace");
    }

    #[test]
    fn test_effective_log_spec_with_empty_config_level() {
        let cfg = LogConfig {
            level: "".to_string(),
            ..Default::default()
        };
        assert_eq!(effective_log_spec(&cfg, None, None), "info");
    }

    #[test]
    fn test_logger_without_outputs() {
        let logger = Logger::new(&LogConfig::default()).unwrap();
        assert!(logger.file_writer().is_none());
        assert_eq!(logger.report_retention_warnings(), 0);
        logger.in_scope(|| tracing::info!("goes nowhere"));
        logger.shutdown().unwrap();
    }

    #[test]
    fn test_logger_rejects_invalid_config() {
        let cfg = LogConfig::new().with_file(FileLogConfig::new("logs", ""));
        assert!(matches!(Logger::new(&cfg), Err(Error::Config(_))));
    }

    #[test]
    fn test_logger_reports_unwritable_directory() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();

        let cfg = LogConfig::new().with_file(FileLogConfig::new(blocker.join("logs"), "app.log"));
        assert!(matches!(
            Logger::new(&cfg),
            Err(Error::DirectoryCreation { .. })
        ));
    }

    #[test]
    fn test_blocking_file_logger_writes_text() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = LogConfig::new()
            .with_level("debug".to_string())
            .with_file(FileLogConfig::new(dir.path(), "app.log").with_non_blocking(false));

        let logger = Logger::new(&cfg).unwrap();
        logger.in_scope(|| {
            tracing::debug!("debug line");
            tracing::trace!("filtered line");
        });
        logger.shutdown().unwrap();

        let content = std::fs::read_to_string(dir.path().join("app.log")).unwrap();
        assert!(content.contains("debug line"));
        assert!(!content.contains("filtered line"));
        assert!(!content.contains('\x1b'));
    }

    #[test]
    fn test_handle_initialize_and_current() {
        let dir = tempfile::tempdir().unwrap();
        let handle = LoggerHandle::new();
        assert!(handle.current().is_none());
        handle.in_scope(|| tracing::info!("no logger yet"));

        let first = FileLogConfig::new(dir.path(), "first.log").with_non_blocking(false);
        let logger = handle.initialize(&LogConfig::new().with_file(first)).unwrap();
        assert!(Arc::ptr_eq(&logger, &handle.current().unwrap()));
        drop(logger);

        handle.in_scope(|| tracing::info!("to first"));

        let second = FileLogConfig::new(dir.path(), "second.log").with_non_blocking(false);
        handle.initialize(&LogConfig::new().with_file(second)).unwrap();
        handle.in_scope(|| tracing::info!("to second"));

        let bad = LogConfig::new().with_level("my_crate=verbose".to_string());
        assert!(handle.initialize(&bad).is_err());
        handle.in_scope(|| tracing::info!("still second"));

        let first_log = std::fs::read_to_string(dir.path().join("first.log")).unwrap();
        let second_log = std::fs::read_to_string(dir.path().join("second.log")).unwrap();
        assert!(first_log.contains("to first"));
        assert!(!first_log.contains("to second"));
        assert!(second_log.contains("to second"));
        assert!(second_log.contains("still second"));
    }
}
