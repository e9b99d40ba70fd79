//! Load the logging configuration from a YAML document.

use serde::Deserialize;

#[derive(Deserialize)]
struct Config {
    log: xlog::LogConfig,
}

const CONFIG: &str = r#"
log:
  console: true
  level: debug
  format: json
  file:
    directory: logs
    filename: app.log
    max_size: "10M"
    max_backups: 3
    max_age_days: 28
"#;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config: Config = serde_yaml::from_str(CONFIG)?;
    let temp_dir = tempfile::tempdir()?;

    // Redirect the configured relative directory into a scratch location.
    let mut log = config.log;
    if let Some(file) = log.file.as_mut() {
        file.directory = temp_dir.path().join(&file.directory);
    }

    let handle = xlog::LoggerHandle::new();
    handle.initialize(&log)?;
    handle.in_scope(|| tracing::debug!(config = ?log, "configuration loaded"));

    Ok(())
}
