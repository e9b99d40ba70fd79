//! Rolling file example: console and file output, 1 MB files, one backup,
//! backups kept for two days.

use xlog::{FileLogConfig, LogConfig, init_logging};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = tempfile::tempdir()?;

    let file_config = FileLogConfig::new(temp_dir.path(), "xlog_test")
        .with_max_size_mb(1)
        .with_max_backups(1)
        .with_max_age_days(2);
    let config = LogConfig::development().with_file(file_config);

    let logger = init_logging(&config, None)?;

    for i in 0..50_000 {
        tracing::info!(i, "hi");
    }
    logger.report_retention_warnings();

    if let Some(writer) = logger.file_writer() {
        println!("backups: {:?}", writer.backups());
    }
    logger.shutdown()?;

    Ok(())
}
