//! Basic console logging example.
//!
//! This example demonstrates the simplest way to initialize logging
//! with xlog using the builder API.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Keep the logger alive for as long as logging is needed.
    let _logger = xlog::builder()
        .with_console(true)
        .with_level("info")
        .init()?;

    tracing::info!(url = "http://teststdout.com", attempt = 3, "Failed to fetch URL.");
    tracing::warn!("This is a warning message");
    tracing::error!("This is an error message");

    Ok(())
}
