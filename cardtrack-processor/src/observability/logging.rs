use std::fs;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initializes the logging system with both console and file output.
pub fn init_logging() {
    // Ensure logs directory exists
    let _ = fs::create_dir_all("logs");

    // Non-blocking file appender with daily log rotation
    let file_appender = tracing_appender::rolling::daily("logs", "cardtrack.log");
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);

    // JSON layer for file logging
    let file_layer = fmt::layer().json().with_writer(non_blocking_writer);

    // Formatted layer for console logging
    let console_layer = fmt::layer()
        .with_target(true)
        .with_writer(std::io::stdout);

    // Respect RUST_LOG if set; otherwise default to verbose for our crates
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("cardtrack_processor=debug,cardtrack_core=debug,info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .init();

    // Keep the guard alive for the process lifetime so logs flush on exit
    std::mem::forget(guard);
}
