use anyhow::{Result, anyhow};
use std::path::Path;
use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;

pub const LOG_FILE_PREFIX: &str = "shark.log";

/// `RUST_LOG`-driven stderr logging.
pub fn init_logger() {
    let _ = env_logger::try_init();
}

/// JSON logs, rotated daily, under `dir`.
///
/// Facade spans are recorded when they close, so every operation shows up
/// with its duration. `log` records are forwarded as well.
pub fn init_tracing_to_file(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .map_err(|e| anyhow!("Failed to create log directory {}: {e}", dir.display()))?;
    let file_appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE_PREFIX);
    tracing_subscriber::fmt()
        .with_writer(file_appender)
        .with_max_level(Level::DEBUG)
        .with_span_events(FmtSpan::CLOSE)
        .json()
        .try_init()
        .map_err(|e| anyhow!("Failed to install tracing subscriber: {e}"))
}
