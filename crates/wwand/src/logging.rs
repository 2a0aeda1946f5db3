//! Logging setup.
//!
//! Events go to stdout by default. With file logging enabled they go to a
//! daily-rotated file in the configured directory instead, with three
//! generations retained.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;

/// Rotated log generations kept on disk.
const LOG_GENERATIONS: usize = 3;

/// Initialize the tracing subscriber. The returned guard flushes the file
/// writer and must be held for the process lifetime.
pub fn init(log_dir: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match log_dir {
        Some(dir) => {
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("wwand")
                .filename_suffix("log")
                .max_log_files(LOG_GENERATIONS)
                .build(dir)?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            Ok(None)
        }
    }
}
