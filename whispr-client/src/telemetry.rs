use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{
    non_blocking,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, time::UtcTime},
    prelude::*,
    EnvFilter, Registry,
};

/// The log file name for the client.
const CLIENT_LOG_FILE: &str = "whispr-client.log";

/// Filter used when `RUST_LOG` is not set
const DEFAULT_FILTER: &str = "info,whispr_client=info,whispr_confidential=info";

/// Configure logging with console output and, when `logs_dir` is given, a daily rotated JSON
/// log file.
///
/// The returned guard flushes the file writer on drop and must be kept alive for as long as
/// the program logs.
///
/// # Errors
///
/// Returns an error if:
/// - Failed to create the logs directory
/// - Failed to set global default subscriber
pub fn setup_logging(logs_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let (file_layer, guard) = match logs_dir {
        Some(logs_dir) => {
            std::fs::create_dir_all(logs_dir).context("Failed to create logs directory")?;
            let appender = RollingFileAppender::new(Rotation::DAILY, logs_dir, CLIENT_LOG_FILE);
            let (writer, guard) = non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_timer(UtcTime::rfc_3339())
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_target(true)
                .with_line_number(true)
                .with_file(true)
                .with_current_span(true)
                .with_span_list(true)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let console_layer = fmt::layer()
        .pretty()
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_file(true)
        .with_span_events(FmtSpan::ENTER);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    Registry::default()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to set global default subscriber")?;

    Ok(guard)
}
