//! Logging setup for the service binary.
use crate::configuration::LogLevel;
use anyhow::Context;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Name of the log file created in the log directory, if one is configured.
pub const LOG_FILE_NAME: &str = "app.log";

/// Install the global `tracing` subscriber.
///
/// Logs are emitted as JSON on stdout and, if `log_dir` is set, appended to
/// `<log_dir>/app.log` as well. `RUST_LOG`, when set, takes precedence over `level`.
///
/// The returned guard flushes the log file when dropped: hold on to it until the process exits.
pub fn init_subscriber(
    level: LogLevel,
    log_dir: Option<&Path>,
) -> Result<Option<WorkerGuard>, anyhow::Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create the log directory {}", dir.display()))?;
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::NEVER)
                .filename_prefix(LOG_FILE_NAME)
                .build(dir)
                .context("Failed to open the log file")?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json())
        .with(file_layer)
        .try_init()
        .context("Failed to install the tracing subscriber")?;

    Ok(guard)
}
