use std::{fs::create_dir_all, io, path::Path};

use thiserror::Error;
use tracing::{
    Level,
    subscriber::{SetGlobalDefaultError, set_global_default},
};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{layer::SubscriberExt, registry};

/// Create and set the global loggers.
///
/// Logs always go to stdout. When `log_directory` is set they are also written
/// to a daily rolling file in that directory. The returned guards flush the
/// writers when dropped and must be held for the whole run.
pub fn init_logger(
    level: Level,
    log_directory: Option<&Path>,
) -> Result<Vec<WorkerGuard>, LoggerError> {
    let filter = tracing_subscriber::filter::Targets::new().with_default(level);
    let mut guards = Vec::with_capacity(2);

    // File layer
    let file_layer = match log_directory {
        Some(directory) => {
            create_dir_all(directory).map_err(LoggerError::CreateDirectory)?;

            let appender = RollingFileAppender::builder()
                .filename_prefix("db-backup")
                .filename_suffix("log")
                .rotation(Rotation::DAILY)
                .max_log_files(90)
                .build(directory)?;

            let (writer, guard) = tracing_appender::non_blocking(appender);
            guards.push(guard);

            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);

            Some(layer)
        }
        None => None,
    };

    // Std layer
    let std_layer = {
        let (writer, guard) = tracing_appender::non_blocking(io::stdout());
        guards.push(guard);

        tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(true)
            .with_target(false)
    };

    // Create registry
    let registry = registry().with(file_layer).with(std_layer).with(filter);

    // Set global subscriber
    set_global_default(registry)?;

    Ok(guards)
}

#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("Failed to create rolling appender:\n{0}")]
    CreateRollingAppender(#[from] tracing_appender::rolling::InitError),

    #[error("Failed to create log directory:\n{0}")]
    CreateDirectory(#[source] io::Error),

    #[error("Failed to set the global logger:\n{0}")]
    SetGlobal(#[from] SetGlobalDefaultError),
}
