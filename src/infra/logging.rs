use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub const LOG_FILE_NAME: &str = "debug.log";
const LOG_FILTER_ENV: &str = "CCMENU_LOG";

#[derive(Debug, Error)]
pub enum InitLoggingError {
    #[error("failed to create log directory {path}: {source}")]
    CreateDir { path: String, source: io::Error },

    #[error("failed to install log subscriber: {0}")]
    Install(String),
}

/// Installs the diagnostic log. The file layer is always on so warnings from
/// discovery and validation persist; `debug` raises the default level and
/// mirrors output to stderr.
pub fn init_logging(logs_dir: &Path, debug: bool) -> Result<(), InitLoggingError> {
    fs::create_dir_all(logs_dir).map_err(|source| InitLoggingError::CreateDir {
        path: logs_dir.display().to_string(),
        source,
    })?;

    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env(LOG_FILTER_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let file_appender = tracing_appender::rolling::never(logs_dir, LOG_FILE_NAME);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_target(false)
        .with_writer(file_appender);

    let stderr_layer = debug.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .without_time()
            .with_writer(io::stderr)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .map_err(|error| InitLoggingError::Install(error.to_string()))
}
