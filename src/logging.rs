//! Tracing subscriber setup for the binary.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::error::{Result, SchedulerError};

/// Filter used when `RUST_LOG` is unset.
fn default_filter(verbose: bool) -> EnvFilter {
    EnvFilter::new(if verbose { "debug" } else { "info" })
}

/// Installs the global subscriber.
///
/// `RUST_LOG` overrides the level picked by `verbose`. With a `log_file`,
/// output goes through a non-blocking appender instead of stderr; the
/// returned guard must be held until exit so buffered lines are flushed.
pub fn init(verbose: bool, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(verbose));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let Some(file) = log_file else {
        builder
            .try_init()
            .map_err(|e| SchedulerError::Config(format!("logging: {e}")))?;
        return Ok(None);
    };

    let dir = file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let name = file
        .file_name()
        .ok_or_else(|| SchedulerError::Config(format!("invalid log file {}", file.display())))?;
    std::fs::create_dir_all(dir)?;

    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
    builder
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .map_err(|e| SchedulerError::Config(format!("logging: {e}")))?;
    Ok(Some(guard))
}
