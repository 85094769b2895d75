use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LogConfig;

/// Install the global subscriber. `RUST_LOG` overrides `log.filter`, which
/// overrides the `info` default. With `log.file` set, output is also written
/// to a daily file; keep the returned guard alive until exit or buffered
/// lines are lost.
pub fn init(config: &LogConfig) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env().or_else(|_| {
    EnvFilter::try_new(config.filter.as_deref().unwrap_or("info"))
      .map_err(|e| eyre!("Invalid log filter: {}", e))
  })?;

  let stdout = fmt::layer().with_target(false);

  let (file, guard) = if config.file {
    let dir = log_dir()?;
    std::fs::create_dir_all(&dir)
      .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;
    let appender = tracing_appender::rolling::daily(&dir, "tasksync.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let layer = fmt::layer().with_writer(writer).with_ansi(false);
    (Some(layer), Some(guard))
  } else {
    (None, None)
  };

  tracing_subscriber::registry()
    .with(filter)
    .with(stdout)
    .with(file)
    .try_init()
    .map_err(|e| eyre!("Failed to install log subscriber: {}", e))?;

  Ok(guard)
}

fn log_dir() -> Result<PathBuf> {
  dirs::data_dir()
    .map(|d| d.join("tasksync").join("logs"))
    .ok_or_else(|| eyre!("No data directory for log files on this platform"))
}
