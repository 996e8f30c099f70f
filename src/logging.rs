use anyhow::{Context, Result};
use std::{fs, path::Path};
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{
    filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

/// Daily rolling file log under `log_dir`, plus warnings and up on stderr.
///
/// Keep the returned guard alive for the life of the process or buffered lines are lost.
/// `RUST_LOG` overrides the level picked from `debug_logging`.
pub fn init_logging(log_dir: &Path, debug_logging: bool) -> Result<WorkerGuard> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("create log dir {}", log_dir.display()))?;

    let file_appender = rolling::daily(log_dir, "modkeeper.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let default_level = if debug_logging { "debug" } else { "info" };
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(LevelFilter::WARN);

    tracing_subscriber::registry()
        .with(env)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .context("install tracing subscriber")?;

    tracing::info!(debug_logging, "logging to {}", log_dir.display());
    Ok(guard)
}
