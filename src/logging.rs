//! Tracing subscriber setup for the CLI.

use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::config::LoggingSection;

type Filtered = Layered<EnvFilter, Registry>;

/// Keeps the background file writer alive; drop it last.
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

/// Filter precedence: GATEKEEPER_LOG, then RUST_LOG, then `--verbose`, then
/// the configured level.
pub fn env_filter(section: &LoggingSection, verbose: bool) -> EnvFilter {
    let fallback = if verbose { "debug" } else { section.level.as_str() };
    std::env::var("GATEKEEPER_LOG")
        .ok()
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(fallback))
}

/// Install the global subscriber: stderr always, plus a daily-rolling JSON
/// file under `log_dir` when file logging is enabled.
pub fn init(section: &LoggingSection, log_dir: Option<&Path>, verbose: bool) -> Result<LoggingGuard> {
    let mut layers: Vec<Box<dyn Layer<Filtered> + Send + Sync>> = Vec::new();

    if section.json {
        layers.push(fmt::layer().json().with_writer(std::io::stderr).boxed());
    } else {
        layers.push(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .boxed(),
        );
    }

    let mut guard = None;
    if section.file
        && let Some(dir) = log_dir
    {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
        let appender = tracing_appender::rolling::daily(dir, "gatekeeper.log");
        let (writer, worker) = tracing_appender::non_blocking(appender);
        layers.push(fmt::layer().json().with_writer(writer).boxed());
        guard = Some(worker);
    }

    tracing_subscriber::registry()
        .with(env_filter(section, verbose))
        .with(layers)
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(LoggingGuard { _file: guard })
}

