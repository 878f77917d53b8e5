//! Tracing setup for the `wright` binary.
//!
//! Two sinks:
//! - **stderr**: compact, human-oriented, interleaves with the progress UI
//! - **file**: daily-rolling `wright.log` under `.wright/logs`, plain or JSON
//!
//! The filter comes from `WRIGHT_LOG`, then `RUST_LOG`, then `info`
//! (`debug` with `--verbose`).

use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const LOG_FILE_PREFIX: &str = "wright.log";

/// Build the filter directive from the environment and verbosity.
pub fn filter_directive(
    wright_log: Option<String>,
    rust_log: Option<String>,
    verbose: bool,
) -> String {
    wright_log
        .filter(|s| !s.trim().is_empty())
        .or_else(|| rust_log.filter(|s| !s.trim().is_empty()))
        .unwrap_or_else(|| if verbose { "debug" } else { "info" }.to_string())
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop; keep it alive in
/// `main` for the whole run.
pub fn init(verbose: bool, log_dir: &Path, json: bool) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    let directive = filter_directive(
        std::env::var("WRIGHT_LOG").ok(),
        std::env::var("RUST_LOG").ok(),
        verbose,
    );
    let filter = EnvFilter::try_new(&directive)
        .with_context(|| format!("Invalid log filter '{}'", directive))?;

    let appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let file_layer = if json {
        fmt::layer()
            .json()
            .with_writer(writer)
            .with_ansi(false)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact().with_target(false))
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}
