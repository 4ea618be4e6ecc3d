//! Logging setup for cloudpost using tracing.
//!
//! Filter comes from `RUST_LOG`. `CLOUDPOST_LOG_DIR` moves the log files and
//! `CLOUDPOST_LOG_FORMAT=json` writes them as JSON lines.

use anyhow::Result;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_DIR_ENV: &str = "CLOUDPOST_LOG_DIR";
const LOG_FORMAT_ENV: &str = "CLOUDPOST_LOG_FORMAT";
const DEFAULT_FILTER: &str = "info,cloudpost=debug";

/// Layout of the rolling log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    fn parse(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()) {
            Some(v) if v == "json" => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }
}

/// Initialize the rolling file log and stderr output.
///
/// Keep the returned guard alive for the whole run or buffered file
/// output is lost.
pub fn init() -> Result<(WorkerGuard, PathBuf)> {
    let log_dir = log_dir(std::env::var(LOG_DIR_ENV).ok())?;
    std::fs::create_dir_all(&log_dir)?;
    let format = LogFormat::parse(std::env::var(LOG_FORMAT_ENV).ok().as_deref());

    let file_appender = tracing_appender::rolling::daily(&log_dir, "cloudpost.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let (text_file, json_file) = match format {
        LogFormat::Text => (
            Some(
                fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true),
            ),
            None,
        ),
        LogFormat::Json => (
            None,
            Some(
                fmt::layer()
                    .json()
                    .with_writer(non_blocking)
                    .with_current_span(false)
                    .with_file(true)
                    .with_line_number(true),
            ),
        ),
    };

    let console_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(text_file)
        .with(json_file)
        .with(console_layer)
        .try_init()?;

    tracing::debug!(format = ?format, "Log directory: {}", log_dir.display());

    Ok((guard, log_dir))
}

/// `override_dir` when set, else the platform data dir.
fn log_dir(override_dir: Option<String>) -> Result<PathBuf> {
    if let Some(dir) = override_dir.filter(|d| !d.trim().is_empty()) {
        return Ok(PathBuf::from(dir));
    }

    let dirs = directories::ProjectDirs::from("com", "cloudpost", "cloudpost")
        .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))?;
    Ok(dirs.data_dir().join("logs"))
}

/// Initialize logging for tests (captured output, no file).
#[cfg(test)]
pub fn init_test() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_test_writer())
        .try_init();
}
