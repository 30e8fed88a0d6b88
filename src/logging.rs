//! Log output for the `coursemail` binary.
//!
//! Events always go to stderr in the human format. When
//! [`LoggingConfig::dir`] is set they are also written as JSON lines to a
//! daily-rotated file, so delivery failures and sent-message ids can be
//! traced after the command exits.

use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Prefix of the rotated log files (`coursemail.log.YYYY-MM-DD`).
pub const LOG_FILE_PREFIX: &str = "coursemail.log";

/// Filter applied when neither `RUST_LOG` nor the configured level parses.
const FALLBACK_LEVEL: &str = "info";

/// Keeps the file writer alive. Dropping it flushes buffered events.
#[must_use = "dropping the guard stops file logging"]
pub struct LoggingGuard {
    _writer: WorkerGuard,
}

/// Install the global subscriber described by `config`.
///
/// A relative log directory is resolved against `base`. Returns a guard only
/// when file output is enabled.
///
/// # Errors
///
/// Fails when the log directory cannot be created or a subscriber is
/// already installed.
pub fn init(config: &LoggingConfig, base: &Path) -> anyhow::Result<Option<LoggingGuard>> {
    let filter = filter_from_env(&config.level);

    let Some(dir) = config.dir.as_deref() else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
            .context("installing console logger")?;
        return Ok(None);
    };

    let dir = log_dir(dir, base);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("creating log directory {}", dir.display()))?;
    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(&dir, LOG_FILE_PREFIX));
    let json = tracing_subscriber::fmt::layer().json().with_writer(writer);

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .context("installing file logger")?;
    Ok(Some(LoggingGuard { _writer: guard }))
}

fn filter_from_env(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| level_filter(level))
}

/// Parse a configured level directive, falling back to `info` when it is
/// malformed.
pub fn level_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new(FALLBACK_LEVEL))
}

fn log_dir(dir: &Path, base: &Path) -> PathBuf {
    if dir.is_absolute() {
        dir.to_path_buf()
    } else {
        base.join(dir)
    }
}
