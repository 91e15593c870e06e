//! Logging for threadline
//!
//! Runs and replays log to `$XDG_STATE_HOME/threadline/`, one file per day
//! (`threadline.YYYY-MM-DD.log`). Stream reconstruction is chatty at `trace`,
//! so the configured level applies to threadline's own targets only; every
//! other target is capped at `warn` unless `RUST_LOG` says otherwise.

use crate::config::{Config, LoggingConfig};
use crate::error::{Error, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    filter::Directive,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

const LOG_PREFIX: &str = "threadline";
const LOG_SUFFIX: &str = "log";
const OWN_TARGETS: [&str; 2] = ["threadline", "threadline_core"];

/// Initialize logging into the XDG state directory
pub fn init(config: &LoggingConfig) -> Result<LoggingGuard> {
    init_in(&Config::state_dir(), config)
}

/// Initialize logging into `log_dir`.
///
/// Fails if a global subscriber is already installed.
pub fn init_in(log_dir: &Path, config: &LoggingConfig) -> Result<LoggingGuard> {
    std::fs::create_dir_all(log_dir)?;

    let (writer, guard) = tracing_appender::non_blocking(file_appender(log_dir, config)?);
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => filter_for(&config.level)?,
    };

    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::Logging(e.to_string()))?;

    tracing::info!(
        log_dir = %log_dir.display(),
        level = %config.level,
        max_files = config.max_files,
        "Logging initialized"
    );

    Ok(LoggingGuard { _guard: guard })
}

fn file_appender(log_dir: &Path, config: &LoggingConfig) -> Result<RollingFileAppender> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_PREFIX)
        .filename_suffix(LOG_SUFFIX)
        .max_log_files(config.max_files.max(1))
        .build(log_dir)
        .map_err(|e| Error::Logging(format!("failed to create log appender: {}", e)))
}

/// `warn` everywhere, `level` for threadline's own targets
fn filter_for(level: &str) -> Result<EnvFilter> {
    let mut filter = EnvFilter::new("warn");
    for target in OWN_TARGETS {
        let directive: Directive = format!("{}={}", target, level)
            .parse()
            .map_err(|e| Error::Logging(format!("invalid log level {:?}: {}", level, e)))?;
        filter = filter.add_directive(directive);
    }
    Ok(filter)
}

/// Initialize logging for tests (captured test output)
pub fn init_test() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,threadline_core=debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .with_span_events(FmtSpan::CLOSE)
        .try_init();
}

/// Keeps the background log writer alive; pending lines are flushed on drop
pub struct LoggingGuard {
    _guard: WorkerGuard,
}

/// Today's log file in the XDG state directory
pub fn log_file_path() -> PathBuf {
    Config::state_dir().join(format!(
        "{}.{}.{}",
        LOG_PREFIX,
        Utc::now().format("%Y-%m-%d"),
        LOG_SUFFIX
    ))
}
