//! Logging setup for sheetstep
//!
//! Logs go to the console and to a daily-rolling file in the app data
//! directory. Library code only uses `tracing` macros; binaries call
//! [`init`] once at startup.
//!
//! ```no_run
//! use sheetstep::{config::EngineSettings, logging};
//!
//! let settings = EngineSettings::default();
//! logging::init(&settings).expect("Failed to initialize logging");
//! tracing::info!("engine ready");
//! ```

use crate::config::EngineSettings;
use anyhow::{Context as _, Result};
use std::path::{Path, PathBuf};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer as _, fmt, layer::SubscriberExt as _, util::SubscriberInitExt as _,
};

/// Rotated files kept per log.
const MAX_LOG_FILES: usize = 10;

/// Gets the log directory, creating it when missing
///
/// Uses `settings.log_dir` when set, otherwise the platform data directory:
/// - Linux: `~/.local/share/sheetstep/logs`
/// - macOS: `~/Library/Application Support/sheetstep/logs`
/// - Windows: `%APPDATA%/sheetstep/logs`
pub fn get_log_dir(settings: &EngineSettings) -> Result<PathBuf> {
    let log_dir = match &settings.log_dir {
        Some(dir) => dir.clone(),
        None => dirs::data_dir()
            .context("Failed to determine data directory")?
            .join("sheetstep")
            .join("logs"),
    };

    if !log_dir.exists() {
        std::fs::create_dir_all(&log_dir)
            .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;
    }

    Ok(log_dir)
}

fn daily_appender(log_dir: &Path, prefix: &str) -> Result<RollingFileAppender> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .max_log_files(MAX_LOG_FILES)
        .filename_prefix(prefix)
        .filename_suffix("log")
        .build(log_dir)
        .with_context(|| format!("Failed to create {prefix} log appender"))
}

/// Initializes console and rolling-file logging
///
/// `RUST_LOG` wins over `settings.log_level`. Warnings and errors are also
/// written to a separate `error` log.
///
/// # Errors
///
/// Returns error if the log directory or file appenders cannot be created
pub fn init(settings: &EngineSettings) -> Result<()> {
    let log_dir = get_log_dir(settings)?;

    let all_logs_appender = daily_appender(&log_dir, "sheetstep")?;
    let error_logs_appender = daily_appender(&log_dir, "error")?;

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.log_level))
        .context("Failed to create env filter")?;

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .compact();

    let all_logs_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(false)
        .with_writer(all_logs_appender);

    let error_logs_layer = fmt::layer()
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(false)
        .with_writer(error_logs_appender)
        .with_filter(EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(all_logs_layer)
        .with(error_logs_layer)
        .try_init()
        .context("A global tracing subscriber is already installed")?;

    tracing::info!("Logging initialized, log directory: {}", log_dir.display());

    Ok(())
}
