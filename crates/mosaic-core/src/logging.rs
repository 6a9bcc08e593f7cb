//! Tracing subscriber setup.
//!
//! Filter precedence: `MOSAIC_LOG`, then `[logging].filter`, then `warn`.
//! Output goes to stderr unless `[logging].file` names a log file.

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

pub const LOG_ENV: &str = "MOSAIC_LOG";
const DEFAULT_FILTER: &str = "warn";

/// Keeps the non-blocking file writer alive. Drop it last.
#[derive(Debug)]
pub struct LogGuard {
    _worker: Option<WorkerGuard>,
}

/// Builds the filter for `config`.
///
/// # Errors
/// Returns an error if a directive does not parse.
pub fn filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(directives) = std::env::var(LOG_ENV)
        && !directives.trim().is_empty()
    {
        return EnvFilter::try_new(&directives)
            .with_context(|| format!("Invalid {LOG_ENV} filter: {directives}"));
    }
    let directives = config
        .filter
        .as_deref()
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .unwrap_or(DEFAULT_FILTER);
    EnvFilter::try_new(directives)
        .with_context(|| format!("Invalid [logging].filter: {directives}"))
}

/// Installs the global subscriber.
///
/// # Errors
/// Returns an error if the filter is invalid, the log file cannot be opened,
/// or a subscriber is already installed.
pub fn init(config: &LoggingConfig) -> Result<LogGuard> {
    let filter = filter(config)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    match &config.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            let (writer, worker) = tracing_appender::non_blocking(file);
            builder
                .with_ansi(false)
                .with_writer(writer)
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to install logger: {e}"))?;
            Ok(LogGuard {
                _worker: Some(worker),
            })
        }
        None => {
            builder
                .with_writer(std::io::stderr)
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to install logger: {e}"))?;
            Ok(LogGuard { _worker: None })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_filter_is_used() {
        let config = LoggingConfig {
            filter: Some("mosaic_core=debug".to_string()),
            file: None,
        };
        if std::env::var(LOG_ENV).is_err() {
            assert_eq!(filter(&config).unwrap().to_string(), "mosaic_core=debug");
            assert_eq!(filter(&LoggingConfig::default()).unwrap().to_string(), "warn");
        }
    }

    #[test]
    fn test_invalid_filter_is_reported() {
        let config = LoggingConfig {
            filter: Some("mosaic_core=verbose".to_string()),
            file: None,
        };
        if std::env::var(LOG_ENV).is_err() {
            assert!(filter(&config).unwrap_err().to_string().contains("[logging].filter"));
        }
    }
}
