//! Structured logging setup for the `pproftoggle` binary.

use serde::Deserialize;
use std::io::{self, IsTerminal};
use std::sync::OnceLock;
use thiserror::Error;
use tracing::subscriber::SetGlobalDefaultError;
use tracing::Subscriber;
use tracing_subscriber::{fmt, EnvFilter};

static TELEMETRY_GUARD: OnceLock<()> = OnceLock::new();

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// `EnvFilter` directives; `RUST_LOG` takes precedence when set.
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid log filter: {0}")]
    Filter(String),
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(#[source] SetGlobalDefaultError),
}

/// Installs the global subscriber on first use; later calls are no-ops.
pub fn initialise(cfg: &LoggingConfig) -> Result<(), TelemetryError> {
    if TELEMETRY_GUARD.get().is_some() {
        return Ok(());
    }
    install_subscriber(cfg)?;
    let _ = TELEMETRY_GUARD.set(());
    Ok(())
}

fn resolve_filter(cfg: &LoggingConfig) -> Result<EnvFilter, TelemetryError> {
    let directives = std::env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| cfg.filter.clone());
    EnvFilter::try_new(&directives).map_err(|e| TelemetryError::Filter(e.to_string()))
}

fn install_subscriber(cfg: &LoggingConfig) -> Result<(), TelemetryError> {
    let filter = resolve_filter(cfg)?;

    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(io::stderr)
        // No colour codes when stderr is redirected to a file or journal.
        .with_ansi(io::stderr().is_terminal());

    let subscriber: Box<dyn Subscriber + Send + Sync> = match cfg.format {
        LogFormat::Json => Box::new(builder.json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder.compact().finish()),
    };

    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_filters() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let cfg = LoggingConfig {
            filter: "pproftoggle=loud".to_string(),
            format: LogFormat::Compact,
        };
        assert!(matches!(resolve_filter(&cfg), Err(TelemetryError::Filter(_))));
    }

    #[test]
    fn default_filter_is_info() {
        assert_eq!(LoggingConfig::default().filter, "info");
        assert_eq!(LoggingConfig::default().format, LogFormat::Compact);
    }
}
