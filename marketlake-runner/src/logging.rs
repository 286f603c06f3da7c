//! `tracing` subscriber setup.
//!
//! `RUST_LOG`, when set, overrides the configured level.

use crate::config::LoggingConfig;
use thiserror::Error;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

impl LogFormat {
    /// Unknown names fall back to `Pretty`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log level '{level}': {reason}")]
    Level { level: String, reason: String },

    #[error("logging already initialized: {0}")]
    Init(String),
}

fn filter(level: &str) -> Result<EnvFilter, LoggingError> {
    match EnvFilter::try_from_default_env() {
        Ok(f) => Ok(f),
        Err(_) => EnvFilter::try_new(level).map_err(|e| LoggingError::Level {
            level: level.to_string(),
            reason: e.to_string(),
        }),
    }
}

/// Install the global subscriber. Call once, early in `main`.
pub fn init(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = filter(&config.level)?;
    let builder = fmt().with_env_filter(filter).with_writer(std::io::stderr);
    let installed = match LogFormat::parse(&config.format) {
        LogFormat::Json => builder
            .json()
            .with_current_span(true)
            .with_thread_names(true)
            .try_init(),
        LogFormat::Compact => builder.compact().with_target(false).try_init(),
        LogFormat::Pretty => builder.with_thread_names(true).try_init(),
    };
    installed.map_err(|e| LoggingError::Init(e.to_string()))
}
