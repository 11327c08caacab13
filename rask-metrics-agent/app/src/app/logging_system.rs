use super::config::LogLevel;
use thiserror::Error;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid log filter '{filter}': {source}")]
    InvalidFilter {
        filter: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },
    #[error("Failed to install global subscriber: {0}")]
    AlreadyInitialized(String),
}

/// Targets that are too chatty at the agent's own level.
const QUIET_TARGETS: &[&str] = &["hyper", "hyper_util", "reqwest", "h2", "tower", "tonic"];

/// Builds and installs the tracing subscriber.
#[derive(Debug, Clone)]
pub struct LoggingSystem {
    level: LogLevel,
    json: bool,
    extra: Option<String>,
}

impl LoggingSystem {
    /// `RUST_LOG_FORMAT=json` (the default) selects flattened JSON output;
    /// `RUST_LOG` directives are layered after the defaults.
    pub fn from_env(level: LogLevel) -> Self {
        let json = std::env::var("RUST_LOG_FORMAT")
            .map(|v| v == "json")
            .unwrap_or(true);
        Self {
            level,
            json,
            extra: std::env::var("RUST_LOG").ok().filter(|v| !v.is_empty()),
        }
    }

    pub fn new(level: LogLevel, json: bool, extra: Option<String>) -> Self {
        Self { level, json, extra }
    }

    pub fn build_filter_string(&self) -> String {
        let mut parts = vec![self.level.as_str().to_string()];
        parts.extend(QUIET_TARGETS.iter().map(|target| format!("{target}=warn")));
        if let Some(extra) = &self.extra {
            parts.push(extra.clone());
        }
        parts.join(",")
    }

    pub fn initialize(&self) -> Result<(), LoggingError> {
        let filter_string = self.build_filter_string();
        let filter = EnvFilter::try_new(&filter_string).map_err(|source| {
            LoggingError::InvalidFilter {
                filter: filter_string.clone(),
                source,
            }
        })?;

        let result = if self.json {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().flatten_event(true).with_current_span(true))
                .try_init()
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_target(true).compact())
                .try_init()
        };
        result.map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))
    }
}
