use crate::error::ServerError;
use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Dependencies whose logs are pinned to `warn`.
const QUIET_TARGETS: &[&str] = &["hyper", "hyper_util", "h2", "tower", "tonic", "sqlx", "reqwest"];

/// The configured level first, then the quiet targets, then any `RUST_LOG`
/// directives so they can override both.
pub fn filter_string(level: Level, extra: Option<&str>) -> String {
    let mut parts = vec![level.to_string().to_ascii_lowercase()];
    parts.extend(QUIET_TARGETS.iter().map(|target| format!("{target}=warn")));
    if let Some(extra) = extra.filter(|e| !e.is_empty()) {
        parts.push(extra.to_string());
    }
    parts.join(",")
}

/// Initialize the tracing subscriber.
/// Uses JSON format when `RUST_LOG_FORMAT=json` (default for production).
pub fn init_tracing(level: Level) -> Result<(), ServerError> {
    let use_json = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(true);
    let extra = std::env::var("RUST_LOG").ok();
    let directives = filter_string(level, extra.as_deref());
    let filter = EnvFilter::try_new(&directives)
        .map_err(|e| ServerError::Logging(format!("invalid filter '{directives}': {e}")))?;

    let result = if use_json {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(true),
            )
            .with(filter)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .try_init()
    };
    result.map_err(|e| ServerError::Logging(e.to_string()))
}
