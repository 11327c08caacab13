use super::AppState;
use crate::error::ApiError;
use axum::extract::State;
use tracing::debug;

/// Handler for GET /ping
pub async fn ping_handler(State(state): State<AppState>) -> Result<&'static str, ApiError> {
    state.provider.ping().await?;
    debug!("Ping succeeded");
    Ok("OK")
}
