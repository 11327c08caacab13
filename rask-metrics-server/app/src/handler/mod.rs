pub mod health;
pub mod metrics;

use crate::middleware::Pipeline;
use crate::provider::Provider;
use std::sync::Arc;

/// State shared by every HTTP handler.
#[derive(Clone)]
pub struct AppState {
    pub provider: Arc<Provider>,
    pub pipeline: Arc<Pipeline>,
}
