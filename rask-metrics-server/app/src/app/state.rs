use crate::config::Settings;
use crate::error::ServerError;
use crate::handler::AppState;
use crate::middleware::Pipeline;
use crate::provider::Provider;
use crate::storage::{StorageHandle, build_storage};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

impl AppState {
    /// Loads keys, opens storage and wires the provider and pipeline.
    ///
    /// `storage_token` stops the file dumper; cancel it only after both
    /// servers have stopped so the final dump sees every write.
    pub async fn build(
        settings: &Settings,
        storage_token: CancellationToken,
    ) -> Result<(Self, StorageHandle), ServerError> {
        let pipeline = Pipeline::from_settings(settings)?;
        info!(stages = ?pipeline.stage_names(), "pipeline ready");

        let handle = build_storage(settings, storage_token).await?;
        let state = Self {
            provider: Arc::new(Provider::new(handle.storage.clone())),
            pipeline: Arc::new(pipeline),
        };
        Ok((state, handle))
    }
}
