use crate::handler::AppState;
use crate::handler::health::ping_handler;
use crate::handler::metrics::{
    list, summary, update_batch, update_json, update_positional, value_json, value_positional,
};
use crate::middleware::http::{apply_pipeline, content_type_gate, method_gate};
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post};

/// Builds the HTTP router. Requests pass the method gate, the content-type
/// gate and the pipeline, in that order, before reaching a handler.
pub fn router(state: AppState) -> Router {
    let body_limit = usize::try_from(state.pipeline.max_body_bytes()).unwrap_or(usize::MAX);
    let pipeline = state.pipeline.clone();

    Router::new()
        .route("/", get(summary))
        .route("/ping", get(ping_handler))
        .route("/update/", post(update_json))
        .route("/update/{kind}/{id}/{value}", post(update_positional))
        .route("/updates/", post(update_batch).get(list))
        .route("/value/", post(value_json))
        .route("/value/{kind}/{id}", get(value_positional))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(from_fn_with_state(pipeline, apply_pipeline))
        .layer(from_fn(content_type_gate))
        .layer(from_fn(method_gate))
}
