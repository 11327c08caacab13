//! axum adapters: the HTTP-only gates and the pipeline layer.

use super::stages::accepts_gzip;
use super::{InboundRequest, Pipeline, PipelineError};
use crate::error::ApiError;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::{
    ACCEPT_ENCODING, AsHeaderName, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE,
};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method};
use axum::middleware::Next;
use axum::response::Response;
use http_body_util::{BodyExt, Limited};
use rask_metrics_core::{HASH_KEY, REAL_IP_KEY};
use std::sync::Arc;

/// Only GET and POST reach the handlers.
pub async fn method_gate(request: Request, next: Next) -> Result<Response, ApiError> {
    if request.method() == Method::GET || request.method() == Method::POST {
        Ok(next.run(request).await)
    } else {
        Err(PipelineError::MethodNotAllowed(request.method().to_string()).into())
    }
}

/// Accepts `text/plain`, `application/json` or no content type at all.
pub async fn content_type_gate(request: Request, next: Next) -> Result<Response, ApiError> {
    if let Some(value) = request.headers().get(CONTENT_TYPE) {
        let raw = String::from_utf8_lossy(value.as_bytes()).into_owned();
        if !is_allowed_content_type(&raw) {
            return Err(PipelineError::UnsupportedContentType(raw).into());
        }
    }
    Ok(next.run(request).await)
}

pub fn is_allowed_content_type(value: &str) -> bool {
    let essence = value.split(';').next().unwrap_or_default().trim();
    essence.is_empty()
        || essence.eq_ignore_ascii_case("text/plain")
        || essence.eq_ignore_ascii_case("application/json")
}

fn header_string(headers: &HeaderMap, name: impl AsHeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Runs the request stages over the body, hands the handler a plain body,
/// then runs the response stages over whatever the handler produced.
pub async fn apply_pipeline(
    State(pipeline): State<Arc<Pipeline>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let (mut parts, body) = request.into_parts();
    let limit = usize::try_from(pipeline.max_body_bytes()).unwrap_or(usize::MAX);
    let bytes = Limited::new(body, limit)
        .collect()
        .await
        .map_err(|e| PipelineError::Body(e.to_string()))?
        .to_bytes();

    let inbound = InboundRequest {
        real_ip: header_string(&parts.headers, REAL_IP_KEY),
        signature: header_string(&parts.headers, HASH_KEY),
        content_encoding: header_string(&parts.headers, CONTENT_ENCODING),
        accepts_gzip: header_string(&parts.headers, ACCEPT_ENCODING)
            .is_some_and(|value| accepts_gzip(&value)),
        body: bytes.to_vec(),
    };
    let mut processed = pipeline.process_request(inbound)?;

    parts.headers.remove(CONTENT_ENCODING);
    parts.headers.remove(CONTENT_LENGTH);
    let body = std::mem::take(&mut processed.body);
    let response = next.run(Request::from_parts(parts, Body::from(body))).await;

    let (mut parts, body) = response.into_parts();
    let bytes = body
        .collect()
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to read response body: {e}")))?
        .to_bytes();
    let outbound = pipeline.finish_response(&processed, bytes.to_vec())?;

    parts.headers.remove(CONTENT_LENGTH);
    if let Some(encoding) = outbound.content_encoding {
        parts
            .headers
            .insert(CONTENT_ENCODING, HeaderValue::from_static(encoding));
    }
    if let Some(signature) = outbound.signature {
        let value = HeaderValue::from_str(&signature)
            .map_err(|e| ApiError::Internal(format!("Invalid response signature: {e}")))?;
        parts.headers.insert(HeaderName::from_static(HASH_KEY), value);
    }
    Ok(Response::from_parts(parts, Body::from(outbound.body)))
}
