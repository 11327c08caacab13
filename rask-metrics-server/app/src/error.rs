use crate::config::ConfigError;
use crate::middleware::PipelineError;
use crate::provider::ProviderError;
use crate::storage::StorageError;
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use rask_metrics_core::MetricError;
use rask_metrics_core::crypto::CryptoError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to load configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to initialize logging: {0}")]
    Logging(String),

    #[error("Failed to load key: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Failed to bind to address {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("gRPC server error: {0}")]
    Grpc(#[from] tonic::transport::Error),

    #[error("Server task failed: {0}")]
    Task(String),

    #[error("Server error: {0}")]
    Server(#[from] std::io::Error),
}

/// Every rejection the HTTP surface can produce, mapped to a status code in
/// one place.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("method not allowed")]
    MethodNotAllowed,
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %self, "request rejected");
        }
        (
            status,
            [(CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.to_string(),
        )
            .into_response()
    }
}

impl From<ProviderError> for ApiError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NotFound { .. }
            | ProviderError::Invalid(MetricError::EmptyId)
            | ProviderError::Storage(StorageError::Invalid(MetricError::EmptyId)) => {
                ApiError::NotFound(err.to_string())
            }
            ProviderError::Invalid(_)
            | ProviderError::Payload(_)
            | ProviderError::Storage(StorageError::KindConflict { .. })
            | ProviderError::Storage(StorageError::Invalid(_)) => {
                ApiError::BadRequest(err.to_string())
            }
            ProviderError::Storage(_) | ProviderError::Encode(_) => {
                ApiError::Internal(err.to_string())
            }
        }
    }
}

impl From<MetricError> for ApiError {
    fn from(err: MetricError) -> Self {
        ProviderError::from(err).into()
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::UntrustedSource(_) => ApiError::Forbidden(err.to_string()),
            PipelineError::MethodNotAllowed(_) => ApiError::MethodNotAllowed,
            PipelineError::UnsupportedContentType(_)
            | PipelineError::BadSignature
            | PipelineError::Decrypt(_)
            | PipelineError::Decompress(_)
            | PipelineError::Body(_) => ApiError::BadRequest(err.to_string()),
            PipelineError::Compress(_) => ApiError::Internal(err.to_string()),
        }
    }
}
