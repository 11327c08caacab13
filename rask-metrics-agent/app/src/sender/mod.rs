pub mod envelope;
pub mod grpc;
pub mod http;
pub mod retry;

use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

pub use envelope::{SealError, SealedPayload, Sealer};
pub use grpc::GrpcTransport;
pub use http::HttpTransport;
pub use retry::ReliableTransport;

#[derive(Error, Debug)]
pub enum TransmissionError {
    #[error("Sealing payload failed: {0}")]
    Seal(#[from] SealError),
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Server answered HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::Status),
    #[error("Server rejected batch: {0}")]
    Rejected(String),
    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(String),
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

impl TransmissionError {
    /// Network failures and any non-success answer are retried; local
    /// preparation errors would fail the same way again.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            TransmissionError::Seal(_)
                | TransmissionError::InvalidHeaderValue(_)
                | TransmissionError::InvalidEndpoint(_)
        )
    }
}

pub type SendFuture<'a> = Pin<Box<dyn Future<Output = Result<(), TransmissionError>> + Send + 'a>>;

/// Delivers one serialized JSON batch to the server.
pub trait Transport: Send + Sync {
    fn send<'a>(&'a self, body: &'a [u8]) -> SendFuture<'a>;

    fn name(&self) -> &'static str;
}
