use rask_metrics_core::compression::{self, CodecError};
use rask_metrics_core::crypto::{CryptoError, PublicKey, Signer};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SealError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Wire bytes plus the signature that goes into `HashSHA256`.
#[derive(Debug, Clone)]
pub struct SealedPayload {
    pub bytes: Vec<u8>,
    pub signature: Option<String>,
}

/// Prepares a batch for the wire: gzip, then RSA when a public key is
/// loaded, then HMAC over the final bytes when a key is configured.
#[derive(Debug, Clone, Default)]
pub struct Sealer {
    public_key: Option<PublicKey>,
    signer: Option<Signer>,
}

impl Sealer {
    pub fn new(public_key: Option<PublicKey>, signer: Option<Signer>) -> Self {
        Self { public_key, signer }
    }

    pub fn seal(&self, body: &[u8]) -> Result<SealedPayload, SealError> {
        let compressed = compression::compress(body)?;
        let bytes = match &self.public_key {
            Some(key) => key.encrypt(&compressed)?,
            None => compressed,
        };
        let signature = self.signer.as_ref().map(|signer| signer.sign(&bytes));
        Ok(SealedPayload { bytes, signature })
    }
}
