use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::CryptoError;

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 signer shared by request signing and response verification.
///
/// Signatures travel as padded base64url text.
#[derive(Clone)]
pub struct Signer {
    mac: HmacSha256,
}

impl Signer {
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        let mac = HmacSha256::new_from_slice(key)
            .map_err(|e| CryptoError::InvalidHmacKey(e.to_string()))?;
        Ok(Self { mac })
    }

    pub fn sign(&self, payload: &[u8]) -> String {
        let mut mac = self.mac.clone();
        mac.update(payload);
        URL_SAFE.encode(mac.finalize().into_bytes())
    }

    /// Constant-time check of `signature` against `payload`.
    pub fn verify(&self, payload: &[u8], signature: &str) -> bool {
        let Ok(expected) = URL_SAFE.decode(signature.trim()) else {
            return false;
        };
        let mut mac = self.mac.clone();
        mac.update(payload);
        mac.verify_slice(&expected).is_ok()
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Signer(..)")
    }
}
