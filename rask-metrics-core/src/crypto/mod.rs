//! RSA payload encryption and HMAC-SHA256 payload signing.

pub mod keys;
pub mod signer;

pub use keys::{CryptoError, Padding, PrivateKey, PublicKey};
pub use signer::Signer;
