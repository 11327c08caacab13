use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::rand_core::OsRng;
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use serde::Deserialize;
use sha2::Sha256;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Failed to read key file {path}: {source}")]
    ReadKey {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse {what} key: {reason}")]
    ParseKey { what: &'static str, reason: String },
    #[error("Unknown padding scheme: {0}")]
    UnknownPadding(String),
    #[error("Encryption failed: {0}")]
    Encrypt(#[source] rsa::Error),
    #[error("Decryption failed: {0}")]
    Decrypt(#[source] rsa::Error),
    #[error("Ciphertext length {len} is not a multiple of the {block}-byte key size")]
    Misaligned { len: usize, block: usize },
    #[error("Invalid HMAC key: {0}")]
    InvalidHmacKey(String),
}

/// RSA padding scheme. Agent and server must be configured with the same one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Padding {
    #[default]
    Pkcs1v15,
    /// OAEP with SHA-256 for both the label hash and MGF1.
    Oaep,
}

impl Padding {
    /// Bytes of each plaintext chunk lost to padding.
    fn overhead(self) -> usize {
        match self {
            Padding::Pkcs1v15 => 11,
            // 2 * hash length + 2
            Padding::Oaep => 66,
        }
    }
}

impl FromStr for Padding {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pkcs1v15" | "pkcs1" => Ok(Padding::Pkcs1v15),
            "oaep" => Ok(Padding::Oaep),
            other => Err(CryptoError::UnknownPadding(other.to_string())),
        }
    }
}

impl fmt::Display for Padding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Padding::Pkcs1v15 => f.write_str("pkcs1v15"),
            Padding::Oaep => f.write_str("oaep"),
        }
    }
}

fn read_pem(path: &Path) -> Result<String, CryptoError> {
    std::fs::read_to_string(path).map_err(|source| CryptoError::ReadKey {
        path: path.to_path_buf(),
        source,
    })
}

/// Agent-side key. Encrypts payloads block by block.
#[derive(Debug, Clone)]
pub struct PublicKey {
    inner: RsaPublicKey,
    padding: Padding,
}

impl PublicKey {
    pub fn from_pem_file(path: impl AsRef<Path>, padding: Padding) -> Result<Self, CryptoError> {
        Self::from_pem(&read_pem(path.as_ref())?, padding)
    }

    /// Accepts both `PUBLIC KEY` (SPKI) and `RSA PUBLIC KEY` (PKCS#1) documents.
    pub fn from_pem(pem: &str, padding: Padding) -> Result<Self, CryptoError> {
        let inner = RsaPublicKey::from_public_key_pem(pem)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
            .map_err(|e| CryptoError::ParseKey {
                what: "public",
                reason: e.to_string(),
            })?;
        Ok(Self { inner, padding })
    }

    /// Largest plaintext chunk a single RSA block can carry.
    pub fn chunk_size(&self) -> usize {
        self.inner.size() - self.padding.overhead()
    }

    /// Encrypts `data` in independent chunks and concatenates the ciphertext
    /// blocks. Every output block is exactly the key size long.
    pub fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut rng = OsRng;
        let chunk_size = self.chunk_size();
        let blocks = data.len().div_ceil(chunk_size).max(1);
        let mut out = Vec::with_capacity(blocks * self.inner.size());

        // An empty payload still yields one block so the server always sees ciphertext.
        let chunks: Vec<&[u8]> = if data.is_empty() {
            vec![data]
        } else {
            data.chunks(chunk_size).collect()
        };

        for chunk in chunks {
            let block = match self.padding {
                Padding::Pkcs1v15 => self.inner.encrypt(&mut rng, Pkcs1v15Encrypt, chunk),
                Padding::Oaep => self.inner.encrypt(&mut rng, Oaep::new::<Sha256>(), chunk),
            }
            .map_err(CryptoError::Encrypt)?;
            out.extend_from_slice(&block);
        }
        Ok(out)
    }
}

/// Server-side key. Decrypts what [`PublicKey::encrypt`] produced.
#[derive(Debug, Clone)]
pub struct PrivateKey {
    inner: RsaPrivateKey,
    padding: Padding,
}

impl PrivateKey {
    pub fn from_pem_file(path: impl AsRef<Path>, padding: Padding) -> Result<Self, CryptoError> {
        Self::from_pem(&read_pem(path.as_ref())?, padding)
    }

    /// Accepts both `PRIVATE KEY` (PKCS#8) and `RSA PRIVATE KEY` (PKCS#1) documents.
    pub fn from_pem(pem: &str, padding: Padding) -> Result<Self, CryptoError> {
        let inner = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| CryptoError::ParseKey {
                what: "private",
                reason: e.to_string(),
            })?;
        Ok(Self { inner, padding })
    }

    pub fn from_rsa(inner: RsaPrivateKey, padding: Padding) -> Self {
        Self { inner, padding }
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            inner: self.inner.to_public_key(),
            padding: self.padding,
        }
    }

    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let block = self.inner.size();
        if data.is_empty() || data.len() % block != 0 {
            return Err(CryptoError::Misaligned {
                len: data.len(),
                block,
            });
        }

        let mut out = Vec::with_capacity(data.len());
        for chunk in data.chunks(block) {
            let plain = match self.padding {
                Padding::Pkcs1v15 => self.inner.decrypt(Pkcs1v15Encrypt, chunk),
                Padding::Oaep => self.inner.decrypt(Oaep::new::<Sha256>(), chunk),
            }
            .map_err(CryptoError::Decrypt)?;
            out.extend_from_slice(&plain);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs1::EncodeRsaPrivateKey;
    use rsa::pkcs8::{EncodePublicKey, LineEnding};

    fn generate(padding: Padding) -> PrivateKey {
        let key = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        PrivateKey::from_rsa(key, padding)
    }

    #[test]
    fn test_multi_block_payload_survives_encryption() {
        for padding in [Padding::Pkcs1v15, Padding::Oaep] {
            let private = generate(padding);
            let public = private.public_key();
            let payload: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();

            let sealed = public.encrypt(&payload).unwrap();
            assert_eq!(sealed.len() % 128, 0);
            assert!(sealed.len() > 128);
            assert_eq!(private.decrypt(&sealed).unwrap(), payload);
        }
    }

    #[test]
    fn test_pem_documents_are_accepted() {
        let key = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        let private_pem = key.to_pkcs1_pem(LineEnding::LF).unwrap();
        let public_pem = key.to_public_key().to_public_key_pem(LineEnding::LF).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let private_path = dir.path().join("private.pem");
        let public_path = dir.path().join("public.pem");
        std::fs::write(&private_path, private_pem.as_bytes()).unwrap();
        std::fs::write(&public_path, public_pem.as_bytes()).unwrap();

        let private = PrivateKey::from_pem_file(&private_path, Padding::Pkcs1v15).unwrap();
        let public = PublicKey::from_pem_file(&public_path, Padding::Pkcs1v15).unwrap();
        let sealed = public.encrypt(b"hello").unwrap();
        assert_eq!(private.decrypt(&sealed).unwrap(), b"hello");
    }

    #[test]
    fn test_missing_and_malformed_keys() {
        assert!(matches!(
            PublicKey::from_pem_file("/nonexistent/key.pem", Padding::Pkcs1v15),
            Err(CryptoError::ReadKey { .. })
        ));
        assert!(matches!(
            PrivateKey::from_pem("-----BEGIN NOTHING-----", Padding::Pkcs1v15),
            Err(CryptoError::ParseKey { what: "private", .. })
        ));
    }

    #[test]
    fn test_truncated_ciphertext_is_rejected() {
        let private = generate(Padding::Pkcs1v15);
        let sealed = private.public_key().encrypt(b"payload").unwrap();
        assert!(matches!(
            private.decrypt(&sealed[..sealed.len() - 1]),
            Err(CryptoError::Misaligned { .. })
        ));
        assert!(private.decrypt(&[0u8; 128]).is_err());
    }

    #[test]
    fn test_padding_from_str() {
        assert_eq!("oaep".parse::<Padding>().unwrap(), Padding::Oaep);
        assert_eq!("PKCS1v15".parse::<Padding>().unwrap(), Padding::Pkcs1v15);
        assert!("none".parse::<Padding>().is_err());
    }
}
