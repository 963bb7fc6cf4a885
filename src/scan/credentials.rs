//! Decryption of stored API credentials.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use rsa::pkcs8::DecodePrivateKey;
use rsa::{Oaep, RsaPrivateKey};
use std::path::Path;

/// Turns a stored (encrypted) credential into the plaintext API key.
pub trait CredentialCipher: Send + Sync {
    fn decrypt(&self, encrypted: &str) -> Result<String>;
}

/// RSA-OAEP (SHA-256) over base64 ciphertext, with a PKCS#8 PEM private key.
pub struct RsaCredentialCipher {
    key: RsaPrivateKey,
}

impl RsaCredentialCipher {
    pub fn from_pem(pem: &str) -> Result<Self> {
        let key = RsaPrivateKey::from_pkcs8_pem(pem).context("Invalid PKCS#8 private key")?;
        Ok(Self { key })
    }

    pub fn from_pem_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let pem = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read credential key {:?}", path.as_ref()))?;
        Self::from_pem(&pem)
    }
}

impl CredentialCipher for RsaCredentialCipher {
    fn decrypt(&self, encrypted: &str) -> Result<String> {
        let ciphertext = STANDARD
            .decode(encrypted.trim())
            .context("Credential is not valid base64")?;
        let plaintext = self
            .key
            .decrypt(Oaep::new::<sha2::Sha256>(), &ciphertext)
            .context("Failed to decrypt credential")?;
        String::from_utf8(plaintext).context("Decrypted credential is not UTF-8")
    }
}

/// Passes stored values through unchanged. For deployments that keep
/// credentials in plaintext and for tests.
pub struct PlaintextCredentialCipher;

impl CredentialCipher for PlaintextCredentialCipher {
    fn decrypt(&self, encrypted: &str) -> Result<String> {
        Ok(encrypted.to_string())
    }
}
