//! AES-256-GCM encryption for stored API credentials.
//!
//! Tokens are `base64(nonce || ciphertext || tag)` with a fresh 96-bit nonce per
//! call, so encrypting the same secret twice never yields the same token. Any
//! failure to open a token (bad encoding, truncation, tag mismatch) is reported
//! as an authentication failure and never as partial plaintext.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;
use zeroize::Zeroizing;

use crate::error::{ForwarderError, Result};

/// Environment variable holding the hex-encoded 256-bit key.
pub const ENCRYPTION_KEY_ENV: &str = "ENCRYPTION_KEY";

/// Key size for AES-256 (256 bits / 32 bytes).
pub const KEY_SIZE: usize = 32;

/// Nonce size for AES-GCM (96 bits / 12 bytes).
const NONCE_SIZE: usize = 12;

/// GCM authentication tag size.
const TAG_SIZE: usize = 16;

/// Encrypts and decrypts single secret strings under one fixed key.
#[derive(Clone)]
pub struct EncryptionService {
    cipher: Aes256Gcm,
}

impl fmt::Debug for EncryptionService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionService")
            .field("key", &"<redacted>")
            .finish()
    }
}

impl EncryptionService {
    /// Creates a service from raw key bytes.
    ///
    /// # Errors
    ///
    /// Returns a configuration error unless the key is exactly 32 bytes.
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.len() != KEY_SIZE {
            return Err(ForwarderError::configuration(format!(
                "Encryption key must be exactly {} bytes for AES-256, got {}",
                KEY_SIZE,
                key.len()
            )));
        }

        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| ForwarderError::configuration(format!("Failed to create cipher: {e}")))?;

        Ok(Self { cipher })
    }

    /// Creates a service from a hex-encoded key.
    pub fn from_hex(key_hex: &str) -> Result<Self> {
        let bytes = Zeroizing::new(hex::decode(key_hex.trim()).map_err(|e| {
            ForwarderError::configuration(format!(
                "Invalid {ENCRYPTION_KEY_ENV} format (must be hex): {e}"
            ))
        })?);

        Self::new(&bytes)
    }

    /// Creates a service from the value of the key environment variable.
    ///
    /// A missing or empty value is a configuration error that tells the operator
    /// how to produce a key.
    pub fn from_env_value(value: Option<&str>) -> Result<Self> {
        match value {
            Some(v) if !v.trim().is_empty() => Self::from_hex(v),
            _ => Err(ForwarderError::configuration(format!(
                "{ENCRYPTION_KEY_ENV} environment variable is not set. \
                 Generate one with: query-forwarder --generate-key"
            ))),
        }
    }

    /// Creates a service from the `ENCRYPTION_KEY` environment variable.
    pub fn from_env() -> Result<Self> {
        let value = std::env::var(ENCRYPTION_KEY_ENV).ok().map(Zeroizing::new);
        Self::from_env_value(value.as_deref().map(String::as_str))
    }

    /// Generates a new random 32-byte key from the OS CSPRNG.
    pub fn generate_key() -> [u8; KEY_SIZE] {
        let mut key = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        key
    }

    /// Encrypts a UTF-8 string and returns a self-contained base64 token.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| ForwarderError::internal(format!("Encryption failed: {e}")))?;

        let mut token = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        token.extend_from_slice(&nonce_bytes);
        token.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(token))
    }

    /// Decrypts a token produced by [`EncryptionService::encrypt`].
    ///
    /// # Errors
    ///
    /// Returns `AuthenticationFailure` if the token is malformed, was produced
    /// under a different key, or has been altered in any way.
    pub fn decrypt(&self, token: &str) -> Result<String> {
        let data = BASE64
            .decode(token.trim())
            .map_err(|_| ForwarderError::authentication("Encrypted token is not valid base64"))?;

        if data.len() < NONCE_SIZE + TAG_SIZE {
            return Err(ForwarderError::authentication(format!(
                "Encrypted token too short: expected at least {} bytes, got {}",
                NONCE_SIZE + TAG_SIZE,
                data.len()
            )));
        }

        let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| {
                ForwarderError::authentication(
                    "Decryption failed: authentication tag verification failed",
                )
            })?;

        String::from_utf8(plaintext)
            .map_err(|_| ForwarderError::authentication("Decrypted secret is not valid UTF-8"))
    }
}
