// AES-256-GCM encryption stage and key material

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use argon2::Argon2;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;

use super::TransformStage;
use crate::{BackupError, Result};

/// Size of an AES-256 key in bytes
pub const KEY_LEN: usize = 32;
/// Size of the GCM nonce prepended to every artifact
pub const NONCE_LEN: usize = 12;

/// 256-bit key used to seal backup artifacts
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey {
    key: [u8; KEY_LEN],
}

impl EncryptionKey {
    /// Generate a fresh random key from the OS RNG
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        Self { key }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let key: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            BackupError::ConfigValidation(format!(
                "Encryption key must be {} bytes, got {}",
                KEY_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self { key })
    }

    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = STANDARD.decode(encoded.trim()).map_err(|e| {
            BackupError::ConfigValidation(format!("Encryption key is not valid base64: {}", e))
        })?;
        Self::from_bytes(&bytes)
    }

    /// Stretch a passphrase into a key with Argon2id. `salt` must be at least 8 bytes.
    pub fn derive_from_passphrase(passphrase: &str, salt: &[u8]) -> Result<Self> {
        let mut key = [0u8; KEY_LEN];
        Argon2::default()
            .hash_password_into(passphrase.as_bytes(), salt, &mut key)
            .map_err(|e| BackupError::Encryption(format!("Key derivation failed: {}", e)))?;
        Ok(Self { key })
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.key)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.key
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(<redacted>)")
    }
}

/// Authenticated encryption stage.
///
/// Output layout is `nonce || ciphertext || tag`; a new nonce is drawn for every artifact.
#[derive(Clone)]
pub struct AesGcmStage {
    cipher: Aes256Gcm,
}

impl AesGcmStage {
    pub fn new(key: &EncryptionKey) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes())),
        }
    }
}

impl TransformStage for AesGcmStage {
    fn name(&self) -> &'static str {
        "aes-256-gcm"
    }

    fn forward(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), data)
            .map_err(|e| BackupError::Encryption(format!("Failed to encrypt artifact: {}", e)))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    fn backward(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < NONCE_LEN {
            return Err(BackupError::Encryption(format!(
                "Artifact too short to hold a nonce ({} bytes)",
                data.len()
            )));
        }
        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| {
                BackupError::Encryption(
                    "Failed to decrypt artifact: wrong key or tampered ciphertext".to_string(),
                )
            })
    }
}
