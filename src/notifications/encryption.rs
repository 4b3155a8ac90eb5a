//! Symmetric encryption for channel secrets at rest, adapted from the teacher's
//! `notifications::encryption::EncryptionService`. AES-256-GCM with a random 96-bit nonce
//! prepended to the ciphertext; the result is hex-encoded for storage in the JSON config file.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EncryptionError {
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("invalid ciphertext encoding: {0}")]
    InvalidEncoding(#[from] hex::FromHexError),
}

pub struct EncryptionService {
    cipher: Aes256Gcm,
}

impl EncryptionService {
    /// Derives a 32-byte AES key from the configured passphrase via SHA-256, so operators can
    /// set `NOTIFICATION_ENCRYPTION_KEY` to any string rather than a raw 32-byte secret.
    pub fn new(passphrase: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(passphrase.as_bytes());
        let key = hasher.finalize();
        Self {
            cipher: Aes256Gcm::new_from_slice(&key).expect("sha256 output is always 32 bytes"),
        }
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, EncryptionError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| EncryptionError::EncryptionFailed(e.to_string()))?;
        let mut out = nonce.to_vec();
        out.extend_from_slice(&ciphertext);
        Ok(hex::encode(out))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String, EncryptionError> {
        let raw = hex::decode(encoded)?;
        if raw.len() < 12 {
            return Err(EncryptionError::DecryptionFailed(
                "ciphertext too short to contain a nonce".to_string(),
            ));
        }
        let (nonce_bytes, ciphertext) = raw.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| EncryptionError::DecryptionFailed(e.to_string()))?;
        String::from_utf8(plaintext)
            .map_err(|e| EncryptionError::DecryptionFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_encrypt_decrypt() {
        let svc = EncryptionService::new("test-passphrase");
        let encrypted = svc.encrypt("super-secret-token").unwrap();
        assert_ne!(encrypted, "super-secret-token");
        assert_eq!(svc.decrypt(&encrypted).unwrap(), "super-secret-token");
    }

    #[test]
    fn different_passphrases_cannot_decrypt_each_other() {
        let a = EncryptionService::new("key-a");
        let b = EncryptionService::new("key-b");
        let encrypted = a.encrypt("payload").unwrap();
        assert!(b.decrypt(&encrypted).is_err());
    }
}
