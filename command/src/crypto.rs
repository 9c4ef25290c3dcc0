//! AES-256-GCM encryption of identity-provider secrets.
//!
//! Client secrets and LDAP bind passwords never enter the event log in plain
//! text. They are stored as an [`EncryptedSecret`]: the key id plus
//! `base64(nonce || ciphertext)`.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Algorithm tag written into every [`EncryptedSecret`].
pub const ALGORITHM: &str = "aes-256-gcm";

const NONCE_LEN: usize = 12;

/// Errors from [`SecretCrypto`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// The key is not 32 bytes.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Encryption failed.
    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// The value was encrypted with another key or is malformed.
    #[error("Decryption failed: {0}")]
    Decryption(String),
}

/// An encrypted secret as stored in event payloads.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedSecret {
    /// Always [`ALGORITHM`].
    pub algorithm: String,
    /// Id of the key the secret was encrypted with.
    pub key_id: String,
    /// `base64(nonce || ciphertext)`.
    pub crypted: String,
}

impl fmt::Debug for EncryptedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedSecret")
            .field("algorithm", &self.algorithm)
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

/// Encrypts and decrypts secrets with one AES-256-GCM key.
///
/// Cheap to clone; every encryption draws a fresh random nonce.
#[derive(Clone)]
pub struct SecretCrypto {
    key_id: String,
    cipher: Arc<Aes256Gcm>,
}

impl SecretCrypto {
    /// Create from a 32-byte key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKey`] if `key` is not exactly 32 bytes.
    pub fn new(key_id: impl Into<String>, key: &[u8]) -> Result<Self, CryptoError> {
        if key.len() != 32 {
            return Err(CryptoError::InvalidKey(format!(
                "expected 32 bytes for AES-256-GCM, got {}",
                key.len()
            )));
        }
        let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self {
            key_id: key_id.into(),
            cipher: Arc::new(cipher),
        })
    }

    /// Create from a base64-encoded 32-byte key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKey`] if the value is not base64 or has
    /// the wrong length.
    pub fn from_base64(key_id: impl Into<String>, encoded: &str) -> Result<Self, CryptoError> {
        let key = STANDARD
            .decode(encoded.trim())
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Self::new(key_id, &key)
    }

    /// Id of the active key.
    #[must_use]
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Encrypt `plaintext`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Encryption`] if the cipher fails.
    pub fn encrypt(&self, plaintext: &str) -> Result<EncryptedSecret, CryptoError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| CryptoError::Encryption(e.to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);

        Ok(EncryptedSecret {
            algorithm: ALGORITHM.to_string(),
            key_id: self.key_id.clone(),
            crypted: STANDARD.encode(sealed),
        })
    }

    /// Decrypt a secret produced by [`SecretCrypto::encrypt`] with the same key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Decryption`] for a foreign key id, malformed
    /// data or a failed authentication tag.
    pub fn decrypt(&self, secret: &EncryptedSecret) -> Result<String, CryptoError> {
        if secret.key_id != self.key_id {
            return Err(CryptoError::Decryption(format!("unknown key id {}", secret.key_id)));
        }
        let sealed = STANDARD
            .decode(&secret.crypted)
            .map_err(|e| CryptoError::Decryption(e.to_string()))?;
        if sealed.len() < NONCE_LEN {
            return Err(CryptoError::Decryption("ciphertext too short".to_string()));
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| CryptoError::Decryption(e.to_string()))?;
        String::from_utf8(plaintext).map_err(|e| CryptoError::Decryption(e.to_string()))
    }
}

impl fmt::Debug for SecretCrypto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretCrypto")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn crypto() -> SecretCrypto {
        SecretCrypto::new("key-1", &[7u8; 32]).unwrap()
    }

    #[test]
    fn rejects_short_key() {
        assert!(matches!(
            SecretCrypto::new("key-1", &[0u8; 16]),
            Err(CryptoError::InvalidKey(_))
        ));
    }

    #[test]
    fn encrypts_with_fresh_nonce() {
        let crypto = crypto();
        let a = crypto.encrypt("client-secret").unwrap();
        let b = crypto.encrypt("client-secret").unwrap();

        assert_ne!(a.crypted, b.crypted);
        assert_eq!(a.algorithm, ALGORITHM);
        assert_eq!(crypto.decrypt(&a).unwrap(), "client-secret");
    }

    #[test]
    fn foreign_key_cannot_decrypt() {
        let secret = crypto().encrypt("bind-password").unwrap();
        let other = SecretCrypto::new("key-2", &[9u8; 32]).unwrap();
        assert!(other.decrypt(&secret).is_err());

        let same_id = SecretCrypto::new("key-1", &[9u8; 32]).unwrap();
        assert!(matches!(same_id.decrypt(&secret), Err(CryptoError::Decryption(_))));
    }

    #[test]
    fn debug_hides_ciphertext() {
        let secret = crypto().encrypt("client-secret").unwrap();
        assert!(!format!("{secret:?}").contains(&secret.crypted));
    }

    #[test]
    fn base64_key() {
        let crypto = SecretCrypto::from_base64("key-1", &STANDARD.encode([1u8; 32])).unwrap();
        assert_eq!(crypto.key_id(), "key-1");
    }
}
