//! Token encryption module using AES-256-GCM
//!
//! Integration tokens are sealed before they reach the database. The additional
//! authenticated data binds each ciphertext to its `(user_id, provider)` owner, so a
//! ciphertext copied onto another user's row fails to decrypt.
//!
//! Payload layout: `0x01 | nonce (12 bytes) | ciphertext + tag (16 bytes)`.

#![allow(deprecated)]

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
};
use thiserror::Error;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::providers::Provider;

const VERSION_ENCRYPTED: u8 = 0x01;
const VERSION_FIELD_LEN: usize = 1;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const MIN_ENCRYPTED_LEN: usize = VERSION_FIELD_LEN + NONCE_LEN + TAG_LEN;

/// Crypto error types
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("invalid ciphertext format")]
    InvalidFormat,
    #[error("empty ciphertext")]
    EmptyCiphertext,
}

/// Secure wrapper for encryption keys with zeroization
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ZeroizingKey(Vec<u8>);

/// Type alias for crypto keys
pub type CryptoKey = ZeroizingKey;

impl CryptoKey {
    /// Create a new crypto key from bytes
    pub fn new(bytes: Vec<u8>) -> Result<Self, CryptoError> {
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKeyLength(bytes.len()));
        }
        Ok(ZeroizingKey(bytes))
    }

    /// Get the key as bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for ZeroizingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ZeroizingKey([REDACTED])")
    }
}

/// Encrypt bytes using AES-256-GCM
pub fn encrypt_bytes(
    key: &CryptoKey,
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher_key = Key::<Aes256Gcm>::from_slice(key.as_bytes());
    let cipher = Aes256Gcm::new(cipher_key);

    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let mut ciphertext = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut result = Vec::with_capacity(VERSION_FIELD_LEN + NONCE_LEN + ciphertext.len());
    result.push(VERSION_ENCRYPTED);
    result.extend_from_slice(&nonce);
    result.append(&mut ciphertext);

    Ok(result)
}

/// Decrypt bytes using AES-256-GCM
pub fn decrypt_bytes(
    key: &CryptoKey,
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.is_empty() {
        return Err(CryptoError::EmptyCiphertext);
    }

    if !is_encrypted_payload(ciphertext) {
        return Err(CryptoError::InvalidFormat);
    }

    let nonce = Nonce::from_slice(&ciphertext[VERSION_FIELD_LEN..VERSION_FIELD_LEN + NONCE_LEN]);
    let tag_and_ct = &ciphertext[VERSION_FIELD_LEN + NONCE_LEN..];

    let cipher_key = Key::<Aes256Gcm>::from_slice(key.as_bytes());
    let cipher = Aes256Gcm::new(cipher_key);

    cipher
        .decrypt(
            nonce,
            Payload {
                msg: tag_and_ct,
                aad,
            },
        )
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
}

/// Determine if a payload is using the encrypted format
pub fn is_encrypted_payload(ciphertext: &[u8]) -> bool {
    ciphertext.len() >= MIN_ENCRYPTED_LEN && ciphertext[0] == VERSION_ENCRYPTED
}

fn token_aad(user_id: Uuid, provider: Provider) -> String {
    format!("{}|{}", user_id, provider)
}

/// Seals a provider token for storage on the `(user_id, provider)` integration row.
pub fn encrypt_token(
    key: &CryptoKey,
    user_id: Uuid,
    provider: Provider,
    token: &str,
) -> Result<Vec<u8>, CryptoError> {
    encrypt_bytes(key, token_aad(user_id, provider).as_bytes(), token.as_bytes())
}

/// Opens a token sealed by [`encrypt_token`] for the same owner.
pub fn decrypt_token(
    key: &CryptoKey,
    user_id: Uuid,
    provider: Provider,
    ciphertext: &[u8],
) -> Result<String, CryptoError> {
    let bytes = decrypt_bytes(key, token_aad(user_id, provider).as_bytes(), ciphertext)?;
    String::from_utf8(bytes)
        .map_err(|e| CryptoError::DecryptionFailed(format!("Invalid UTF-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> CryptoKey {
        CryptoKey::new(vec![0u8; 32]).expect("valid test key")
    }

    #[test]
    fn test_token_roundtrip_for_owner() {
        let key = test_key();
        let user_id = Uuid::new_v4();

        let sealed = encrypt_token(&key, user_id, Provider::Calendly, "access-123").unwrap();
        assert!(is_encrypted_payload(&sealed));
        assert!(!sealed.windows(10).any(|w| w == b"access-123"));

        let opened = decrypt_token(&key, user_id, Provider::Calendly, &sealed).unwrap();
        assert_eq!(opened, "access-123");
    }

    #[test]
    fn test_token_bound_to_user_and_provider() {
        let key = test_key();
        let user_id = Uuid::new_v4();
        let sealed = encrypt_token(&key, user_id, Provider::Youtube, "refresh").unwrap();

        assert!(decrypt_token(&key, Uuid::new_v4(), Provider::Youtube, &sealed).is_err());
        assert!(decrypt_token(&key, user_id, Provider::Calendly, &sealed).is_err());
    }

    #[test]
    fn test_modified_ciphertext_fails() {
        let key = test_key();
        let mut encrypted = encrypt_bytes(&key, b"aad", b"secret message").unwrap();
        encrypted[13] ^= 0x01;

        assert!(decrypt_bytes(&key, b"aad", &encrypted).is_err());
    }

    #[test]
    fn test_nonce_uniqueness() {
        let key = test_key();
        let encrypted1 = encrypt_bytes(&key, b"aad", b"secret").unwrap();
        let encrypted2 = encrypt_bytes(&key, b"aad", b"secret").unwrap();

        assert_ne!(&encrypted1[1..13], &encrypted2[1..13]);
    }

    #[test]
    fn test_plaintext_payload_rejected() {
        let key = test_key();
        assert!(matches!(
            decrypt_bytes(&key, b"aad", b"plain-token"),
            Err(CryptoError::InvalidFormat)
        ));
        assert!(matches!(
            decrypt_bytes(&key, b"aad", &[VERSION_ENCRYPTED, 0x02]),
            Err(CryptoError::InvalidFormat)
        ));
        assert!(matches!(
            decrypt_bytes(&key, b"aad", &[]),
            Err(CryptoError::EmptyCiphertext)
        ));
    }

    #[test]
    fn test_invalid_key_length_rejected() {
        assert!(matches!(
            CryptoKey::new(vec![0u8; 16]),
            Err(CryptoError::InvalidKeyLength(16))
        ));
        assert!(CryptoKey::new(vec![0u8; 64]).is_err());
    }

    #[test]
    fn test_key_debug_is_redacted() {
        let key = CryptoKey::new(vec![42u8; 32]).unwrap();
        assert_eq!(format!("{key:?}"), "ZeroizingKey([REDACTED])");
    }
}
