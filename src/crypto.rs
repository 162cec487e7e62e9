//! Authenticated encryption for stored credential payloads.
//!
//! Uses ChaCha20-Poly1305 with a single process-wide key loaded at startup.
//! Every encryption draws a fresh random nonce, which is prepended to the
//! ciphertext; tampering with either part makes decryption fail.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;
use zeroize::{Zeroize, Zeroizing};

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Cryptographic errors
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid base64 encoding: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Key must be 32 bytes, base64-encoded")]
    InvalidKeyLength,

    #[error("Ciphertext too short")]
    TruncatedCiphertext,

    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed - invalid ciphertext or wrong key")]
    DecryptionFailed,
}

/// Result type for crypto operations
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Symmetric cipher for credential payloads.
///
/// Holds no per-request state and is cheap to clone; the key material itself
/// lives only inside the cipher and is never logged.
#[derive(Clone)]
pub struct PayloadCipher {
    cipher: ChaCha20Poly1305,
}

impl PayloadCipher {
    /// Build a cipher from a base64-encoded 32-byte key.
    pub fn from_base64(key_base64: &str) -> CryptoResult<Self> {
        let mut key_bytes = BASE64.decode(key_base64.trim())?;
        if key_bytes.len() != KEY_LEN {
            key_bytes.zeroize();
            return Err(CryptoError::InvalidKeyLength);
        }
        let cipher = ChaCha20Poly1305::new_from_slice(&key_bytes)
            .map_err(|_| CryptoError::InvalidKeyLength)?;
        key_bytes.zeroize();
        Ok(Self { cipher })
    }

    /// Generate a fresh key, base64-encoded, for operator setup.
    pub fn generate_key() -> String {
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        let encoded = BASE64.encode(key);
        key.zeroize();
        encoded
    }

    /// Encrypt a plaintext secret. Output layout: nonce || ciphertext.
    pub fn encrypt(&self, plaintext: &str) -> CryptoResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut payload = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        payload.extend_from_slice(&nonce_bytes);
        payload.extend_from_slice(&ciphertext);
        Ok(payload)
    }

    /// Decrypt a payload produced by [`PayloadCipher::encrypt`].
    ///
    /// The plaintext comes back in a zeroizing buffer so it is wiped once the
    /// disclosing turn is done with it.
    pub fn decrypt(&self, payload: &[u8]) -> CryptoResult<Zeroizing<String>> {
        if payload.len() <= NONCE_LEN {
            return Err(CryptoError::TruncatedCiphertext);
        }
        let (nonce_bytes, ciphertext) = payload.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed)?;

        String::from_utf8(plaintext)
            .map(Zeroizing::new)
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_cipher() -> PayloadCipher {
        PayloadCipher::from_base64(&PayloadCipher::generate_key()).unwrap()
    }

    #[test]
    fn test_round_trip() {
        let cipher = test_cipher();
        let payload = cipher.encrypt("S3cr3t!").unwrap();
        assert_eq!(cipher.decrypt(&payload).unwrap().as_str(), "S3cr3t!");
    }

    #[test]
    fn test_same_plaintext_distinct_ciphertexts() {
        let cipher = test_cipher();
        let a = cipher.encrypt("hunter2").unwrap();
        let b = cipher.encrypt("hunter2").unwrap();
        // Fresh nonce each time
        assert_ne!(a, b);
        assert_eq!(cipher.decrypt(&a).unwrap(), cipher.decrypt(&b).unwrap());
    }

    #[test]
    fn test_decrypt_is_deterministic() {
        let cipher = test_cipher();
        let payload = cipher.encrypt("stable").unwrap();
        let first = cipher.decrypt(&payload).unwrap();
        let second = cipher.decrypt(&payload).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_tampered_ciphertext_rejected() {
        let cipher = test_cipher();
        let mut payload = cipher.encrypt("hunter2").unwrap();
        let last = payload.len() - 1;
        payload[last] ^= 0x01;
        assert!(matches!(
            cipher.decrypt(&payload),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_wrong_key_rejected() {
        let payload = test_cipher().encrypt("hunter2").unwrap();
        let other = test_cipher();
        assert!(matches!(
            other.decrypt(&payload),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let cipher = test_cipher();
        assert!(matches!(
            cipher.decrypt(&[0u8; NONCE_LEN]),
            Err(CryptoError::TruncatedCiphertext)
        ));
        assert!(matches!(
            cipher.decrypt(&[]),
            Err(CryptoError::TruncatedCiphertext)
        ));
    }

    #[test]
    fn test_malformed_key_rejected() {
        assert!(matches!(
            PayloadCipher::from_base64("not base64!!"),
            Err(CryptoError::Base64(_))
        ));
        let short = BASE64.encode([0u8; 16]);
        assert!(matches!(
            PayloadCipher::from_base64(&short),
            Err(CryptoError::InvalidKeyLength)
        ));
    }

    proptest! {
        #[test]
        fn prop_round_trip_any_plaintext(plaintext in ".{0,128}") {
            let cipher = test_cipher();
            let payload = cipher.encrypt(&plaintext).unwrap();
            let decrypted = cipher.decrypt(&payload).unwrap();
            prop_assert_eq!(decrypted.as_str(), plaintext.as_str());
        }
    }
}
