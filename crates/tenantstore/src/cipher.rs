//! Credential cipher.
//!
//! AES-256-GCM with a key derived from the configured secret by SHA-256.
//! Every call to [`Cipher::encrypt`] draws a fresh random nonce, so equal
//! plaintexts produce different ciphertexts.
//!
//! The output format is `nonce (12 bytes) || ciphertext || tag (16 bytes)`.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit, generic_array::GenericArray},
};
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::error::TenantStoreError;

/// Size of the GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;
/// Size of the GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Errors produced by [`Cipher`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum CipherError {
    /// Encryption failed.
    #[error("encryption failed")]
    Encrypt,

    /// Input is shorter than a nonce plus tag.
    #[error("ciphertext too short: {len} bytes")]
    Truncated {
        /// Length of the rejected input.
        len: usize,
    },

    /// Authentication failed: tampered input or wrong secret.
    #[error("decryption failed")]
    Decrypt,
}

impl From<CipherError> for TenantStoreError {
    fn from(err: CipherError) -> Self {
        Self::internal_with_source("cipher", err)
    }
}

/// Authenticated symmetric cipher for secrets at rest.
#[derive(Clone)]
pub struct Cipher {
    cipher: Aes256Gcm,
}

impl Cipher {
    /// Creates a cipher keyed by SHA-256 of `secret`.
    #[must_use]
    pub fn new(secret: &str) -> Self {
        let mut key = Zeroizing::new([0u8; 32]);
        key.copy_from_slice(&Sha256::digest(secret.as_bytes()));
        let cipher = Aes256Gcm::new(GenericArray::from_slice(key.as_slice()));
        Self { cipher }
    }

    /// Encrypts `plaintext`.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::Encrypt`] if the AEAD rejects the input.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext =
            self.cipher.encrypt(nonce, plaintext).map_err(|_| CipherError::Encrypt)?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend(ciphertext);
        Ok(out)
    }

    /// Decrypts data produced by [`encrypt`](Self::encrypt).
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::Truncated`] for inputs too short to hold a
    /// nonce and tag, and [`CipherError::Decrypt`] when authentication fails.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CipherError> {
        if data.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CipherError::Truncated { len: data.len() });
        }
        let (nonce, ciphertext) = data.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CipherError::Decrypt)
    }
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cipher").field("key", &"[REDACTED]").finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let cipher = Cipher::new("secret");
        let sealed = cipher.encrypt(b"{\"token\":\"abc\"}").unwrap();
        assert_eq!(cipher.decrypt(&sealed).unwrap(), b"{\"token\":\"abc\"}");
    }

    #[test]
    fn test_empty_plaintext() {
        let cipher = Cipher::new("secret");
        let sealed = cipher.encrypt(b"").unwrap();
        assert_eq!(sealed.len(), NONCE_SIZE + TAG_SIZE);
        assert!(cipher.decrypt(&sealed).unwrap().is_empty());
    }

    #[test]
    fn test_output_is_non_deterministic() {
        let cipher = Cipher::new("secret");
        let a = cipher.encrypt(b"same").unwrap();
        let b = cipher.encrypt(b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_secret_fails() {
        let sealed = Cipher::new("secret").encrypt(b"payload").unwrap();
        assert_eq!(Cipher::new("other").decrypt(&sealed), Err(CipherError::Decrypt));
    }

    #[test]
    fn test_tampering_fails() {
        let cipher = Cipher::new("secret");
        let mut sealed = cipher.encrypt(b"payload").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert_eq!(cipher.decrypt(&sealed), Err(CipherError::Decrypt));
    }

    #[test]
    fn test_truncated_input_fails() {
        let cipher = Cipher::new("secret");
        assert_eq!(cipher.decrypt(&[0u8; 27]), Err(CipherError::Truncated { len: 27 }));
        assert_eq!(cipher.decrypt(&[]), Err(CipherError::Truncated { len: 0 }));
    }

    #[test]
    fn test_debug_redacts_key() {
        assert_eq!(format!("{:?}", Cipher::new("secret")), "Cipher { key: \"[REDACTED]\" }");
    }

    #[test]
    fn test_maps_to_internal() {
        let err: TenantStoreError = CipherError::Decrypt.into();
        assert!(err.is_internal());
    }

    mod proptests {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            #[test]
            fn any_bytes_round_trip(data in proptest::collection::vec(any::<u8>(), 0..512)) {
                let cipher = Cipher::new("prop-secret");
                let sealed = cipher.encrypt(&data).unwrap();
                prop_assert_eq!(cipher.decrypt(&sealed).unwrap(), data);
            }
        }
    }
}
