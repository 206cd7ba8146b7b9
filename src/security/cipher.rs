//! Symmetric ciphers for chain hops and sessions.
//!
//! Every hop of the cipher chain and every established session holds one
//! [`Cipher`]: an AEAD selected by name from a fixed small set, keyed with
//! derived key material. Encryption output is `nonce || ciphertext`, with a
//! fresh random nonce per call. The keyed [`Cipher::mac`] is the
//! deterministic primitive the chain fingerprint folds through, since AEAD
//! output is nonce-randomized and cannot serve as a stable fingerprint.

use aes_gcm::{Aes128Gcm, Aes256Gcm};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305,
};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroizing;

/// Nonce size shared by all supported AEADs.
const NONCE_SIZE: usize = 12;

/// Authentication tag size shared by all supported AEADs.
const TAG_SIZE: usize = 16;

/// Errors that can occur during cipher operations.
#[derive(Error, Debug)]
pub enum CipherError {
    #[error("Unknown cipher: {0}")]
    UnknownCipher(String),

    #[error("Invalid key length: {kind} expects {expected} bytes, got {got}")]
    InvalidKeyLength {
        kind: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Invalid ciphertext: too short")]
    CiphertextTooShort,
}

/// The fixed set of symmetric ciphers a hop or session may select by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CipherKind {
    #[default]
    ChaCha20Poly1305,
    Aes256Gcm,
    Aes128Gcm,
}

impl CipherKind {
    /// Resolves a configured cipher name.
    pub fn from_name(name: &str) -> Result<Self, CipherError> {
        match name.to_ascii_lowercase().as_str() {
            "chacha20" | "chacha20-poly1305" => Ok(CipherKind::ChaCha20Poly1305),
            "aes-256" | "aes-256-gcm" => Ok(CipherKind::Aes256Gcm),
            "aes-128" | "aes-128-gcm" => Ok(CipherKind::Aes128Gcm),
            other => Err(CipherError::UnknownCipher(other.to_string())),
        }
    }

    /// The canonical configuration name.
    pub fn name(&self) -> &'static str {
        match self {
            CipherKind::ChaCha20Poly1305 => "chacha20",
            CipherKind::Aes256Gcm => "aes-256",
            CipherKind::Aes128Gcm => "aes-128",
        }
    }

    /// Key length in bytes.
    pub fn key_len(&self) -> usize {
        match self {
            CipherKind::ChaCha20Poly1305 => 32,
            CipherKind::Aes256Gcm => 32,
            CipherKind::Aes128Gcm => 16,
        }
    }
}

/// A keyed symmetric cipher.
///
/// The key is held zeroized and wiped on drop. A `Cipher` only exists in a
/// keyed state; an unkeyed hop simply has no `Cipher` at all.
#[derive(Clone)]
pub struct Cipher {
    kind: CipherKind,
    key: Zeroizing<Vec<u8>>,
}

impl Cipher {
    /// Creates a cipher, validating the key length against the kind.
    pub fn new(kind: CipherKind, key: &[u8]) -> Result<Self, CipherError> {
        if key.len() != kind.key_len() {
            return Err(CipherError::InvalidKeyLength {
                kind: kind.name(),
                expected: kind.key_len(),
                got: key.len(),
            });
        }

        Ok(Self {
            kind,
            key: Zeroizing::new(key.to_vec()),
        })
    }

    pub fn kind(&self) -> CipherKind {
        self.kind
    }

    /// Encrypts with a fresh random nonce.
    ///
    /// Output format: nonce (12 bytes) || ciphertext (includes auth tag).
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = self.seal(&nonce, plaintext)?;

        let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        result.extend_from_slice(&nonce);
        result.extend_from_slice(&ciphertext);

        Ok(result)
    }

    /// Decrypts data in the `nonce || ciphertext` format.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CipherError> {
        if data.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CipherError::CiphertextTooShort);
        }

        let (nonce, ciphertext) = data.split_at(NONCE_SIZE);
        self.open(nonce, ciphertext)
    }

    /// Keyed HMAC-SHA256 over `data`.
    ///
    /// Deterministic for a fixed key, unlike [`Cipher::encrypt`]; the chain
    /// fingerprint folds through this.
    pub fn mac(&self, data: &[u8]) -> [u8; 32] {
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(&self.key)
            .expect("hmac accepts any key length");
        mac.update(data);
        mac.finalize().into_bytes().into()
    }

    fn seal(&self, nonce: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let error = |e: chacha20poly1305::aead::Error| CipherError::Encryption(e.to_string());

        match self.kind {
            CipherKind::ChaCha20Poly1305 => {
                let cipher = ChaCha20Poly1305::new_from_slice(&self.key)
                    .map_err(|e| CipherError::Encryption(e.to_string()))?;
                cipher.encrypt(nonce.into(), plaintext).map_err(error)
            }
            CipherKind::Aes256Gcm => {
                let cipher = Aes256Gcm::new_from_slice(&self.key)
                    .map_err(|e| CipherError::Encryption(e.to_string()))?;
                cipher.encrypt(nonce.into(), plaintext).map_err(error)
            }
            CipherKind::Aes128Gcm => {
                let cipher = Aes128Gcm::new_from_slice(&self.key)
                    .map_err(|e| CipherError::Encryption(e.to_string()))?;
                cipher.encrypt(nonce.into(), plaintext).map_err(error)
            }
        }
    }

    fn open(&self, nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let error = |e: chacha20poly1305::aead::Error| CipherError::Decryption(e.to_string());

        match self.kind {
            CipherKind::ChaCha20Poly1305 => {
                let cipher = ChaCha20Poly1305::new_from_slice(&self.key)
                    .map_err(|e| CipherError::Decryption(e.to_string()))?;
                cipher.decrypt(nonce.into(), ciphertext).map_err(error)
            }
            CipherKind::Aes256Gcm => {
                let cipher = Aes256Gcm::new_from_slice(&self.key)
                    .map_err(|e| CipherError::Decryption(e.to_string()))?;
                cipher.decrypt(nonce.into(), ciphertext).map_err(error)
            }
            CipherKind::Aes128Gcm => {
                let cipher = Aes128Gcm::new_from_slice(&self.key)
                    .map_err(|e| CipherError::Decryption(e.to_string()))?;
                cipher.decrypt(nonce.into(), ciphertext).map_err(error)
            }
        }
    }
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        f.debug_struct("Cipher").field("kind", &self.kind).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key(kind: CipherKind) -> Vec<u8> {
        vec![7u8; kind.key_len()]
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip_all_kinds() {
        let plaintext = b"Hello, overlay!";

        for kind in [
            CipherKind::ChaCha20Poly1305,
            CipherKind::Aes256Gcm,
            CipherKind::Aes128Gcm,
        ] {
            let cipher = Cipher::new(kind, &test_key(kind)).unwrap();

            let encrypted = cipher.encrypt(plaintext).unwrap();
            let decrypted = cipher.decrypt(&encrypted).unwrap();

            assert_eq!(plaintext.as_slice(), decrypted.as_slice());
        }
    }

    #[test]
    fn test_empty_plaintext() {
        let cipher = Cipher::new(CipherKind::ChaCha20Poly1305, &[1u8; 32]).unwrap();

        let encrypted = cipher.encrypt(b"").unwrap();
        let decrypted = cipher.decrypt(&encrypted).unwrap();

        assert!(decrypted.is_empty());
    }

    #[test]
    fn test_wrong_key_fails() {
        let cipher = Cipher::new(CipherKind::Aes256Gcm, &[1u8; 32]).unwrap();
        let other = Cipher::new(CipherKind::Aes256Gcm, &[2u8; 32]).unwrap();

        let encrypted = cipher.encrypt(b"secret").unwrap();
        let result = other.decrypt(&encrypted);

        assert!(matches!(result, Err(CipherError::Decryption(_))));
    }

    #[test]
    fn test_ciphertext_too_short() {
        let cipher = Cipher::new(CipherKind::ChaCha20Poly1305, &[1u8; 32]).unwrap();
        let result = cipher.decrypt(&[0u8; 10]);

        assert!(matches!(result, Err(CipherError::CiphertextTooShort)));
    }

    #[test]
    fn test_invalid_key_length_rejected() {
        let result = Cipher::new(CipherKind::Aes128Gcm, &[0u8; 32]);

        assert!(matches!(
            result,
            Err(CipherError::InvalidKeyLength { expected: 16, got: 32, .. })
        ));
    }

    #[test]
    fn test_mac_deterministic_per_key() {
        let cipher = Cipher::new(CipherKind::ChaCha20Poly1305, &[9u8; 32]).unwrap();
        let other = Cipher::new(CipherKind::ChaCha20Poly1305, &[8u8; 32]).unwrap();

        assert_eq!(cipher.mac(b"fingerprint"), cipher.mac(b"fingerprint"));
        assert_ne!(cipher.mac(b"fingerprint"), other.mac(b"fingerprint"));
        assert_ne!(cipher.mac(b"fingerprint"), cipher.mac(b"different"));
    }

    #[test]
    fn test_kind_names_roundtrip() {
        for kind in [
            CipherKind::ChaCha20Poly1305,
            CipherKind::Aes256Gcm,
            CipherKind::Aes128Gcm,
        ] {
            assert_eq!(CipherKind::from_name(kind.name()).unwrap(), kind);
        }
        assert!(CipherKind::from_name("rot13").is_err());
    }
}
