//! Session key agreement: x25519 with HKDF-SHA256 expansion.
//!
//! The wire carries generic Diffie-Hellman-family parameters (size, base,
//! prime, public value) so the agreement algorithm stays swappable; this
//! build implements the curve family, encoded as `base = 0` with an empty
//! prime. An offer naming any other group is rejected before key material
//! is touched.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use sha2::Sha256;
use thiserror::Error;
use x25519_dalek::{EphemeralSecret, PublicKey};
use zeroize::Zeroizing;

use crate::protocol::KeyOffer;
use crate::security::cipher::{Cipher, CipherError, CipherKind};

/// Domain separation for session key expansion.
const HKDF_INFO: &[u8] = b"veilwire-session-v1";

/// Errors from session key agreement.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("Unsupported key-agreement group")]
    UnsupportedGroup,

    #[error("Unknown cipher in offer: {0}")]
    UnknownCipher(String),

    #[error("Offered key size {got} bits does not fit the offered cipher")]
    KeySizeMismatch { got: u32 },

    #[error("Malformed public key")]
    MalformedPublicKey,

    #[error("Offer decoding failed: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("Cipher setup failed: {0}")]
    Cipher(#[from] CipherError),
}

/// One side of an in-flight key agreement.
///
/// Create one, send [`KeyExchange::offer`] to the peer, then consume it
/// with [`KeyExchange::agree`] against the peer's offer. Both sides derive
/// the same session cipher.
pub struct KeyExchange {
    secret: EphemeralSecret,
    public: PublicKey,
    cipher: CipherKind,
}

impl KeyExchange {
    /// Starts an exchange that will key the given session cipher.
    pub fn new(cipher: CipherKind) -> Self {
        let secret = EphemeralSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self {
            secret,
            public,
            cipher,
        }
    }

    /// The offer announcing our public value and desired cipher.
    pub fn offer(&self) -> KeyOffer {
        KeyOffer {
            size: (self.cipher.key_len() * 8) as u32,
            base: 0,
            prime: String::new(),
            cipher: self.cipher.name().to_string(),
            public_key: STANDARD.encode(self.public.as_bytes()),
        }
    }

    pub fn cipher_kind(&self) -> CipherKind {
        self.cipher
    }

    /// Completes the agreement against the peer's offer.
    pub fn agree(self, offer: &KeyOffer) -> Result<Cipher, HandshakeError> {
        validate_offer(offer)?;
        let peer = decode_public(&offer.public_key)?;
        let shared = self.secret.diffie_hellman(&peer);
        let key = expand_key(shared.as_bytes(), self.cipher.key_len());
        Ok(Cipher::new(self.cipher, &key)?)
    }
}

impl std::fmt::Debug for KeyExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyExchange")
            .field("cipher", &self.cipher)
            .finish()
    }
}

/// Checks an offer names the curve family and a cipher this build knows.
pub fn validate_offer(offer: &KeyOffer) -> Result<CipherKind, HandshakeError> {
    if offer.base != 0 || !offer.prime.is_empty() {
        return Err(HandshakeError::UnsupportedGroup);
    }
    let cipher = CipherKind::from_name(&offer.cipher)
        .map_err(|_| HandshakeError::UnknownCipher(offer.cipher.clone()))?;
    if offer.size as usize != cipher.key_len() * 8 {
        return Err(HandshakeError::KeySizeMismatch { got: offer.size });
    }
    Ok(cipher)
}

fn decode_public(encoded: &str) -> Result<PublicKey, HandshakeError> {
    let bytes = STANDARD.decode(encoded)?;
    let array: [u8; 32] = bytes
        .try_into()
        .map_err(|_| HandshakeError::MalformedPublicKey)?;
    Ok(PublicKey::from(array))
}

fn expand_key(shared: &[u8], len: usize) -> Zeroizing<Vec<u8>> {
    let hkdf = Hkdf::<Sha256>::new(None, shared);
    let mut key = Zeroizing::new(vec![0u8; len]);
    hkdf.expand(HKDF_INFO, &mut key)
        .expect("session key sizes fit HKDF-SHA256 output");
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_both_sides_derive_the_same_cipher() {
        let ours = KeyExchange::new(CipherKind::ChaCha20Poly1305);
        let theirs = KeyExchange::new(CipherKind::ChaCha20Poly1305);
        let our_offer = ours.offer();
        let their_offer = theirs.offer();

        let our_cipher = ours.agree(&their_offer).unwrap();
        let their_cipher = theirs.agree(&our_offer).unwrap();

        let sealed = our_cipher.encrypt(b"session payload").unwrap();
        assert_eq!(their_cipher.decrypt(&sealed).unwrap(), b"session payload");
    }

    #[test]
    fn test_offer_encodes_the_curve_family() {
        let offer = KeyExchange::new(CipherKind::Aes256Gcm).offer();
        assert_eq!(offer.base, 0);
        assert!(offer.prime.is_empty());
        assert_eq!(offer.size, 256);
        assert_eq!(offer.cipher, "aes-256");
        assert_eq!(STANDARD.decode(&offer.public_key).unwrap().len(), 32);
    }

    #[test]
    fn test_modp_offer_is_rejected() {
        let mut offer = KeyExchange::new(CipherKind::Aes256Gcm).offer();
        offer.prime = STANDARD.encode(b"some modp prime");
        offer.base = 2;

        let result = KeyExchange::new(CipherKind::Aes256Gcm).agree(&offer);
        assert!(matches!(result, Err(HandshakeError::UnsupportedGroup)));
    }

    #[test]
    fn test_unknown_cipher_is_rejected() {
        let mut offer = KeyExchange::new(CipherKind::Aes256Gcm).offer();
        offer.cipher = "rot13".into();

        let result = validate_offer(&offer);
        assert!(matches!(result, Err(HandshakeError::UnknownCipher(_))));
    }

    #[test]
    fn test_key_size_mismatch_is_rejected() {
        let mut offer = KeyExchange::new(CipherKind::Aes256Gcm).offer();
        offer.size = 128;

        let result = validate_offer(&offer);
        assert!(matches!(
            result,
            Err(HandshakeError::KeySizeMismatch { got: 128 })
        ));
    }

    #[test]
    fn test_tampered_public_value_breaks_agreement() {
        let ours = KeyExchange::new(CipherKind::ChaCha20Poly1305);
        let theirs = KeyExchange::new(CipherKind::ChaCha20Poly1305);
        let our_offer = ours.offer();
        let mut their_offer = theirs.offer();

        let mut bytes = STANDARD.decode(&their_offer.public_key).unwrap();
        bytes[5] ^= 0x01;
        their_offer.public_key = STANDARD.encode(&bytes);

        let our_cipher = ours.agree(&their_offer).unwrap();
        let their_cipher = theirs.agree(&our_offer).unwrap();

        // Different shared secrets, so the first decrypt fails.
        let sealed = our_cipher.encrypt(b"payload").unwrap();
        assert!(their_cipher.decrypt(&sealed).is_err());
    }

    #[test]
    fn test_malformed_public_key_is_rejected() {
        let mut offer = KeyExchange::new(CipherKind::Aes128Gcm).offer();
        offer.public_key = STANDARD.encode(b"short");

        let result = KeyExchange::new(CipherKind::Aes128Gcm).agree(&offer);
        assert!(matches!(result, Err(HandshakeError::MalformedPublicKey)));
    }
}
