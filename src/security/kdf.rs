//! Key derivation for chain hops.
//!
//! A hop turns raw key material (file bytes, fetched resource) into a cipher
//! key of the configured size, using either a salted hash (cheap, for large
//! high-entropy material) or a salted and iterated password-based KDF (for
//! low-entropy material). The historical "xor" derivation is recognized by
//! name only so that old configurations fail loudly instead of silently
//! producing a weak key.

use argon2::{Algorithm, Argon2, Params, Version};
use sha2::{Digest, Sha256, Sha512};
use thiserror::Error;
use zeroize::Zeroizing;

/// Errors that can occur during key derivation.
#[derive(Error, Debug)]
pub enum KdfError {
    #[error("Unknown KDF: {0}")]
    UnknownKdf(String),

    #[error("Legacy XOR derivation is not supported")]
    LegacyRejected,

    #[error("Key size {0} exceeds digest output")]
    KeyTooLong(usize),

    #[error("Empty key material")]
    EmptyMaterial,

    #[error("Derivation failed: {0}")]
    DerivationFailed(String),
}

/// Key-derivation mode for one hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KdfKind {
    /// Salted SHA-256, truncated to the key size.
    #[default]
    Sha256,
    /// Salted SHA-512, truncated to the key size.
    Sha512,
    /// Salted, iterated Argon2id; iterations map to the time cost.
    Argon2,
}

impl KdfKind {
    /// Resolves a configured KDF name.
    ///
    /// The legacy `"xor"` name is recognized and rejected: the old fallback
    /// folded key material into a constant seed and must never key a hop.
    pub fn from_name(name: &str) -> Result<Self, KdfError> {
        match name.to_ascii_lowercase().as_str() {
            "sha-256" | "sha256" => Ok(KdfKind::Sha256),
            "sha-512" | "sha512" => Ok(KdfKind::Sha512),
            "argon2" | "argon2id" => Ok(KdfKind::Argon2),
            "xor" => Err(KdfError::LegacyRejected),
            other => Err(KdfError::UnknownKdf(other.to_string())),
        }
    }

    /// The canonical configuration name.
    pub fn name(&self) -> &'static str {
        match self {
            KdfKind::Sha256 => "sha-256",
            KdfKind::Sha512 => "sha-512",
            KdfKind::Argon2 => "argon2",
        }
    }

    /// Derives a key of `key_size` bytes from `material`.
    ///
    /// `iterations` is only meaningful for [`KdfKind::Argon2`]; the hash
    /// kinds ignore it.
    pub fn derive(
        &self,
        material: &[u8],
        salt: &str,
        iterations: u32,
        key_size: usize,
    ) -> Result<Zeroizing<Vec<u8>>, KdfError> {
        if material.is_empty() {
            return Err(KdfError::EmptyMaterial);
        }

        match self {
            KdfKind::Sha256 => digest_key::<Sha256>(material, salt, key_size),
            KdfKind::Sha512 => digest_key::<Sha512>(material, salt, key_size),
            KdfKind::Argon2 => argon2_key(material, salt, iterations, key_size),
        }
    }
}

impl std::fmt::Display for KdfKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// `digest(salt || material)`, truncated to `key_size`.
fn digest_key<D: Digest>(
    material: &[u8],
    salt: &str,
    key_size: usize,
) -> Result<Zeroizing<Vec<u8>>, KdfError> {
    let mut hasher = D::new();
    hasher.update(salt.as_bytes());
    hasher.update(material);

    let mut output = Zeroizing::new(hasher.finalize().to_vec());
    if output.len() < key_size {
        return Err(KdfError::KeyTooLong(key_size));
    }

    output.truncate(key_size);
    Ok(output)
}

/// Argon2id with the configured iteration count as time cost.
///
/// The configured salt string is expanded through SHA-256 so short or empty
/// salts still meet the minimum salt length.
fn argon2_key(
    material: &[u8],
    salt: &str,
    iterations: u32,
    key_size: usize,
) -> Result<Zeroizing<Vec<u8>>, KdfError> {
    let salt_hash: [u8; 32] = Sha256::digest(salt.as_bytes()).into();

    let params = Params::new(
        Params::DEFAULT_M_COST,
        iterations.max(1),
        Params::DEFAULT_P_COST,
        Some(key_size),
    )
    .map_err(|e| KdfError::DerivationFailed(e.to_string()))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = Zeroizing::new(vec![0u8; key_size]);
    argon2
        .hash_password_into(material, &salt_hash, &mut key)
        .map_err(|e| KdfError::DerivationFailed(e.to_string()))?;

    Ok(key)
}

/// Number of key-material bytes that actually feed the derivation, scaled
/// by the configured entropy percentage (100% = all bytes).
pub fn effective_len(material_len: usize, entropy: f64) -> usize {
    if entropy >= 100.0 {
        return material_len;
    }
    (material_len as f64 * (entropy / 100.0)) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_name() {
        assert_eq!(KdfKind::from_name("sha-256").unwrap(), KdfKind::Sha256);
        assert_eq!(KdfKind::from_name("SHA512").unwrap(), KdfKind::Sha512);
        assert_eq!(KdfKind::from_name("argon2").unwrap(), KdfKind::Argon2);
        assert!(matches!(KdfKind::from_name("md5"), Err(KdfError::UnknownKdf(_))));
    }

    #[test]
    fn test_legacy_xor_rejected() {
        assert!(matches!(KdfKind::from_name("xor"), Err(KdfError::LegacyRejected)));
        assert!(matches!(KdfKind::from_name("XOR"), Err(KdfError::LegacyRejected)));
    }

    #[test]
    fn test_deterministic_derivation() {
        for kind in [KdfKind::Sha256, KdfKind::Sha512, KdfKind::Argon2] {
            let a = kind.derive(b"material", "salt", 2, 32).unwrap();
            let b = kind.derive(b"material", "salt", 2, 32).unwrap();

            assert_eq!(a, b, "{kind} must be deterministic");
            assert_eq!(a.len(), 32);
        }
    }

    #[test]
    fn test_salt_changes_key() {
        for kind in [KdfKind::Sha256, KdfKind::Sha512, KdfKind::Argon2] {
            let a = kind.derive(b"material", "salt-a", 2, 32).unwrap();
            let b = kind.derive(b"material", "salt-b", 2, 32).unwrap();

            assert_ne!(a, b, "{kind} must mix in the salt");
        }
    }

    #[test]
    fn test_iterations_change_argon2_key() {
        let a = KdfKind::Argon2.derive(b"material", "salt", 1, 32).unwrap();
        let b = KdfKind::Argon2.derive(b"material", "salt", 2, 32).unwrap();

        assert_ne!(a, b);
    }

    #[test]
    fn test_hash_truncates_to_key_size() {
        let key = KdfKind::Sha512.derive(b"material", "salt", 1, 16).unwrap();
        assert_eq!(key.len(), 16);
    }

    #[test]
    fn test_key_longer_than_digest_rejected() {
        let result = KdfKind::Sha256.derive(b"material", "salt", 1, 64);
        assert!(matches!(result, Err(KdfError::KeyTooLong(64))));
    }

    #[test]
    fn test_empty_material_rejected() {
        let result = KdfKind::Sha256.derive(b"", "salt", 1, 32);
        assert!(matches!(result, Err(KdfError::EmptyMaterial)));
    }

    #[test]
    fn test_effective_len_scaling() {
        assert_eq!(effective_len(1000, 100.0), 1000);
        assert_eq!(effective_len(1000, 50.0), 500);
        assert_eq!(effective_len(1000, 0.1), 1);
        assert_eq!(effective_len(10, 1.0), 0);
    }
}
