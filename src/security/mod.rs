//! Security layer: ciphers, key derivation, groups, and the cipher chain.
//!
//! Every payload on the wire passes through the [`CipherChain`]: an ordered
//! list of [`SecurityGroup`]s, each keyed from shared material (a file or a
//! remote resource) through a configurable KDF. Peers holding the same
//! groups in the same order derive the same chain fingerprint and can read
//! each other's traffic; everyone else sees opaque bytes.

pub mod chain;
pub mod cipher;
pub mod group;
pub mod kdf;

pub use chain::CipherChain;
pub use cipher::{Cipher, CipherError, CipherKind};
pub use group::{FsSource, GroupConfig, KeySource, MaterialSource, SecurityGroup};
pub use kdf::{KdfError, KdfKind};

use thiserror::Error;

/// Errors from the security layer.
#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("Cipher operation failed: {0}")]
    Cipher(#[from] CipherError),

    #[error("Key derivation failed: {0}")]
    Kdf(#[from] KdfError),

    #[error("Key material is empty after entropy scaling")]
    EmptyKeyMaterial,

    #[error("Security group has no derived key")]
    NotKeyed,
}
