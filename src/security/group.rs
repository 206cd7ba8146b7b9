//! Security groups: one configured hop of the cipher chain.
//!
//! A group pairs a [`GroupConfig`] (cipher, key size, KDF, salt, iterations,
//! entropy percentage, key-material source) with its runtime state: a status,
//! a dirty bit forcing re-derivation, and the live [`Cipher`] once keyed.
//! Key material comes through the [`MaterialSource`] seam so the chain never
//! performs I/O itself.

use std::io;
use std::path::PathBuf;

use zeroize::Zeroizing;

use crate::entity::Status;
use crate::security::cipher::{Cipher, CipherKind};
use crate::security::kdf::{effective_len, KdfKind};
use crate::security::SecurityError;

/// Where a group's key material comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    /// A local file, read in full.
    Path(PathBuf),
    /// A remote resource fetched by an integrator-supplied loader.
    ///
    /// Loaders follow a small number of redirects before giving up; an empty
    /// body counts as a failure.
    Remote(String),
}

/// Loads raw key material for a [`KeySource`].
///
/// The provided [`FsSource`] handles local files only; deployments that key
/// groups from remote resources supply their own loader.
pub trait MaterialSource: Send + Sync {
    fn load(&self, source: &KeySource) -> io::Result<Vec<u8>>;
}

/// Filesystem-backed loader.
#[derive(Debug, Default)]
pub struct FsSource;

impl MaterialSource for FsSource {
    fn load(&self, source: &KeySource) -> io::Result<Vec<u8>> {
        match source {
            KeySource::Path(path) => std::fs::read(path),
            KeySource::Remote(url) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("no remote loader configured for {url}"),
            )),
        }
    }
}

/// Static configuration of one hop.
#[derive(Debug, Clone)]
pub struct GroupConfig {
    /// Disabled groups keep their place in the chain but do not encrypt.
    pub enabled: bool,
    /// Cipher selected by name from the fixed set.
    pub cipher: CipherKind,
    /// Key size in bits; must match the cipher.
    pub key_size: u32,
    /// Derivation mode for the key material.
    pub kdf: KdfKind,
    /// Salt mixed into the derivation.
    pub salt: String,
    /// Iteration count for password-based derivation.
    pub iterations: u32,
    /// Percentage of the key material that feeds the derivation (0, 100].
    pub entropy: f64,
    /// Where the key material comes from.
    pub source: KeySource,
}

impl GroupConfig {
    pub fn new(cipher: CipherKind, kdf: KdfKind, source: KeySource) -> Self {
        Self {
            enabled: true,
            cipher,
            key_size: (cipher.key_len() * 8) as u32,
            kdf,
            salt: String::new(),
            iterations: 1,
            entropy: 100.0,
            source,
        }
    }

    /// Key size in bytes.
    pub fn key_bytes(&self) -> usize {
        (self.key_size / 8) as usize
    }

    /// True when the configuration could key a cipher at all.
    pub fn valid(&self) -> bool {
        self.key_bytes() == self.cipher.key_len()
            && self.entropy > 0.0
            && self.entropy <= 100.0
            && self.iterations >= 1
    }
}

/// Runtime state of one hop: config, status, dirty bit, live cipher.
#[derive(Clone)]
pub struct SecurityGroup {
    config: GroupConfig,
    status: Status,
    modified: bool,
    cipher: Option<Cipher>,
    material_size: u64,
}

impl SecurityGroup {
    /// A new group starts dirty: the first refresh derives its key.
    pub fn new(config: GroupConfig) -> Self {
        Self {
            config,
            status: Status::None,
            modified: true,
            cipher: None,
            material_size: 0,
        }
    }

    pub fn config(&self) -> &GroupConfig {
        &self.config
    }

    /// Replaces the configuration and marks the group for re-derivation.
    pub fn set_config(&mut self, config: GroupConfig) {
        self.config = config;
        self.modified = true;
    }

    /// Flips the enabled flag without touching the derived key.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.config.enabled = enabled;
    }

    /// Forces re-derivation on the next refresh.
    pub fn mark_modified(&mut self) {
        self.modified = true;
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn modified(&self) -> bool {
        self.modified
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub(crate) fn set_status(&mut self, status: Status) {
        self.status = status;
    }

    pub(crate) fn clear_modified(&mut self) {
        self.modified = false;
    }

    /// Size of the most recently loaded key material, in bytes.
    pub fn material_size(&self) -> u64 {
        self.material_size
    }

    pub fn cipher(&self) -> Option<&Cipher> {
        self.cipher.as_ref()
    }

    /// A hop participates in encrypt/decrypt only while valid:
    /// enabled, configuration valid, and keyed.
    pub fn valid(&self) -> bool {
        self.config.enabled && self.config.valid() && self.cipher.is_some()
    }

    /// True once the group has ever been keyed, enabled or not.
    pub fn keyed(&self) -> bool {
        self.cipher.is_some()
    }

    /// Derives the hop key from raw material and instantiates the cipher.
    pub(crate) fn rekey(&mut self, material: &[u8]) -> Result<(), SecurityError> {
        self.material_size = material.len() as u64;

        let effective = effective_len(material.len(), self.config.entropy);
        if effective == 0 {
            return Err(SecurityError::EmptyKeyMaterial);
        }

        let input = Zeroizing::new(material[..effective].to_vec());
        let key = self.config.kdf.derive(
            &input,
            &self.config.salt,
            self.config.iterations,
            self.config.key_bytes(),
        )?;

        self.cipher = Some(Cipher::new(self.config.cipher, &key)?);
        Ok(())
    }
}

impl std::fmt::Debug for SecurityGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityGroup")
            .field("enabled", &self.config.enabled)
            .field("cipher", &self.config.cipher)
            .field("kdf", &self.config.kdf)
            .field("status", &self.status)
            .field("modified", &self.modified)
            .field("keyed", &self.cipher.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_validity() {
        let mut config = GroupConfig::new(
            CipherKind::Aes256Gcm,
            KdfKind::Sha256,
            KeySource::Path(PathBuf::from("/tmp/key")),
        );
        assert!(config.valid());

        config.key_size = 128;
        assert!(!config.valid(), "key size must match the cipher");

        config.key_size = 256;
        config.entropy = 0.0;
        assert!(!config.valid(), "zero entropy never derives a key");

        config.entropy = 100.0;
        config.iterations = 0;
        assert!(!config.valid());
    }

    #[test]
    fn test_rekey_from_material() {
        let config = GroupConfig::new(
            CipherKind::ChaCha20Poly1305,
            KdfKind::Sha256,
            KeySource::Path(PathBuf::from("unused")),
        );
        let mut group = SecurityGroup::new(config);
        assert!(!group.valid());

        group.rekey(b"plenty of key material here").unwrap();
        assert!(group.valid());
        assert_eq!(group.material_size(), 27);

        let cipher = group.cipher().unwrap();
        let sealed = cipher.encrypt(b"x").unwrap();
        assert_eq!(cipher.decrypt(&sealed).unwrap(), b"x");
    }

    #[test]
    fn test_entropy_scaling_changes_key() {
        let mut full = SecurityGroup::new(GroupConfig::new(
            CipherKind::ChaCha20Poly1305,
            KdfKind::Sha256,
            KeySource::Path(PathBuf::from("unused")),
        ));
        let mut half = SecurityGroup::new(GroupConfig {
            entropy: 50.0,
            ..full.config().clone()
        });

        let material = b"0123456789abcdef";
        full.rekey(material).unwrap();
        half.rekey(material).unwrap();

        // Half the bytes feed the derivation, so the fold diverges.
        assert_ne!(
            full.cipher().unwrap().mac(b"probe"),
            half.cipher().unwrap().mac(b"probe")
        );
    }

    #[test]
    fn test_rekey_rejects_effectively_empty_material() {
        let mut group = SecurityGroup::new(GroupConfig {
            entropy: 1.0,
            ..GroupConfig::new(
                CipherKind::Aes128Gcm,
                KdfKind::Sha256,
                KeySource::Path(PathBuf::from("unused")),
            )
        });

        // 1% of 10 bytes floors to zero.
        let result = group.rekey(b"0123456789");
        assert!(matches!(result, Err(SecurityError::EmptyKeyMaterial)));
        assert!(!group.valid());
    }

    #[test]
    fn test_fs_source_reads_local_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("group.key");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"key material").unwrap();

        let loaded = FsSource.load(&KeySource::Path(path)).unwrap();
        assert_eq!(loaded, b"key material");

        let missing = FsSource.load(&KeySource::Path(dir.path().join("missing")));
        assert!(missing.is_err());

        let remote = FsSource.load(&KeySource::Remote("https://example.com/key".into()));
        assert!(remote.is_err());
    }
}
