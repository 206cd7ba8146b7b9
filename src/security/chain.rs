//! The cipher chain: ordered security groups applied as nested encryption.
//!
//! Outbound payloads pass forward through every valid hop, inbound payloads
//! in reverse. Refreshing the chain re-derives dirty hops from their key
//! material and folds a fingerprint across every keyed hop; the base64 of
//! that fingerprint is the chain's group id, shared by all peers holding the
//! same groups in the same order. The fold uses a keyed MAC per hop so the
//! id is deterministic on both sides.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::warn;

use crate::entity::Status;
use crate::security::group::{KeySource, MaterialSource, SecurityGroup};
use crate::security::SecurityError;

/// Initial fingerprint value before any hop is folded in.
const FINGERPRINT_SEED: [u8; 32] = *b"veilwire-group-fingerprint-seed!";

/// Ordered list of security groups with the derived group id.
#[derive(Clone, Default)]
pub struct CipherChain {
    groups: Vec<SecurityGroup>,
    group_id: Option<String>,
}

impl CipherChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a hop at the end of the chain.
    pub fn push(&mut self, group: SecurityGroup) {
        self.groups.push(group);
    }

    /// Removes the hop at `index`, if present.
    pub fn remove(&mut self, index: usize) -> Option<SecurityGroup> {
        if index < self.groups.len() {
            Some(self.groups.remove(index))
        } else {
            None
        }
    }

    pub fn groups(&self) -> &[SecurityGroup] {
        &self.groups
    }

    pub fn groups_mut(&mut self) -> &mut [SecurityGroup] {
        &mut self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// True when every enabled hop is fully configured and keyed.
    pub fn valid(&self) -> bool {
        self.groups.iter().filter(|g| g.enabled()).all(|g| g.valid())
    }

    /// True when at least one hop currently encrypts; a chain without any
    /// usable cipher passes data through unchanged.
    pub fn encrypts(&self) -> bool {
        self.groups.iter().any(|g| g.valid())
    }

    /// True when any hop needs re-derivation.
    pub fn modified(&self) -> bool {
        self.groups.iter().any(|g| g.modified())
    }

    /// The chain fingerprint as announced to peers, if any hop is keyed.
    pub fn group_id(&self) -> Option<&str> {
        self.group_id.as_deref()
    }

    /// Re-derives dirty hops and recomputes the group id.
    ///
    /// Each hop is visited in order. Hops that fail to load or derive keep
    /// their previous key (if any is absent they are skipped), are flagged
    /// with [`Status::Warning`] for local sources and [`Status::Error`] for
    /// remote ones, and stay dirty so a later refresh retries them. The
    /// returned value is the new group id.
    pub fn refresh(&mut self, source: &dyn MaterialSource) -> Option<String> {
        let mut fingerprint = FINGERPRINT_SEED;

        for group in &mut self.groups {
            if !group.enabled() {
                if group.keyed() {
                    // Disabled hops keep their place in the fingerprint.
                    fingerprint = group.cipher().map(|c| c.mac(&fingerprint)).unwrap_or(fingerprint);
                    group.set_status(Status::Success);
                } else {
                    group.set_status(Status::None);
                }
                continue;
            }

            if group.modified() || !group.keyed() {
                if !group.config().valid() {
                    warn!(cipher = group.config().cipher.name(), "invalid group configuration");
                    group.set_status(Status::Warning);
                    continue;
                }

                let material = match source.load(&group.config().source) {
                    Ok(material) => material,
                    Err(err) => {
                        let status = match group.config().source {
                            KeySource::Path(_) => Status::Warning,
                            KeySource::Remote(_) => Status::Error,
                        };
                        warn!(%err, "failed to load group key material");
                        group.set_status(status);
                        continue;
                    }
                };

                if let Err(err) = group.rekey(&material) {
                    warn!(%err, "failed to derive group key");
                    group.set_status(Status::Warning);
                    continue;
                }

                group.clear_modified();
            }

            if let Some(cipher) = group.cipher() {
                fingerprint = cipher.mac(&fingerprint);
            }
            group.set_status(Status::Success);
        }

        self.group_id = if fingerprint != FINGERPRINT_SEED {
            Some(STANDARD.encode(&fingerprint))
        } else {
            None
        };
        self.group_id.clone()
    }

    /// Encrypts forward through every valid hop.
    ///
    /// An empty or fully invalid chain passes data through unchanged.
    pub fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, SecurityError> {
        let mut out = data.to_vec();
        for group in &self.groups {
            if !group.valid() {
                continue;
            }
            let cipher = group.cipher().ok_or(SecurityError::NotKeyed)?;
            out = cipher.encrypt(&out)?;
        }
        Ok(out)
    }

    /// Decrypts in reverse hop order; any hop failure aborts.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, SecurityError> {
        let mut out = data.to_vec();
        for group in self.groups.iter().rev() {
            if !group.valid() {
                continue;
            }
            let cipher = group.cipher().ok_or(SecurityError::NotKeyed)?;
            out = cipher.decrypt(&out)?;
        }
        Ok(out)
    }
}

impl std::fmt::Debug for CipherChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherChain")
            .field("groups", &self.groups.len())
            .field("group_id", &self.group_id)
            .finish()
    }
}
