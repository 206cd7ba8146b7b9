//! Sessions: per-connection ephemeral contexts.
//!
//! A [`Session`] pairs the id that addresses exchanges on the transport with
//! the cipher agreed during the handshake. The responder side keeps live
//! sessions in a [`SessionMap`]; ids are random and re-drawn on collision so
//! two connections never share one.

pub mod handshake;

pub use handshake::{validate_offer, HandshakeError, KeyExchange};

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use rand::rngs::OsRng;
use rand::RngCore;

use crate::security::cipher::{Cipher, CipherError};

/// An established connection context.
pub struct Session {
    id: String,
    cipher: Cipher,
}

impl Session {
    pub fn new(id: impl Into<String>, cipher: Cipher) -> Self {
        Self {
            id: id.into(),
            cipher,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Applies the session layer on top of chain ciphertext.
    pub fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, CipherError> {
        self.cipher.encrypt(data)
    }

    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CipherError> {
        self.cipher.decrypt(data)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("cipher", &self.cipher.kind())
            .finish()
    }
}

/// Live sessions keyed by id.
#[derive(Debug, Default)]
pub struct SessionMap {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a session cipher under a freshly allocated unique id.
    pub fn insert(&self, cipher: Cipher) -> Arc<Session> {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        let id = loop {
            let candidate = random_id();
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
        };
        let session = Arc::new(Session::new(id.clone(), cipher));
        sessions.insert(id, Arc::clone(&session));
        session
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
    }

    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 32 hex characters of OS randomness.
pub(crate) fn random_id() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::cipher::CipherKind;

    fn cipher() -> Cipher {
        Cipher::new(CipherKind::ChaCha20Poly1305, &[3u8; 32]).unwrap()
    }

    #[test]
    fn test_session_round_trip() {
        let session = Session::new("abc", cipher());
        let sealed = session.encrypt(b"payload").unwrap();
        assert_eq!(session.decrypt(&sealed).unwrap(), b"payload");
    }

    #[test]
    fn test_map_allocates_unique_ids() {
        let map = SessionMap::new();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..64 {
            let session = map.insert(cipher());
            assert_eq!(session.id().len(), 32);
            assert!(session.id().chars().all(|c| c.is_ascii_hexdigit()));
            assert!(seen.insert(session.id().to_string()));
        }
        assert_eq!(map.len(), 64);
    }

    #[test]
    fn test_map_get_and_remove() {
        let map = SessionMap::new();
        let session = map.insert(cipher());
        let id = session.id().to_string();

        assert!(map.get(&id).is_some());
        assert!(map.remove(&id).is_some());
        assert!(map.get(&id).is_none());
        assert!(map.is_empty());
    }
}
