//! # Veilwire - Anonymous peer-to-peer file sharing and chat
//!
//! Veilwire is the client core of an anonymous overlay: peers that hold the
//! same security groups can browse each other's shares, search, chat, and
//! move files in resumable chunks; everyone else sees opaque bytes.
//!
//! ## Overview
//!
//! - Every payload passes through a **cipher chain**: an ordered list of
//!   security groups, each keyed from shared material (a key file or a
//!   remote resource) through a configurable KDF
//! - Peers holding the same groups in the same order derive the same
//!   **group fingerprint** and can read each other's traffic
//! - On top of the chain, each connection runs an X25519 **handshake** and
//!   wraps traffic in a per-session AEAD
//! - Messages are typed JSON **envelopes** (ping, browse, search, chat,
//!   download, upload, ...) framed as base64 after encryption
//! - Transfers move in **chunks** claimed from a shared ledger by a small
//!   pool of workers, so a stopped transfer resumes where it left off
//!
//! ## Security Model
//!
//! - **Chain first**: session keys are agreed inside the chain, so a peer
//!   outside the group cannot even start a handshake
//! - **No identity**: peers are known by self-chosen ids and display names;
//!   nothing ties a session to a network identity at this layer
//! - **Local policy**: muting, share roots, and the delete-partials rule
//!   are local decisions, never negotiated
//!
//! ## Example Usage
//!
//! ```rust
//! use veilwire::security::{
//!     CipherChain, CipherKind, GroupConfig, KdfKind, KeySource, MaterialSource,
//!     SecurityGroup,
//! };
//!
//! // Key material normally comes from a file; any loader will do.
//! struct Fixed;
//! impl MaterialSource for Fixed {
//!     fn load(&self, _source: &KeySource) -> std::io::Result<Vec<u8>> {
//!         Ok(b"pre-shared group secret".to_vec())
//!     }
//! }
//!
//! let mut chain = CipherChain::new();
//! chain.push(SecurityGroup::new(GroupConfig::new(
//!     CipherKind::ChaCha20Poly1305,
//!     KdfKind::Sha256,
//!     KeySource::Path("group.key".into()),
//! )));
//!
//! // Deriving keys also folds the chain fingerprint.
//! let group_id = chain.refresh(&Fixed);
//! assert!(group_id.is_some());
//!
//! let sealed = chain.encrypt(b"hello overlay").unwrap();
//! assert_eq!(chain.decrypt(&sealed).unwrap(), b"hello overlay");
//! ```
//!
//! ## Modules
//!
//! - [`client`]: the [`Client`] facade tying every subsystem together
//! - [`security`]: ciphers, key derivation, groups, the cipher chain
//! - [`session`]: X25519 handshake and per-session encryption
//! - [`protocol`]: message types, envelopes, and wire framing
//! - [`commands`]: request/response exchanges and the inbound responder
//! - [`share`]: the local share index (browse, search, lookup)
//! - [`transfer`]: chunked resumable downloads and uploads
//! - [`transport`]: the seam a network integration implements

/// Envelope version spoken by this build. Peers reject other versions.
pub const PROTOCOL_VERSION: u32 = 1;

pub mod client;
pub mod commands;
pub mod config;
pub mod entity;
pub mod events;
pub mod protocol;
pub mod security;
pub mod session;
pub mod share;
pub mod transfer;
pub mod transport;

// Re-export commonly used types at the crate root
pub use client::{Client, Roster};
pub use commands::{BrowseListing, CommandError, CommandState};
pub use config::ClientConfig;
pub use entity::Status;
pub use events::{Event, EventBus};
pub use protocol::{FileSummary, FolderSummary, Message, MessageAction, MessageKind};
pub use security::{
    CipherChain, CipherKind, FsSource, GroupConfig, KdfKind, KeySource, MaterialSource,
    SecurityGroup,
};
pub use session::Session;
pub use share::{FileFilter, ShareIndex};
pub use transfer::{Direction, Transfer, TransferError, TransferState};
pub use transport::{StatusCode, Transport, TransportError, WireReply};
