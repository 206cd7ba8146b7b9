//! Message envelope protocol: typed documents, validation, and framing.
//!
//! Everything a peer says is one [`Envelope`] holding one [`Message`],
//! serialized to compact JSON, encrypted through the cipher chain (and the
//! session cipher once a session exists), and base64-framed as the body of
//! a request/response exchange.

pub mod codec;
pub mod message;

pub use codec::{decode, encode};
pub use message::{
    BrowsePayload, ChatPayload, ChatScope, ChunkPayload, ClientSummary, Envelope, FileSummary,
    FolderSummary, GroupPayload, InfoPayload, KeyOffer, Message, MessageAction, MessageKind,
    SearchPayload,
};

use thiserror::Error;

/// Errors from parsing, validating, or framing messages.
///
/// At the responder boundary every variant maps to a bad-request status;
/// none of them leaves partial state behind.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid message: {0}")]
    Invalid(&'static str),

    #[error("Missing {0} payload")]
    MissingPayload(&'static str),

    #[error("Serialization failed: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Base64 decoding failed: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("Security layer failed: {0}")]
    Security(#[from] crate::security::SecurityError),
}
