//! Typed messages: the request/response documents every feature rides on.
//!
//! One canonical [`Message`] struct carries every kind; the set of kinds is
//! closed, so each payload family is a named optional slot rather than a
//! polymorphic view. A slot absent on the wire stays absent here. The outer
//! [`Envelope`] adds the protocol version, a random nonce, and the session
//! id used to address the exchange.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::config::{Limits, MAX_CHUNK_SIZE};
use crate::protocol::ProtocolError;
use crate::share::FileFilter;
use crate::PROTOCOL_VERSION;

/// Every message kind this protocol knows. Missing on the wire means
/// [`MessageKind::None`], which never validates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    None,
    Ping,
    Info,
    Handshake,
    Join,
    Tunnel,
    Search,
    Group,
    Browse,
    Transfer,
    Download,
    Upload,
    Quit,
    Chat,
}

impl MessageKind {
    pub fn is_none(&self) -> bool {
        matches!(self, MessageKind::None)
    }

    pub fn name(&self) -> &'static str {
        match self {
            MessageKind::None => "none",
            MessageKind::Ping => "ping",
            MessageKind::Info => "info",
            MessageKind::Handshake => "handshake",
            MessageKind::Join => "join",
            MessageKind::Tunnel => "tunnel",
            MessageKind::Search => "search",
            MessageKind::Group => "group",
            MessageKind::Browse => "browse",
            MessageKind::Transfer => "transfer",
            MessageKind::Download => "download",
            MessageKind::Upload => "upload",
            MessageKind::Quit => "quit",
            MessageKind::Chat => "chat",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Request or response. Missing on the wire means none, which never
/// validates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageAction {
    #[default]
    None,
    Request,
    Response,
}

impl MessageAction {
    pub fn is_none(&self) -> bool {
        matches!(self, MessageAction::None)
    }
}

/// Whether a chat goes to the whole group or one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatScope {
    Group,
    Client,
}

/// Browse request payload: no folder means the shared roots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowsePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
}

/// Search request payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchPayload {
    pub keyword: String,
    #[serde(default)]
    pub filter: FileFilter,
}

/// Chat payload. `client`/`name` identify the sender as seen by the
/// receiving peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub text: String,
    pub scope: ChatScope,
}

/// Key-agreement parameters, carried generically as a DH-family offer.
/// The curve family encodes as `base = 0` with an empty prime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyOffer {
    /// Requested session key size in bits.
    pub size: u32,
    pub base: u32,
    #[serde(default)]
    pub prime: String,
    /// Cipher the session key will drive, selected by name.
    pub cipher: String,
    /// Base64 public value.
    pub public_key: String,
}

/// One chunk of a transfer. Download requests leave `data` empty; download
/// responses and upload requests carry the bytes base64-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub offset: u64,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl ChunkPayload {
    /// A claim for `size` bytes at `offset`, no data attached.
    pub fn request(offset: u64, size: u64) -> Self {
        Self {
            offset,
            size,
            data: None,
        }
    }

    /// A chunk carrying its bytes.
    pub fn with_data(offset: u64, data: &[u8]) -> Self {
        Self {
            offset,
            size: data.len() as u64,
            data: Some(STANDARD.encode(data)),
        }
    }

    /// Decodes the carried bytes.
    pub fn bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        let data = self
            .data
            .as_deref()
            .ok_or(ProtocolError::MissingPayload("chunk data"))?;
        Ok(STANDARD.decode(data)?)
    }
}

/// A peer as listed in rosters and join announcements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSummary {
    pub id: String,
    pub name: String,
}

/// Roster payload for group responses and join requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupPayload {
    pub clients: Vec<ClientSummary>,
}

/// Peer/session/share counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoPayload {
    pub clients: u64,
    pub sessions: u64,
    pub files: u64,
}

/// A shared file as listed in browse and search responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSummary {
    pub id: String,
    pub name: String,
    pub size: u64,
}

/// A shared folder as listed in browse responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderSummary {
    pub id: String,
    pub name: String,
}

/// The canonical message document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type", default, skip_serializing_if = "MessageKind::is_none")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "MessageAction::is_none")]
    pub action: MessageAction,
    /// Kind-dependent object id: target peer, file id, quitting client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Retry hint in milliseconds, set by responders under load.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browse: Option<BrowsePayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<SearchPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat: Option<ChatPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<KeyOffer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk: Option<ChunkPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<GroupPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<InfoPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folders: Option<Vec<FolderSummary>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<FileSummary>>,
}

impl Message {
    fn base(kind: MessageKind, action: MessageAction) -> Self {
        Self {
            kind,
            action,
            ..Self::default()
        }
    }

    /// A bodyless acknowledgment of the given kind.
    pub fn response(kind: MessageKind) -> Self {
        Self::base(kind, MessageAction::Response)
    }

    pub fn ping_request() -> Self {
        Self::base(MessageKind::Ping, MessageAction::Request)
    }

    pub fn info_request() -> Self {
        Self::base(MessageKind::Info, MessageAction::Request)
    }

    pub fn info_response(clients: u64, sessions: u64, files: u64) -> Self {
        Self {
            info: Some(InfoPayload {
                clients,
                sessions,
                files,
            }),
            ..Self::base(MessageKind::Info, MessageAction::Response)
        }
    }

    pub fn handshake_request(offer: KeyOffer) -> Self {
        Self {
            key: Some(offer),
            ..Self::base(MessageKind::Handshake, MessageAction::Request)
        }
    }

    pub fn handshake_response(offer: KeyOffer) -> Self {
        Self {
            key: Some(offer),
            ..Self::base(MessageKind::Handshake, MessageAction::Response)
        }
    }

    /// Announces this client to the group under its id and display name.
    pub fn join_request(id: impl Into<String>, name: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            id: Some(id.clone()),
            group: Some(GroupPayload {
                clients: vec![ClientSummary {
                    id,
                    name: name.into(),
                }],
            }),
            ..Self::base(MessageKind::Join, MessageAction::Request)
        }
    }

    pub fn quit_request(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::base(MessageKind::Quit, MessageAction::Request)
        }
    }

    pub fn group_request() -> Self {
        Self::base(MessageKind::Group, MessageAction::Request)
    }

    pub fn group_response(clients: Vec<ClientSummary>) -> Self {
        Self {
            group: Some(GroupPayload { clients }),
            ..Self::base(MessageKind::Group, MessageAction::Response)
        }
    }

    pub fn browse_request(folder: Option<String>) -> Self {
        Self {
            browse: Some(BrowsePayload { folder }),
            ..Self::base(MessageKind::Browse, MessageAction::Request)
        }
    }

    pub fn browse_response(folders: Vec<FolderSummary>, files: Vec<FileSummary>) -> Self {
        Self {
            folders: Some(folders),
            files: Some(files),
            ..Self::base(MessageKind::Browse, MessageAction::Response)
        }
    }

    pub fn search_request(keyword: impl Into<String>, filter: FileFilter) -> Self {
        Self {
            search: Some(SearchPayload {
                keyword: keyword.into(),
                filter,
            }),
            ..Self::base(MessageKind::Search, MessageAction::Request)
        }
    }

    pub fn search_response(files: Vec<FileSummary>) -> Self {
        Self {
            files: Some(files),
            ..Self::base(MessageKind::Search, MessageAction::Response)
        }
    }

    pub fn chat_request(
        client: impl Into<String>,
        name: impl Into<String>,
        text: impl Into<String>,
        scope: ChatScope,
    ) -> Self {
        Self {
            chat: Some(ChatPayload {
                client: Some(client.into()),
                name: Some(name.into()),
                text: text.into(),
                scope,
            }),
            ..Self::base(MessageKind::Chat, MessageAction::Request)
        }
    }

    pub fn download_request(file_id: impl Into<String>, offset: u64, size: u64) -> Self {
        Self {
            id: Some(file_id.into()),
            chunk: Some(ChunkPayload::request(offset, size)),
            ..Self::base(MessageKind::Download, MessageAction::Request)
        }
    }

    pub fn download_response(offset: u64, data: &[u8]) -> Self {
        Self {
            chunk: Some(ChunkPayload::with_data(offset, data)),
            ..Self::base(MessageKind::Download, MessageAction::Response)
        }
    }

    pub fn upload_request(file_id: impl Into<String>, offset: u64, data: &[u8]) -> Self {
        Self {
            id: Some(file_id.into()),
            chunk: Some(ChunkPayload::with_data(offset, data)),
            ..Self::base(MessageKind::Upload, MessageAction::Request)
        }
    }

    pub fn browse_payload(&self) -> Result<&BrowsePayload, ProtocolError> {
        self.browse
            .as_ref()
            .ok_or(ProtocolError::MissingPayload("browse"))
    }

    pub fn search_payload(&self) -> Result<&SearchPayload, ProtocolError> {
        self.search
            .as_ref()
            .ok_or(ProtocolError::MissingPayload("search"))
    }

    pub fn chat_payload(&self) -> Result<&ChatPayload, ProtocolError> {
        self.chat
            .as_ref()
            .ok_or(ProtocolError::MissingPayload("chat"))
    }

    pub fn key_offer(&self) -> Result<&KeyOffer, ProtocolError> {
        self.key.as_ref().ok_or(ProtocolError::MissingPayload("key"))
    }

    pub fn chunk_payload(&self) -> Result<&ChunkPayload, ProtocolError> {
        self.chunk
            .as_ref()
            .ok_or(ProtocolError::MissingPayload("chunk"))
    }

    pub fn group_payload(&self) -> Result<&GroupPayload, ProtocolError> {
        self.group
            .as_ref()
            .ok_or(ProtocolError::MissingPayload("group"))
    }

    pub fn info_payload(&self) -> Result<&InfoPayload, ProtocolError> {
        self.info
            .as_ref()
            .ok_or(ProtocolError::MissingPayload("info"))
    }

    /// Checks the structural rules a message must satisfy before dispatch.
    ///
    /// A message without a kind or action never validates; each kind then
    /// adds its own required-field and length checks against the configured
    /// limits.
    pub fn validate(&self, limits: &Limits) -> Result<(), ProtocolError> {
        if self.kind.is_none() {
            return Err(ProtocolError::Invalid("message kind is missing"));
        }
        if self.action.is_none() {
            return Err(ProtocolError::Invalid("message action is missing"));
        }
        if let Some(id) = &self.id {
            if id.is_empty() || id.len() > limits.max_id {
                return Err(ProtocolError::Invalid("id length out of range"));
            }
        }

        match (self.kind, self.action) {
            (MessageKind::Browse, MessageAction::Request) => {
                if let Some(folder) = self.browse.as_ref().and_then(|b| b.folder.as_deref()) {
                    if folder.is_empty() || folder.len() > limits.max_id {
                        return Err(ProtocolError::Invalid("folder id length out of range"));
                    }
                }
            }
            (MessageKind::Browse, MessageAction::Response) => {
                if self.folders.is_none() && self.files.is_none() {
                    return Err(ProtocolError::Invalid("browse response carries no listing"));
                }
            }
            (MessageKind::Search, MessageAction::Request) => {
                let keyword = self.search_payload()?.keyword.trim();
                if keyword.len() < limits.min_keyword || keyword.len() > limits.max_keyword {
                    return Err(ProtocolError::Invalid("keyword length out of range"));
                }
            }
            (MessageKind::Chat, MessageAction::Request) => {
                let chat = self.chat_payload()?;
                let client = chat.client.as_deref().unwrap_or("");
                let name = chat.name.as_deref().unwrap_or("");
                if client.is_empty() || client.len() > limits.max_id {
                    return Err(ProtocolError::Invalid("chat sender id length out of range"));
                }
                if name.is_empty() || name.len() > limits.max_name {
                    return Err(ProtocolError::Invalid("chat sender name length out of range"));
                }
                if chat.text.is_empty() || chat.text.len() > limits.max_text {
                    return Err(ProtocolError::Invalid("chat text length out of range"));
                }
            }
            (MessageKind::Handshake, _) => {
                if self.key_offer()?.public_key.is_empty() {
                    return Err(ProtocolError::Invalid("handshake offer has no public key"));
                }
            }
            (MessageKind::Download, _) | (MessageKind::Upload, MessageAction::Request) => {
                let chunk = self.chunk_payload()?;
                if chunk.size == 0 || chunk.size > MAX_CHUNK_SIZE {
                    return Err(ProtocolError::Invalid("chunk size out of range"));
                }
            }
            (MessageKind::Join, MessageAction::Request) => {
                let group = self.group_payload()?;
                let client = group
                    .clients
                    .first()
                    .ok_or(ProtocolError::Invalid("join announces no client"))?;
                if client.id.is_empty() || client.id.len() > limits.max_id {
                    return Err(ProtocolError::Invalid("join client id length out of range"));
                }
                if client.name.is_empty() || client.name.len() > limits.max_name {
                    return Err(ProtocolError::Invalid("join client name length out of range"));
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// The outer document: version, nonce, addressing, and one message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub version: u32,
    pub nonce: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    pub data: Message,
}

impl Envelope {
    pub fn new(data: Message) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            nonce: OsRng.next_u64(),
            session: None,
            data,
        }
    }

    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }
}
