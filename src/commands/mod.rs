//! Command handlers: each feature as a client request path and a server
//! response path over the envelope protocol.
//!
//! The client side runs through [`Command`], which tracks the shared state
//! machine (`Idle → RequestSent → AwaitingResponse → Completed | Failed`)
//! around one request/response exchange; failures resolve to a terminal
//! state with no silent retries. The server side enters through
//! [`dispatch`], which decodes, validates, and routes an inbound body to
//! the matching responder.

mod browse;
mod chat;
mod handshake;
mod search;

pub use browse::{browse, BrowseListing};
pub use chat::{chat_direct, chat_group};
pub use handshake::{handshake, respond_handshake};
pub use search::{parse_keywords, search};

use std::sync::RwLock;

use thiserror::Error;
use tracing::{debug, error};

use crate::client::Roster;
use crate::config::{ClientConfig, Limits};
use crate::events::{Event, EventBus};
use crate::protocol::{self, Envelope, Message, MessageAction, MessageKind, ProtocolError};
use crate::security::CipherChain;
use crate::session::{HandshakeError, Session, SessionMap};
use crate::share::ShareIndex;
use crate::transfer::{serve_download, serve_upload, UploadTargets};
use crate::transport::{StatusCode, Transport, TransportError, WireReply};
use crate::PROTOCOL_VERSION;

/// Progress of one command execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandState {
    #[default]
    Idle,
    RequestSent,
    AwaitingResponse,
    Completed,
    Failed(StatusCode),
}

/// Errors surfaced by command execution.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Transport failed: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol failure: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Request failed with status {0}")]
    Status(StatusCode),

    #[error("Handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("Unexpected response kind: {0}")]
    UnexpectedResponse(MessageKind),

    #[error("No session established")]
    NoSession,
}

impl CommandError {
    /// The status a failed execution resolves to.
    pub fn failure_code(&self) -> StatusCode {
        match self {
            CommandError::Status(status) => *status,
            CommandError::Transport(_) | CommandError::NoSession => StatusCode::InternalError,
            CommandError::Protocol(_)
            | CommandError::Handshake(_)
            | CommandError::UnexpectedResponse(_) => StatusCode::BadRequest,
        }
    }
}

/// Client-side state shared by every command.
///
/// The chain sits behind a lock taken only around encode/decode; it is
/// never held across a transport exchange. `session` is `None` only for
/// the pre-session handshake.
pub struct CommandContext<'a> {
    pub transport: &'a dyn Transport,
    pub chain: &'a RwLock<CipherChain>,
    pub session: Option<&'a Session>,
    pub limits: &'a Limits,
}

impl<'a> CommandContext<'a> {
    fn address(&self) -> &str {
        self.session.map(Session::id).unwrap_or("")
    }
}

/// One command execution.
#[derive(Debug, Default)]
pub struct Command {
    state: CommandState,
}

impl Command {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> CommandState {
        self.state
    }

    /// Runs one request/response exchange and returns the decoded reply.
    ///
    /// The reply must be an ok-status response of the same kind as the
    /// request and must itself validate; anything else resolves the command
    /// to [`CommandState::Failed`].
    pub fn exchange(
        &mut self,
        ctx: &CommandContext<'_>,
        request: Message,
    ) -> Result<Envelope, CommandError> {
        let kind = request.kind;
        request.validate(ctx.limits).map_err(|e| self.fail(e))?;

        let mut envelope = Envelope::new(request);
        if let Some(session) = ctx.session {
            envelope = envelope.with_session(session.id());
        }
        let body = {
            let chain = ctx.chain.read().unwrap_or_else(|e| e.into_inner());
            protocol::encode(&envelope, &chain, ctx.session).map_err(|e| self.fail(e))?
        };

        ctx.transport
            .send(ctx.address(), &body)
            .map_err(|e| self.fail(e))?;
        self.state = CommandState::RequestSent;

        self.state = CommandState::AwaitingResponse;
        let reply = ctx
            .transport
            .receive(ctx.address())
            .map_err(|e| self.fail(e))?;
        if !reply.status.is_ok() {
            return Err(self.fail(CommandError::Status(reply.status)));
        }

        let envelope = {
            let chain = ctx.chain.read().unwrap_or_else(|e| e.into_inner());
            protocol::decode(&reply.body, &chain, ctx.session).map_err(|e| self.fail(e))?
        };
        envelope.data.validate(ctx.limits).map_err(|e| self.fail(e))?;
        if envelope.data.kind != kind || envelope.data.action != MessageAction::Response {
            return Err(self.fail(CommandError::UnexpectedResponse(envelope.data.kind)));
        }

        self.state = CommandState::Completed;
        Ok(envelope)
    }

    fn fail(&mut self, err: impl Into<CommandError>) -> CommandError {
        let err = err.into();
        self.state = CommandState::Failed(err.failure_code());
        err
    }
}

/// Server-side state the responders draw on.
pub struct ResponderContext<'a> {
    pub config: &'a ClientConfig,
    pub chain: &'a RwLock<CipherChain>,
    pub sessions: &'a SessionMap,
    pub share: &'a ShareIndex,
    pub roster: &'a Roster,
    pub bus: &'a EventBus,
    pub uploads: &'a UploadTargets,
}

/// Answers one inbound request body addressed to an established session.
///
/// Decode or validation failures answer bad-request before any responder
/// runs, so an invalid message never mutates state.
pub fn dispatch(ctx: &ResponderContext<'_>, session_id: &str, body: &str) -> WireReply {
    let Some(session) = ctx.sessions.get(session_id) else {
        debug!(session_id, "request for unknown session");
        return WireReply::status(StatusCode::NotFound);
    };

    let envelope = {
        let chain = ctx.chain.read().unwrap_or_else(|e| e.into_inner());
        protocol::decode(body, &chain, Some(&session))
    };
    let envelope = match envelope {
        Ok(envelope) => envelope,
        Err(err) => {
            debug!(%err, "dropping undecodable request");
            return WireReply::status(StatusCode::BadRequest);
        }
    };
    if envelope.version != PROTOCOL_VERSION {
        debug!(version = envelope.version, "unsupported protocol version");
        return WireReply::status(StatusCode::BadRequest);
    }
    if let Err(err) = envelope.data.validate(&ctx.config.limits) {
        debug!(%err, kind = %envelope.data.kind, "dropping invalid request");
        return WireReply::status(StatusCode::BadRequest);
    }

    match respond(ctx, &session, &envelope.data) {
        Ok(message) => {
            let reply = Envelope::new(message).with_session(session.id());
            let body = {
                let chain = ctx.chain.read().unwrap_or_else(|e| e.into_inner());
                protocol::encode(&reply, &chain, Some(&session))
            };
            match body {
                Ok(body) => WireReply::ok(body),
                Err(err) => {
                    error!(%err, "failed to encode response");
                    WireReply::status(StatusCode::InternalError)
                }
            }
        }
        Err(status) => WireReply::status(status),
    }
}

fn respond(
    ctx: &ResponderContext<'_>,
    session: &Session,
    message: &Message,
) -> Result<Message, StatusCode> {
    if message.action != MessageAction::Request {
        debug!(kind = %message.kind, "dropping non-request message");
        return Err(StatusCode::BadRequest);
    }

    match message.kind {
        MessageKind::Ping => Ok(Message::response(MessageKind::Ping)),
        MessageKind::Info => Ok(Message::info_response(
            ctx.roster.len() as u64,
            ctx.sessions.len() as u64,
            ctx.share.file_count(),
        )),
        MessageKind::Join => respond_join(ctx, message),
        MessageKind::Quit => respond_quit(ctx, session, message),
        MessageKind::Group => Ok(Message::group_response(ctx.roster.list())),
        MessageKind::Browse => browse::respond(ctx, message),
        MessageKind::Search => search::respond(ctx, message),
        MessageKind::Chat => chat::respond(ctx, message),
        MessageKind::Download => serve_download(ctx.share, message),
        MessageKind::Upload => serve_upload(ctx.uploads, message),
        MessageKind::Handshake => {
            debug!("handshake request over an established session");
            Err(StatusCode::BadRequest)
        }
        // Relay-directed kinds a client core does not serve.
        MessageKind::Tunnel | MessageKind::Transfer => {
            debug!(kind = %message.kind, "relay-directed kind at a client responder");
            Err(StatusCode::BadRequest)
        }
        MessageKind::None => Err(StatusCode::BadRequest),
    }
}

fn respond_join(ctx: &ResponderContext<'_>, message: &Message) -> Result<Message, StatusCode> {
    let group = message.group_payload().map_err(|_| StatusCode::BadRequest)?;
    let client = group.clients.first().ok_or(StatusCode::BadRequest)?;

    ctx.roster.upsert(&client.id, &client.name);
    ctx.bus.publish(&Event::PeerJoined {
        id: client.id.clone(),
        name: client.name.clone(),
    });
    Ok(Message::response(MessageKind::Join))
}

fn respond_quit(
    ctx: &ResponderContext<'_>,
    session: &Session,
    message: &Message,
) -> Result<Message, StatusCode> {
    if let Some(id) = &message.id {
        if ctx.roster.remove(id) {
            ctx.bus.publish(&Event::PeerQuit { id: id.clone() });
        }
    }
    // The reply is encoded by the caller from its own handle, so the
    // session can leave the map now.
    ctx.sessions.remove(session.id());
    Ok(Message::response(MessageKind::Quit))
}
