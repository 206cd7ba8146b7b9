//! Handshake: ephemeral key agreement that opens a session.
//!
//! The handshake is the only exchange framed by the cipher chain alone;
//! there is no session key yet on either side. The responder allocates the
//! session id and returns it in the envelope, so the requester learns its
//! address from the reply.

use tracing::{debug, error};

use crate::commands::{Command, CommandContext, CommandError, ResponderContext};
use crate::events::Event;
use crate::protocol::{self, Envelope, Message, MessageAction, MessageKind};
use crate::security::CipherKind;
use crate::session::{validate_offer, KeyExchange, Session};
use crate::transport::{StatusCode, WireReply};
use crate::PROTOCOL_VERSION;

/// Performs the requester side of the key agreement.
///
/// `ctx.session` must be `None`; the exchange runs before any session
/// exists. On success the returned [`Session`] carries the id the
/// responder allocated and the derived key.
pub fn handshake(ctx: &CommandContext<'_>, cipher: CipherKind) -> Result<Session, CommandError> {
    let exchange = KeyExchange::new(cipher);
    let request = Message::handshake_request(exchange.offer());

    let mut command = Command::new();
    let envelope = command.exchange(ctx, request)?;

    let session_id = envelope.session.ok_or(CommandError::NoSession)?;
    let offer = envelope.data.key_offer()?;
    let session_cipher = exchange.agree(offer)?;
    Ok(Session::new(session_id, session_cipher))
}

/// Answers an inbound handshake and registers the new session.
///
/// Unlike [`dispatch`](crate::commands::dispatch) this decodes under the
/// chain only, since the request arrives before a session exists.
pub fn respond_handshake(ctx: &ResponderContext<'_>, body: &str) -> WireReply {
    let envelope = {
        let chain = ctx.chain.read().unwrap_or_else(|e| e.into_inner());
        protocol::decode(body, &chain, None)
    };
    let envelope = match envelope {
        Ok(envelope) => envelope,
        Err(err) => {
            debug!(%err, "dropping undecodable handshake");
            return WireReply::status(StatusCode::BadRequest);
        }
    };
    if envelope.version != PROTOCOL_VERSION {
        debug!(version = envelope.version, "unsupported protocol version");
        return WireReply::status(StatusCode::BadRequest);
    }
    let message = &envelope.data;
    if message.validate(&ctx.config.limits).is_err()
        || message.kind != MessageKind::Handshake
        || message.action != MessageAction::Request
    {
        debug!(kind = %message.kind, "dropping invalid handshake request");
        return WireReply::status(StatusCode::BadRequest);
    }
    let Ok(offer) = message.key_offer() else {
        return WireReply::status(StatusCode::BadRequest);
    };
    let kind = match validate_offer(offer) {
        Ok(kind) => kind,
        Err(err) => {
            debug!(%err, "rejecting key offer");
            return WireReply::status(StatusCode::BadRequest);
        }
    };

    let exchange = KeyExchange::new(kind);
    // Capture the reply offer first; agreeing consumes the secret.
    let reply_offer = exchange.offer();
    let cipher = match exchange.agree(offer) {
        Ok(cipher) => cipher,
        Err(err) => {
            debug!(%err, "key agreement failed");
            return WireReply::status(StatusCode::BadRequest);
        }
    };

    let session = ctx.sessions.insert(cipher);
    ctx.bus.publish(&Event::SessionEstablished {
        id: session.id().to_string(),
    });

    let reply =
        Envelope::new(Message::handshake_response(reply_offer)).with_session(session.id());
    let body = {
        let chain = ctx.chain.read().unwrap_or_else(|e| e.into_inner());
        protocol::encode(&reply, &chain, None)
    };
    match body {
        Ok(body) => WireReply::ok(body),
        Err(err) => {
            error!(%err, "failed to encode handshake response");
            WireReply::status(StatusCode::InternalError)
        }
    }
}
