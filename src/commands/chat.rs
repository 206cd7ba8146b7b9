//! Chat: group broadcasts and direct messages.
//!
//! Muting is enforced on the receiving side: a muted sender still gets a
//! normal acknowledgment, so it cannot tell it was muted, but the message
//! never reaches the event bus.

use tracing::debug;

use crate::commands::{Command, CommandContext, CommandError, ResponderContext};
use crate::events::Event;
use crate::protocol::{ChatScope, Message, MessageKind};
use crate::transport::StatusCode;

/// Broadcasts `text` to the group under the sender's identity.
pub fn chat_group(
    ctx: &CommandContext<'_>,
    sender_id: &str,
    sender_name: &str,
    text: &str,
) -> Result<(), CommandError> {
    let request = Message::chat_request(sender_id, sender_name, text, ChatScope::Group);
    let mut command = Command::new();
    command.exchange(ctx, request)?;
    Ok(())
}

/// Sends `text` to one peer.
pub fn chat_direct(
    ctx: &CommandContext<'_>,
    sender_id: &str,
    sender_name: &str,
    target_id: &str,
    text: &str,
) -> Result<(), CommandError> {
    let mut request = Message::chat_request(sender_id, sender_name, text, ChatScope::Client);
    request.id = Some(target_id.to_string());
    let mut command = Command::new();
    command.exchange(ctx, request)?;
    Ok(())
}

/// Handles an inbound chat: upserts the sender in the roster, then either
/// publishes the message or, for a muted sender, acknowledges silently.
pub(crate) fn respond(
    ctx: &ResponderContext<'_>,
    message: &Message,
) -> Result<Message, StatusCode> {
    let chat = message.chat_payload().map_err(|_| StatusCode::BadRequest)?;
    let (Some(sender_id), Some(sender_name)) = (&chat.client, &chat.name) else {
        return Err(StatusCode::BadRequest);
    };

    let peer = ctx.roster.upsert(sender_id, sender_name);
    let muted = peer.endpoint().map(|e| e.muted()).unwrap_or(false);
    if muted {
        debug!(sender = %sender_id, "suppressing chat from muted peer");
    } else {
        ctx.bus.publish(&Event::Chat {
            sender_id: sender_id.clone(),
            sender_name: sender_name.clone(),
            text: chat.text.clone(),
            scope: chat.scope,
        });
    }
    Ok(Message::response(MessageKind::Chat))
}
