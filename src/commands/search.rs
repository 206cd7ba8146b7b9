//! Search: keyword scan over a peer's shared files.

use crate::commands::{Command, CommandContext, CommandError, ResponderContext};
use crate::protocol::{FileSummary, Message};
use crate::share::FileFilter;
use crate::transport::StatusCode;

/// Splits a raw keyword into lowercased match tokens.
///
/// A leading quote turns the whole keyword into one exact phrase; a missing
/// closing quote is tolerated. Anything else splits on whitespace, and any
/// token matching counts as a hit.
pub fn parse_keywords(raw: &str) -> Vec<String> {
    let raw = raw.trim();
    if let Some(stripped) = raw.strip_prefix('"') {
        let phrase = stripped.strip_suffix('"').unwrap_or(stripped);
        return vec![phrase.to_lowercase()];
    }
    raw.split_whitespace().map(str::to_lowercase).collect()
}

/// Searches the peer's shared files by keyword and extension class.
pub fn search(
    ctx: &CommandContext<'_>,
    keyword: &str,
    filter: FileFilter,
) -> Result<Vec<FileSummary>, CommandError> {
    let mut command = Command::new();
    let envelope = command.exchange(ctx, Message::search_request(keyword, filter))?;
    Ok(envelope.data.files.unwrap_or_default())
}

/// Answers a search request with one capped scan over the share index.
pub(crate) fn respond(
    ctx: &ResponderContext<'_>,
    message: &Message,
) -> Result<Message, StatusCode> {
    let payload = message.search_payload().map_err(|_| StatusCode::BadRequest)?;
    let keywords = parse_keywords(&payload.keyword);
    let matches = ctx
        .share
        .search(&keywords, payload.filter, ctx.config.max_search_results);
    if matches.is_empty() {
        return Err(StatusCode::NotFound);
    }
    Ok(Message::search_response(matches))
}
