//! Browse: list a peer's shared folders and files.

use tracing::debug;

use crate::commands::{Command, CommandContext, CommandError, ResponderContext};
use crate::protocol::{FileSummary, FolderSummary, Message};
use crate::share::ShareError;
use crate::transport::StatusCode;

/// A browse response as seen by the requester.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BrowseListing {
    pub folders: Vec<FolderSummary>,
    pub files: Vec<FileSummary>,
}

/// Requests the immediate children of `folder`, or the peer's top-level
/// shares when no folder is named.
pub fn browse(
    ctx: &CommandContext<'_>,
    folder: Option<String>,
) -> Result<BrowseListing, CommandError> {
    let mut command = Command::new();
    let envelope = command.exchange(ctx, Message::browse_request(folder))?;
    Ok(BrowseListing {
        folders: envelope.data.folders.unwrap_or_default(),
        files: envelope.data.files.unwrap_or_default(),
    })
}

/// Answers a browse request from the local share index.
pub(crate) fn respond(
    ctx: &ResponderContext<'_>,
    message: &Message,
) -> Result<Message, StatusCode> {
    let folder = message.browse.as_ref().and_then(|b| b.folder.as_deref());
    match ctx.share.browse(folder) {
        Ok((folders, files)) => Ok(Message::browse_response(folders, files)),
        Err(ShareError::UnknownFolder(id)) => {
            debug!(folder = %id, "browse for unknown folder");
            Err(StatusCode::NotFound)
        }
    }
}
