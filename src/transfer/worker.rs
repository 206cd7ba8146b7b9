//! Worker loop: one thread moving chunks for one transfer.

use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::commands::{self, Command, CommandContext, CommandError};
use crate::entity::Status;
use crate::protocol::Message;
use crate::transfer::{io, Direction, Transfer, TransferError, WorkerContext};

/// Runs one worker until the transfer is done, quit, or this worker fails.
pub(crate) fn run(
    transfer: Arc<Transfer>,
    ctx: WorkerContext,
    status: Arc<Mutex<Status>>,
    index: usize,
) {
    let outcome = drive(&transfer, &ctx, index);
    *status.lock().unwrap_or_else(|e| e.into_inner()) = outcome;
    transfer.finish_worker(&ctx.bus);
}

fn drive(transfer: &Transfer, ctx: &WorkerContext, index: usize) -> Status {
    // Each worker opens its own session; a resume handshakes afresh.
    let handshake_ctx = CommandContext {
        transport: ctx.transport.as_ref(),
        chain: &ctx.chain,
        session: None,
        limits: &ctx.config.limits,
    };
    let session = match commands::handshake(&handshake_ctx, ctx.config.cipher) {
        Ok(session) => session,
        Err(err) => {
            warn!(worker = index, %err, "transfer handshake failed");
            return Status::Warning;
        }
    };
    transfer.note_transferring();

    let chunk_ctx = CommandContext {
        transport: ctx.transport.as_ref(),
        chain: &ctx.chain,
        session: Some(&session),
        limits: &ctx.config.limits,
    };
    let mut last = None;
    loop {
        if transfer.quit_requested() {
            debug!(worker = index, "worker leaving on quit request");
            break;
        }
        // Scan strictly after our own trail first, then once from the
        // cursor to pick up offsets a failed sibling released.
        let offset = match transfer.ledger().next_chunk(last) {
            Some(offset) => offset,
            None => match transfer.ledger().next_chunk(None) {
                Some(offset) => offset,
                None => break,
            },
        };
        let len = transfer.ledger().chunk_len(offset);
        let moved = match transfer.direction() {
            Direction::Download => fetch(transfer, &chunk_ctx, offset, len),
            Direction::Upload => push(transfer, &chunk_ctx, offset, len),
        };
        match moved {
            Ok(()) => {
                transfer.ledger().complete(len);
                transfer.touch_progress();
                last = Some(offset);
            }
            Err(err) => {
                // Give the chunk back so a sibling or a resume can redo it.
                transfer.ledger().release(offset);
                warn!(worker = index, offset, %err, "chunk transfer failed");
                return err.worker_status();
            }
        }
    }
    Status::Success
}

/// Fetches one chunk from the remote side and writes it in place.
fn fetch(
    transfer: &Transfer,
    ctx: &CommandContext<'_>,
    offset: u64,
    len: u64,
) -> Result<(), TransferError> {
    let request = Message::download_request(transfer.file().id.as_str(), offset, len);
    let mut command = Command::new();
    let envelope = command.exchange(ctx, request)?;

    let chunk = envelope.data.chunk_payload().map_err(CommandError::from)?;
    let data = chunk.bytes().map_err(CommandError::from)?;
    if data.len() as u64 != len {
        return Err(TransferError::Length {
            offset,
            expected: len,
            got: data.len() as u64,
        });
    }
    io::write_at(transfer.path(), offset, &data)?;
    Ok(())
}

/// Reads one local chunk and pushes it to the remote side.
fn push(
    transfer: &Transfer,
    ctx: &CommandContext<'_>,
    offset: u64,
    len: u64,
) -> Result<(), TransferError> {
    let data = io::read_at(transfer.path(), offset, len)?;
    let request = Message::upload_request(transfer.file().id.as_str(), offset, &data);
    let mut command = Command::new();
    command.exchange(ctx, request)?;
    Ok(())
}
