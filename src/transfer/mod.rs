//! Transfer engine: chunked, resumable file movement on worker threads.
//!
//! A [`Transfer`] owns the ledger and the threads moving one file; the
//! [`TransferEngine`] keeps the queued and active lists, promotes queued
//! transfers into free per-direction slots on each maintenance pass, and
//! cancels the ones that stall. Cancellation is cooperative: quitting sets
//! a counter workers check between chunks, so an in-flight chunk always
//! completes or cleanly fails instead of tearing the partial file.

pub mod chunk;
pub mod io;
mod worker;

pub use chunk::ChunkLedger;

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::commands::CommandError;
use crate::config::ClientConfig;
use crate::entity::Status;
use crate::events::{Event, EventBus};
use crate::protocol::{FileSummary, Message, MessageKind};
use crate::security::CipherChain;
use crate::share::ShareIndex;
use crate::transport::{StatusCode, Transport};

/// Which way the bytes flow, from this client's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Download,
    Upload,
}

/// Lifecycle of one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferState {
    #[default]
    Created,
    Handshaking,
    Transferring,
    Quitting,
    Stopped,
    Finished,
    Cancelled,
}

impl TransferState {
    /// True while worker threads are running or winding down.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            TransferState::Handshaking | TransferState::Transferring | TransferState::Quitting
        )
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferState::Created => "created",
            TransferState::Handshaking => "handshaking",
            TransferState::Transferring => "transferring",
            TransferState::Quitting => "quitting",
            TransferState::Stopped => "stopped",
            TransferState::Finished => "finished",
            TransferState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Errors raised while moving chunks.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Transfer I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Chunk exchange failed: {0}")]
    Exchange(#[from] CommandError),

    #[error("Chunk at offset {offset} returned {got} bytes, expected {expected}")]
    Length { offset: u64, expected: u64, got: u64 },

    #[error("Transfer cannot resume from state {0}")]
    NotResumable(TransferState),
}

impl TransferError {
    /// The worker status a failure resolves to: remote trouble degrades to
    /// a warning, local file trouble is an error.
    pub(crate) fn worker_status(&self) -> Status {
        match self {
            TransferError::Io(_) | TransferError::NotResumable(_) => Status::Error,
            TransferError::Exchange(_) | TransferError::Length { .. } => Status::Warning,
        }
    }
}

/// Shared handles a worker thread needs to move chunks.
#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub transport: Arc<dyn Transport>,
    pub chain: Arc<RwLock<CipherChain>>,
    pub bus: Arc<EventBus>,
    pub config: ClientConfig,
}

/// One chunked file movement and the threads driving it.
pub struct Transfer {
    file: FileSummary,
    path: PathBuf,
    direction: Direction,
    ledger: ChunkLedger,
    state: Mutex<TransferState>,
    workers: Mutex<Vec<Arc<Mutex<Status>>>>,
    running: AtomicUsize,
    quit: AtomicU32,
    progress: Mutex<Instant>,
    started: Mutex<Option<Instant>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Transfer {
    fn new(file: FileSummary, path: PathBuf, direction: Direction, chunk_size: u64) -> Arc<Self> {
        Arc::new(Self {
            ledger: ChunkLedger::new(file.size, chunk_size),
            file,
            path,
            direction,
            state: Mutex::new(TransferState::Created),
            workers: Mutex::new(Vec::new()),
            running: AtomicUsize::new(0),
            quit: AtomicU32::new(0),
            progress: Mutex::new(Instant::now()),
            started: Mutex::new(None),
            handles: Mutex::new(Vec::new()),
        })
    }

    pub fn file(&self) -> &FileSummary {
        &self.file
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub(crate) fn ledger(&self) -> &ChunkLedger {
        &self.ledger
    }

    pub fn state(&self) -> TransferState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, next: TransferState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = next;
    }

    /// Bytes confirmed moved so far.
    pub fn transferred(&self) -> u64 {
        self.ledger.transferred()
    }

    /// Wall time since the first start; zero before that.
    pub fn elapsed(&self) -> Duration {
        self.started
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .map(|at| at.elapsed())
            .unwrap_or_default()
    }

    /// Snapshot of each worker thread's own status.
    pub fn worker_statuses(&self) -> Vec<Status> {
        self.workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|status| *status.lock().unwrap_or_else(|e| e.into_inner()))
            .collect()
    }

    /// Aggregate outcome: success once finished, the worst worker outcome
    /// after a stop, pending while running.
    pub fn status(&self) -> Status {
        match self.state() {
            TransferState::Created => Status::None,
            TransferState::Handshaking | TransferState::Transferring | TransferState::Quitting => {
                Status::Pending
            }
            TransferState::Finished => Status::Success,
            TransferState::Cancelled => Status::Cancelled,
            TransferState::Stopped => {
                let mut worst = Status::None;
                for status in self.worker_statuses() {
                    match status {
                        Status::Error => return Status::Error,
                        Status::Warning => worst = Status::Warning,
                        _ => {}
                    }
                }
                worst
            }
        }
    }

    pub fn quit_requested(&self) -> bool {
        self.quit.load(Ordering::Acquire) > 0
    }

    /// Raises the quit counter. True only for the first request.
    fn request_quit(&self) -> bool {
        self.quit.fetch_add(1, Ordering::AcqRel) == 0
    }

    pub(crate) fn touch_progress(&self) {
        *self.progress.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    /// True when a live transfer has gone `timeout` without moving a chunk.
    pub fn timed_out(&self, timeout: Duration) -> bool {
        self.state().is_live()
            && self
                .progress
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .elapsed()
                > timeout
    }

    pub fn stoppable(&self) -> bool {
        self.state().is_live()
    }

    /// A stopped, incomplete transfer whose partial file is still on disk.
    pub fn resumable(&self) -> bool {
        self.state() == TransferState::Stopped
            && !self.ledger.is_done()
            && (self.direction == Direction::Upload || self.path.exists())
    }

    /// Every worker settled and none running.
    pub fn removeable(&self) -> bool {
        !self.state().is_live() && self.running.load(Ordering::Acquire) == 0
    }

    /// Asks workers to stop after their in-flight chunk. The ledger and the
    /// partial file stay intact for a later resume.
    pub fn stop(&self) {
        if !self.stoppable() {
            return;
        }
        if self.request_quit() {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.is_live() {
                *state = TransferState::Quitting;
            }
        }
    }

    /// Quits and marks the transfer cancelled; it will not resume.
    pub fn cancel(&self) {
        self.request_quit();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state != TransferState::Finished {
            *state = TransferState::Cancelled;
        }
    }

    /// Spawns workers over the existing ledger. First start of a download
    /// allocates the local file; a resume must not, the partial is there.
    fn start(self: &Arc<Self>, ctx: &WorkerContext) -> Result<(), TransferError> {
        let previous = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            match *state {
                TransferState::Created | TransferState::Stopped => {
                    let previous = *state;
                    *state = TransferState::Handshaking;
                    previous
                }
                _ => return Ok(()),
            }
        };
        if previous == TransferState::Created && self.direction == Direction::Download {
            if let Err(err) = io::allocate(&self.path, self.file.size) {
                self.set_state(TransferState::Cancelled);
                return Err(err.into());
            }
        }

        self.quit.store(0, Ordering::Release);
        self.touch_progress();
        {
            let mut started = self.started.lock().unwrap_or_else(|e| e.into_inner());
            if started.is_none() {
                *started = Some(Instant::now());
            }
        }

        let count = ctx.config.effective_workers(self.file.size);
        let mut statuses = Vec::with_capacity(count);
        let mut handles = Vec::with_capacity(count);
        self.running.store(count, Ordering::Release);
        for index in 0..count {
            let status = Arc::new(Mutex::new(Status::Pending));
            statuses.push(Arc::clone(&status));
            let transfer = Arc::clone(self);
            let ctx = ctx.clone();
            handles.push(thread::spawn(move || worker::run(transfer, ctx, status, index)));
        }
        *self.workers.lock().unwrap_or_else(|e| e.into_inner()) = statuses;
        self.handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(handles);

        debug!(
            file = %self.file.name,
            workers = count,
            direction = ?self.direction,
            "transfer started"
        );
        Ok(())
    }

    /// First worker through the handshake flips the state over.
    pub(crate) fn note_transferring(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state == TransferState::Handshaking {
            *state = TransferState::Transferring;
        }
    }

    /// Called by each worker on exit; the last one out settles the state
    /// and publishes the update.
    pub(crate) fn finish_worker(&self, bus: &EventBus) {
        if self.running.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        let settled = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            *state = if self.ledger.is_done() {
                TransferState::Finished
            } else if *state == TransferState::Cancelled {
                TransferState::Cancelled
            } else {
                TransferState::Stopped
            };
            *state
        };
        info!(
            file = %self.file.name,
            state = %settled,
            transferred = self.transferred(),
            "transfer settled"
        );
        bus.publish(&Event::TransferUpdate {
            id: self.file.id.clone(),
            status: self.status(),
            transferred: self.transferred(),
        });
    }

    /// Waits for every spawned worker to exit.
    pub fn join(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut slot = self.handles.lock().unwrap_or_else(|e| e.into_inner());
            slot.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.join();
        }
    }
}

impl fmt::Debug for Transfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transfer")
            .field("file", &self.file.name)
            .field("direction", &self.direction)
            .field("state", &self.state())
            .field("transferred", &self.transferred())
            .finish()
    }
}

/// Destinations this client has agreed to receive uploads into, keyed by
/// file id.
#[derive(Debug, Default)]
pub struct UploadTargets {
    targets: RwLock<HashMap<String, PathBuf>>,
}

impl UploadTargets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, file_id: impl Into<String>, path: impl Into<PathBuf>) {
        self.targets
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(file_id.into(), path.into());
    }

    pub fn get(&self, file_id: &str) -> Option<PathBuf> {
        self.targets
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(file_id)
            .cloned()
    }

    pub fn remove(&self, file_id: &str) -> Option<PathBuf> {
        self.targets
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(file_id)
    }
}

/// Queued and active transfers plus the context workers run under.
pub struct TransferEngine {
    transport: Arc<dyn Transport>,
    chain: Arc<RwLock<CipherChain>>,
    bus: Arc<EventBus>,
    config: ClientConfig,
    queued: Mutex<Vec<Arc<Transfer>>>,
    active: Mutex<Vec<Arc<Transfer>>>,
}

impl TransferEngine {
    pub fn new(
        transport: Arc<dyn Transport>,
        chain: Arc<RwLock<CipherChain>>,
        bus: Arc<EventBus>,
        config: ClientConfig,
    ) -> Self {
        Self {
            transport,
            chain,
            bus,
            config,
            queued: Mutex::new(Vec::new()),
            active: Mutex::new(Vec::new()),
        }
    }

    fn worker_context(&self) -> WorkerContext {
        WorkerContext {
            transport: Arc::clone(&self.transport),
            chain: Arc::clone(&self.chain),
            bus: Arc::clone(&self.bus),
            config: self.config.clone(),
        }
    }

    /// Queues a download of `file` into `path`; started on a later poll.
    pub fn queue_download(&self, file: FileSummary, path: impl Into<PathBuf>) -> Arc<Transfer> {
        self.queue(file, path.into(), Direction::Download)
    }

    /// Queues an upload of the local file at `path` presented as `file`.
    pub fn queue_upload(&self, file: FileSummary, path: impl Into<PathBuf>) -> Arc<Transfer> {
        self.queue(file, path.into(), Direction::Upload)
    }

    fn queue(&self, file: FileSummary, path: PathBuf, direction: Direction) -> Arc<Transfer> {
        let transfer = Transfer::new(file, path, direction, self.config.chunk_size);
        info!(
            file = %transfer.file().name,
            direction = ?direction,
            "transfer queued"
        );
        self.queued
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::clone(&transfer));
        transfer
    }

    /// One maintenance pass: cancel stalled transfers, then promote queued
    /// ones into free per-direction slots.
    pub fn poll(&self) {
        self.sweep_stalls();
        self.promote();
    }

    fn sweep_stalls(&self) {
        let stalled: Vec<Arc<Transfer>> = {
            let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            active
                .iter()
                .filter(|transfer| transfer.timed_out(self.config.transfer_timeout))
                .cloned()
                .collect()
        };
        for transfer in stalled {
            warn!(file = %transfer.file().name, "transfer timed out");
            transfer.cancel();
        }
    }

    fn promote(&self) {
        let mut free_downloads = self.free_slots(Direction::Download);
        let mut free_uploads = self.free_slots(Direction::Upload);
        let picked: Vec<Arc<Transfer>> = {
            let mut queued = self.queued.lock().unwrap_or_else(|e| e.into_inner());
            let mut picked = Vec::new();
            let mut index = 0;
            while index < queued.len() {
                let slot = match queued[index].direction() {
                    Direction::Download => &mut free_downloads,
                    Direction::Upload => &mut free_uploads,
                };
                if queued[index].state() == TransferState::Created && *slot > 0 {
                    *slot -= 1;
                    picked.push(queued.remove(index));
                } else {
                    index += 1;
                }
            }
            picked
        };
        if picked.is_empty() {
            return;
        }

        // Starting allocates files and spawns threads; do it lock-free.
        let ctx = self.worker_context();
        for transfer in &picked {
            if let Err(err) = transfer.start(&ctx) {
                warn!(file = %transfer.file().name, %err, "transfer failed to start");
            }
        }
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(picked);
    }

    fn free_slots(&self, direction: Direction) -> usize {
        let max = match direction {
            Direction::Download => self.config.max_downloads,
            Direction::Upload => self.config.max_uploads,
        };
        let live = self
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|transfer| {
                transfer.direction() == direction && transfer.state().is_live()
            })
            .count();
        max.saturating_sub(live)
    }

    /// Restarts a stopped transfer over its existing ledger and partial.
    pub fn resume(&self, transfer: &Arc<Transfer>) -> Result<(), TransferError> {
        if !transfer.resumable() {
            return Err(TransferError::NotResumable(transfer.state()));
        }
        info!(file = %transfer.file().name, "transfer resuming");
        transfer.start(&self.worker_context())
    }

    /// Drops a settled transfer from the lists, honoring the
    /// delete-partials policy. False while it is still running.
    pub fn remove(&self, transfer: &Arc<Transfer>) -> bool {
        if !transfer.removeable() {
            return false;
        }
        let found = Self::take(&self.queued, transfer) || Self::take(&self.active, transfer);
        if found {
            transfer.join();
            self.discard_partial(transfer);
        }
        found
    }

    fn take(list: &Mutex<Vec<Arc<Transfer>>>, transfer: &Arc<Transfer>) -> bool {
        let mut list = list.lock().unwrap_or_else(|e| e.into_inner());
        match list.iter().position(|candidate| Arc::ptr_eq(candidate, transfer)) {
            Some(index) => {
                list.remove(index);
                true
            }
            None => false,
        }
    }

    /// Every queued or active transfer, for display.
    pub fn transfers(&self) -> Vec<Arc<Transfer>> {
        let mut all: Vec<Arc<Transfer>> = self
            .queued
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        all.extend(
            self.active
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .iter()
                .cloned(),
        );
        all
    }

    /// Stops every transfer, waits for workers, and applies the
    /// delete-partials policy to unfinished downloads.
    pub fn shutdown(&self) {
        self.queued
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        let active: Vec<Arc<Transfer>> = {
            let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            active.drain(..).collect()
        };
        for transfer in &active {
            transfer.stop();
        }
        for transfer in &active {
            transfer.join();
            self.discard_partial(transfer);
        }
    }

    fn discard_partial(&self, transfer: &Transfer) {
        if self.config.keep_partials
            || transfer.direction() != Direction::Download
            || transfer.state() == TransferState::Finished
            || !transfer.path().exists()
        {
            return;
        }
        match std::fs::remove_file(transfer.path()) {
            Ok(()) => debug!(path = %transfer.path().display(), "partial download deleted"),
            Err(err) => {
                warn!(path = %transfer.path().display(), %err, "failed to delete partial download")
            }
        }
    }
}

impl fmt::Debug for TransferEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferEngine")
            .field(
                "queued",
                &self.queued.lock().unwrap_or_else(|e| e.into_inner()).len(),
            )
            .field(
                "active",
                &self.active.lock().unwrap_or_else(|e| e.into_inner()).len(),
            )
            .finish()
    }
}

/// Serves one chunk of a shared file for an inbound download request.
pub(crate) fn serve_download(share: &ShareIndex, message: &Message) -> Result<Message, StatusCode> {
    let file_id = message.id.as_deref().ok_or(StatusCode::BadRequest)?;
    let chunk = message.chunk_payload().map_err(|_| StatusCode::BadRequest)?;
    let Some(entry) = share.lookup(file_id) else {
        debug!(file_id, "download request for unknown file");
        return Err(StatusCode::NotFound);
    };
    let in_range = chunk
        .offset
        .checked_add(chunk.size)
        .is_some_and(|end| end <= entry.size);
    if !in_range {
        return Err(StatusCode::BadRequest);
    }
    let data = io::read_at(&entry.path, chunk.offset, chunk.size).map_err(|err| {
        error!(file = %entry.name, %err, "failed to read shared file");
        StatusCode::InternalError
    })?;
    Ok(Message::download_response(chunk.offset, &data))
}

/// Writes one inbound upload chunk into its registered destination.
pub(crate) fn serve_upload(uploads: &UploadTargets, message: &Message) -> Result<Message, StatusCode> {
    let file_id = message.id.as_deref().ok_or(StatusCode::BadRequest)?;
    let chunk = message.chunk_payload().map_err(|_| StatusCode::BadRequest)?;
    let Some(path) = uploads.get(file_id) else {
        debug!(file_id, "upload request for unregistered file");
        return Err(StatusCode::NotFound);
    };
    let data = chunk.bytes().map_err(|_| StatusCode::BadRequest)?;
    if data.len() as u64 != chunk.size {
        return Err(StatusCode::BadRequest);
    }
    io::write_at(&path, chunk.offset, &data).map_err(|err| {
        error!(path = %path.display(), %err, "failed to write uploaded chunk");
        StatusCode::InternalError
    })?;
    Ok(Message::response(MessageKind::Upload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::Responder;
    use crate::commands::{dispatch, respond_handshake};
    use crate::share::file_id;
    use crate::transport::{TransportError, WireReply};
    use std::collections::HashMap as StdHashMap;
    use std::fs;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Condvar;
    use std::thread::ThreadId;

    /// Routes worker traffic into a responder fixture. Replies are held per
    /// thread so concurrent workers never cross streams. A hook can stop a
    /// transfer after a set number of chunk requests, and a gate can hold
    /// every receive until released.
    struct LoopTransport {
        responder: Arc<Responder>,
        replies: Mutex<StdHashMap<ThreadId, WireReply>>,
        chunk_requests: AtomicUsize,
        stop_after: Mutex<Option<(usize, Arc<Transfer>)>>,
        gate: (Mutex<bool>, Condvar),
    }

    impl LoopTransport {
        fn new(responder: Arc<Responder>) -> Self {
            Self {
                responder,
                replies: Mutex::new(StdHashMap::new()),
                chunk_requests: AtomicUsize::new(0),
                stop_after: Mutex::new(None),
                gate: (Mutex::new(false), Condvar::new()),
            }
        }

        fn stop_after(&self, count: usize, transfer: Arc<Transfer>) {
            *self.stop_after.lock().unwrap() = Some((count, transfer));
        }

        fn close_gate(&self) {
            *self.gate.0.lock().unwrap() = true;
        }

        fn open_gate(&self) {
            *self.gate.0.lock().unwrap() = false;
            self.gate.1.notify_all();
        }

        fn chunk_request_count(&self) -> usize {
            self.chunk_requests.load(Ordering::SeqCst)
        }
    }

    impl Transport for LoopTransport {
        fn send(&self, session_id: &str, body: &str) -> Result<(), TransportError> {
            let reply = if session_id.is_empty() {
                respond_handshake(&self.responder.ctx(), body)
            } else {
                let served = self.chunk_requests.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some((count, transfer)) = &*self.stop_after.lock().unwrap() {
                    if served == *count {
                        transfer.stop();
                    }
                }
                dispatch(&self.responder.ctx(), session_id, body)
            };
            self.replies
                .lock()
                .unwrap()
                .insert(thread::current().id(), reply);
            Ok(())
        }

        fn receive(&self, _session_id: &str) -> Result<WireReply, TransportError> {
            {
                let mut blocked = self.gate.0.lock().unwrap();
                while *blocked {
                    blocked = self.gate.1.wait(blocked).unwrap();
                }
            }
            self.replies
                .lock()
                .unwrap()
                .remove(&thread::current().id())
                .ok_or(TransportError::Closed)
        }
    }

    struct Rig {
        responder: Arc<Responder>,
        transport: Arc<LoopTransport>,
        engine: TransferEngine,
        dir: tempfile::TempDir,
    }

    fn rig(config: ClientConfig) -> Rig {
        let responder = Arc::new(Responder::new());
        let transport = Arc::new(LoopTransport::new(Arc::clone(&responder)));
        let engine = TransferEngine::new(
            Arc::clone(&transport) as Arc<dyn Transport>,
            Arc::new(RwLock::new(CipherChain::new())),
            Arc::new(EventBus::new()),
            config,
        );
        Rig {
            responder,
            transport,
            engine,
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn patterned(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    /// Shares a source file of `len` patterned bytes and returns its summary.
    fn shared_file(rig: &Rig, name: &str, len: usize) -> FileSummary {
        let source = rig.dir.path().join("shared");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join(name), patterned(len)).unwrap();
        rig.responder.share.share(&source);
        rig.responder.share.rescan();
        FileSummary {
            id: file_id(name, len as u64),
            name: name.to_string(),
            size: len as u64,
        }
    }

    fn small_config() -> ClientConfig {
        ClientConfig {
            chunk_size: 1 << 10,
            workers: 4,
            single_worker_threshold: 0,
            ..ClientConfig::default()
        }
    }

    #[test]
    fn test_download_moves_bytes_across_workers() {
        let rig = rig(small_config());
        let file = shared_file(&rig, "movie.bin", 10 << 10);
        let dest = rig.dir.path().join("movie.out");

        let transfer = rig.engine.queue_download(file, &dest);
        assert_eq!(transfer.state(), TransferState::Created);

        rig.engine.poll();
        transfer.join();

        assert_eq!(transfer.state(), TransferState::Finished);
        assert_eq!(transfer.status(), Status::Success);
        assert_eq!(fs::read(&dest).unwrap(), patterned(10 << 10));
        assert!(transfer.removeable());
        assert!(!transfer.resumable());
    }

    #[test]
    fn test_small_file_gets_one_worker() {
        let config = ClientConfig {
            chunk_size: 1 << 10,
            workers: 4,
            ..ClientConfig::default()
        };
        let rig = rig(config);
        let file = shared_file(&rig, "tiny.bin", 2 << 10);
        let dest = rig.dir.path().join("tiny.out");

        let transfer = rig.engine.queue_download(file, &dest);
        rig.engine.poll();
        transfer.join();

        assert_eq!(transfer.worker_statuses().len(), 1);
        assert_eq!(transfer.state(), TransferState::Finished);
    }

    #[test]
    fn test_upload_moves_bytes_into_registered_target() {
        let rig = rig(small_config());
        let source = rig.dir.path().join("out.bin");
        fs::write(&source, patterned(6 << 10)).unwrap();
        let dest = rig.dir.path().join("received.bin");
        io::allocate(&dest, 6 << 10).unwrap();
        rig.responder.uploads.register("up-1", &dest);

        let file = FileSummary {
            id: "up-1".into(),
            name: "out.bin".into(),
            size: 6 << 10,
        };
        let transfer = rig.engine.queue_upload(file, &source);
        rig.engine.poll();
        transfer.join();

        assert_eq!(transfer.state(), TransferState::Finished);
        assert_eq!(fs::read(&dest).unwrap(), patterned(6 << 10));
    }

    #[test]
    fn test_stop_then_resume_fetches_each_chunk_once() {
        let rig = rig(ClientConfig {
            chunk_size: 1 << 10,
            ..ClientConfig::default()
        });
        // Ten chunks, one worker (below the single-worker threshold).
        let file = shared_file(&rig, "song.bin", 10 << 10);
        let dest = rig.dir.path().join("song.out");

        let transfer = rig.engine.queue_download(file, &dest);
        rig.transport.stop_after(3, Arc::clone(&transfer));
        rig.engine.poll();
        transfer.join();

        assert_eq!(transfer.state(), TransferState::Stopped);
        assert_eq!(transfer.transferred(), 3 << 10);
        assert!(transfer.resumable());
        assert_eq!(rig.transport.chunk_request_count(), 3);

        rig.engine.resume(&transfer).unwrap();
        transfer.join();

        assert_eq!(transfer.state(), TransferState::Finished);
        assert_eq!(fs::read(&dest).unwrap(), patterned(10 << 10));
        // 10 chunks total: no claimed offset was fetched again.
        assert_eq!(rig.transport.chunk_request_count(), 10);
    }

    #[test]
    fn test_resume_refuses_a_finished_transfer() {
        let rig = rig(small_config());
        let file = shared_file(&rig, "done.bin", 2 << 10);
        let dest = rig.dir.path().join("done.out");

        let transfer = rig.engine.queue_download(file, &dest);
        rig.engine.poll();
        transfer.join();

        assert!(matches!(
            rig.engine.resume(&transfer),
            Err(TransferError::NotResumable(TransferState::Finished))
        ));
    }

    #[test]
    fn test_promotion_respects_per_direction_cap() {
        let config = ClientConfig {
            chunk_size: 1 << 10,
            max_downloads: 1,
            ..ClientConfig::default()
        };
        let rig = rig(config);
        let first = shared_file(&rig, "first.bin", 2 << 10);
        let second = shared_file(&rig, "second.bin", 2 << 10);

        rig.transport.close_gate();
        let t1 = rig.engine.queue_download(first, rig.dir.path().join("first.out"));
        let t2 = rig.engine.queue_download(second, rig.dir.path().join("second.out"));

        rig.engine.poll();
        assert!(t1.state().is_live());
        assert_eq!(t2.state(), TransferState::Created);

        // Still no free slot while the first is live.
        rig.engine.poll();
        assert_eq!(t2.state(), TransferState::Created);

        rig.transport.open_gate();
        t1.join();
        assert_eq!(t1.state(), TransferState::Finished);

        rig.engine.poll();
        t2.join();
        assert_eq!(t2.state(), TransferState::Finished);
    }

    #[test]
    fn test_stalled_transfer_is_cancelled() {
        let config = ClientConfig {
            chunk_size: 1 << 10,
            transfer_timeout: Duration::from_millis(40),
            ..ClientConfig::default()
        };
        let rig = rig(config);
        let file = shared_file(&rig, "stall.bin", 2 << 10);
        let dest = rig.dir.path().join("stall.out");

        rig.transport.close_gate();
        let transfer = rig.engine.queue_download(file, &dest);
        rig.engine.poll();
        assert!(transfer.state().is_live());

        thread::sleep(Duration::from_millis(80));
        rig.engine.poll();
        assert_eq!(transfer.state(), TransferState::Cancelled);

        rig.transport.open_gate();
        transfer.join();
        assert_eq!(transfer.state(), TransferState::Cancelled);
        assert_eq!(transfer.status(), Status::Cancelled);
        assert!(!transfer.resumable());
    }

    #[test]
    fn test_remove_deletes_partial_when_policy_says_so() {
        let config = ClientConfig {
            chunk_size: 1 << 10,
            keep_partials: false,
            ..ClientConfig::default()
        };
        let rig = rig(config);
        let file = shared_file(&rig, "partial.bin", 10 << 10);
        let dest = rig.dir.path().join("partial.out");

        let transfer = rig.engine.queue_download(file, &dest);
        rig.transport.stop_after(2, Arc::clone(&transfer));
        rig.engine.poll();
        transfer.join();

        assert_eq!(transfer.state(), TransferState::Stopped);
        assert!(dest.exists());

        assert!(rig.engine.remove(&transfer));
        assert!(!dest.exists(), "partial download is deleted on removal");
        assert!(rig.engine.transfers().is_empty());
    }

    #[test]
    fn test_remove_keeps_partial_by_default() {
        let rig = rig(ClientConfig {
            chunk_size: 1 << 10,
            ..ClientConfig::default()
        });
        let file = shared_file(&rig, "keep.bin", 10 << 10);
        let dest = rig.dir.path().join("keep.out");

        let transfer = rig.engine.queue_download(file, &dest);
        rig.transport.stop_after(2, Arc::clone(&transfer));
        rig.engine.poll();
        transfer.join();

        assert!(rig.engine.remove(&transfer));
        assert!(dest.exists());
    }

    #[test]
    fn test_shutdown_applies_partial_policy() {
        let config = ClientConfig {
            chunk_size: 1 << 10,
            keep_partials: false,
            ..ClientConfig::default()
        };
        let rig = rig(config);
        let file = shared_file(&rig, "cut.bin", 10 << 10);
        let dest = rig.dir.path().join("cut.out");

        let transfer = rig.engine.queue_download(file, &dest);
        rig.transport.stop_after(2, Arc::clone(&transfer));
        rig.engine.poll();
        transfer.join();
        assert!(dest.exists());

        rig.engine.shutdown();
        assert!(!dest.exists());
    }

    #[test]
    fn test_worker_failure_releases_chunk_and_leaves_siblings() {
        // Unknown file id: every chunk request answers not-found, so the
        // worker degrades to a warning and the chunk is released.
        let rig = rig(ClientConfig {
            chunk_size: 1 << 10,
            ..ClientConfig::default()
        });
        let file = FileSummary {
            id: "no-such-file".into(),
            name: "ghost.bin".into(),
            size: 4 << 10,
        };
        let dest = rig.dir.path().join("ghost.out");

        let transfer = rig.engine.queue_download(file, &dest);
        rig.engine.poll();
        transfer.join();

        assert_eq!(transfer.state(), TransferState::Stopped);
        assert_eq!(transfer.status(), Status::Warning);
        assert_eq!(transfer.transferred(), 0);
        // The failed offset was released for a later resume.
        assert!(transfer.ledger().claimed().is_empty());
    }

    #[test]
    fn test_serve_download_status_codes() {
        let responder = Responder::new();
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("tune.mp3"), b"0123456789").unwrap();
        responder.share.share(dir.path());
        responder.share.rescan();
        let id = file_id("tune.mp3", 10);

        let ok =
            serve_download(&responder.share, &Message::download_request(id.as_str(), 2, 4))
                .unwrap();
        assert_eq!(ok.chunk_payload().unwrap().bytes().unwrap(), b"2345");

        let missing = serve_download(
            &responder.share,
            &Message::download_request("absent", 0, 4),
        );
        assert_eq!(missing.unwrap_err(), StatusCode::NotFound);

        let out_of_range =
            serve_download(&responder.share, &Message::download_request(id.as_str(), 8, 4));
        assert_eq!(out_of_range.unwrap_err(), StatusCode::BadRequest);
    }

    #[test]
    fn test_serve_upload_status_codes() {
        let uploads = UploadTargets::new();
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("in.bin");
        io::allocate(&dest, 8).unwrap();
        uploads.register("up-9", &dest);

        let ok = serve_upload(&uploads, &Message::upload_request("up-9", 0, b"abcd"));
        assert!(ok.is_ok());
        assert_eq!(fs::read(&dest).unwrap()[..4], *b"abcd");

        let unregistered = serve_upload(&uploads, &Message::upload_request("nope", 0, b"abcd"));
        assert_eq!(unregistered.unwrap_err(), StatusCode::NotFound);

        let no_data = serve_upload(
            &uploads,
            &Message {
                id: Some("up-9".into()),
                chunk: Some(crate::protocol::ChunkPayload::request(0, 4)),
                ..Message::response(MessageKind::Upload)
            },
        );
        assert_eq!(no_data.unwrap_err(), StatusCode::BadRequest);
    }
}
