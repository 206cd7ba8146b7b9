//! Client facade: one peer instance with every subsystem wired together.
//!
//! A [`Client`] owns the cipher chain, the share index, the peer roster,
//! the session map, the event bus, and the transfer engine, and exposes the
//! command surface (handshake, join, browse, search, chat, transfers) over
//! one injected [`Transport`]. A dedicated maintenance thread consumes
//! posted tasks and ticks the transfer engine, so directory scanning and
//! transfer promotion never block the command path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};

use tracing::{debug, info};

use crate::commands::{self, BrowseListing, Command, CommandContext, CommandError, ResponderContext};
use crate::config::{ClientConfig, MAINTENANCE_TICK};
use crate::entity::{Endpoint, Entity};
use crate::events::{Event, EventBus};
use crate::protocol::{ClientSummary, Envelope, FileSummary, InfoPayload, Message, MessageKind};
use crate::security::{CipherChain, MaterialSource, SecurityGroup};
use crate::session::{self, Session, SessionMap};
use crate::share::{FileFilter, ShareIndex};
use crate::transfer::{Transfer, TransferEngine, TransferError, UploadTargets};
use crate::transport::{Transport, WireReply};

/// Peers visible on the overlay, keyed by id.
///
/// Entries are created or refreshed from the messages peers send; the local
/// mute flag survives refreshes.
#[derive(Debug, Default)]
pub struct Roster {
    peers: RwLock<HashMap<String, Arc<Entity>>>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a peer or refreshes its display name, preserving the mute flag.
    pub fn upsert(&self, id: &str, name: &str) -> Arc<Entity> {
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entity) = peers.get(id) {
            if let Some(endpoint) = entity.endpoint() {
                endpoint.set_name(name);
            }
            return Arc::clone(entity);
        }
        let entity = Entity::new();
        entity.add_endpoint(Arc::new(Endpoint::new(id, name)));
        peers.insert(id.to_string(), Arc::clone(&entity));
        entity
    }

    pub fn remove(&self, id: &str) -> bool {
        self.peers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
            .is_some()
    }

    pub fn get(&self, id: &str) -> Option<Arc<Entity>> {
        self.peers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.peers.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every peer as announced, sorted by display name.
    pub fn list(&self) -> Vec<ClientSummary> {
        let mut listed: Vec<ClientSummary> = {
            let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
            peers
                .values()
                .filter_map(|entity| entity.endpoint())
                .map(|endpoint| ClientSummary {
                    id: endpoint.id().to_string(),
                    name: endpoint.name(),
                })
                .collect()
        };
        listed.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        listed
    }

    /// Flips a peer's mute flag. False when the peer is unknown.
    pub fn set_muted(&self, id: &str, muted: bool) -> bool {
        match self.get(id).and_then(|entity| entity.endpoint()) {
            Some(endpoint) => {
                endpoint.set_muted(muted);
                true
            }
            None => false,
        }
    }
}

/// Work posted to the maintenance thread.
enum MaintenanceTask {
    Rescan,
    SweepTransfers,
    Shutdown,
}

/// One peer instance.
pub struct Client {
    id: String,
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    chain: Arc<RwLock<CipherChain>>,
    share: Arc<ShareIndex>,
    roster: Arc<Roster>,
    sessions: Arc<SessionMap>,
    bus: Arc<EventBus>,
    engine: Arc<TransferEngine>,
    uploads: Arc<UploadTargets>,
    session: RwLock<Option<Arc<Session>>>,
    maintenance: Sender<MaintenanceTask>,
    maintenance_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    /// Builds a client over `transport` with its tunables clamped.
    pub fn new(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        let config = config.clamped();
        let chain = Arc::new(RwLock::new(CipherChain::new()));
        let share = Arc::new(ShareIndex::new());
        let bus = Arc::new(EventBus::new());
        let engine = Arc::new(TransferEngine::new(
            Arc::clone(&transport),
            Arc::clone(&chain),
            Arc::clone(&bus),
            config.clone(),
        ));

        let (maintenance, tasks) = mpsc::channel();
        let maintenance_thread = {
            let share = Arc::clone(&share);
            let engine = Arc::clone(&engine);
            thread::spawn(move || maintenance_loop(tasks, share, engine))
        };

        let id = session::random_id();
        info!(id, name = %config.name, "client created");
        Self {
            id,
            config,
            transport,
            chain,
            share,
            roster: Arc::new(Roster::new()),
            sessions: Arc::new(SessionMap::new()),
            bus,
            engine,
            uploads: Arc::new(UploadTargets::new()),
            session: RwLock::new(None),
            maintenance,
            maintenance_thread: Mutex::new(Some(maintenance_thread)),
        }
    }

    /// This client's own id, as announced in join and chat messages.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The local share index, for listing what this client offers.
    pub fn shares(&self) -> &ShareIndex {
        &self.share
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    /// Id of the control session, once the handshake has run.
    pub fn session_id(&self) -> Option<String> {
        self.session
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|session| session.id().to_string())
    }

    // Security -------------------------------------------------------------

    /// Appends a security hop at the end of the chain. Takes effect on the
    /// next [`refresh_security`](Self::refresh_security).
    pub fn add_group(&self, group: SecurityGroup) {
        self.chain
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(group);
    }

    /// Removes the security hop at `index`.
    pub fn remove_group(&self, index: usize) -> Option<SecurityGroup> {
        self.chain
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(index)
    }

    /// Re-derives dirty hops from their key material and returns the new
    /// group id. Key loading runs on a working copy, so exchanges keep
    /// flowing under the old chain until the swap.
    pub fn refresh_security(&self, source: &dyn MaterialSource) -> Option<String> {
        let mut working = self
            .chain
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let group_id = working.refresh(source);
        *self.chain.write().unwrap_or_else(|e| e.into_inner()) = working;
        group_id
    }

    /// The chain fingerprint announced to peers, if any hop is keyed.
    pub fn group_id(&self) -> Option<String> {
        self.chain
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .group_id()
            .map(str::to_string)
    }

    // Commands --------------------------------------------------------------

    /// Opens the control session used by every subsequent command.
    pub fn handshake(&self) -> Result<(), CommandError> {
        let ctx = CommandContext {
            transport: self.transport.as_ref(),
            chain: &self.chain,
            session: None,
            limits: &self.config.limits,
        };
        let session = commands::handshake(&ctx, self.config.cipher)?;
        info!(session = session.id(), "control session established");
        *self.session.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(session));
        Ok(())
    }

    /// Announces this client to the group.
    pub fn join(&self) -> Result<(), CommandError> {
        self.exchange(Message::join_request(self.id.as_str(), self.config.name.as_str()))?;
        Ok(())
    }

    /// Leaves the group and drops the control session.
    pub fn quit(&self) -> Result<(), CommandError> {
        self.exchange(Message::quit_request(self.id.as_str()))?;
        *self.session.write().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }

    pub fn ping(&self) -> Result<(), CommandError> {
        self.exchange(Message::ping_request())?;
        Ok(())
    }

    /// Peer/session/file counters from the remote side.
    pub fn info(&self) -> Result<InfoPayload, CommandError> {
        let envelope = self.exchange(Message::info_request())?;
        Ok(*envelope.data.info_payload()?)
    }

    /// The remote side's roster.
    pub fn group(&self) -> Result<Vec<ClientSummary>, CommandError> {
        let envelope = self.exchange(Message::group_request())?;
        Ok(envelope.data.group_payload()?.clients.clone())
    }

    /// Lists a remote folder (or the shared roots) and publishes the
    /// listing on the bus.
    pub fn browse(&self, folder: Option<String>) -> Result<BrowseListing, CommandError> {
        let session = self.control_session()?;
        let ctx = self.command_ctx(&session);
        let listing = commands::browse(&ctx, folder)?;
        self.bus.publish(&Event::Browse {
            listing: listing.clone(),
        });
        Ok(listing)
    }

    /// Searches remote shares and publishes the hits on the bus.
    pub fn search(
        &self,
        keyword: &str,
        filter: FileFilter,
    ) -> Result<Vec<FileSummary>, CommandError> {
        let session = self.control_session()?;
        let ctx = self.command_ctx(&session);
        let files = commands::search(&ctx, keyword, filter)?;
        self.bus.publish(&Event::Search {
            files: files.clone(),
        });
        Ok(files)
    }

    /// Says `text` to the whole group.
    pub fn chat(&self, text: &str) -> Result<(), CommandError> {
        let session = self.control_session()?;
        let ctx = self.command_ctx(&session);
        commands::chat_group(&ctx, &self.id, &self.config.name, text)
    }

    /// Says `text` to one peer.
    pub fn chat_direct(&self, peer_id: &str, text: &str) -> Result<(), CommandError> {
        let session = self.control_session()?;
        let ctx = self.command_ctx(&session);
        commands::chat_direct(&ctx, &self.id, &self.config.name, peer_id, text)
    }

    fn exchange(&self, request: Message) -> Result<Envelope, CommandError> {
        let session = self.control_session()?;
        let ctx = self.command_ctx(&session);
        let mut command = Command::new();
        command.exchange(&ctx, request)
    }

    fn control_session(&self) -> Result<Arc<Session>, CommandError> {
        self.session
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(CommandError::NoSession)
    }

    fn command_ctx<'a>(&'a self, session: &'a Session) -> CommandContext<'a> {
        CommandContext {
            transport: self.transport.as_ref(),
            chain: &self.chain,
            session: Some(session),
            limits: &self.config.limits,
        }
    }

    // Transfers --------------------------------------------------------------

    /// Queues a download of `file` into `dest`; the maintenance thread
    /// starts it as soon as a slot frees up.
    pub fn download(&self, file: FileSummary, dest: impl Into<PathBuf>) -> Arc<Transfer> {
        let transfer = self.engine.queue_download(file, dest.into());
        let _ = self.maintenance.send(MaintenanceTask::SweepTransfers);
        transfer
    }

    /// Queues an upload of the local file at `source`, presented as `file`.
    pub fn upload(&self, file: FileSummary, source: impl Into<PathBuf>) -> Arc<Transfer> {
        let transfer = self.engine.queue_upload(file, source.into());
        let _ = self.maintenance.send(MaintenanceTask::SweepTransfers);
        transfer
    }

    /// Agrees to receive an upload: allocates `dest` at the announced size
    /// and routes inbound chunks for `file` into it.
    pub fn accept_upload(&self, file: &FileSummary, dest: impl Into<PathBuf>) -> std::io::Result<()> {
        let dest = dest.into();
        crate::transfer::io::allocate(&dest, file.size)?;
        self.uploads.register(file.id.as_str(), dest);
        Ok(())
    }

    /// Restarts a stopped transfer over its existing ledger and partial.
    pub fn resume(&self, transfer: &Arc<Transfer>) -> Result<(), TransferError> {
        self.engine.resume(transfer)
    }

    /// Drops a settled transfer, honoring the delete-partials policy.
    pub fn remove_transfer(&self, transfer: &Arc<Transfer>) -> bool {
        self.engine.remove(transfer)
    }

    /// Every queued or active transfer.
    pub fn transfers(&self) -> Vec<Arc<Transfer>> {
        self.engine.transfers()
    }

    // Shares -----------------------------------------------------------------

    /// Adds a shared root and schedules a rescan.
    pub fn share_folder(&self, path: impl Into<PathBuf>) {
        self.share.share(path);
        let _ = self.maintenance.send(MaintenanceTask::Rescan);
    }

    /// Drops a shared root and schedules a rescan.
    pub fn unshare_folder(&self, path: &Path) -> bool {
        let removed = self.share.unshare(path);
        if removed {
            let _ = self.maintenance.send(MaintenanceTask::Rescan);
        }
        removed
    }

    /// Schedules a share rescan off the caller's thread.
    pub fn rescan(&self) {
        let _ = self.maintenance.send(MaintenanceTask::Rescan);
    }

    // Inbound ----------------------------------------------------------------

    /// Answers one inbound request body addressed to an established
    /// session. This is the entry point a transport integration calls.
    pub fn respond(&self, session_id: &str, body: &str) -> WireReply {
        commands::dispatch(&self.responder_ctx(), session_id, body)
    }

    /// Answers an inbound pre-session handshake body.
    pub fn respond_handshake(&self, body: &str) -> WireReply {
        commands::respond_handshake(&self.responder_ctx(), body)
    }

    fn responder_ctx(&self) -> ResponderContext<'_> {
        ResponderContext {
            config: &self.config,
            chain: &self.chain,
            sessions: &self.sessions,
            share: &self.share,
            roster: &self.roster,
            bus: &self.bus,
            uploads: &self.uploads,
        }
    }

    // Events and peers -------------------------------------------------------

    /// Registers a handler for one event kind.
    pub fn subscribe<F>(&self, kind: MessageKind, handler: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.bus.subscribe(kind, handler);
    }

    /// Silences a peer: its chats are acknowledged but never published.
    pub fn mute(&self, peer_id: &str) -> bool {
        debug!(peer_id, "peer muted");
        self.roster.set_muted(peer_id, true)
    }

    pub fn unmute(&self, peer_id: &str) -> bool {
        self.roster.set_muted(peer_id, false)
    }

    // Lifecycle --------------------------------------------------------------

    /// Leaves the group, stops transfers under the partials policy, and
    /// joins the maintenance thread. Safe to call more than once.
    pub fn shutdown(&self) {
        let _ = self.quit();
        self.engine.shutdown();
        let _ = self.maintenance.send(MaintenanceTask::Shutdown);
        if let Some(handle) = self
            .maintenance_thread
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            let _ = handle.join();
        }
        info!(id = %self.id, "client shut down");
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("name", &self.config.name)
            .field("session", &self.session_id())
            .finish()
    }
}

fn maintenance_loop(
    tasks: Receiver<MaintenanceTask>,
    share: Arc<ShareIndex>,
    engine: Arc<TransferEngine>,
) {
    loop {
        match tasks.recv_timeout(MAINTENANCE_TICK) {
            Ok(MaintenanceTask::Rescan) => share.rescan(),
            Ok(MaintenanceTask::SweepTransfers) => engine.poll(),
            Ok(MaintenanceTask::Shutdown) => break,
            Err(RecvTimeoutError::Timeout) => engine.poll(),
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("maintenance thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportError;
    use std::time::{Duration, Instant};

    /// A transport going nowhere; commands fail, construction works.
    struct NullTransport;

    impl Transport for NullTransport {
        fn send(&self, _session_id: &str, _body: &str) -> Result<(), TransportError> {
            Ok(())
        }

        fn receive(&self, _session_id: &str) -> Result<WireReply, TransportError> {
            Err(TransportError::Closed)
        }
    }

    fn client() -> Client {
        Client::new(ClientConfig::default(), Arc::new(NullTransport))
    }

    #[test]
    fn test_roster_upsert_preserves_mute() {
        let roster = Roster::new();
        roster.upsert("peer-1", "alice");
        assert!(roster.set_muted("peer-1", true));

        let refreshed = roster.upsert("peer-1", "alice-renamed");
        let endpoint = refreshed.endpoint().unwrap();
        assert_eq!(endpoint.name(), "alice-renamed");
        assert!(endpoint.muted(), "mute flag survives a refresh");
        assert_eq!(roster.len(), 1);
    }

    #[test]
    fn test_roster_list_is_sorted_by_name() {
        let roster = Roster::new();
        roster.upsert("peer-2", "zoe");
        roster.upsert("peer-1", "alice");
        roster.upsert("peer-3", "bob");

        let names: Vec<String> = roster.list().into_iter().map(|c| c.name).collect();
        assert_eq!(names, ["alice", "bob", "zoe"]);
    }

    #[test]
    fn test_roster_remove_and_unknown_mute() {
        let roster = Roster::new();
        roster.upsert("peer-1", "alice");

        assert!(roster.remove("peer-1"));
        assert!(!roster.remove("peer-1"));
        assert!(!roster.set_muted("peer-1", true));
        assert!(roster.is_empty());
    }

    #[test]
    fn test_commands_without_session_fail_fast() {
        let client = client();
        assert!(matches!(client.ping(), Err(CommandError::NoSession)));
        assert!(matches!(
            client.browse(None),
            Err(CommandError::NoSession)
        ));
        assert!(matches!(
            client.chat("hello"),
            Err(CommandError::NoSession)
        ));
        client.shutdown();
    }

    #[test]
    fn test_shutdown_is_idempotent_and_joins_maintenance() {
        let client = client();
        client.shutdown();
        client.shutdown();
        assert!(client
            .maintenance_thread
            .lock()
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_share_folder_rescans_off_thread() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("track.mp3"), b"bytes").unwrap();

        let client = client();
        client.share_folder(dir.path());

        let deadline = Instant::now() + Duration::from_secs(2);
        while client.shares().file_count() == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(client.shares().file_count(), 1);
        client.shutdown();
    }
}
