//! Client configuration and protocol limits.
//!
//! Every validation boundary (id/name/text/keyword lengths, chunk sizes,
//! worker counts, timeouts, result caps) lives here as a configuration
//! value with a documented default; protocol logic never hardcodes them.

use std::time::Duration;

use crate::security::CipherKind;

/// Smallest allowed chunk size (1 KiB).
pub const MIN_CHUNK_SIZE: u64 = 1 << 10;

/// Default chunk size (768 KiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 768 << 10;

/// Largest allowed chunk size (32 MiB).
pub const MAX_CHUNK_SIZE: u64 = 32 << 20;

/// Default number of worker threads per transfer.
pub const DEFAULT_WORKERS: usize = 4;

/// Most worker threads one transfer may use.
pub const MAX_WORKERS: usize = 8;

/// Files smaller than this are moved by a single worker (4 MiB); the
/// per-chunk coordination overhead dominates below it.
pub const SINGLE_WORKER_THRESHOLD: u64 = 4 << 20;

/// Default cap on concurrently active transfers per direction.
pub const DEFAULT_MAX_ACTIVE: usize = 4;

/// Hard cap on concurrently active transfers per direction.
pub const MAX_ACTIVE: usize = 16;

/// Shortest allowed no-progress timeout for a transfer.
pub const MIN_TRANSFER_TIMEOUT: Duration = Duration::from_secs(15);

/// Default no-progress timeout for a transfer.
pub const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_secs(60);

/// Longest allowed no-progress timeout for a transfer.
pub const MAX_TRANSFER_TIMEOUT: Duration = Duration::from_secs(600);

/// Default cap on results returned for one search.
pub const DEFAULT_MAX_SEARCH_RESULTS: usize = 128;

/// Hard cap on results returned for one search.
pub const MAX_SEARCH_RESULTS: usize = 1 << 10;

/// Interval between maintenance ticks (queued-transfer promotion, stall
/// sweep, share rescans).
pub const MAINTENANCE_TICK: Duration = Duration::from_millis(500);

/// Field-length boundaries enforced by message validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Longest accepted id (session, client, file, folder).
    pub max_id: usize,
    /// Longest accepted display name.
    pub max_name: usize,
    /// Longest accepted chat text.
    pub max_text: usize,
    /// Shortest accepted search keyword.
    pub min_keyword: usize,
    /// Longest accepted search keyword.
    pub max_keyword: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_id: 64,
            max_name: 32,
            max_text: 1 << 10,
            min_keyword: 3,
            max_keyword: 64,
        }
    }
}

/// Tunables for one client instance.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Display name announced to peers.
    pub name: String,
    /// Cipher offered when opening sessions.
    pub cipher: CipherKind,
    /// Chunk size used by the transfer engine, in bytes.
    pub chunk_size: u64,
    /// Worker threads per transfer.
    pub workers: usize,
    /// Concurrently active downloads.
    pub max_downloads: usize,
    /// Concurrently active uploads.
    pub max_uploads: usize,
    /// A transfer with no progress for this long is considered stalled.
    pub transfer_timeout: Duration,
    /// Most results returned for one inbound search.
    pub max_search_results: usize,
    /// Keep partial download files when a transfer is removed or the
    /// client shuts down. When false, unfinished downloads are deleted.
    pub keep_partials: bool,
    /// Files below this size use one worker regardless of `workers`.
    pub single_worker_threshold: u64,
    /// Validation boundaries for inbound and outbound messages.
    pub limits: Limits,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: String::from("(client)"),
            cipher: CipherKind::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            workers: DEFAULT_WORKERS,
            max_downloads: DEFAULT_MAX_ACTIVE,
            max_uploads: DEFAULT_MAX_ACTIVE,
            transfer_timeout: DEFAULT_TRANSFER_TIMEOUT,
            max_search_results: DEFAULT_MAX_SEARCH_RESULTS,
            keep_partials: true,
            single_worker_threshold: SINGLE_WORKER_THRESHOLD,
            limits: Limits::default(),
        }
    }
}

impl ClientConfig {
    /// Returns the configuration with every tunable clamped into its
    /// documented bounds.
    pub fn clamped(mut self) -> Self {
        self.chunk_size = self.chunk_size.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE);
        self.workers = self.workers.clamp(1, MAX_WORKERS);
        self.max_downloads = self.max_downloads.clamp(1, MAX_ACTIVE);
        self.max_uploads = self.max_uploads.clamp(1, MAX_ACTIVE);
        self.transfer_timeout = self
            .transfer_timeout
            .clamp(MIN_TRANSFER_TIMEOUT, MAX_TRANSFER_TIMEOUT);
        self.max_search_results = self.max_search_results.clamp(1, MAX_SEARCH_RESULTS);
        self
    }

    /// Worker count for one transfer, honoring the single-worker rule for
    /// small files.
    pub fn effective_workers(&self, file_size: u64) -> usize {
        if file_size < self.single_worker_threshold {
            1
        } else {
            self.workers.max(1)
        }
    }
}
