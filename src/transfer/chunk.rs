//! Chunk ledger: the shared bookkeeping workers partition a file through.
//!
//! Claiming is check-and-insert under a single lock acquisition, so no two
//! workers ever own the same offset no matter how their schedules
//! interleave. The cursor is a low-water mark: the lowest aligned offset
//! not yet claimed. Releasing a failed chunk lowers it, which is how a
//! sibling worker or a later resume finds the hole again.

use std::collections::BTreeSet;
use std::sync::Mutex;

struct Progress {
    claimed: BTreeSet<u64>,
    cursor: u64,
    transferred: u64,
}

/// Claim set, cursor, and byte counter for one transfer.
pub struct ChunkLedger {
    file_size: u64,
    chunk_size: u64,
    progress: Mutex<Progress>,
}

impl ChunkLedger {
    pub fn new(file_size: u64, chunk_size: u64) -> Self {
        Self {
            file_size,
            chunk_size: chunk_size.max(1),
            progress: Mutex::new(Progress {
                claimed: BTreeSet::new(),
                cursor: 0,
                transferred: 0,
            }),
        }
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Bytes a chunk starting at `offset` covers; short at the tail.
    pub fn chunk_len(&self, offset: u64) -> u64 {
        self.chunk_size.min(self.file_size.saturating_sub(offset))
    }

    /// Marks `offset` claimed. Returns false when it already was.
    pub fn claim(&self, offset: u64) -> bool {
        let mut progress = self.lock();
        if offset >= self.file_size || !progress.claimed.insert(offset) {
            return false;
        }
        self.advance_cursor(&mut progress);
        true
    }

    /// Claims and returns the next unclaimed aligned offset.
    ///
    /// With `last` set, the scan starts strictly after it (never below the
    /// cursor); with `None` it starts at the cursor, which is how released
    /// offsets behind the pack get picked up. Returns `None` when every
    /// offset from the scan point to the end of the file is claimed.
    pub fn next_chunk(&self, last: Option<u64>) -> Option<u64> {
        let mut progress = self.lock();
        let mut offset = match last {
            Some(last) => (last + self.chunk_size).max(progress.cursor),
            None => progress.cursor,
        };
        while offset < self.file_size {
            if progress.claimed.insert(offset) {
                self.advance_cursor(&mut progress);
                return Some(offset);
            }
            offset += self.chunk_size;
        }
        None
    }

    /// Un-claims a failed offset so another worker or a resume can redo it.
    pub fn release(&self, offset: u64) {
        let mut progress = self.lock();
        if progress.claimed.remove(&offset) {
            progress.cursor = progress.cursor.min(offset);
        }
    }

    /// Credits `len` completed bytes.
    pub fn complete(&self, len: u64) {
        self.lock().transferred += len;
    }

    pub fn transferred(&self) -> u64 {
        self.lock().transferred
    }

    pub fn is_done(&self) -> bool {
        self.lock().transferred >= self.file_size
    }

    /// Snapshot of the claimed offsets, in order.
    pub fn claimed(&self) -> Vec<u64> {
        self.lock().claimed.iter().copied().collect()
    }

    fn advance_cursor(&self, progress: &mut Progress) {
        while progress.claimed.contains(&progress.cursor) {
            progress.cursor += self.chunk_size;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for ChunkLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let progress = self.lock();
        f.debug_struct("ChunkLedger")
            .field("file_size", &self.file_size)
            .field("chunk_size", &self.chunk_size)
            .field("claimed", &progress.claimed.len())
            .field("transferred", &progress.transferred)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_sequential_claims_cover_the_file() {
        let ledger = ChunkLedger::new(10, 4);

        assert_eq!(ledger.next_chunk(None), Some(0));
        assert_eq!(ledger.next_chunk(Some(0)), Some(4));
        assert_eq!(ledger.next_chunk(Some(4)), Some(8));
        assert_eq!(ledger.next_chunk(Some(8)), None);

        assert_eq!(ledger.chunk_len(0), 4);
        assert_eq!(ledger.chunk_len(8), 2);
        assert_eq!(ledger.claimed(), vec![0, 4, 8]);
    }

    #[test]
    fn test_claim_is_idempotent() {
        let ledger = ChunkLedger::new(16, 4);
        assert!(ledger.claim(4));
        assert!(!ledger.claim(4));
        assert!(!ledger.claim(100), "claims past the end are rejected");
    }

    #[test]
    fn test_release_lowers_the_cursor() {
        let ledger = ChunkLedger::new(16, 4);
        while ledger.next_chunk(None).is_some() {}

        ledger.release(4);
        // Strictly-after scanning does not look back.
        assert_eq!(ledger.next_chunk(Some(8)), None);
        // A cursor scan finds the hole.
        assert_eq!(ledger.next_chunk(None), Some(4));
        assert_eq!(ledger.next_chunk(None), None);
    }

    #[test]
    fn test_done_tracks_transferred_bytes() {
        let ledger = ChunkLedger::new(10, 4);
        assert!(!ledger.is_done());

        ledger.complete(4);
        ledger.complete(4);
        assert!(!ledger.is_done());
        ledger.complete(2);
        assert!(ledger.is_done());
        assert_eq!(ledger.transferred(), 10);
    }

    #[test]
    fn test_empty_file_has_no_chunks_and_is_done() {
        let ledger = ChunkLedger::new(0, 4);
        assert_eq!(ledger.next_chunk(None), None);
        assert!(ledger.is_done());
    }

    #[test]
    fn test_concurrent_partition_is_exact() {
        // 64 chunks of 4 bytes, last one short.
        let file_size = 253u64;
        let chunk_size = 4u64;
        let expected: Vec<u64> = (0..file_size).step_by(chunk_size as usize).collect();

        for workers in [1usize, 2, 8] {
            let ledger = Arc::new(ChunkLedger::new(file_size, chunk_size));
            let mut handles = Vec::new();
            for _ in 0..workers {
                let ledger = Arc::clone(&ledger);
                handles.push(thread::spawn(move || {
                    let mut mine = Vec::new();
                    let mut last = None;
                    loop {
                        let offset = match ledger.next_chunk(last) {
                            Some(offset) => offset,
                            None => match ledger.next_chunk(None) {
                                Some(offset) => offset,
                                None => break,
                            },
                        };
                        mine.push(offset);
                        last = Some(offset);
                    }
                    mine
                }));
            }

            let mut all: Vec<u64> = handles
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect();
            let total = all.len();
            all.sort_unstable();
            all.dedup();

            assert_eq!(total, all.len(), "no offset was claimed twice");
            assert_eq!(all, expected, "claims cover the file exactly");
        }
    }
}
