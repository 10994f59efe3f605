//! Live keylog index
//!
//! A [`KeylogIndex`] owns one key's [`IndexRecord`] behind a reader/writer
//! lock. Mutations take the write lock, reads take the read lock, and no lock
//! is held across a callback or backend call. Every successful mutation bumps
//! a version number; [`KeylogIndex::flush`] records which version reached the
//! backend so the handle cache can tell clean indexes from dirty ones.

use crate::backend::Backend;
use crate::types::IndexRecord;
use keylogdb_common::{display_key, EntryId, Error, Result};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

struct IndexState {
    record: IndexRecord,
    version: u64,
}

/// Concurrency-safe in-memory index of one key's chain
pub struct KeylogIndex {
    key: Vec<u8>,
    state: RwLock<IndexState>,
    /// Version last written to the backend
    flushed: AtomicU64,
    /// Serializes flushes so an older snapshot never overwrites a newer one
    flush_lock: Mutex<()>,
    backend: Arc<dyn Backend>,
}

impl KeylogIndex {
    /// New empty index. It starts dirty so the first flush persists it.
    pub(crate) fn new(key: &[u8], backend: Arc<dyn Backend>) -> Self {
        Self::with_state(IndexRecord::new(key), 1, backend)
    }

    /// Index for a record just read from the backend (clean)
    pub(crate) fn from_record(record: IndexRecord, backend: Arc<dyn Backend>) -> Self {
        Self::with_state(record, 0, backend)
    }

    /// Decode a persisted record stored under `key`
    pub(crate) fn decode(key: &[u8], bytes: &[u8], backend: Arc<dyn Backend>) -> Result<Self> {
        let record = IndexRecord::decode(bytes)?;
        if record.key != key {
            return Err(Error::corrupt(format!(
                "index record stored under '{}' belongs to '{}'",
                display_key(key),
                display_key(&record.key)
            )));
        }
        Ok(Self::from_record(record, backend))
    }

    fn with_state(record: IndexRecord, version: u64, backend: Arc<dyn Backend>) -> Self {
        Self {
            key: record.key.clone(),
            state: RwLock::new(IndexState { record, version }),
            flushed: AtomicU64::new(0),
            flush_lock: Mutex::new(()),
            backend,
        }
    }

    /// Key of the index
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Current marker value
    pub fn marker(&self) -> Vec<u8> {
        self.state.read().record.marker.clone()
    }

    /// Set the marker. Returns true if the value changed.
    pub fn set_marker(&self, marker: &[u8]) -> bool {
        let mut state = self.state.write();
        let changed = state.record.set_marker(marker);
        if changed {
            state.version += 1;
        }
        changed
    }

    /// Append `id`, which must follow `prev` (the current tail, or
    /// [`EntryId::ZERO`] on an empty chain).
    pub fn append(&self, id: EntryId, prev: EntryId, ltime: u64) -> Result<()> {
        let mut state = self.state.write();
        state.record.append(id, prev, ltime)?;
        state.version += 1;
        Ok(())
    }

    /// Remove the tail entry if it was appended at `ltime`.
    ///
    /// Returns the new height and whether an entry was removed.
    pub fn rollback(&self, ltime: u64) -> (u32, bool) {
        let mut state = self.state.write();
        let (height, removed) = state.record.rollback(ltime);
        if removed {
            state.version += 1;
        }
        (height, removed)
    }

    /// Last entry id, [`EntryId::ZERO`] if the chain is empty
    pub fn last(&self) -> EntryId {
        self.state.read().record.last()
    }

    /// Check whether `id` is in the chain
    pub fn contains(&self, id: &EntryId) -> bool {
        self.state.read().record.contains(id)
    }

    /// Number of entries
    pub fn count(&self) -> usize {
        self.state.read().record.entries.len()
    }

    /// Chain height
    pub fn height(&self) -> u32 {
        self.state.read().record.height
    }

    /// Logical time of the last append, if it has not been rolled back
    pub fn ltime(&self) -> Option<u64> {
        self.state.read().record.ltime
    }

    /// Point-in-time copy of the record
    pub fn record(&self) -> IndexRecord {
        self.state.read().record.clone()
    }

    /// Visit entry ids in chain order starting at `seek` (inclusive).
    ///
    /// `None` or the zero id start from the beginning. The ids are taken
    /// under the read lock and visited after it is released, so `f` may call
    /// back into this index. Traversal stops at the first error from `f`.
    /// To resume, call again with the last id seen.
    pub fn iterate<F>(&self, seek: Option<&EntryId>, mut f: F) -> Result<()>
    where
        F: FnMut(&EntryId) -> Result<()>,
    {
        let ids: Vec<EntryId> = {
            let state = self.state.read();
            let entries = &state.record.entries;
            let start = match seek {
                Some(id) if !id.is_zero() => entries
                    .iter()
                    .position(|e| e == id)
                    .ok_or_else(|| Error::EntryNotFound(id.to_hex()))?,
                _ => 0,
            };
            entries[start..].to_vec()
        };

        for id in &ids {
            f(id)?;
        }
        Ok(())
    }

    /// Whether there are changes not yet written to the backend
    pub fn is_dirty(&self) -> bool {
        self.state.read().version != self.flushed.load(Ordering::Acquire)
    }

    /// Write the current record to the backend.
    ///
    /// The record is encoded under the read lock; the backend write happens
    /// after the lock is released.
    pub fn flush(&self) -> Result<()> {
        let _flush = self.flush_lock.lock();

        let (bytes, version) = {
            let state = self.state.read();
            (state.record.encode()?, state.version)
        };

        self.backend.put(&self.key, &bytes)?;
        self.flushed.store(version, Ordering::Release);

        debug!(
            "Flushed index key={} version={} bytes={}",
            display_key(&self.key),
            version,
            bytes.len()
        );
        Ok(())
    }
}

impl fmt::Debug for KeylogIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("KeylogIndex")
            .field("key", &display_key(&self.key))
            .field("height", &state.record.height)
            .field("last", &state.record.last())
            .field("version", &state.version)
            .finish_non_exhaustive()
    }
}
