//! Entry store
//!
//! Full keylog entries keyed by their id, kept in `entries.db` next to the
//! index database. The index only records ids; callers resolve them here.

use crate::backend::{Backend, RedbBackend};
use crate::tables;
use crate::types::Entry;
use keylogdb_common::{EntryId, Error, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Entry database file name inside the data directory
pub const ENTRY_FILE: &str = "entries.db";

/// Store of keylog entries addressed by [`EntryId`]
pub struct EntryStore {
    backend: Arc<dyn Backend>,
}

impl EntryStore {
    /// Open the entry store in `dir`
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let backend = RedbBackend::open(dir.as_ref().join(ENTRY_FILE), tables::ENTRIES)?;
        Ok(Self::with_backend(Arc::new(backend)))
    }

    /// Create an entry store over an existing backend
    pub fn with_backend(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Name of the persistent backend
    pub fn name(&self) -> &'static str {
        self.backend.name()
    }

    /// Fetch the entry stored under `id`
    pub fn get(&self, id: &EntryId) -> Result<Entry> {
        let bytes = self
            .backend
            .get(id.as_bytes())?
            .ok_or_else(|| Error::EntryNotFound(id.to_hex()))?;
        Entry::decode(&bytes)
    }

    /// Store `entry` under its hash and return the id
    pub fn set(&self, entry: &Entry) -> Result<EntryId> {
        let id = entry.hash();
        self.backend.put(id.as_bytes(), &entry.encode()?)?;
        debug!("Stored entry {:?} height={}", id, entry.height);
        Ok(id)
    }

    /// Delete the entry stored under `id`
    pub fn delete(&self, id: &EntryId) -> Result<()> {
        if self.backend.delete(id.as_bytes())? {
            Ok(())
        } else {
            Err(Error::EntryNotFound(id.to_hex()))
        }
    }

    /// Number of stored entries
    pub fn count(&self) -> Result<u64> {
        self.backend.approximate_count()
    }

    /// Close the underlying backend
    pub fn close(&self) -> Result<()> {
        self.backend.close()
    }
}
