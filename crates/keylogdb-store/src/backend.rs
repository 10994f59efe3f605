//! Persistent key-value backends.
//!
//! The index layer only needs atomic single-key put/get/delete plus a full
//! scan, so every store in this crate talks to an `Arc<dyn Backend>`. The
//! production implementation is [`RedbBackend`]; [`MemoryBackend`] keeps
//! everything in a `BTreeMap` for tests and embedders that do not need
//! durability.

use crate::tables::BytesTable;
use keylogdb_common::{Error, Result};
use parking_lot::RwLock;
use redb::{Database, ReadableTable, ReadableTableMetadata};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Durable key-value storage with atomic per-key operations
pub trait Backend: Send + Sync {
    /// Short backend name used in logs and stats
    fn name(&self) -> &'static str;

    /// Fetch the value stored under `key`
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Atomically store `value` under `key`, replacing any previous value
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Delete `key`. Returns whether the key was present.
    fn delete(&self, key: &[u8]) -> Result<bool>;

    /// Check whether `key` is present
    fn contains(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Visit every key/value pair. An error returned by `f` stops the scan
    /// and is propagated.
    fn for_each(&self, f: &mut dyn FnMut(&[u8], &[u8]) -> Result<()>) -> Result<()>;

    /// Number of stored keys
    fn approximate_count(&self) -> Result<u64>;

    /// Release the underlying storage. Later calls fail with [`Error::Closed`].
    fn close(&self) -> Result<()>;
}

/// Error type for redb operations
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("redb error: {0}")]
    Database(#[from] redb::DatabaseError),
    #[error("redb storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("redb table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("redb transaction error: {0}")]
    Transaction(Box<redb::TransactionError>),
    #[error("redb commit error: {0}")]
    Commit(#[from] redb::CommitError),
}

impl From<redb::TransactionError> for BackendError {
    fn from(e: redb::TransactionError) -> Self {
        Self::Transaction(Box::new(e))
    }
}

impl From<BackendError> for Error {
    fn from(e: BackendError) -> Self {
        Self::Backend(e.to_string())
    }
}

type BackendResult<T> = std::result::Result<T, BackendError>;

/// Backend storing one redb table in one database file
pub struct RedbBackend {
    db: RwLock<Option<Arc<Database>>>,
    table: BytesTable,
    path: PathBuf,
}

impl RedbBackend {
    /// Open (or create) the redb database at `path` and make sure `table` exists.
    pub fn open(path: impl AsRef<Path>, table: BytesTable) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(BackendError::from)?;

        // Create the table eagerly so later read txns don't fail
        Self::create_table(&db, table)?;

        info!("Opened redb backend at {:?}", path);
        Ok(Self {
            db: RwLock::new(Some(Arc::new(db))),
            table,
            path: path.to_path_buf(),
        })
    }

    /// Path of the database file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn create_table(db: &Database, table: BytesTable) -> BackendResult<()> {
        let write_txn = db.begin_write()?;
        {
            let _t = write_txn.open_table(table)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn db(&self) -> Result<Arc<Database>> {
        self.db.read().clone().ok_or(Error::Closed)
    }

    fn get_inner(&self, db: &Database, key: &[u8]) -> BackendResult<Option<Vec<u8>>> {
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(self.table)?;
        Ok(table.get(key)?.map(|v| v.value().to_vec()))
    }

    fn put_inner(&self, db: &Database, key: &[u8], value: &[u8]) -> BackendResult<()> {
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(self.table)?;
            table.insert(key, value)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn delete_inner(&self, db: &Database, key: &[u8]) -> BackendResult<bool> {
        let write_txn = db.begin_write()?;
        let existed = {
            let mut table = write_txn.open_table(self.table)?;
            let removed = table.remove(key)?;
            removed.is_some()
        };
        if existed {
            write_txn.commit()?;
        } else {
            write_txn.abort()?;
        }
        Ok(existed)
    }

    fn count_inner(&self, db: &Database) -> BackendResult<u64> {
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(self.table)?;
        Ok(table.len()?)
    }
}

impl Backend for RedbBackend {
    fn name(&self) -> &'static str {
        "redb"
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let db = self.db()?;
        Ok(self.get_inner(&db, key)?)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let db = self.db()?;
        Ok(self.put_inner(&db, key, value)?)
    }

    fn delete(&self, key: &[u8]) -> Result<bool> {
        let db = self.db()?;
        Ok(self.delete_inner(&db, key)?)
    }

    fn for_each(&self, f: &mut dyn FnMut(&[u8], &[u8]) -> Result<()>) -> Result<()> {
        let db = self.db()?;
        let read_txn = db.begin_read().map_err(BackendError::from)?;
        let table = read_txn
            .open_table(self.table)
            .map_err(BackendError::from)?;
        for entry in table.iter().map_err(BackendError::from)? {
            let (key, value) = entry.map_err(BackendError::from)?;
            f(key.value(), value.value())?;
        }
        Ok(())
    }

    fn approximate_count(&self) -> Result<u64> {
        let db = self.db()?;
        Ok(self.count_inner(&db)?)
    }

    fn close(&self) -> Result<()> {
        // In-flight operations hold their own Arc; the file is released
        // once the last of them finishes.
        if self.db.write().take().is_some() {
            debug!("Closed redb backend at {:?}", self.path);
        }
        Ok(())
    }
}

/// In-memory backend
#[derive(Default)]
pub struct MemoryBackend {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    closed: AtomicBool,
}

impl MemoryBackend {
    /// Create an empty in-memory backend
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        Ok(())
    }
}

impl Backend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;
        Ok(self.map.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.ensure_open()?;
        self.map.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.map.write().remove(key).is_some())
    }

    fn for_each(&self, f: &mut dyn FnMut(&[u8], &[u8]) -> Result<()>) -> Result<()> {
        self.ensure_open()?;
        // Scan a snapshot so callbacks may write back to this backend
        let snapshot: Vec<(Vec<u8>, Vec<u8>)> = self
            .map
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (key, value) in &snapshot {
            f(key, value)?;
        }
        Ok(())
    }

    fn approximate_count(&self) -> Result<u64> {
        self.ensure_open()?;
        Ok(self.map.read().len() as u64)
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
