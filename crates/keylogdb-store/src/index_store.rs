//! Keylog index store
//!
//! The store enforces key-level existence and exclusivity on top of the
//! handle cache and a persistent backend:
//!
//! - `new_key` is the only creation path and checks both the cache and the
//!   backend.
//! - `get_key` and `mark_key` return the live cached instance when there is
//!   one and otherwise load the persisted record.
//! - `remove_key` refuses keys that have a cached handle.
//!
//! Persisted records live in `index.db` (redb) under the data directory.

use crate::backend::{Backend, RedbBackend};
use crate::handles::{HandleCache, KeylogHandle};
use crate::keylog::KeylogIndex;
use crate::tables;
use keylogdb_common::{display_key, Error, IndexConfig, Result};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Index database file name inside the data directory
pub const INDEX_FILE: &str = "index.db";

/// Store statistics
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    /// Keys known to the backend
    pub keys: u64,
    /// Open handles in the cache
    pub open_keys: usize,
    /// Successful flushes by maintenance and shutdown
    pub flushes: u64,
    /// Failed flushes
    pub flush_errors: u64,
    /// Handles evicted from the cache
    pub evictions: u64,
}

/// Keylog index store
pub struct IndexStore {
    backend: Arc<dyn Backend>,
    handles: Arc<HandleCache>,
    closed: AtomicBool,
}

impl IndexStore {
    /// Open the store in `dir`, creating `index.db` if needed
    pub fn open(dir: impl AsRef<Path>, config: IndexConfig) -> Result<Self> {
        let path = dir.as_ref().join(INDEX_FILE);
        let backend = RedbBackend::open(&path, tables::INDEXES)?;
        Self::with_backend(Arc::new(backend), config)
    }

    /// Create a store over an existing backend
    pub fn with_backend(backend: Arc<dyn Backend>, config: IndexConfig) -> Result<Self> {
        let handles = HandleCache::new(&config);
        if config.background_flush {
            handles.start()?;
        }

        info!(
            "Index store ready (backend={}, flush_interval={:?}, flush_wait={:?}, background={})",
            backend.name(),
            config.flush_interval(),
            config.flush_wait(),
            config.background_flush
        );

        Ok(Self {
            backend,
            handles,
            closed: AtomicBool::new(false),
        })
    }

    /// Name of the persistent backend
    pub fn name(&self) -> &'static str {
        self.backend.name()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    /// Create an empty keylog for `key`.
    ///
    /// Fails with `KeyExists` if the key is open or persisted. The returned
    /// handle holds one reference.
    pub fn new_key(&self, key: &[u8]) -> Result<KeylogHandle> {
        self.ensure_open()?;

        loop {
            let generation = self.handles.generation();
            if self.handles.is_open(key) || self.backend.contains(key)? {
                return Err(Error::key_exists(key));
            }

            let index = KeylogIndex::new(key, Arc::clone(&self.backend));
            if let Some(handle) = self.handles.register(index, generation)? {
                debug!("Created key={}", display_key(key));
                return Ok(handle);
            }
            debug!("Cache changed during create, retrying key={}", display_key(key));
        }
    }

    /// Open the keylog for `key`.
    ///
    /// Returns the live handle if the key is cached, otherwise loads the
    /// persisted record. Fails with `KeyNotFound` if neither exists and with
    /// `CorruptData` if the record cannot be decoded.
    pub fn get_key(&self, key: &[u8]) -> Result<KeylogHandle> {
        self.ensure_open()?;

        loop {
            if let Some(handle) = self.handles.acquire(key) {
                return Ok(handle);
            }

            let generation = self.handles.generation();
            let Some(bytes) = self.backend.get(key)? else {
                // Created but not yet flushed
                return self
                    .handles
                    .acquire(key)
                    .ok_or_else(|| Error::key_not_found(key));
            };

            let index = KeylogIndex::decode(key, &bytes, Arc::clone(&self.backend))?;
            if let Some(handle) = self.handles.adopt(index, generation) {
                return Ok(handle);
            }
            debug!("Cache changed during load, retrying key={}", display_key(key));
        }
    }

    /// Set the marker of `key`, creating the keylog if it does not exist.
    ///
    /// Always returns a handle holding one reference, with the marker applied
    /// to the live instance.
    pub fn mark_key(&self, key: &[u8], marker: &[u8]) -> Result<KeylogHandle> {
        self.ensure_open()?;

        let handle = loop {
            if let Some(handle) = self.handles.acquire(key) {
                break handle;
            }

            let generation = self.handles.generation();
            let index = match self.backend.get(key)? {
                Some(bytes) => KeylogIndex::decode(key, &bytes, Arc::clone(&self.backend))?,
                None => KeylogIndex::new(key, Arc::clone(&self.backend)),
            };
            if let Some(handle) = self.handles.adopt(index, generation) {
                break handle;
            }
            debug!("Cache changed during load, retrying key={}", display_key(key));
        };

        if handle.set_marker(marker) {
            debug!(
                "Marked key={} marker={}",
                display_key(key),
                display_key(marker)
            );
        }
        Ok(handle)
    }

    /// Delete the persisted keylog of `key`.
    ///
    /// Fails with `IndexOpen` while the key has a cached handle, referenced
    /// or not, and with `KeyNotFound` if nothing is persisted.
    pub fn remove_key(&self, key: &[u8]) -> Result<()> {
        self.ensure_open()?;

        self.handles.remove_closed(key, || {
            if self.backend.delete(key)? {
                Ok(())
            } else {
                Err(Error::key_not_found(key))
            }
        })?;

        info!("Removed key={}", display_key(key));
        Ok(())
    }

    /// Visit every key with its index.
    ///
    /// Cached keys are visited through their live instance; other keys are
    /// decoded from the backend without being added to the cache. Records
    /// that fail to decode are logged and skipped. Each key is visited once,
    /// including keys created but not yet flushed. The first error returned
    /// by `f` stops the walk and is propagated.
    pub fn iterate<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&[u8], &KeylogIndex) -> Result<()>,
    {
        self.ensure_open()?;

        let cached = self.handles.keys();
        let is_cached = |key: &[u8]| {
            cached
                .binary_search_by(|k| k.as_slice().cmp(key))
                .is_ok()
        };

        self.backend.for_each(&mut |key, bytes| {
            if is_cached(key) {
                return Ok(());
            }
            if let Some(handle) = self.handles.acquire(key) {
                return f(key, &handle);
            }
            match KeylogIndex::decode(key, bytes, Arc::clone(&self.backend)) {
                Ok(index) => f(key, &index),
                Err(e) => {
                    warn!("Skipping unreadable index key={}: {}", display_key(key), e);
                    Ok(())
                }
            }
        })?;

        for key in &cached {
            if let Some(handle) = self.handles.acquire(key) {
                f(key, &handle)?;
                continue;
            }

            // Evicted or removed since the snapshot
            let Some(bytes) = self.backend.get(key)? else {
                continue;
            };
            match KeylogIndex::decode(key, &bytes, Arc::clone(&self.backend)) {
                Ok(index) => f(key, &index)?,
                Err(e) => {
                    warn!("Skipping unreadable index key={}: {}", display_key(key), e);
                }
            }
        }

        Ok(())
    }

    /// Number of persisted keys. Keys created but not yet flushed are not
    /// counted.
    pub fn count(&self) -> Result<u64> {
        self.ensure_open()?;
        self.backend.approximate_count()
    }

    /// Store statistics
    pub fn stats(&self) -> Result<Stats> {
        let keys = self.count()?;
        let cache = self.handles.stats();
        Ok(Stats {
            keys,
            open_keys: self.handles.count(),
            flushes: cache.flushes.load(Ordering::Relaxed),
            flush_errors: cache.flush_errors.load(Ordering::Relaxed),
            evictions: cache.evictions.load(Ordering::Relaxed),
        })
    }

    /// Run one maintenance cycle now. Returns the number of evicted handles.
    pub fn maintain(&self) -> usize {
        if self.closed.load(Ordering::Acquire) {
            return 0;
        }
        self.handles.flush_once()
    }

    /// Whether `key` has a cached handle
    pub fn is_open(&self, key: &[u8]) -> bool {
        self.handles.is_open(key)
    }

    /// Reference count of `key`'s cached handle
    pub fn ref_count(&self, key: &[u8]) -> Option<usize> {
        self.handles.ref_count(key)
    }

    /// Flush and drop every handle, then close the backend.
    ///
    /// Later calls return `Ok(())`; every other operation fails with
    /// `Closed`.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let flushed = self.handles.close_all();
        let closed = self.backend.close();
        info!("Index store closed");
        flushed.and(closed)
    }
}

impl Drop for IndexStore {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!("Error closing index store: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::{GatedBackend, Op};
    use crate::backend::MemoryBackend;
    use crate::types::IndexRecord;
    use keylogdb_common::EntryId;
    use std::collections::HashMap;
    use std::thread;
    use std::time::{Duration, Instant};
    use tempfile::tempdir;

    fn eager() -> IndexConfig {
        IndexConfig {
            flush_wait_ms: 0,
            ..IndexConfig::manual()
        }
    }

    fn memory_store(config: IndexConfig) -> (IndexStore, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        let store = IndexStore::with_backend(backend.clone(), config).unwrap();
        (store, backend)
    }

    fn id(n: u8) -> EntryId {
        EntryId::new([n; 32])
    }

    /// Let handles age past a zero grace window
    fn idle() {
        thread::sleep(Duration::from_millis(5));
    }

    #[test]
    fn test_new_key_twice() {
        let (store, _) = memory_store(IndexConfig::manual());

        let handle = store.new_key(b"key").unwrap();
        assert!(matches!(store.new_key(b"key"), Err(Error::KeyExists(_))));

        handle.close().unwrap();
        assert!(matches!(store.new_key(b"key"), Err(Error::KeyExists(_))));
    }

    #[test]
    fn test_new_key_checks_backend() {
        let (store, _) = memory_store(eager());
        store.new_key(b"key").unwrap().close().unwrap();
        idle();
        assert_eq!(store.maintain(), 1);
        assert!(!store.is_open(b"key"));

        assert!(matches!(store.new_key(b"key"), Err(Error::KeyExists(_))));
    }

    #[test]
    fn test_append_and_reopen() {
        let dir = tempdir().unwrap();
        let mut first = [0u8; 32];
        first[0] = 0xab;
        let first = EntryId::new(first);

        {
            let store = IndexStore::open(dir.path(), IndexConfig::manual()).unwrap();
            assert_eq!(store.name(), "redb");

            let index = store.new_key(b"key").unwrap();
            index.append(first, EntryId::ZERO, 1).unwrap();
            assert_eq!(index.count(), 1);
            index.close().unwrap();

            let index = store.get_key(b"key").unwrap();
            assert_eq!(index.count(), 1);
            assert_eq!(index.last(), first);
            index.close().unwrap();

            store.close().unwrap();
        }

        let store = IndexStore::open(dir.path(), IndexConfig::manual()).unwrap();
        let index = store.get_key(b"key").unwrap();
        assert_eq!(index.count(), 1);
        assert_eq!(index.last(), first);
        assert_eq!(index.ltime(), Some(1));
    }

    #[test]
    fn test_get_key_not_found() {
        let (store, _) = memory_store(IndexConfig::manual());
        assert!(matches!(store.get_key(b"missing"), Err(Error::KeyNotFound(_))));
        assert!(!store.is_open(b"missing"));
    }

    #[test]
    fn test_get_key_sees_unflushed_key() {
        let (store, backend) = memory_store(IndexConfig::manual());
        let created = store.new_key(b"key").unwrap();
        assert!(!backend.contains(b"key").unwrap());

        let opened = store.get_key(b"key").unwrap();
        assert_eq!(store.ref_count(b"key"), Some(2));
        drop(opened);
        drop(created);
        assert_eq!(store.ref_count(b"key"), Some(0));
    }

    #[test]
    fn test_round_trip_after_eviction() {
        let (store, _) = memory_store(eager());

        let index = store.new_key(b"key").unwrap();
        index.append(id(1), EntryId::ZERO, 1).unwrap();
        index.append(id(2), id(1), 2).unwrap();
        index.append(id(3), id(2), 3).unwrap();
        index.set_marker(b"checkpoint");
        let expected = index.record();
        index.close().unwrap();

        idle();
        assert_eq!(store.maintain(), 1);
        assert!(!store.is_open(b"key"));

        let index = store.get_key(b"key").unwrap();
        assert_eq!(index.record(), expected);
        assert!(!index.is_dirty());
        assert_eq!(store.ref_count(b"key"), Some(1));
    }

    #[test]
    fn test_remove_key() {
        let (store, _) = memory_store(eager());

        let index = store.new_key(b"key").unwrap();
        assert!(matches!(store.remove_key(b"key"), Err(Error::IndexOpen(_))));

        // Still cached after the last release
        index.close().unwrap();
        assert!(matches!(store.remove_key(b"key"), Err(Error::IndexOpen(_))));

        idle();
        assert_eq!(store.maintain(), 1);
        store.remove_key(b"key").unwrap();

        assert!(matches!(store.remove_key(b"key"), Err(Error::KeyNotFound(_))));
        assert!(matches!(store.get_key(b"key"), Err(Error::KeyNotFound(_))));

        // The key can be created again
        store.new_key(b"key").unwrap();
    }

    #[test]
    fn test_mark_key() {
        let (store, backend) = memory_store(IndexConfig::manual());

        let first = store.mark_key(b"key", b"m1").unwrap();
        assert_eq!(first.marker(), b"m1");
        assert_eq!(store.ref_count(b"key"), Some(1));

        let second = store.mark_key(b"key", b"m2").unwrap();
        assert_eq!(first.marker(), b"m2");
        assert_eq!(second.marker(), b"m2");
        assert_eq!(store.ref_count(b"key"), Some(2));
        assert_eq!(store.stats().unwrap().open_keys, 1);

        first.close().unwrap();
        second.close().unwrap();
        store.handles.close_all().unwrap();

        // Marking a persisted key loads it
        let index = store.mark_key(b"key", b"m3").unwrap();
        assert_eq!(index.marker(), b"m3");
        assert!(index.is_dirty());
        index.flush().unwrap();

        let stored = IndexRecord::decode(&backend.get(b"key").unwrap().unwrap())
            .unwrap();
        assert_eq!(stored.marker, b"m3");
    }

    #[test]
    fn test_iterate_visits_each_key_once() {
        let (store, _) = memory_store(IndexConfig::manual());

        let mut open = Vec::new();
        for i in 0..20u8 {
            let key = format!("key-{i:02}").into_bytes();
            let index = store.new_key(&key).unwrap();
            index.append(id(i + 1), EntryId::ZERO, u64::from(i)).unwrap();
            if i % 2 == 0 {
                index.flush().unwrap();
                open.push(index);
            } else {
                index.close().unwrap();
            }
        }
        assert_eq!(store.count().unwrap(), 10);

        let mut seen: HashMap<Vec<u8>, EntryId> = HashMap::new();
        store
            .iterate(|key, index| {
                assert_eq!(index.key(), key);
                assert!(seen.insert(key.to_vec(), index.last()).is_none());
                Ok(())
            })
            .unwrap();
        assert_eq!(seen.len(), 20);
        for i in 0..20u8 {
            let key = format!("key-{i:02}").into_bytes();
            assert_eq!(seen[&key], id(i + 1));
        }

        // Iteration gives back every reference it took
        for index in &open {
            assert_eq!(store.ref_count(index.key()), Some(1));
        }
        assert_eq!(store.stats().unwrap().open_keys, 20);

        drop(open);
        store.handles.close_all().unwrap();
        assert_eq!(store.count().unwrap(), 20);
    }

    #[test]
    fn test_iterate_prefers_live_state() {
        let (store, _) = memory_store(IndexConfig::manual());
        let index = store.new_key(b"key").unwrap();
        index.flush().unwrap();
        index.append(id(1), EntryId::ZERO, 1).unwrap();

        let mut height = 0;
        store
            .iterate(|_, index| {
                height = index.height();
                Ok(())
            })
            .unwrap();
        assert_eq!(height, 1);
    }

    #[test]
    fn test_iterate_does_not_cache_cold_keys() {
        let (store, _) = memory_store(eager());
        for key in [&b"a"[..], b"b", b"c"] {
            store.new_key(key).unwrap().close().unwrap();
        }
        idle();
        assert_eq!(store.maintain(), 3);

        let mut visited = 0;
        store
            .iterate(|_, _| {
                visited += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(visited, 3);
        assert_eq!(store.stats().unwrap().open_keys, 0);
    }

    #[test]
    fn test_iterate_stops_on_error() {
        let (store, _) = memory_store(IndexConfig::manual());
        for key in [&b"a"[..], b"b", b"c"] {
            store.new_key(key).unwrap().flush().unwrap();
        }

        let mut visited = 0;
        let err = store
            .iterate(|_, _| {
                visited += 1;
                Err(Error::internal("stop"))
            })
            .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
        assert_eq!(visited, 1);
        assert_eq!(store.ref_count(b"a"), Some(0));
    }

    #[test]
    fn test_corrupt_record() {
        let (store, backend) = memory_store(IndexConfig::manual());
        store.new_key(b"good").unwrap().flush().unwrap();
        backend.put(b"bad", b"not a record").unwrap();

        let mut keys = Vec::new();
        store
            .iterate(|key, _| {
                keys.push(key.to_vec());
                Ok(())
            })
            .unwrap();
        assert_eq!(keys, vec![b"good".to_vec()]);

        assert!(matches!(store.get_key(b"bad"), Err(Error::CorruptData(_))));
        assert!(!store.is_open(b"bad"));
    }

    #[test]
    fn test_concurrent_get_key() {
        let (store, _) = memory_store(eager());
        let index = store.new_key(b"key").unwrap();
        index.append(id(1), EntryId::ZERO, 1).unwrap();
        index.close().unwrap();
        idle();
        assert_eq!(store.maintain(), 1);

        const N: usize = 16;
        let handles: Vec<KeylogHandle> = thread::scope(|s| {
            let workers: Vec<_> = (0..N)
                .map(|_| s.spawn(|| store.get_key(b"key").unwrap()))
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });

        // Every caller shares the same live instance
        assert_eq!(store.ref_count(b"key"), Some(N));
        assert_eq!(store.stats().unwrap().open_keys, 1);
        handles[0].set_marker(b"shared");
        assert!(handles.iter().all(|h| h.marker() == b"shared"));

        for handle in handles {
            handle.close().unwrap();
        }
        assert_eq!(store.ref_count(b"key"), Some(0));

        idle();
        assert_eq!(store.maintain(), 1);
        assert!(!store.is_open(b"key"));
    }

    #[test]
    fn test_concurrent_mark_key_single_handle() {
        let (store, _) = memory_store(IndexConfig::manual());

        let handles: Vec<KeylogHandle> = thread::scope(|s| {
            let workers: Vec<_> = (0..8u8)
                .map(|i| {
                    let store = &store;
                    s.spawn(move || store.mark_key(b"key", &[i]).unwrap())
                })
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });

        assert_eq!(store.ref_count(b"key"), Some(8));
        let marker = handles[0].marker();
        assert!(handles.iter().all(|h| h.marker() == marker));
    }

    #[test]
    fn test_new_key_rechecks_after_concurrent_eviction() {
        let backend = Arc::new(GatedBackend::new());
        let store = IndexStore::with_backend(backend.clone(), eager()).unwrap();

        backend.arm(Op::Contains);
        thread::scope(|s| {
            let create = s.spawn(|| store.new_key(b"key").map(|index| index.height()));
            backend.wait_entered();

            // Created, flushed and evicted while the existence check is stale
            store.mark_key(b"key", b"m1").unwrap().close().unwrap();
            idle();
            assert_eq!(store.maintain(), 1);

            backend.resume();
            assert!(matches!(create.join().unwrap(), Err(Error::KeyExists(_))));
        });

        idle();
        store.maintain();
        let stored = IndexRecord::decode(&backend.get(b"key").unwrap().unwrap()).unwrap();
        assert_eq!(stored.marker, b"m1");
    }

    #[test]
    fn test_get_key_retries_stale_load() {
        let backend = Arc::new(GatedBackend::new());
        let store = IndexStore::with_backend(backend.clone(), eager()).unwrap();
        store.mark_key(b"key", b"m0").unwrap().close().unwrap();
        idle();
        assert_eq!(store.maintain(), 1);

        backend.arm(Op::Get);
        thread::scope(|s| {
            let load = s.spawn(|| {
                let index = store.get_key(b"key").unwrap();
                (index.marker(), index.height())
            });
            // The load holds the m0 record from here on
            backend.wait_entered();

            let index = store.mark_key(b"key", b"m1").unwrap();
            index.append(id(1), EntryId::ZERO, 1).unwrap();
            index.close().unwrap();
            idle();
            assert_eq!(store.maintain(), 1);

            backend.resume();
            let (marker, height) = load.join().unwrap();
            assert_eq!(marker, b"m1");
            assert_eq!(height, 1);
        });
    }

    #[test]
    fn test_mark_key_retries_stale_load() {
        let backend = Arc::new(GatedBackend::new());
        let store = IndexStore::with_backend(backend.clone(), eager()).unwrap();
        store.new_key(b"key").unwrap().close().unwrap();
        idle();
        assert_eq!(store.maintain(), 1);

        backend.arm(Op::Get);
        thread::scope(|s| {
            let mark = s.spawn(|| {
                let index = store.mark_key(b"key", b"late").unwrap();
                index.height()
            });
            backend.wait_entered();

            let index = store.get_key(b"key").unwrap();
            index.append(id(1), EntryId::ZERO, 1).unwrap();
            index.close().unwrap();
            idle();
            assert_eq!(store.maintain(), 1);

            backend.resume();
            assert_eq!(mark.join().unwrap(), 1);
        });

        idle();
        assert_eq!(store.maintain(), 1);
        let stored = IndexRecord::decode(&backend.get(b"key").unwrap().unwrap()).unwrap();
        assert_eq!(stored.height, 1);
        assert_eq!(stored.marker, b"late");
    }

    #[test]
    fn test_stats() {
        let (store, _) = memory_store(eager());
        let held = store.new_key(b"a").unwrap();
        store.new_key(b"b").unwrap().close().unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.keys, 0);
        assert_eq!(stats.open_keys, 2);

        idle();
        assert_eq!(store.maintain(), 1);
        let stats = store.stats().unwrap();
        assert_eq!(stats.keys, 2);
        assert_eq!(stats.open_keys, 1);
        assert_eq!(stats.flushes, 2);
        assert_eq!(stats.evictions, 1);
        drop(held);
    }

    #[test]
    fn test_background_maintenance() {
        let config = IndexConfig {
            flush_interval_ms: 10,
            flush_wait_ms: 0,
            background_flush: true,
        };
        let (store, backend) = memory_store(config);
        store.new_key(b"key").unwrap().close().unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while store.is_open(b"key") && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(!store.is_open(b"key"));
        assert!(backend.contains(b"key").unwrap());
    }

    #[test]
    fn test_closed_store() {
        let (store, backend) = memory_store(IndexConfig::manual());
        let index = store.new_key(b"key").unwrap();
        index.append(id(1), EntryId::ZERO, 1).unwrap();

        store.close().unwrap();
        assert!(backend.approximate_count().is_err());

        assert!(matches!(store.new_key(b"other"), Err(Error::Closed)));
        assert!(matches!(store.get_key(b"key"), Err(Error::Closed)));
        assert!(matches!(store.count(), Err(Error::Closed)));
        assert_eq!(store.maintain(), 0);
        store.close().unwrap();

        // The handle outlived the store; releasing it reports the missing key
        assert!(matches!(index.close(), Err(Error::KeyNotFound(_))));
    }

    #[test]
    fn test_close_persists_open_handles() {
        let dir = tempdir().unwrap();
        {
            let store = IndexStore::open(dir.path(), IndexConfig::default()).unwrap();
            let index = store.new_key(b"key").unwrap();
            index.append(id(7), EntryId::ZERO, 3).unwrap();
            // Dropping the store closes it with the handle still referenced
            drop(store);
            drop(index);
        }

        let store = IndexStore::open(dir.path(), IndexConfig::manual()).unwrap();
        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.get_key(b"key").unwrap().last(), id(7));
    }
}
