//! Open index handle cache
//!
//! The cache is the single place that knows whether a key's index is live in
//! memory. Each entry carries a reference count and a last-used time:
//!
//! - `acquire`/`release` move the reference count; nothing else does.
//! - Releasing the last reference does not flush. Durability is deferred to
//!   the maintenance cycle, which flushes dirty handles that have been idle
//!   longer than the grace window and evicts the ones nobody references.
//! - A handle is only evicted while clean, so dirty state is never dropped.
//! - `close_all` stops the maintenance thread, then flushes every handle.
//!
//! Callers hold a [`KeylogHandle`], a guard that gives back its reference on
//! `close()` or on drop.

use crate::keylog::KeylogIndex;
use crossbeam_channel::{RecvTimeoutError, Sender};
use keylogdb_common::{display_key, Error, IndexConfig, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// One cached index with its reference count
struct IndexHandle {
    refs: AtomicUsize,
    last_used: Mutex<Instant>,
    index: Arc<KeylogIndex>,
}

impl IndexHandle {
    fn new(index: Arc<KeylogIndex>) -> Self {
        Self {
            refs: AtomicUsize::new(1),
            last_used: Mutex::new(Instant::now()),
            index,
        }
    }

    fn touch(&self) {
        *self.last_used.lock() = Instant::now();
    }

    fn idle(&self) -> Duration {
        self.last_used.lock().elapsed()
    }

    fn refs(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }
}

/// Maintenance statistics
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Successful flushes (background and shutdown)
    pub flushes: AtomicU64,
    /// Failed flushes
    pub flush_errors: AtomicU64,
    /// Handles removed from the cache
    pub evictions: AtomicU64,
}

struct Worker {
    stop_tx: Sender<()>,
    handle: thread::JoinHandle<()>,
}

/// Reference-counted registry of open keylog indexes
pub struct HandleCache {
    handles: RwLock<HashMap<Vec<u8>, IndexHandle>>,
    /// Interval between maintenance cycles
    flush_interval: Duration,
    /// Idle time before a handle is considered for flush/eviction
    flush_wait: Duration,
    /// Bumped on every removal and eviction; a cold load that started
    /// before either may have read stale bytes and must not register
    generation: AtomicU64,
    stats: CacheStats,
    worker: Mutex<Option<Worker>>,
}

impl HandleCache {
    /// Create an empty cache. The maintenance thread is not started.
    pub fn new(config: &IndexConfig) -> Arc<Self> {
        Arc::new(Self {
            handles: RwLock::new(HashMap::new()),
            flush_interval: config.flush_interval(),
            flush_wait: config.flush_wait(),
            generation: AtomicU64::new(0),
            stats: CacheStats::default(),
            worker: Mutex::new(None),
        })
    }

    /// Register a freshly created index with one reference.
    ///
    /// Fails with `KeyExists` if the key already has a handle; an existing
    /// handle is never replaced. Returns `None` if a handle was removed or
    /// evicted since `generation` was read, since the caller's existence
    /// check may be stale; the create must then be retried.
    pub fn register(
        self: &Arc<Self>,
        index: KeylogIndex,
        generation: u64,
    ) -> Result<Option<KeylogHandle>> {
        let mut handles = self.handles.write();
        match handles.entry(index.key().to_vec()) {
            Entry::Occupied(_) => Err(Error::key_exists(index.key())),
            Entry::Vacant(_) if self.generation.load(Ordering::Acquire) != generation => Ok(None),
            Entry::Vacant(slot) => {
                let index = Arc::new(index);
                slot.insert(IndexHandle::new(Arc::clone(&index)));
                debug!("Registered handle key={}", display_key(index.key()));
                Ok(Some(KeylogHandle::new(index, Arc::clone(self))))
            }
        }
    }

    /// Register an index loaded from the backend.
    ///
    /// If another caller registered the key first, its handle is acquired
    /// and `index` is discarded. Returns `None` if a handle was removed or
    /// evicted since `generation` was read; the load must then be retried.
    pub fn adopt(self: &Arc<Self>, index: KeylogIndex, generation: u64) -> Option<KeylogHandle> {
        let mut handles = self.handles.write();
        if let Some(existing) = handles.get(index.key()) {
            existing.refs.fetch_add(1, Ordering::AcqRel);
            existing.touch();
            return Some(KeylogHandle::new(
                Arc::clone(&existing.index),
                Arc::clone(self),
            ));
        }
        if self.generation.load(Ordering::Acquire) != generation {
            return None;
        }

        let index = Arc::new(index);
        handles.insert(index.key().to_vec(), IndexHandle::new(Arc::clone(&index)));
        debug!("Registered loaded handle key={}", display_key(index.key()));
        Some(KeylogHandle::new(index, Arc::clone(self)))
    }

    /// Acquire the open handle for `key`, incrementing its reference count
    pub fn acquire(self: &Arc<Self>, key: &[u8]) -> Option<KeylogHandle> {
        // Eviction takes the write lock, so nothing can be evicted while
        // the count is raised under the read lock
        let handles = self.handles.read();
        let handle = handles.get(key)?;
        handle.refs.fetch_add(1, Ordering::AcqRel);
        handle.touch();
        Some(KeylogHandle::new(
            Arc::clone(&handle.index),
            Arc::clone(self),
        ))
    }

    /// Give back one reference to `key` and refresh its last-used time
    pub fn release(&self, key: &[u8]) -> Result<()> {
        let handles = self.handles.read();
        let handle = handles.get(key).ok_or_else(|| Error::key_not_found(key))?;
        handle
            .refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .map_err(|_| {
                warn!("Handle released more than acquired key={}", display_key(key));
                Error::internal(format!(
                    "handle for '{}' has no references to release",
                    display_key(key)
                ))
            })?;
        handle.touch();
        Ok(())
    }

    /// Number of open handles
    pub fn count(&self) -> usize {
        self.handles.read().len()
    }

    /// Whether `key` has a handle, referenced or not
    pub fn is_open(&self, key: &[u8]) -> bool {
        self.handles.read().contains_key(key)
    }

    /// Reference count of `key`'s handle, if it is open
    pub fn ref_count(&self, key: &[u8]) -> Option<usize> {
        self.handles.read().get(key).map(IndexHandle::refs)
    }

    /// Keys of all open handles, sorted
    pub fn keys(&self) -> Vec<Vec<u8>> {
        let mut keys: Vec<Vec<u8>> = self.handles.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Current removal/eviction generation
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Run `remove` for a key that has no handle.
    ///
    /// Fails with `IndexOpen` if the key is cached. The exclusive lock is
    /// held while `remove` runs, so the key cannot be opened concurrently.
    pub fn remove_closed<F>(&self, key: &[u8], remove: F) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        let handles = self.handles.write();
        if handles.contains_key(key) {
            return Err(Error::index_open(key));
        }
        self.generation.fetch_add(1, Ordering::AcqRel);
        remove()
    }

    /// Maintenance statistics
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Run one maintenance cycle. Returns the number of evicted handles.
    ///
    /// Handles idle longer than the grace window are flushed if dirty. A
    /// failed flush is logged and the handle stays open for the next cycle.
    /// Clean handles with no references are evicted.
    pub fn flush_once(&self) -> usize {
        let candidates: Vec<(Vec<u8>, Arc<KeylogIndex>)> = {
            let handles = self.handles.read();
            handles
                .iter()
                .filter(|(_, h)| h.idle() > self.flush_wait)
                .map(|(k, h)| (k.clone(), Arc::clone(&h.index)))
                .collect()
        };

        let mut evicted = 0;
        for (key, index) in candidates {
            if index.is_dirty() {
                if let Err(e) = index.flush() {
                    self.stats.flush_errors.fetch_add(1, Ordering::Relaxed);
                    error!("Flush error key={}: {}", display_key(&key), e);
                    continue;
                }
                self.stats.flushes.fetch_add(1, Ordering::Relaxed);
            }

            // The handle may have been used while the flush ran
            let mut handles = self.handles.write();
            let evict = handles.get(&key).is_some_and(|h| {
                Arc::ptr_eq(&h.index, &index)
                    && h.refs() == 0
                    && h.idle() > self.flush_wait
                    && !index.is_dirty()
            });
            if evict {
                handles.remove(&key);
                self.generation.fetch_add(1, Ordering::AcqRel);
                evicted += 1;
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                debug!("Evicted handle key={}", display_key(&key));
            }
        }
        evicted
    }

    /// Start the background maintenance thread if it is not running.
    ///
    /// Fails with `InvalidArgument` for a zero flush interval.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.flush_interval.is_zero() {
            return Err(Error::invalid_argument(
                "flush interval must be greater than zero",
            ));
        }

        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }

        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let cache: Weak<Self> = Arc::downgrade(self);
        let interval = self.flush_interval;

        let handle = thread::Builder::new()
            .name("keylog-flush".to_string())
            .spawn(move || {
                info!("Handle maintenance thread started (interval {:?})", interval);
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            let Some(cache) = cache.upgrade() else { break };
                            let evicted = cache.flush_once();
                            if evicted > 0 {
                                debug!("Maintenance evicted {} handles", evicted);
                            }
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                info!("Handle maintenance thread stopped");
            })?;

        *worker = Some(Worker { stop_tx, handle });
        Ok(())
    }

    /// Whether the maintenance thread is running
    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// Stop the maintenance thread and wait for it to exit
    fn stop(&self) {
        let worker = self.worker.lock().take();
        if let Some(Worker { stop_tx, handle }) = worker {
            let _ = stop_tx.send(());
            if handle.join().is_err() {
                error!("Handle maintenance thread panicked");
            }
        }
    }

    /// Stop maintenance, flush every handle regardless of references or idle
    /// time, and clear the cache.
    ///
    /// Every flush is attempted; the last error seen is returned.
    pub fn close_all(&self) -> Result<()> {
        self.stop();

        let drained: Vec<(Vec<u8>, IndexHandle)> = self.handles.write().drain().collect();
        let total = drained.len();

        let mut result = Ok(());
        for (key, handle) in drained {
            if handle.refs() > 0 {
                debug!(
                    "Closing handle with {} references key={}",
                    handle.refs(),
                    display_key(&key)
                );
            }
            match handle.index.flush() {
                Ok(()) => {
                    self.stats.flushes.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    self.stats.flush_errors.fetch_add(1, Ordering::Relaxed);
                    error!("Flush error on close key={}: {}", display_key(&key), e);
                    result = Err(e);
                }
            }
        }

        info!("Closed {} open index handles", total);
        result
    }
}

/// Scoped reference to an open keylog index.
///
/// Dereferences to [`KeylogIndex`]. The reference is given back by
/// [`KeylogHandle::close`], or on drop if `close` was not called.
pub struct KeylogHandle {
    index: Arc<KeylogIndex>,
    cache: Arc<HandleCache>,
    released: bool,
}

impl KeylogHandle {
    fn new(index: Arc<KeylogIndex>, cache: Arc<HandleCache>) -> Self {
        Self {
            index,
            cache,
            released: false,
        }
    }

    /// Release this reference. Does not flush.
    pub fn close(mut self) -> Result<()> {
        self.released = true;
        self.cache.release(self.index.key())
    }
}

impl Deref for KeylogHandle {
    type Target = KeylogIndex;

    fn deref(&self) -> &KeylogIndex {
        &self.index
    }
}

impl Drop for KeylogHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.cache.release(self.index.key()) {
            debug!(
                "Dropped handle could not be released key={}: {}",
                display_key(self.index.key()),
                e
            );
        }
    }
}

impl fmt::Debug for KeylogHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeylogHandle")
            .field("index", &self.index)
            .field("released", &self.released)
            .finish()
    }
}
