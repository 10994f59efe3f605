//! keylogdb Store - Keylog index storage
//!
//! This crate implements the keylog index layer:
//! - Live per-key chain state with append/rollback integrity checks
//! - Reference-counted handle cache with deferred, batched flushing
//! - Index store facade enforcing key existence and exclusivity
//! - Entry store for full log entries addressed by hash
//! - Persistent backends (redb, in-memory)
//!
//! ```text
//!   callers
//!      |  new_key / get_key / mark_key / remove_key / iterate
//!      v
//!  IndexStore ----> HandleCache <---- maintenance thread
//!      |               |  (refcount, last-used)   (flush idle, evict clean)
//!      |               v
//!      |          KeylogIndex  (RwLock<IndexRecord>)
//!      |               | flush
//!      v               v
//!  Backend (redb index.db / memory)
//! ```

pub mod backend;
pub mod entry;
pub mod handles;
pub mod index_store;
pub mod keylog;
pub mod tables;
pub mod types;

// Re-exports
pub use backend::{Backend, BackendError, MemoryBackend, RedbBackend};
pub use entry::{ENTRY_FILE, EntryStore};
pub use handles::{CacheStats, HandleCache, KeylogHandle};
pub use index_store::{INDEX_FILE, IndexStore, Stats};
pub use keylog::KeylogIndex;
pub use types::{Entry, IndexRecord};
