//! Redb table definitions for persistent keylog storage.

use redb::TableDefinition;

/// Byte-keyed table holding opaque byte values
pub type BytesTable = TableDefinition<'static, &'static [u8], &'static [u8]>;

// Key: keylog key, Value: bincode-encoded IndexRecord
pub const INDEXES: BytesTable = TableDefinition::new("index");

// Key: entry id (32 bytes), Value: bincode-encoded Entry
pub const ENTRIES: BytesTable = TableDefinition::new("entries");
