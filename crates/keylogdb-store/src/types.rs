//! Stored types for keylog persistence.
//!
//! These types are serialized to the backend via bincode.

use keylogdb_common::{display_key, EntryId, Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Persisted form of one key's keylog index.
///
/// This is the unlocked chain state; [`crate::KeylogIndex`] wraps it with a
/// lock and flush bookkeeping.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRecord {
    /// Key the keylog belongs to
    pub key: Vec<u8>,
    /// Entry ids, oldest first
    pub entries: Vec<EntryId>,
    /// Opaque caller checkpoint
    pub marker: Vec<u8>,
    /// Number of entries in the chain
    pub height: u32,
    /// Logical time of the last append, cleared by a rollback
    pub ltime: Option<u64>,
}

impl IndexRecord {
    /// Create an empty record for `key`
    #[must_use]
    pub fn new(key: &[u8]) -> Self {
        Self {
            key: key.to_vec(),
            entries: Vec::new(),
            marker: Vec::new(),
            height: 0,
            ltime: None,
        }
    }

    /// Last entry id, or [`EntryId::ZERO`] for an empty chain
    #[must_use]
    pub fn last(&self) -> EntryId {
        self.entries.last().copied().unwrap_or(EntryId::ZERO)
    }

    /// Append `id` after checking that `prev` is the current chain tail.
    ///
    /// On mismatch the record is left unchanged.
    pub fn append(&mut self, id: EntryId, prev: EntryId, ltime: u64) -> Result<()> {
        let last = self.last();
        if prev != last {
            return Err(Error::ChainMismatch {
                expected: last,
                actual: prev,
            });
        }
        let height = self
            .height
            .checked_add(1)
            .ok_or_else(|| Error::internal("keylog height overflow"))?;

        self.entries.push(id);
        self.height = height;
        self.ltime = Some(ltime);
        Ok(())
    }

    /// Remove the tail entry if it was appended at logical time `ltime`.
    ///
    /// Returns the resulting height and whether an entry was removed. A
    /// rollback clears the recorded logical time, so repeating it is a no-op.
    pub fn rollback(&mut self, ltime: u64) -> (u32, bool) {
        if self.ltime != Some(ltime) || self.entries.pop().is_none() {
            return (self.height, false);
        }
        self.height -= 1;
        self.ltime = None;
        (self.height, true)
    }

    /// Set the marker. Returns false if it already had this value.
    pub fn set_marker(&mut self, marker: &[u8]) -> bool {
        if self.marker == marker {
            return false;
        }
        self.marker = marker.to_vec();
        true
    }

    /// Check whether `id` is part of the chain
    #[must_use]
    pub fn contains(&self, id: &EntryId) -> bool {
        self.entries.contains(id)
    }

    /// Serialize to bytes
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from bytes, validating the height invariant
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let record: Self = bincode::deserialize(bytes)
            .map_err(|e| Error::corrupt(format!("index record: {e}")))?;
        if record.entries.len() != record.height as usize {
            return Err(Error::corrupt(format!(
                "index record '{}': height {} but {} entries",
                display_key(&record.key),
                record.height,
                record.entries.len()
            )));
        }
        Ok(record)
    }
}

/// A full keylog entry, stored by its id in the entry store
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Key the entry belongs to
    pub key: Vec<u8>,
    /// Id of the previous entry in the key's chain
    pub previous: EntryId,
    /// Height of the chain once this entry is applied
    pub height: u32,
    /// Wall clock creation time (nanoseconds since the epoch)
    pub timestamp: u64,
    /// Logical time the entry was proposed at
    pub ltime: u64,
    /// Payload
    pub data: Vec<u8>,
}

impl Entry {
    /// Compute the entry id (SHA-256 over all fields)
    #[must_use]
    pub fn hash(&self) -> EntryId {
        let mut hasher = Sha256::new();
        hasher.update(self.previous.as_bytes());
        hasher.update(self.height.to_be_bytes());
        hasher.update((self.key.len() as u64).to_be_bytes());
        hasher.update(&self.key);
        hasher.update(self.timestamp.to_be_bytes());
        hasher.update(self.ltime.to_be_bytes());
        hasher.update(&self.data);
        EntryId::new(hasher.finalize().into())
    }

    /// Serialize to bytes
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from bytes
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| Error::corrupt(format!("entry: {e}")))
    }
}
