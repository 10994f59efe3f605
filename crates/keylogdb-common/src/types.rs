//! Core types for keylogdb

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Size in bytes of an entry id (SHA-256 digest)
pub const ID_SIZE: usize = 32;

/// Identifier of a keylog entry: the hash of the entry.
///
/// The all-zero id is the sentinel "previous" value for the first entry
/// appended to an empty chain.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryId([u8; ID_SIZE]);

impl EntryId {
    /// The empty-chain sentinel
    pub const ZERO: Self = Self([0u8; ID_SIZE]);

    /// Create an id from raw bytes
    #[must_use]
    pub const fn new(bytes: [u8; ID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create an id from a slice, which must be exactly [`ID_SIZE`] bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; ID_SIZE] = bytes.try_into().map_err(|_| {
            Error::invalid_argument(format!(
                "entry id must be {ID_SIZE} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    /// Parse an id from its hex representation
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| Error::invalid_argument(format!("invalid entry id hex: {e}")))?;
        Self::from_slice(&bytes)
    }

    /// Get the raw bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; ID_SIZE] {
        &self.0
    }

    /// Check whether this is the zero sentinel
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; ID_SIZE]
    }

    /// Full lowercase hex representation
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<[u8; ID_SIZE]> for EntryId {
    fn from(bytes: [u8; ID_SIZE]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for EntryId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form keeps log lines readable
        write!(f, "EntryId({})", &self.to_hex()[..16])
    }
}

/// Render an arbitrary byte key for logs and error messages.
///
/// Printable UTF-8 keys are shown as-is, anything else as hex.
#[must_use]
pub fn display_key(key: &[u8]) -> String {
    match std::str::from_utf8(key) {
        Ok(s) if !s.chars().any(char::is_control) => s.to_string(),
        _ => format!("0x{}", hex::encode(key)),
    }
}
