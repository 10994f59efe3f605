//! Error types for keylogdb
//!
//! This module defines the error taxonomy shared by the index store, the
//! entry store and the persistent backends.

use crate::types::{display_key, EntryId};
use thiserror::Error;

/// Common result type for keylogdb operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for keylogdb
#[derive(Debug, Error)]
pub enum Error {
    // Key lifecycle errors
    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("key already exists: {0}")]
    KeyExists(String),

    #[error("keylog index is open: {0}")]
    IndexOpen(String),

    // Chain integrity errors
    #[error("previous id mismatch: chain tail is {expected}, got {actual}")]
    ChainMismatch { expected: EntryId, actual: EntryId },

    #[error("entry not found: {0}")]
    EntryNotFound(String),

    // Data errors
    #[error("corrupt data: {0}")]
    CorruptData(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // Backend errors
    #[error("backend error: {0}")]
    Backend(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store is closed")]
    Closed,

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Key not found, rendering the key for display
    pub fn key_not_found(key: &[u8]) -> Self {
        Self::KeyNotFound(display_key(key))
    }

    /// Key already exists, rendering the key for display
    pub fn key_exists(key: &[u8]) -> Self {
        Self::KeyExists(display_key(key))
    }

    /// Index still open, rendering the key for display
    pub fn index_open(key: &[u8]) -> Self {
        Self::IndexOpen(display_key(key))
    }

    /// Create a corrupt data error
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::CorruptData(msg.into())
    }

    /// Create a backend error
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this is a not found error
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::KeyNotFound(_) | Self::EntryNotFound(_))
    }

    /// Check if this is a caller-visible contract violation.
    ///
    /// These are never retried internally.
    #[must_use]
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            Self::ChainMismatch { .. }
                | Self::KeyExists(_)
                | Self::IndexOpen(_)
                | Self::KeyNotFound(_)
        )
    }
}
