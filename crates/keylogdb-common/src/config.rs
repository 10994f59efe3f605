//! Configuration types for keylogdb

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Keylog index store configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Interval between background maintenance cycles (milliseconds).
    /// Must be non-zero when `background_flush` is set.
    pub flush_interval_ms: u64,
    /// Idle time a handle must exceed before it is flushed or evicted (milliseconds)
    pub flush_wait_ms: u64,
    /// Run the maintenance loop in a background thread
    pub background_flush: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 60_000,
            flush_wait_ms: 15_000,
            background_flush: true,
        }
    }
}

impl IndexConfig {
    /// Maintenance cycle interval
    #[must_use]
    pub const fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// Idle grace window
    #[must_use]
    pub const fn flush_wait(&self) -> Duration {
        Duration::from_millis(self.flush_wait_ms)
    }

    /// Config with the background loop disabled; maintenance is driven by the caller
    #[must_use]
    pub fn manual() -> Self {
        Self {
            background_flush: false,
            ..Self::default()
        }
    }
}
