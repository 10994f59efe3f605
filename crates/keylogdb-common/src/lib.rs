//! keylogdb Common - Shared types and utilities
//!
//! This crate provides the entry id type, the error taxonomy, and the
//! configuration structures shared by the keylog index store and its tools.

pub mod config;
pub mod error;
pub mod types;

pub use config::IndexConfig;
pub use error::{Error, Result};
pub use types::*;
