//! mapkv common types, errors, and layout definitions.
//!
//! This crate provides shared definitions used across all mapkv components.

pub mod config;
pub mod error;
pub mod layout;

pub use config::ArenaConfig;
pub use error::{MapKvError, Result};
pub use layout::{ArenaHeader, MAX_CATEGORY, MIN_FILE_LEN, PAGE_SIZE};
