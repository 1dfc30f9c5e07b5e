//! Configuration structures for mapkv.

use crate::error::{MapKvError, Result};
use crate::layout::{MIN_FILE_LEN, PAGE_SIZE};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default arena length (1 GiB). The file is sparse until written.
pub const DEFAULT_ARENA_LEN: u64 = 1024 * 1024 * 1024;

/// Configuration for opening an arena file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArenaConfig {
    /// Path of the arena file.
    pub path: PathBuf,
    /// Create the file when it does not exist.
    pub create_if_missing: bool,
    /// Length of a newly created arena. Ignored when opening an existing file.
    pub length: u64,
    /// Flush the mapping after every successful mutation.
    pub flush_on_write: bool,
    /// Run a full structural check after every mutation.
    pub verify_writes: bool,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("db.dat"),
            create_if_missing: true,
            length: DEFAULT_ARENA_LEN,
            flush_on_write: false,
            verify_writes: false,
        }
    }
}

impl ArenaConfig {
    /// Creates a config for `path` with default settings.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Sets the creation length.
    pub fn with_length(mut self, length: u64) -> Self {
        self.length = length;
        self
    }

    /// Sets whether a missing file is created.
    pub fn with_create(mut self, create_if_missing: bool) -> Self {
        self.create_if_missing = create_if_missing;
        self
    }

    /// Enables or disables structural checks after every mutation.
    pub fn with_verify_writes(mut self, verify_writes: bool) -> Self {
        self.verify_writes = verify_writes;
        self
    }

    /// Enables or disables flushing after every mutation.
    pub fn with_flush_on_write(mut self, flush_on_write: bool) -> Self {
        self.flush_on_write = flush_on_write;
        self
    }

    /// Checks the settings that apply to every open.
    pub fn validate(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Err(MapKvError::ConfigError("arena path is empty".to_string()));
        }
        Ok(())
    }

    /// Checks the creation length. Only consulted when the file is missing.
    pub fn validate_length(&self) -> Result<()> {
        if self.length % PAGE_SIZE != 0 {
            return Err(MapKvError::InvalidArenaLength {
                length: self.length,
                reason: format!("not a multiple of the page size {}", PAGE_SIZE),
            });
        }
        if self.length < MIN_FILE_LEN {
            return Err(MapKvError::InvalidArenaLength {
                length: self.length,
                reason: format!("below the minimum of {} bytes", MIN_FILE_LEN),
            });
        }
        Ok(())
    }
}
