//! Error types for mapkv.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using MapKvError.
pub type Result<T> = std::result::Result<T, MapKvError>;

/// Errors that can occur in mapkv operations.
#[derive(Debug, Error)]
pub enum MapKvError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Arena file not found: {}", path.display())]
    ArenaNotFound { path: PathBuf },

    // Argument errors
    #[error("Invalid category: {category} (must be below {max})")]
    InvalidCategory { category: u32, max: u32 },

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Malformed number stored under key {key:?}: {text:?}")]
    MalformedNumber { key: String, text: String },

    #[error("Invalid arena length: {length} bytes ({reason})")]
    InvalidArenaLength { length: u64, reason: String },

    // Capacity errors
    #[error("Arena full, unable to allocate {requested} bytes")]
    ArenaFull { requested: u64 },

    // Format and corruption errors
    #[error("Bad arena magic: expected {expected:#x}, got {actual:#x}")]
    BadMagic { expected: u64, actual: u64 },

    #[error("Arena size mismatch: header records {expected} bytes, file has {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("Arena corrupted at offset {offset:#x}: {reason}")]
    Corrupted { offset: u64, reason: String },

    #[error("Arena is poisoned by an earlier corruption error")]
    Poisoned,

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl MapKvError {
    /// Builds a corruption error for the record or node at `offset`.
    pub fn corrupted(offset: u64, reason: impl Into<String>) -> Self {
        MapKvError::Corrupted {
            offset,
            reason: reason.into(),
        }
    }

    /// Returns true when the arena is still usable after this error.
    ///
    /// Argument and capacity errors leave the arena untouched. Corruption and
    /// I/O errors do not.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            MapKvError::InvalidCategory { .. }
                | MapKvError::InvalidKey(_)
                | MapKvError::InvalidValue(_)
                | MapKvError::MalformedNumber { .. }
                | MapKvError::InvalidArenaLength { .. }
                | MapKvError::ArenaFull { .. }
                | MapKvError::ConfigError(_)
        )
    }

    /// Returns true for errors that indicate a damaged arena image.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            MapKvError::Corrupted { .. }
                | MapKvError::BadMagic { .. }
                | MapKvError::SizeMismatch { .. }
                | MapKvError::Poisoned
        )
    }
}
