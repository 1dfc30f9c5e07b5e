//! Entry operations composed from the allocator and both indexes.
//!
//! These run on a `Region` with no locking; `Arena` wraps them with the
//! reader/writer guard.

use mapkv_common::{MapKvError, Result};

use crate::record::EntryLayout;
use crate::region::Region;

/// Rejects keys that cannot be stored as a NUL-terminated blob.
pub(crate) fn check_key(key: &str) -> Result<()> {
    if key.as_bytes().contains(&0) {
        return Err(MapKvError::InvalidKey(format!(
            "key {:?} contains a NUL byte",
            key
        )));
    }
    Ok(())
}

/// Rejects empty values.
pub(crate) fn check_value(value: &[u8]) -> Result<()> {
    if value.is_empty() {
        return Err(MapKvError::InvalidValue("value is empty".to_string()));
    }
    Ok(())
}

/// Outcome of a successful upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PutOutcome {
    /// The value was written into the existing record.
    Overwritten,
    /// The key had no entry; a new record was allocated.
    Inserted,
    /// The existing record was too small and has been replaced.
    Relocated,
}

impl<B: AsRef<[u8]>> Region<B> {
    /// Returns the absolute byte range of the value for `category`/`key`.
    pub(crate) fn lookup(&self, category: u8, key: &str) -> Result<Option<std::ops::Range<usize>>> {
        match self.find(category, key)? {
            Some(rec) => Ok(Some(self.entry_value_range(rec)?)),
            None => Ok(None),
        }
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> Region<B> {
    /// Inserts or updates the value for `category`/`key`.
    ///
    /// Arguments are assumed validated. Fails with `ArenaFull` and leaves the
    /// arena unchanged when the value cannot be placed.
    pub(crate) fn put(&mut self, category: u8, key: &str, value: &[u8]) -> Result<PutOutcome> {
        let layout = EntryLayout::new(key.len(), value.len())?;
        let existing = self.find(category, key)?;

        let outcome = match existing {
            Some(rec) => {
                if self.entry_meta(rec)?.value_capacity as usize >= value.len() {
                    self.overwrite_value(rec, value)?;
                    return Ok(PutOutcome::Overwritten);
                }
                if !self.fits_after_release(rec, layout.record_len)? {
                    return Err(MapKvError::ArenaFull {
                        requested: layout.record_len,
                    });
                }
                self.release(rec)?;
                PutOutcome::Relocated
            }
            None => PutOutcome::Inserted,
        };

        let rec = self.allocate(layout.record_len)?;
        self.write_entry(rec, &layout, category, key, value)?;
        self.link_entry(rec, category, key)?;
        Ok(outcome)
    }

    /// Removes the entry for `category`/`key`. Returns false if absent.
    pub(crate) fn delete(&mut self, category: u8, key: &str) -> Result<bool> {
        match self.find(category, key)? {
            Some(rec) => {
                self.release(rec)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
