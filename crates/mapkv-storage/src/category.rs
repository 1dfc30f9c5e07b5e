//! Category index: one list of entries per category value.

use mapkv_common::layout::{ArenaHeader, MAX_CATEGORY};
use mapkv_common::{MapKvError, Result};

use crate::record::record_of_category_node;
use crate::region::Region;

/// Rejects categories outside `0..MAX_CATEGORY`.
#[inline]
pub fn check_category(category: u8) -> Result<()> {
    if (category as u32) < MAX_CATEGORY {
        Ok(())
    } else {
        Err(MapKvError::InvalidCategory {
            category: category as u32,
            max: MAX_CATEGORY,
        })
    }
}

impl<B: AsRef<[u8]>> Region<B> {
    /// Calls `visit` with the key and value of every entry in `category`,
    /// in insertion order. Returns the number of entries visited.
    pub(crate) fn for_each_entry<F>(&self, category: u8, mut visit: F) -> Result<usize>
    where
        F: FnMut(&str, &[u8]),
    {
        let head = ArenaHeader::category_head_offset(category);
        let mut count = 0;
        for node in self.list_iter(head) {
            let rec = record_of_category_node(node?);
            let (stored_category, key, value) = self.entry_key_value(rec)?;
            if stored_category != category {
                return Err(MapKvError::corrupted(
                    rec,
                    format!(
                        "entry of category {} on the list of category {}",
                        stored_category, category
                    ),
                ));
            }
            visit(key, value);
            count += 1;
        }
        Ok(count)
    }

    /// Returns the number of entries in `category`.
    pub(crate) fn category_len(&self, category: u8) -> Result<usize> {
        self.for_each_entry(category, |_, _| {})
    }
}
