//! Hash index mapping (category, key) to entry records.
//!
//! The hash table is a fixed array of list heads following the header page.
//! Entries hang off the bucket chosen by a CRC-32 of the category byte
//! followed by the key bytes.

use mapkv_common::Result;

use crate::record::{record_of_bucket_node, OFF_BUCKET_NODE, OFF_CATEGORY_NODE};
use crate::region::Region;
use mapkv_common::layout::ArenaHeader;

/// Returns the bucket holding `category`/`key` in a table of `bucket_count`
/// buckets.
pub fn bucket_for(category: u8, key: &str, bucket_count: u64) -> u64 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&[category]);
    hasher.update(key.as_bytes());
    hasher.finalize() as u64 % bucket_count
}

impl<B: AsRef<[u8]>> Region<B> {
    /// Returns the head node offset of the bucket for `category`/`key`.
    pub(crate) fn bucket_head(&self, category: u8, key: &str) -> u64 {
        let header = self.header();
        header.bucket_offset(bucket_for(category, key, header.bucket_count))
    }

    /// Finds the entry record holding `category`/`key`.
    pub(crate) fn find(&self, category: u8, key: &str) -> Result<Option<u64>> {
        for node in self.list_iter(self.bucket_head(category, key)) {
            let rec = record_of_bucket_node(node?);
            if self.entry_matches(rec, category, key)? {
                return Ok(Some(rec));
            }
        }
        Ok(None)
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> Region<B> {
    /// Appends the entry at `rec` to its hash bucket and category lists.
    pub(crate) fn link_entry(&mut self, rec: u64, category: u8, key: &str) -> Result<()> {
        let bucket = self.bucket_head(category, key);
        self.push_back(bucket, rec + OFF_BUCKET_NODE)?;
        self.push_back(
            ArenaHeader::category_head_offset(category),
            rec + OFF_CATEGORY_NODE,
        )
    }
}
