//! Full structural check of an arena image.
//!
//! Walks the data region record by record and cross-checks every list
//! against it. Any violation is reported as `Corrupted`.

use std::collections::HashSet;

use mapkv_common::layout::{ArenaHeader, MAX_CATEGORY};
use mapkv_common::{MapKvError, Result};

use crate::hash_index::bucket_for;
use crate::record::{record_of_bucket_node, record_of_category_node, record_of_free_node, RecordKind};
use crate::region::Region;

/// Summary produced by a successful integrity check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    /// Records tiling the data region.
    pub records: usize,
    /// Entry records.
    pub entries: usize,
    /// Free records.
    pub free_records: usize,
    /// Bytes held by free records.
    pub free_bytes: u64,
    /// Length of the largest free record.
    pub largest_free: u64,
}

impl<B: AsRef<[u8]>> Region<B> {
    /// Verifies every structural invariant of the arena.
    pub(crate) fn check_integrity(&self) -> Result<IntegrityReport> {
        let mut report = IntegrityReport::default();
        let mut free = HashSet::new();
        let mut entries = HashSet::new();

        // Records must tile the data region with no two free neighbours.
        let end = self.data_end();
        let mut rec = self.data_start();
        let mut prev_free = false;
        while rec < end {
            let (kind, len) = self.check_record(rec)?;
            match kind {
                RecordKind::Free => {
                    if prev_free {
                        return Err(MapKvError::corrupted(rec, "adjacent free records"));
                    }
                    free.insert(rec);
                    report.free_bytes += len;
                    report.largest_free = report.largest_free.max(len);
                }
                RecordKind::Entry => {
                    self.entry_meta(rec)?;
                    entries.insert(rec);
                }
            }
            prev_free = kind == RecordKind::Free;
            report.records += 1;
            rec += len;
        }
        if rec != end {
            return Err(MapKvError::corrupted(rec, "records overrun the data region"));
        }
        report.free_records = free.len();
        report.entries = entries.len();

        // The free list holds exactly the free records.
        let mut on_free_list = HashSet::new();
        for node in self.list_iter(self.free_head()) {
            let rec = record_of_free_node(node?);
            if !free.contains(&rec) || !on_free_list.insert(rec) {
                return Err(MapKvError::corrupted(rec, "unexpected record on the free list"));
            }
        }
        if on_free_list.len() != free.len() {
            return Err(MapKvError::corrupted(
                self.free_head(),
                format!(
                    "free list holds {} of {} free records",
                    on_free_list.len(),
                    free.len()
                ),
            ));
        }

        // Every entry is on the category list matching its category byte.
        let mut on_category = HashSet::new();
        for category in 0..MAX_CATEGORY as u8 {
            for node in self.list_iter(ArenaHeader::category_head_offset(category)) {
                let rec = record_of_category_node(node?);
                if !entries.contains(&rec) || !on_category.insert(rec) {
                    return Err(MapKvError::corrupted(
                        rec,
                        format!("unexpected record on category list {}", category),
                    ));
                }
                if self.entry_key(rec)?.0 != category {
                    return Err(MapKvError::corrupted(rec, "entry on the wrong category list"));
                }
            }
        }

        // Every entry is on the bucket its key hashes to, and keys are unique.
        let header = *self.header();
        let mut on_bucket = HashSet::new();
        let mut keys = HashSet::new();
        for bucket in 0..header.bucket_count {
            for node in self.list_iter(header.bucket_offset(bucket)) {
                let rec = record_of_bucket_node(node?);
                if !entries.contains(&rec) || !on_bucket.insert(rec) {
                    return Err(MapKvError::corrupted(
                        rec,
                        format!("unexpected record on bucket {}", bucket),
                    ));
                }
                let (category, key) = self.entry_key(rec)?;
                if bucket_for(category, key, header.bucket_count) != bucket {
                    return Err(MapKvError::corrupted(rec, "entry on the wrong bucket"));
                }
                if !keys.insert((category, key)) {
                    return Err(MapKvError::corrupted(
                        rec,
                        format!("duplicate key {:?} in category {}", key, category),
                    ));
                }
            }
        }
        if on_category.len() != entries.len() || on_bucket.len() != entries.len() {
            return Err(MapKvError::corrupted(
                self.data_start(),
                "entry records missing from the index lists",
            ));
        }

        Ok(report)
    }
}
