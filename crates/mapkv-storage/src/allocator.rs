//! First-fit record allocator with boundary-tag coalescing.
//!
//! The data region is tiled by records. Free records sit on a single free
//! list; allocation takes the first one that is large enough and splits off
//! the remainder when it can hold a minimum-size record. Released records are
//! merged with free neighbours on both sides, found through the length at the
//! start of the following record and the boundary tag at the end of the
//! preceding one, so no two free records are ever adjacent.

use mapkv_common::{MapKvError, Result};

use crate::record::{
    record_of_free_node, RecordKind, BOUNDARY_TAG_SIZE, MIN_RECORD_LEN, OFF_BUCKET_NODE,
    OFF_CATEGORY_NODE, OFF_FREE_NODE,
};
use crate::region::Region;

/// A record on the free list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeRecord {
    /// Arena offset of the record.
    pub offset: u64,
    /// Record length in bytes.
    pub len: u64,
}

impl<B: AsRef<[u8]>> Region<B> {
    /// Returns the first free record of at least `len` bytes.
    pub(crate) fn first_fit(&self, len: u64) -> Result<Option<FreeRecord>> {
        for node in self.list_iter(self.free_head()) {
            let rec = record_of_free_node(node?);
            let rec_len = self.expect_record(rec, RecordKind::Free)?;
            if rec_len >= len {
                return Ok(Some(FreeRecord {
                    offset: rec,
                    len: rec_len,
                }));
            }
        }
        Ok(None)
    }

    /// Returns every record on the free list, in list order.
    pub(crate) fn free_records(&self) -> Result<Vec<FreeRecord>> {
        self.list_iter(self.free_head())
            .map(|node| {
                let rec = record_of_free_node(node?);
                let len = self.expect_record(rec, RecordKind::Free)?;
                Ok(FreeRecord { offset: rec, len })
            })
            .collect()
    }

    /// Returns the number of records on the free list.
    pub(crate) fn free_list_len(&self) -> Result<usize> {
        let mut count = 0;
        for node in self.list_iter(self.free_head()) {
            node?;
            count += 1;
        }
        Ok(count)
    }

    /// Returns the free record that ends where `rec` starts, if any.
    fn free_predecessor(&self, rec: u64) -> Result<Option<(u64, u64)>> {
        if rec <= self.data_start() {
            return Ok(None);
        }
        let prior_len = self.read_u64(rec - BOUNDARY_TAG_SIZE)?;
        if prior_len == 0 || prior_len > rec - self.data_start() {
            return Err(MapKvError::corrupted(
                rec,
                format!("preceding boundary tag {} is out of range", prior_len),
            ));
        }
        let prior = rec - prior_len;
        match self.check_record(prior)? {
            (RecordKind::Free, len) => Ok(Some((prior, len))),
            (RecordKind::Entry, _) => Ok(None),
        }
    }

    /// Returns the free record that starts where `rec` ends, if any.
    fn free_successor(&self, rec: u64, len: u64) -> Result<Option<(u64, u64)>> {
        let next = rec + len;
        if next >= self.data_end() {
            return Ok(None);
        }
        match self.check_record(next)? {
            (RecordKind::Free, next_len) => Ok(Some((next, next_len))),
            (RecordKind::Entry, _) => Ok(None),
        }
    }

    /// Returns true if an allocation of `len` bytes would succeed once the
    /// entry at `rec` is released.
    ///
    /// Counts the span the released record would coalesce into as well as
    /// every record already on the free list. Nothing is modified.
    pub(crate) fn fits_after_release(&self, rec: u64, len: u64) -> Result<bool> {
        let rec_len = self.expect_record(rec, RecordKind::Entry)?;
        let mut merged = rec_len;
        if let Some((_, next_len)) = self.free_successor(rec, rec_len)? {
            merged += next_len;
        }
        if let Some((_, prior_len)) = self.free_predecessor(rec)? {
            merged += prior_len;
        }
        Ok(merged >= len || self.first_fit(len)?.is_some())
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> Region<B> {
    /// Allocates a record of at least `len` bytes and tags it ENTRY.
    ///
    /// `len` must be a multiple of the record boundary. The returned record
    /// has its tag and length set; its entry fields are left for the caller.
    /// Fails with `ArenaFull` when no free record is large enough, leaving the
    /// arena unchanged.
    pub(crate) fn allocate(&mut self, len: u64) -> Result<u64> {
        debug_assert!(len >= MIN_RECORD_LEN);
        let found = self
            .first_fit(len)?
            .ok_or(MapKvError::ArenaFull { requested: len })?;
        let rec = found.offset;

        self.unlink(rec + OFF_FREE_NODE)?;
        self.set_record_kind(rec, RecordKind::Entry)?;

        if found.len - len < MIN_RECORD_LEN {
            return Ok(rec);
        }

        self.set_record_len(rec, len)?;
        let rest = rec + len;
        self.set_record_kind(rest, RecordKind::Free)?;
        self.set_record_len(rest, found.len - len)?;

        let head = self.free_head();
        if rest + (found.len - len) == self.data_end() {
            self.push_back(head, rest + OFF_FREE_NODE)?;
        } else {
            self.push_front(head, rest + OFF_FREE_NODE)?;
        }
        self.coalesce(rest)?;

        Ok(rec)
    }

    /// Returns the entry record at `rec` to the free list.
    ///
    /// The record is unlinked from its hash bucket and category lists, tagged
    /// FREE, pushed on the free list and merged with free neighbours.
    pub(crate) fn release(&mut self, rec: u64) -> Result<u64> {
        self.expect_record(rec, RecordKind::Entry)?;
        self.unlink(rec + OFF_CATEGORY_NODE)?;
        self.unlink(rec + OFF_BUCKET_NODE)?;

        self.set_record_kind(rec, RecordKind::Free)?;
        let head = self.free_head();
        self.push_front(head, rec + OFF_FREE_NODE)?;
        self.coalesce(rec)
    }

    /// Merges the free record at `rec` with free neighbours on both sides.
    ///
    /// Returns the offset of the merged record, which is `rec` itself unless
    /// it was absorbed into its predecessor.
    pub(crate) fn coalesce(&mut self, rec: u64) -> Result<u64> {
        let mut len = self.expect_record(rec, RecordKind::Free)?;

        if let Some((next, next_len)) = self.free_successor(rec, len)? {
            self.unlink(next + OFF_FREE_NODE)?;
            len += next_len;
            self.set_record_len(rec, len)?;
        }

        if let Some((prior, prior_len)) = self.free_predecessor(rec)? {
            self.unlink(rec + OFF_FREE_NODE)?;
            self.set_record_len(prior, prior_len + len)?;
            return Ok(prior);
        }

        Ok(rec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::test_support::small;

    #[test]
    fn test_allocate_splits_first_record() {
        let mut region = small();
        let start = region.data_start();
        let data_len = region.header().data_len;

        let rec = region.allocate(128).unwrap();
        assert_eq!(rec, start);
        assert_eq!(region.check_record(rec).unwrap(), (RecordKind::Entry, 128));

        let free = region.free_records().unwrap();
        assert_eq!(
            free,
            vec![FreeRecord {
                offset: start + 128,
                len: data_len - 128,
            }]
        );
    }

    #[test]
    fn test_allocate_sequential_records_tile() {
        let mut region = small();
        let start = region.data_start();
        let a = region.allocate(96).unwrap();
        let b = region.allocate(256).unwrap();
        let c = region.allocate(160).unwrap();
        assert_eq!(a, start);
        assert_eq!(b, start + 96);
        assert_eq!(c, start + 96 + 256);
        assert_eq!(region.free_list_len().unwrap(), 1);
    }

    #[test]
    fn test_allocate_whole_record_when_leftover_too_small() {
        let mut region = small();
        let a = region.allocate(256).unwrap();
        let _b = region.allocate(96).unwrap();
        region.release_unlinked_for_test(a);

        // 256 - 192 = 64 < MIN_RECORD_LEN: the whole record is handed out.
        let c = region.allocate(192).unwrap();
        assert_eq!(c, a);
        assert_eq!(region.check_record(c).unwrap(), (RecordKind::Entry, 256));
        assert_eq!(region.free_list_len().unwrap(), 1);
    }

    #[test]
    fn test_allocate_full_fails_without_change() {
        let mut region = small();
        let data_len = region.header().data_len;
        let err = region.allocate(data_len + 32).unwrap_err();
        assert!(matches!(err, MapKvError::ArenaFull { requested } if requested == data_len + 32));
        assert_eq!(region.free_list_len().unwrap(), 1);
        assert_eq!(region.free_records().unwrap()[0].len, data_len);
    }

    #[test]
    fn test_allocate_entire_region() {
        let mut region = small();
        let data_len = region.header().data_len;
        let rec = region.allocate(data_len).unwrap();
        assert_eq!(rec, region.data_start());
        assert_eq!(region.free_list_len().unwrap(), 0);
        assert!(matches!(
            region.allocate(96),
            Err(MapKvError::ArenaFull { .. })
        ));
    }

    #[test]
    fn test_release_coalesces_with_successor() {
        let mut region = small();
        let a = region.allocate(96).unwrap();
        let b = region.allocate(96).unwrap();
        region.release_unlinked_for_test(b);
        // b merged with the trailing free space.
        assert_eq!(region.free_list_len().unwrap(), 1);
        region.release_unlinked_for_test(a);
        assert_eq!(region.free_list_len().unwrap(), 1);
        let free = region.free_records().unwrap();
        assert_eq!(free[0].offset, region.data_start());
        assert_eq!(free[0].len, region.header().data_len);
    }

    #[test]
    fn test_release_coalesces_both_sides() {
        let mut region = small();
        let a = region.allocate(96).unwrap();
        let b = region.allocate(96).unwrap();
        let c = region.allocate(96).unwrap();
        let _d = region.allocate(96).unwrap();

        region.release_unlinked_for_test(a);
        region.release_unlinked_for_test(c);
        assert_eq!(region.free_list_len().unwrap(), 3);

        let merged = region.release_unlinked_for_test(b);
        assert_eq!(merged, a);
        assert_eq!(region.check_record(a).unwrap(), (RecordKind::Free, 288));
        assert_eq!(region.free_list_len().unwrap(), 2);
    }

    #[test]
    fn test_split_remainder_goes_to_head_when_not_at_end() {
        let mut region = small();
        let a = region.allocate(512).unwrap();
        let _b = region.allocate(96).unwrap();
        region.release_unlinked_for_test(a);

        let c = region.allocate(128).unwrap();
        assert_eq!(c, a);
        let free = region.free_records().unwrap();
        assert_eq!(free[0].offset, a + 128);
        assert_eq!(free[0].len, 384);
    }

    #[test]
    fn test_fits_after_release() {
        let mut region = small();
        let data_len = region.header().data_len;
        let a = region.allocate(96).unwrap();
        let b = region.allocate(data_len - 96).unwrap();
        assert_eq!(region.free_list_len().unwrap(), 0);

        assert!(region.fits_after_release(a, 96).unwrap());
        assert!(!region.fits_after_release(a, 128).unwrap());
        assert!(region.fits_after_release(b, data_len - 96).unwrap());

        region.release_unlinked_for_test(b);
        assert!(region.fits_after_release(a, data_len).unwrap());
    }

    #[test]
    fn test_coalesce_detects_corrupt_neighbour() {
        let mut region = small();
        let a = region.allocate(96).unwrap();
        let b = region.allocate(96).unwrap();
        region.write_u64(b, 0x9999).unwrap();

        let head = region.free_head();
        region.set_record_kind(a, RecordKind::Free).unwrap();
        region.push_front(head, a + OFF_FREE_NODE).unwrap();
        assert!(matches!(
            region.coalesce(a),
            Err(MapKvError::Corrupted { .. })
        ));
    }

    impl Region<Vec<u8>> {
        /// Releases an allocated record that was never linked into the
        /// index lists.
        fn release_unlinked_for_test(&mut self, rec: u64) -> u64 {
            let head = self.free_head();
            self.set_record_kind(rec, RecordKind::Free).unwrap();
            self.push_front(head, rec + OFF_FREE_NODE).unwrap();
            self.coalesce(rec).unwrap()
        }
    }
}
