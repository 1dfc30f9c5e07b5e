//! Persisted arena layout for mapkv.
//!
//! An arena file is one contiguous region:
//! ```text
//! +-----------------------------+ 0
//! | Header (4096)               |
//! |   scalar fields (48)        |
//! |   free-list head (16)       |
//! |   category heads (128 x 16) |
//! |   zero padding              |
//! +-----------------------------+ HEADER_SIZE
//! | Hash table                  |
//! |   bucket_count x 16         |
//! +-----------------------------+ data_offset()
//! | Data region (records)       |
//! +-----------------------------+ file_len
//! ```
//!
//! Every link stored in the file is a byte offset from the start of the
//! arena, so the image stays valid wherever it is mapped.

use crate::error::{MapKvError, Result};

/// Page size; arena lengths must be a multiple of it.
pub const PAGE_SIZE: u64 = 4096;

/// Size of the header page.
pub const HEADER_SIZE: u64 = 4096;

/// Smallest arena that can be created (1 MiB).
pub const MIN_FILE_LEN: u64 = 1024 * 1024;

/// Magic value at offset 0 of every arena.
pub const MAGIC_HEADER: u64 = 0x1111_1111;

/// Size of a list node (next + prev offsets).
pub const NODE_SIZE: u64 = 16;

/// Number of categories; valid categories are `0..MAX_CATEGORY`.
pub const MAX_CATEGORY: u32 = 128;

/// Record lengths are multiples of this.
pub const RECORD_BOUNDARY: u64 = 32;

/// Bucket counts are rounded up to a multiple of this.
pub const BUCKET_MULTIPLE: u64 = 256;

/// Offset of the free-list head node within the header.
pub const FREE_HEAD_OFFSET: u64 = 48;

/// Offset of the first category head node within the header.
pub const CATEGORY_HEADS_OFFSET: u64 = 64;

/// Rounds `x` up to `boundary`, which must be a power of two.
#[inline]
pub const fn round_up(x: u64, boundary: u64) -> u64 {
    (x + (boundary - 1)) & !(boundary - 1)
}

/// Scalar fields at the start of the header page.
///
/// Layout (48 bytes):
/// - magic: 8 bytes
/// - file_len: 8 bytes
/// - hdr_len: 8 bytes
/// - hash_tbl_len: 8 bytes
/// - data_len: 8 bytes
/// - bucket_count: 8 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaHeader {
    /// Format identifier.
    pub magic: u64,
    /// Total file length.
    pub file_len: u64,
    /// Length of the header page.
    pub hdr_len: u64,
    /// Length of the hash table region.
    pub hash_tbl_len: u64,
    /// Length of the data region.
    pub data_len: u64,
    /// Number of hash buckets.
    pub bucket_count: u64,
}

impl ArenaHeader {
    /// Size of the serialized scalar fields.
    pub const SIZE: usize = 48;

    /// Computes the header for a new arena of `file_len` bytes.
    ///
    /// The hash table is sized to roughly 1/32 of the file.
    pub fn for_length(file_len: u64) -> Result<Self> {
        if file_len % PAGE_SIZE != 0 {
            return Err(MapKvError::InvalidArenaLength {
                length: file_len,
                reason: format!("not a multiple of the page size {}", PAGE_SIZE),
            });
        }
        if file_len < MIN_FILE_LEN {
            return Err(MapKvError::InvalidArenaLength {
                length: file_len,
                reason: format!("below the minimum of {} bytes", MIN_FILE_LEN),
            });
        }

        let bucket_count = round_up((file_len / 32) / NODE_SIZE, BUCKET_MULTIPLE);
        let hash_tbl_len = bucket_count * NODE_SIZE;

        Ok(Self {
            magic: MAGIC_HEADER,
            file_len,
            hdr_len: HEADER_SIZE,
            hash_tbl_len,
            data_len: file_len - HEADER_SIZE - hash_tbl_len,
            bucket_count,
        })
    }

    /// Validates a header read from a file of `actual_len` bytes.
    pub fn validate(&self, actual_len: u64) -> Result<()> {
        if self.magic != MAGIC_HEADER {
            return Err(MapKvError::BadMagic {
                expected: MAGIC_HEADER,
                actual: self.magic,
            });
        }
        if self.file_len != actual_len {
            return Err(MapKvError::SizeMismatch {
                expected: self.file_len,
                actual: actual_len,
            });
        }
        if self.hdr_len != HEADER_SIZE {
            return Err(MapKvError::corrupted(
                16,
                format!("header length {} should be {}", self.hdr_len, HEADER_SIZE),
            ));
        }
        if self.bucket_count == 0 || self.hash_tbl_len != self.bucket_count * NODE_SIZE {
            return Err(MapKvError::corrupted(
                24,
                format!(
                    "hash table length {} does not match {} buckets",
                    self.hash_tbl_len, self.bucket_count
                ),
            ));
        }
        let regions = self
            .hdr_len
            .checked_add(self.hash_tbl_len)
            .and_then(|n| n.checked_add(self.data_len));
        if regions != Some(self.file_len) {
            return Err(MapKvError::corrupted(
                32,
                "region lengths do not add up to the file length",
            ));
        }
        if self.data_len % RECORD_BOUNDARY != 0 {
            return Err(MapKvError::corrupted(
                32,
                format!("data length {} is not record aligned", self.data_len),
            ));
        }
        Ok(())
    }

    /// Offset of the hash table.
    #[inline]
    pub fn hash_table_offset(&self) -> u64 {
        self.hdr_len
    }

    /// Offset of the head node for `bucket`.
    #[inline]
    pub fn bucket_offset(&self, bucket: u64) -> u64 {
        self.hdr_len + bucket * NODE_SIZE
    }

    /// Offset of the head node for `category`.
    #[inline]
    pub fn category_head_offset(category: u8) -> u64 {
        CATEGORY_HEADS_OFFSET + category as u64 * NODE_SIZE
    }

    /// Offset of the first record.
    #[inline]
    pub fn data_offset(&self) -> u64 {
        self.hdr_len + self.hash_tbl_len
    }

    /// Offset one past the last record.
    #[inline]
    pub fn data_end(&self) -> u64 {
        self.data_offset() + self.data_len
    }

    /// Serializes to bytes.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..8].copy_from_slice(&self.magic.to_le_bytes());
        buf[8..16].copy_from_slice(&self.file_len.to_le_bytes());
        buf[16..24].copy_from_slice(&self.hdr_len.to_le_bytes());
        buf[24..32].copy_from_slice(&self.hash_tbl_len.to_le_bytes());
        buf[32..40].copy_from_slice(&self.data_len.to_le_bytes());
        buf[40..48].copy_from_slice(&self.bucket_count.to_le_bytes());
        buf
    }

    /// Deserializes from bytes.
    ///
    /// `buf` must hold at least [`ArenaHeader::SIZE`] bytes.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(MapKvError::corrupted(
                0,
                format!("header truncated to {} bytes", buf.len()),
            ));
        }
        let field = |i: usize| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&buf[i * 8..i * 8 + 8]);
            u64::from_le_bytes(bytes)
        };
        Ok(Self {
            magic: field(0),
            file_len: field(1),
            hdr_len: field(2),
            hash_tbl_len: field(3),
            data_len: field(4),
            bucket_count: field(5),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_up() {
        assert_eq!(round_up(0, 32), 0);
        assert_eq!(round_up(1, 32), 32);
        assert_eq!(round_up(32, 32), 32);
        assert_eq!(round_up(33, 8), 40);
        assert_eq!(round_up(2049, 256), 2304);
    }

    #[test]
    fn test_header_fields_fit_page() {
        let end = CATEGORY_HEADS_OFFSET + MAX_CATEGORY as u64 * NODE_SIZE;
        assert_eq!(FREE_HEAD_OFFSET, ArenaHeader::SIZE as u64);
        assert_eq!(CATEGORY_HEADS_OFFSET, FREE_HEAD_OFFSET + NODE_SIZE);
        assert_eq!(end, 2112);
        assert!(end <= HEADER_SIZE);
    }

    #[test]
    fn test_for_length_minimum() {
        let header = ArenaHeader::for_length(MIN_FILE_LEN).unwrap();
        assert_eq!(header.magic, MAGIC_HEADER);
        assert_eq!(header.bucket_count, 2048);
        assert_eq!(header.hash_tbl_len, 2048 * NODE_SIZE);
        assert_eq!(header.data_len, MIN_FILE_LEN - HEADER_SIZE - 32768);
        assert_eq!(header.data_end(), MIN_FILE_LEN);
        assert!(header.validate(MIN_FILE_LEN).is_ok());
    }

    #[test]
    fn test_for_length_gigabyte() {
        let gb = 1024 * 1024 * 1024;
        let header = ArenaHeader::for_length(gb).unwrap();
        assert_eq!(header.bucket_count % BUCKET_MULTIPLE, 0);
        assert_eq!(header.hash_tbl_len, gb / 32);
        assert_eq!(header.data_offset(), HEADER_SIZE + gb / 32);
        assert!(header.validate(gb).is_ok());
    }

    #[test]
    fn test_for_length_rejects_unaligned() {
        let err = ArenaHeader::for_length(MIN_FILE_LEN + 100).unwrap_err();
        assert!(matches!(err, MapKvError::InvalidArenaLength { .. }));
    }

    #[test]
    fn test_for_length_rejects_small() {
        let err = ArenaHeader::for_length(64 * 1024).unwrap_err();
        assert!(matches!(err, MapKvError::InvalidArenaLength { length, .. } if length == 65536));
    }

    #[test]
    fn test_header_roundtrip() {
        let header = ArenaHeader::for_length(4 * MIN_FILE_LEN).unwrap();
        let decoded = ArenaHeader::from_bytes(&header.to_bytes()).unwrap();
        assert_eq!(header, decoded);
    }

    #[test]
    fn test_from_bytes_truncated() {
        assert!(ArenaHeader::from_bytes(&[0u8; 20]).is_err());
    }

    #[test]
    fn test_validate_bad_magic() {
        let mut header = ArenaHeader::for_length(MIN_FILE_LEN).unwrap();
        header.magic = 0xdead;
        let err = header.validate(MIN_FILE_LEN).unwrap_err();
        assert!(matches!(err, MapKvError::BadMagic { actual: 0xdead, .. }));
    }

    #[test]
    fn test_validate_size_mismatch() {
        let header = ArenaHeader::for_length(MIN_FILE_LEN).unwrap();
        let err = header.validate(MIN_FILE_LEN * 2).unwrap_err();
        assert!(matches!(err, MapKvError::SizeMismatch { .. }));
    }

    #[test]
    fn test_validate_inconsistent_regions() {
        let mut header = ArenaHeader::for_length(MIN_FILE_LEN).unwrap();
        header.data_len += RECORD_BOUNDARY;
        let err = header.validate(MIN_FILE_LEN).unwrap_err();
        assert!(matches!(err, MapKvError::Corrupted { .. }));
    }

    #[test]
    fn test_category_head_offsets() {
        assert_eq!(ArenaHeader::category_head_offset(0), CATEGORY_HEADS_OFFSET);
        assert_eq!(
            ArenaHeader::category_head_offset(127),
            CATEGORY_HEADS_OFFSET + 127 * NODE_SIZE
        );
    }
}
