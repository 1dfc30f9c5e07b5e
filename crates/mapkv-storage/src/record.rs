//! Record layout within the data region.
//!
//! Record header (64 bytes):
//! ```text
//! +----------------------------+ 0
//! | magic: u64                 |
//! | len: u64                   | 16
//! +----------------------------+
//! | FREE:  free-list node      |
//! | ENTRY: hash-bucket node    | 32
//! | ENTRY: category node       | 48
//! | ENTRY: key_offset: u32     |
//! | ENTRY: value_offset: u32   |
//! | ENTRY: value_len: u32      |
//! | ENTRY: value_capacity: u32 | 64
//! +----------------------------+
//! | ENTRY: key blob            |  category byte, key bytes, NUL, zero pad to 8
//! | ENTRY: value bytes         |  value_capacity bytes reserved
//! | ...                        |
//! | len: u64 (boundary tag)    |  last 8 bytes of the record
//! +----------------------------+
//! ```

use mapkv_common::layout::{round_up, RECORD_BOUNDARY};
use mapkv_common::{MapKvError, Result};

use crate::region::Region;

/// Magic value of a free record.
pub const MAGIC_RECORD_FREE: u64 = 0x2222_2222;

/// Magic value of an entry record.
pub const MAGIC_RECORD_ENTRY: u64 = 0x3333_3333;

/// Size of the fixed record header.
pub const RECORD_HEADER_SIZE: u64 = 64;

/// Size of the trailing boundary tag.
pub const BOUNDARY_TAG_SIZE: u64 = 8;

/// Smallest record the allocator will create.
pub const MIN_RECORD_LEN: u64 = RECORD_HEADER_SIZE + RECORD_BOUNDARY;

pub(crate) const OFF_MAGIC: u64 = 0;
pub(crate) const OFF_LEN: u64 = 8;
pub(crate) const OFF_FREE_NODE: u64 = 16;
pub(crate) const OFF_BUCKET_NODE: u64 = 16;
pub(crate) const OFF_CATEGORY_NODE: u64 = 32;
const OFF_KEY_OFFSET: u64 = 48;
const OFF_VALUE_OFFSET: u64 = 52;
const OFF_VALUE_LEN: u64 = 56;
const OFF_VALUE_CAPACITY: u64 = 60;

/// The two record variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Free,
    Entry,
}

impl RecordKind {
    fn magic(self) -> u64 {
        match self {
            RecordKind::Free => MAGIC_RECORD_FREE,
            RecordKind::Entry => MAGIC_RECORD_ENTRY,
        }
    }
}

/// Entry fields following the list nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EntryMeta {
    pub(crate) key_offset: u32,
    pub(crate) value_offset: u32,
    pub(crate) value_len: u32,
    pub(crate) value_capacity: u32,
}

/// Sizing of a new entry record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EntryLayout {
    /// Bytes reserved for the key blob.
    pub(crate) key_blob_len: u64,
    /// Total record length, a multiple of the record boundary.
    pub(crate) record_len: u64,
    /// Value bytes the record can hold, including rounding slack.
    pub(crate) value_capacity: u64,
}

impl EntryLayout {
    /// Computes the record needed for a key of `key_len` bytes and a value of
    /// `value_len` bytes.
    pub(crate) fn new(key_len: usize, value_len: usize) -> Result<Self> {
        let key_blob_len = round_up(1 + key_len as u64 + 1, 8);
        if RECORD_HEADER_SIZE + key_blob_len > u32::MAX as u64 {
            return Err(MapKvError::InvalidKey(format!(
                "key of {} bytes is too long",
                key_len
            )));
        }
        let min_len = RECORD_HEADER_SIZE + key_blob_len + value_len as u64 + BOUNDARY_TAG_SIZE;
        let record_len = round_up(min_len, RECORD_BOUNDARY);
        let value_capacity = value_len as u64 + (record_len - min_len);
        if value_capacity > u32::MAX as u64 {
            return Err(MapKvError::InvalidValue(format!(
                "value of {} bytes is too long",
                value_len
            )));
        }
        Ok(Self {
            key_blob_len,
            record_len,
            value_capacity,
        })
    }
}

/// Record offset owning the free-list node at `node`.
#[inline]
pub(crate) fn record_of_free_node(node: u64) -> u64 {
    node.wrapping_sub(OFF_FREE_NODE)
}

/// Record offset owning the hash-bucket node at `node`.
#[inline]
pub(crate) fn record_of_bucket_node(node: u64) -> u64 {
    node.wrapping_sub(OFF_BUCKET_NODE)
}

/// Record offset owning the category node at `node`.
#[inline]
pub(crate) fn record_of_category_node(node: u64) -> u64 {
    node.wrapping_sub(OFF_CATEGORY_NODE)
}

impl<B: AsRef<[u8]>> Region<B> {
    /// Reads the record tag at `rec`.
    pub(crate) fn record_kind(&self, rec: u64) -> Result<RecordKind> {
        match self.read_u64(rec + OFF_MAGIC)? {
            MAGIC_RECORD_FREE => Ok(RecordKind::Free),
            MAGIC_RECORD_ENTRY => Ok(RecordKind::Entry),
            other => Err(MapKvError::corrupted(
                rec,
                format!("invalid record magic {:#x}", other),
            )),
        }
    }

    /// Validates the record at `rec` and returns its tag and length.
    ///
    /// Checks that the record lies inside the data region, that its length is
    /// aligned and at least the minimum, and that the boundary tag matches.
    pub(crate) fn check_record(&self, rec: u64) -> Result<(RecordKind, u64)> {
        let (start, end) = (self.data_start(), self.data_end());
        if rec < start || rec >= end || (rec - start) % RECORD_BOUNDARY != 0 {
            return Err(MapKvError::corrupted(rec, "record offset outside the data region"));
        }
        let kind = self.record_kind(rec)?;
        let len = self.read_u64(rec + OFF_LEN)?;
        if len < MIN_RECORD_LEN || len % RECORD_BOUNDARY != 0 || len > end - rec {
            return Err(MapKvError::corrupted(rec, format!("invalid record length {}", len)));
        }
        let tag = self.read_u64(rec + len - BOUNDARY_TAG_SIZE)?;
        if tag != len {
            return Err(MapKvError::corrupted(
                rec,
                format!("boundary tag {} does not match length {}", tag, len),
            ));
        }
        Ok((kind, len))
    }

    /// Validates the record at `rec` and requires it to have tag `kind`.
    pub(crate) fn expect_record(&self, rec: u64, kind: RecordKind) -> Result<u64> {
        let (found, len) = self.check_record(rec)?;
        if found != kind {
            return Err(MapKvError::corrupted(
                rec,
                format!("expected {:?} record, found {:?}", kind, found),
            ));
        }
        Ok(len)
    }

    /// Reads and validates the entry fields of the entry record at `rec`.
    pub(crate) fn entry_meta(&self, rec: u64) -> Result<EntryMeta> {
        let len = self.expect_record(rec, RecordKind::Entry)?;
        let meta = EntryMeta {
            key_offset: self.read_u32(rec + OFF_KEY_OFFSET)?,
            value_offset: self.read_u32(rec + OFF_VALUE_OFFSET)?,
            value_len: self.read_u32(rec + OFF_VALUE_LEN)?,
            value_capacity: self.read_u32(rec + OFF_VALUE_CAPACITY)?,
        };
        let value_end = meta.value_offset as u64 + meta.value_capacity as u64;
        if meta.key_offset as u64 != RECORD_HEADER_SIZE
            || meta.value_offset < meta.key_offset + 2
            || meta.value_len > meta.value_capacity
            || value_end + BOUNDARY_TAG_SIZE > len
        {
            return Err(MapKvError::corrupted(rec, "entry offsets exceed the record"));
        }
        Ok(meta)
    }

    /// Returns the category and key stored in the entry at `rec`.
    pub(crate) fn entry_key(&self, rec: u64) -> Result<(u8, &str)> {
        let meta = self.entry_meta(rec)?;
        self.key_from_meta(rec, &meta)
    }

    fn key_from_meta(&self, rec: u64, meta: &EntryMeta) -> Result<(u8, &str)> {
        let blob = self.slice(
            rec + meta.key_offset as u64,
            (meta.value_offset - meta.key_offset) as u64,
        )?;
        let key_bytes = &blob[1..];
        let nul = key_bytes
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| MapKvError::corrupted(rec, "key is not NUL terminated"))?;
        let key = std::str::from_utf8(&key_bytes[..nul])
            .map_err(|_| MapKvError::corrupted(rec, "key is not valid UTF-8"))?;
        Ok((blob[0], key))
    }

    /// Returns the key and value stored in the entry at `rec`.
    pub(crate) fn entry_key_value(&self, rec: u64) -> Result<(u8, &str, &[u8])> {
        let meta = self.entry_meta(rec)?;
        let (category, key) = self.key_from_meta(rec, &meta)?;
        let value = self.slice(rec + meta.value_offset as u64, meta.value_len as u64)?;
        Ok((category, key, value))
    }

    /// Returns the absolute byte range of the value stored at `rec`.
    pub(crate) fn entry_value_range(&self, rec: u64) -> Result<std::ops::Range<usize>> {
        let meta = self.entry_meta(rec)?;
        self.range(rec + meta.value_offset as u64, meta.value_len as u64)
    }

    /// Returns true when the entry at `rec` holds `category`/`key`.
    pub(crate) fn entry_matches(&self, rec: u64, category: u8, key: &str) -> Result<bool> {
        let (stored_category, stored_key) = self.entry_key(rec)?;
        Ok(stored_category == category && stored_key == key)
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> Region<B> {
    /// Sets the tag of the record at `rec`.
    pub(crate) fn set_record_kind(&mut self, rec: u64, kind: RecordKind) -> Result<()> {
        self.write_u64(rec + OFF_MAGIC, kind.magic())
    }

    /// Sets the length of the record at `rec` at both ends.
    pub(crate) fn set_record_len(&mut self, rec: u64, len: u64) -> Result<()> {
        self.write_u64(rec + OFF_LEN, len)?;
        self.write_u64(rec + len - BOUNDARY_TAG_SIZE, len)
    }

    /// Fills the entry fields, key blob and value of a freshly allocated
    /// entry record. List nodes are left for the caller to link.
    pub(crate) fn write_entry(
        &mut self,
        rec: u64,
        layout: &EntryLayout,
        category: u8,
        key: &str,
        value: &[u8],
    ) -> Result<()> {
        let key_offset = RECORD_HEADER_SIZE;
        let value_offset = key_offset + layout.key_blob_len;

        self.write_u32(rec + OFF_KEY_OFFSET, key_offset as u32)?;
        self.write_u32(rec + OFF_VALUE_OFFSET, value_offset as u32)?;
        self.write_u32(rec + OFF_VALUE_LEN, value.len() as u32)?;
        self.write_u32(rec + OFF_VALUE_CAPACITY, layout.value_capacity as u32)?;

        let blob = self.slice_mut(rec + key_offset, layout.key_blob_len)?;
        blob.fill(0);
        blob[0] = category;
        blob[1..1 + key.len()].copy_from_slice(key.as_bytes());

        self.slice_mut(rec + value_offset, value.len() as u64)?
            .copy_from_slice(value);
        Ok(())
    }

    /// Overwrites the value of the entry at `rec` in place.
    ///
    /// The caller guarantees `value` fits the entry's capacity. The capacity
    /// itself is left unchanged.
    pub(crate) fn overwrite_value(&mut self, rec: u64, value: &[u8]) -> Result<()> {
        let meta = self.entry_meta(rec)?;
        if value.len() as u64 > meta.value_capacity as u64 {
            return Err(MapKvError::corrupted(rec, "overwrite exceeds value capacity"));
        }
        self.slice_mut(rec + meta.value_offset as u64, value.len() as u64)?
            .copy_from_slice(value);
        self.write_u32(rec + OFF_VALUE_LEN, value.len() as u32)
    }
}
