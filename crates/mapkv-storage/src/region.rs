//! Bounds-checked access to an arena image.
//!
//! A `Region` wraps the raw bytes of an arena (the mapped file, or a plain
//! `Vec<u8>` in tests) together with its header geometry. Every read and write
//! goes through an offset accessor that fails with `Corrupted` instead of
//! panicking when a stored offset points outside the image.

use mapkv_common::layout::{ArenaHeader, FREE_HEAD_OFFSET, MAX_CATEGORY};
use mapkv_common::{MapKvError, Result};

use crate::record::{RecordKind, OFF_FREE_NODE};

/// An arena image plus the geometry recorded in its header.
pub(crate) struct Region<B> {
    buf: B,
    header: ArenaHeader,
}

impl<B: AsRef<[u8]>> Region<B> {
    /// Wraps `buf`, which must be exactly `header.file_len` bytes long.
    pub(crate) fn new(buf: B, header: ArenaHeader) -> Self {
        debug_assert_eq!(buf.as_ref().len() as u64, header.file_len);
        Self { buf, header }
    }

    /// Returns the arena geometry.
    #[inline]
    pub(crate) fn header(&self) -> &ArenaHeader {
        &self.header
    }

    /// Returns the raw image.
    #[inline]
    pub(crate) fn bytes(&self) -> &[u8] {
        self.buf.as_ref()
    }

    /// Offset of the first record.
    #[inline]
    pub(crate) fn data_start(&self) -> u64 {
        self.header.data_offset()
    }

    /// Offset one past the last record.
    #[inline]
    pub(crate) fn data_end(&self) -> u64 {
        self.header.data_end()
    }

    /// Offset of the free-list head node.
    #[inline]
    pub(crate) fn free_head(&self) -> u64 {
        FREE_HEAD_OFFSET
    }

    /// Returns `len` bytes at `off`.
    pub(crate) fn slice(&self, off: u64, len: u64) -> Result<&[u8]> {
        let range = self.range(off, len)?;
        Ok(&self.buf.as_ref()[range])
    }

    /// Reads a little-endian u64 at `off`.
    #[inline]
    pub(crate) fn read_u64(&self, off: u64) -> Result<u64> {
        let range = self.range(off, 8)?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.buf.as_ref()[range]);
        Ok(u64::from_le_bytes(bytes))
    }

    /// Reads a little-endian u32 at `off`.
    #[inline]
    pub(crate) fn read_u32(&self, off: u64) -> Result<u32> {
        let range = self.range(off, 4)?;
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.buf.as_ref()[range]);
        Ok(u32::from_le_bytes(bytes))
    }

    /// Converts `off..off + len` into a checked index range.
    pub(crate) fn range(&self, off: u64, len: u64) -> Result<std::ops::Range<usize>> {
        match off.checked_add(len) {
            Some(end) if end <= self.buf.as_ref().len() as u64 => {
                Ok(off as usize..end as usize)
            }
            _ => Err(MapKvError::corrupted(
                off,
                format!("access of {} bytes past the end of the arena", len),
            )),
        }
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> Region<B> {
    /// Returns `len` writable bytes at `off`.
    pub(crate) fn slice_mut(&mut self, off: u64, len: u64) -> Result<&mut [u8]> {
        let range = self.range(off, len)?;
        Ok(&mut self.buf.as_mut()[range])
    }

    /// Writes a little-endian u64 at `off`.
    #[inline]
    pub(crate) fn write_u64(&mut self, off: u64, value: u64) -> Result<()> {
        self.slice_mut(off, 8)?
            .copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Writes a little-endian u32 at `off`.
    #[inline]
    pub(crate) fn write_u32(&mut self, off: u64, value: u32) -> Result<()> {
        self.slice_mut(off, 4)?
            .copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Writes a fresh, empty arena layout over the image.
    ///
    /// Every list head is reset and the data region becomes a single free
    /// record. Used both when a file is created and by `reset`.
    pub(crate) fn format(&mut self) -> Result<()> {
        let header = self.header;
        self.slice_mut(0, ArenaHeader::SIZE as u64)?
            .copy_from_slice(&header.to_bytes());

        self.init_head(FREE_HEAD_OFFSET)?;
        for category in 0..MAX_CATEGORY as u8 {
            self.init_head(ArenaHeader::category_head_offset(category))?;
        }
        for bucket in 0..header.bucket_count {
            self.init_head(header.bucket_offset(bucket))?;
        }

        let first = header.data_offset();
        self.set_record_kind(first, RecordKind::Free)?;
        self.set_record_len(first, header.data_len)?;
        self.push_front(FREE_HEAD_OFFSET, first + OFF_FREE_NODE)?;
        Ok(())
    }
}
