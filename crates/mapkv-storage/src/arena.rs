//! Arena handle: file management, locking and the public operations.
//!
//! An `Arena` owns the mapping of one arena file and the reader/writer lock
//! guarding it. Lookups and enumeration take the read lock; upsert, remove
//! and reset take the write lock. Each operation holds the lock for exactly
//! its own duration, except `get_ref`, whose returned view keeps the read
//! lock until dropped.
//!
//! Corruption found by any operation poisons the arena: the failing call
//! returns `Corrupted` and every later call returns `Poisoned` until the
//! arena is reset.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use memmap2::{MmapMut, MmapOptions};
use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, error, info};

use mapkv_common::layout::{ArenaHeader, HEADER_SIZE, MAX_CATEGORY};
use mapkv_common::{ArenaConfig, MapKvError, Result};

use crate::allocator::FreeRecord;
use crate::category::check_category;
use crate::integrity::IntegrityReport;
use crate::ops::{check_key, check_value, PutOutcome};
use crate::region::Region;

/// A memory-mapped key/value arena.
pub struct Arena {
    /// Path of the backing file.
    path: PathBuf,
    /// Settings the arena was opened with.
    config: ArenaConfig,
    /// Geometry read from the file header. Never changes after creation.
    header: ArenaHeader,
    /// The whole file, mapped read/write.
    map: RwLock<MmapMut>,
    /// Set once corruption has been detected.
    poisoned: AtomicBool,
}

/// Zero-copy view of a stored value.
///
/// Holds the arena's read lock until dropped, so writers block while any
/// view is alive. Do not call back into the same arena from the holding
/// thread: the lock is fair, so even a nested read waits behind a queued
/// writer and deadlocks.
pub struct ValueRef<'a> {
    bytes: MappedRwLockReadGuard<'a, [u8]>,
}

impl ValueRef<'_> {
    /// Copies the value into an owned buffer.
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.bytes)
    }
}

impl Deref for ValueRef<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl AsRef<[u8]> for ValueRef<'_> {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for ValueRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueRef")
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Entry count of one category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryStats {
    pub category: u8,
    pub entries: usize,
}

/// Usage summary of an arena.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArenaStats {
    /// Total file length.
    pub file_len: u64,
    /// Length of the data region.
    pub data_len: u64,
    /// Number of hash buckets.
    pub bucket_count: u64,
    /// Live entries across all categories.
    pub entries: usize,
    /// Non-empty categories, ascending.
    pub categories: Vec<CategoryStats>,
    /// Records on the free list.
    pub free_records: usize,
    /// Bytes on the free list.
    pub free_bytes: u64,
    /// Largest free record.
    pub largest_free: u64,
}

impl Arena {
    /// Opens the arena described by `config`, creating it if allowed.
    pub fn open(config: ArenaConfig) -> Result<Self> {
        config.validate()?;
        let path = config.path.clone();

        match fs::metadata(&path) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if !config.create_if_missing {
                    return Err(MapKvError::ArenaNotFound { path });
                }
                config.validate_length()?;
                Self::create_file(&path, config.length)?;
            }
            Err(e) => return Err(e.into()),
        }

        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
        let header = Self::read_header(&mut file)?;

        // SAFETY: the mapping is only accessed through `map`, under its lock.
        // Concurrent modification of the file by another process is outside
        // the engine's contract.
        let map = unsafe {
            MmapOptions::new()
                .len(header.file_len as usize)
                .map_mut(&file)?
        };

        info!(
            path = %path.display(),
            size_mb = header.file_len / (1024 * 1024),
            buckets = header.bucket_count,
            "Opened arena"
        );

        Ok(Self {
            path,
            config,
            header,
            map: RwLock::new(map),
            poisoned: AtomicBool::new(false),
        })
    }

    /// Opens the arena at `path`, creating a `length`-byte arena when the file
    /// is missing and `create` is set.
    pub fn open_or_create(path: impl AsRef<Path>, create: bool, length: u64) -> Result<Self> {
        Self::open(
            ArenaConfig::new(path.as_ref())
                .with_create(create)
                .with_length(length),
        )
    }

    /// Creates and formats a new arena file. Fails if the file exists.
    fn create_file(path: &Path, length: u64) -> Result<()> {
        let header = ArenaHeader::for_length(length)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        let formatted = Self::format_file(&file, header);
        if let Err(e) = formatted {
            let _ = fs::remove_file(path);
            return Err(e);
        }

        info!(
            path = %path.display(),
            size_mb = length / (1024 * 1024),
            buckets = header.bucket_count,
            "Created arena"
        );
        Ok(())
    }

    fn format_file(file: &File, header: ArenaHeader) -> Result<()> {
        file.set_len(header.file_len)?;
        // SAFETY: the file was just created exclusively and is not yet shared.
        let mut map = unsafe { MmapOptions::new().map_mut(file)? };
        Region::new(&mut map[..], header).format()?;
        map.flush()?;
        Ok(())
    }

    /// Reads and validates the header of an open arena file.
    fn read_header(file: &mut File) -> Result<ArenaHeader> {
        let actual_len = file.metadata()?.len();
        if actual_len < HEADER_SIZE {
            return Err(MapKvError::corrupted(
                0,
                format!("file of {} bytes is too short for a header", actual_len),
            ));
        }
        let mut buf = [0u8; ArenaHeader::SIZE];
        file.read_exact(&mut buf)?;
        let header = ArenaHeader::from_bytes(&buf)?;
        header.validate(actual_len)?;
        Ok(header)
    }

    /// Returns the path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the arena geometry.
    pub fn header(&self) -> &ArenaHeader {
        &self.header
    }

    /// Returns the number of hash buckets.
    pub fn bucket_count(&self) -> u64 {
        self.header.bucket_count
    }

    /// Returns true once corruption has been detected.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    // -------------------------------------------------------------------
    // Lookup
    // -------------------------------------------------------------------

    /// Returns a copy of the value stored under `category`/`key`.
    pub fn get(&self, category: u8, key: &str) -> Result<Option<Bytes>> {
        Ok(self.get_ref(category, key)?.map(|value| value.to_bytes()))
    }

    /// Returns a view of the value stored under `category`/`key`.
    ///
    /// The view holds the read lock; drop it before calling any other
    /// operation on the same arena from this thread.
    pub fn get_ref(&self, category: u8, key: &str) -> Result<Option<ValueRef<'_>>> {
        check_category(category)?;
        check_key(key)?;
        let guard = self.read()?;
        let found = Region::new(&guard[..], self.header).lookup(category, key);
        match self.guard_poison(found)? {
            Some(range) => Ok(Some(ValueRef {
                bytes: RwLockReadGuard::map(guard, |map| &map[range]),
            })),
            None => Ok(None),
        }
    }

    /// Returns true if `category`/`key` has an entry.
    pub fn contains(&self, category: u8, key: &str) -> Result<bool> {
        check_category(category)?;
        check_key(key)?;
        self.inspect(|region| Ok(region.find(category, key)?.is_some()))
    }

    /// Calls `visit` with the key and value of every entry in `category`, in
    /// insertion order. Returns the number of entries visited.
    ///
    /// The read lock is held for the whole walk.
    pub fn for_each_in_category<F>(&self, category: u8, visit: F) -> Result<usize>
    where
        F: FnMut(&str, &[u8]),
    {
        check_category(category)?;
        self.inspect(|region| region.for_each_entry(category, visit))
    }

    // -------------------------------------------------------------------
    // Mutation
    // -------------------------------------------------------------------

    /// Stores `value` under `category`/`key`, replacing any previous value.
    ///
    /// Fails with `ArenaFull` when no free record can hold the entry; the
    /// arena, including any previous value, is then unchanged.
    pub fn upsert(&self, category: u8, key: &str, value: &[u8]) -> Result<()> {
        check_category(category)?;
        check_key(key)?;
        check_value(value)?;

        let outcome = self.mutate(|region| region.put(category, key, value));
        match &outcome {
            Ok(PutOutcome::Relocated) => {
                debug!(category, key, len = value.len(), "Entry outgrew its record");
            }
            Err(MapKvError::ArenaFull { requested }) => {
                debug!(category, key, requested, "Arena full");
            }
            _ => {}
        }
        outcome.map(|_| ())
    }

    /// Removes the entry for `category`/`key`. Returns false if there was none.
    pub fn remove(&self, category: u8, key: &str) -> Result<bool> {
        check_category(category)?;
        check_key(key)?;
        self.mutate(|region| region.delete(category, key))
    }

    /// Erases every entry, leaving one free record spanning the data region.
    ///
    /// Also clears the poisoned state.
    pub fn reset(&self) -> Result<()> {
        let mut guard = self.map.write();
        Region::new(&mut guard[..], self.header).format()?;
        if self.config.flush_on_write {
            guard.flush()?;
        }
        self.poisoned.store(false, Ordering::Release);
        info!(path = %self.path.display(), "Reset arena");
        Ok(())
    }

    /// Writes dirty pages of the mapping back to the file.
    pub fn flush(&self) -> Result<()> {
        self.map.read().flush()?;
        Ok(())
    }

    // -------------------------------------------------------------------
    // Numeric helpers
    // -------------------------------------------------------------------

    /// Stores `value` as decimal text.
    pub fn set_num(&self, category: u8, key: &str, value: f64) -> Result<()> {
        self.upsert(category, key, value.to_string().as_bytes())
    }

    /// Reads a number stored with [`Arena::set_num`].
    ///
    /// When the key is absent, `default` is stored and returned. The miss and
    /// the insert happen under one write lock, so a value stored concurrently
    /// is returned rather than overwritten.
    pub fn get_num(&self, category: u8, key: &str, default: f64) -> Result<f64> {
        if let Some(text) = self.get(category, key)? {
            return parse_num(key, &text);
        }

        let default_text = default.to_string();
        let stored = self.mutate(|region| match region.lookup(category, key)? {
            Some(range) => Ok(Some(region.bytes()[range].to_vec())),
            None => {
                region.put(category, key, default_text.as_bytes())?;
                Ok(None)
            }
        })?;
        match stored {
            Some(text) => parse_num(key, &text),
            None => Ok(default),
        }
    }

    // -------------------------------------------------------------------
    // Debug and administration
    // -------------------------------------------------------------------

    /// Returns the records on the free list, in list order.
    pub fn free_list(&self) -> Result<Vec<FreeRecord>> {
        self.inspect(|region| region.free_records())
    }

    /// Returns the number of records on the free list.
    pub fn free_list_len(&self) -> Result<usize> {
        self.inspect(|region| region.free_list_len())
    }

    /// Returns a usage summary.
    pub fn stats(&self) -> Result<ArenaStats> {
        self.inspect(|region| {
            let mut categories = Vec::new();
            for category in 0..MAX_CATEGORY as u8 {
                let entries = region.category_len(category)?;
                if entries > 0 {
                    categories.push(CategoryStats { category, entries });
                }
            }
            let free = region.free_records()?;
            let header = region.header();
            Ok(ArenaStats {
                file_len: header.file_len,
                data_len: header.data_len,
                bucket_count: header.bucket_count,
                entries: categories.iter().map(|c| c.entries).sum(),
                categories,
                free_records: free.len(),
                free_bytes: free.iter().map(|r| r.len).sum(),
                largest_free: free.iter().map(|r| r.len).max().unwrap_or(0),
            })
        })
    }

    /// Verifies every structural invariant. Poisons the arena on failure.
    pub fn check_integrity(&self) -> Result<IntegrityReport> {
        self.inspect(|region| region.check_integrity())
    }

    /// Writes every entry, grouped by category, followed by the free list.
    pub fn dump<W: io::Write>(&self, out: &mut W) -> Result<()> {
        self.inspect(|region| {
            for category in 0..MAX_CATEGORY as u8 {
                let mut lines = Vec::new();
                region.for_each_entry(category, |key, value| {
                    lines.push(format!(
                        "  {:<32} = {:<39}  len={}",
                        preview_key(key),
                        preview_value(value),
                        value.len()
                    ));
                })?;
                if lines.is_empty() {
                    continue;
                }
                writeln!(out, "CATEGORY = {}", category)?;
                for line in lines {
                    writeln!(out, "{}", line)?;
                }
            }
            writeln!(out)?;

            let free = region.free_records()?;
            writeln!(out, "FREE LIST ...")?;
            for record in &free {
                writeln!(
                    out,
                    "  offset = {:#x}   len = {}  {} MB",
                    record.offset,
                    record.len,
                    record.len / (1024 * 1024)
                )?;
            }
            writeln!(out, "  num_entries = {}", free.len())?;
            Ok(())
        })
    }

    // -------------------------------------------------------------------
    // Locking
    // -------------------------------------------------------------------

    fn read(&self) -> Result<RwLockReadGuard<'_, MmapMut>> {
        let guard = self.map.read();
        if self.is_poisoned() {
            return Err(MapKvError::Poisoned);
        }
        Ok(guard)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MmapMut>> {
        let guard = self.map.write();
        if self.is_poisoned() {
            return Err(MapKvError::Poisoned);
        }
        Ok(guard)
    }

    /// Runs a read-only operation under the read lock.
    fn inspect<T>(&self, op: impl FnOnce(&Region<&[u8]>) -> Result<T>) -> Result<T> {
        let guard = self.read()?;
        let result = op(&Region::new(&guard[..], self.header));
        self.guard_poison(result)
    }

    /// Runs a mutating operation under the write lock, then applies the
    /// configured verification and flush.
    fn mutate<T>(&self, op: impl FnOnce(&mut Region<&mut [u8]>) -> Result<T>) -> Result<T> {
        let mut guard = self.write()?;
        let result = {
            let mut region = Region::new(&mut guard[..], self.header);
            op(&mut region).and_then(|value| {
                if self.config.verify_writes {
                    region.check_integrity()?;
                }
                Ok(value)
            })
        };
        let result = self.guard_poison(result)?;
        if self.config.flush_on_write {
            guard.flush()?;
        }
        Ok(result)
    }

    /// Poisons the arena if `result` reports corruption.
    fn guard_poison<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_corruption() && !self.poisoned.swap(true, Ordering::AcqRel) {
                error!(path = %self.path.display(), error = %e, "Arena poisoned");
            }
        }
        result
    }
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("path", &self.path)
            .field("header", &self.header)
            .field("poisoned", &self.is_poisoned())
            .finish()
    }
}

fn parse_num(key: &str, stored: &[u8]) -> Result<f64> {
    let malformed = || MapKvError::MalformedNumber {
        key: key.to_string(),
        text: String::from_utf8_lossy(stored).into_owned(),
    };
    std::str::from_utf8(stored)
        .map_err(|_| malformed())?
        .trim_end_matches('\0')
        .trim()
        .parse::<f64>()
        .map_err(|_| malformed())
}

/// First 32 characters of `key`, newlines shown as '.'.
fn preview_key(key: &str) -> String {
    key.chars()
        .take(32)
        .map(|c| if c == '\n' { '.' } else { c })
        .collect()
}

/// First 39 bytes of `value`, non-printables shown as '.'.
fn preview_value(value: &[u8]) -> String {
    let value = value.strip_suffix(&[0]).unwrap_or(value);
    value
        .iter()
        .take(39)
        .map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mapkv_common::{MIN_FILE_LEN, PAGE_SIZE};
    use std::sync::{Arc, Barrier};
    use std::thread;
    use tempfile::tempdir;

    fn create_test_arena() -> (Arena, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = ArenaConfig::new(dir.path().join("arena.dat"))
            .with_length(MIN_FILE_LEN)
            .with_verify_writes(true);
        (Arena::open(config).unwrap(), dir)
    }

    #[test]
    fn test_create_and_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("arena.dat");
        {
            let arena = Arena::open_or_create(&path, true, MIN_FILE_LEN).unwrap();
            arena.upsert(1, "key_0", b"value_0").unwrap();
            arena.flush().unwrap();
        }
        assert_eq!(fs::metadata(&path).unwrap().len(), MIN_FILE_LEN);

        let arena = Arena::open_or_create(&path, false, 0).unwrap();
        assert_eq!(arena.get(1, "key_0").unwrap().unwrap(), &b"value_0"[..]);
        assert_eq!(arena.bucket_count(), 2048);
        arena.check_integrity().unwrap();
    }

    #[test]
    fn test_open_missing_without_create() {
        let dir = tempdir().unwrap();
        let err = Arena::open_or_create(dir.path().join("nope.dat"), false, MIN_FILE_LEN)
            .unwrap_err();
        assert!(matches!(err, MapKvError::ArenaNotFound { .. }));
    }

    #[test]
    fn test_create_rejects_bad_length() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.dat");
        let err = Arena::open_or_create(&path, true, MIN_FILE_LEN + 512).unwrap_err();
        assert!(matches!(err, MapKvError::InvalidArenaLength { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn test_existing_arena_ignores_invalid_length() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("arena.dat");
        {
            let arena = Arena::open_or_create(&path, true, MIN_FILE_LEN).unwrap();
            arena.upsert(1, "kept", b"yes").unwrap();
            arena.flush().unwrap();
        }

        for length in [0, MIN_FILE_LEN + 512, PAGE_SIZE] {
            let arena = Arena::open_or_create(&path, true, length).unwrap();
            assert_eq!(arena.header().file_len, MIN_FILE_LEN);
            assert_eq!(arena.get(1, "kept").unwrap().unwrap(), &b"yes"[..]);
        }
    }

    #[test]
    fn test_open_rejects_foreign_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("foreign.dat");
        fs::write(&path, vec![0xABu8; 8192]).unwrap();
        let err = Arena::open_or_create(&path, true, MIN_FILE_LEN).unwrap_err();
        assert!(matches!(err, MapKvError::BadMagic { .. }));
    }

    #[test]
    fn test_open_rejects_short_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("short.dat");
        fs::write(&path, b"tiny").unwrap();
        let err = Arena::open_or_create(&path, false, 0).unwrap_err();
        assert!(matches!(err, MapKvError::Corrupted { .. }));
    }

    #[test]
    fn test_open_rejects_resized_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("arena.dat");
        drop(Arena::open_or_create(&path, true, MIN_FILE_LEN).unwrap());

        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(MIN_FILE_LEN * 2).unwrap();
        drop(file);

        let err = Arena::open_or_create(&path, false, 0).unwrap_err();
        assert!(matches!(
            err,
            MapKvError::SizeMismatch { expected, actual }
                if expected == MIN_FILE_LEN && actual == MIN_FILE_LEN * 2
        ));
    }

    #[test]
    fn test_argument_errors_have_no_side_effects() {
        let (arena, _dir) = create_test_arena();
        assert!(matches!(
            arena.upsert(128, "k", b"v"),
            Err(MapKvError::InvalidCategory { .. })
        ));
        assert!(matches!(
            arena.upsert(1, "k\0", b"v"),
            Err(MapKvError::InvalidKey(_))
        ));
        assert!(matches!(
            arena.upsert(1, "k", b""),
            Err(MapKvError::InvalidValue(_))
        ));
        assert!(arena.get(200, "k").is_err());
        assert!(arena.remove(200, "k").is_err());
        assert!(arena.for_each_in_category(128, |_, _| {}).is_err());
        assert_eq!(arena.stats().unwrap().entries, 0);
        assert!(!arena.is_poisoned());
    }

    #[test]
    fn test_get_ref_view() {
        let (arena, _dir) = create_test_arena();
        arena.upsert(2, "blob", b"\x00\x01\x02").unwrap();
        {
            let view = arena.get_ref(2, "blob").unwrap().unwrap();
            assert_eq!(&*view, b"\x00\x01\x02");
            assert_eq!(view.to_bytes(), Bytes::from_static(b"\x00\x01\x02"));
            assert_eq!(format!("{:?}", view), "ValueRef { len: 3 }");
        }
        // The view is gone, so writers proceed.
        assert!(arena.remove(2, "blob").unwrap());
        assert!(arena.get_ref(2, "blob").unwrap().is_none());
    }

    #[test]
    fn test_numeric_helpers() {
        let (arena, _dir) = create_test_arena();
        assert_eq!(arena.get_num(0, "volume", 20.0).unwrap(), 20.0);
        assert_eq!(arena.get(0, "volume").unwrap().unwrap(), &b"20"[..]);

        arena.set_num(0, "led_scale_factor", 3.25).unwrap();
        assert_eq!(arena.get_num(0, "led_scale_factor", 1.0).unwrap(), 3.25);

        arena.upsert(0, "brightness", b"60\0").unwrap();
        assert_eq!(arena.get_num(0, "brightness", 0.0).unwrap(), 60.0);

        arena.upsert(0, "broken", b"sixty").unwrap();
        assert!(matches!(
            arena.get_num(0, "broken", 0.0),
            Err(MapKvError::MalformedNumber { .. })
        ));
    }

    #[test]
    fn test_get_num_default_is_stored_once() {
        let (arena, _dir) = create_test_arena();
        let arena = Arc::new(arena);
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let arena = Arc::clone(&arena);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    arena.get_num(0, "volume", t as f64).unwrap()
                })
            })
            .collect();
        let seen: Vec<f64> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        // Exactly one default wins and every caller sees it.
        let stored = arena.get_num(0, "volume", -1.0).unwrap();
        assert!((0.0..8.0).contains(&stored));
        assert!(seen.iter().all(|&v| v == stored), "seen {:?}", seen);
    }

    #[test]
    fn test_stats_and_free_list() {
        let (arena, _dir) = create_test_arena();
        let data_len = arena.header().data_len;
        for i in 0..5 {
            arena.upsert(1, &format!("key_{}", i), b"value").unwrap();
        }
        arena.upsert(7, "song", b"3.5").unwrap();

        let stats = arena.stats().unwrap();
        assert_eq!(stats.entries, 6);
        assert_eq!(
            stats.categories,
            vec![
                CategoryStats { category: 1, entries: 5 },
                CategoryStats { category: 7, entries: 1 },
            ]
        );
        assert_eq!(stats.free_records, 1);
        assert_eq!(stats.free_bytes, data_len - 6 * 96);
        assert_eq!(stats.largest_free, stats.free_bytes);
        assert_eq!(arena.free_list_len().unwrap(), 1);
        assert_eq!(arena.free_list().unwrap()[0].len, stats.free_bytes);
    }

    #[test]
    fn test_dump_format() {
        let (arena, _dir) = create_test_arena();
        arena.upsert(1, "line\nbreak", b"hello\x07world\0").unwrap();
        arena.upsert(3, "other", b"x").unwrap();

        let mut out = Vec::new();
        arena.dump(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("CATEGORY = 1\n"));
        assert!(text.contains("CATEGORY = 3\n"));
        assert!(!text.contains("CATEGORY = 2\n"));
        assert!(text.contains("line.break"));
        assert!(text.contains("hello.world"));
        assert!(text.contains("len=12"));
        assert!(text.contains("FREE LIST ..."));
        assert!(text.contains("num_entries = 1"));
    }

    #[test]
    fn test_corruption_poisons_until_reset() {
        let (arena, _dir) = create_test_arena();
        arena.upsert(1, "a", b"1").unwrap();
        let rec = arena.header().data_offset();
        {
            let mut map = arena.map.write();
            map[rec as usize..rec as usize + 8].copy_from_slice(&0xBADu64.to_le_bytes());
        }

        assert!(matches!(
            arena.get(1, "a"),
            Err(MapKvError::Corrupted { .. })
        ));
        assert!(arena.is_poisoned());
        assert!(matches!(arena.get(1, "a"), Err(MapKvError::Poisoned)));
        assert!(matches!(arena.upsert(1, "b", b"2"), Err(MapKvError::Poisoned)));

        arena.reset().unwrap();
        assert!(!arena.is_poisoned());
        assert!(arena.get(1, "a").unwrap().is_none());
        arena.check_integrity().unwrap();
    }

    #[test]
    fn test_reset_erases_everything() {
        let (arena, _dir) = create_test_arena();
        for i in 0..50 {
            arena.upsert((i % 4) as u8, &format!("k{}", i), b"v").unwrap();
        }
        arena.reset().unwrap();
        let stats = arena.stats().unwrap();
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.free_records, 1);
        assert_eq!(stats.free_bytes, arena.header().data_len);
    }

    #[test]
    fn test_flush_on_write() {
        let dir = tempdir().unwrap();
        let config = ArenaConfig::new(dir.path().join("arena.dat"))
            .with_length(MIN_FILE_LEN)
            .with_flush_on_write(true);
        let arena = Arena::open(config).unwrap();
        arena.upsert(5, "durable", b"yes").unwrap();
        assert!(arena.remove(5, "durable").unwrap());
    }

    #[test]
    fn test_preview_helpers() {
        assert_eq!(preview_key("a\nb"), "a.b");
        assert_eq!(preview_key(&"x".repeat(40)).len(), 32);
        assert_eq!(preview_value(b"ok\0"), "ok");
        assert_eq!(preview_value(b"\x01a b"), ".a b");
        assert_eq!(preview_value(&[b'z'; 60]).len(), 39);
    }

    #[test]
    fn test_arena_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Arena>();
    }
}
