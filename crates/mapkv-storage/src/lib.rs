//! Storage engine for mapkv.
//!
//! This crate provides:
//! - Arena handle mapping a single preallocated file
//! - First-fit record allocator with boundary-tag coalescing
//! - Hash index over (category, key)
//! - Per-category entry lists for enumeration
//! - Structural integrity checking

mod allocator;
mod arena;
mod category;
mod hash_index;
mod integrity;
mod list;
mod ops;
mod record;
mod region;

pub use allocator::FreeRecord;
pub use arena::{Arena, ArenaStats, CategoryStats, ValueRef};
pub use category::check_category;
pub use hash_index::bucket_for;
pub use integrity::IntegrityReport;
pub use record::{
    BOUNDARY_TAG_SIZE, MAGIC_RECORD_ENTRY, MAGIC_RECORD_FREE, MIN_RECORD_LEN, RECORD_HEADER_SIZE,
};
