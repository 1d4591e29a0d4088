//! Keel - a disk-oriented storage engine core in Rust
//!
//! This crate provides the storage-engine heart of a teaching DBMS: pages
//! cached in a fixed-size buffer pool, an asynchronous write-back disk
//! layer, and a B+Tree index built on top of the pool.
//!
//! # Architecture
//!
//! - **Storage Layer** (`storage`): disk I/O
//!   - `DiskManager`: synchronous page-addressed block I/O over one file
//!   - `DiskProxy` / per-page schedulers: asynchronous write-back with
//!     read-through visibility, one background worker per hot page
//!
//! - **Buffer Pool** (`buffer`): memory management for database pages
//!   - `BufferPoolManager`: admission, pinning, eviction, write-back
//!   - `LruKReplacer`: LRU-K page replacement policy
//!   - `FrameHeader`: per-frame metadata, data, and page latch
//!   - `BasicPageGuard` / `ReadPageGuard` / `WritePageGuard`: RAII pins
//!
//! - **Index** (`index`): B+Tree with latch-crabbed search and
//!   split-on-insert, reached through a header page
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use keel::buffer::BufferPoolManager;
//! use keel::index::{BPlusTree, IntegerComparator};
//! use keel::storage::disk::DiskManager;
//! use keel::{PageId, RecordId, SlotId};
//!
//! let disk_manager = Arc::new(DiskManager::new("test.db").unwrap());
//! let bpm = Arc::new(BufferPoolManager::new(64, 2, disk_manager));
//!
//! let (header_page_id, header_guard) = bpm.new_page_guarded().unwrap();
//! drop(header_guard);
//!
//! let tree = BPlusTree::new(
//!     "demo",
//!     header_page_id,
//!     Arc::clone(&bpm),
//!     Arc::new(IntegerComparator),
//!     32,
//!     32,
//! )
//! .unwrap();
//!
//! tree.insert(42, RecordId::new(PageId::new(7), SlotId::new(0))).unwrap();
//! assert!(tree.get_value(42).unwrap().is_some());
//! ```

pub mod buffer;
pub mod common;
pub mod index;
pub mod storage;

// Re-export commonly used types at the crate root
pub use common::{AccessType, FrameId, KeelError, PageId, RecordId, Result, SlotId};
