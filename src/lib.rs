//! Strata - a page-oriented storage engine substrate
//!
//! This crate provides the storage core of a small relational database: a
//! buffer pool caching fixed-size disk pages, the replacement policy that
//! picks eviction victims, and a disk-resident B+Tree index built on top.
//!
//! # Architecture
//!
//! The system is organized into layers, leaves first:
//!
//! - **Disk layer** (`storage::disk`): page-granular file I/O
//!   - `DiskManager`: reads and writes 4 KB pages of a database file
//!   - `DiskScheduler`: background worker thread serializing page I/O
//!
//! - **Page table** (`container`): `ExtendibleHashTable`, the concurrent
//!   page-id to frame-id mapping with directory doubling and bucket splits
//!
//! - **Buffer pool** (`buffer`): memory management for database pages
//!   - `BufferPoolManager`: fetches pages into a fixed set of frames
//!   - `LruKReplacer`: LRU-K eviction with +inf distance for cold frames
//!   - `ReadPageGuard` / `WritePageGuard`: RAII pins over page bytes
//!
//! - **Index** (`index`): `BPlusTree`, generic over fixed-size keys and
//!   payloads, with split propagation on insert and redistribute/coalesce
//!   on delete. Node layouts live in `storage::page`.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use strata::buffer::BufferPoolManager;
//! use strata::index::BPlusTree;
//! use strata::storage::disk::DiskManager;
//! use strata::{PageId, RecordId, SlotId};
//!
//! let disk_manager = Arc::new(DiskManager::new("test.db").unwrap());
//! let bpm = Arc::new(BufferPoolManager::new(64, 2, disk_manager).unwrap());
//!
//! let tree: BPlusTree<u32, RecordId> =
//!     BPlusTree::new("orders_pk", Arc::clone(&bpm), None, None).unwrap();
//! tree.insert(42, RecordId::new(PageId::new(7), SlotId::new(0))).unwrap();
//! assert!(tree.get(&42).unwrap().is_some());
//! ```

pub mod buffer;
pub mod common;
pub mod container;
pub mod index;
pub mod storage;

// Re-export commonly used types at the crate root
pub use common::{FrameId, PageId, RecordId, Result, SlotId, StrataError};
