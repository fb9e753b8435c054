//! Durable storage tier for txkv
//!
//! This crate implements the backend the transaction index checkpoints to:
//! - InternalKey: physical key encoding ordered by user key, then newest version first
//! - Storage: ordered key-value trait with MVCC get/scan helpers
//! - MemoryStorage: BTreeMap-based backend with RwLock
//!
//! Every `Storage` is also a `txkv_core::BatchStore`, so it can be handed
//! straight to a region persistor.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod internal_key;
pub mod memory;
pub mod storage;

pub use internal_key::InternalKey;
pub use memory::MemoryStorage;
pub use storage::{MvccEntry, Storage};
