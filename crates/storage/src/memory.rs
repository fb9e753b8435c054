//! MemoryStorage: ordered in-memory backend
//!
//! This module implements the Storage trait using:
//! - `BTreeMap<Vec<u8>, Vec<u8>>` for byte-ordered key storage
//! - `parking_lot::RwLock` for thread-safe access
//!
//! Batches are applied under a single write lock, so a batch is never
//! partially visible.

use std::collections::BTreeMap;
use std::ops::Bound;

use parking_lot::RwLock;
use tracing::debug;

use txkv_core::{BatchStore, Result, StoreData};

use crate::internal_key::InternalKey;
use crate::storage::Storage;

/// In-memory storage backend using BTreeMap with RwLock
#[derive(Debug, Default)]
pub struct MemoryStorage {
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStorage {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of physical entries
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Whether the store holds no entries
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl BatchStore for MemoryStorage {
    fn batch_store(&self, batch: &[StoreData]) -> Result<()> {
        let mut data = self.data.write();
        for item in batch {
            let key = InternalKey::new(item.key.as_slice(), item.commit_ts, item.is_delete);
            data.insert(key.encode(), item.value.clone());
        }
        debug!(entries = batch.len(), "stored mvcc batch");
        Ok(())
    }
}

impl Storage for MemoryStorage {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.data.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.data.write().remove(key);
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.data.read().get(key).cloned())
    }

    fn seek(&self, key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let data = self.data.read();
        let found = data
            .range::<[u8], _>((Bound::Included(key), Bound::Unbounded))
            .next()
            .map(|(k, v)| (k.clone(), v.clone()));
        Ok(found)
    }
}
