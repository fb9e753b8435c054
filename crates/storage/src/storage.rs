//! Ordered key-value backend with MVCC helpers
//!
//! Implementations provide raw ordered access (`put`, `get`, `delete`,
//! `seek`) plus atomic batches. The versioned operations are provided
//! methods layered on [`InternalKey`], so every backend shares one physical
//! key layout.

use std::collections::BTreeMap;

use crate::internal_key::InternalKey;
use txkv_core::{BatchStore, Result, Timestamp};

/// One visible version returned by [`Storage::mvcc_get`] and [`Storage::mvcc_scan`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MvccEntry {
    /// User key
    pub key: Vec<u8>,
    /// Commit timestamp of the version found
    pub ts: Timestamp,
    /// Value bytes
    pub value: Vec<u8>,
}

/// Ordered byte-keyed backend
///
/// Thread safety: All methods must be safe to call concurrently from
/// multiple threads (requires Send + Sync).
pub trait Storage: BatchStore {
    /// Set `key` to `value`
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` if the backend rejects the write.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Remove `key`; removing an absent key is not an error
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` if the backend rejects the delete.
    fn delete(&self, key: &[u8]) -> Result<()>;

    /// Value stored under exactly `key`
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` if the backend fails.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// First entry whose key is `>= key` in byte order
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` if the backend fails.
    fn seek(&self, key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>>;

    /// Store `value` as the version of `key` committed at `ts`
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` if the backend rejects the write.
    fn mvcc_put(&self, key: &[u8], ts: Timestamp, value: &[u8]) -> Result<()> {
        self.put(&InternalKey::new(key, ts, false).encode(), value)
    }

    /// Store a deletion marker for `key` committed at `ts`
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` if the backend rejects the write.
    fn mvcc_delete(&self, key: &[u8], ts: Timestamp) -> Result<()> {
        self.put(&InternalKey::new(key, ts, true).encode(), b"")
    }

    /// Newest version of `key` committed at or before `ts`
    ///
    /// Returns `None` if there is no such version or if it is a deletion
    /// marker.
    ///
    /// # Errors
    ///
    /// Returns `Error::Corruption` if the entry found is not a physical
    /// version key.
    fn mvcc_get(&self, key: &[u8], ts: Timestamp) -> Result<Option<MvccEntry>> {
        let target = InternalKey::new(key, ts, false).encode();
        let Some((found_key, found_value)) = self.seek(&target)? else {
            return Ok(None);
        };
        let found = InternalKey::decode(&found_key)?;
        if found.user_key() != key || found.is_delete() {
            return Ok(None);
        }
        Ok(Some(MvccEntry {
            key: key.to_vec(),
            ts: found.ts(),
            value: found_value,
        }))
    }

    /// The first user key stored after every version of `key`
    ///
    /// # Errors
    ///
    /// Returns `Error::Corruption` if the entry found is not a physical
    /// version key.
    fn mvcc_next_key(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.seek(&InternalKey::past_versions(key))? {
            Some((found_key, _)) if InternalKey::is_versioned(&found_key) => {
                let found = InternalKey::decode(&found_key)?;
                Ok(Some(found.user_key().to_vec()))
            }
            _ => Ok(None),
        }
    }

    /// Newest visible version at `ts` of every user key in `[left, right)`
    ///
    /// An empty `right` is unbounded. Keys whose visible version is a
    /// deletion marker are skipped. Entries come back in user key order.
    ///
    /// Physical order is not user key order (`user10` sorts before `user1`),
    /// so the scan walks every physical key between the bounds of the range
    /// and filters by user key.
    ///
    /// # Errors
    ///
    /// Returns `Error::Corruption` if a physical key cannot be decoded.
    fn mvcc_scan(&self, left: &[u8], right: &[u8], ts: Timestamp) -> Result<Vec<MvccEntry>> {
        let end = InternalKey::upper_bound(right);
        let mut cursor = InternalKey::lower_bound(left);
        let mut visited: BTreeMap<Vec<u8>, Option<MvccEntry>> = BTreeMap::new();

        while let Some((found_key, _)) = self.seek(&cursor)? {
            if !InternalKey::is_versioned(&found_key)
                || end.as_ref().is_some_and(|end| &found_key >= end)
            {
                break;
            }
            let found = InternalKey::decode(&found_key)?;
            let user_key = found.user_key();
            cursor = InternalKey::past_versions(user_key);

            let in_range = user_key >= left && (right.is_empty() || user_key < right);
            if in_range && !visited.contains_key(user_key) {
                let visible = self.mvcc_get(user_key, ts)?;
                visited.insert(user_key.to_vec(), visible);
            }
        }

        Ok(visited.into_values().flatten().collect())
    }
}
