//! Checkpointing committed versions to the storage tier

use crate::common::*;
use txkv::{Storage, TxIndexConfig, Value};

#[test]
fn test_background_persistor_drains_memory() {
    let c = Cluster::new(TxIndexConfig {
        latch_bucket_num: 2,
        persist_period_ms: 1,
        min_ats_period_ms: 1,
        ..TxIndexConfig::default()
    });
    let keys: Vec<String> = (0..10).map(|i| format!("key-{i:02}")).collect();
    for key in &keys {
        c.put(key.as_bytes(), Value::new(key.clone()));
    }

    let in_memory = || -> usize {
        c.indexes
            .values()
            .flat_map(|index| index.regions().iter())
            .map(|region| region.key_count())
            .sum()
    };
    assert!(wait_until(|| in_memory() == 0));
    assert_eq!(c.storage.len(), keys.len());

    // Reads fall through to storage and see the same data
    for key in &keys {
        assert_eq!(c.get(key.as_bytes()), Some(Value::new(key.clone())));
    }

    let scanned = c.storage.mvcc_scan(b"key-", b"key-~", u64::MAX).unwrap();
    assert_eq!(scanned.len(), keys.len());
    assert_eq!(scanned[0].key, b"key-00".to_vec());
}

#[test]
fn test_versions_needed_by_active_reader_stay() {
    let c = Cluster::manual();
    c.put(b"ledger", Value::new("v1"));
    let reader = c.begin();
    c.put(b"ledger", Value::new("v2"));

    // v1 is below the reader's snapshot, v2 is not
    assert_eq!(c.persist_all(), 1);
    assert_eq!(c.read(b"ledger", &reader), Some(Value::new("v1")));

    c.abort(&reader, &[]);
    assert_eq!(c.persist_all(), 1);
    assert_eq!(c.get(b"ledger"), Some(Value::new("v2")));
}

#[test]
fn test_deletes_are_persisted_as_markers() {
    let c = Cluster::manual();
    let first = c.put(b"gone", Value::new("v1"));
    let second = c.put(b"gone", Value::tombstone());
    assert_eq!(c.persist_all(), 2);

    assert_eq!(c.storage_entry(b"gone", first.commit_ts.unwrap()), Some(b"v1".to_vec()));
    assert_eq!(c.storage_entry(b"gone", second.commit_ts.unwrap()), None);
    assert_eq!(c.get(b"gone"), None);
}
