//! Shared test utilities for the integration suites.
//!
//! Import via `#[path = "../common/mod.rs"] mod common;` from a suite's main.rs.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use txkv::{
    wait_pair, MemoryStorage, Partition, PartitionConfig, Range, ReadOutcome, Storage, Timestamp,
    TxIdentifier, TxIndex, TxIndexConfig, TxOpStatus, TxPlanner, TxStatus, TxTableConfig, Value,
    WakeSignal,
};

// ============================================================================
// Cluster
// ============================================================================

/// A planner, a storage tier and two transaction indexes splitting the key
/// space at `m`
pub struct Cluster {
    pub planner: Arc<TxPlanner>,
    pub storage: Arc<MemoryStorage>,
    pub partition: Partition,
    pub indexes: BTreeMap<String, Arc<TxIndex>>,
    up_front_locks: AtomicUsize,
}

impl Cluster {
    pub fn new(config: TxIndexConfig) -> Self {
        let storage = Arc::new(MemoryStorage::new());

        let mut partition = Partition::new("store-0");
        partition
            .add_range(Range::new("", "m", true, false), PartitionConfig::new("idx-0"))
            .unwrap();
        partition
            .add_range(Range::new("m", "", true, true), PartitionConfig::new("idx-1"))
            .unwrap();
        let planner = Arc::new(
            TxPlanner::without_gc(TxTableConfig::default())
                .unwrap()
                .with_partition(partition.clone()),
        );

        let indexes = ["idx-0", "idx-1"]
            .into_iter()
            .map(|addr| {
                let index = TxIndex::new(
                    addr,
                    &partition,
                    config.clone(),
                    planner.clone(),
                    storage.clone(),
                )
                .unwrap();
                (addr.to_string(), Arc::new(index))
            })
            .collect();

        Self {
            planner,
            storage,
            partition,
            indexes,
            up_front_locks: AtomicUsize::new(0),
        }
    }

    /// Both indexes with the background persistor off
    pub fn manual() -> Self {
        Self::new(TxIndexConfig {
            latch_bucket_num: 8,
            enable_persistor: false,
            ..TxIndexConfig::default()
        })
    }

    /// The index owning `key`
    pub fn index_for(&self, key: &[u8]) -> &TxIndex {
        let (_, config) = self.partition.lookup(key).unwrap();
        &self.indexes[&config.txindex_addr]
    }

    pub fn begin(&self) -> TxIdentifier {
        self.planner.begin_tx()
    }

    /// Read at `txid.start_ts`, waiting out blocks and falling back to storage
    pub fn read(&self, key: &[u8], txid: &TxIdentifier) -> Option<Value> {
        let index = self.index_for(key);
        loop {
            let (signal, handle) = wait_pair();
            match index.read(key, txid, false, signal.into_continuation()) {
                ReadOutcome::Found(v) => return Some(v),
                ReadOutcome::NotFound => {
                    return self
                        .storage
                        .mvcc_get(key, txid.start_ts)
                        .unwrap()
                        .map(|entry| Value::new(entry.value))
                }
                ReadOutcome::Failed(status) if status.is_blocked() => {
                    assert!(handle.blocking_wait());
                }
                ReadOutcome::Failed(status) => panic!("unexpected read failure: {status}"),
            }
        }
    }

    /// Place an intent, waiting out blocks
    ///
    /// Keys the planner lists as pessimistic are write-locked first.
    pub fn write(&self, key: &[u8], value: Value, txid: &TxIdentifier) -> TxOpStatus {
        let index = self.index_for(key);
        let pessimistic = self.planner.partition().is_pessimistic(key);
        if pessimistic {
            self.up_front_locks.fetch_add(1, Ordering::Relaxed);
            let locked = until_settled(|signal| index.write_lock(key, txid, signal.into_continuation()));
            if !locked.is_ok() {
                return locked;
            }
        }
        let status = until_settled(|signal| {
            index.write_intent(key, value.clone(), txid, signal.into_continuation())
        });
        if pessimistic && !status.is_ok() {
            index.clean(key, txid);
        }
        status
    }

    /// Commit in the planner, then commit or clean every written key
    ///
    /// Returns the planner's decision, `Abnormal` if some key refused it.
    pub fn finish(&self, txid: &TxIdentifier, keys: &[&[u8]]) -> TxIdentifier {
        let outcome = self.planner.commit_tx(&preparing(*txid)).unwrap();
        let statuses: Vec<TxOpStatus> = keys
            .iter()
            .map(|key| {
                if outcome.is_committed() {
                    self.index_for(key).commit(key, &outcome)
                } else {
                    self.index_for(key).clean(key, txid)
                }
            })
            .collect();
        outcome.resolve(&statuses)
    }

    /// Abort in the planner and clean every written key
    pub fn abort(&self, txid: &TxIdentifier, keys: &[&[u8]]) {
        for key in keys {
            self.index_for(key).clean(key, txid);
        }
        self.planner.abort_tx(&preparing(*txid)).unwrap();
    }

    /// Write `value` to `key` in its own transaction
    pub fn put(&self, key: &[u8], value: Value) -> TxIdentifier {
        let txid = self.begin();
        assert!(self.write(key, value, &txid).is_ok());
        let outcome = self.finish(&txid, &[key]);
        assert!(outcome.is_committed());
        outcome
    }

    /// Read `key` in a fresh transaction
    pub fn get(&self, key: &[u8]) -> Option<Value> {
        let txid = self.begin();
        let value = self.read(key, &txid);
        self.planner.abort_tx(&preparing(txid)).unwrap();
        value
    }

    /// Value bytes of the version of `key` visible at `ts` in storage
    pub fn storage_entry(&self, key: &[u8], ts: Timestamp) -> Option<Vec<u8>> {
        self.storage
            .mvcc_get(key, ts)
            .unwrap()
            .map(|entry| entry.value)
    }

    /// Writes that took a lock before placing their intent
    pub fn up_front_locks(&self) -> usize {
        self.up_front_locks.load(Ordering::Relaxed)
    }

    pub fn flush_deps(&self) {
        for index in self.indexes.values() {
            index.flush_deps();
        }
    }

    /// Persist every region of every index; returns versions persisted
    pub fn persist_all(&self) -> usize {
        self.indexes
            .values()
            .map(|index| index.persist_all().unwrap().persisted)
            .sum()
    }
}

// ============================================================================
// Helpers
// ============================================================================

pub fn preparing(mut txid: TxIdentifier) -> TxIdentifier {
    txid.status = TxStatus::Preparing;
    txid
}

/// Re-submit `op` until it stops returning `Blocked`
pub fn until_settled(op: impl Fn(WakeSignal) -> TxOpStatus) -> TxOpStatus {
    loop {
        let (signal, handle) = wait_pair();
        let status = op(signal);
        if !status.is_blocked() || !handle.blocking_wait() {
            return status;
        }
    }
}

/// Poll `cond` for up to five seconds
pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

pub fn int(value: &Value) -> i64 {
    String::from_utf8_lossy(&value.content).parse().unwrap()
}
