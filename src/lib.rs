//! txkv - transactional key-value store with a serializable transaction index
//!
//! txkv splits a transaction's life between three services:
//!
//! - the coordinator ([`TxPlanner`]) issues timestamps and keeps the
//!   dependency graph that turns snapshot isolation into serializability
//! - transaction indexes ([`TxIndex`]) hold locks, intents and recent
//!   committed versions for their key ranges
//! - the storage tier ([`Storage`]) keeps every version the indexes have
//!   checkpointed
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use txkv::{MemoryStorage, Partition, PartitionConfig, Range, TxIndex, TxIndexConfig};
//! use txkv::{TxPlanner, TxTableConfig, Value};
//!
//! let planner = Arc::new(TxPlanner::new(TxTableConfig::default())?);
//! let storage = Arc::new(MemoryStorage::new());
//! let mut partition = Partition::new("store-0");
//! partition.add_range(Range::unbounded(), PartitionConfig::new("idx-0"))?;
//! let index = TxIndex::new("idx-0", &partition, TxIndexConfig::default(), planner.clone(), storage)?;
//!
//! let txid = planner.begin_tx();
//! index.write_intent(b"user:1", Value::new("alice"), &txid, || {});
//! ```
//!
//! The member crates stay available under their own names for code that
//! needs more than the re-exported surface.

pub use txkv_concurrency::{EarlyValidation, RetentionPolicy, TxPlanner, TxTable, TxTableConfig};
pub use txkv_core::{
    BatchStore, Coordinator, Dep, DepType, Error, Partition, PartitionConfig, Range, ReadOutcome,
    RegionReport, Result, StoreData, Timestamp, TxIdentifier, TxOpStatus, TxStatus, Value,
    MAX_TIMESTAMP,
    MIN_TIMESTAMP,
};
pub use txkv_engine::{
    wait_pair, MetricSnapshot, PersistRound, TxIndex, TxIndexConfig, WaitHandle, WakeSignal,
};
pub use txkv_storage::{InternalKey, MemoryStorage, MvccEntry, Storage};
