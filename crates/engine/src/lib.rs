//! Transaction index engine for txkv
//!
//! This crate holds the per-key half of the protocol:
//! - MvccValue: per-key lock state, committed versions, readers and waiters
//! - KeyBucket: latched shard of keys with wait-die and dependency discovery
//! - Region: hash-sharded buckets with metrics, reporters and persistor
//! - TxIndex: routes keys to the regions of one address
//! - BackgroundScheduler: runs woken continuations off the latch
//! - WaitHandle: pending handle for blocked requests
//!
//! The transaction table lives in `txkv-concurrency`; the engine reaches it
//! only through the [`Coordinator`](txkv_core::Coordinator) trait.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod background;
pub mod bucket;
pub mod config;
pub mod index;
pub mod metric;
pub mod mvcc;
pub mod persistor;
pub mod region;
pub mod reporter;
pub mod wait;

pub use background::{BackgroundScheduler, SchedulerStats, WakePriority};
pub use bucket::{KeyBucket, PersistEntry, ReadReply, Trimmed, WriteReply};
pub use config::TxIndexConfig;
pub use index::TxIndex;
pub use metric::{KeyMetric, MetricReporter, MetricSnapshot, RegionMetric};
pub use mvcc::{CommittedVersion, LockKind, MvccLock, MvccValue, VersionChain};
pub use persistor::{PersistRound, PersistWorker, Persistor};
pub use region::Region;
pub use reporter::DepReporter;
pub use wait::{wait_pair, WaitHandle, WakeSignal};
