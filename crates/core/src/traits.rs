//! Collaborator traits
//!
//! The transaction index talks to two external services: the coordinator
//! (timestamps, low-water mark, dependency and metric sink) and the durable storage
//! tier (batched version writes). Both are traits so that in-process
//! implementations and RPC clients are interchangeable.

use crate::dep::Dep;
use crate::error::Result;
use crate::partition::Range;
use crate::types::{Timestamp, MIN_TIMESTAMP};

/// Coordinator interface consumed by the transaction index
///
/// Thread safety: methods are called concurrently from request handlers,
/// the persistor and the dependency reporter.
pub trait Coordinator: Send + Sync {
    /// Issue a new timestamp, strictly greater than every one issued before
    ///
    /// # Errors
    ///
    /// Returns `Error::Network` if the coordinator is unreachable.
    fn issue_timestamp(&self) -> Result<Timestamp>;

    /// Smallest start timestamp among active transactions (the low-water mark)
    ///
    /// # Errors
    ///
    /// Returns `Error::Network` if the coordinator is unreachable.
    fn get_min_active_start_ts(&self) -> Result<Timestamp>;

    /// Deliver anti-dependency edges discovered by the transaction index
    ///
    /// # Errors
    ///
    /// Returns `Error::Network` if the coordinator is unreachable.
    fn report_read_write_dependencies(&self, deps: Vec<Dep>) -> Result<()>;

    /// Oldest timestamp the coordinator still tracks a transaction for
    ///
    /// Reader bookkeeping older than this can no longer produce an edge the
    /// coordinator would keep. The default never allows pruning.
    fn gc_horizon(&self) -> Result<Timestamp> {
        Ok(MIN_TIMESTAMP)
    }

    /// Deliver a region's periodic load summary
    ///
    /// The default drops the report.
    ///
    /// # Errors
    ///
    /// Returns `Error::Network` if the coordinator is unreachable, or
    /// `Error::Partition` if it does not know the region's range.
    fn report_region_metric(&self, report: RegionReport) -> Result<()> {
        let _ = report;
        Ok(())
    }
}

/// Load summary one region sends the coordinator every metric period
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionReport {
    /// Range the region serves
    pub range: Range,
    /// Read requests since the region started
    pub read_count: u64,
    /// Lock and intent requests since the region started
    pub write_count: u64,
    /// Keys found contended since the previous report
    pub pessimism_keys: Vec<Vec<u8>>,
}

/// One committed version handed to the storage tier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreData {
    /// User key
    pub key: Vec<u8>,
    /// Commit timestamp of the version
    pub commit_ts: Timestamp,
    /// Value bytes; empty for deletes
    pub value: Vec<u8>,
    /// Whether the version is a deletion marker
    pub is_delete: bool,
}

/// Durable backend interface consumed by the persistor
pub trait BatchStore: Send + Sync {
    /// Durably store every entry of `batch`, all or nothing
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` or `Error::Network` if the batch was not stored.
    fn batch_store(&self, batch: &[StoreData]) -> Result<()>;
}
