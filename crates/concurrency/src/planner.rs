//! In-process transaction coordinator
//!
//! [`TxPlanner`] combines a timestamp oracle with a [`TxTable`]:
//! - `begin_tx` issues a start timestamp and registers the transaction
//! - `commit_tx` issues a commit timestamp, commits in the table, then aborts
//!   every transaction left in a dangerous structure by the commit
//! - `report_read_write_dependencies` records edges from the transaction
//!   index and runs the same check on both endpoints
//! - `report_region_metric` folds a region's pessimism keys into the
//!   partition table clients route by
//!
//! Start and commit timestamps come from one counter. Issuing a start
//! timestamp and registering it happen under the timer lock, so the
//! low-water mark never passes a transaction that is about to begin.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};
use txkv_core::{
    Coordinator, Dep, Error, Partition, RegionReport, Result, Timestamp, TxIdentifier, TxStatus,
    MIN_TIMESTAMP,
};

use crate::config::TxTableConfig;
use crate::gc::TableGc;
use crate::table::TxTable;
use crate::validation::EarlyValidation;

/// Timestamp oracle plus dependency graph
pub struct TxPlanner {
    /// Last issued timestamp
    timer: Mutex<Timestamp>,
    table: Arc<TxTable>,
    partition: RwLock<Partition>,
    _gc: Option<TableGc>,
}

impl TxPlanner {
    /// A planner with a background garbage collector
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if `config` is invalid.
    pub fn new(config: TxTableConfig) -> Result<Self> {
        config.validate()?;
        let table = Arc::new(TxTable::new(config.retention));
        let gc = TableGc::start(Arc::clone(&table), config.gc_period());
        Ok(Self {
            timer: Mutex::new(MIN_TIMESTAMP),
            table,
            partition: RwLock::new(Partition::default()),
            _gc: Some(gc),
        })
    }

    /// A planner whose table is only collected by explicit `gc()` calls
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if `config` is invalid.
    pub fn without_gc(config: TxTableConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            timer: Mutex::new(MIN_TIMESTAMP),
            table: Arc::new(TxTable::new(config.retention)),
            partition: RwLock::new(Partition::default()),
            _gc: None,
        })
    }

    /// Serve `partition` as the range table
    pub fn with_partition(self, partition: Partition) -> Self {
        *self.partition.write() = partition;
        self
    }

    /// Current range table, including the pessimism keys reported so far
    pub fn partition(&self) -> Partition {
        self.partition.read().clone()
    }

    /// The dependency graph
    pub fn table(&self) -> &Arc<TxTable> {
        &self.table
    }

    fn next_ts(timer: &mut Timestamp) -> Timestamp {
        *timer += 1;
        *timer
    }

    /// Start a transaction
    pub fn begin_tx(&self) -> TxIdentifier {
        let mut timer = self.timer.lock();
        let start_ts = Self::next_ts(&mut timer);
        self.table.begin_tx(start_ts);
        info!(start_ts, "tx is going to begin");
        TxIdentifier::new(start_ts)
    }

    /// Commit a transaction on behalf of its client
    ///
    /// The returned identifier carries the commit timestamp, or shows the
    /// transaction as aborted if the table had already aborted it.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the transaction is not registered.
    pub fn commit_tx(&self, txid: &TxIdentifier) -> Result<TxIdentifier> {
        if txid.status != TxStatus::Preparing {
            warn!(txid = %txid, "tx is not supposed to commit");
        }
        let commit_ts = {
            let mut timer = self.timer.lock();
            Self::next_ts(&mut timer)
        };
        let committed = self.table.commit_tx(txid, commit_ts)?;
        self.table.mark_finished(txid.start_ts)?;
        info!(txid = %committed, "tx is going to commit");

        if committed.is_committed() {
            self.abort_dangerous(committed.start_ts);
        }
        Ok(committed)
    }

    /// Abort a transaction on behalf of its client
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the transaction is not registered.
    pub fn abort_tx(&self, txid: &TxIdentifier) -> Result<TxIdentifier> {
        if txid.status != TxStatus::Preparing {
            warn!(txid = %txid, "tx is not supposed to abort");
        }
        let aborted = self.table.abort_tx(txid)?;
        self.table.mark_finished(txid.start_ts)?;
        info!(txid = %aborted, "tx is going to abort");
        Ok(aborted)
    }

    /// Wait for the transaction to be aborted or committed
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the transaction is not registered.
    pub fn validate_tx(&self, txid: &TxIdentifier) -> Result<EarlyValidation> {
        self.table.early_validate_tx(txid)
    }

    /// Run one garbage collection pass
    pub fn gc(&self) -> Vec<TxIdentifier> {
        self.table.gc_tx()
    }

    fn abort_dangerous(&self, start_ts: Timestamp) {
        for victim in self.table.find_abort_txn_on_consecutive_rw_dep(start_ts) {
            info!(txid = %victim, "tx will be aborted");
            if let Err(e) = self.table.abort_tx(&victim) {
                warn!(txid = %victim, error = %e, "failed to abort tx");
            }
        }
    }
}

impl Coordinator for TxPlanner {
    fn issue_timestamp(&self) -> Result<Timestamp> {
        Ok(Self::next_ts(&mut self.timer.lock()))
    }

    fn get_min_active_start_ts(&self) -> Result<Timestamp> {
        let _timer = self.timer.lock();
        Ok(self.table.min_active_start_ts())
    }

    fn report_read_write_dependencies(&self, deps: Vec<Dep>) -> Result<()> {
        debug!(count = deps.len(), "received dependencies");
        for dep in &deps {
            if !self.table.add_dep(dep.dep_type, &dep.t1, &dep.t2) {
                continue;
            }
            self.abort_dangerous(dep.t1.start_ts);
            self.abort_dangerous(dep.t2.start_ts);
        }
        Ok(())
    }

    fn gc_horizon(&self) -> Result<Timestamp> {
        Ok(self.table.gc_horizon())
    }

    fn report_region_metric(&self, report: RegionReport) -> Result<()> {
        let mut partition = self.partition.write();
        let Some(config) = partition.config_mut(&report.range) else {
            warn!(range = %report.range, "metric for unknown range");
            return Err(Error::Partition(format!(
                "no range {} in partition",
                report.range
            )));
        };
        let before = config.pessimism_keys.len();
        config.pessimism_keys.extend(report.pessimism_keys);
        let added = config.pessimism_keys.len() - before;
        if added > 0 {
            info!(
                range = %report.range,
                added,
                total = config.pessimism_keys.len(),
                "pessimism keys updated"
            );
        }
        Ok(())
    }
}
