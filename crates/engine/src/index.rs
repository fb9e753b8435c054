//! Transaction index: routes keys to regions
//!
//! A [`TxIndex`] serves every range of a [`Partition`] assigned to its
//! address. Requests are routed by binary search over the sorted ranges; a
//! key no local range contains fails with `PartitionErr`.
//!
//! The synchronous operations take a continuation that fires once a
//! `Blocked` request may be re-submitted. The `*_async` helpers do the
//! re-submission themselves, awaiting a [`WaitHandle`](crate::wait::WaitHandle)
//! between attempts.

use std::sync::Arc;

use tracing::{info, warn};
use txkv_core::{
    BatchStore, Coordinator, Error, Partition, Range, ReadOutcome, Result, TxIdentifier,
    TxOpStatus, Value,
};

use crate::background::{BackgroundScheduler, SchedulerStats};
use crate::config::TxIndexConfig;
use crate::metric::MetricSnapshot;
use crate::persistor::PersistRound;
use crate::region::Region;
use crate::wait::wait_pair;

/// Per-key transaction index over the ranges owned by one address
pub struct TxIndex {
    addr: String,
    regions: Vec<Region>,
    scheduler: Arc<BackgroundScheduler>,
}

impl TxIndex {
    /// Build one region per range `partition` assigns to `addr`
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if `config` is invalid, or `Error::Partition`
    /// if no range is assigned to `addr`.
    pub fn new(
        addr: impl Into<String>,
        partition: &Partition,
        config: TxIndexConfig,
        coordinator: Arc<dyn Coordinator>,
        store: Arc<dyn BatchStore>,
    ) -> Result<Self> {
        config.validate()?;
        let addr = addr.into();
        let scheduler = Arc::new(BackgroundScheduler::new(
            config.scheduler_threads,
            config.scheduler_queue_depth,
        ));

        // Partition keeps its ranges sorted
        let regions: Vec<Region> = partition
            .ranges_for(&addr)
            .map(|range| {
                Region::new(
                    range.clone(),
                    &config,
                    Arc::clone(&scheduler),
                    Arc::clone(&coordinator),
                    Arc::clone(&store),
                )
            })
            .collect();
        if regions.is_empty() {
            return Err(Error::Partition(format!("no range assigned to {addr}")));
        }

        info!(addr = %addr, regions = regions.len(), "transaction index started");
        Ok(Self {
            addr,
            regions,
            scheduler,
        })
    }

    /// Address this index serves
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Regions, sorted by range
    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// The region owning `key`
    pub fn route(&self, key: &[u8]) -> std::result::Result<&Region, TxOpStatus> {
        let point = Range::point(key);
        let pos = self
            .regions
            .partition_point(|r| r.range().is_before(&point));
        match self.regions.get(pos) {
            Some(region) if region.contains(key) => Ok(region),
            _ => {
                let msg = format!(
                    "key {} not served by {}",
                    String::from_utf8_lossy(key),
                    self.addr
                );
                warn!(key = %String::from_utf8_lossy(key), addr = %self.addr, "partition error");
                Err(TxOpStatus::PartitionErr(msg))
            }
        }
    }

    /// Acquire a pessimistic write lock on `key`
    pub fn write_lock<W>(&self, key: &[u8], txid: &TxIdentifier, on_wake: W) -> TxOpStatus
    where
        W: FnOnce() + Send + 'static,
    {
        match self.route(key) {
            Ok(region) => region.write_lock(key, txid, on_wake),
            Err(status) => status,
        }
    }

    /// Place a write intent on `key`
    pub fn write_intent<W>(&self, key: &[u8], value: Value, txid: &TxIdentifier, on_wake: W) -> TxOpStatus
    where
        W: FnOnce() + Send + 'static,
    {
        match self.route(key) {
            Ok(region) => region.write_intent(key, value, txid, on_wake),
            Err(status) => status,
        }
    }

    /// Release the lock or intent `txid` holds on `key`
    pub fn clean(&self, key: &[u8], txid: &TxIdentifier) -> TxOpStatus {
        match self.route(key) {
            Ok(region) => region.clean(key, txid),
            Err(status) => status,
        }
    }

    /// Commit the intent `txid` holds on `key`
    pub fn commit(&self, key: &[u8], txid: &TxIdentifier) -> TxOpStatus {
        match self.route(key) {
            Ok(region) => region.commit(key, txid),
            Err(status) => status,
        }
    }

    /// Read `key` at `txid.start_ts`
    pub fn read<W>(&self, key: &[u8], txid: &TxIdentifier, pessimistic: bool, on_wake: W) -> ReadOutcome
    where
        W: FnOnce() + Send + 'static,
    {
        match self.route(key) {
            Ok(region) => region.read(key, txid, pessimistic, on_wake),
            Err(status) => ReadOutcome::Failed(status),
        }
    }

    /// [`write_lock`](Self::write_lock), waiting out `Blocked`
    pub async fn write_lock_async(&self, key: &[u8], txid: &TxIdentifier) -> TxOpStatus {
        loop {
            let (signal, handle) = wait_pair();
            let status = self.write_lock(key, txid, signal.into_continuation());
            if !status.is_blocked() || !handle.wait().await {
                return status;
            }
        }
    }

    /// [`write_intent`](Self::write_intent), waiting out `Blocked`
    pub async fn write_intent_async(&self, key: &[u8], value: Value, txid: &TxIdentifier) -> TxOpStatus {
        loop {
            let (signal, handle) = wait_pair();
            let status = self.write_intent(key, value.clone(), txid, signal.into_continuation());
            if !status.is_blocked() || !handle.wait().await {
                return status;
            }
        }
    }

    /// [`read`](Self::read), waiting out `Blocked`
    pub async fn read_async(&self, key: &[u8], txid: &TxIdentifier, pessimistic: bool) -> ReadOutcome {
        loop {
            let (signal, handle) = wait_pair();
            let outcome = self.read(key, txid, pessimistic, signal.into_continuation());
            if !outcome.is_blocked() || !handle.wait().await {
                return outcome;
            }
        }
    }

    /// Wait until every edge reported so far reached the coordinator
    pub fn flush_deps(&self) {
        for region in &self.regions {
            region.flush_deps();
        }
    }

    /// Persist every region now with a fresh low-water mark
    ///
    /// # Errors
    ///
    /// Returns the first persistence failure.
    pub fn persist_all(&self) -> Result<PersistRound> {
        let mut total = PersistRound::default();
        for region in &self.regions {
            let round = region.persist_all()?;
            total.persisted += round.persisted;
            total.pruned_readers += round.pruned_readers;
            total.erased_keys += round.erased_keys;
        }
        Ok(total)
    }

    /// Metrics of every region; drains their pessimism keys
    pub fn metrics(&self) -> Vec<(Range, MetricSnapshot)> {
        self.regions
            .iter()
            .map(|r| (r.range().clone(), r.metrics()))
            .collect()
    }

    /// Wake-up scheduler statistics
    pub fn scheduler_stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    /// Stop every region's background tasks and the scheduler
    pub fn shutdown(&mut self) {
        for region in &mut self.regions {
            region.shutdown();
        }
        self.scheduler.shutdown();
    }
}

impl Drop for TxIndex {
    fn drop(&mut self) {
        self.shutdown();
    }
}
