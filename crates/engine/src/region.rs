//! Region: a range of the key space
//!
//! A region hash-shards its keys over a fixed array of [`KeyBucket`]s and
//! wraps every lock, intent and read request with metrics. Edges discovered
//! by a request go to the region's [`DepReporter`]; committed versions leave
//! memory through its [`Persistor`]. A [`MetricReporter`] sends the
//! region's pessimism keys to the coordinator.

use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Instant;

use rustc_hash::FxHasher;
use tracing::info;
use txkv_core::{
    BatchStore, Coordinator, Dep, Range, ReadOutcome, Result, TxIdentifier, TxOpStatus, Value,
};

use crate::background::BackgroundScheduler;
use crate::bucket::KeyBucket;
use crate::config::TxIndexConfig;
use crate::metric::{MetricReporter, MetricSnapshot, RegionMetric};
use crate::persistor::{PersistRound, PersistWorker, Persistor};
use crate::reporter::DepReporter;

/// Buckets, metrics and background tasks of one range
pub struct Region {
    range: Range,
    buckets: Arc<[KeyBucket]>,
    metric: Arc<RegionMetric>,
    worker: Arc<PersistWorker>,
    persistor: Option<Persistor>,
    reporter: Option<DepReporter>,
    metric_reporter: Option<MetricReporter>,
}

impl Region {
    /// Build the region for `range` and start its background tasks
    pub fn new(
        range: Range,
        config: &TxIndexConfig,
        scheduler: Arc<BackgroundScheduler>,
        coordinator: Arc<dyn Coordinator>,
        store: Arc<dyn BatchStore>,
    ) -> Self {
        let buckets: Arc<[KeyBucket]> = (0..config.latch_bucket_num)
            .map(|_| KeyBucket::new(Arc::clone(&scheduler), config.enable_dep_reporter))
            .collect::<Vec<_>>()
            .into();
        let metric = Arc::new(RegionMetric::new(
            config.alpha,
            config.lambda,
            config.metric_period(),
        ));
        let worker = Arc::new(PersistWorker::new(
            Arc::clone(&buckets),
            Arc::clone(&metric),
            Arc::clone(&coordinator),
            store,
            config.min_ats_period(),
        ));
        let persistor = config
            .enable_persistor
            .then(|| Persistor::start(Arc::clone(&worker), config.persist_period()));
        let metric_reporter = config.enable_metric_reporter.then(|| {
            MetricReporter::start(
                range.clone(),
                Arc::clone(&metric),
                Arc::clone(&coordinator),
                config.metric_period(),
            )
        });
        let reporter = config
            .enable_dep_reporter
            .then(|| DepReporter::start(coordinator));

        info!(
            range = %range,
            buckets = buckets.len(),
            persistor = persistor.is_some(),
            reporter = reporter.is_some(),
            metric_reporter = metric_reporter.is_some(),
            "region started"
        );
        Self {
            range,
            buckets,
            metric,
            worker,
            persistor,
            reporter,
            metric_reporter,
        }
    }

    /// Key range served
    pub fn range(&self) -> &Range {
        &self.range
    }

    /// Human-readable description of the range
    pub fn describe(&self) -> String {
        format!("region {}", self.range.describe())
    }

    /// Whether `key` belongs to this region
    pub fn contains(&self, key: &[u8]) -> bool {
        self.range.contains(key)
    }

    fn bucket(&self, key: &[u8]) -> &KeyBucket {
        let mut hasher = FxHasher::default();
        key.hash(&mut hasher);
        let idx = (hasher.finish() % self.buckets.len() as u64) as usize;
        &self.buckets[idx]
    }

    fn report(&self, deps: Vec<Dep>) {
        if let Some(reporter) = &self.reporter {
            reporter.push(deps);
        }
    }

    /// Acquire a pessimistic write lock on `key`
    pub fn write_lock<W>(&self, key: &[u8], txid: &TxIdentifier, on_wake: W) -> TxOpStatus
    where
        W: FnOnce() + Send + 'static,
    {
        let started = Instant::now();
        let reply = self.bucket(key).write_lock(key, txid, on_wake);
        self.report(reply.deps);
        self.metric
            .record_write(key, &reply.status, reply.contended, started.elapsed());
        reply.status
    }

    /// Place a write intent on `key`
    pub fn write_intent<W>(&self, key: &[u8], value: Value, txid: &TxIdentifier, on_wake: W) -> TxOpStatus
    where
        W: FnOnce() + Send + 'static,
    {
        let started = Instant::now();
        let reply = self.bucket(key).write_intent(key, value, txid, on_wake);
        self.report(reply.deps);
        if !reply.is_lock_upgrade {
            self.metric
                .record_write(key, &reply.status, reply.contended, started.elapsed());
        }
        reply.status
    }

    /// Release the lock or intent `txid` holds on `key`
    pub fn clean(&self, key: &[u8], txid: &TxIdentifier) -> TxOpStatus {
        self.bucket(key).clean(key, txid)
    }

    /// Turn the intent `txid` holds on `key` into a committed version
    pub fn commit(&self, key: &[u8], txid: &TxIdentifier) -> TxOpStatus {
        self.bucket(key).commit(key, txid)
    }

    /// Read `key` at `txid.start_ts`
    pub fn read<W>(&self, key: &[u8], txid: &TxIdentifier, pessimistic: bool, on_wake: W) -> ReadOutcome
    where
        W: FnOnce() + Send + 'static,
    {
        let started = Instant::now();
        let reply = self.bucket(key).read(key, txid, pessimistic, on_wake);
        self.report(reply.deps);
        self.metric
            .record_read(key, &reply.outcome, reply.contended, started.elapsed());
        reply.outcome
    }

    /// Number of latch buckets
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Keys held in memory across all buckets
    pub fn key_count(&self) -> usize {
        self.buckets.iter().map(KeyBucket::len).sum()
    }

    /// Versions of `key` still held in memory
    pub fn version_count(&self, key: &[u8]) -> usize {
        self.bucket(key)
            .inspect(key, |mv| mv.versions().len())
            .unwrap_or(0)
    }

    /// Metrics recorder
    pub fn metric(&self) -> &RegionMetric {
        &self.metric
    }

    /// Current metrics; drains the pessimism keys the metric reporter has not sent yet
    pub fn metrics(&self) -> MetricSnapshot {
        self.metric.snapshot()
    }

    /// Wait until every edge reported so far reached the coordinator
    pub fn flush_deps(&self) {
        if let Some(reporter) = &self.reporter {
            reporter.flush();
        }
    }

    /// Persist every bucket now with a fresh low-water mark
    ///
    /// # Errors
    ///
    /// Returns the first persistence failure.
    pub fn persist_all(&self) -> Result<PersistRound> {
        self.worker.flush_all()
    }

    /// Stop the background threads; pending edges are delivered first
    pub fn shutdown(&mut self) {
        if let Some(mut metric_reporter) = self.metric_reporter.take() {
            metric_reporter.shutdown();
        }
        if let Some(mut persistor) = self.persistor.take() {
            persistor.shutdown();
        }
        if let Some(mut reporter) = self.reporter.take() {
            reporter.shutdown();
        }
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        self.shutdown();
    }
}
