//! Region persistor
//!
//! Each round visits one bucket, round-robin. Versions committed at or below
//! the low-water mark are written to the storage tier as a single batch and
//! truncated from memory only after the batch succeeds. A failed round is
//! logged; the bucket is retried on its next turn.
//!
//! The low-water mark is refreshed from the coordinator on its own, longer
//! period. Until the first refresh it is `MIN_TIMESTAMP` and nothing is
//! persisted.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};
use txkv_core::{BatchStore, Coordinator, Result, StoreData, Timestamp, MIN_TIMESTAMP};

use crate::background::StopSignal;
use crate::bucket::{KeyBucket, PersistEntry};
use crate::metric::RegionMetric;

/// Outcome of persisting one or more buckets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistRound {
    /// Versions written to the storage tier and truncated
    pub persisted: usize,
    /// Readers forgotten
    pub pruned_readers: usize,
    /// Keys dropped from memory
    pub erased_keys: usize,
}

impl PersistRound {
    fn merge(&mut self, other: PersistRound) {
        self.persisted += other.persisted;
        self.pruned_readers += other.pruned_readers;
        self.erased_keys += other.erased_keys;
    }
}

struct Cursor {
    next: usize,
    min_ats: Timestamp,
    refreshed_at: Option<Instant>,
}

/// Persistence state of one region
pub struct PersistWorker {
    buckets: Arc<[KeyBucket]>,
    metric: Arc<RegionMetric>,
    coordinator: Arc<dyn Coordinator>,
    store: Arc<dyn BatchStore>,
    min_ats_period: Duration,
    cursor: Mutex<Cursor>,
}

impl PersistWorker {
    /// A worker over `buckets`
    pub fn new(
        buckets: Arc<[KeyBucket]>,
        metric: Arc<RegionMetric>,
        coordinator: Arc<dyn Coordinator>,
        store: Arc<dyn BatchStore>,
        min_ats_period: Duration,
    ) -> Self {
        Self {
            buckets,
            metric,
            coordinator,
            store,
            min_ats_period,
            cursor: Mutex::new(Cursor {
                next: 0,
                min_ats: MIN_TIMESTAMP,
                refreshed_at: None,
            }),
        }
    }

    /// Low-water mark used by the last round
    pub fn min_ats(&self) -> Timestamp {
        self.cursor.lock().min_ats
    }

    /// Persist the next bucket in turn
    ///
    /// # Errors
    ///
    /// Returns the storage tier's error if the batch was not stored, or
    /// `Error::InvalidOperation` if the bucket changed under the round.
    pub fn tick(&self) -> Result<PersistRound> {
        if self.buckets.is_empty() {
            return Ok(PersistRound::default());
        }
        let mut cursor = self.cursor.lock();
        let due = cursor
            .refreshed_at
            .map_or(true, |at| at.elapsed() >= self.min_ats_period);
        if due {
            self.refresh(&mut cursor);
        }
        let idx = cursor.next;
        cursor.next = (cursor.next + 1) % self.buckets.len();
        self.persist_bucket(&self.buckets[idx], cursor.min_ats)
    }

    /// Refresh the low-water mark and persist every bucket once
    ///
    /// # Errors
    ///
    /// Stops at the first bucket that fails.
    pub fn flush_all(&self) -> Result<PersistRound> {
        let mut cursor = self.cursor.lock();
        self.refresh(&mut cursor);
        let mut total = PersistRound::default();
        for bucket in self.buckets.iter() {
            total.merge(self.persist_bucket(bucket, cursor.min_ats)?);
        }
        Ok(total)
    }

    fn refresh(&self, cursor: &mut Cursor) {
        match self.coordinator.get_min_active_start_ts() {
            Ok(ts) => {
                if ts < cursor.min_ats {
                    warn!(min_ats = ts, previous = cursor.min_ats, "low-water mark went back");
                }
                cursor.min_ats = ts;
                cursor.refreshed_at = Some(Instant::now());
            }
            Err(e) => warn!(error = %e, "get min active start ts failed"),
        }
    }

    fn persist_bucket(&self, bucket: &KeyBucket, min_ats: Timestamp) -> Result<PersistRound> {
        let mut round = PersistRound::default();

        let entries = bucket.get_persisting(min_ats);
        if !entries.is_empty() {
            let batch = to_store_data(&entries);
            self.store.batch_store(&batch)?;
            let trimmed = bucket.clear_persisted(&entries)?;
            debug!(versions = trimmed.removed, min_ats, "persisted");
            round.persisted = trimmed.removed;
            round.erased_keys += trimmed.erased_keys.len();
            for key in &trimmed.erased_keys {
                self.metric.gc_key(key);
            }
        }

        match self.coordinator.gc_horizon() {
            Ok(horizon) => {
                let trimmed = bucket.prune_readers(horizon);
                round.pruned_readers = trimmed.removed;
                round.erased_keys += trimmed.erased_keys.len();
                for key in &trimmed.erased_keys {
                    self.metric.gc_key(key);
                }
            }
            Err(e) => warn!(error = %e, "gc horizon unavailable, readers kept"),
        }
        Ok(round)
    }
}

fn to_store_data(entries: &[PersistEntry]) -> Vec<StoreData> {
    entries
        .iter()
        .flat_map(|entry| {
            entry.versions.iter().map(move |v| StoreData {
                key: entry.key.clone(),
                commit_ts: v.commit_ts(),
                value: v.value.content.clone(),
                is_delete: v.value.is_delete,
            })
        })
        .collect()
}

/// Background thread running [`PersistWorker::tick`] every period
pub struct Persistor {
    signal: Arc<StopSignal>,
    handle: Option<JoinHandle<()>>,
}

impl Persistor {
    /// Start ticking `worker` every `period`
    pub fn start(worker: Arc<PersistWorker>, period: Duration) -> Self {
        let signal = Arc::new(StopSignal::default());
        let thread_signal = Arc::clone(&signal);

        let handle = thread::Builder::new()
            .name("txkv-persistor".to_string())
            .spawn(move || persist_loop(&worker, &thread_signal, period))
            .expect("failed to spawn persistor thread");

        Self {
            signal,
            handle: Some(handle),
        }
    }

    /// Stop the thread and wait for it to exit
    pub fn shutdown(&mut self) {
        self.signal.stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Persistor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn persist_loop(worker: &PersistWorker, signal: &StopSignal, period: Duration) {
    while signal.sleep(period) {
        if let Err(e) = worker.tick() {
            warn!(error = %e, "persist round failed, retrying next turn");
        }
    }
}
