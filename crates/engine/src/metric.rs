//! Region metrics and pessimism keys
//!
//! Every lock, intent and read request is timed. Per key, the region also
//! tracks how often writes fail and how often requests arrive while another
//! transaction holds the key. Keys whose pessimism degree
//!
//! ```text
//! alpha * write_errors / writes + (1 - alpha) * contended_ops / ops
//! ```
//!
//! exceeds `lambda` are collected as pessimism keys: clients do better
//! locking them up front than writing them optimistically. A
//! [`MetricReporter`] hands them to the coordinator once per period.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use txkv_core::{Coordinator, Range, ReadOutcome, RegionReport, TxOpStatus};

use crate::background::StopSignal;

#[derive(Debug, Default)]
struct LatencyRecorder {
    count: AtomicU64,
    total_us: AtomicU64,
}

impl LatencyRecorder {
    fn record(&self, elapsed: Duration) {
        let us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_us.fetch_add(us, Ordering::Relaxed);
    }

    fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    fn mean_us(&self) -> f64 {
        match self.count() {
            0 => 0.0,
            n => self.total_us.load(Ordering::Relaxed) as f64 / n as f64,
        }
    }
}

/// Counters of one key over the current window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyMetric {
    window_start: Instant,
    writes: u64,
    write_errors: u64,
    ops: u64,
    contended_ops: u64,
}

impl KeyMetric {
    fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            writes: 0,
            write_errors: 0,
            ops: 0,
            contended_ops: 0,
        }
    }

    fn roll(&mut self, now: Instant, window: Duration) {
        if now.duration_since(self.window_start) >= window {
            *self = Self::new(now);
        }
    }

    /// Lock and intent requests in the window
    pub fn writes(&self) -> u64 {
        self.writes
    }

    /// Lock and intent requests that did not succeed
    pub fn write_errors(&self) -> u64 {
        self.write_errors
    }

    /// Requests of any kind in the window
    pub fn ops(&self) -> u64 {
        self.ops
    }

    /// Requests that found another transaction's lock or intent
    pub fn contended_ops(&self) -> u64 {
        self.contended_ops
    }

    /// `alpha * c + (1 - alpha) * l`; `c` is the write error ratio, `l` the
    /// contended request ratio
    pub fn pessimism_degree(&self, alpha: f64) -> f64 {
        let ratio = |part: u64, whole: u64| {
            if whole == 0 {
                0.0
            } else {
                part as f64 / whole as f64
            }
        };
        let c = ratio(self.write_errors, self.writes);
        let l = ratio(self.contended_ops, self.ops);
        alpha * c + (1.0 - alpha) * l
    }
}

/// Point-in-time view of a region's metrics
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSnapshot {
    /// Reads since the region started
    pub read_count: u64,
    /// Reads that completed, found or not
    pub read_success_count: u64,
    /// Reads that blocked or failed
    pub read_error_count: u64,
    /// Mean read latency in microseconds
    pub read_mean_us: f64,
    /// Lock and intent requests since the region started, upgrades excluded
    pub write_count: u64,
    /// Writes that applied
    pub write_success_count: u64,
    /// Writes that blocked or failed
    pub write_error_count: u64,
    /// Mean write latency in microseconds
    pub write_mean_us: f64,
    /// Keys found pessimistic since the previous snapshot, sorted
    pub pessimism_keys: Vec<Vec<u8>>,
}

/// Metrics recorder of one region
#[derive(Debug)]
pub struct RegionMetric {
    read: LatencyRecorder,
    read_success: LatencyRecorder,
    read_error: LatencyRecorder,
    write: LatencyRecorder,
    write_success: LatencyRecorder,
    write_error: LatencyRecorder,
    keys: DashMap<Vec<u8>, KeyMetric>,
    pessimism_keys: Mutex<BTreeSet<Vec<u8>>>,
    alpha: f64,
    lambda: f64,
    window: Duration,
}

impl RegionMetric {
    /// A recorder with the given pessimism parameters and per-key window
    pub fn new(alpha: f64, lambda: f64, window: Duration) -> Self {
        Self {
            read: LatencyRecorder::default(),
            read_success: LatencyRecorder::default(),
            read_error: LatencyRecorder::default(),
            write: LatencyRecorder::default(),
            write_success: LatencyRecorder::default(),
            write_error: LatencyRecorder::default(),
            keys: DashMap::new(),
            pessimism_keys: Mutex::new(BTreeSet::new()),
            alpha,
            lambda,
            window,
        }
    }

    fn touch_key(&self, key: &[u8], f: impl FnOnce(&mut KeyMetric)) -> KeyMetric {
        let now = Instant::now();
        let mut entry = self
            .keys
            .entry(key.to_vec())
            .or_insert_with(|| KeyMetric::new(now));
        entry.roll(now, self.window);
        f(&mut entry);
        *entry
    }

    /// Record a read request
    pub fn record_read(&self, key: &[u8], outcome: &ReadOutcome, contended: bool, elapsed: Duration) {
        self.read.record(elapsed);
        if outcome.is_success() {
            self.read_success.record(elapsed);
        } else {
            self.read_error.record(elapsed);
        }
        self.touch_key(key, |km| {
            km.ops += 1;
            km.contended_ops += u64::from(contended);
        });
    }

    /// Record a lock or intent request
    pub fn record_write(&self, key: &[u8], status: &TxOpStatus, contended: bool, elapsed: Duration) {
        self.write.record(elapsed);
        let failed = !status.is_ok();
        if failed {
            self.write_error.record(elapsed);
        } else {
            self.write_success.record(elapsed);
        }
        let km = self.touch_key(key, |km| {
            km.writes += 1;
            km.write_errors += u64::from(failed);
            km.ops += 1;
            km.contended_ops += u64::from(contended);
        });

        let degree = km.pessimism_degree(self.alpha);
        if degree > self.lambda && self.pessimism_keys.lock().insert(key.to_vec()) {
            debug!(key = %String::from_utf8_lossy(key), degree, "pessimism key");
        }
    }

    /// Counters of `key` in the current window
    pub fn key_metric(&self, key: &[u8]) -> Option<KeyMetric> {
        self.keys.get(key).map(|km| *km)
    }

    /// Forget a key dropped from memory
    pub fn gc_key(&self, key: &[u8]) {
        self.keys.remove(key);
    }

    /// Number of keys tracked
    pub fn tracked_keys(&self) -> usize {
        self.keys.len()
    }

    /// Current counters; drains the pessimism-key set
    pub fn snapshot(&self) -> MetricSnapshot {
        let pessimism_keys: Vec<_> = std::mem::take(&mut *self.pessimism_keys.lock())
            .into_iter()
            .collect();
        if !pessimism_keys.is_empty() {
            info!(count = pessimism_keys.len(), "pessimism keys collected");
        }
        MetricSnapshot {
            read_count: self.read.count(),
            read_success_count: self.read_success.count(),
            read_error_count: self.read_error.count(),
            read_mean_us: self.read.mean_us(),
            write_count: self.write.count(),
            write_success_count: self.write_success.count(),
            write_error_count: self.write_error.count(),
            write_mean_us: self.write.mean_us(),
            pessimism_keys,
        }
    }
}

/// Background thread sending a region's [`RegionReport`] every period
pub struct MetricReporter {
    signal: Arc<StopSignal>,
    handle: Option<JoinHandle<()>>,
}

impl MetricReporter {
    /// Report `metric` for `range` to `coordinator` every `period`
    pub fn start(
        range: Range,
        metric: Arc<RegionMetric>,
        coordinator: Arc<dyn Coordinator>,
        period: Duration,
    ) -> Self {
        let signal = Arc::new(StopSignal::default());
        let thread_signal = Arc::clone(&signal);

        let handle = thread::Builder::new()
            .name("txkv-metric-reporter".to_string())
            .spawn(move || {
                while thread_signal.sleep(period) {
                    report(&range, &metric, coordinator.as_ref());
                }
            })
            .expect("failed to spawn metric reporter thread");

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

impl Drop for MetricReporter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn report(range: &Range, metric: &RegionMetric, coordinator: &dyn Coordinator) {
    let snapshot = metric.snapshot();
    let report = RegionReport {
        range: range.clone(),
        read_count: snapshot.read_count,
        write_count: snapshot.write_count,
        pessimism_keys: snapshot.pessimism_keys,
    };
    if let Err(e) = coordinator.report_region_metric(report) {
        warn!(range = %range, error = %e, "region metric report failed");
    }
}
