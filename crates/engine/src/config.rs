//! Transaction index configuration via TOML
//!
//! Every field has a default, so an empty document is a valid configuration.
//! Load with [`TxIndexConfig::from_file`] or [`TxIndexConfig::from_toml_str`];
//! both validate before returning.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use txkv_core::{Error, Result};

/// Transaction index configuration.
///
/// # Example
///
/// ```toml
/// # Number of latch buckets per region
/// latch_bucket_num = 128
///
/// # Persist one bucket every 100ms, refresh the low-water mark every 2s
/// persist_period_ms = 100
/// min_ats_period_ms = 2000
/// enable_persistor = true
///
/// enable_dep_reporter = true
///
/// # Pessimism degree = alpha * write_error_ratio + (1 - alpha) * contended_ratio
/// metric_period_ms = 2000
/// enable_metric_reporter = true
/// alpha = 1.0
/// lambda = 0.3
///
/// scheduler_threads = 2
/// scheduler_queue_depth = 4096
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxIndexConfig {
    /// Latch buckets per region
    #[serde(default = "default_latch_bucket_num")]
    pub latch_bucket_num: usize,
    /// Interval between persistor turns
    #[serde(default = "default_persist_period_ms")]
    pub persist_period_ms: u64,
    /// Interval between low-water mark refreshes
    #[serde(default = "default_min_ats_period_ms")]
    pub min_ats_period_ms: u64,
    /// Run the background persistor
    #[serde(default = "default_true")]
    pub enable_persistor: bool,
    /// Track readers and report anti-dependency edges
    #[serde(default = "default_true")]
    pub enable_dep_reporter: bool,
    /// Window over which per-key metrics are accumulated, and the interval
    /// between metric reports to the coordinator
    #[serde(default = "default_metric_period_ms")]
    pub metric_period_ms: u64,
    /// Send pessimism keys to the coordinator every metric period
    #[serde(default = "default_true")]
    pub enable_metric_reporter: bool,
    /// Weight of the write error ratio in the pessimism degree
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    /// Pessimism degree above which a key is reported as a pessimism key
    #[serde(default = "default_lambda")]
    pub lambda: f64,
    /// Worker threads running woken continuations
    #[serde(default = "default_scheduler_threads")]
    pub scheduler_threads: usize,
    /// Continuations queued before wake-ups run inline
    #[serde(default = "default_scheduler_queue_depth")]
    pub scheduler_queue_depth: usize,
}

fn default_latch_bucket_num() -> usize {
    128
}

fn default_persist_period_ms() -> u64 {
    100
}

fn default_min_ats_period_ms() -> u64 {
    2000
}

fn default_true() -> bool {
    true
}

fn default_metric_period_ms() -> u64 {
    2000
}

fn default_alpha() -> f64 {
    1.0
}

fn default_lambda() -> f64 {
    0.3
}

fn default_scheduler_threads() -> usize {
    2
}

fn default_scheduler_queue_depth() -> usize {
    4096
}

impl Default for TxIndexConfig {
    fn default() -> Self {
        Self {
            latch_bucket_num: default_latch_bucket_num(),
            persist_period_ms: default_persist_period_ms(),
            min_ats_period_ms: default_min_ats_period_ms(),
            enable_persistor: true,
            enable_dep_reporter: true,
            metric_period_ms: default_metric_period_ms(),
            enable_metric_reporter: true,
            alpha: default_alpha(),
            lambda: default_lambda(),
            scheduler_threads: default_scheduler_threads(),
            scheduler_queue_depth: default_scheduler_queue_depth(),
        }
    }
}

impl TxIndexConfig {
    /// Interval between persistor turns
    pub fn persist_period(&self) -> Duration {
        Duration::from_millis(self.persist_period_ms)
    }

    /// Interval between low-water mark refreshes
    pub fn min_ats_period(&self) -> Duration {
        Duration::from_millis(self.min_ats_period_ms)
    }

    /// Per-key metric window and report interval
    pub fn metric_period(&self) -> Duration {
        Duration::from_millis(self.metric_period_ms)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.latch_bucket_num == 0 {
            return Err(Error::Config("latch_bucket_num must be > 0".to_string()));
        }
        if self.persist_period_ms == 0 {
            return Err(Error::Config("persist_period_ms must be > 0".to_string()));
        }
        if self.metric_period_ms == 0 {
            return Err(Error::Config("metric_period_ms must be > 0".to_string()));
        }
        if !(0.0..=1.0).contains(&self.alpha) {
            return Err(Error::Config(format!(
                "alpha must be within [0, 1], got {}",
                self.alpha
            )));
        }
        if !self.lambda.is_finite() || self.lambda < 0.0 {
            return Err(Error::Config(format!(
                "lambda must be a non-negative number, got {}",
                self.lambda
            )));
        }
        if self.scheduler_threads == 0 {
            return Err(Error::Config("scheduler_threads must be > 0".to_string()));
        }
        if self.scheduler_queue_depth == 0 {
            return Err(Error::Config(
                "scheduler_queue_depth must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the document cannot be parsed or is invalid.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TxIndexConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse txindex config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a config file.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the file cannot be read, `Error::Config` if it
    /// cannot be parsed or is invalid.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}
