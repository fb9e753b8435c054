//! Transaction table configuration via TOML
//!
//! Every field has a default, so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use txkv_core::{Error, Result};

/// Which finished transactions the table garbage collector may remove
///
/// # Example
///
/// ```toml
/// retention = "edge_free"
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    /// Like `Horizon`, but a node with edges also waits for every neighbour
    /// to pass the horizon. Connected nodes are then removed together with
    /// their edges, so no edge is dropped while one end can still form a
    /// dangerous structure.
    EdgeFree,
    /// Remove a finished node once every transaction that started before it
    /// finished has also finished, dropping its edges from its neighbours.
    #[default]
    Horizon,
}

/// Transaction table configuration.
///
/// # Example
///
/// ```toml
/// gc_period_ms = 1000
/// retention = "horizon"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxTableConfig {
    /// Interval between garbage collection passes
    #[serde(default = "default_gc_period_ms")]
    pub gc_period_ms: u64,
    /// Removal predicate used by garbage collection
    #[serde(default)]
    pub retention: RetentionPolicy,
}

fn default_gc_period_ms() -> u64 {
    1000
}

impl Default for TxTableConfig {
    fn default() -> Self {
        Self {
            gc_period_ms: default_gc_period_ms(),
            retention: RetentionPolicy::default(),
        }
    }
}

impl TxTableConfig {
    /// Interval between garbage collection passes
    pub fn gc_period(&self) -> Duration {
        Duration::from_millis(self.gc_period_ms)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if `gc_period_ms` is zero.
    pub fn validate(&self) -> Result<()> {
        if self.gc_period_ms == 0 {
            return Err(Error::Config("gc_period_ms must be > 0".to_string()));
        }
        Ok(())
    }

    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the document cannot be parsed or is invalid.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TxTableConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse table config: {}", e)))?;
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
