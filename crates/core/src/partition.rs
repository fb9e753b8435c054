//! Range partitioning of the key space
//!
//! A [`Partition`] assigns disjoint key [`Range`]s to transaction index
//! instances. An empty bound means the range is unbounded on that side.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

/// A contiguous interval of keys
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    /// Lower bound; empty means unbounded
    pub left: Vec<u8>,
    /// Upper bound; empty means unbounded
    pub right: Vec<u8>,
    /// Whether `left` itself is part of the range
    pub left_include: bool,
    /// Whether `right` itself is part of the range
    pub right_include: bool,
}

impl Range {
    /// Build a range from its bounds
    pub fn new(
        left: impl Into<Vec<u8>>,
        right: impl Into<Vec<u8>>,
        left_include: bool,
        right_include: bool,
    ) -> Self {
        Self {
            left: left.into(),
            right: right.into(),
            left_include,
            right_include,
        }
    }

    /// The whole key space
    pub fn unbounded() -> Self {
        Self::new(Vec::new(), Vec::new(), true, true)
    }

    /// The degenerate range `[key, key]`, used to look a key up in a range table
    pub fn point(key: &[u8]) -> Self {
        Self::new(key, key, true, true)
    }

    /// Whether `key` falls inside this range
    pub fn contains(&self, key: &[u8]) -> bool {
        let above_left = self.left.is_empty()
            || key > self.left.as_slice()
            || (key == self.left.as_slice() && self.left_include);
        let below_right = self.right.is_empty()
            || key < self.right.as_slice()
            || (key == self.right.as_slice() && self.right_include);
        above_left && below_right
    }

    /// Whether every key of `self` sorts before every key of `other`
    pub fn is_before(&self, other: &Range) -> bool {
        if self.right.is_empty() {
            return false;
        }
        match self.right.cmp(&other.left) {
            Ordering::Less => !other.left.is_empty(),
            Ordering::Equal => !self.right_include && other.left_include,
            Ordering::Greater => false,
        }
    }

    /// Whether the two ranges share at least one key
    pub fn overlaps(&self, other: &Range) -> bool {
        !self.is_before(other) && !other.is_before(self)
    }

    /// Ordering for disjoint ranges; overlapping ranges compare equal
    pub fn cmp_disjoint(&self, other: &Range) -> Ordering {
        if self.is_before(other) {
            Ordering::Less
        } else if other.is_before(self) {
            Ordering::Greater
        } else {
            Ordering::Equal
        }
    }

    /// Interval notation, e.g. `[a, b)`
    pub fn describe(&self) -> String {
        format!(
            "{}{}, {}{}",
            if self.left_include { '[' } else { '(' },
            String::from_utf8_lossy(&self.left),
            String::from_utf8_lossy(&self.right),
            if self.right_include { ']' } else { ')' },
        )
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Assignment of one range to a transaction index
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PartitionConfig {
    /// Address of the transaction index owning the range
    pub txindex_addr: String,
    /// Keys clients should access pessimistically
    pub pessimism_keys: BTreeSet<Vec<u8>>,
}

impl PartitionConfig {
    /// A range assignment without pessimism keys
    pub fn new(txindex_addr: impl Into<String>) -> Self {
        Self {
            txindex_addr: txindex_addr.into(),
            pessimism_keys: BTreeSet::new(),
        }
    }
}

/// The full range table plus the storage tier's address
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Partition {
    /// Address of the durable storage tier
    pub storage_addr: String,
    configs: Vec<(Range, PartitionConfig)>,
}

impl Partition {
    /// An empty range table
    pub fn new(storage_addr: impl Into<String>) -> Self {
        Self {
            storage_addr: storage_addr.into(),
            configs: Vec::new(),
        }
    }

    /// Assign `range` to `config`, keeping the table sorted
    ///
    /// # Errors
    ///
    /// Returns `Error::Partition` if `range` overlaps an existing range.
    pub fn add_range(&mut self, range: Range, config: PartitionConfig) -> Result<()> {
        if let Some((existing, _)) = self.configs.iter().find(|(r, _)| r.overlaps(&range)) {
            return Err(Error::Partition(format!(
                "range {} overlaps {}",
                range.describe(),
                existing.describe()
            )));
        }
        let pos = self
            .configs
            .partition_point(|(r, _)| r.is_before(&range));
        self.configs.insert(pos, (range, config));
        Ok(())
    }

    /// All assignments, sorted by range
    pub fn configs(&self) -> &[(Range, PartitionConfig)] {
        &self.configs
    }

    /// Ranges assigned to the transaction index at `addr`
    pub fn ranges_for<'a>(&'a self, addr: &'a str) -> impl Iterator<Item = &'a Range> + 'a {
        self.configs
            .iter()
            .filter(move |(_, c)| c.txindex_addr == addr)
            .map(|(r, _)| r)
    }

    /// The assignment responsible for `key`, if any
    pub fn lookup(&self, key: &[u8]) -> Option<(&Range, &PartitionConfig)> {
        let point = Range::point(key);
        let pos = self.configs.partition_point(|(r, _)| r.is_before(&point));
        self.configs
            .get(pos)
            .filter(|(r, _)| r.contains(key))
            .map(|(r, c)| (r, c))
    }

    /// Mutable assignment of exactly `range`
    pub fn config_mut(&mut self, range: &Range) -> Option<&mut PartitionConfig> {
        self.configs
            .iter_mut()
            .find(|(r, _)| r == range)
            .map(|(_, c)| c)
    }

    /// Whether clients should lock `key` before writing it
    pub fn is_pessimistic(&self, key: &[u8]) -> bool {
        self.lookup(key)
            .is_some_and(|(_, config)| config.pessimism_keys.contains(key))
    }
}
