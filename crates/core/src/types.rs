//! Transaction identity types
//!
//! This module defines the types that identify a transaction across the
//! coordinator, the transaction index and the storage tier:
//! - Timestamp: a point in the single global timestamp order
//! - TxStatus: the lifecycle state of a transaction
//! - TxIdentifier: start timestamp, optional commit timestamp and status

use crate::status::TxOpStatus;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A point in the global timestamp order.
///
/// Start and commit timestamps are drawn from the same counter, so a start
/// timestamp and a commit timestamp are always directly comparable.
pub type Timestamp = u64;

/// Smallest representable timestamp; no transaction is ever issued this value.
pub const MIN_TIMESTAMP: Timestamp = 0;

/// Largest representable timestamp.
pub const MAX_TIMESTAMP: Timestamp = u64::MAX;

/// Lifecycle state of a transaction
///
/// Successful path: `Active -> Preparing -> Committing -> Committed`.
/// Failure path: `Active -> Preparing -> Aborting -> Aborted`.
/// `Abnormal` is terminal and marks a commit or abort sequence that failed
/// part-way through.
///
/// The declaration order is meaningful: a transaction can still be finished
/// by its client only while its status is `<= Preparing`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum TxStatus {
    /// Transaction is running
    #[default]
    Active,
    /// Client has started sending write intents
    Preparing,
    /// Commit has been requested but not confirmed
    Committing,
    /// Transaction committed
    Committed,
    /// Abort has been requested but not confirmed
    Aborting,
    /// Transaction aborted
    Aborted,
    /// Commit or abort failed part-way through
    Abnormal,
}

impl TxStatus {
    /// Whether the status still permits a client commit or abort
    pub fn is_finishable(&self) -> bool {
        *self <= TxStatus::Preparing
    }

    /// Whether the transaction reached a final state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TxStatus::Committed | TxStatus::Aborted | TxStatus::Abnormal
        )
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TxStatus::Active => "active",
            TxStatus::Preparing => "preparing",
            TxStatus::Committing => "committing",
            TxStatus::Committed => "committed",
            TxStatus::Aborting => "aborting",
            TxStatus::Aborted => "aborted",
            TxStatus::Abnormal => "abnormal",
        };
        f.write_str(name)
    }
}

/// Identity of a transaction
///
/// `start_ts` is the snapshot the transaction reads at and doubles as its
/// identity everywhere in the system. `commit_ts` is assigned by the
/// coordinator once the transaction commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TxIdentifier {
    /// Snapshot timestamp; unique per transaction
    pub start_ts: Timestamp,
    /// Commit timestamp, set on commit
    pub commit_ts: Option<Timestamp>,
    /// Current lifecycle state
    pub status: TxStatus,
}

impl TxIdentifier {
    /// An active transaction reading at `start_ts`
    pub fn new(start_ts: Timestamp) -> Self {
        Self {
            start_ts,
            commit_ts: None,
            status: TxStatus::Active,
        }
    }

    /// A committed transaction, as sent by a client committing its intents
    pub fn committed(start_ts: Timestamp, commit_ts: Timestamp) -> Self {
        Self {
            start_ts,
            commit_ts: Some(commit_ts),
            status: TxStatus::Committed,
        }
    }

    /// Whether this identifier belongs to the same transaction as `other`
    #[inline]
    pub fn same_tx(&self, other: &TxIdentifier) -> bool {
        self.start_ts == other.start_ts
    }

    /// Whether the transaction committed
    #[inline]
    pub fn is_committed(&self) -> bool {
        self.status == TxStatus::Committed
    }

    /// Whether the transaction aborted
    #[inline]
    pub fn is_aborted(&self) -> bool {
        self.status == TxStatus::Aborted
    }

    /// Fold the per-key results of applying this coordinator decision
    ///
    /// A client commits or cleans every key it wrote once the coordinator
    /// decided. If any key refuses, the decision is only partly applied and
    /// the identifier becomes `Abnormal`; the commit timestamp is kept.
    pub fn resolve<'a>(mut self, statuses: impl IntoIterator<Item = &'a TxOpStatus>) -> Self {
        if statuses.into_iter().any(|status| !status.is_ok()) {
            self.status = TxStatus::Abnormal;
        }
        self
    }
}

impl fmt::Display for TxIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.commit_ts {
            Some(commit_ts) => write!(
                f,
                "tx(start={}, commit={}, {})",
                self.start_ts, commit_ts, self.status
            ),
            None => write!(f, "tx(start={}, {})", self.start_ts, self.status),
        }
    }
}

/// A stored value, possibly a deletion marker
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Value {
    /// Raw value bytes; empty for deletion markers
    pub content: Vec<u8>,
    /// Whether this value records a delete
    pub is_delete: bool,
}

impl Value {
    /// A regular value
    pub fn new(content: impl Into<Vec<u8>>) -> Self {
        Self {
            content: content.into(),
            is_delete: false,
        }
    }

    /// A deletion marker
    pub fn tombstone() -> Self {
        Self {
            content: Vec::new(),
            is_delete: true,
        }
    }
}
