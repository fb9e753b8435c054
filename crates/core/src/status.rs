//! Per-operation outcomes of the transaction index
//!
//! These are protocol results, not errors: a `Blocked` write is expected
//! traffic, and `Conflict`/`TooLate` tell the client to abort. Collaborator
//! failures (network, backend) use [`crate::Error`] instead.

use crate::types::Value;
use std::fmt;

/// Outcome of a lock, intent, clean or commit request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxOpStatus {
    /// Request applied
    Ok,
    /// Request is waiting on an older holder; a continuation was registered
    Blocked(String),
    /// A younger transaction holds the key; the requester must abort
    Conflict(String),
    /// A version newer than the requester's snapshot already committed
    TooLate(String),
    /// The lock or intent the request refers to does not exist
    NotExist(String),
    /// The key is not owned by this transaction index
    PartitionErr(String),
}

impl TxOpStatus {
    /// Whether the request applied
    pub fn is_ok(&self) -> bool {
        matches!(self, TxOpStatus::Ok)
    }

    /// Whether the request registered a continuation
    pub fn is_blocked(&self) -> bool {
        matches!(self, TxOpStatus::Blocked(_))
    }

    /// Human-readable detail; empty for `Ok`
    pub fn message(&self) -> &str {
        match self {
            TxOpStatus::Ok => "",
            TxOpStatus::Blocked(m)
            | TxOpStatus::Conflict(m)
            | TxOpStatus::TooLate(m)
            | TxOpStatus::NotExist(m)
            | TxOpStatus::PartitionErr(m) => m,
        }
    }

    /// Short name of the status code
    pub fn code(&self) -> &'static str {
        match self {
            TxOpStatus::Ok => "ok",
            TxOpStatus::Blocked(_) => "blocked",
            TxOpStatus::Conflict(_) => "conflict",
            TxOpStatus::TooLate(_) => "too_late",
            TxOpStatus::NotExist(_) => "not_exist",
            TxOpStatus::PartitionErr(_) => "partition_err",
        }
    }
}

impl fmt::Display for TxOpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxOpStatus::Ok => f.write_str("ok"),
            other => write!(f, "{}: {}", other.code(), other.message()),
        }
    }
}

/// Outcome of a read request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A version visible at the reader's snapshot
    Found(Value),
    /// No visible version, or the visible version is a deletion marker
    NotFound,
    /// The read did not run to completion (blocked, conflict, partition error...)
    Failed(TxOpStatus),
}

impl ReadOutcome {
    /// The value if one was found
    pub fn value(&self) -> Option<&Value> {
        match self {
            ReadOutcome::Found(v) => Some(v),
            _ => None,
        }
    }

    /// Whether the read registered a continuation
    pub fn is_blocked(&self) -> bool {
        matches!(self, ReadOutcome::Failed(s) if s.is_blocked())
    }

    /// Whether the read completed, found or not
    pub fn is_success(&self) -> bool {
        !matches!(self, ReadOutcome::Failed(_))
    }
}
