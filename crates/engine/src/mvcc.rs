//! Per-key multi-version state
//!
//! [`MvccValue`] holds everything the transaction index knows about one key:
//! the current lock or intent, the committed versions still in memory, the
//! readers seen since the last reader pruning, and the continuations of
//! blocked requests. It is only ever touched under its bucket's latch and
//! never blocks; blocking is the bucket's decision.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::fmt;
use tracing::warn;
use txkv_core::{Timestamp, TxIdentifier, Value};

use crate::background::WakePriority;

/// Kind of pending write on a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockKind {
    /// Pessimistic placeholder without a value
    WriteLock,
    /// Tentative value pending commit
    WriteIntent,
}

impl fmt::Display for LockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockKind::WriteLock => f.write_str("write_lock"),
            LockKind::WriteIntent => f.write_str("write_intent"),
        }
    }
}

/// Pending write on a key; the holder exists exactly when a lock does
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MvccLock {
    /// No pending writer
    #[default]
    None,
    /// Pessimistic placeholder
    WriteLock {
        /// Owning transaction
        holder: TxIdentifier,
    },
    /// Tentative value
    WriteIntent {
        /// Owning transaction
        holder: TxIdentifier,
        /// Value installed on commit
        value: Value,
    },
}

impl MvccLock {
    /// Kind of the pending write, if any
    pub fn kind(&self) -> Option<LockKind> {
        match self {
            MvccLock::None => None,
            MvccLock::WriteLock { .. } => Some(LockKind::WriteLock),
            MvccLock::WriteIntent { .. } => Some(LockKind::WriteIntent),
        }
    }

    /// Owner of the pending write, if any
    pub fn holder(&self) -> Option<&TxIdentifier> {
        match self {
            MvccLock::None => None,
            MvccLock::WriteLock { holder } | MvccLock::WriteIntent { holder, .. } => Some(holder),
        }
    }
}

/// A committed version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedVersion {
    /// Committing transaction; `commit_ts` is always set
    pub txid: TxIdentifier,
    /// Committed value or deletion marker
    pub value: Value,
}

impl CommittedVersion {
    /// Commit timestamp of the version
    #[inline]
    pub fn commit_ts(&self) -> Timestamp {
        self.txid.commit_ts.unwrap_or_default()
    }
}

/// Committed versions of one key, newest first
///
/// No two versions share a commit timestamp.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionChain {
    versions: VecDeque<CommittedVersion>,
}

impl VersionChain {
    /// An empty chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a version at its commit timestamp
    ///
    /// Commits normally arrive newest-last, making this a push to the front.
    /// A version with an already present commit timestamp replaces it.
    pub fn insert(&mut self, version: CommittedVersion) {
        let ts = version.commit_ts();
        let pos = self.versions.partition_point(|v| v.commit_ts() > ts);
        match self.versions.get_mut(pos) {
            Some(existing) if existing.commit_ts() == ts => {
                warn!(commit_ts = ts, "replacing version with equal commit timestamp");
                *existing = version;
            }
            _ => self.versions.insert(pos, version),
        }
    }

    /// Newest version
    #[inline]
    pub fn latest(&self) -> Option<&CommittedVersion> {
        self.versions.front()
    }

    /// Newest version with `commit_ts <= ts`
    pub fn seek(&self, ts: Timestamp) -> Option<&CommittedVersion> {
        self.versions.iter().find(|v| v.commit_ts() <= ts)
    }

    /// Versions with `commit_ts > ts`, newest first
    pub fn newer_than(&self, ts: Timestamp) -> impl Iterator<Item = &CommittedVersion> {
        self.versions.iter().take_while(move |v| v.commit_ts() > ts)
    }

    /// Versions with `commit_ts <= ts`, newest first
    pub fn at_or_below(&self, ts: Timestamp) -> impl Iterator<Item = &CommittedVersion> {
        self.versions.iter().skip_while(move |v| v.commit_ts() > ts)
    }

    /// Remove every version with `commit_ts <= ts`; returns how many were removed
    pub fn truncate(&mut self, ts: Timestamp) -> usize {
        let keep = self.versions.partition_point(|v| v.commit_ts() > ts);
        let removed = self.versions.len() - keep;
        self.versions.truncate(keep);
        removed
    }

    /// Number of versions
    #[inline]
    pub fn len(&self) -> usize {
        self.versions.len()
    }

    /// Whether the chain has no versions
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// Iterate newest first
    pub fn iter(&self) -> impl Iterator<Item = &CommittedVersion> {
        self.versions.iter()
    }
}

/// Continuation of a blocked request
pub struct Waiter {
    /// Scheduling priority once woken
    pub priority: WakePriority,
    /// The continuation
    pub work: Box<dyn FnOnce() + Send>,
}

impl Waiter {
    /// Wrap a continuation
    pub fn new(priority: WakePriority, work: impl FnOnce() + Send + 'static) -> Self {
        Self {
            priority,
            work: Box::new(work),
        }
    }
}

impl fmt::Debug for Waiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Waiter")
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

/// Waiters of one key; usually zero to two
pub type Waiters = SmallVec<[Waiter; 2]>;

/// State of one key
#[derive(Debug, Default)]
pub struct MvccValue {
    lock: MvccLock,
    versions: VersionChain,
    readers: FxHashMap<Timestamp, TxIdentifier>,
    waiters: Waiters,
}

impl MvccValue {
    /// A key never written nor read
    pub fn new() -> Self {
        Self::default()
    }

    /// The pending write
    #[inline]
    pub fn lock(&self) -> &MvccLock {
        &self.lock
    }

    /// Owner of the pending write
    #[inline]
    pub fn holder(&self) -> Option<&TxIdentifier> {
        self.lock.holder()
    }

    /// Committed versions
    #[inline]
    pub fn versions(&self) -> &VersionChain {
        &self.versions
    }

    /// Install a pessimistic placeholder
    pub fn write_lock(&mut self, txid: TxIdentifier) {
        self.lock = MvccLock::WriteLock { holder: txid };
    }

    /// Install a tentative value
    pub fn prewrite(&mut self, value: Value, txid: TxIdentifier) {
        self.lock = MvccLock::WriteIntent { holder: txid, value };
    }

    /// Drop the pending write without touching committed versions
    pub fn clean(&mut self) {
        self.lock = MvccLock::None;
    }

    /// Move the intent into the version chain at `txid.commit_ts`
    ///
    /// Returns false and changes nothing unless an intent is pending and
    /// `txid` carries a commit timestamp.
    pub fn commit(&mut self, txid: &TxIdentifier) -> bool {
        if txid.commit_ts.is_none() || !matches!(self.lock, MvccLock::WriteIntent { .. }) {
            return false;
        }
        if let MvccLock::WriteIntent { value, .. } = std::mem::take(&mut self.lock) {
            self.versions.insert(CommittedVersion { txid: *txid, value });
        }
        true
    }

    /// Newest version visible at `ts`
    pub fn seek(&self, ts: Timestamp) -> Option<&CommittedVersion> {
        self.versions.seek(ts)
    }

    /// Remove versions with `commit_ts <= ts`
    pub fn truncate(&mut self, ts: Timestamp) -> usize {
        self.versions.truncate(ts)
    }

    /// Remember a reader for anti-dependency tracking
    pub fn add_reader(&mut self, txid: TxIdentifier) {
        self.readers.insert(txid.start_ts, txid);
    }

    /// Readers seen since the last pruning
    pub fn readers(&self) -> impl Iterator<Item = &TxIdentifier> {
        self.readers.values()
    }

    /// Forget readers that started before `horizon`; returns how many
    pub fn prune_readers(&mut self, horizon: Timestamp) -> usize {
        let before = self.readers.len();
        self.readers.retain(|start_ts, _| *start_ts >= horizon);
        before - self.readers.len()
    }

    /// Queue a continuation
    pub fn add_waiter(&mut self, waiter: Waiter) {
        self.waiters.push(waiter);
    }

    /// Number of queued continuations
    pub fn waiter_count(&self) -> usize {
        self.waiters.len()
    }

    /// Take every queued continuation, to be scheduled after the latch is released
    pub fn take_waiters(&mut self) -> Waiters {
        std::mem::take(&mut self.waiters)
    }

    /// Whether the key holds nothing worth keeping in memory
    pub fn is_vacant(&self) -> bool {
        self.versions.is_empty()
            && self.lock == MvccLock::None
            && self.readers.is_empty()
            && self.waiters.is_empty()
    }
}
