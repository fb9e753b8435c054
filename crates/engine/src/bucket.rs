//! Latched key buckets
//!
//! A [`KeyBucket`] owns a map from key to [`MvccValue`] behind a single latch.
//! Every operation takes the latch for its whole duration and never waits
//! while holding it: a request that has to wait leaves its continuation on
//! the key and returns `Blocked`. Continuations are handed to the
//! [`BackgroundScheduler`] only after the latch is released.
//!
//! ## Wait-die
//!
//! A request meeting another transaction's lock or intent compares start
//! timestamps. If the holder is older the requester waits; if the holder is
//! younger the requester fails with `Conflict`. Older transactions are never
//! starved by younger ones, and no wait cycle can form.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use txkv_core::{
    Dep, Error, ReadOutcome, Result, Timestamp, TxIdentifier, TxOpStatus, Value,
};

use crate::background::{BackgroundScheduler, WakePriority};
use crate::mvcc::{CommittedVersion, LockKind, MvccLock, MvccValue, Waiter, Waiters};

/// Result of a lock or intent request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReply {
    /// Protocol outcome
    pub status: TxOpStatus,
    /// Anti-dependency edges discovered, reader to writer
    pub deps: Vec<Dep>,
    /// The request turned the transaction's own lock into an intent
    pub is_lock_upgrade: bool,
    /// Another transaction held the key when the request arrived
    pub contended: bool,
}

/// Result of a read request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadReply {
    /// Protocol outcome
    pub outcome: ReadOutcome,
    /// Anti-dependency edges discovered, reader to writer
    pub deps: Vec<Dep>,
    /// Another transaction held the key when the request arrived
    pub contended: bool,
}

/// Committed versions of one key due for persistence, newest first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistEntry {
    /// User key
    pub key: Vec<u8>,
    /// Versions with `commit_ts <= min_ats`
    pub versions: Vec<CommittedVersion>,
}

/// Result of trimming a bucket
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Trimmed {
    /// Versions or readers removed
    pub removed: usize,
    /// Keys dropped from memory because nothing was left on them
    pub erased_keys: Vec<Vec<u8>>,
}

fn show(key: &[u8]) -> std::borrow::Cow<'_, str> {
    String::from_utf8_lossy(key)
}

/// One latched shard of a region's key space
pub struct KeyBucket {
    kvs: Mutex<FxHashMap<Vec<u8>, MvccValue>>,
    scheduler: Arc<BackgroundScheduler>,
    track_deps: bool,
}

impl KeyBucket {
    /// An empty bucket waking continuations on `scheduler`
    ///
    /// With `track_deps` false, readers are not recorded and no edges are
    /// reported.
    pub fn new(scheduler: Arc<BackgroundScheduler>, track_deps: bool) -> Self {
        Self {
            kvs: Mutex::new(FxHashMap::default()),
            scheduler,
            track_deps,
        }
    }

    /// Number of keys held in memory
    pub fn len(&self) -> usize {
        self.kvs.lock().len()
    }

    /// Whether no key is held in memory
    pub fn is_empty(&self) -> bool {
        self.kvs.lock().is_empty()
    }

    /// Run `f` on the state of `key` under the latch
    pub fn inspect<R>(&self, key: &[u8], f: impl FnOnce(&MvccValue) -> R) -> Option<R> {
        self.kvs.lock().get(key).map(f)
    }

    /// Acquire a pessimistic write lock
    pub fn write_lock<W>(&self, key: &[u8], txid: &TxIdentifier, on_wake: W) -> WriteReply
    where
        W: FnOnce() + Send + 'static,
    {
        self.write(LockKind::WriteLock, key, None, txid, on_wake)
    }

    /// Install a write intent, upgrading the transaction's own lock if present
    pub fn write_intent<W>(
        &self,
        key: &[u8],
        value: Value,
        txid: &TxIdentifier,
        on_wake: W,
    ) -> WriteReply
    where
        W: FnOnce() + Send + 'static,
    {
        self.write(LockKind::WriteIntent, key, Some(value), txid, on_wake)
    }

    fn write<W>(
        &self,
        kind: LockKind,
        key: &[u8],
        value: Option<Value>,
        txid: &TxIdentifier,
        on_wake: W,
    ) -> WriteReply
    where
        W: FnOnce() + Send + 'static,
    {
        let mut reply = WriteReply {
            status: TxOpStatus::Ok,
            deps: Vec::new(),
            is_lock_upgrade: false,
            contended: false,
        };

        let mut kvs = self.kvs.lock();
        let mv = kvs.entry(key.to_vec()).or_default();

        if let Some(latest) = mv.versions().latest() {
            if latest.commit_ts() >= txid.start_ts {
                let msg = format!(
                    "{} write {} on key {} too late, found version {}",
                    txid,
                    kind,
                    show(key),
                    latest.txid
                );
                warn!(key = %show(key), start_ts = txid.start_ts, %kind, "write too late");
                reply.status = TxOpStatus::TooLate(msg);
                return reply;
            }
        }

        if let Some(holder) = mv.holder().copied() {
            let held = mv.lock().kind();
            if holder.start_ts < txid.start_ts {
                let msg = format!(
                    "{} write {} on key {} blocked by {}",
                    txid,
                    kind,
                    show(key),
                    holder
                );
                info!(key = %show(key), start_ts = txid.start_ts, holder = holder.start_ts, %kind, "write blocked");
                mv.add_waiter(Waiter::new(WakePriority::Write, on_wake));
                reply.status = TxOpStatus::Blocked(msg);
                reply.contended = true;
                return reply;
            }
            if holder.start_ts > txid.start_ts {
                let msg = format!(
                    "{} write {} on key {} conflicts with {}",
                    txid,
                    kind,
                    show(key),
                    holder
                );
                warn!(key = %show(key), start_ts = txid.start_ts, holder = holder.start_ts, %kind, "write conflict");
                reply.status = TxOpStatus::Conflict(msg);
                reply.contended = true;
                return reply;
            }
            if held >= Some(kind) {
                debug!(key = %show(key), start_ts = txid.start_ts, %kind, "repeated write");
                return reply;
            }
            reply.is_lock_upgrade = true;
        }

        if self.track_deps {
            reply.deps.extend(
                mv.readers()
                    .map(|reader| Dep::read_write(key.to_vec(), *reader, *txid)),
            );
        }

        match (kind, value) {
            (LockKind::WriteIntent, Some(value)) => mv.prewrite(value, *txid),
            _ => mv.write_lock(*txid),
        }
        reply
    }

    /// Drop the transaction's lock or intent and wake the key's waiters
    pub fn clean(&self, key: &[u8], txid: &TxIdentifier) -> TxOpStatus {
        let waiters = {
            let mut kvs = self.kvs.lock();
            match kvs.get_mut(key) {
                Some(mv) if mv.holder().map(|h| h.start_ts) == Some(txid.start_ts) => {
                    mv.clean();
                    mv.take_waiters()
                }
                _ => {
                    let msg = format!("{} clean on key {} not exist", txid, show(key));
                    error!(key = %show(key), start_ts = txid.start_ts, "clean on missing lock");
                    return TxOpStatus::NotExist(msg);
                }
            }
        };
        self.wake(waiters);
        TxOpStatus::Ok
    }

    /// Commit the transaction's intent at `txid.commit_ts` and wake the key's waiters
    pub fn commit(&self, key: &[u8], txid: &TxIdentifier) -> TxOpStatus {
        let waiters = {
            let mut kvs = self.kvs.lock();
            let committed = kvs
                .get_mut(key)
                .filter(|mv| {
                    matches!(mv.lock(), MvccLock::WriteIntent { holder, .. } if holder.start_ts == txid.start_ts)
                })
                .and_then(|mv| mv.commit(txid).then(|| mv.take_waiters()));
            match committed {
                Some(waiters) => waiters,
                None => {
                    let msg = format!("{} commit on key {} not exist", txid, show(key));
                    error!(key = %show(key), start_ts = txid.start_ts, commit_ts = ?txid.commit_ts, "commit on missing intent");
                    return TxOpStatus::NotExist(msg);
                }
            }
        };
        self.wake(waiters);
        TxOpStatus::Ok
    }

    /// Read the newest version visible at `txid.start_ts`
    ///
    /// A pessimistic read additionally treats any other transaction's lock
    /// or intent under wait-die, like a write would.
    pub fn read<W>(&self, key: &[u8], txid: &TxIdentifier, pessimistic: bool, on_wake: W) -> ReadReply
    where
        W: FnOnce() + Send + 'static,
    {
        let mut reply = ReadReply {
            outcome: ReadOutcome::NotFound,
            deps: Vec::new(),
            contended: false,
        };

        let mut kvs = self.kvs.lock();
        let mv = if self.track_deps {
            kvs.entry(key.to_vec()).or_default()
        } else {
            match kvs.get_mut(key) {
                Some(mv) => mv,
                None => return reply,
            }
        };

        if let Some(holder) = mv.holder().copied() {
            let kind = mv.lock().kind();
            if holder.start_ts == txid.start_ts {
                let msg = format!(
                    "{} read on key {} not exist, found its own {:?}",
                    txid,
                    show(key),
                    kind
                );
                error!(key = %show(key), start_ts = txid.start_ts, "read of own pending write");
                reply.outcome = ReadOutcome::Failed(TxOpStatus::NotExist(msg));
                return reply;
            }
            reply.contended = true;

            let older = holder.start_ts < txid.start_ts;
            if older && (kind == Some(LockKind::WriteIntent) || pessimistic) {
                let msg = format!("{} read on key {} blocked by {}", txid, show(key), holder);
                info!(key = %show(key), start_ts = txid.start_ts, holder = holder.start_ts, pessimistic, "read blocked");
                mv.add_waiter(Waiter::new(WakePriority::Read, on_wake));
                reply.outcome = ReadOutcome::Failed(TxOpStatus::Blocked(msg));
                return reply;
            }
            if !older && pessimistic {
                let msg = format!(
                    "{} pessimistic read on key {} conflicts with {}",
                    txid,
                    show(key),
                    holder
                );
                warn!(key = %show(key), start_ts = txid.start_ts, holder = holder.start_ts, "read conflict");
                reply.outcome = ReadOutcome::Failed(TxOpStatus::Conflict(msg));
                return reply;
            }

            if self.track_deps {
                reply.deps.push(Dep::read_write(key.to_vec(), *txid, holder));
            }
        }

        if self.track_deps {
            reply.deps.extend(
                mv.versions()
                    .newer_than(txid.start_ts)
                    .map(|v| Dep::read_write(key.to_vec(), *txid, v.txid)),
            );
            mv.add_reader(*txid);
        }

        reply.outcome = match mv.seek(txid.start_ts) {
            Some(v) if !v.value.is_delete => ReadOutcome::Found(v.value.clone()),
            _ => ReadOutcome::NotFound,
        };
        reply
    }

    /// Versions with `commit_ts <= min_ats`, grouped by key
    pub fn get_persisting(&self, min_ats: Timestamp) -> Vec<PersistEntry> {
        let kvs = self.kvs.lock();
        kvs.iter()
            .filter_map(|(key, mv)| {
                let versions: Vec<_> = mv.versions().at_or_below(min_ats).cloned().collect();
                if versions.is_empty() {
                    None
                } else {
                    Some(PersistEntry {
                        key: key.clone(),
                        versions,
                    })
                }
            })
            .collect()
    }

    /// Truncate exactly the versions listed in `entries` after they were stored
    ///
    /// Every entry is checked before anything is truncated. Keys left with
    /// nothing on them are dropped from memory.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidOperation` if a key is missing or would lose a
    /// different number of versions than listed (for example because the
    /// list was already cleared).
    pub fn clear_persisted(&self, entries: &[PersistEntry]) -> Result<Trimmed> {
        let mut kvs = self.kvs.lock();

        for entry in entries {
            let Some(newest) = entry.versions.first() else {
                continue;
            };
            let Some(mv) = kvs.get(&entry.key) else {
                error!(key = %show(&entry.key), "clear persisted on missing key");
                return Err(Error::InvalidOperation(format!(
                    "clear persisted: key {} not found",
                    show(&entry.key)
                )));
            };
            let n = mv.versions().at_or_below(newest.commit_ts()).count();
            if n != entry.versions.len() {
                error!(
                    key = %show(&entry.key),
                    expected = entry.versions.len(),
                    found = n,
                    "clear persisted truncate count mismatch"
                );
                return Err(Error::InvalidOperation(format!(
                    "clear persisted: key {} has {} versions at or below {}, expected {}",
                    show(&entry.key),
                    n,
                    newest.commit_ts(),
                    entry.versions.len()
                )));
            }
        }

        let mut trimmed = Trimmed::default();
        for entry in entries {
            let Some(newest) = entry.versions.first() else {
                continue;
            };
            if let Some(mv) = kvs.get_mut(&entry.key) {
                trimmed.removed += mv.truncate(newest.commit_ts());
                if mv.is_vacant() {
                    kvs.remove(&entry.key);
                    trimmed.erased_keys.push(entry.key.clone());
                }
            }
        }
        Ok(trimmed)
    }

    /// Forget readers that started before `horizon`
    ///
    /// Keys left with nothing on them are dropped from memory.
    pub fn prune_readers(&self, horizon: Timestamp) -> Trimmed {
        let mut kvs = self.kvs.lock();
        let mut trimmed = Trimmed::default();
        kvs.retain(|key, mv| {
            trimmed.removed += mv.prune_readers(horizon);
            if mv.is_vacant() {
                trimmed.erased_keys.push(key.clone());
                false
            } else {
                true
            }
        });
        trimmed
    }

    fn wake(&self, waiters: Waiters) {
        for waiter in waiters {
            self.scheduler.wake(waiter.priority, waiter.work);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn bucket() -> (KeyBucket, Arc<BackgroundScheduler>) {
        let scheduler = Arc::new(BackgroundScheduler::new(1, 64));
        (KeyBucket::new(Arc::clone(&scheduler), true), scheduler)
    }

    fn noop() {}

    fn counter() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
        let c = Arc::new(AtomicUsize::new(0));
        let c2 = Arc::clone(&c);
        (c, move || {
            c2.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn commit_value(b: &KeyBucket, key: &[u8], v: &str, start: Timestamp, commit: Timestamp) {
        let txid = TxIdentifier::new(start);
        assert!(b.write_intent(key, Value::new(v), &txid, noop).status.is_ok());
        assert!(b.commit(key, &TxIdentifier::committed(start, commit)).is_ok());
    }

    #[test]
    fn test_younger_requester_blocks_then_wakes_once() {
        let (b, scheduler) = bucket();
        let t3 = TxIdentifier::new(3);
        let t5 = TxIdentifier::new(5);
        assert!(b.write_lock(b"k", &t3, noop).status.is_ok());

        let (woken, on_wake) = counter();
        let reply = b.write_lock(b"k", &t5, on_wake);
        assert!(reply.status.is_blocked());
        assert!(reply.contended);

        assert!(b.clean(b"k", &t3).is_ok());
        scheduler.drain();
        assert_eq!(woken.load(Ordering::SeqCst), 1);

        // A second resolution has no waiter left to wake
        assert!(b.write_lock(b"k", &t3, noop).status.is_ok());
        assert!(b.clean(b"k", &t3).is_ok());
        scheduler.drain();
        assert_eq!(woken.load(Ordering::SeqCst), 1);
        scheduler.shutdown();
    }

    #[test]
    fn test_older_requester_conflicts() {
        let (b, _s) = bucket();
        assert!(b.write_lock(b"k", &TxIdentifier::new(5), noop).status.is_ok());
        let reply = b.write_intent(b"k", Value::new("v"), &TxIdentifier::new(3), noop);
        assert!(matches!(reply.status, TxOpStatus::Conflict(_)));
        assert_eq!(b.inspect(b"k", |mv| mv.waiter_count()), Some(0));
    }

    #[test]
    fn test_write_too_late() {
        let (b, _s) = bucket();
        commit_value(&b, b"k", "v1", 1, 4);
        let reply = b.write_lock(b"k", &TxIdentifier::new(3), noop);
        assert!(matches!(reply.status, TxOpStatus::TooLate(_)));
        let reply = b.write_lock(b"k", &TxIdentifier::new(4), noop);
        assert!(matches!(reply.status, TxOpStatus::TooLate(_)));
        assert!(b.write_lock(b"k", &TxIdentifier::new(5), noop).status.is_ok());
    }

    #[test]
    fn test_repeated_intent_is_idempotent() {
        let (b, _s) = bucket();
        commit_value(&b, b"k", "v1", 1, 2);
        let t = TxIdentifier::new(3);
        assert!(b.write_intent(b"k", Value::new("v2"), &t, noop).status.is_ok());
        let again = b.write_intent(b"k", Value::new("v2"), &t, noop);
        assert!(again.status.is_ok());
        assert!(!again.is_lock_upgrade);
        assert_eq!(b.inspect(b"k", |mv| mv.versions().len()), Some(1));
        // An intent already covers a lock request
        assert!(b.write_lock(b"k", &t, noop).status.is_ok());
        assert_eq!(
            b.inspect(b"k", |mv| mv.lock().kind()),
            Some(Some(LockKind::WriteIntent))
        );
    }

    #[test]
    fn test_lock_upgrade() {
        let (b, _s) = bucket();
        let t = TxIdentifier::new(3);
        assert!(!b.write_lock(b"k", &t, noop).is_lock_upgrade);
        let reply = b.write_intent(b"k", Value::new("v"), &t, noop);
        assert!(reply.status.is_ok());
        assert!(reply.is_lock_upgrade);
        assert!(b.commit(b"k", &TxIdentifier::committed(3, 4)).is_ok());
    }

    #[test]
    fn test_clean_and_commit_require_holder() {
        let (b, _s) = bucket();
        assert!(matches!(
            b.clean(b"k", &TxIdentifier::new(1)),
            TxOpStatus::NotExist(_)
        ));
        assert!(b.write_lock(b"k", &TxIdentifier::new(1), noop).status.is_ok());
        assert!(matches!(
            b.clean(b"k", &TxIdentifier::new(2)),
            TxOpStatus::NotExist(_)
        ));
        // A lock cannot be committed
        assert!(matches!(
            b.commit(b"k", &TxIdentifier::committed(1, 3)),
            TxOpStatus::NotExist(_)
        ));
        assert!(b.clean(b"k", &TxIdentifier::new(1)).is_ok());
        assert!(matches!(
            b.clean(b"k", &TxIdentifier::new(1)),
            TxOpStatus::NotExist(_)
        ));
    }

    #[test]
    fn test_read_visibility() {
        let (b, _s) = bucket();
        commit_value(&b, b"k", "v1", 1, 3);
        commit_value(&b, b"k", "v2", 5, 7);

        let read = |ts| b.read(b"k", &TxIdentifier::new(ts), false, noop).outcome;
        assert_eq!(read(2), ReadOutcome::NotFound);
        assert_eq!(read(4), ReadOutcome::Found(Value::new("v1")));
        assert_eq!(read(7), ReadOutcome::Found(Value::new("v2")));
        assert_eq!(read(100), ReadOutcome::Found(Value::new("v2")));
    }

    #[test]
    fn test_read_of_deletion_marker() {
        let (b, _s) = bucket();
        commit_value(&b, b"k", "v1", 1, 2);
        let t = TxIdentifier::new(3);
        assert!(b.write_intent(b"k", Value::tombstone(), &t, noop).status.is_ok());
        assert!(b.commit(b"k", &TxIdentifier::committed(3, 4)).is_ok());
        let outcome = b.read(b"k", &TxIdentifier::new(5), false, noop).outcome;
        assert_eq!(outcome, ReadOutcome::NotFound);
    }

    #[test]
    fn test_read_blocks_on_older_intent() {
        let (b, scheduler) = bucket();
        assert!(b
            .write_intent(b"k", Value::new("v"), &TxIdentifier::new(2), noop)
            .status
            .is_ok());

        let (woken, on_wake) = counter();
        let reply = b.read(b"k", &TxIdentifier::new(4), false, on_wake);
        assert!(reply.outcome.is_blocked());

        assert!(b.commit(b"k", &TxIdentifier::committed(2, 3)).is_ok());
        scheduler.drain();
        assert_eq!(woken.load(Ordering::SeqCst), 1);
        let retry = b.read(b"k", &TxIdentifier::new(4), false, noop);
        assert_eq!(retry.outcome, ReadOutcome::Found(Value::new("v")));
        scheduler.shutdown();
    }

    #[test]
    fn test_read_passes_locks_and_younger_intents() {
        let (b, _s) = bucket();
        assert!(b.write_lock(b"a", &TxIdentifier::new(2), noop).status.is_ok());
        assert!(b
            .write_intent(b"b", Value::new("v"), &TxIdentifier::new(9), noop)
            .status
            .is_ok());

        let reader = TxIdentifier::new(4);
        let a = b.read(b"a", &reader, false, noop);
        assert_eq!(a.outcome, ReadOutcome::NotFound);
        assert_eq!(a.deps, vec![Dep::read_write(b"a".to_vec(), reader, TxIdentifier::new(2))]);
        let bb = b.read(b"b", &reader, false, noop);
        assert_eq!(bb.outcome, ReadOutcome::NotFound);
        assert_eq!(bb.deps.len(), 1);
    }

    #[test]
    fn test_read_of_own_write_is_not_exist() {
        let (b, _s) = bucket();
        let t = TxIdentifier::new(2);
        assert!(b.write_intent(b"k", Value::new("v"), &t, noop).status.is_ok());
        let outcome = b.read(b"k", &t, false, noop).outcome;
        assert!(matches!(outcome, ReadOutcome::Failed(TxOpStatus::NotExist(_))));
    }

    #[test]
    fn test_pessimistic_read_uses_wait_die() {
        let (b, _s) = bucket();
        assert!(b.write_lock(b"k", &TxIdentifier::new(5), noop).status.is_ok());
        // Older holder: an optimistic read passes a lock, a pessimistic one waits
        let young = TxIdentifier::new(7);
        assert!(b.read(b"k", &young, false, noop).outcome.is_success());
        assert!(b.read(b"k", &young, true, noop).outcome.is_blocked());
        // Younger holder: a pessimistic read dies
        let old = TxIdentifier::new(3);
        let outcome = b.read(b"k", &old, true, noop).outcome;
        assert!(matches!(outcome, ReadOutcome::Failed(TxOpStatus::Conflict(_))));
    }

    #[test]
    fn test_dependencies_from_readers_and_newer_versions() {
        let (b, _s) = bucket();
        commit_value(&b, b"k", "v1", 1, 2);
        commit_value(&b, b"k", "v2", 6, 8);

        let reader = TxIdentifier::new(5);
        let reply = b.read(b"k", &reader, false, noop);
        assert_eq!(reply.outcome, ReadOutcome::Found(Value::new("v1")));
        assert_eq!(
            reply.deps,
            vec![Dep::read_write(b"k".to_vec(), reader, TxIdentifier::committed(6, 8))]
        );

        let writer = TxIdentifier::new(9);
        let w = b.write_lock(b"k", &writer, noop);
        assert!(w.status.is_ok());
        assert_eq!(w.deps, vec![Dep::read_write(b"k".to_vec(), reader, writer)]);
    }

    #[test]
    fn test_untracked_bucket_reports_nothing() {
        let scheduler = Arc::new(BackgroundScheduler::new(1, 8));
        let b = KeyBucket::new(scheduler, false);
        assert_eq!(
            b.read(b"k", &TxIdentifier::new(1), false, noop).outcome,
            ReadOutcome::NotFound
        );
        assert!(b.is_empty());
        commit_value(&b, b"k", "v", 2, 3);
        let r = b.read(b"k", &TxIdentifier::new(1), false, noop);
        assert!(r.deps.is_empty());
        let w = b.write_lock(b"k", &TxIdentifier::new(4), noop);
        assert!(w.deps.is_empty());
    }

    #[test]
    fn test_persist_round_trip() {
        let (b, _s) = bucket();
        commit_value(&b, b"a", "a1", 1, 2);
        commit_value(&b, b"a", "a2", 3, 4);
        commit_value(&b, b"a", "a3", 9, 10);
        commit_value(&b, b"b", "b1", 5, 6);

        let mut entries = b.get_persisting(6);
        entries.sort_by(|x, y| x.key.cmp(&y.key));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].versions.len(), 2);
        assert_eq!(entries[0].versions[0].commit_ts(), 4);

        let trimmed = b.clear_persisted(&entries).unwrap();
        assert_eq!(trimmed.removed, 3);
        assert_eq!(trimmed.erased_keys, vec![b"b".to_vec()]);
        assert_eq!(b.inspect(b"a", |mv| mv.versions().len()), Some(1));
        assert!(b.inspect(b"b", |_| ()).is_none());
        assert!(b.get_persisting(6).is_empty());

        // The same list again is stale
        assert!(matches!(
            b.clear_persisted(&entries),
            Err(Error::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_stale_clear_truncates_nothing() {
        let (b, _s) = bucket();
        commit_value(&b, b"a", "a1", 1, 2);
        commit_value(&b, b"b", "b1", 3, 4);
        let mut entries = b.get_persisting(10);
        entries.sort_by(|x, y| x.key.cmp(&y.key));
        b.clear_persisted(&entries[1..]).unwrap();

        // "a" is still valid but "b" is stale: nothing may be truncated
        assert!(b.clear_persisted(&entries).is_err());
        assert_eq!(b.inspect(b"a", |mv| mv.versions().len()), Some(1));
    }

    #[test]
    fn test_prune_readers_erases_vacant_keys() {
        let (b, _s) = bucket();
        b.read(b"x", &TxIdentifier::new(3), false, noop);
        b.read(b"y", &TxIdentifier::new(8), false, noop);
        assert_eq!(b.len(), 2);

        let trimmed = b.prune_readers(5);
        assert_eq!(trimmed.removed, 1);
        assert_eq!(trimmed.erased_keys, vec![b"x".to_vec()]);
        assert_eq!(b.len(), 1);
    }
}
