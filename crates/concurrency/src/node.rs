//! Transaction nodes of the dependency graph
//!
//! A [`TxNode`] carries a transaction's identifier and its anti-dependency
//! edges. Edges are stored as sets of neighbour start timestamps rather than
//! pointers, so the graph holds no reference cycles; the owning
//! [`crate::TxTable`] resolves timestamps back to nodes.
//!
//! ## Lock ordering
//!
//! Operations touching several nodes lock them in ascending `start_ts`
//! order ([`lock_pair`], [`lock_triple`]). No code path holds a node lock
//! while acquiring the table lock.

use parking_lot::{Mutex, MutexGuard};
use rustc_hash::FxHashSet;
use tokio::sync::oneshot;
use tracing::{error, info, warn};
use txkv_core::{DepType, Timestamp, TxIdentifier, TxStatus, MAX_TIMESTAMP};

/// Mutable part of a node, guarded by the node lock
#[derive(Debug)]
pub(crate) struct NodeState {
    pub(crate) txid: TxIdentifier,
    /// Start timestamps of nodes with an edge into this node
    pub(crate) in_edges: FxHashSet<Timestamp>,
    /// Start timestamps of nodes this node has an edge to
    pub(crate) out_edges: FxHashSet<Timestamp>,
    pub(crate) early_validation: Option<oneshot::Sender<TxIdentifier>>,
    pub(crate) finished_by_client: bool,
    /// Largest start timestamp begun when the client finished this transaction
    pub(crate) max_ats_when_done: Timestamp,
}

/// One transaction in the dependency graph
#[derive(Debug)]
pub struct TxNode {
    start_ts: Timestamp,
    pub(crate) state: Mutex<NodeState>,
}

impl TxNode {
    /// A new active transaction
    pub fn new(start_ts: Timestamp) -> Self {
        Self {
            start_ts,
            state: Mutex::new(NodeState {
                txid: TxIdentifier::new(start_ts),
                in_edges: FxHashSet::default(),
                out_edges: FxHashSet::default(),
                early_validation: None,
                finished_by_client: false,
                max_ats_when_done: MAX_TIMESTAMP,
            }),
        }
    }

    /// Start timestamp; the node's identity
    #[inline]
    pub fn start_ts(&self) -> Timestamp {
        self.start_ts
    }

    /// Current identifier
    pub fn txid(&self) -> TxIdentifier {
        self.state.lock().txid
    }

    /// Start timestamps of nodes with an edge into this one
    pub fn in_edges(&self) -> Vec<Timestamp> {
        let mut v: Vec<_> = self.state.lock().in_edges.iter().copied().collect();
        v.sort_unstable();
        v
    }

    /// Start timestamps of nodes this one has an edge to
    pub fn out_edges(&self) -> Vec<Timestamp> {
        let mut v: Vec<_> = self.state.lock().out_edges.iter().copied().collect();
        v.sort_unstable();
        v
    }

    /// Whether the node has any edge
    pub fn has_edges(&self) -> bool {
        let state = self.state.lock();
        !state.in_edges.is_empty() || !state.out_edges.is_empty()
    }

    /// Whether the client has committed or aborted this transaction
    pub fn is_finished_by_client(&self) -> bool {
        self.state.lock().finished_by_client
    }

    /// Largest start timestamp begun when the client finished this transaction
    pub fn max_ats_when_done(&self) -> Timestamp {
        self.state.lock().max_ats_when_done
    }

    /// Transition to `Committed` at `commit_ts`
    ///
    /// Returns false (and changes nothing) if the status is already past
    /// `Preparing`; the client is expected to abort in that case.
    pub(crate) fn commit(&self, commit_ts: Timestamp) -> bool {
        let mut state = self.state.lock();
        if !state.txid.status.is_finishable() {
            info!(txid = %state.txid, commit_ts, "unexpected status on commit");
            return false;
        }
        state.txid.commit_ts = Some(commit_ts);
        state.txid.status = TxStatus::Committed;
        true
    }

    /// Transition to `Aborted`
    ///
    /// Returns false if the status is already past `Preparing`.
    pub(crate) fn abort(&self) -> bool {
        let mut state = self.state.lock();
        if !state.txid.status.is_finishable() {
            if state.txid.status == TxStatus::Aborted {
                info!(txid = %state.txid, "transaction already aborted");
            } else {
                error!(txid = %state.txid, "unexpected status on abort");
            }
            return false;
        }
        state.txid.status = TxStatus::Aborted;
        true
    }

    pub(crate) fn set_finished_by_client(&self, max_ats: Timestamp) {
        let mut state = self.state.lock();
        state.finished_by_client = true;
        state.max_ats_when_done = max_ats;
    }

    /// Register the early-validation notification, replacing any previous one
    pub(crate) fn add_early_validate(&self, tx: oneshot::Sender<TxIdentifier>) {
        self.state.lock().early_validation = Some(tx);
    }

    /// Fire the pending early-validation notification, if any
    pub(crate) fn early_validate(&self) {
        let (sender, txid) = {
            let mut state = self.state.lock();
            (state.early_validation.take(), state.txid)
        };
        if let Some(sender) = sender {
            // The requester may have given up; nothing to do then
            let _ = sender.send(txid);
        }
    }
}

/// Lock two distinct nodes in ascending start timestamp order
pub(crate) fn lock_pair<'a>(
    a: &'a TxNode,
    b: &'a TxNode,
) -> (MutexGuard<'a, NodeState>, MutexGuard<'a, NodeState>) {
    debug_assert_ne!(a.start_ts, b.start_ts);
    if a.start_ts < b.start_ts {
        let ga = a.state.lock();
        let gb = b.state.lock();
        (ga, gb)
    } else {
        let gb = b.state.lock();
        let ga = a.state.lock();
        (ga, gb)
    }
}

type Triple<'a> = (
    MutexGuard<'a, NodeState>,
    MutexGuard<'a, NodeState>,
    MutexGuard<'a, NodeState>,
);

/// Lock three distinct nodes in ascending start timestamp order
pub(crate) fn lock_triple<'a>(a: &'a TxNode, b: &'a TxNode, c: &'a TxNode) -> Triple<'a> {
    let nodes = [a, b, c];
    let mut order = [0usize, 1, 2];
    order.sort_unstable_by_key(|&i| nodes[i].start_ts);

    let mut guards: [Option<MutexGuard<'a, NodeState>>; 3] = [None, None, None];
    for i in order {
        guards[i] = Some(nodes[i].state.lock());
    }
    match guards {
        [Some(ga), Some(gb), Some(gc)] => (ga, gb, gc),
        _ => unreachable!("every slot is filled above"),
    }
}

/// Insert the edge `from -> to`
///
/// Edges touching aborted nodes or joining non-concurrent transactions are
/// logged but still inserted.
pub(crate) fn add_dep(dep_type: DepType, from: &TxNode, to: &TxNode) {
    let (mut f, mut t) = lock_pair(from, to);

    if f.txid.is_aborted() || t.txid.is_aborted() {
        warn!(
            ?dep_type,
            t1 = %f.txid,
            t2 = %t.txid,
            "adding dependency to an aborted transaction"
        );
    }
    if let Some(commit_ts) = f.txid.commit_ts {
        if f.txid.is_committed() && commit_ts < t.txid.start_ts {
            warn!(
                ?dep_type,
                t1 = %f.txid,
                t2 = %t.txid,
                "adding dependency between non-concurrent transactions"
            );
        }
    }

    f.out_edges.insert(to.start_ts);
    t.in_edges.insert(from.start_ts);
}

/// Remove the edge `from -> to` if present
pub(crate) fn del_dep(from: &TxNode, to: &TxNode) {
    let (mut f, mut t) = lock_pair(from, to);
    f.out_edges.remove(&to.start_ts);
    t.in_edges.remove(&from.start_ts);
}

/// Check one chain `t1 -> t2 -> t3` for a dangerous structure
///
/// `t1` and `t3` may be the same node. Returns the identifiers of the
/// transactions that must abort.
pub(crate) fn find_abort_on_consecutive_rw_dep(
    t1: &TxNode,
    t2: &TxNode,
    t3: &TxNode,
) -> Vec<TxIdentifier> {
    let res = if t1.start_ts == t3.start_ts {
        let (g1, g2) = lock_pair(t1, t2);
        check_chain(&g1, &g2, &g1)
    } else {
        let (g1, g2, g3) = lock_triple(t1, t2, t3);
        check_chain(&g1, &g2, &g3)
    };

    if res.len() == 2 {
        error!(
            t1 = t1.start_ts,
            t2 = t2.start_ts,
            t3 = t3.start_ts,
            "both ends of a consecutive rw dependency committed"
        );
    }
    res
}

fn check_chain(t1: &NodeState, t2: &NodeState, t3: &NodeState) -> Vec<TxIdentifier> {
    let mut res = Vec::new();
    if !t3.txid.is_committed() {
        return res;
    }
    if !t1.out_edges.contains(&t2.txid.start_ts) || !t2.out_edges.contains(&t3.txid.start_ts) {
        return res;
    }
    if t1.txid.is_aborted() || t2.txid.is_aborted() {
        return res;
    }

    let t3_commit = t3.txid.commit_ts.unwrap_or(MAX_TIMESTAMP);
    let committed_before_t3 =
        |s: &NodeState| s.txid.is_committed() && s.txid.commit_ts.unwrap_or(MAX_TIMESTAMP) < t3_commit;
    if committed_before_t3(t1) || committed_before_t3(t2) {
        return res;
    }

    if t1.txid.is_committed() {
        res.push(t2.txid);
    }
    if t2.txid.is_committed() {
        res.push(t1.txid);
    }
    res
}
