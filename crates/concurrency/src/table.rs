//! Transaction table: the process-wide dependency graph
//!
//! The table maps timestamps to [`TxNode`]s. A node is indexed under its
//! start timestamp and, once committed, under its commit timestamp too.
//! Structural changes (insert, remove, status transitions) hold the table
//! lock; edge changes only take the locks of the nodes involved.
//!
//! ## Dangerous structures
//!
//! Two chained anti-dependency edges `t1 -> t2 -> t3` where `t3` committed
//! first and neither `t1` nor `t2` committed before `t3` cannot be ordered
//! serializably once either of them commits. When that happens the other
//! one is returned for abort (see
//! [`TxTable::find_abort_txn_on_consecutive_rw_dep`]).

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use txkv_core::{DepType, Error, Result, Timestamp, TxIdentifier};

use crate::config::RetentionPolicy;
use crate::node::{self, TxNode};
use crate::validation::EarlyValidation;

#[derive(Debug, Default)]
struct TableInner {
    /// start_ts and commit_ts -> node
    nodes: FxHashMap<Timestamp, Arc<TxNode>>,
    /// Start timestamps of transactions the client has not finished
    active: BTreeSet<Timestamp>,
    /// Largest start timestamp begun so far
    max_ats: Timestamp,
}

impl TableInner {
    fn min_ats(&self) -> Timestamp {
        self.active
            .iter()
            .next()
            .copied()
            .unwrap_or(self.max_ats + 1)
    }

    /// Each node once, keyed by start_ts
    fn unique_nodes(&self) -> impl Iterator<Item = &Arc<TxNode>> {
        self.nodes
            .iter()
            .filter(|(ts, n)| **ts == n.start_ts())
            .map(|(_, n)| n)
    }
}

/// Registry of in-flight and recently finished transactions
#[derive(Debug)]
pub struct TxTable {
    inner: Mutex<TableInner>,
    retention: RetentionPolicy,
}

impl Default for TxTable {
    fn default() -> Self {
        Self::new(RetentionPolicy::default())
    }
}

impl TxTable {
    /// An empty table using `retention` for garbage collection
    pub fn new(retention: RetentionPolicy) -> Self {
        Self {
            inner: Mutex::new(TableInner::default()),
            retention,
        }
    }

    /// Node registered under `ts` (start or commit timestamp)
    pub fn get(&self, ts: Timestamp) -> Option<Arc<TxNode>> {
        self.inner.lock().nodes.get(&ts).cloned()
    }

    fn get_or_not_found(&self, start_ts: Timestamp) -> Result<Arc<TxNode>> {
        self.get(start_ts)
            .ok_or_else(|| Error::NotFound(format!("transaction start_ts={}", start_ts)))
    }

    /// Every registered transaction, sorted by start timestamp
    pub fn list(&self) -> Vec<TxIdentifier> {
        let inner = self.inner.lock();
        let mut txids: Vec<_> = inner.unique_nodes().map(|n| n.txid()).collect();
        txids.sort_unstable_by_key(|t| t.start_ts);
        txids
    }

    /// Number of registered transactions
    pub fn len(&self) -> usize {
        self.inner.lock().unique_nodes().count()
    }

    /// Whether no transaction is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Start timestamps with an edge into the transaction
    pub fn in_edges(&self, start_ts: Timestamp) -> Vec<Timestamp> {
        self.get(start_ts).map(|n| n.in_edges()).unwrap_or_default()
    }

    /// Start timestamps the transaction has an edge to
    pub fn out_edges(&self, start_ts: Timestamp) -> Vec<Timestamp> {
        self.get(start_ts).map(|n| n.out_edges()).unwrap_or_default()
    }

    /// Register a new active transaction
    ///
    /// Beginning an already registered `start_ts` returns the existing node.
    pub fn begin_tx(&self, start_ts: Timestamp) -> Arc<TxNode> {
        let mut inner = self.inner.lock();
        if let Some(existing) = inner.nodes.get(&start_ts) {
            warn!(start_ts, "transaction already begun");
            return Arc::clone(existing);
        }
        let node = Arc::new(TxNode::new(start_ts));
        inner.nodes.insert(start_ts, Arc::clone(&node));
        inner.active.insert(start_ts);
        inner.max_ats = inner.max_ats.max(start_ts);
        debug!(start_ts, "begin tx");
        node
    }

    /// Commit the transaction at `commit_ts` and index it under `commit_ts`
    ///
    /// A transaction already past `Preparing` is left unchanged; the returned
    /// identifier shows its actual status.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the transaction is not registered.
    pub fn commit_tx(&self, txid: &TxIdentifier, commit_ts: Timestamp) -> Result<TxIdentifier> {
        let node = {
            let mut inner = self.inner.lock();
            let node = inner
                .nodes
                .get(&txid.start_ts)
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("transaction {}", txid)))?;
            if node.commit(commit_ts) {
                inner.nodes.insert(commit_ts, Arc::clone(&node));
            }
            node
        };
        node.early_validate();
        Ok(node.txid())
    }

    /// Abort the transaction, drop its edges and release early validation
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the transaction is not registered.
    pub fn abort_tx(&self, txid: &TxIdentifier) -> Result<TxIdentifier> {
        let node = self.get_or_not_found(txid.start_ts)?;
        {
            // Status transitions happen under the table lock
            let _inner = self.inner.lock();
            if !node.abort() {
                return Ok(node.txid());
            }
        }
        self.clear_deps(&node);
        node.early_validate();
        info!(txid = %node.txid(), "tx aborted");
        Ok(node.txid())
    }

    /// Record that the client finished the transaction (commit or abort)
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the transaction is not registered.
    pub fn mark_finished(&self, start_ts: Timestamp) -> Result<()> {
        let mut inner = self.inner.lock();
        let node = inner
            .nodes
            .get(&start_ts)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("transaction start_ts={}", start_ts)))?;
        node.set_finished_by_client(inner.max_ats);
        inner.active.remove(&start_ts);
        Ok(())
    }

    /// Insert the edge `t1 -> t2`
    ///
    /// Returns false if either transaction is unknown (never begun or already
    /// collected) or both are the same transaction; the edge is dropped.
    pub fn add_dep(&self, dep_type: DepType, t1: &TxIdentifier, t2: &TxIdentifier) -> bool {
        if t1.start_ts == t2.start_ts {
            return false;
        }
        let (from, to) = {
            let inner = self.inner.lock();
            (
                inner.nodes.get(&t1.start_ts).cloned(),
                inner.nodes.get(&t2.start_ts).cloned(),
            )
        };
        match (from, to) {
            (Some(from), Some(to)) if from.start_ts() == to.start_ts() => false,
            (Some(from), Some(to)) => {
                node::add_dep(dep_type, &from, &to);
                true
            }
            (from, to) => {
                warn!(
                    ?dep_type,
                    t1 = t1.start_ts,
                    t1_found = from.is_some(),
                    t2 = t2.start_ts,
                    t2_found = to.is_some(),
                    "dropping dependency on unknown transaction"
                );
                false
            }
        }
    }

    fn clear_deps(&self, node: &Arc<TxNode>) {
        let (ins, outs) = (node.in_edges(), node.out_edges());
        for ts in outs {
            if let Some(other) = self.get(ts) {
                node::del_dep(node, &other);
            }
        }
        for ts in ins {
            if let Some(other) = self.get(ts) {
                node::del_dep(&other, node);
            }
        }
    }

    /// Transactions that must abort because of a dangerous structure
    /// involving `start_ts`
    ///
    /// Every chain `t1 -> t2 -> t3` containing the transaction, in any of the
    /// three positions, is checked. The result is sorted by start timestamp
    /// and contains each transaction once. Callers abort each entry with
    /// [`TxTable::abort_tx`].
    pub fn find_abort_txn_on_consecutive_rw_dep(&self, start_ts: Timestamp) -> Vec<TxIdentifier> {
        let Some(me) = self.get(start_ts) else {
            return Vec::new();
        };
        let mut found: FxHashMap<Timestamp, TxIdentifier> = FxHashMap::default();
        let mut check = |t1: &TxNode, t2: &TxNode, t3: &TxNode| {
            if t1.start_ts() == t2.start_ts() || t2.start_ts() == t3.start_ts() {
                return;
            }
            for txid in node::find_abort_on_consecutive_rw_dep(t1, t2, t3) {
                found.insert(txid.start_ts, txid);
            }
        };

        // me in the t3 role
        for t2 in self.resolve(&me.in_edges()) {
            for t1 in self.resolve(&t2.in_edges()) {
                check(t1.as_ref(), t2.as_ref(), me.as_ref());
            }
        }
        // me in the t2 role
        let ins = self.resolve(&me.in_edges());
        let outs = self.resolve(&me.out_edges());
        for t1 in &ins {
            for t3 in &outs {
                check(t1.as_ref(), me.as_ref(), t3.as_ref());
            }
        }
        // me in the t1 role
        for t2 in outs {
            for t3 in self.resolve(&t2.out_edges()) {
                check(me.as_ref(), t2.as_ref(), t3.as_ref());
            }
        }

        let mut res: Vec<_> = found.into_values().collect();
        res.sort_unstable_by_key(|t| t.start_ts);
        res
    }

    fn resolve(&self, timestamps: &[Timestamp]) -> Vec<Arc<TxNode>> {
        let inner = self.inner.lock();
        timestamps
            .iter()
            .filter_map(|ts| inner.nodes.get(ts).cloned())
            .collect()
    }

    /// Register interest in the transaction's outcome
    ///
    /// The returned handle resolves when the transaction aborts or commits.
    /// If it already finished, the handle resolves immediately. A second
    /// registration replaces the first, whose handle then resolves empty.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the transaction is not registered.
    pub fn early_validate_tx(&self, txid: &TxIdentifier) -> Result<EarlyValidation> {
        let node = self.get_or_not_found(txid.start_ts)?;
        let (tx, rx) = oneshot::channel();
        node.add_early_validate(tx);
        if node.txid().status.is_terminal() {
            node.early_validate();
        }
        Ok(EarlyValidation::new(rx))
    }

    /// Smallest start timestamp among transactions the client has not
    /// finished; one past the largest start timestamp if there are none
    pub fn min_active_start_ts(&self) -> Timestamp {
        self.inner.lock().min_ats()
    }

    /// Largest start timestamp begun so far
    pub fn max_start_ts(&self) -> Timestamp {
        self.inner.lock().max_ats
    }

    /// Oldest start timestamp still registered, or the low-water mark if the
    /// table is empty
    ///
    /// Edges touching transactions older than this are dropped on arrival.
    pub fn gc_horizon(&self) -> Timestamp {
        let inner = self.inner.lock();
        inner
            .unique_nodes()
            .map(|n| n.start_ts())
            .min()
            .unwrap_or_else(|| inner.min_ats())
    }

    /// Remove finished transactions according to the retention policy
    ///
    /// Returns the identifiers of the removed transactions.
    pub fn gc_tx(&self) -> Vec<TxIdentifier> {
        let victims: Vec<Arc<TxNode>> = {
            let inner = self.inner.lock();
            inner
                .unique_nodes()
                .filter(|n| self.is_collectable(&inner, n))
                .cloned()
                .collect()
        };
        if victims.is_empty() {
            return Vec::new();
        }

        let removed: FxHashSet<Timestamp> = victims.iter().map(|n| n.start_ts()).collect();
        let mut out = Vec::with_capacity(victims.len());
        for victim in &victims {
            self.clear_deps(victim);
        }
        {
            let mut inner = self.inner.lock();
            inner.nodes.retain(|_, n| !removed.contains(&n.start_ts()));
        }
        for victim in victims {
            out.push(victim.txid());
        }
        out.sort_unstable_by_key(|t| t.start_ts);
        debug!(removed = out.len(), "tx table gc");
        out
    }

    fn is_collectable(&self, inner: &TableInner, node: &TxNode) -> bool {
        let min_ats = inner.min_ats();
        if !is_done_before(node, min_ats) {
            return false;
        }
        match self.retention {
            RetentionPolicy::Horizon => true,
            RetentionPolicy::EdgeFree => node
                .in_edges()
                .into_iter()
                .chain(node.out_edges())
                .filter_map(|ts| inner.nodes.get(&ts))
                .all(|other| is_done_before(other, min_ats)),
        }
    }

    /// Identifier of the transaction registered under `start_ts`
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the transaction is not registered.
    pub fn txid(&self, start_ts: Timestamp) -> Result<TxIdentifier> {
        Ok(self.get_or_not_found(start_ts)?.txid())
    }
}

/// Finished by its client, terminal, and finished before every active
/// transaction began
fn is_done_before(node: &TxNode, min_ats: Timestamp) -> bool {
    node.is_finished_by_client()
        && node.txid().status.is_terminal()
        && min_ats > node.max_ats_when_done()
}
