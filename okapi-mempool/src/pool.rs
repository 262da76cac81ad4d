//! The okapi transaction mempool.
//!
//! [`Mempool`] holds transactions that are valid on the current best chain
//! and may be included in the next block. It keeps them indexed four ways
//! (id, descendant score, entry time, ancestor score), tracks the
//! parent/child dependency graph between in-pool transactions, and maintains
//! aggregate fee/size statistics over every entry's ancestor and descendant
//! packages.
//!
//! The feerate orderings can only stay correct if the package aggregates
//! are updated whenever relatives arrive or leave:
//!
//! - When a transaction is added, every in-pool ancestor's descendant
//!   aggregates grow by the new entry, and the new entry's ancestor
//!   aggregates are set from its ancestor closure.
//! - When transactions are removed, the removal set must first be closed
//!   under the descendant relation (a transaction cannot stay in the pool
//!   when something it spends is gone). All aggregate updates happen before
//!   any link is severed, because the updates walk the link graph.
//!
//! The one exception to the closure rule is removal for block confirmation:
//! confirmed transactions leave the pool while their in-pool descendants
//! stay, so that path instead updates the survivors' ancestor aggregates.
//!
//! During a reorg, transactions re-admitted from disconnected blocks can
//! have in-pool descendants the insertion path cannot see. The pool is
//! inconsistent until [`Mempool::update_transactions_from_block`] has
//! repaired the links and aggregates for the re-admitted set; see
//! [`DisconnectedBlockTransactions`](crate::DisconnectedBlockTransactions).
//!
//! All public operations take the pool's single internal lock for their full
//! duration and never yield while holding it, so they are linearizable with
//! respect to pool state.

use std::{
    cmp::Ordering,
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    sync::{Arc, Mutex},
};

use chrono::{DateTime, Duration, Utc};
use rand::Rng;

use okapi_chain::{
    amount::Amount,
    block,
    fee_rate::FeeRate,
    transaction::{self, Transaction},
    transparent::OutPoint,
};

use crate::{
    coins::{CoinView, COINBASE_MATURITY},
    config::{AncestorLimits, Config},
    entry::{LockPoints, MempoolEntry, MempoolTxInfo},
    error::MempoolError,
    estimator::FeeEstimator,
    memusage,
    store::IndexedEntries,
};

#[cfg(test)]
mod tests;

/// The half life, in seconds, of the rolling minimum fee rate's exponential
/// decay.
pub const ROLLING_FEE_HALFLIFE: i64 = 60 * 60 * 12;

/// Why a transaction was removed from the mempool.
///
/// Passed to [`Mempool::on_entry_removed`] observers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RemovalReason {
    /// Stayed in the pool too long without being mined.
    Expiry,
    /// Evicted to fit the pool back inside its memory budget.
    SizeLimit,
    /// Invalidated by a chain reorganization.
    Reorg,
    /// Confirmed by a connected block.
    Block,
    /// Conflicts with a transaction confirmed by a connected block.
    Conflict,
    /// Replaced by a higher-feerate spend of the same inputs.
    Replaced,
}

/// An observer of transactions entering the pool.
type EntryAddedHandler = Box<dyn Fn(&Arc<Transaction>) + Send + Sync>;

/// An observer of transactions leaving the pool.
type EntryRemovedHandler = Box<dyn Fn(&Arc<Transaction>, RemovalReason) + Send + Sync>;

/// The in-pool transactions directly linked to one entry: the parents it
/// spends outputs of, and the children spending its outputs.
#[derive(Clone, Debug, Default)]
struct TxLinks {
    parents: BTreeSet<transaction::Hash>,
    children: BTreeSet<transaction::Hash>,
}

/// Everything guarded by the pool's lock.
struct PoolState {
    /// The entries, indexed by id, descendant score, entry time, and
    /// ancestor score.
    store: IndexedEntries,

    /// Direct parents and children of each entry.
    ///
    /// Always matches the dependency edges implied by the entries' inputs,
    /// except while a reorg's re-admissions are waiting for
    /// [`Mempool::update_transactions_from_block`].
    links: HashMap<transaction::Hash, TxLinks>,

    /// Which in-pool transaction spends each outpoint.
    ///
    /// Ordered, so all spends of one transaction's outputs can be found by
    /// range scan.
    spent_by: BTreeMap<OutPoint, transaction::Hash>,

    /// Priority fee deltas, kept even for transactions not (yet) in the pool.
    fee_deltas: HashMap<transaction::Hash, Amount>,

    /// All in-pool ids in arbitrary order, for cheap relay snapshots.
    /// Entries record their slot, so removal can swap-remove.
    tx_hashes: Vec<transaction::Hash>,

    /// Sum of all entries' virtual sizes.
    total_tx_size: u64,

    /// Heap memory held by the entries and the link graph, maintained
    /// incrementally.
    cached_inner_usage: usize,

    /// Bumped by every mutation; lets miners notice the pool changed.
    transactions_updated: u64,

    // Rolling minimum fee state.
    rolling_minimum_fee_rate: f64,
    last_rolling_fee_update: DateTime<Utc>,
    block_since_last_rolling_fee_bump: bool,

    // Policy.
    incremental_relay_fee: FeeRate,
    sanity_check_frequency: f64,

    // Collaborators.
    estimator: Option<Box<dyn FeeEstimator>>,
    entry_added_handlers: Vec<EntryAddedHandler>,
    entry_removed_handlers: Vec<EntryRemovedHandler>,
}

/// A pool of unconfirmed transactions, safe to share between threads.
///
/// All operations lock the pool for their full duration. Observer callbacks
/// and collaborator hooks run inside that critical section: they must be
/// fast, must not panic, and must not call back into the pool.
pub struct Mempool {
    state: Mutex<PoolState>,
}

impl Mempool {
    /// Creates an empty mempool with the given policy `config`, reporting
    /// admissions and confirmations to `estimator` if one is supplied.
    pub fn new(config: Config, estimator: Option<Box<dyn FeeEstimator>>) -> Mempool {
        Mempool {
            state: Mutex::new(PoolState {
                store: IndexedEntries::default(),
                links: HashMap::new(),
                spent_by: BTreeMap::new(),
                fee_deltas: HashMap::new(),
                tx_hashes: Vec::new(),
                total_tx_size: 0,
                cached_inner_usage: 0,
                transactions_updated: 0,
                rolling_minimum_fee_rate: 0.0,
                last_rolling_fee_update: Utc::now(),
                block_since_last_rolling_fee_bump: false,
                incremental_relay_fee: config.incremental_relay_fee,
                sanity_check_frequency: config.sanity_check_frequency.clamp(0.0, 1.0),
                estimator,
                entry_added_handlers: Vec::new(),
                entry_removed_handlers: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolState> {
        self.state.lock().expect("mempool lock is never poisoned")
    }

    /// Sets the probability, in `0.0..=1.0`, that a [`Mempool::check`] call
    /// actually runs the full invariant walk.
    pub fn set_sanity_check(&self, frequency: f64) {
        self.lock().sanity_check_frequency = frequency.clamp(0.0, 1.0);
    }

    /// Registers an observer of transactions entering the pool.
    ///
    /// Observers run inside the pool's critical section, after the insertion
    /// has fully taken effect. They must not call back into the pool.
    pub fn on_entry_added(&self, handler: impl Fn(&Arc<Transaction>) + Send + Sync + 'static) {
        self.lock().entry_added_handlers.push(Box::new(handler));
    }

    /// Registers an observer of transactions leaving the pool.
    ///
    /// Observers run inside the pool's critical section, after the removal
    /// has fully taken effect. They must not call back into the pool.
    pub fn on_entry_removed(
        &self,
        handler: impl Fn(&Arc<Transaction>, RemovalReason) + Send + Sync + 'static,
    ) {
        self.lock().entry_removed_handlers.push(Box::new(handler));
    }

    /// Adds a pre-validated transaction to the pool.
    ///
    /// The caller must have fully validated the transaction and enforced
    /// admission policy, including package limits via
    /// [`Mempool::calculate_ancestors`]. If `ancestors` is `None`, the
    /// closure is recomputed here without limits.
    ///
    /// Returns `false` without changing anything if the id is already
    /// present.
    pub fn add_unchecked(
        &self,
        txid: transaction::Hash,
        entry: MempoolEntry,
        ancestors: Option<HashSet<transaction::Hash>>,
        valid_fee_estimate: bool,
    ) -> bool {
        let mut state = self.lock();
        let added = state.add_unchecked(txid, entry, ancestors, valid_fee_estimate);
        update_metrics(&state);
        added
    }

    /// Computes the in-pool ancestor closure of `entry`, which must not
    /// itself be in the pool yet, enforcing the given package `limits`.
    pub fn calculate_ancestors(
        &self,
        entry: &MempoolEntry,
        limits: &AncestorLimits,
    ) -> Result<HashSet<transaction::Hash>, MempoolError> {
        self.lock().calculate_ancestors(entry, limits, true)
    }

    /// Removes `tx` and all of its in-pool descendants.
    ///
    /// If `tx` itself is not in the pool, any in-pool spenders of its
    /// outputs (and their descendants) are removed instead. Missing ids are
    /// a no-op.
    pub fn remove_recursive(&self, tx: &Transaction, reason: RemovalReason) {
        let mut state = self.lock();
        state.remove_recursive(tx, reason);
        update_metrics(&state);
    }

    /// Removes every in-pool transaction that conflicts with `tx`, with
    /// reason [`RemovalReason::Conflict`].
    ///
    /// A conflict is an in-pool spend of an outpoint that `tx` also spends.
    pub fn remove_conflicts(&self, tx: &Transaction) {
        let mut state = self.lock();
        state.remove_conflicts(tx);
        update_metrics(&state);
    }

    /// Removes the transactions confirmed by a block at `height`, clears
    /// their priority deltas, evicts anything conflicting with them, and
    /// reports the confirmations to the fee estimator.
    pub fn remove_for_block(&self, vtx: &[Arc<Transaction>], height: block::Height) {
        let mut state = self.lock();
        state.remove_for_block(vtx, height);
        update_metrics(&state);
    }

    /// Re-checks every entry after a reorg, evicting the ones that are no
    /// longer valid on the new chain, together with their descendants.
    ///
    /// `filter_final_and_mature` re-evaluates an entry's time and sequence
    /// locks against the new chain: it returns the (possibly refreshed)
    /// lock points of a still-final entry, or `None` to condemn it. In
    /// addition, entries spending a coinbase are evicted here if one of
    /// their inputs is missing from `coins` or not yet mature at
    /// `mempool_height`.
    pub fn remove_for_reorg<V, F>(
        &self,
        coins: &V,
        mempool_height: block::Height,
        filter_final_and_mature: F,
    ) where
        V: CoinView,
        F: FnMut(&MempoolEntry) -> Option<LockPoints>,
    {
        let mut state = self.lock();
        state.remove_for_reorg(coins, mempool_height, filter_final_and_mature);
        update_metrics(&state);
    }

    /// Removes every transaction that entered the pool before `cutoff`,
    /// together with its descendants. Returns the number of transactions
    /// removed.
    pub fn expire(&self, cutoff: DateTime<Utc>) -> usize {
        let mut state = self.lock();
        let removed = state.expire(cutoff);
        update_metrics(&state);
        removed
    }

    /// Evicts lowest-descendant-score packages until the pool's dynamic
    /// memory usage fits in `size_limit` bytes.
    ///
    /// Each evicted package's feerate, plus the incremental relay fee, bumps
    /// the rolling minimum fee rate. If `no_spends_remaining` is supplied,
    /// it receives the outpoints that were spent from the pool before this
    /// call, are not provided by the pool, and are no longer spent by it.
    pub fn trim_to_size(
        &self,
        size_limit: usize,
        no_spends_remaining: Option<&mut Vec<OutPoint>>,
    ) {
        let mut state = self.lock();
        state.trim_to_size(size_limit, no_spends_remaining);
        update_metrics(&state);
    }

    /// Repairs links and package aggregates after transactions from
    /// disconnected blocks were re-admitted.
    ///
    /// `txids` is the re-admitted set, in the order it was re-admitted.
    /// Re-admission must happen in dependency order (oldest block first, so
    /// parents precede children), which makes insertion link and account
    /// everything *within* the set; this call then links and accounts the
    /// pre-existing in-pool descendants the insertion path could not see.
    pub fn update_transactions_from_block(&self, txids: &[transaction::Hash]) {
        self.lock().update_transactions_from_block(txids);
    }

    /// Adjusts the mining priority of a transaction by `fee_delta`.
    ///
    /// The delta accumulates across calls and is remembered even while the
    /// transaction is not in the pool.
    pub fn prioritise_transaction(&self, txid: transaction::Hash, fee_delta: Amount) {
        self.lock().prioritise_transaction(txid, fee_delta);
    }

    /// Adds the priority delta recorded for `txid`, if any, to `fee_delta`.
    pub fn apply_delta(&self, txid: &transaction::Hash, fee_delta: &mut Amount) {
        if let Some(delta) = self.lock().fee_deltas.get(txid) {
            *fee_delta += *delta;
        }
    }

    /// Forgets any priority delta recorded for `txid`.
    pub fn clear_prioritisation(&self, txid: &transaction::Hash) {
        self.lock().fee_deltas.remove(txid);
    }

    /// The minimum feerate a new transaction must pay to be accepted, given
    /// the pool's memory budget of `size_limit` bytes.
    ///
    /// The rolling minimum decays with a half life of
    /// [`ROLLING_FEE_HALFLIFE`] seconds (faster while the pool is far under
    /// budget), and snaps to zero once it falls below half the incremental
    /// relay fee.
    pub fn get_min_fee(&self, size_limit: usize) -> FeeRate {
        self.get_min_fee_at(size_limit, Utc::now())
    }

    /// [`Mempool::get_min_fee`] at an explicit instant, for tests.
    pub(crate) fn get_min_fee_at(&self, size_limit: usize, now: DateTime<Utc>) -> FeeRate {
        self.lock().get_min_fee(size_limit, now)
    }

    /// The number of transactions in the pool.
    pub fn size(&self) -> usize {
        self.lock().store.len()
    }

    /// The sum of all in-pool transactions' virtual sizes.
    pub fn total_tx_size(&self) -> u64 {
        self.lock().total_tx_size
    }

    /// An estimate of the total heap memory held by the pool.
    pub fn dynamic_memory_usage(&self) -> usize {
        self.lock().dynamic_memory_usage()
    }

    /// How many times the pool has changed since it was created.
    pub fn transactions_updated(&self) -> u64 {
        self.lock().transactions_updated
    }

    /// Records `n` external updates, so miners rebuild block templates.
    pub fn add_transactions_updated(&self, n: u64) {
        self.lock().transactions_updated += n;
    }

    /// Returns `true` if a transaction with `txid` is in the pool.
    pub fn exists(&self, txid: &transaction::Hash) -> bool {
        self.lock().store.contains(txid)
    }

    /// Returns the in-pool transaction with `txid`, if any.
    pub fn get(&self, txid: &transaction::Hash) -> Option<Arc<Transaction>> {
        self.lock()
            .store
            .get(txid)
            .map(|entry| entry.transaction().clone())
    }

    /// Returns a snapshot of the entry for `txid`, if any, including its
    /// package aggregates.
    pub fn entry(&self, txid: &transaction::Hash) -> Option<MempoolEntry> {
        self.lock().store.get(txid).cloned()
    }

    /// Returns summary information about the transaction with `txid`, if
    /// it is in the pool.
    pub fn info(&self, txid: &transaction::Hash) -> Option<MempoolTxInfo> {
        self.lock().store.get(txid).map(MempoolTxInfo::from)
    }

    /// Returns summary information about every in-pool transaction, sorted
    /// by ascending ancestor count and descending feerate.
    pub fn info_all(&self) -> Vec<MempoolTxInfo> {
        let state = self.lock();
        state
            .sorted_depth_and_score()
            .into_iter()
            .map(|txid| {
                state
                    .store
                    .get(&txid)
                    .map(MempoolTxInfo::from)
                    .expect("sorted ids are in the store")
            })
            .collect()
    }

    /// Returns every in-pool transaction id, sorted by ascending ancestor
    /// count and descending feerate.
    pub fn query_hashes(&self) -> Vec<transaction::Hash> {
        self.lock().sorted_depth_and_score()
    }

    /// Returns every in-pool transaction id in arbitrary order.
    ///
    /// Cheaper than [`Mempool::query_hashes`]; meant for relay paths that do
    /// not care about ordering.
    pub fn transaction_hashes(&self) -> Vec<transaction::Hash> {
        self.lock().tx_hashes.clone()
    }

    /// Returns every in-pool transaction id in mining order: descending
    /// ancestor score, so the most valuable package members come first.
    pub fn ancestor_score_order(&self) -> Vec<transaction::Hash> {
        self.lock()
            .store
            .iter_by_ancestor_score()
            .map(|(txid, _)| txid)
            .collect()
    }

    /// Returns `true` if an in-pool transaction spends `outpoint`.
    pub fn is_spent(&self, outpoint: &OutPoint) -> bool {
        self.lock().spent_by.contains_key(outpoint)
    }

    /// Returns `true` if no input of `tx` spends an output of an in-pool
    /// transaction, so `tx` could be mined without any of the pool.
    pub fn has_no_inputs_of(&self, tx: &Transaction) -> bool {
        let state = self.lock();
        !tx.inputs
            .iter()
            .any(|input| state.store.contains(&input.outpoint.hash))
    }

    /// Returns `true` if the transaction is absent, or both of its package
    /// counts are below `limit`.
    pub fn transaction_within_chain_limit(&self, txid: &transaction::Hash, limit: u64) -> bool {
        match self.lock().store.get(txid) {
            None => true,
            Some(entry) => {
                entry.count_with_ancestors() < limit && entry.count_with_descendants() < limit
            }
        }
    }

    /// Returns `true` if the transaction with id `a` sorts before `b` in the
    /// canonical export order: ascending ancestor count, then descending
    /// feerate.
    ///
    /// Ids not in the pool sort last.
    pub fn compare_depth_and_score(&self, a: &transaction::Hash, b: &transaction::Hash) -> bool {
        let state = self.lock();
        let Some(entry_a) = state.store.get(a) else {
            return false;
        };
        let Some(entry_b) = state.store.get(b) else {
            return true;
        };

        depth_and_score_cmp(a, entry_a, b, entry_b) == Ordering::Less
    }

    /// Removes everything from the pool.
    ///
    /// Priority deltas survive, like they do for transactions that were
    /// never admitted.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.clear();
        update_metrics(&state);
    }

    /// Checks every pool invariant, panicking on the first violation.
    ///
    /// Runs with the probability configured by [`Mempool::set_sanity_check`],
    /// and is O(n²) in the pool size when it runs. `coins` must be able to
    /// resolve every input that in-pool transactions do not provide.
    pub fn check<V: CoinView>(&self, coins: &V) {
        let state = self.lock();

        let frequency = state.sanity_check_frequency;
        if frequency <= 0.0 || !rand::thread_rng().gen_bool(frequency.min(1.0)) {
            return;
        }

        tracing::debug!(
            size = state.store.len(),
            total_tx_size = state.total_tx_size,
            "checking mempool consistency"
        );
        state.check(coins);
    }
}

/// Orders entries for [`Mempool::query_hashes`] and [`Mempool::info_all`]:
/// fewer in-pool ancestors first, then descending raw-fee feerate, then
/// descending id.
fn depth_and_score_cmp(
    a_txid: &transaction::Hash,
    a: &MempoolEntry,
    b_txid: &transaction::Hash,
    b: &MempoolEntry,
) -> Ordering {
    a.count_with_ancestors()
        .cmp(&b.count_with_ancestors())
        .then_with(|| {
            // Raw fees, not modified fees, so the export order does not leak
            // local prioritisation.
            let lhs = a.fee().zatoshis() as i128 * b.tx_size() as i128;
            let rhs = b.fee().zatoshis() as i128 * a.tx_size() as i128;
            rhs.cmp(&lhs)
        })
        .then_with(|| b_txid.cmp(a_txid))
}

/// Refreshes the pool gauges after a mutation.
fn update_metrics(state: &PoolState) {
    metrics::gauge!("mempool.size.transactions").set(state.store.len() as f64);
    metrics::gauge!("mempool.size.bytes").set(state.total_tx_size as f64);
    metrics::gauge!("mempool.usage.bytes").set(state.dynamic_memory_usage() as f64);
}

impl PoolState {
    /// An estimate of the total heap memory held by the pool.
    fn dynamic_memory_usage(&self) -> usize {
        self.store.usage()
            + memusage::contiguous::<transaction::Hash>(self.tx_hashes.len())
            + memusage::btree_map::<OutPoint, transaction::Hash>(self.spent_by.len())
            + memusage::hash_map::<transaction::Hash, Amount>(self.fee_deltas.len())
            + memusage::hash_map::<transaction::Hash, TxLinks>(self.links.len())
            + self.cached_inner_usage
    }

    /// Adds or removes `parent` in `txid`'s parent set, keeping the cached
    /// usage total in step.
    fn update_parent(&mut self, txid: transaction::Hash, parent: transaction::Hash, add: bool) {
        let links = self
            .links
            .get_mut(&txid)
            .expect("every entry has a link record");

        if add {
            if links.parents.insert(parent) {
                self.cached_inner_usage += memusage::btree_set_node::<transaction::Hash>();
            }
        } else if links.parents.remove(&parent) {
            self.cached_inner_usage -= memusage::btree_set_node::<transaction::Hash>();
        }
    }

    /// Adds or removes `child` in `txid`'s child set, keeping the cached
    /// usage total in step.
    fn update_child(&mut self, txid: transaction::Hash, child: transaction::Hash, add: bool) {
        let links = self
            .links
            .get_mut(&txid)
            .expect("every entry has a link record");

        if add {
            if links.children.insert(child) {
                self.cached_inner_usage += memusage::btree_set_node::<transaction::Hash>();
            }
        } else if links.children.remove(&child) {
            self.cached_inner_usage -= memusage::btree_set_node::<transaction::Hash>();
        }
    }

    /// The direct in-pool parents of `txid`.
    fn parents_of(&self, txid: &transaction::Hash) -> &BTreeSet<transaction::Hash> {
        &self
            .links
            .get(txid)
            .expect("every entry has a link record")
            .parents
    }

    /// The direct in-pool children of `txid`.
    fn children_of(&self, txid: &transaction::Hash) -> &BTreeSet<transaction::Hash> {
        &self
            .links
            .get(txid)
            .expect("every entry has a link record")
            .children
    }

    /// Computes the in-pool ancestor closure of `entry`, enforcing `limits`.
    ///
    /// With `search_for_parents`, direct parents are recomputed from the
    /// entry's inputs, which is required while the entry is not yet linked
    /// into the pool. Otherwise they are read from the link graph, which is
    /// only correct for entries already in the pool.
    fn calculate_ancestors(
        &self,
        entry: &MempoolEntry,
        limits: &AncestorLimits,
        search_for_parents: bool,
    ) -> Result<HashSet<transaction::Hash>, MempoolError> {
        let mut queued: BTreeSet<transaction::Hash> = BTreeSet::new();

        if search_for_parents {
            for outpoint in entry.transaction().spent_outpoints() {
                if self.store.contains(&outpoint.hash) {
                    queued.insert(outpoint.hash);
                    if queued.len() as u64 + 1 > limits.max_ancestor_count {
                        return Err(MempoolError::TooManyAncestors {
                            limit: limits.max_ancestor_count,
                        });
                    }
                }
            }
        } else {
            queued = self.parents_of(&entry.txid()).clone();
        }

        let mut ancestors: HashSet<transaction::Hash> = HashSet::new();
        let mut worklist: Vec<transaction::Hash> = queued.iter().copied().collect();
        let mut total_size = entry.tx_size();

        while let Some(stage_id) = worklist.pop() {
            let stage_entry = self
                .store
                .get(&stage_id)
                .expect("queued ancestors are in the pool");

            ancestors.insert(stage_id);
            total_size += stage_entry.tx_size();

            if stage_entry.size_with_descendants() + entry.tx_size() > limits.max_descendant_size {
                return Err(MempoolError::DescendantsTooLarge {
                    ancestor: stage_id,
                    limit: limits.max_descendant_size,
                });
            } else if stage_entry.count_with_descendants() + 1 > limits.max_descendant_count {
                return Err(MempoolError::TooManyDescendants {
                    ancestor: stage_id,
                    limit: limits.max_descendant_count,
                });
            } else if total_size > limits.max_ancestor_size {
                return Err(MempoolError::AncestorsTooLarge {
                    limit: limits.max_ancestor_size,
                });
            }

            for parent in self.parents_of(&stage_id) {
                if !ancestors.contains(parent) && queued.insert(*parent) {
                    worklist.push(*parent);
                }
            }
            if (ancestors.len() + worklist.len()) as u64 + 1 > limits.max_ancestor_count {
                return Err(MempoolError::TooManyAncestors {
                    limit: limits.max_ancestor_count,
                });
            }
        }

        Ok(ancestors)
    }

    /// Adds the in-pool descendant closure of `txid`, including `txid`
    /// itself, to `descendants`.
    ///
    /// Assumes `descendants` already contains the full closure of anything
    /// already in it, so batched calls skip repeated subtrees.
    fn calculate_descendants(
        &self,
        txid: transaction::Hash,
        descendants: &mut HashSet<transaction::Hash>,
    ) {
        let mut worklist = Vec::new();
        if !descendants.contains(&txid) {
            worklist.push(txid);
        }

        while let Some(id) = worklist.pop() {
            if !descendants.insert(id) {
                continue;
            }
            for child in self.children_of(&id) {
                if !descendants.contains(child) {
                    worklist.push(*child);
                }
            }
        }
    }

    /// Grows or shrinks every ancestor's descendant aggregates by `txid`'s
    /// footprint, and keeps the direct parents' child links in step.
    fn update_ancestors_of(
        &mut self,
        add: bool,
        txid: transaction::Hash,
        ancestors: &HashSet<transaction::Hash>,
    ) {
        let entry = self.store.get(&txid).expect("entry is in the pool");
        let (size, fee) = (entry.tx_size() as i64, entry.modified_fee());
        let (size_delta, fee_delta, count_delta) =
            if add { (size, fee, 1) } else { (-size, -fee, -1) };

        let direct_parents: Vec<_> = self.parents_of(&txid).iter().copied().collect();
        for parent in direct_parents {
            self.update_child(parent, txid, add);
        }

        for ancestor in ancestors {
            let known = self.store.modify(ancestor, |ancestor_entry| {
                ancestor_entry.apply_descendant_delta(size_delta, fee_delta, count_delta)
            });
            debug_assert!(known, "ancestor closures only contain in-pool entries");
        }
    }

    /// Folds the closure `ancestors` into `txid`'s own ancestor aggregates.
    fn update_entry_for_ancestors(
        &mut self,
        txid: transaction::Hash,
        ancestors: &HashSet<transaction::Hash>,
    ) {
        let mut total_size = 0i64;
        let mut total_fee = Amount::ZERO;
        let mut total_sigops = 0i64;

        for ancestor in ancestors {
            let entry = self
                .store
                .get(ancestor)
                .expect("ancestor closures only contain in-pool entries");
            total_size += entry.tx_size() as i64;
            total_fee += entry.modified_fee();
            total_sigops += entry.sigop_cost();
        }

        self.store.modify(&txid, |entry| {
            entry.apply_ancestor_delta(total_size, total_fee, ancestors.len() as i64, total_sigops)
        });
    }

    /// Unlinks `txid` from each of its children, as part of removing it.
    fn update_children_for_removal(&mut self, txid: transaction::Hash) {
        let children: Vec<_> = self.children_of(&txid).iter().copied().collect();
        for child in children {
            self.update_parent(child, txid, false);
        }
    }

    /// Restores the aggregate state of every entry that survives the removal
    /// of `to_remove`, and severs the removed entries' links.
    ///
    /// `to_remove` must be closed under the descendant relation, except when
    /// the entries were confirmed by a block: then their descendants stay,
    /// and `update_descendants` must be set so the survivors' ancestor
    /// aggregates shrink accordingly.
    ///
    /// All aggregate updates walk the link graph, so they happen before any
    /// link is severed.
    fn update_for_remove_from_mempool(
        &mut self,
        to_remove: &HashSet<transaction::Hash>,
        update_descendants: bool,
    ) {
        if update_descendants {
            for txid in to_remove {
                let mut descendants = HashSet::new();
                self.calculate_descendants(*txid, &mut descendants);
                descendants.remove(txid);

                let entry = self.store.get(txid).expect("staged entries are present");
                let (size, fee, sigops) =
                    (entry.tx_size() as i64, entry.modified_fee(), entry.sigop_cost());

                for descendant in descendants {
                    if to_remove.contains(&descendant) {
                        continue;
                    }
                    self.store.modify(&descendant, |descendant_entry| {
                        descendant_entry.apply_ancestor_delta(-size, -fee, -1, -sigops)
                    });
                }
            }
        }

        for txid in to_remove {
            let entry = self.store.get(txid).expect("staged entries are present");
            let ancestors = self
                .calculate_ancestors(entry, &AncestorLimits::unbounded(), false)
                .expect("unbounded limits never fail");
            let external: HashSet<_> = ancestors
                .into_iter()
                .filter(|ancestor| !to_remove.contains(ancestor))
                .collect();

            self.update_ancestors_of(false, *txid, &external);
        }

        for txid in to_remove {
            self.update_children_for_removal(*txid);
        }
    }

    /// Erases a single entry from every structure.
    ///
    /// [`PoolState::update_for_remove_from_mempool`] must already have run
    /// for the whole removal set this entry belongs to.
    fn remove_unchecked(&mut self, txid: transaction::Hash, reason: RemovalReason) {
        let entry = self.store.get(&txid).expect("staged entries are present");
        let tx = entry.transaction().clone();
        let tx_size = entry.tx_size();
        let usage = entry.dynamic_memory_usage();
        let sidecar_index = entry.tx_hashes_index;

        for outpoint in tx.spent_outpoints() {
            self.spent_by.remove(&outpoint);
        }

        self.tx_hashes.swap_remove(sidecar_index);
        if sidecar_index < self.tx_hashes.len() {
            let moved = self.tx_hashes[sidecar_index];
            self.store.modify(&moved, |moved_entry| {
                moved_entry.tx_hashes_index = sidecar_index;
            });
        }

        self.total_tx_size -= tx_size;
        self.cached_inner_usage -= usage;

        let links = self
            .links
            .remove(&txid)
            .expect("every entry has a link record");
        self.cached_inner_usage -= (links.parents.len() + links.children.len())
            * memusage::btree_set_node::<transaction::Hash>();

        self.store.remove(&txid);
        self.transactions_updated += 1;

        metrics::counter!("mempool.removed.transactions.total").increment(1);
        tracing::trace!(%txid, ?reason, "removed transaction from mempool");

        for handler in &self.entry_removed_handlers {
            handler(&tx, reason);
        }
    }

    /// The unified removal pipeline: updates surviving aggregate state, then
    /// erases every staged entry.
    ///
    /// See [`PoolState::update_for_remove_from_mempool`] for the closure
    /// requirement on `stage`.
    fn remove_staged(
        &mut self,
        stage: &HashSet<transaction::Hash>,
        update_descendants: bool,
        reason: RemovalReason,
    ) {
        self.update_for_remove_from_mempool(stage, update_descendants);
        for txid in stage {
            self.remove_unchecked(*txid, reason);
        }
    }

    fn add_unchecked(
        &mut self,
        txid: transaction::Hash,
        mut entry: MempoolEntry,
        ancestors: Option<HashSet<transaction::Hash>>,
        valid_fee_estimate: bool,
    ) -> bool {
        if self.store.contains(&txid) {
            return false;
        }
        debug_assert_eq!(txid, entry.txid(), "txid matches the entry's transaction");

        let ancestors = match ancestors {
            Some(ancestors) => ancestors,
            None => self
                .calculate_ancestors(&entry, &AncestorLimits::unbounded(), true)
                .expect("unbounded limits never fail"),
        };

        if let Some(delta) = self.fee_deltas.get(&txid) {
            if *delta != Amount::ZERO {
                entry.set_fee_delta(*delta);
            }
        }

        let tx = entry.transaction().clone();
        self.total_tx_size += entry.tx_size();
        self.cached_inner_usage += entry.dynamic_memory_usage();

        let estimator_entry = entry.clone();
        self.store
            .insert(txid, entry)
            .expect("duplicate ids were rejected above");
        self.links.insert(txid, TxLinks::default());

        let mut parent_ids = BTreeSet::new();
        for outpoint in tx.spent_outpoints() {
            self.spent_by.insert(outpoint, txid);
            parent_ids.insert(outpoint.hash);
        }
        for parent in parent_ids {
            if self.store.contains(&parent) {
                self.update_parent(txid, parent, true);
            }
        }

        self.update_ancestors_of(true, txid, &ancestors);
        self.update_entry_for_ancestors(txid, &ancestors);

        self.transactions_updated += 1;
        self.tx_hashes.push(txid);
        let sidecar_index = self.tx_hashes.len() - 1;
        self.store.modify(&txid, |stored| {
            stored.tx_hashes_index = sidecar_index;
        });

        if let Some(estimator) = self.estimator.as_mut() {
            estimator.process_transaction(&estimator_entry, valid_fee_estimate);
        }

        tracing::trace!(%txid, "added transaction to mempool");

        for handler in &self.entry_added_handlers {
            handler(&tx);
        }

        true
    }

    fn remove_recursive(&mut self, tx: &Transaction, reason: RemovalReason) {
        let txid = tx.hash();
        let mut roots: HashSet<transaction::Hash> = HashSet::new();

        if self.store.contains(&txid) {
            roots.insert(txid);
        } else {
            // The transaction itself is not here, but spenders of its
            // outputs might be; they have to go too.
            for index in 0..tx.outputs.len() {
                if let Some(child) = self.spent_by.get(&OutPoint::from_usize(txid, index)) {
                    roots.insert(*child);
                }
            }
        }

        let mut stage = HashSet::new();
        for root in roots {
            self.calculate_descendants(root, &mut stage);
        }

        self.remove_staged(&stage, false, reason);
    }

    fn remove_conflicts(&mut self, tx: &Transaction) {
        let txid = tx.hash();

        for outpoint in tx.spent_outpoints() {
            let Some(conflict) = self.spent_by.get(&outpoint).copied() else {
                continue;
            };
            if conflict == txid {
                continue;
            }
            if let Some(conflict_tx) = self.store.get(&conflict).map(|e| e.transaction().clone()) {
                tracing::debug!(
                    conflict = %conflict,
                    with = %txid,
                    "removing conflicting mempool transaction"
                );
                self.remove_recursive(&conflict_tx, RemovalReason::Conflict);
            }
        }
    }

    fn remove_for_block(&mut self, vtx: &[Arc<Transaction>], height: block::Height) {
        let mut confirmed = Vec::with_capacity(vtx.len());
        for tx in vtx {
            if let Some(entry) = self.store.get(&tx.hash()) {
                confirmed.push(entry.clone());
            }
        }

        for tx in vtx {
            let txid = tx.hash();
            if self.store.contains(&txid) {
                let stage: HashSet<_> = std::iter::once(txid).collect();
                self.remove_staged(&stage, true, RemovalReason::Block);
            }
            self.remove_conflicts(tx);
            self.fee_deltas.remove(&txid);
        }

        if let Some(estimator) = self.estimator.as_mut() {
            estimator.process_block(height, &confirmed);
        }

        self.last_rolling_fee_update = Utc::now();
        self.block_since_last_rolling_fee_bump = true;
    }

    fn remove_for_reorg<V, F>(
        &mut self,
        coins: &V,
        mempool_height: block::Height,
        mut filter_final_and_mature: F,
    ) where
        V: CoinView,
        F: FnMut(&MempoolEntry) -> Option<LockPoints>,
    {
        let mut to_remove: HashSet<transaction::Hash> = HashSet::new();
        let mut lock_updates: Vec<(transaction::Hash, LockPoints)> = Vec::new();

        for (txid, entry) in self.store.iter() {
            let Some(lock_points) = filter_final_and_mature(entry) else {
                to_remove.insert(*txid);
                continue;
            };

            if entry.spends_coinbase() {
                let missing_or_immature = entry.transaction().spent_outpoints().any(|outpoint| {
                    if self.store.contains(&outpoint.hash) {
                        return false;
                    }
                    match coins.get_coin(&outpoint) {
                        None => true,
                        Some(coin) => {
                            coin.from_coinbase
                                && mempool_height.0.saturating_sub(coin.height.0)
                                    < COINBASE_MATURITY
                        }
                    }
                });
                if missing_or_immature {
                    to_remove.insert(*txid);
                    continue;
                }
            }

            if lock_points != *entry.lock_points() {
                lock_updates.push((*txid, lock_points));
            }
        }

        let mut stage = HashSet::new();
        for txid in &to_remove {
            self.calculate_descendants(*txid, &mut stage);
        }

        if !stage.is_empty() {
            tracing::info!(count = stage.len(), "removing reorged mempool transactions");
        }
        self.remove_staged(&stage, false, RemovalReason::Reorg);

        for (txid, lock_points) in lock_updates {
            self.store.modify(&txid, |entry| entry.set_lock_points(lock_points));
        }
    }

    fn expire(&mut self, cutoff: DateTime<Utc>) -> usize {
        let expired: Vec<transaction::Hash> = self
            .store
            .iter_by_entry_time()
            .take_while(|(_, entry)| entry.time() < cutoff)
            .map(|(txid, _)| txid)
            .collect();

        let mut stage = HashSet::new();
        for txid in expired {
            self.calculate_descendants(txid, &mut stage);
        }

        let removed = stage.len();
        if removed > 0 {
            tracing::debug!(count = removed, %cutoff, "expired mempool transactions");
        }
        self.remove_staged(&stage, false, RemovalReason::Expiry);

        removed
    }

    /// Bumps the rolling minimum fee rate after evicting a package at
    /// `rate`.
    fn track_package_removed(&mut self, rate: FeeRate) {
        if rate.zat_per_kvb() as f64 > self.rolling_minimum_fee_rate {
            self.rolling_minimum_fee_rate = rate.zat_per_kvb() as f64;
            self.block_since_last_rolling_fee_bump = false;
        }
    }

    fn get_min_fee(&mut self, size_limit: usize, now: DateTime<Utc>) -> FeeRate {
        if !self.block_since_last_rolling_fee_bump || self.rolling_minimum_fee_rate == 0.0 {
            return FeeRate::from_zat_per_kvb(self.rolling_minimum_fee_rate.round() as i64);
        }

        if now > self.last_rolling_fee_update + Duration::seconds(10) {
            // Decay faster while the pool is well under budget.
            let mut halflife = ROLLING_FEE_HALFLIFE;
            let usage = self.dynamic_memory_usage();
            if usage < size_limit / 4 {
                halflife /= 4;
            } else if usage < size_limit / 2 {
                halflife /= 2;
            }

            let elapsed = (now - self.last_rolling_fee_update).num_seconds();
            self.rolling_minimum_fee_rate /= 2f64.powf(elapsed as f64 / halflife as f64);
            self.last_rolling_fee_update = now;

            if self.rolling_minimum_fee_rate < self.incremental_relay_fee.zat_per_kvb() as f64 / 2.0
            {
                self.rolling_minimum_fee_rate = 0.0;
                return FeeRate::ZERO;
            }
        }

        std::cmp::max(
            FeeRate::from_zat_per_kvb(self.rolling_minimum_fee_rate.round() as i64),
            self.incremental_relay_fee,
        )
    }

    fn trim_to_size(
        &mut self,
        size_limit: usize,
        mut no_spends_remaining: Option<&mut Vec<OutPoint>>,
    ) {
        let mut removed_count = 0usize;
        let mut max_fee_rate_removed = FeeRate::ZERO;

        while !self.store.is_empty() && self.dynamic_memory_usage() > size_limit {
            let (txid, entry) = self
                .store
                .iter_by_descendant_score()
                .next()
                .expect("non-empty store has a lowest entry");

            // The feerate of the package we are about to evict, plus the
            // incremental step a replacement would have to pay anyway.
            let package_rate = FeeRate::from_fee_and_size(
                entry.mod_fees_with_descendants(),
                entry.size_with_descendants(),
            ) + self.incremental_relay_fee;

            self.track_package_removed(package_rate);
            max_fee_rate_removed = std::cmp::max(max_fee_rate_removed, package_rate);

            let mut stage = HashSet::new();
            self.calculate_descendants(txid, &mut stage);
            removed_count += stage.len();

            let staged_txs: Vec<Arc<Transaction>> = if no_spends_remaining.is_some() {
                stage
                    .iter()
                    .map(|id| {
                        self.store
                            .get(id)
                            .expect("staged entries are present")
                            .transaction()
                            .clone()
                    })
                    .collect()
            } else {
                Vec::new()
            };

            self.remove_staged(&stage, false, RemovalReason::SizeLimit);

            if let Some(out) = no_spends_remaining.as_mut() {
                for tx in staged_txs {
                    for outpoint in tx.spent_outpoints() {
                        if self.store.contains(&outpoint.hash) {
                            continue;
                        }
                        let start = OutPoint {
                            hash: outpoint.hash,
                            index: 0,
                        };
                        let still_spent = self
                            .spent_by
                            .range(start..)
                            .next()
                            .is_some_and(|(spent, _)| spent.hash == outpoint.hash);
                        if !still_spent {
                            out.push(outpoint);
                        }
                    }
                }
            }
        }

        if max_fee_rate_removed > FeeRate::ZERO {
            tracing::debug!(
                count = removed_count,
                rolling_minimum = %max_fee_rate_removed,
                "trimmed mempool to size, rolling minimum fee bumped"
            );
        }
    }

    fn update_transactions_from_block(&mut self, txids: &[transaction::Hash]) {
        // Closures computed for one id are reused by the others.
        let mut cached_descendants: HashMap<transaction::Hash, HashSet<transaction::Hash>> =
            HashMap::new();
        let already_included: HashSet<transaction::Hash> = txids.iter().copied().collect();

        // Iterate in reverse so that all in-pool descendants of an id have
        // been processed before the id itself.
        for txid in txids.iter().rev() {
            if !self.store.contains(txid) {
                continue;
            }

            // The link graph cannot be trusted for re-admitted entries, so
            // find this transaction's children through the spend map.
            let start = OutPoint {
                hash: *txid,
                index: 0,
            };
            let children: Vec<transaction::Hash> = self
                .spent_by
                .range(start..)
                .take_while(|(outpoint, _)| outpoint.hash == *txid)
                .map(|(_, spender)| *spender)
                .collect();

            for child in children {
                if !already_included.contains(&child) {
                    self.update_child(*txid, child, true);
                    self.update_parent(child, *txid, true);
                }
            }

            self.update_for_descendants(*txid, &mut cached_descendants, &already_included);
        }
    }

    /// Accounts `txid`'s out-of-set in-pool descendants into its descendant
    /// aggregates, and itself into their ancestor aggregates.
    ///
    /// Descendants in `exclude` were admitted after `txid` and already
    /// account for it.
    fn update_for_descendants(
        &mut self,
        txid: transaction::Hash,
        cached_descendants: &mut HashMap<transaction::Hash, HashSet<transaction::Hash>>,
        exclude: &HashSet<transaction::Hash>,
    ) {
        let mut all_descendants: HashSet<transaction::Hash> = HashSet::new();
        let mut worklist: Vec<transaction::Hash> =
            self.children_of(&txid).iter().copied().collect();

        while let Some(descendant) = worklist.pop() {
            if !all_descendants.insert(descendant) {
                continue;
            }
            if let Some(cached) = cached_descendants.get(&descendant) {
                // A cached closure is complete; no need to walk further.
                all_descendants.extend(cached.iter().copied());
            } else {
                for child in self.children_of(&descendant) {
                    if !all_descendants.contains(child) {
                        worklist.push(*child);
                    }
                }
            }
        }

        let update_entry = self.store.get(&txid).expect("entry is in the pool");
        let (update_size, update_fee, update_sigops) = (
            update_entry.tx_size() as i64,
            update_entry.modified_fee(),
            update_entry.sigop_cost(),
        );

        let mut modify_size = 0i64;
        let mut modify_fee = Amount::ZERO;
        let mut modify_count = 0i64;
        let mut cached_set = HashSet::new();

        for descendant in &all_descendants {
            if exclude.contains(descendant) {
                continue;
            }

            let descendant_entry = self
                .store
                .get(descendant)
                .expect("descendant closures only contain in-pool entries");
            modify_size += descendant_entry.tx_size() as i64;
            modify_fee += descendant_entry.modified_fee();
            modify_count += 1;
            cached_set.insert(*descendant);

            self.store.modify(descendant, |entry| {
                entry.apply_ancestor_delta(update_size, update_fee, 1, update_sigops)
            });
        }
        cached_descendants.insert(txid, cached_set);

        if modify_count > 0 {
            self.store.modify(&txid, |entry| {
                entry.apply_descendant_delta(modify_size, modify_fee, modify_count)
            });
        }
    }

    fn prioritise_transaction(&mut self, txid: transaction::Hash, fee_delta: Amount) {
        let total_delta = {
            let delta = self.fee_deltas.entry(txid).or_insert(Amount::ZERO);
            *delta += fee_delta;
            *delta
        };

        if self.store.contains(&txid) {
            self.store
                .modify(&txid, |entry| entry.set_fee_delta(total_delta));

            // The modified fee changed, so every package aggregate that
            // includes this transaction must move with it.
            let entry = self.store.get(&txid).expect("entry is in the pool");
            let ancestors = self
                .calculate_ancestors(entry, &AncestorLimits::unbounded(), false)
                .expect("unbounded limits never fail");
            for ancestor in &ancestors {
                self.store.modify(ancestor, |ancestor_entry| {
                    ancestor_entry.apply_descendant_delta(0, fee_delta, 0)
                });
            }

            let mut descendants = HashSet::new();
            self.calculate_descendants(txid, &mut descendants);
            descendants.remove(&txid);
            for descendant in &descendants {
                self.store.modify(descendant, |descendant_entry| {
                    descendant_entry.apply_ancestor_delta(0, fee_delta, 0, 0)
                });
            }

            self.transactions_updated += 1;
        }

        tracing::info!(%txid, delta = %fee_delta, total = %total_delta, "prioritised transaction");
    }

    /// All in-pool ids, ordered by ascending ancestor count and descending
    /// feerate, so parents always precede their children.
    fn sorted_depth_and_score(&self) -> Vec<transaction::Hash> {
        let mut entries: Vec<(&transaction::Hash, &MempoolEntry)> = self.store.iter().collect();
        entries.sort_by(|(a_txid, a), (b_txid, b)| depth_and_score_cmp(a_txid, a, b_txid, b));
        entries.into_iter().map(|(txid, _)| *txid).collect()
    }

    fn clear(&mut self) {
        self.store.clear();
        self.links.clear();
        self.spent_by.clear();
        self.tx_hashes.clear();
        self.total_tx_size = 0;
        self.cached_inner_usage = 0;
        self.rolling_minimum_fee_rate = 0.0;
        self.last_rolling_fee_update = Utc::now();
        self.block_since_last_rolling_fee_bump = false;
        self.transactions_updated += 1;
    }

    /// Walks the whole pool, asserting every structural invariant.
    fn check<V: CoinView>(&self, coins: &V) {
        let unbounded = AncestorLimits::unbounded();
        let mut total_size = 0u64;
        let mut inner_usage = 0usize;

        for (txid, entry) in self.store.iter() {
            total_size += entry.tx_size();
            inner_usage += entry.dynamic_memory_usage();

            let links = self
                .links
                .get(txid)
                .expect("every entry has a link record");
            inner_usage += (links.parents.len() + links.children.len())
                * memusage::btree_set_node::<transaction::Hash>();

            // Every input is provided by the pool or the coin view, and is
            // registered in the spend map.
            let mut computed_parents = BTreeSet::new();
            for input in &entry.transaction().inputs {
                let outpoint = input.outpoint;
                if let Some(parent) = self.store.get(&outpoint.hash) {
                    assert!(
                        (outpoint.index as usize) < parent.transaction().outputs.len(),
                        "in-pool parent provides the spent output"
                    );
                    computed_parents.insert(outpoint.hash);
                } else {
                    assert!(
                        coins.get_coin(&outpoint).is_some(),
                        "inputs are available in the pool or the coin view"
                    );
                }
                assert_eq!(
                    self.spent_by.get(&outpoint),
                    Some(txid),
                    "each spent outpoint maps back to its spender"
                );
            }
            assert_eq!(
                &computed_parents, &links.parents,
                "parent links match the entry's inputs"
            );

            // Children recorded in the link graph are exactly the in-pool
            // spends of this entry's outputs.
            let start = OutPoint {
                hash: *txid,
                index: 0,
            };
            let computed_children: BTreeSet<transaction::Hash> = self
                .spent_by
                .range(start..)
                .take_while(|(outpoint, _)| outpoint.hash == *txid)
                .map(|(_, spender)| *spender)
                .collect();
            assert_eq!(
                &computed_children, &links.children,
                "child links match the spend map"
            );

            // Ancestor aggregates equal recomputation from scratch.
            let ancestors = self
                .calculate_ancestors(entry, &unbounded, false)
                .expect("unbounded limits never fail");
            let mut ancestor_size = entry.tx_size();
            let mut ancestor_fees = entry.modified_fee();
            let mut ancestor_sigops = entry.sigop_cost();
            for ancestor in &ancestors {
                let ancestor_entry = self.store.get(ancestor).expect("ancestors are in the pool");
                ancestor_size += ancestor_entry.tx_size();
                ancestor_fees += ancestor_entry.modified_fee();
                ancestor_sigops += ancestor_entry.sigop_cost();
            }
            assert_eq!(
                entry.count_with_ancestors(),
                ancestors.len() as u64 + 1,
                "ancestor count matches the closure"
            );
            assert_eq!(
                entry.size_with_ancestors(),
                ancestor_size,
                "ancestor size matches the closure"
            );
            assert_eq!(
                entry.mod_fees_with_ancestors(),
                ancestor_fees,
                "ancestor fees match the closure"
            );
            assert_eq!(
                entry.sigop_cost_with_ancestors(),
                ancestor_sigops,
                "ancestor sigops match the closure"
            );

            // Descendant aggregates equal recomputation from scratch.
            let mut descendants = HashSet::new();
            self.calculate_descendants(*txid, &mut descendants);
            let mut descendant_size = 0u64;
            let mut descendant_fees = Amount::ZERO;
            for descendant in &descendants {
                let descendant_entry = self
                    .store
                    .get(descendant)
                    .expect("descendants are in the pool");
                descendant_size += descendant_entry.tx_size();
                descendant_fees += descendant_entry.modified_fee();
            }
            assert_eq!(
                entry.count_with_descendants(),
                descendants.len() as u64,
                "descendant count matches the closure"
            );
            assert_eq!(
                entry.size_with_descendants(),
                descendant_size,
                "descendant size matches the closure"
            );
            assert_eq!(
                entry.mod_fees_with_descendants(),
                descendant_fees,
                "descendant fees match the closure"
            );
        }

        for (outpoint, spender) in &self.spent_by {
            let entry = self
                .store
                .get(spender)
                .expect("spend map entries point into the store");
            assert!(
                entry.transaction().spent_outpoints().any(|o| o == *outpoint),
                "spend map entries are inputs of their spender"
            );
        }

        assert_eq!(
            self.tx_hashes.len(),
            self.store.len(),
            "the hash sidecar covers the pool"
        );
        for (index, txid) in self.tx_hashes.iter().enumerate() {
            let entry = self.store.get(txid).expect("sidecar ids are in the store");
            assert_eq!(
                entry.tx_hashes_index, index,
                "sidecar positions stay in sync"
            );
        }

        assert_eq!(total_size, self.total_tx_size, "virtual sizes sum up");
        assert_eq!(
            inner_usage, self.cached_inner_usage,
            "cached usage matches entries and links"
        );
    }
}

#[cfg(test)]
impl Mempool {
    /// Test-only access to the rolling fee state.
    pub(crate) fn set_rolling_fee_state(
        &self,
        rate: f64,
        last_update: DateTime<Utc>,
        block_since_bump: bool,
    ) {
        let mut state = self.lock();
        state.rolling_minimum_fee_rate = rate;
        state.last_rolling_fee_update = last_update;
        state.block_since_last_rolling_fee_bump = block_since_bump;
    }

    /// Test-only read of the rolling minimum fee rate.
    pub(crate) fn rolling_minimum_fee_rate(&self) -> f64 {
        self.lock().rolling_minimum_fee_rate
    }
}
