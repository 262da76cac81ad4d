//! Mempool entries: per-transaction bookkeeping.
//!
//! A [`MempoolEntry`] caches everything the pool needs to know about one
//! transaction, plus aggregate statistics over its in-pool ancestors and
//! descendants. The aggregates always include the entry itself, and are kept
//! incrementally up to date by the pool as relatives arrive and leave.

use std::{mem, sync::Arc};

use chrono::{DateTime, Utc};

use okapi_chain::{
    amount::Amount,
    block,
    fee_rate::FeeRate,
    transaction::{self, Transaction},
};

/// The chain positions at which a transaction's relative lock time
/// constraints are satisfied.
///
/// As long as the chain still contains `max_input_block`, the cached height
/// and time remain valid across reorgs and need not be recomputed.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct LockPoints {
    /// The chain height at which all relative height locks are satisfied.
    pub height: block::Height,

    /// The median-time-past, in seconds, at which all relative time locks
    /// are satisfied.
    pub time: i64,

    /// The highest block containing one of the transaction's inputs, if the
    /// transaction has relative locks that depend on one.
    pub max_input_block: Option<block::Hash>,
}

/// A transaction in the mempool, together with its cached and aggregate
/// metadata.
#[derive(Clone, Debug)]
pub struct MempoolEntry {
    tx: Arc<Transaction>,

    /// Cached to avoid expensive parent-transaction lookups.
    fee: Amount,
    /// ... and to avoid recomputing the transaction weight.
    tx_weight: u64,
    /// ... and the heap memory held by the transaction.
    usage_size: usize,

    /// Local time when the transaction entered the mempool.
    time: DateTime<Utc>,
    /// Chain height when the transaction entered the mempool.
    entry_height: block::Height,
    /// Whether the transaction spends a coinbase output.
    spends_coinbase: bool,
    /// Total signature operation cost.
    sigop_cost: i64,

    /// Fee adjustment applied for mining priority only.
    fee_delta: Amount,
    /// Cached relative lock time evaluation.
    lock_points: LockPoints,

    // Aggregate statistics over this entry and its in-pool descendants.
    // Removing this entry means removing all of them.
    count_with_descendants: u64,
    size_with_descendants: u64,
    mod_fees_with_descendants: Amount,

    // Analogous statistics over this entry and its in-pool ancestors.
    count_with_ancestors: u64,
    size_with_ancestors: u64,
    mod_fees_with_ancestors: Amount,
    sigop_cost_with_ancestors: i64,

    /// This entry's slot in the pool's transaction-hash sidecar vector.
    pub(crate) tx_hashes_index: usize,
}

impl MempoolEntry {
    /// Creates an entry for `tx`, with aggregate statistics covering just the
    /// entry itself.
    ///
    /// The pool extends the aggregates to in-pool relatives during insertion.
    pub fn new(
        tx: Arc<Transaction>,
        fee: Amount,
        time: DateTime<Utc>,
        entry_height: block::Height,
        spends_coinbase: bool,
        sigop_cost: i64,
        lock_points: LockPoints,
    ) -> MempoolEntry {
        let tx_weight = tx.weight();
        let usage_size = tx.memory_usage() + mem::size_of::<Arc<Transaction>>();
        let tx_size = tx.virtual_size();

        MempoolEntry {
            tx,
            fee,
            tx_weight,
            usage_size,
            time,
            entry_height,
            spends_coinbase,
            sigop_cost,
            fee_delta: Amount::ZERO,
            lock_points,
            count_with_descendants: 1,
            size_with_descendants: tx_size,
            mod_fees_with_descendants: fee,
            count_with_ancestors: 1,
            size_with_ancestors: tx_size,
            mod_fees_with_ancestors: fee,
            sigop_cost_with_ancestors: sigop_cost,
            tx_hashes_index: 0,
        }
    }

    /// The transaction this entry holds.
    pub fn transaction(&self) -> &Arc<Transaction> {
        &self.tx
    }

    /// The id of the transaction this entry holds.
    pub fn txid(&self) -> transaction::Hash {
        self.tx.hash()
    }

    /// The transaction's fee as it entered the pool, without any priority
    /// delta.
    pub fn fee(&self) -> Amount {
        self.fee
    }

    /// The transaction's fee as used for all mining and eviction ordering.
    pub fn modified_fee(&self) -> Amount {
        self.fee + self.fee_delta
    }

    /// The current priority fee delta.
    pub fn fee_delta(&self) -> Amount {
        self.fee_delta
    }

    /// The transaction's weight.
    pub fn tx_weight(&self) -> u64 {
        self.tx_weight
    }

    /// The transaction's virtual size, as used for all feerate denominators.
    pub fn tx_size(&self) -> u64 {
        (self.tx_weight + 3) / 4
    }

    /// An estimate of the heap memory held by this entry's transaction.
    pub fn dynamic_memory_usage(&self) -> usize {
        self.usage_size
    }

    /// The local time when the transaction entered the mempool.
    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    /// The chain height when the transaction entered the mempool.
    pub fn height(&self) -> block::Height {
        self.entry_height
    }

    /// Whether the transaction spends a coinbase output.
    pub fn spends_coinbase(&self) -> bool {
        self.spends_coinbase
    }

    /// The transaction's total signature operation cost.
    pub fn sigop_cost(&self) -> i64 {
        self.sigop_cost
    }

    /// The cached relative lock time evaluation.
    pub fn lock_points(&self) -> &LockPoints {
        &self.lock_points
    }

    /// The number of in-pool descendants, including this entry.
    pub fn count_with_descendants(&self) -> u64 {
        self.count_with_descendants
    }

    /// The combined virtual size of this entry and its in-pool descendants.
    pub fn size_with_descendants(&self) -> u64 {
        self.size_with_descendants
    }

    /// The combined modified fees of this entry and its in-pool descendants.
    pub fn mod_fees_with_descendants(&self) -> Amount {
        self.mod_fees_with_descendants
    }

    /// The number of in-pool ancestors, including this entry.
    pub fn count_with_ancestors(&self) -> u64 {
        self.count_with_ancestors
    }

    /// The combined virtual size of this entry and its in-pool ancestors.
    pub fn size_with_ancestors(&self) -> u64 {
        self.size_with_ancestors
    }

    /// The combined modified fees of this entry and its in-pool ancestors.
    pub fn mod_fees_with_ancestors(&self) -> Amount {
        self.mod_fees_with_ancestors
    }

    /// The combined signature operation cost of this entry and its in-pool
    /// ancestors.
    pub fn sigop_cost_with_ancestors(&self) -> i64 {
        self.sigop_cost_with_ancestors
    }

    /// The fee and size whose ratio is this entry's descendant score:
    /// the better of the entry's own feerate and its descendant package
    /// feerate.
    pub fn descendant_score_fee_and_size(&self) -> (Amount, u64) {
        let own = (self.modified_fee().zatoshis() as i128) * (self.size_with_descendants as i128);
        let package = (self.mod_fees_with_descendants.zatoshis() as i128) * (self.tx_size() as i128);

        if package > own {
            (self.mod_fees_with_descendants, self.size_with_descendants)
        } else {
            (self.modified_fee(), self.tx_size())
        }
    }

    /// The fee and size whose ratio is this entry's ancestor score:
    /// the worse of the entry's own feerate and its ancestor package feerate.
    pub fn ancestor_score_fee_and_size(&self) -> (Amount, u64) {
        let own = (self.modified_fee().zatoshis() as i128) * (self.size_with_ancestors as i128);
        let package = (self.mod_fees_with_ancestors.zatoshis() as i128) * (self.tx_size() as i128);

        if own > package {
            (self.mod_fees_with_ancestors, self.size_with_ancestors)
        } else {
            (self.modified_fee(), self.tx_size())
        }
    }

    /// Adjusts the descendant aggregates by the given deltas.
    pub(crate) fn apply_descendant_delta(&mut self, size: i64, fee: Amount, count: i64) {
        self.size_with_descendants = self
            .size_with_descendants
            .checked_add_signed(size)
            .expect("descendant size stays positive");
        self.mod_fees_with_descendants += fee;
        self.count_with_descendants = self
            .count_with_descendants
            .checked_add_signed(count)
            .expect("descendant count stays positive");
    }

    /// Adjusts the ancestor aggregates by the given deltas.
    pub(crate) fn apply_ancestor_delta(&mut self, size: i64, fee: Amount, count: i64, sigops: i64) {
        self.size_with_ancestors = self
            .size_with_ancestors
            .checked_add_signed(size)
            .expect("ancestor size stays positive");
        self.mod_fees_with_ancestors += fee;
        self.count_with_ancestors = self
            .count_with_ancestors
            .checked_add_signed(count)
            .expect("ancestor count stays positive");
        self.sigop_cost_with_ancestors += sigops;
    }

    /// Replaces the priority fee delta, keeping the fee aggregates that
    /// include this entry consistent.
    pub(crate) fn set_fee_delta(&mut self, fee_delta: Amount) {
        let diff = fee_delta - self.fee_delta;

        self.mod_fees_with_descendants += diff;
        self.mod_fees_with_ancestors += diff;
        self.fee_delta = fee_delta;
    }

    /// Replaces the cached lock points after a reorg.
    pub(crate) fn set_lock_points(&mut self, lock_points: LockPoints) {
        self.lock_points = lock_points;
    }
}

/// Information about a mempool transaction, as returned by queries.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MempoolTxInfo {
    /// The transaction itself.
    pub tx: Arc<Transaction>,

    /// The local time when the transaction entered the mempool.
    pub time: DateTime<Utc>,

    /// The feerate of the transaction, from its unmodified fee.
    pub fee_rate: FeeRate,

    /// The transaction's priority fee delta.
    pub fee_delta: Amount,
}

impl From<&MempoolEntry> for MempoolTxInfo {
    fn from(entry: &MempoolEntry) -> MempoolTxInfo {
        MempoolTxInfo {
            tx: entry.transaction().clone(),
            time: entry.time(),
            fee_rate: FeeRate::from_fee_and_size(entry.fee(), entry.tx_size()),
            fee_delta: entry.fee_delta(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use okapi_chain::transparent;

    fn entry_with(fee: i64, outputs: usize) -> MempoolEntry {
        let tx = Arc::new(Transaction {
            inputs: vec![],
            outputs: (0..outputs)
                .map(|index| transparent::Output {
                    value: Amount::new(50 + index as i64),
                    lock_script: transparent::Script(vec![0; 4]),
                })
                .collect(),
            lock_time: 0,
        });

        MempoolEntry::new(
            tx,
            Amount::new(fee),
            Utc::now(),
            block::Height(100),
            false,
            4,
            LockPoints::default(),
        )
    }

    #[test]
    fn new_entry_aggregates_cover_itself() {
        let entry = entry_with(1_000, 1);

        assert_eq!(entry.count_with_descendants(), 1);
        assert_eq!(entry.count_with_ancestors(), 1);
        assert_eq!(entry.size_with_descendants(), entry.tx_size());
        assert_eq!(entry.size_with_ancestors(), entry.tx_size());
        assert_eq!(entry.mod_fees_with_descendants(), Amount::new(1_000));
        assert_eq!(entry.mod_fees_with_ancestors(), Amount::new(1_000));
        assert_eq!(entry.sigop_cost_with_ancestors(), 4);
    }

    #[test]
    fn fee_delta_moves_modified_fee_and_aggregates() {
        let mut entry = entry_with(1_000, 1);

        entry.set_fee_delta(Amount::new(500));
        assert_eq!(entry.modified_fee(), Amount::new(1_500));
        assert_eq!(entry.mod_fees_with_descendants(), Amount::new(1_500));
        assert_eq!(entry.mod_fees_with_ancestors(), Amount::new(1_500));

        // Replacing the delta applies only the difference.
        entry.set_fee_delta(Amount::new(-250));
        assert_eq!(entry.modified_fee(), Amount::new(750));
        assert_eq!(entry.mod_fees_with_descendants(), Amount::new(750));

        // The raw fee never moves.
        assert_eq!(entry.fee(), Amount::new(1_000));
    }

    #[test]
    fn descendant_score_picks_the_better_package() {
        let mut entry = entry_with(1_000, 1);
        let own_size = entry.tx_size();

        // A high-fee descendant makes the package score win.
        entry.apply_descendant_delta(own_size as i64, Amount::new(9_000), 1);
        let (fee, size) = entry.descendant_score_fee_and_size();
        assert_eq!(fee, Amount::new(10_000));
        assert_eq!(size, own_size * 2);

        // A low-fee descendant leaves the entry's own feerate as the score.
        let mut entry = entry_with(1_000, 1);
        entry.apply_descendant_delta(own_size as i64, Amount::new(1), 1);
        let (fee, size) = entry.descendant_score_fee_and_size();
        assert_eq!(fee, Amount::new(1_000));
        assert_eq!(size, own_size);
    }

    #[test]
    fn ancestor_score_picks_the_worse_package() {
        let mut entry = entry_with(1_000, 1);
        let own_size = entry.tx_size();

        // A low-fee ancestor drags the score down to the package rate.
        entry.apply_ancestor_delta(own_size as i64, Amount::new(1), 1, 0);
        let (fee, size) = entry.ancestor_score_fee_and_size();
        assert_eq!(fee, Amount::new(1_001));
        assert_eq!(size, own_size * 2);

        // A high-fee ancestor cannot raise the score above the entry's own.
        let mut entry = entry_with(1_000, 1);
        entry.apply_ancestor_delta(own_size as i64, Amount::new(9_000), 1, 0);
        let (fee, size) = entry.ancestor_score_fee_and_size();
        assert_eq!(fee, Amount::new(1_000));
        assert_eq!(size, own_size);
    }
}
