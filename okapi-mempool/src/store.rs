//! The multi-indexed container of mempool entries.
//!
//! One owning hash map holds the entries, addressable by transaction id.
//! Three ordered indices over the same entries provide the traversals the
//! pool needs: ascending descendant score (eviction order), entry time
//! (expiry order), and descending ancestor score (mining order).
//!
//! The ordered indices store self-contained keys copied out of the entry, so
//! any mutation that can move an entry's sort position must go through
//! [`IndexedEntries::modify`], which re-keys every index.
//!
//! The id lookup relies on `HashMap`'s SipHash hasher and its per-process
//! random key, which prevents adversaries from clustering transaction ids
//! into one hash bucket.

use std::{
    cmp::Ordering,
    collections::{BTreeSet, HashMap},
};

use chrono::{DateTime, Utc};

use okapi_chain::{amount::Amount, transaction};

use crate::{entry::MempoolEntry, error::MempoolError, memusage};

/// A feerate as an unreduced fraction.
///
/// Ordering compares `fee / size` ratios exactly, by cross-multiplication,
/// so scores never round through division or floats.
#[derive(Clone, Copy, Debug)]
pub(crate) struct FeeAndSize {
    fee: i64,
    size: u64,
}

impl FeeAndSize {
    fn new(fee: Amount, size: u64) -> FeeAndSize {
        FeeAndSize {
            fee: fee.zatoshis(),
            size,
        }
    }
}

impl Ord for FeeAndSize {
    fn cmp(&self, other: &FeeAndSize) -> Ordering {
        let lhs = self.fee as i128 * other.size as i128;
        let rhs = other.fee as i128 * self.size as i128;

        lhs.cmp(&rhs)
    }
}

impl PartialOrd for FeeAndSize {
    fn partial_cmp(&self, other: &FeeAndSize) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for FeeAndSize {
    fn eq(&self, other: &FeeAndSize) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FeeAndSize {}

/// Key of the eviction-order index.
///
/// Ascending iteration visits the lowest descendant score first, breaking
/// ties toward the most recently received entry.
#[derive(Clone, Copy, Debug)]
pub(crate) struct DescendantScoreKey {
    score: FeeAndSize,
    time: DateTime<Utc>,
    pub(crate) txid: transaction::Hash,
}

impl Ord for DescendantScoreKey {
    fn cmp(&self, other: &DescendantScoreKey) -> Ordering {
        self.score
            .cmp(&other.score)
            .then_with(|| other.time.cmp(&self.time))
            .then_with(|| self.txid.cmp(&other.txid))
    }
}

impl PartialOrd for DescendantScoreKey {
    fn partial_cmp(&self, other: &DescendantScoreKey) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for DescendantScoreKey {
    fn eq(&self, other: &DescendantScoreKey) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for DescendantScoreKey {}

/// Key of the expiry-order index: ascending iteration visits the oldest
/// entry first.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) struct EntryTimeKey {
    time: DateTime<Utc>,
    pub(crate) txid: transaction::Hash,
}

/// Key of the mining-order index.
///
/// Ascending iteration visits the highest ancestor score first, breaking
/// ties by ascending transaction id.
#[derive(Clone, Copy, Debug)]
pub(crate) struct AncestorScoreKey {
    score: FeeAndSize,
    pub(crate) txid: transaction::Hash,
}

impl Ord for AncestorScoreKey {
    fn cmp(&self, other: &AncestorScoreKey) -> Ordering {
        other
            .score
            .cmp(&self.score)
            .then_with(|| self.txid.cmp(&other.txid))
    }
}

impl PartialOrd for AncestorScoreKey {
    fn partial_cmp(&self, other: &AncestorScoreKey) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for AncestorScoreKey {
    fn eq(&self, other: &AncestorScoreKey) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for AncestorScoreKey {}

fn index_keys(
    txid: transaction::Hash,
    entry: &MempoolEntry,
) -> (DescendantScoreKey, EntryTimeKey, AncestorScoreKey) {
    let (descendant_fee, descendant_size) = entry.descendant_score_fee_and_size();
    let (ancestor_fee, ancestor_size) = entry.ancestor_score_fee_and_size();

    (
        DescendantScoreKey {
            score: FeeAndSize::new(descendant_fee, descendant_size),
            time: entry.time(),
            txid,
        },
        EntryTimeKey {
            time: entry.time(),
            txid,
        },
        AncestorScoreKey {
            score: FeeAndSize::new(ancestor_fee, ancestor_size),
            txid,
        },
    )
}

/// The entries in the pool, indexed four ways.
#[derive(Default)]
pub(crate) struct IndexedEntries {
    entries: HashMap<transaction::Hash, MempoolEntry>,
    by_descendant_score: BTreeSet<DescendantScoreKey>,
    by_entry_time: BTreeSet<EntryTimeKey>,
    by_ancestor_score: BTreeSet<AncestorScoreKey>,
}

impl IndexedEntries {
    /// The number of entries in the store.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the store has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns `true` if an entry with `txid` is present.
    pub fn contains(&self, txid: &transaction::Hash) -> bool {
        self.entries.contains_key(txid)
    }

    /// Returns the entry with `txid`, if present.
    pub fn get(&self, txid: &transaction::Hash) -> Option<&MempoolEntry> {
        self.entries.get(txid)
    }

    /// Inserts a new entry, updating every index.
    pub fn insert(
        &mut self,
        txid: transaction::Hash,
        entry: MempoolEntry,
    ) -> Result<(), MempoolError> {
        if self.entries.contains_key(&txid) {
            return Err(MempoolError::DuplicateTxId(txid));
        }

        let (descendant_key, time_key, ancestor_key) = index_keys(txid, &entry);
        self.entries.insert(txid, entry);
        self.by_descendant_score.insert(descendant_key);
        self.by_entry_time.insert(time_key);
        self.by_ancestor_score.insert(ancestor_key);

        Ok(())
    }

    /// Removes the entry with `txid` from every index, returning it.
    ///
    /// The caller is responsible for having restored the aggregate state of
    /// the surviving entries first.
    pub fn remove(&mut self, txid: &transaction::Hash) -> Option<MempoolEntry> {
        let entry = self.entries.remove(txid)?;

        let (descendant_key, time_key, ancestor_key) = index_keys(*txid, &entry);
        self.by_descendant_score.remove(&descendant_key);
        self.by_entry_time.remove(&time_key);
        self.by_ancestor_score.remove(&ancestor_key);

        Some(entry)
    }

    /// Applies `mutate` to the entry with `txid` under the index discipline:
    /// every ordered index is erased and reinserted around the mutation, so
    /// sort keys derived from mutated fields stay correct.
    ///
    /// Returns `false` if no such entry exists.
    pub fn modify(
        &mut self,
        txid: &transaction::Hash,
        mutate: impl FnOnce(&mut MempoolEntry),
    ) -> bool {
        let Some(entry) = self.entries.get_mut(txid) else {
            return false;
        };

        let (descendant_key, time_key, ancestor_key) = index_keys(*txid, entry);
        self.by_descendant_score.remove(&descendant_key);
        self.by_entry_time.remove(&time_key);
        self.by_ancestor_score.remove(&ancestor_key);

        mutate(entry);

        let (descendant_key, time_key, ancestor_key) = index_keys(*txid, entry);
        self.by_descendant_score.insert(descendant_key);
        self.by_entry_time.insert(time_key);
        self.by_ancestor_score.insert(ancestor_key);

        true
    }

    /// An iterator over all entries, in hash map order.
    pub fn iter(&self) -> impl Iterator<Item = (&transaction::Hash, &MempoolEntry)> {
        self.entries.iter()
    }

    /// Entries by ascending descendant score: the first entry is the best
    /// candidate for eviction.
    pub fn iter_by_descendant_score(
        &self,
    ) -> impl Iterator<Item = (transaction::Hash, &MempoolEntry)> {
        self.by_descendant_score.iter().map(move |key| {
            (
                key.txid,
                self.entries
                    .get(&key.txid)
                    .expect("index keys always match an entry"),
            )
        })
    }

    /// Entries by ascending entry time: the first entry is the oldest.
    pub fn iter_by_entry_time(&self) -> impl Iterator<Item = (transaction::Hash, &MempoolEntry)> {
        self.by_entry_time.iter().map(move |key| {
            (
                key.txid,
                self.entries
                    .get(&key.txid)
                    .expect("index keys always match an entry"),
            )
        })
    }

    /// Entries by descending ancestor score: the first entry is the best
    /// candidate for mining.
    pub fn iter_by_ancestor_score(
        &self,
    ) -> impl Iterator<Item = (transaction::Hash, &MempoolEntry)> {
        self.by_ancestor_score.iter().map(move |key| {
            (
                key.txid,
                self.entries
                    .get(&key.txid)
                    .expect("index keys always match an entry"),
            )
        })
    }

    /// Estimated heap usage of the store's own bookkeeping, excluding the
    /// memory held by the transactions themselves.
    pub fn usage(&self) -> usize {
        memusage::hash_map::<transaction::Hash, MempoolEntry>(self.entries.len())
            + memusage::btree_set::<DescendantScoreKey>(self.by_descendant_score.len())
            + memusage::btree_set::<EntryTimeKey>(self.by_entry_time.len())
            + memusage::btree_set::<AncestorScoreKey>(self.by_ancestor_score.len())
    }

    /// Removes every entry and index key.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.by_descendant_score.clear();
        self.by_entry_time.clear();
        self.by_ancestor_score.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::TimeZone;

    use okapi_chain::{
        block,
        transaction::Transaction,
        transparent::{Output, Script},
    };

    use super::*;
    use crate::entry::LockPoints;

    fn entry_at(fee: i64, seed: i64, seconds: i64) -> (transaction::Hash, MempoolEntry) {
        let tx = Arc::new(Transaction {
            inputs: vec![],
            outputs: vec![Output {
                value: Amount::new(seed),
                lock_script: Script(vec![0; 20]),
            }],
            lock_time: 0,
        });
        let txid = tx.hash();
        let time = Utc.timestamp_opt(1_000_000 + seconds, 0).unwrap();
        let entry = MempoolEntry::new(
            tx,
            Amount::new(fee),
            time,
            block::Height(1),
            false,
            0,
            LockPoints::default(),
        );

        (txid, entry)
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let mut store = IndexedEntries::default();
        let (txid, entry) = entry_at(1_000, 1, 0);

        store.insert(txid, entry.clone()).expect("first insert");
        assert_eq!(
            store.insert(txid, entry),
            Err(MempoolError::DuplicateTxId(txid))
        );
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn descendant_score_orders_worst_first() {
        let mut store = IndexedEntries::default();
        let (low, low_entry) = entry_at(100, 1, 0);
        let (high, high_entry) = entry_at(10_000, 2, 0);

        store.insert(high, high_entry).expect("insert");
        store.insert(low, low_entry).expect("insert");

        let order: Vec<_> = store.iter_by_descendant_score().map(|(id, _)| id).collect();
        assert_eq!(order, vec![low, high]);
    }

    #[test]
    fn descendant_score_ties_break_toward_newer_entries() {
        let mut store = IndexedEntries::default();
        let (older, older_entry) = entry_at(1_000, 1, 0);
        let (newer, newer_entry) = entry_at(1_000, 2, 10);

        store.insert(older, older_entry).expect("insert");
        store.insert(newer, newer_entry).expect("insert");

        let order: Vec<_> = store.iter_by_descendant_score().map(|(id, _)| id).collect();
        assert_eq!(order, vec![newer, older]);
    }

    #[test]
    fn ancestor_score_orders_best_first() {
        let mut store = IndexedEntries::default();
        let (low, low_entry) = entry_at(100, 1, 0);
        let (high, high_entry) = entry_at(10_000, 2, 0);

        store.insert(low, low_entry).expect("insert");
        store.insert(high, high_entry).expect("insert");

        let order: Vec<_> = store.iter_by_ancestor_score().map(|(id, _)| id).collect();
        assert_eq!(order, vec![high, low]);
    }

    #[test]
    fn entry_time_orders_oldest_first() {
        let mut store = IndexedEntries::default();
        let (newer, newer_entry) = entry_at(5_000, 1, 60);
        let (older, older_entry) = entry_at(1_000, 2, 0);

        store.insert(newer, newer_entry).expect("insert");
        store.insert(older, older_entry).expect("insert");

        let order: Vec<_> = store.iter_by_entry_time().map(|(id, _)| id).collect();
        assert_eq!(order, vec![older, newer]);
    }

    #[test]
    fn modify_rekeys_the_ordered_indices() {
        let mut store = IndexedEntries::default();
        let (cheap, cheap_entry) = entry_at(100, 1, 0);
        let (rich, rich_entry) = entry_at(10_000, 2, 0);

        store.insert(cheap, cheap_entry).expect("insert");
        store.insert(rich, rich_entry).expect("insert");

        // Prioritising the cheap entry above the rich one must reorder both
        // feerate indices.
        assert!(store.modify(&cheap, |entry| entry.set_fee_delta(Amount::new(100_000))));

        let eviction: Vec<_> = store.iter_by_descendant_score().map(|(id, _)| id).collect();
        assert_eq!(eviction, vec![rich, cheap]);

        let mining: Vec<_> = store.iter_by_ancestor_score().map(|(id, _)| id).collect();
        assert_eq!(mining, vec![cheap, rich]);
    }

    #[test]
    fn remove_erases_every_index() {
        let mut store = IndexedEntries::default();
        let (txid, entry) = entry_at(1_000, 1, 0);

        store.insert(txid, entry).expect("insert");
        let removed = store.remove(&txid).expect("entry is present");
        assert_eq!(removed.fee(), Amount::new(1_000));

        assert!(store.is_empty());
        assert_eq!(store.iter_by_descendant_score().count(), 0);
        assert_eq!(store.iter_by_entry_time().count(), 0);
        assert_eq!(store.iter_by_ancestor_score().count(), 0);
        assert!(store.remove(&txid).is_none());
    }
}
