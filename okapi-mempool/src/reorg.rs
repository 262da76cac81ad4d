//! An ordered buffer of transactions from disconnected blocks.
//!
//! During a reorg it is desirable to put previously confirmed transactions
//! back in the mempool, so that anything not re-confirmed by the new chain
//! can still be mined. Re-admission is expensive, so it waits until the
//! whole reorg has been processed: disconnected transactions are staged
//! here in order, transactions that the new chain confirms are dropped, and
//! the remainder is re-admitted at the end.
//!
//! While staged transactions are being re-admitted the pool's link graph is
//! not yet consistent; callers finish the job with
//! [`Mempool::update_transactions_from_block`](crate::Mempool::update_transactions_from_block).

use std::{
    collections::{HashMap, VecDeque},
    mem,
    sync::Arc,
};

use okapi_chain::transaction::{self, Transaction};

use crate::memusage;

/// Transactions from disconnected blocks, in the order they were staged,
/// with a transaction id index.
#[derive(Default)]
pub struct DisconnectedBlockTransactions {
    // Every staged transaction, by id.
    by_id: HashMap<transaction::Hash, Arc<Transaction>>,
    // The same transactions in insertion order.
    ordered: VecDeque<transaction::Hash>,
    // Heap memory held by the staged transactions.
    cached_inner_usage: usize,
}

impl DisconnectedBlockTransactions {
    /// Creates an empty buffer.
    pub fn new() -> DisconnectedBlockTransactions {
        DisconnectedBlockTransactions::default()
    }

    /// The number of staged transactions.
    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    /// Returns `true` if nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    /// Estimated heap memory held by the buffer and its transactions.
    pub fn dynamic_memory_usage(&self) -> usize {
        memusage::hash_map::<transaction::Hash, Arc<Transaction>>(self.by_id.len())
            + memusage::contiguous::<transaction::Hash>(self.ordered.len())
            + self.cached_inner_usage
    }

    /// Stages `tx`, keeping insertion order.
    ///
    /// Returns `false` if a transaction with the same id is already staged.
    pub fn add(&mut self, tx: Arc<Transaction>) -> bool {
        let txid = tx.hash();

        if self.by_id.contains_key(&txid) {
            return false;
        }

        self.cached_inner_usage += tx.memory_usage() + mem::size_of::<Arc<Transaction>>();
        self.by_id.insert(txid, tx);
        self.ordered.push_back(txid);

        true
    }

    /// Returns the staged transaction with `txid`, if present.
    pub fn get(&self, txid: &transaction::Hash) -> Option<&Arc<Transaction>> {
        self.by_id.get(txid)
    }

    /// The staged transactions, oldest first.
    pub fn transactions(&self) -> impl Iterator<Item = &Arc<Transaction>> {
        self.ordered.iter().map(move |txid| {
            self.by_id
                .get(txid)
                .expect("ordered ids always match a staged transaction")
        })
    }

    /// Drops any staged transaction that appears in `vtx`, which the newly
    /// connected block has just confirmed.
    pub fn remove_for_block(&mut self, vtx: &[Arc<Transaction>]) {
        // Short-circuit in the common case of a block extending the tip.
        if self.ordered.is_empty() {
            return;
        }

        for tx in vtx {
            let txid = tx.hash();
            if let Some(removed) = self.by_id.remove(&txid) {
                self.cached_inner_usage -=
                    removed.memory_usage() + mem::size_of::<Arc<Transaction>>();
                self.ordered.retain(|staged| *staged != txid);
            }
        }
    }

    /// Removes and returns the oldest staged transaction.
    ///
    /// Used to shed the oldest (deepest) transactions when the buffer
    /// overflows its memory budget during a long reorg.
    pub fn remove_front(&mut self) -> Option<Arc<Transaction>> {
        let txid = self.ordered.pop_front()?;
        let tx = self
            .by_id
            .remove(&txid)
            .expect("ordered ids always match a staged transaction");

        self.cached_inner_usage -= tx.memory_usage() + mem::size_of::<Arc<Transaction>>();

        Some(tx)
    }

    /// Drops everything.
    pub fn clear(&mut self) {
        self.by_id.clear();
        self.ordered.clear();
        self.cached_inner_usage = 0;
    }
}

impl Drop for DisconnectedBlockTransactions {
    fn drop(&mut self) {
        // Reorg processing must drain this buffer back into the mempool; a
        // non-empty buffer here means transactions were silently lost.
        if !std::thread::panicking() {
            assert!(
                self.is_empty(),
                "disconnected block transactions must be drained before drop"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use okapi_chain::{
        amount::Amount,
        transparent::{Output, Script},
    };

    use super::*;

    fn tx(seed: i64) -> Arc<Transaction> {
        Arc::new(Transaction {
            inputs: vec![],
            outputs: vec![Output {
                value: Amount::new(seed),
                lock_script: Script(vec![0; 10]),
            }],
            lock_time: 0,
        })
    }

    #[test]
    fn preserves_insertion_order_and_rejects_duplicates() {
        let mut buffer = DisconnectedBlockTransactions::new();
        let (a, b) = (tx(1), tx(2));

        assert!(buffer.add(a.clone()));
        assert!(buffer.add(b.clone()));
        assert!(!buffer.add(a.clone()), "duplicate ids are rejected");

        let order: Vec<_> = buffer.transactions().map(|tx| tx.hash()).collect();
        assert_eq!(order, vec![a.hash(), b.hash()]);

        buffer.clear();
    }

    #[test]
    fn remove_for_block_drops_confirmed_transactions() {
        let mut buffer = DisconnectedBlockTransactions::new();
        let (a, b, c) = (tx(1), tx(2), tx(3));

        buffer.add(a.clone());
        buffer.add(b.clone());
        buffer.add(c.clone());

        buffer.remove_for_block(&[b.clone()]);

        assert_eq!(buffer.len(), 2);
        assert!(buffer.get(&a.hash()).is_some());
        assert!(buffer.get(&b.hash()).is_none());
        assert!(buffer.get(&c.hash()).is_some());

        buffer.clear();
    }

    #[test]
    fn memory_usage_tracks_additions_and_removals() {
        let mut buffer = DisconnectedBlockTransactions::new();
        assert_eq!(buffer.dynamic_memory_usage(), 0);

        buffer.add(tx(1));
        buffer.add(tx(2));
        let full = buffer.dynamic_memory_usage();
        assert!(full > 0);

        buffer.remove_front().expect("buffer has transactions");
        assert!(buffer.dynamic_memory_usage() < full);

        buffer.clear();
        assert_eq!(buffer.dynamic_memory_usage(), 0);
    }

    #[test]
    fn remove_front_returns_the_oldest() {
        let mut buffer = DisconnectedBlockTransactions::new();
        let (a, b) = (tx(1), tx(2));

        buffer.add(a.clone());
        buffer.add(b.clone());

        let front = buffer.remove_front().expect("buffer has transactions");
        assert_eq!(front.hash(), a.hash());

        buffer.clear();
    }
}
