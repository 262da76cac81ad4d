//! Randomised property tests for the mempool.
//!
//! Each property builds a random dependency graph of transactions, drives
//! the pool through some operations, and then runs the full invariant walk.

use std::{collections::HashMap, sync::Arc};

use proptest::prelude::*;

use okapi_chain::{
    amount::Amount,
    transaction::Transaction,
    transparent::{OutPoint, Utxo},
};

use super::{pool, test_time, transaction as build_tx, EntryBuilder};
use crate::pool::{Mempool, RemovalReason};

/// Outputs per generated transaction; bounds the fan-out of the graph.
const OUTPUTS: usize = 3;

/// A plan for one transaction: how to pick its parent, its fee, and which
/// operations apply to it later.
type TxPlan = (u8, u8);

fn plan_strategy() -> impl Strategy<Value = Vec<TxPlan>> {
    prop::collection::vec((any::<u8>(), any::<u8>()), 1..20)
}

/// Builds a pool holding one transaction per plan element.
///
/// A transaction either starts a new chain from thin air (coinbase-like) or
/// spends the next free output of an earlier transaction, so arbitrary
/// forests of spend chains come out.
fn build_pool(plan: &[TxPlan]) -> (Mempool, Vec<Arc<Transaction>>) {
    let pool = pool();
    let mut txs: Vec<Arc<Transaction>> = Vec::new();
    let mut next_free_output: Vec<u32> = Vec::new();

    for (i, (selector, fee_step)) in plan.iter().copied().enumerate() {
        let fee = 500 + fee_step as i64 * 25;

        let tx = if i == 0 || selector % 3 == 0 {
            build_tx(&[], OUTPUTS, i as i64)
        } else {
            // Probe for a parent that still has a free output.
            let start = selector as usize % i;
            let parent = (0..i)
                .map(|probe| (start + probe) % i)
                .find(|candidate| next_free_output[*candidate] < OUTPUTS as u32);

            match parent {
                Some(parent) => {
                    let vout = next_free_output[parent];
                    next_free_output[parent] += 1;
                    build_tx(&[(&txs[parent], vout)], OUTPUTS, i as i64)
                }
                None => build_tx(&[], OUTPUTS, i as i64),
            }
        };

        let entry = EntryBuilder::default()
            .fee(fee)
            .time(test_time(i as i64))
            .from_tx(&tx);
        assert!(pool.add_unchecked(tx.hash(), entry, None, true));

        txs.push(tx);
        next_free_output.push(0);
    }

    (pool, txs)
}

fn empty_coins() -> HashMap<OutPoint, Utxo> {
    HashMap::new()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Inserting any spend forest leaves every invariant intact.
    #[test]
    fn arbitrary_spend_forests_uphold_invariants(plan in plan_strategy()) {
        let (pool, txs) = build_pool(&plan);

        prop_assert_eq!(pool.size(), txs.len());
        pool.set_sanity_check(1.0);
        pool.check(&empty_coins());
    }

    /// Recursive removal of arbitrary members keeps the pool consistent and
    /// never leaves the removed transactions behind.
    #[test]
    fn recursive_removals_uphold_invariants(plan in plan_strategy()) {
        let (pool, txs) = build_pool(&plan);

        for (i, tx) in txs.iter().enumerate() {
            if plan[i].1 % 3 == 0 {
                pool.remove_recursive(tx, RemovalReason::Replaced);
                prop_assert!(!pool.exists(&tx.hash()));
            }
        }

        pool.set_sanity_check(1.0);
        pool.check(&empty_coins());
    }

    /// Trimming always gets the pool under budget, and the budget bound
    /// holds afterwards no matter which packages went.
    #[test]
    fn trim_to_size_always_fits_the_budget(plan in plan_strategy()) {
        let (pool, _txs) = build_pool(&plan);

        let budget = pool.dynamic_memory_usage() / 2;
        pool.trim_to_size(budget, None);

        prop_assert!(pool.dynamic_memory_usage() <= budget);
        pool.set_sanity_check(1.0);
        pool.check(&empty_coins());
    }

    /// A prioritisation and its exact inverse cancel out everywhere.
    #[test]
    fn prioritise_round_trips_cancel(plan in plan_strategy()) {
        let (pool, txs) = build_pool(&plan);

        for (i, tx) in txs.iter().enumerate() {
            if plan[i].1 % 2 == 0 {
                let delta = 100 + plan[i].0 as i64;
                pool.prioritise_transaction(tx.hash(), Amount::new(delta));
            }
        }
        pool.set_sanity_check(1.0);
        pool.check(&empty_coins());

        for (i, tx) in txs.iter().enumerate() {
            if plan[i].1 % 2 == 0 {
                let delta = 100 + plan[i].0 as i64;
                pool.prioritise_transaction(tx.hash(), Amount::new(-delta));
            }
        }
        pool.check(&empty_coins());

        for tx in &txs {
            let entry = pool.entry(&tx.hash()).expect("nothing was removed");
            prop_assert_eq!(entry.modified_fee(), entry.fee());
        }
    }

    /// After expiry, no surviving entry is older than the cutoff.
    #[test]
    fn expire_leaves_no_old_entries(plan in plan_strategy()) {
        let (pool, txs) = build_pool(&plan);

        let cutoff = test_time(txs.len() as i64 / 2);
        pool.expire(cutoff);

        for tx in &txs {
            if let Some(entry) = pool.entry(&tx.hash()) {
                prop_assert!(entry.time() >= cutoff);
            }
        }

        pool.set_sanity_check(1.0);
        pool.check(&empty_coins());
    }

    /// The canonical export order always lists parents before children.
    #[test]
    fn query_hashes_orders_ancestors_first(plan in plan_strategy()) {
        let (pool, _txs) = build_pool(&plan);

        let order = pool.query_hashes();
        let mut seen = std::collections::HashSet::new();
        for txid in &order {
            let entry = pool.entry(txid).expect("exported ids are in the pool");
            for input in &entry.transaction().inputs {
                if pool.exists(&input.outpoint.hash) {
                    prop_assert!(
                        seen.contains(&input.outpoint.hash),
                        "parent {} exported after child {}",
                        input.outpoint.hash,
                        txid,
                    );
                }
            }
            seen.insert(*txid);
        }
    }
}
