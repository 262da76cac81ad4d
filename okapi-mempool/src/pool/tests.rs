//! Tests for the mempool.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use okapi_chain::{
    amount::Amount,
    block,
    transaction::{self, Transaction},
    transparent::{Input, OutPoint, Output, Script, Utxo},
};

use crate::{
    config::Config,
    entry::{LockPoints, MempoolEntry},
    pool::Mempool,
};

mod prop;

/// Installs a test tracing subscriber, once.
pub(crate) fn init() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// A fixed base instant, so tests are deterministic.
pub(crate) fn test_time(offset_seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + offset_seconds, 0)
        .single()
        .expect("test timestamps are valid")
}

/// Builds a transaction spending the given outputs of the given parents,
/// with `n_outputs` outputs. `unique` differentiates otherwise identical
/// transactions.
pub(crate) fn transaction(
    spends: &[(&Arc<Transaction>, u32)],
    n_outputs: usize,
    unique: i64,
) -> Arc<Transaction> {
    build_transaction(spends, n_outputs, unique, 0)
}

/// Like [`transaction`], but pads the last output's script so the virtual
/// size lands exactly on `target_vsize`.
pub(crate) fn transaction_with_vsize(
    spends: &[(&Arc<Transaction>, u32)],
    n_outputs: usize,
    unique: i64,
    target_vsize: u64,
) -> Arc<Transaction> {
    let base = build_transaction(spends, n_outputs, unique, 0);
    let base_size = base.virtual_size();
    assert!(
        target_vsize >= base_size,
        "target vsize {target_vsize} is below the minimum {base_size}",
    );

    let tx = build_transaction(spends, n_outputs, unique, (target_vsize - base_size) as usize);
    assert_eq!(tx.virtual_size(), target_vsize);

    tx
}

fn build_transaction(
    spends: &[(&Arc<Transaction>, u32)],
    n_outputs: usize,
    unique: i64,
    padding: usize,
) -> Arc<Transaction> {
    assert!(n_outputs > 0, "transactions need at least one output");

    let inputs = spends
        .iter()
        .map(|(parent, index)| Input {
            outpoint: OutPoint {
                hash: parent.hash(),
                index: *index,
            },
            sequence: u32::MAX,
        })
        .collect();

    let mut outputs: Vec<Output> = (0..n_outputs)
        .map(|index| Output {
            value: Amount::new(10_000 + unique + index as i64),
            lock_script: Script(vec![0; 4]),
        })
        .collect();
    outputs
        .last_mut()
        .expect("at least one output")
        .lock_script
        .0
        .extend(std::iter::repeat(0).take(padding));

    Arc::new(Transaction {
        inputs,
        outputs,
        lock_time: 0,
    })
}

/// Builds [`MempoolEntry`]s field by field, like a mempool admission path
/// would.
#[derive(Clone, Debug)]
pub(crate) struct EntryBuilder {
    fee: Amount,
    time: DateTime<Utc>,
    height: block::Height,
    spends_coinbase: bool,
    sigop_cost: i64,
}

impl Default for EntryBuilder {
    fn default() -> EntryBuilder {
        EntryBuilder {
            fee: Amount::ZERO,
            time: test_time(0),
            height: block::Height(1),
            spends_coinbase: false,
            sigop_cost: 4,
        }
    }
}

impl EntryBuilder {
    pub(crate) fn fee(mut self, zatoshis: i64) -> EntryBuilder {
        self.fee = Amount::new(zatoshis);
        self
    }

    pub(crate) fn time(mut self, time: DateTime<Utc>) -> EntryBuilder {
        self.time = time;
        self
    }

    pub(crate) fn height(mut self, height: u32) -> EntryBuilder {
        self.height = block::Height(height);
        self
    }

    pub(crate) fn spends_coinbase(mut self, spends_coinbase: bool) -> EntryBuilder {
        self.spends_coinbase = spends_coinbase;
        self
    }

    pub(crate) fn sigop_cost(mut self, sigop_cost: i64) -> EntryBuilder {
        self.sigop_cost = sigop_cost;
        self
    }

    pub(crate) fn from_tx(&self, tx: &Arc<Transaction>) -> MempoolEntry {
        MempoolEntry::new(
            tx.clone(),
            self.fee,
            self.time,
            self.height,
            self.spends_coinbase,
            self.sigop_cost,
            LockPoints::default(),
        )
    }
}

/// An empty pool with default policy.
pub(crate) fn pool() -> Mempool {
    Mempool::new(Config::default(), None)
}

/// Adds `tx` with the given fee, panicking if it was already present.
pub(crate) fn add(pool: &Mempool, tx: &Arc<Transaction>, fee: i64) {
    add_at(pool, tx, fee, test_time(0));
}

/// Adds `tx` with the given fee and entry time.
pub(crate) fn add_at(pool: &Mempool, tx: &Arc<Transaction>, fee: i64, time: DateTime<Utc>) {
    let entry = EntryBuilder::default().fee(fee).time(time).from_tx(tx);
    assert!(
        pool.add_unchecked(tx.hash(), entry, None, true),
        "transaction {} was already in the pool",
        tx.hash(),
    );
}

/// A fake confirmed coin, as a chain-backed coin view would return it.
pub(crate) fn fake_coin() -> Utxo {
    Utxo {
        output: Output {
            value: Amount::new(50_000),
            lock_script: Script(vec![0; 4]),
        },
        height: block::Height(1),
        from_coinbase: false,
    }
}

/// A coin view covering every input of the given transactions.
pub(crate) fn coins_for(
    txs: &[&Arc<Transaction>],
) -> std::collections::HashMap<OutPoint, Utxo> {
    txs.iter()
        .flat_map(|tx| tx.spent_outpoints())
        .map(|outpoint| (outpoint, fake_coin()))
        .collect()
}

/// Runs the full invariant walk against an empty coin view.
pub(crate) fn check(pool: &Mempool) {
    check_with(pool, &std::collections::HashMap::new());
}

/// Runs the full invariant walk against `coins`.
pub(crate) fn check_with(
    pool: &Mempool,
    coins: &std::collections::HashMap<OutPoint, Utxo>,
) {
    pool.set_sanity_check(1.0);
    pool.check(coins);
}

/// Convenience accessor asserting the entry is present.
pub(crate) fn entry_of(pool: &Mempool, tx: &Arc<Transaction>) -> MempoolEntry {
    pool.entry(&tx.hash())
        .unwrap_or_else(|| panic!("transaction {} is in the pool", tx.hash()))
}

/// The ids of `txs`, in order.
pub(crate) fn ids(txs: &[&Arc<Transaction>]) -> Vec<transaction::Hash> {
    txs.iter().map(|tx| tx.hash()).collect()
}
