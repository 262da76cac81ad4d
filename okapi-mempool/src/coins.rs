//! Coin lookup interfaces, and the view overlay that makes unconfirmed
//! outputs spendable.

use std::collections::HashMap;

use okapi_chain::{
    block,
    transparent::{OutPoint, Utxo},
};

use crate::Mempool;

/// Fake height value reported for coins created by in-pool transactions.
pub const MEMPOOL_HEIGHT: block::Height = block::Height(0x7FFF_FFFF);

/// The number of blocks a coinbase output must wait before it can be spent.
pub const COINBASE_MATURITY: u32 = 100;

/// Read access to a set of unspent transaction outputs.
///
/// # Correctness
///
/// The mempool calls coin views while holding its internal lock, so
/// implementations must not call back into the mempool.
pub trait CoinView {
    /// Returns the unspent output at `outpoint`, if any.
    fn get_coin(&self, outpoint: &OutPoint) -> Option<Utxo>;
}

/// A plain map of coins, usable as a chain tip stand-in.
impl CoinView for HashMap<OutPoint, Utxo> {
    fn get_coin(&self, outpoint: &OutPoint) -> Option<Utxo> {
        self.get(outpoint).cloned()
    }
}

/// A coin view that brings the outputs of in-pool transactions into view, at
/// the sentinel height [`MEMPOOL_HEIGHT`].
///
/// This view does not hide outputs that in-pool transactions spend: callers
/// that need double-spend detection check the pool's spend map directly.
///
/// # Correctness
///
/// Each lookup takes the pool's lock, so this view must not be passed back
/// into methods of the same pool, like [`Mempool::check`].
pub struct MempoolCoinView<'a, V> {
    base: &'a V,
    mempool: &'a Mempool,
}

impl<'a, V: CoinView> MempoolCoinView<'a, V> {
    /// Creates a view of `mempool`'s outputs layered over `base`.
    pub fn new(base: &'a V, mempool: &'a Mempool) -> Self {
        MempoolCoinView { base, mempool }
    }
}

impl<V: CoinView> CoinView for MempoolCoinView<'_, V> {
    fn get_coin(&self, outpoint: &OutPoint) -> Option<Utxo> {
        if let Some(tx) = self.mempool.get(&outpoint.hash) {
            // An in-pool transaction shadows the base view for all of its
            // output indexes, including out-of-range ones.
            return tx.outputs.get(outpoint.index as usize).map(|output| Utxo {
                output: output.clone(),
                height: MEMPOOL_HEIGHT,
                from_coinbase: false,
            });
        }

        self.base.get_coin(outpoint)
    }
}
