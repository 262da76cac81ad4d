//! Fee estimation hooks.
//!
//! The mempool does no fee estimation arithmetic itself; it reports
//! admissions and confirmations to an estimator supplied at construction.

use okapi_chain::block;

use crate::entry::MempoolEntry;

/// An observer of transaction admissions and confirmations, for fee
/// estimation.
///
/// # Correctness
///
/// Both hooks are called while the mempool lock is held, so implementations
/// must be fast and must not call back into the mempool.
pub trait FeeEstimator: Send {
    /// Called when `entry` is admitted to the pool.
    ///
    /// `valid_fee_estimate` is `false` when the admission path cannot vouch
    /// for the fee, for example when re-admitting transactions during a
    /// reorg.
    fn process_transaction(&mut self, entry: &MempoolEntry, valid_fee_estimate: bool);

    /// Called when a block at `height` confirms `entries`, which were in the
    /// pool until just now.
    fn process_block(&mut self, height: block::Height, entries: &[MempoolEntry]);
}
