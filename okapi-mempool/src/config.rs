//! User-configurable mempool policy parameters.

use serde::{Deserialize, Serialize};

use okapi_chain::fee_rate::FeeRate;

/// Limits on the ancestor and descendant packages a transaction may form.
///
/// Applied while computing a transaction's ancestor closure during
/// admission; see [`Mempool::calculate_ancestors`](crate::Mempool::calculate_ancestors).
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct AncestorLimits {
    /// The maximum number of in-pool ancestors, including the transaction itself.
    pub max_ancestor_count: u64,

    /// The maximum combined virtual size of a transaction and its in-pool
    /// ancestors, in virtual bytes.
    pub max_ancestor_size: u64,

    /// The maximum number of in-pool descendants any ancestor may end up
    /// with, including the ancestor itself.
    pub max_descendant_count: u64,

    /// The maximum combined virtual size of any ancestor and its in-pool
    /// descendants, in virtual bytes.
    pub max_descendant_size: u64,
}

impl AncestorLimits {
    /// Limits that never fail: used when the caller has already enforced
    /// policy and only the closure itself is wanted.
    pub const fn unbounded() -> AncestorLimits {
        AncestorLimits {
            max_ancestor_count: u64::MAX,
            max_ancestor_size: u64::MAX,
            max_descendant_count: u64::MAX,
            max_descendant_size: u64::MAX,
        }
    }
}

impl Default for AncestorLimits {
    fn default() -> AncestorLimits {
        AncestorLimits {
            max_ancestor_count: 25,
            max_ancestor_size: 101_000,
            max_descendant_count: 25,
            max_descendant_size: 101_000,
        }
    }
}

/// Mempool configuration section.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Config {
    /// Package limits used by admission callers.
    pub ancestor_limits: AncestorLimits,

    /// The fee rate step between successive occupants of a full mempool.
    ///
    /// Bounds how long it takes the rolling minimum fee rate to decay back
    /// to zero: rates below half this value are treated as zero.
    pub incremental_relay_fee: FeeRate,

    /// The probability, in `0.0..=1.0`, that any given mutation runs the
    /// full O(n) invariant check.
    ///
    /// Expensive; meant for tests and debugging, so it defaults to off.
    pub sanity_check_frequency: f64,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            ancestor_limits: AncestorLimits::default(),
            incremental_relay_fee: FeeRate::from_zat_per_kvb(1_000),
            sanity_check_frequency: 0.0,
        }
    }
}
