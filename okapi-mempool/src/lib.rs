//! An indexed, policy-aware pool of unconfirmed transactions.
//!
//! The [`Mempool`] caches transactions that are valid on the current best
//! chain, feeds block construction through its feerate orderings, and keeps
//! a consistent multi-indexed view of the dependency graph between
//! unconfirmed transactions under concurrent access.
//!
//! The surrounding daemon is expected to do all validation before calling
//! [`Mempool::add_unchecked`]: the pool checks nothing about transaction
//! semantics. Chain state is reached through the narrow [`CoinView`] and
//! [`FeeEstimator`] collaborator interfaces only.

pub mod coins;
pub mod config;
pub mod entry;
pub mod error;
pub mod estimator;
pub mod pool;
pub mod reorg;

mod memusage;
mod store;

pub use coins::{CoinView, MempoolCoinView, COINBASE_MATURITY, MEMPOOL_HEIGHT};
pub use config::{AncestorLimits, Config};
pub use entry::{LockPoints, MempoolEntry, MempoolTxInfo};
pub use error::MempoolError;
pub use estimator::FeeEstimator;
pub use pool::{Mempool, RemovalReason, ROLLING_FEE_HALFLIFE};
pub use reorg::DisconnectedBlockTransactions;
