//! Errors that can occur when manipulating transactions in the mempool.

use thiserror::Error;

use okapi_chain::transaction;

/// Errors surfaced to mempool callers.
///
/// Package-limit errors carry the limit that was hit, so admission callers
/// can report a useful rejection reason.
#[derive(Error, Clone, Debug, Eq, PartialEq)]
pub enum MempoolError {
    /// A transaction with the same id is already in the mempool.
    #[error("transaction {0} is already in the mempool")]
    DuplicateTxId(transaction::Hash),

    /// The transaction's in-pool ancestor closure is too large.
    #[error("too many unconfirmed ancestors [limit: {limit}]")]
    TooManyAncestors {
        /// The maximum number of in-pool ancestors, including the transaction itself.
        limit: u64,
    },

    /// The combined size of the transaction and its in-pool ancestors is too large.
    #[error("exceeds ancestor size limit [limit: {limit}]")]
    AncestorsTooLarge {
        /// The maximum combined virtual size of the ancestor package.
        limit: u64,
    },

    /// Admitting the transaction would give one of its ancestors too many descendants.
    #[error("too many descendants for transaction {ancestor} [limit: {limit}]")]
    TooManyDescendants {
        /// The ancestor whose descendant package is full.
        ancestor: transaction::Hash,
        /// The maximum number of in-pool descendants, including the ancestor itself.
        limit: u64,
    },

    /// Admitting the transaction would make an ancestor's descendant package too large.
    #[error("exceeds descendant size limit for transaction {ancestor} [limit: {limit}]")]
    DescendantsTooLarge {
        /// The ancestor whose descendant package is full.
        ancestor: transaction::Hash,
        /// The maximum combined virtual size of the descendant package.
        limit: u64,
    },
}
