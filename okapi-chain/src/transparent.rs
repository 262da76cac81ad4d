//! Transparent transaction inputs and outputs.

use crate::{amount::Amount, block, transaction};

#[cfg(any(test, feature = "proptest-impl"))]
use proptest_derive::Arbitrary;

/// A reference to a specific output of a specific transaction.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[cfg_attr(any(test, feature = "proptest-impl"), derive(Arbitrary))]
pub struct OutPoint {
    /// References the transaction that contains the output being spent.
    pub hash: transaction::Hash,

    /// Identifies which output of that transaction is referenced; the
    /// first output is 0, etc.
    pub index: u32,
}

impl OutPoint {
    /// Returns a new [`OutPoint`] for the output at `index` in the
    /// transaction with `hash`.
    pub fn from_usize(hash: transaction::Hash, index: usize) -> OutPoint {
        OutPoint {
            hash,
            index: index
                .try_into()
                .expect("output indexes are much less than u32::MAX"),
        }
    }
}

/// An encoded script, treated as opaque bytes.
///
/// Script evaluation happens in the validation layer; the mempool only needs
/// scripts for size and memory accounting.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[cfg_attr(any(test, feature = "proptest-impl"), derive(Arbitrary))]
pub struct Script(pub Vec<u8>);

impl Script {
    /// Returns the length of the encoded script in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the script is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A transparent input spending an output of a previous transaction.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[cfg_attr(any(test, feature = "proptest-impl"), derive(Arbitrary))]
pub struct Input {
    /// The previous output being spent.
    pub outpoint: OutPoint,

    /// The sequence number of this input, used by relative lock times.
    pub sequence: u32,
}

/// A transparent output of a transaction.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[cfg_attr(any(test, feature = "proptest-impl"), derive(Arbitrary))]
pub struct Output {
    /// The value of this output, in zatoshis.
    pub value: Amount,

    /// The script that must be satisfied to spend this output.
    pub lock_script: Script,
}

/// An unspent output, with the chain context coin views report about it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Utxo {
    /// The unspent output itself.
    pub output: Output,

    /// The height of the block that created this output.
    pub height: block::Height,

    /// Whether the output was created by a coinbase transaction.
    pub from_coinbase: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outpoints_order_by_hash_then_index() {
        let lower = transaction::Hash([1; 32]);
        let higher = transaction::Hash([2; 32]);

        let a = OutPoint { hash: lower, index: 9 };
        let b = OutPoint { hash: higher, index: 0 };
        let c = OutPoint { hash: higher, index: 1 };

        assert!(a < b);
        assert!(b < c);
    }
}
