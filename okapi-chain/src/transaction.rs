//! Transactions and transaction identifiers.

use std::{fmt, mem};

use byteorder::{LittleEndian, WriteBytesExt};
use sha2::{Digest, Sha256};

use crate::transparent;

#[cfg(any(test, feature = "proptest-impl"))]
use proptest_derive::Arbitrary;

/// A transaction id: the double-SHA256 hash of the serialized transaction.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[cfg_attr(any(test, feature = "proptest-impl"), derive(Arbitrary))]
pub struct Hash(pub [u8; 32]);

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut reversed_bytes = self.0;
        reversed_bytes.reverse();
        f.write_str(&hex::encode(reversed_bytes))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("transaction::Hash")
            .field(&self.to_string())
            .finish()
    }
}

impl From<[u8; 32]> for Hash {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl From<&Transaction> for Hash {
    fn from(transaction: &Transaction) -> Self {
        transaction.hash()
    }
}

/// A transaction: a list of transparent inputs spending previous outputs, and
/// a list of newly created outputs.
///
/// Scripts and signatures are carried as opaque bytes; checking them is the
/// validation layer's problem.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Transaction {
    /// The transparent inputs spent by this transaction.
    ///
    /// Coinbase transactions have no inputs.
    pub inputs: Vec<transparent::Input>,

    /// The outputs created by this transaction.
    pub outputs: Vec<transparent::Output>,

    /// The earliest time or block height this transaction can be mined.
    pub lock_time: u32,
}

impl Transaction {
    /// Computes the id of this transaction.
    pub fn hash(&self) -> Hash {
        let digest = Sha256::digest(Sha256::digest(self.to_bytes()));

        Hash(digest.into())
    }

    /// Returns `true` if this transaction creates new coins rather than
    /// spending existing ones.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Returns an iterator over the outpoints spent by this transaction.
    pub fn spent_outpoints(&self) -> impl Iterator<Item = transparent::OutPoint> + '_ {
        self.inputs.iter().map(|input| input.outpoint)
    }

    /// The size of this transaction in serialized bytes.
    pub fn serialized_size(&self) -> usize {
        // version + input count + inputs + output count + outputs + lock time
        4 + 4
            + self.inputs.len() * (32 + 4 + 4)
            + 4
            + self
                .outputs
                .iter()
                .map(|output| 8 + 4 + output.lock_script.len())
                .sum::<usize>()
            + 4
    }

    /// The weight of this transaction, as used for fee accounting.
    ///
    /// There is no witness data to discount in this transaction format, so
    /// the weight is exactly four times the serialized size.
    pub fn weight(&self) -> u64 {
        4 * self.serialized_size() as u64
    }

    /// The virtual size of this transaction: its weight scaled back down to
    /// bytes, rounding up.
    pub fn virtual_size(&self) -> u64 {
        (self.weight() + 3) / 4
    }

    /// An estimate of the heap memory held by this transaction.
    pub fn memory_usage(&self) -> usize {
        mem::size_of::<Transaction>()
            + self.inputs.len() * mem::size_of::<transparent::Input>()
            + self
                .outputs
                .iter()
                .map(|output| mem::size_of::<transparent::Output>() + output.lock_script.len())
                .sum::<usize>()
    }

    /// Serializes this transaction into bytes, for hashing.
    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.serialized_size());

        // Writes to a `Vec` cannot fail.
        bytes.write_u32::<LittleEndian>(1).expect("vec write");
        bytes
            .write_u32::<LittleEndian>(self.inputs.len() as u32)
            .expect("vec write");
        for input in &self.inputs {
            bytes.extend_from_slice(&input.outpoint.hash.0);
            bytes
                .write_u32::<LittleEndian>(input.outpoint.index)
                .expect("vec write");
            bytes
                .write_u32::<LittleEndian>(input.sequence)
                .expect("vec write");
        }
        bytes
            .write_u32::<LittleEndian>(self.outputs.len() as u32)
            .expect("vec write");
        for output in &self.outputs {
            bytes
                .write_i64::<LittleEndian>(output.value.zatoshis())
                .expect("vec write");
            bytes
                .write_u32::<LittleEndian>(output.lock_script.len() as u32)
                .expect("vec write");
            bytes.extend_from_slice(&output.lock_script.0);
        }
        bytes
            .write_u32::<LittleEndian>(self.lock_time)
            .expect("vec write");

        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::Amount;

    fn output(value: i64, script_len: usize) -> transparent::Output {
        transparent::Output {
            value: Amount::new(value),
            lock_script: transparent::Script(vec![0; script_len]),
        }
    }

    fn spend(hash: Hash, index: u32) -> transparent::Input {
        transparent::Input {
            outpoint: transparent::OutPoint { hash, index },
            sequence: u32::MAX,
        }
    }

    #[test]
    fn hash_is_deterministic_and_distinct() {
        let base = Transaction {
            inputs: vec![],
            outputs: vec![output(50, 4)],
            lock_time: 0,
        };
        let modified = Transaction {
            outputs: vec![output(51, 4)],
            ..base.clone()
        };

        assert_eq!(base.hash(), base.clone().hash());
        assert_ne!(base.hash(), modified.hash());
    }

    #[test]
    fn serialized_size_counts_every_field() {
        let tx = Transaction {
            inputs: vec![spend(Hash([7; 32]), 0)],
            outputs: vec![output(10, 25)],
            lock_time: 0,
        };

        // 4 version + 4 input count + 40 input + 4 output count
        // + 12 output header + 25 script + 4 lock time
        assert_eq!(tx.serialized_size(), 93);
        assert_eq!(tx.weight(), 4 * 93);
        assert_eq!(tx.virtual_size(), 93);
        assert_eq!(tx.to_bytes().len(), tx.serialized_size());
    }

    #[test]
    fn coinbase_has_no_spent_outpoints() {
        let coinbase = Transaction {
            inputs: vec![],
            outputs: vec![output(50, 4)],
            lock_time: 0,
        };

        assert!(coinbase.is_coinbase());
        assert_eq!(coinbase.spent_outpoints().count(), 0);
    }
}
