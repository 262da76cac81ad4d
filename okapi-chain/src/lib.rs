//! Core chain data structures for the okapi mempool.
//!
//! This crate provides the minimal set of datastructures an unconfirmed
//! transaction pool needs to reason about: transactions and their ids,
//! transparent inputs and outputs, amounts, fee rates, and block positions.
//!
//! Transaction semantics beyond structure (scripts, signatures, consensus
//! rules) are deliberately absent; they belong to the validation layer.

#[macro_use]
extern crate serde;

pub mod amount;
pub mod block;
pub mod fee_rate;
pub mod transaction;
pub mod transparent;
