//! noobcash: a small peer-to-peer proof-of-work cryptocurrency.
//!
//! A fixed set of peers replicates a blockchain of bare UTXO transfers. One
//! bootstrap peer mints the genesis supply and assigns ids; after that every
//! peer creates, validates and gossips transactions, mines fixed-capacity
//! blocks, and reconciles forks by longest chain. The protocol lives under
//! [v1]; [crypto] holds the key and hash primitives, [command] and [commands]
//! the interactive CLI.

pub mod command;
pub mod commands;
pub mod crypto;
pub mod v1;
