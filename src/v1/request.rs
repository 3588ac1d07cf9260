use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::block::{Block, Blockchain};
use super::transaction::Transaction;
use super::wallet::WalletInfo;

/// One inbound event, as decoded off a peer connection. Each variant maps to
/// one engine operation; the transport is a thin envelope around the JSON
/// body schemas.
#[derive(Serialize, Deserialize, Debug)]
pub enum Request {
    /// A joiner introduces itself to the bootstrap and asks for an id.
    RegisterNode(WalletInfo),
    /// The bootstrap fans out the complete ring once everyone registered.
    Wallets(HashMap<usize, WalletInfo>),
    /// A peer gossips a freshly created transaction.
    NewTransaction(Transaction),
    /// A peer gossips a block it mined.
    NewBlock(Block),
    /// Loopback delivery of our own miner's block.
    MinedBlock(Block),
    GetLength,
    GetBlockchain,
    GetRing,
    GetId,
    GetBalance,
    GetBalances,
    GetView,
    GetViewBlockchain,
    /// Ask this node to create and broadcast a transfer.
    Purchase { receiver_id: usize, amount: u64 },
    /// Ask this node to fabricate and broadcast an overdraft, for
    /// demonstrating that peers reject it.
    BlackHatPurchase { receiver_id: usize, amount: u64 },
}

#[derive(Serialize, Deserialize, Debug)]
pub enum Response {
    Ack,
    Registered { id: usize, blockchain: Blockchain },
    Length(usize),
    Chain(Blockchain),
    Ring(Vec<super::wallet::PeerView>),
    Id(usize),
    Balance(u64),
    Balances(std::collections::BTreeMap<usize, u64>),
    View(Vec<Transaction>),
    Accepted(bool),
}
