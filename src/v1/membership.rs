use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;

use super::block::Blockchain;
use super::net;
use super::request::{Request, Response};
use super::state::Node;
use super::wallet::{Ring, Wallet, WalletInfo};

/// How many times a joiner refetches the chain from the bootstrap when the
/// one it adopted does not survive validation.
const FIRST_CONTACT_ATTEMPTS: usize = 5;

/// Initial grant the bootstrap sends every peer once the ring is complete.
pub const INITIAL_GRANT: u64 = 100;

/// Register with the bootstrap: send our wallet, get back our id and the
/// current blockchain. The chain is adopted as-is; it can only be validated
/// once the full ring is known.
pub fn first_contact(
    bootstrap_addr: &str,
    info: &WalletInfo,
) -> Result<(usize, Blockchain), Box<dyn Error>> {
    match net::send_req(&Request::RegisterNode(info.clone()), bootstrap_addr)? {
        Response::Registered { id, blockchain } => Ok((id, blockchain)),
        other => Err(format!("bootstrap returned nonsense: {:?}", other).into()),
    }
}

impl Node {
    /// Bootstrap-side registration. Idempotent: a peer registering the same
    /// public key twice gets the same id back. The wallet goes into both
    /// rings. Returns the assigned id, the chain to hand back, and whether
    /// this registration completed the ring.
    pub fn register_node(&self, info: WalletInfo) -> (usize, Blockchain, bool) {
        let mut chain = self.chain.lock().unwrap();
        let mut live = self.live.lock().unwrap();

        let id = match live.ring.id_of(&info.public_key) {
            Some(id) => id,
            None => {
                let id = live.ring.len();
                let wallet = Wallet::from_info(&info);
                live.ring.insert(id, wallet.clone());
                chain.ring.insert(id, wallet);

                println!("Registered node {} at {}", id, info.address);
                id
            }
        };

        (
            id,
            chain.blockchain.clone(),
            live.ring.len() == self.config.nodes,
        )
    }
}

/// Bootstrap: the ring just reached N. Fan the full wallet list out to every
/// joiner, then seed each of them with the initial grant, broadcasting every
/// transaction. Runs on a handler thread with no engine lock held.
pub fn announce_ring(node: &Arc<Node>) {
    let infos: HashMap<usize, WalletInfo> = node.wallet_infos().into_iter().collect();

    let peers = node.peer_addresses();
    let addrs: Vec<String> = peers.iter().map(|(_, addr)| addr.clone()).collect();

    if !net::broadcast(&Request::Wallets(infos), &addrs) {
        println!("Some peers did not receive the wallet list");
    }

    for (id, _) in &peers {
        match node.create_transaction(*id, INITIAL_GRANT) {
            Some(txn) => {
                net::broadcast(&Request::NewTransaction(txn), &addrs);
            }
            None => println!("Failed to create the initial grant for node {}", id),
        }
    }
}

/// Joiner: the bootstrap delivered the complete ring. Rebuild both rings
/// from it, then revalidate the chain we adopted at registration, refetching
/// it from the bootstrap if it does not hold up, and finally drain the
/// backlog of transactions that arrived early.
pub fn receive_wallets(node: &Arc<Node>, wallets: HashMap<usize, WalletInfo>) {
    {
        let mut chain = node.chain.lock().unwrap();
        let mut live = node.live.lock().unwrap();

        let mut ring = Ring::default();
        for (id, info) in &wallets {
            ring.insert(*id, Wallet::from_info(info));
        }

        live.ring = ring.clone();
        chain.ring = ring;
    }

    for _ in 0..FIRST_CONTACT_ATTEMPTS {
        let snapshot = node.blockchain_snapshot();

        if let Some((new_chain, new_ring)) = node.valid_chain(&snapshot) {
            {
                let mut chain = node.chain.lock().unwrap();
                let mut live = node.live.lock().unwrap();

                chain.blockchain = new_chain;
                chain.ring = new_ring.clone();
                live.ring = new_ring;
            }

            node.process_unprocessed();
            println!("Ring complete: {} peers, chain validated", wallets.len());

            return;
        }

        let bootstrap_addr = match &node.config.bootstrap_addr {
            Some(addr) => addr.clone(),
            None => break,
        };

        let info = WalletInfo {
            public_key: node.keypair.public().clone(),
            address: node.address.clone(),
        };

        match first_contact(&bootstrap_addr, &info) {
            Ok((_, blockchain)) => {
                node.chain.lock().unwrap().blockchain = blockchain;
            }
            Err(err) => println!("Failed to refetch chain from bootstrap: {}", err),
        }
    }

    println!("Could not validate the bootstrap chain; staying on the adopted one");
}
