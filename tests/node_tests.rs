//! End-to-end exercises of the state engine, run as a network of in-process
//! nodes. Gossip is simulated by handing transactions and blocks to every
//! peer directly; the real TCP layer only comes into play for the background
//! miner's broadcast, which fails harmlessly against unbound test ports.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};

use noobcash_core::crypto::Keypair;
use noobcash_core::v1::block::Block;
use noobcash_core::v1::config::Config;
use noobcash_core::v1::membership::receive_wallets;
use noobcash_core::v1::state::{BlockOutcome, Node};
use noobcash_core::v1::transaction::{Transaction, TransactionOutput};
use noobcash_core::v1::wallet::{Wallet, WalletInfo};

const DIFFICULTY: u32 = 1;
const NODES: usize = 3;

fn config(port: u16, capacity: usize, bootstrap: bool) -> Config {
    let bootstrap_addr = if bootstrap {
        None
    } else {
        Some(format!("127.0.0.1:{}", port - (port % 10)))
    };

    Config::new(port, capacity, DIFFICULTY, NODES, bootstrap, bootstrap_addr).unwrap()
}

/// A 3-peer network after registration and wallet fan-out: everyone knows
/// everyone, the bootstrap holds the whole 300-coin supply.
fn three_nodes(base_port: u16, capacity: usize) -> Vec<Arc<Node>> {
    let keys = Keypair::generate().unwrap();
    let address = format!("127.0.0.1:{}", base_port);
    let bootstrap = Arc::new(Node::new_bootstrap(
        keys,
        address,
        config(base_port, capacity, true),
    ));

    let mut nodes = vec![bootstrap.clone()];

    for i in 1..NODES {
        let keys = Keypair::generate().unwrap();
        let port = base_port + i as u16;
        let address = format!("127.0.0.1:{}", port);
        let info = WalletInfo {
            public_key: keys.public().clone(),
            address: address.clone(),
        };

        let (id, blockchain, _) = bootstrap.register_node(info);
        assert_eq!(id, i);

        nodes.push(Arc::new(Node::new_peer(
            keys,
            address,
            config(port, capacity, false),
            id,
            blockchain,
        )));
    }

    let infos: HashMap<usize, WalletInfo> = bootstrap.wallet_infos().into_iter().collect();
    for node in &nodes[1..] {
        receive_wallets(node, infos.clone());
    }

    nodes
}

fn gossip_transaction(nodes: &[Arc<Node>], from: usize, txn: &Transaction) {
    for (i, node) in nodes.iter().enumerate() {
        if i != from {
            node.receive_transaction(txn.clone());
        }
    }
}

fn gossip_block(nodes: &[Arc<Node>], from: usize, block: &Block) -> Vec<BlockOutcome> {
    nodes
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != from)
        .map(|(_, node)| node.receive_block(block.clone()))
        .collect()
}

/// Mine the given transactions on top of `node`'s chain and deliver the
/// result as that node's own mined block.
fn mine_on(node: &Arc<Node>, transactions: Vec<Transaction>) -> Block {
    let mut block = Block::next(&node.blockchain_snapshot());
    block.add_transactions(transactions);
    assert!(block.mine(DIFFICULTY, &AtomicBool::new(false)));
    assert!(node.handle_mined_block(block.clone()));

    block
}

fn live_balances(node: &Arc<Node>) -> Vec<u64> {
    node.balances().values().copied().collect()
}

fn settled(node: &Arc<Node>) -> Vec<u64> {
    node.settled_balances().values().copied().collect()
}

/// Seed every peer with 100 through two mined grant transactions, leaving
/// balances at [100, 100, 100] everywhere.
fn seed_grants(nodes: &[Arc<Node>]) -> Block {
    let t1 = nodes[0].create_transaction(1, 100).unwrap();
    gossip_transaction(nodes, 0, &t1);
    let t2 = nodes[0].create_transaction(2, 100).unwrap();
    gossip_transaction(nodes, 0, &t2);

    let block = mine_on(&nodes[0], vec![t1, t2]);
    let outcomes = gossip_block(nodes, 0, &block);
    assert!(outcomes.iter().all(|o| *o == BlockOutcome::Accepted));

    block
}

#[test]
fn genesis_state() {
    let nodes = three_nodes(7100, 10);

    for node in &nodes {
        assert_eq!(node.chain_length(), 1);
        assert_eq!(live_balances(node), vec![300, 0, 0]);
        assert_eq!(settled(node), vec![300, 0, 0]);
    }

    let genesis = nodes[0].last_block_transactions();
    assert_eq!(genesis.len(), 1);
    assert_eq!(genesis[0].transaction_outputs[0].amount, 300);
}

#[test]
fn registration_is_idempotent() {
    let nodes = three_nodes(7110, 10);

    let info = WalletInfo {
        public_key: nodes[1].keypair.public().clone(),
        address: nodes[1].address.clone(),
    };

    let (id_a, _, _) = nodes[0].register_node(info.clone());
    let (id_b, _, _) = nodes[0].register_node(info);
    assert_eq!(id_a, 1);
    assert_eq!(id_b, 1);
    assert_eq!(nodes[0].balances().len(), NODES);
}

#[test]
fn grants_settle_everywhere() {
    let nodes = three_nodes(7120, 10);
    let block = seed_grants(&nodes);

    for node in &nodes {
        assert_eq!(node.chain_length(), 2);
        assert_eq!(live_balances(node), vec![100, 100, 100]);
        assert_eq!(settled(node), vec![100, 100, 100]);
        assert_eq!(node.mempool_sizes(), (0, 0));
        // supply is conserved
        assert_eq!(node.settled_balances().values().sum::<u64>(), 300);
    }

    // a second delivery of the same block is a no-op
    let outcomes = gossip_block(&nodes, 0, &block);
    assert!(outcomes.iter().all(|o| *o == BlockOutcome::Stale));
    for node in &nodes {
        assert_eq!(node.chain_length(), 2);
    }
}

#[test]
fn settled_ring_matches_chain_replay() {
    let nodes = three_nodes(7130, 10);
    seed_grants(&nodes);

    for node in &nodes {
        let (_, replayed) = node.valid_chain(&node.blockchain_snapshot()).unwrap();
        assert_eq!(replayed.balances(), node.settled_balances());
    }
}

#[test]
fn capacity_threshold_starts_the_miner() {
    // capacity 2: the second grant fills the queue and the background miner
    // takes it from there
    let nodes = three_nodes(7140, 2);

    nodes[0].create_transaction(1, 100).unwrap();
    nodes[0].create_transaction(2, 100).unwrap();

    let deadline = Instant::now() + Duration::from_secs(60);
    while nodes[0].chain_length() < 2 {
        assert!(Instant::now() < deadline, "miner never produced a block");
        std::thread::sleep(Duration::from_millis(50));
    }

    assert_eq!(settled(&nodes[0]), vec![100, 100, 100]);
    assert_eq!(nodes[0].mempool_sizes(), (0, 0));
}

#[test]
fn double_spend_is_rejected_by_every_peer() {
    let nodes = three_nodes(7150, 10);
    seed_grants(&nodes);

    // node 1 spends its single 100-coin output
    let t_a = nodes[1].create_transaction(2, 60).unwrap();

    // a second, well-formed transaction over the same output, as a malicious
    // wallet that never recorded the first spend would build it
    let grant_id = t_a.transaction_inputs[0].clone();
    let mut shadow_wallet = Wallet::new(
        nodes[1].keypair.public().clone(),
        nodes[1].address.clone(),
    );
    shadow_wallet.add_utxo(TransactionOutput {
        transaction_id: grant_id,
        receiver_pubk: nodes[1].keypair.public().clone(),
        amount: 100,
    });
    let t_b = Transaction::new(
        nodes[2].keypair.public().clone(),
        60,
        &nodes[1].keypair,
        &mut shadow_wallet,
    )
    .unwrap();

    for node in &[&nodes[0], &nodes[2]] {
        assert!(node.receive_transaction(t_a.clone()));
        // the second spend of the same inputs loses
        assert!(!node.receive_transaction(t_b.clone()));

        assert_eq!(live_balances(node), vec![100, 40, 160]);
        assert_eq!(node.mempool_sizes(), (1, 0));
    }
}

#[test]
fn local_overdraft_returns_none() {
    let nodes = three_nodes(7160, 10);
    seed_grants(&nodes);

    assert!(nodes[1].create_transaction(2, 101).is_none());
    assert!(nodes[1].create_transaction(9, 10).is_none());
    assert_eq!(live_balances(&nodes[1]), vec![100, 100, 100]);
}

#[test]
fn bogus_transaction_changes_nothing() {
    let nodes = three_nodes(7170, 10);
    seed_grants(&nodes);

    let bogus = nodes[1].bogus_transaction(2, 1000).unwrap();
    assert!(nodes[1].keypair.public().verify(&bogus.digest(), &bogus.signature));

    // the forger itself is untouched
    assert_eq!(live_balances(&nodes[1]), vec![100, 100, 100]);

    // every peer rejects it: the inputs do not cover the claimed amount
    for node in &[&nodes[0], &nodes[2]] {
        assert!(!node.receive_transaction(bogus.clone()));
        assert_eq!(live_balances(node), vec![100, 100, 100]);
        assert_eq!(node.mempool_sizes(), (0, 0));
    }
}

#[test]
fn unseen_block_transactions_are_settled_not_queued() {
    let nodes = three_nodes(7180, 10);
    seed_grants(&nodes);

    // the bootstrap mines a transfer node 1 never heard about
    let t_d = nodes[0].create_transaction(1, 50).unwrap();
    let block = mine_on(&nodes[0], vec![t_d]);

    assert_eq!(nodes[1].receive_block(block.clone()), BlockOutcome::Accepted);
    assert_eq!(live_balances(&nodes[1]), vec![50, 150, 100]);
    assert_eq!(settled(&nodes[1]), vec![50, 150, 100]);
    // settled on arrival, never queued for a future block
    assert_eq!(nodes[1].mempool_sizes(), (0, 0));
}

#[test]
fn fork_switch_requeues_displaced_transactions() {
    let nodes = three_nodes(7190, 10);
    seed_grants(&nodes);

    // node 2 queues a transfer of its own
    let t_e = nodes[2].create_transaction(1, 20).unwrap();
    assert_eq!(nodes[2].mempool_sizes(), (1, 0));

    // meanwhile the rest of the network settles a block node 2 never saw
    let t_d = nodes[0].create_transaction(1, 50).unwrap();
    mine_on(&nodes[0], vec![t_d]);
    let foreign = nodes[0].blockchain_snapshot();

    let (new_chain, new_ring) = nodes[2].valid_chain(&foreign).unwrap();
    nodes[2].accept_foreign_blockchain(new_chain, new_ring);

    assert_eq!(nodes[2].chain_length(), 3);
    assert_eq!(settled(&nodes[2]), vec![50, 150, 100]);

    // the displaced transfer went back through revalidation and waits for
    // the next block again
    assert_eq!(nodes[2].mempool_sizes(), (1, 0));
    assert_eq!(live_balances(&nodes[2]), vec![50, 170, 80]);
    assert_eq!(nodes[2].balances().values().sum::<u64>(), 300);
    let _ = t_e;
}

#[test]
fn transactions_before_ring_completion_wait_in_the_backlog() {
    let base_port = 7200;
    let keys = Keypair::generate().unwrap();
    let bootstrap = Arc::new(Node::new_bootstrap(
        keys,
        format!("127.0.0.1:{}", base_port),
        config(base_port, 10, true),
    ));

    let joiner_keys = Keypair::generate().unwrap();
    let address = format!("127.0.0.1:{}", base_port + 1);
    let info = WalletInfo {
        public_key: joiner_keys.public().clone(),
        address: address.clone(),
    };
    let (id, blockchain, _) = bootstrap.register_node(info);
    let joiner = Arc::new(Node::new_peer(
        joiner_keys,
        address,
        config(base_port + 1, 10, false),
        id,
        blockchain,
    ));

    // third peer registers too so the ring can complete
    let other_keys = Keypair::generate().unwrap();
    let other_info = WalletInfo {
        public_key: other_keys.public().clone(),
        address: format!("127.0.0.1:{}", base_port + 2),
    };
    let (_, _, ring_complete) = bootstrap.register_node(other_info);
    assert!(ring_complete);

    // a grant arrives before the joiner knows the ring: it must wait
    let grant = bootstrap.create_transaction(id, 100).unwrap();
    assert!(!joiner.receive_transaction(grant.clone()));
    assert_eq!(joiner.mempool_sizes(), (0, 1));

    // the fan-out arrives; the backlog is replayed against the full ring
    let infos: HashMap<usize, WalletInfo> = bootstrap.wallet_infos().into_iter().collect();
    receive_wallets(&joiner, infos);

    assert_eq!(joiner.mempool_sizes(), (1, 0));
    assert_eq!(joiner.balances()[&id], 100);
    assert_eq!(joiner.balances().values().sum::<u64>(), 300);
}
