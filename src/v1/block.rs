use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use num_traits::One;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::crypto::{sha1_hex, HexDigest};

use super::transaction::Transaction;

/// Bit width of the hash; difficulty is the number of leading zero bits a
/// block hash must have, so the proof-of-work target is `2^(160 - difficulty)`.
pub const HASH_BITS: u32 = 160;

/// Seed values of block 0. They do not satisfy the proof-of-work inequality;
/// chain validation skips block 0 on purpose.
pub const GENESIS_PREVIOUS_HASH: &str = "1";
pub const GENESIS_HASH: &str = "0";

/// A fixed-capacity batch of transactions. The hash covers index, previous
/// hash, nonce and the transactions; the timestamp is informational only.
#[derive(Clone, Serialize, Deserialize)]
pub struct Block {
    pub index: usize,
    pub previous_hash: HexDigest,
    pub nonce: u32,
    pub list_of_transactions: Vec<Transaction>,
    pub hash: HexDigest,
    pub timestamp: DateTime<Utc>,
}

/// The exact byte form that is hashed: compact JSON with this field order,
/// transactions in wire form.
#[derive(Serialize)]
struct BlockMessage<'a> {
    index: usize,
    previous_hash: &'a str,
    nonce: u32,
    list_of_transactions: &'a [Transaction],
}

impl Block {
    pub fn genesis(genesis_transaction: Transaction) -> Block {
        Block {
            index: 0,
            previous_hash: GENESIS_PREVIOUS_HASH.into(),
            nonce: 0,
            list_of_transactions: vec![genesis_transaction],
            hash: GENESIS_HASH.into(),
            timestamp: Utc::now(),
        }
    }

    /// An empty candidate block extending the current chain head.
    pub fn next(blockchain: &Blockchain) -> Block {
        Block {
            index: blockchain.len(),
            previous_hash: blockchain.get_block_hash(-1).clone(),
            nonce: 0,
            list_of_transactions: vec![],
            hash: HexDigest::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn message(&self) -> String {
        serde_json::to_string(&BlockMessage {
            index: self.index,
            previous_hash: &self.previous_hash,
            nonce: self.nonce,
            list_of_transactions: &self.list_of_transactions,
        })
        .expect("failed to serialize block message")
    }

    pub fn compute_hash(&self) -> HexDigest {
        sha1_hex(self.message().as_bytes())
    }

    pub fn add_transactions(&mut self, transactions: Vec<Transaction>) -> usize {
        self.list_of_transactions.extend(transactions);
        self.list_of_transactions.len()
    }

    /// Recompute and store the hash, then test it against the target. The
    /// stored hash is always the recomputed one; whatever a peer claimed in
    /// the `hash` field is discarded here.
    pub fn validate_hash(&mut self, difficulty: u32) -> bool {
        self.hash = self.compute_hash();
        meets_difficulty(&self.hash, difficulty)
    }

    /// Proof-of-work search. Nonces are drawn uniformly at random with
    /// replacement so that peers mining the same batch concurrently do not
    /// walk the same nonce sequence. Returns `false` if `stop` was raised
    /// before a satisfying nonce was found.
    pub fn mine(&mut self, difficulty: u32, stop: &AtomicBool) -> bool {
        let mut rng = rand::thread_rng();

        loop {
            if stop.load(Ordering::Relaxed) {
                return false;
            }

            self.nonce = rng.gen::<u32>();
            if self.validate_hash(difficulty) {
                return true;
            }
        }
    }
}

pub fn meets_difficulty(hash: &str, difficulty: u32) -> bool {
    let value = match BigUint::parse_bytes(hash.as_bytes(), 16) {
        Some(value) => value,
        None => return false,
    };
    let target = BigUint::one() << (HASH_BITS - difficulty) as usize;

    value < target
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("index", &self.index)
            .field("previous_hash", &self.previous_hash)
            .field("nonce", &self.nonce)
            .field("transactions", &self.list_of_transactions)
            .field("hash", &self.hash)
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

/// Append-only list of blocks plus the set of every contained block hash,
/// kept for O(1) ancestry tests when classifying incoming blocks.
#[derive(Clone, Debug, Serialize)]
pub struct Blockchain {
    pub chain: Vec<Block>,
    #[serde(skip)]
    hashes: HashSet<HexDigest>,
}

impl Blockchain {
    pub fn new(genesis_transaction: Transaction) -> Self {
        let mut blockchain = Blockchain {
            chain: vec![],
            hashes: HashSet::new(),
        };
        blockchain.append_block(Block::genesis(genesis_transaction));

        blockchain
    }

    pub fn from_blocks(blocks: Vec<Block>) -> Self {
        let hashes = blocks.iter().map(|b| b.hash.clone()).collect();

        Blockchain {
            chain: blocks,
            hashes,
        }
    }

    pub fn append_block(&mut self, block: Block) {
        self.hashes.insert(block.hash.clone());
        self.chain.push(block);
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    /// Negative indices count from the end, so `-1` is the chain head.
    pub fn get_block_hash(&self, index: isize) -> &HexDigest {
        let pos = if index < 0 {
            (self.chain.len() as isize + index) as usize
        } else {
            index as usize
        };

        &self.chain[pos].hash
    }

    pub fn contains_hash(&self, hash: &str) -> bool {
        self.hashes.contains(hash)
    }

    /// Every transaction on the chain, in chain order, deduplicated by id.
    /// The order matters: fork switching takes set differences over this and
    /// must preserve original insertion order.
    pub fn set_of_transactions(&self) -> Vec<Transaction> {
        let mut seen: HashSet<HexDigest> = HashSet::new();
        let mut out = vec![];

        for block in &self.chain {
            for txn in &block.list_of_transactions {
                if seen.insert(txn.transaction_id.clone()) {
                    out.push(txn.clone());
                }
            }
        }

        out
    }
}

impl<'de> Deserialize<'de> for Blockchain {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct WireBlockchain {
            chain: Vec<Block>,
        }

        let wire = WireBlockchain::deserialize(deserializer)?;

        Ok(Blockchain::from_blocks(wire.chain))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;

    fn genesis_chain() -> Blockchain {
        let keypair = Keypair::generate().unwrap();
        Blockchain::new(Transaction::genesis(keypair.public().clone(), 300))
    }

    #[test]
    fn difficulty_threshold() {
        // 160-bit hash with one leading zero bit
        assert!(meets_difficulty("0fffffffffffffffffffffffffffffffffffffff", 1));
        assert!(!meets_difficulty("8fffffffffffffffffffffffffffffffffffffff", 1));
        assert!(!meets_difficulty("1fffffffffffffffffffffffffffffffffffffff", 3));
        assert!(meets_difficulty("00000fffffffffffffffffffffffffffffffffff", 20));
    }

    #[test]
    fn genesis_block_shape() {
        let blockchain = genesis_chain();

        assert_eq!(blockchain.len(), 1);
        assert_eq!(blockchain.chain[0].previous_hash, GENESIS_PREVIOUS_HASH);
        assert_eq!(*blockchain.get_block_hash(-1), GENESIS_HASH);
        assert!(blockchain.contains_hash(GENESIS_HASH));
    }

    #[test]
    fn mining_satisfies_validate_hash() {
        let blockchain = genesis_chain();
        let mut block = Block::next(&blockchain);

        let stop = AtomicBool::new(false);
        assert!(block.mine(1, &stop));
        assert!(block.validate_hash(1));
        assert_eq!(block.hash, block.compute_hash());
    }

    #[test]
    fn stopped_miner_gives_up() {
        let blockchain = genesis_chain();
        let mut block = Block::next(&blockchain);

        let stop = AtomicBool::new(true);
        // an impossible difficulty would spin forever without the stop flag
        assert!(!block.mine(159, &stop));
    }

    #[test]
    fn timestamp_does_not_affect_the_hash() {
        let blockchain = genesis_chain();
        let mut block = Block::next(&blockchain);

        let before = block.compute_hash();
        block.timestamp = block.timestamp + chrono::Duration::seconds(3600);
        assert_eq!(block.compute_hash(), before);

        block.nonce += 1;
        assert_ne!(block.compute_hash(), before);
    }

    #[test]
    fn block_wire_round_trip_reproduces_hash() {
        let blockchain = genesis_chain();
        let mut block = Block::next(&blockchain);
        let stop = AtomicBool::new(false);
        block.mine(1, &stop);

        let encoded = serde_json::to_string(&block).unwrap();
        let mut decoded: Block = serde_json::from_str(&encoded).unwrap();

        assert_eq!(decoded.hash, block.hash);
        assert_eq!(decoded.compute_hash(), block.hash);
        assert!(decoded.validate_hash(1));
    }

    #[test]
    fn blockchain_wire_round_trip() {
        let blockchain = genesis_chain();
        let encoded = serde_json::to_string(&blockchain).unwrap();
        let decoded: Blockchain = serde_json::from_str(&encoded).unwrap();

        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded.chain[0].hash, blockchain.chain[0].hash);
        assert!(decoded.contains_hash(GENESIS_HASH));
    }
}
