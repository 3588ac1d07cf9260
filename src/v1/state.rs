use std::cmp::min;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::crypto::{HexDigest, Keypair};

use super::block::{Block, Blockchain};
use super::block_verify::valid_proof;
use super::config::Config;
use super::miner::MinerControl;
use super::net;
use super::transaction::Transaction;
use super::txn_verify::verify_transaction;
use super::wallet::{PeerView, Ring, Wallet, WalletInfo};

/// Everything guarded by the chain lock: the blockchain itself and the ring
/// reflecting only mined transactions. Incoming blocks are validated against
/// this ring.
pub struct ChainState {
    pub blockchain: Blockchain,
    pub ring: Ring,
}

/// Everything guarded by the live lock: the ring reflecting every validated
/// transaction (mined or not), the queue of transactions awaiting a block,
/// and the transactions received before the ring was complete or displaced
/// by a fork switch.
pub struct LiveState {
    pub ring: Ring,
    pub tx_queue: Vec<Transaction>,
    pub unprocessed_queue: Vec<Transaction>,
}

/// What became of an incoming block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    /// Extended the chain head.
    Accepted,
    /// Extends a known block that is not the head; ignored.
    Stale,
    /// Failed proof of work or carried an invalid transaction.
    Rejected,
    /// Triggered fork resolution which kept our chain.
    Kept,
    /// Triggered fork resolution which adopted a longer chain.
    Switched,
}

impl BlockOutcome {
    pub fn advanced(&self) -> bool {
        matches!(self, BlockOutcome::Accepted | BlockOutcome::Switched)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsensusOutcome {
    Kept,
    Switched,
}

/// The per-peer state engine. All mutation happens under two mutexes with a
/// fixed acquisition order: `chain` strictly before `live`, never the
/// reverse. Code that needs both takes them in that order in one scope; the
/// helpers that run under a held lock take the guarded state by `&mut` so no
/// path ever re-locks.
///
/// Network I/O never happens while either lock is held. Engine operations
/// return the object to broadcast and the caller (endpoint handler, session
/// command, or miner thread) broadcasts after the locks are released.
pub struct Node {
    pub my_id: usize,
    pub keypair: Keypair,
    pub address: String,
    pub config: Config,
    pub(crate) chain: Mutex<ChainState>,
    pub(crate) live: Mutex<LiveState>,
    pub(crate) miner: Mutex<Option<MinerControl>>,
}

impl Node {
    /// The bootstrap node mints `100 * N` to itself in the genesis block and
    /// starts with both rings already credited.
    pub fn new_bootstrap(keypair: Keypair, address: String, config: Config) -> Node {
        let genesis = Transaction::genesis(keypair.public().clone(), 100 * config.nodes as u64);

        let mut ring = Ring::default();
        ring.insert(0, Wallet::new(keypair.public().clone(), address.clone()));
        ring.credit_outputs(&genesis.transaction_outputs);

        let blockchain = Blockchain::new(genesis);

        Node {
            my_id: 0,
            keypair,
            address,
            config,
            chain: Mutex::new(ChainState {
                blockchain,
                ring: ring.clone(),
            }),
            live: Mutex::new(LiveState {
                ring,
                tx_queue: vec![],
                unprocessed_queue: vec![],
            }),
            miner: Mutex::new(None),
        }
    }

    /// A joiner adopts the blockchain handed back by the bootstrap without
    /// validating it yet; validation happens once the full ring arrives.
    pub fn new_peer(
        keypair: Keypair,
        address: String,
        config: Config,
        my_id: usize,
        blockchain: Blockchain,
    ) -> Node {
        let mut ring = Ring::default();
        ring.insert(my_id, Wallet::new(keypair.public().clone(), address.clone()));

        Node {
            my_id,
            keypair,
            address,
            config,
            chain: Mutex::new(ChainState {
                blockchain,
                ring: ring.clone(),
            }),
            live: Mutex::new(LiveState {
                ring,
                tx_queue: vec![],
                unprocessed_queue: vec![],
            }),
            miner: Mutex::new(None),
        }
    }

    /// Create, sign and locally apply a transfer to `receiver_id`. Returns
    /// `None` when the receiver is unknown or the balance cannot cover the
    /// amount. The caller broadcasts the returned transaction after this
    /// method has released its locks.
    pub fn create_transaction(
        self: &Arc<Self>,
        receiver_id: usize,
        amount: u64,
    ) -> Option<Transaction> {
        let mut live = self.live.lock().unwrap();

        let receiver_pubk = live.ring.get(receiver_id)?.pubkey.clone();
        let my_wallet = live.ring.get_mut(self.my_id)?;

        // construction consumes the inputs from our own wallet
        let txn = Transaction::new(receiver_pubk, amount, &self.keypair, my_wallet)?;

        // crediting the outputs pays the receiver and returns our change
        live.ring.credit_outputs(&txn.transaction_outputs);
        live.tx_queue.push(txn.clone());
        self.maybe_mine(&live);

        Some(txn)
    }

    /// Fabricate a signed transfer over our current UTXO ids without
    /// debiting anything locally. Peers put it through normal validation,
    /// where the amount mismatch makes every honest node drop it. Exists to
    /// demonstrate that the network rejects overdrafts.
    pub fn bogus_transaction(&self, receiver_id: usize, amount: u64) -> Option<Transaction> {
        let live = self.live.lock().unwrap();

        let receiver_pubk = live.ring.get(receiver_id)?.pubkey.clone();
        let inputs = live
            .ring
            .get(self.my_id)?
            .utxos()
            .iter()
            .map(|u| u.transaction_id.clone())
            .collect();

        Some(Transaction::forge(
            receiver_pubk,
            amount,
            &self.keypair,
            inputs,
        ))
    }

    /// An incoming transaction from a peer. Queued for later if the ring is
    /// not complete yet (except on the bootstrap, which is the one building
    /// the ring); otherwise validated against the live ring and either
    /// applied and queued for mining, or dropped silently.
    pub fn receive_transaction(self: &Arc<Self>, txn: Transaction) -> bool {
        let mut live = self.live.lock().unwrap();

        if live.ring.len() < self.config.nodes && !self.config.bootstrap {
            live.unprocessed_queue.push(txn);
            return false;
        }

        match verify_transaction(&txn, &mut live.ring) {
            Err(err) => {
                println!("Rejecting transaction {}: {}", txn.transaction_id, err);
                false
            }
            Ok(()) => {
                live.ring.credit_outputs(&txn.transaction_outputs);
                live.tx_queue.push(txn);
                self.maybe_mine(&live);
                true
            }
        }
    }

    /// Replay everything that was waiting on a complete ring (or was
    /// displaced by a fork switch) against the current live ring. Whatever
    /// still validates joins the queue; the rest is dropped with the cleared
    /// backlog.
    pub fn process_unprocessed(self: &Arc<Self>) {
        let mut live = self.live.lock().unwrap();
        self.process_unprocessed_locked(&mut live);
    }

    pub(crate) fn process_unprocessed_locked(self: &Arc<Self>, live: &mut LiveState) {
        let backlog = std::mem::take(&mut live.unprocessed_queue);

        for txn in backlog {
            if verify_transaction(&txn, &mut live.ring).is_ok() {
                live.ring.credit_outputs(&txn.transaction_outputs);
                live.tx_queue.push(txn);
            }
        }

        self.maybe_mine(live);
    }

    /// A block our own miner finished. Stored only if it still extends the
    /// head: if an external block won the race in the meantime the work is
    /// discarded, and the queue is left alone because the external block
    /// already reconciled it. Returns whether the block was stored; the
    /// caller broadcasts it if so.
    pub fn handle_mined_block(self: &Arc<Self>, block: Block) -> bool {
        let mut chain = self.chain.lock().unwrap();

        // allow the next mining cycle whatever happens below
        *self.miner.lock().unwrap() = None;

        let mut stored = false;

        if block.previous_hash == *chain.blockchain.get_block_hash(-1) {
            let mut live = self.live.lock().unwrap();

            let count = min(self.config.capacity, live.tx_queue.len());
            let mined: Vec<Transaction> = live.tx_queue.drain(..count).collect();

            // mirror onto the on-chain ring what the live ring saw when
            // these transactions were first validated
            for txn in &mined {
                chain.ring.credit_outputs(&txn.transaction_outputs);
                if let Some(sender) = txn.sender_pubk.key() {
                    if let Some(wallet) = chain.ring.wallet_of_mut(sender) {
                        wallet.remove_utxos(&txn.transaction_inputs);
                    }
                }
            }

            chain.blockchain.append_block(block);
            stored = true;

            self.maybe_mine(&live);
        } else {
            println!("Discarding own mined block: chain head moved");
            let live = self.live.lock().unwrap();
            self.maybe_mine(&live);
        }

        stored
    }

    /// An incoming block from a peer. Stale side-branch blocks are ignored,
    /// blocks extending the head are validated against the on-chain ring and
    /// committed, and anything else means we are behind and triggers fork
    /// resolution.
    pub fn receive_block(self: &Arc<Self>, block: Block) -> BlockOutcome {
        {
            let mut chain = self.chain.lock().unwrap();
            let head = chain.blockchain.get_block_hash(-1).clone();

            if chain.blockchain.contains_hash(&block.previous_hash) && block.previous_hash != head
            {
                return BlockOutcome::Stale;
            }

            if block.previous_hash == head {
                let mut block = block;

                if let Err(err) = valid_proof(&mut block, &mut chain.ring, self.config.difficulty)
                {
                    println!("Rejecting block: {}", err);
                    return BlockOutcome::Rejected;
                }

                // the on-chain ring is now advanced; commit and reconcile
                // the live queue in the same critical section
                let mut live = self.live.lock().unwrap();
                self.kill_miner();

                let in_block: HashSet<HexDigest> = block
                    .list_of_transactions
                    .iter()
                    .map(|t| t.transaction_id.clone())
                    .collect();
                let had: HashSet<HexDigest> = live
                    .tx_queue
                    .iter()
                    .map(|t| t.transaction_id.clone())
                    .collect();

                chain.blockchain.append_block(block.clone());

                // transactions we were queueing that are now on-chain
                live.tx_queue.retain(|t| !in_block.contains(&t.transaction_id));

                // block transactions we had never seen: settle them in the
                // live ring but do not queue them, they are already mined
                for txn in &block.list_of_transactions {
                    if had.contains(&txn.transaction_id) {
                        continue;
                    }
                    if verify_transaction(txn, &mut live.ring).is_ok() {
                        live.ring.credit_outputs(&txn.transaction_outputs);
                    }
                }

                return BlockOutcome::Accepted;
            }
        }

        // unknown parent: someone has a chain we have not seen
        match self.resolve_conflicts() {
            ConsensusOutcome::Kept => BlockOutcome::Kept,
            ConsensusOutcome::Switched => BlockOutcome::Switched,
        }
    }

    /// Longest-chain consensus. Polls every peer for its chain length, picks
    /// the longest (ties go to the lower node id), fetches and validates the
    /// winner, and switches to it if it holds up. All network traffic here
    /// happens with no lock held.
    pub fn resolve_conflicts(self: &Arc<Self>) -> ConsensusOutcome {
        let peers = self.peer_addresses();
        if peers.is_empty() {
            return ConsensusOutcome::Kept;
        }

        let mut lengths = net::poll_lengths(&peers);
        lengths.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        let (best_id, best_len) = match lengths.first() {
            None => return ConsensusOutcome::Kept,
            Some(best) => *best,
        };

        let my_len = self.chain.lock().unwrap().blockchain.len();

        if best_len < my_len || (best_len == my_len && self.my_id < best_id) {
            return ConsensusOutcome::Kept;
        }

        let addr = peers
            .iter()
            .find(|(id, _)| *id == best_id)
            .map(|(_, addr)| addr.clone())
            .unwrap();

        let fetched = match net::fetch_blockchain(&addr) {
            Ok(blockchain) => blockchain,
            Err(err) => {
                println!("Failed to fetch blockchain from node {}: {}", best_id, err);
                return ConsensusOutcome::Kept;
            }
        };

        let (new_chain, new_ring) = match self.valid_chain(&fetched) {
            Some(validated) => validated,
            None => {
                println!("Rejecting invalid chain from node {}", best_id);
                return ConsensusOutcome::Kept;
            }
        };

        self.accept_foreign_blockchain(new_chain, new_ring);

        ConsensusOutcome::Switched
    }

    /// Replay a whole chain against an emptied copy of the ring: credit the
    /// genesis mint, then validate every later block with [valid_proof].
    /// Block 0 carries seed values instead of real proof of work and is
    /// skipped on purpose. Returns the rebuilt chain (with recomputed block
    /// hashes) and the post-chain ring.
    pub fn valid_chain(&self, blockchain: &Blockchain) -> Option<(Blockchain, Ring)> {
        let mut ring = self.live.lock().unwrap().ring.fresh();

        let mut blocks = blockchain.chain.clone();
        let genesis_txn = blocks.first()?.list_of_transactions.first()?.clone();

        if !ring.credit_outputs(&genesis_txn.transaction_outputs) {
            return None;
        }

        for block in blocks.iter_mut().skip(1) {
            if let Err(err) = valid_proof(block, &mut ring, self.config.difficulty) {
                println!("Invalid chain: {}", err);
                return None;
            }
        }

        Some((Blockchain::from_blocks(blocks), ring))
    }

    /// Switch to a validated foreign chain. Every transaction we knew about
    /// (on our old chain or in either queue) that the new chain does not
    /// contain goes back through the unprocessed queue, in its original
    /// order, and is revalidated against the new ring.
    pub fn accept_foreign_blockchain(self: &Arc<Self>, new_chain: Blockchain, new_ring: Ring) {
        let mut chain = self.chain.lock().unwrap();
        let mut live = self.live.lock().unwrap();

        self.kill_miner();

        let new_ids: HashSet<HexDigest> = new_chain
            .set_of_transactions()
            .iter()
            .map(|t| t.transaction_id.clone())
            .collect();

        let old_txns = chain.blockchain.set_of_transactions();
        let queued = std::mem::take(&mut live.tx_queue);
        let backlog = std::mem::take(&mut live.unprocessed_queue);

        let mut seen: HashSet<HexDigest> = HashSet::new();
        let mut displaced = vec![];
        for txn in old_txns.into_iter().chain(queued).chain(backlog) {
            if new_ids.contains(&txn.transaction_id) || !seen.insert(txn.transaction_id.clone()) {
                continue;
            }
            displaced.push(txn);
        }

        live.ring = new_ring.clone();
        chain.ring = new_ring;
        live.unprocessed_queue = displaced;
        chain.blockchain = new_chain;

        self.process_unprocessed_locked(&mut live);
    }

    fn maybe_mine(self: &Arc<Self>, live: &LiveState) {
        if live.tx_queue.len() >= self.config.capacity {
            self.mine_block();
        }
    }

    /// Addresses of every peer but us, for broadcasts and polling.
    pub fn peer_addresses(&self) -> Vec<(usize, String)> {
        let live = self.live.lock().unwrap();

        live.ring
            .iter()
            .filter(|(id, _)| *id != self.my_id)
            .map(|(id, wallet)| (id, wallet.address.clone()))
            .collect()
    }

    pub fn balance(&self) -> u64 {
        let live = self.live.lock().unwrap();
        live.ring.get(self.my_id).map(|w| w.balance()).unwrap_or(0)
    }

    pub fn balances(&self) -> BTreeMap<usize, u64> {
        self.live.lock().unwrap().ring.balances()
    }

    pub fn ring_views(&self) -> Vec<PeerView> {
        self.live.lock().unwrap().ring.views()
    }

    /// Every known wallet in introduction form, for the ring fan-out.
    pub fn wallet_infos(&self) -> BTreeMap<usize, WalletInfo> {
        self.live.lock().unwrap().ring.infos()
    }

    /// Balances implied by mined transactions only, from the on-chain ring.
    pub fn settled_balances(&self) -> BTreeMap<usize, u64> {
        self.chain.lock().unwrap().ring.balances()
    }

    /// `(tx_queue, unprocessed_queue)` lengths.
    pub fn mempool_sizes(&self) -> (usize, usize) {
        let live = self.live.lock().unwrap();
        (live.tx_queue.len(), live.unprocessed_queue.len())
    }

    pub fn chain_length(&self) -> usize {
        self.chain.lock().unwrap().blockchain.len()
    }

    pub fn blockchain_snapshot(&self) -> Blockchain {
        self.chain.lock().unwrap().blockchain.clone()
    }

    /// The transactions of the chain head, for the `view` command.
    pub fn last_block_transactions(&self) -> Vec<Transaction> {
        let chain = self.chain.lock().unwrap();
        chain
            .blockchain
            .chain
            .last()
            .map(|b| b.list_of_transactions.clone())
            .unwrap_or_default()
    }
}
