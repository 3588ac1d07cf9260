use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use super::block::Block;
use super::net;
use super::request::Request;
use super::state::Node;

/// Handle to the single background miner. Cancellation is a raised stop
/// flag: nobody joins the thread, and a block the miner finds after the flag
/// is raised is simply not delivered. A block delivered just before the kill
/// is filtered against the chain head on arrival instead.
pub struct MinerControl {
    pub stop: Arc<AtomicBool>,
}

impl Node {
    /// Start the miner if none is running; a no-op otherwise. There is at
    /// most one miner per node.
    pub fn mine_block(self: &Arc<Self>) {
        let mut guard = self.miner.lock().unwrap();

        if guard.is_some() {
            return;
        }

        let stop = Arc::new(AtomicBool::new(false));
        *guard = Some(MinerControl { stop: stop.clone() });

        let node = Arc::clone(self);
        thread::Builder::new()
            .name(String::from("miner"))
            .spawn(move || miner_worker(node, stop))
            .expect("failed to spawn miner thread");
    }

    /// Fire-and-forget cancellation of the current miner, if any.
    pub fn kill_miner(&self) {
        let mut guard = self.miner.lock().unwrap();

        if let Some(control) = guard.take() {
            control.stop.store(true, Ordering::Relaxed);
        }
    }

    /// Clear the miner handle, but only if it still belongs to the worker
    /// identified by `stop`; a newer miner's handle is left alone.
    fn clear_miner_if(&self, stop: &Arc<AtomicBool>) {
        let mut guard = self.miner.lock().unwrap();

        let ours = matches!(&*guard, Some(control) if Arc::ptr_eq(&control.stop, stop));
        if ours {
            *guard = None;
        }
    }
}

/// The mining worker. Snapshots the chain head and the first `capacity`
/// queued transactions, searches for a nonce, and hands the block back to
/// the state engine as if it had arrived from outside. The broadcast happens
/// here, on the worker thread, with no engine lock held.
fn miner_worker(node: Arc<Node>, stop: Arc<AtomicBool>) {
    let mut block = {
        let chain = node.chain.lock().unwrap();
        let live = node.live.lock().unwrap();

        // the queue can have shrunk between the spawn decision and now
        if live.tx_queue.len() < node.config.capacity {
            drop(live);
            drop(chain);
            node.clear_miner_if(&stop);
            return;
        }

        let mut block = Block::next(&chain.blockchain);
        block.add_transactions(live.tx_queue[..node.config.capacity].to_vec());
        block
    };

    if !block.mine(node.config.difficulty, &stop) {
        return;
    }

    if stop.load(Ordering::Relaxed) {
        return;
    }

    println!("Mined block {} at height {}", block.hash, block.index);

    let stored = node.handle_mined_block(block.clone());

    if stored {
        let peers = node.peer_addresses();
        let addrs: Vec<String> = peers.into_iter().map(|(_, addr)| addr).collect();
        net::broadcast(&Request::NewBlock(block), &addrs);
    }
}
