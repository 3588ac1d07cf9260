use std::error::Error;
use std::net::TcpStream;
use std::sync::Arc;

use super::membership::{announce_ring, receive_wallets};
use super::net::{broadcast, send_res};
use super::request::{Request, Response};
use super::state::Node;

/// The endpoint adapter: maps each decoded request to its engine operation,
/// replies, and performs any follow-up broadcast. Broadcasts always run
/// after the engine has returned, so no engine lock is held during network
/// I/O. Every request gets a response, including silently rejected ones;
/// a missing response means transport failure, nothing else.
pub fn handle_request(
    req: Request,
    socket: TcpStream,
    node: &Arc<Node>,
) -> Result<(), Box<dyn Error>> {
    match req {
        Request::RegisterNode(info) => {
            let (id, blockchain, ring_complete) = node.register_node(info);
            send_res(&Response::Registered { id, blockchain }, &socket)?;
            drop(socket);

            // the last registration completes the ring: hand every joiner
            // the full wallet list, then seed them with coins
            if ring_complete {
                announce_ring(node);
            }

            Ok(())
        }
        Request::Wallets(wallets) => {
            receive_wallets(node, wallets);
            send_res(&Response::Ack, &socket)
        }
        Request::NewTransaction(txn) => {
            node.receive_transaction(txn);
            send_res(&Response::Ack, &socket)
        }
        Request::NewBlock(block) => {
            let outcome = node.receive_block(block);
            send_res(&Response::Accepted(outcome.advanced()), &socket)
        }
        Request::MinedBlock(block) => {
            let stored = node.handle_mined_block(block.clone());
            send_res(&Response::Accepted(stored), &socket)?;
            drop(socket);

            if stored {
                broadcast(&Request::NewBlock(block), &peer_addrs(node));
            }

            Ok(())
        }
        Request::GetLength => send_res(&Response::Length(node.chain_length()), &socket),
        Request::GetBlockchain | Request::GetViewBlockchain => {
            send_res(&Response::Chain(node.blockchain_snapshot()), &socket)
        }
        Request::GetRing => send_res(&Response::Ring(node.ring_views()), &socket),
        Request::GetId => send_res(&Response::Id(node.my_id), &socket),
        Request::GetBalance => send_res(&Response::Balance(node.balance()), &socket),
        Request::GetBalances => send_res(&Response::Balances(node.balances()), &socket),
        Request::GetView => send_res(&Response::View(node.last_block_transactions()), &socket),
        Request::Purchase {
            receiver_id,
            amount,
        } => {
            let txn = node.create_transaction(receiver_id, amount);
            send_res(&Response::Accepted(txn.is_some()), &socket)?;
            drop(socket);

            if let Some(txn) = txn {
                broadcast(&Request::NewTransaction(txn), &peer_addrs(node));
            }

            Ok(())
        }
        Request::BlackHatPurchase {
            receiver_id,
            amount,
        } => {
            let txn = node.bogus_transaction(receiver_id, amount);
            send_res(&Response::Accepted(txn.is_some()), &socket)?;
            drop(socket);

            if let Some(txn) = txn {
                broadcast(&Request::NewTransaction(txn), &peer_addrs(node));
            }

            Ok(())
        }
    }
}

fn peer_addrs(node: &Arc<Node>) -> Vec<String> {
    node.peer_addresses()
        .into_iter()
        .map(|(_, addr)| addr)
        .collect()
}
