use std::error::Error;
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

use serde::Deserialize;

use super::block::Blockchain;
use super::request::{Request, Response};
use super::response::handle_request;
use super::state::Node;

/// Send a request to a peer and wait for its response. One JSON value each
/// way per connection.
pub fn send_req(req: &Request, addr: &str) -> Result<Response, Box<dyn Error>> {
    let stream = TcpStream::connect(addr)?;
    stream.set_nodelay(true)?;
    serde_json::to_writer(&stream, req)?;
    stream.shutdown(std::net::Shutdown::Write)?;

    let mut de = serde_json::Deserializer::from_reader(&stream);
    let res = Response::deserialize(&mut de)?;

    Ok(res)
}

/// Fan a request out to every address in parallel and wait for the acks.
/// Best effort: returns whether every peer answered; unreachable peers are
/// not retried.
pub fn broadcast(req: &Request, addrs: &[String]) -> bool {
    let results = crossbeam::scope(|scope| {
        let handles = addrs
            .iter()
            .map(|addr| scope.spawn(move |_| send_req(req, addr).is_ok()))
            .collect::<Vec<_>>();

        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect::<Vec<bool>>()
    })
    .unwrap();

    results.into_iter().all(|delivered| delivered)
}

/// Ask every peer for its chain length, in parallel. A peer that cannot be
/// reached or answers nonsense counts as length 0.
pub fn poll_lengths(peers: &[(usize, String)]) -> Vec<(usize, usize)> {
    crossbeam::scope(|scope| {
        let handles = peers
            .iter()
            .map(|(id, addr)| {
                scope.spawn(move |_| {
                    let len = match send_req(&Request::GetLength, addr) {
                        Ok(Response::Length(len)) => len,
                        _ => 0,
                    };

                    (*id, len)
                })
            })
            .collect::<Vec<_>>();

        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect::<Vec<(usize, usize)>>()
    })
    .unwrap()
}

pub fn fetch_blockchain(addr: &str) -> Result<Blockchain, Box<dyn Error>> {
    match send_req(&Request::GetBlockchain, addr)? {
        Response::Chain(blockchain) => Ok(blockchain),
        other => Err(format!("peer returned nonsense instead of a blockchain: {:?}", other).into()),
    }
}

/// Accept loop of the endpoint adapter. Each connection carries one request;
/// a handler thread decodes it, drives the engine, replies, and performs any
/// follow-up broadcast with no engine lock held.
pub fn listen_for_connections(node: &Arc<Node>) -> Result<(), Box<dyn Error>> {
    let socket = TcpListener::bind(("0.0.0.0", node.config.port))?;

    for stream in socket.incoming() {
        match stream {
            Err(err) => println!("Error receiving incoming connection: {}", err),
            Ok(conn) => {
                let node = Arc::clone(node);

                thread::spawn(move || {
                    let req: Request = {
                        let mut de = serde_json::Deserializer::from_reader(&conn);
                        match Request::deserialize(&mut de) {
                            Ok(req) => req,
                            Err(err) => {
                                println!("Received invalid request: {}", err);
                                return;
                            }
                        }
                    };

                    if let Err(err) = handle_request(req, conn, &node) {
                        println!("Error handling request: {}", err);
                    }
                });
            }
        }
    }

    Ok(())
}

pub fn send_res(res: &Response, stream: &TcpStream) -> Result<(), Box<dyn Error>> {
    serde_json::to_writer(stream, res)?;

    Ok(())
}
